// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Segment restore agent
//!
//! Walks the oid schedule and, for each table, positions the data stream
//! at the table's TOC range and streams that range into the table's pipe.
//! The pipe for the following table is created before the current one is
//! opened, so by the time the loader finishes a table and asks for the
//! next pipe, it is already there.

use crate::error::{RestoreError, Result};
use crate::options::RestoreOptions;
use crate::pipe::{PipeGuard, PipeWriter};
use crate::schedule::OidSchedule;
use crate::source::RestoreReader;
use crate::toc::SegmentToc;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// What happened to one scheduled table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    pub oid: u32,
    pub start_byte: u64,
    pub end_byte: u64,
    /// Bytes delivered into the pipe; none count when closing the pipe failed
    pub copied: u64,
    /// Reader position once the table was done with
    pub last_byte: u64,
    pub failed: bool,
}

/// Result of a run that did not hit a fatal error
#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub tables: Vec<TableOutcome>,
    pub last_byte: u64,
    /// Most recent table failure skipped under on-error-continue
    pub last_error: Option<RestoreError>,
}

impl RestoreSummary {
    #[must_use]
    pub fn tables_restored(&self) -> usize {
        self.tables.iter().filter(|t| !t.failed).count()
    }

    #[must_use]
    pub fn tables_failed(&self) -> usize {
        self.tables.iter().filter(|t| t.failed).count()
    }

    #[must_use]
    pub fn bytes_copied(&self) -> u64 {
        self.tables.iter().map(|t| t.copied).sum()
    }
}

pub struct RestoreAgent {
    options: RestoreOptions,
    toc: SegmentToc,
    schedule: OidSchedule,
    cancel: CancellationToken,
}

impl RestoreAgent {
    /// Every scheduled oid must be in the TOC.
    pub fn new(
        options: RestoreOptions,
        toc: SegmentToc,
        schedule: OidSchedule,
        cancel: CancellationToken,
    ) -> Result<Self> {
        schedule.check_against(&toc)?;
        Ok(Self {
            options,
            toc,
            schedule,
            cancel,
        })
    }

    /// Read the TOC and oid list named in `options`
    pub async fn load(options: RestoreOptions, cancel: CancellationToken) -> Result<Self> {
        let schedule = OidSchedule::load(&options.oid_file).await?;
        let toc = SegmentToc::load(&options.toc_file).await?;
        Self::new(options, toc, schedule, cancel)
    }

    /// Restore every scheduled table.
    ///
    /// The pipe for the first oid must already exist; the agent takes it
    /// over and, like every pipe it creates, unlinks it before returning.
    pub async fn run(&self) -> Result<RestoreSummary> {
        let Some(first) = self.schedule.first() else {
            diagnostics::log_info!("Oid list is empty, nothing to restore");
            return Ok(RestoreSummary::default());
        };
        let first_pipe = PipeGuard::adopt(self.options.pipe_path(first));

        let mut reader = RestoreReader::open(&self.options, &self.toc).await?;
        let subset = reader.is_subset();
        diagnostics::log_debug!("Data reader ready, subset: {subset}", subset: subset);

        let result = self.restore_tables(&mut reader, first_pipe).await;
        reader.close().await;
        result
    }

    /// The loop proper, over an already opened reader
    pub async fn restore_tables(
        &self,
        reader: &mut RestoreReader,
        first_pipe: PipeGuard,
    ) -> Result<RestoreSummary> {
        let oids = self.schedule.oids();
        let mut summary = RestoreSummary::default();
        let mut current = Some(first_pipe);

        for (i, &oid) in oids.iter().enumerate() {
            let current_pipe = current
                .take()
                .unwrap_or_else(|| PipeGuard::adopt(self.options.pipe_path(oid)));

            if self.cancel.is_cancelled() {
                return Err(reader.enrich(RestoreError::Terminated));
            }

            let next_pipe = match oids.get(i + 1) {
                Some(&next_oid) => {
                    let path = self.options.pipe_path(next_oid);
                    let pipe = path.display().to_string();
                    diagnostics::log_info!("Creating pipe for oid {oid}: {pipe}", oid: next_oid, pipe: pipe);
                    // Losing the ability to create pipes ends the restore
                    // even under on-error-continue
                    Some(PipeGuard::create(path).map_err(|e| reader.enrich(e))?)
                }
                None => None,
            };

            let outcome = self.restore_table(reader, oid, current_pipe.path()).await;

            let pipe = current_pipe.path().display().to_string();
            diagnostics::log_info!("Removing pipe for oid {oid}: {pipe}", oid: oid, pipe: pipe);
            if let Err(e) = current_pipe.remove().await {
                if let Some(next) = next_pipe {
                    if let Err(next_err) = next.remove().await {
                        let error = next_err.to_string();
                        diagnostics::log_warn!("{error}", error: error);
                    }
                }
                return Err(reader.enrich(e));
            }

            let (failed, copied) = match outcome {
                Ok(()) => (false, None),
                Err(e) => {
                    let e = reader.enrich(e);
                    if !(e.is_recoverable() && self.options.on_error_continue) {
                        return Err(e);
                    }
                    let copied = match e.kind() {
                        RestoreError::Copy { copied, .. } => *copied,
                        _ => 0,
                    };
                    let error = e.to_string();
                    diagnostics::log_error!("Error encountered: {error}", error: error);
                    summary.last_error = Some(e);
                    (true, Some(copied))
                }
            };

            let entry = self.toc.lookup(oid)?;
            summary.tables.push(TableOutcome {
                oid,
                start_byte: entry.start_byte,
                end_byte: entry.end_byte,
                copied: copied.unwrap_or(entry.len()),
                last_byte: reader.position(),
                failed,
            });

            current = next_pipe;
        }

        summary.last_byte = reader.position();
        Ok(summary)
    }

    /// Deliver one table. Fatal errors and per-table errors both come back
    /// as `Err`; the caller decides using [`RestoreError::is_recoverable`].
    async fn restore_table(&self, reader: &mut RestoreReader, oid: u32, pipe: &Path) -> Result<()> {
        let pipe_display = pipe.display().to_string();
        diagnostics::log_info!("Opening pipe for oid {oid}: {pipe}", oid: oid, pipe: pipe_display);
        let mut writer = PipeWriter::open(pipe).await?;

        let entry = self.toc.lookup(oid)?;
        let (start, end) = (entry.start_byte, entry.end_byte);
        let last_byte = reader.position();
        diagnostics::log_info!("Data Reader - Start Byte: {start}; End Byte: {end}; Last Byte: {last_byte}",
            start: start, end: end, last_byte: last_byte);

        if start < last_byte {
            return Err(RestoreError::config(format!(
                "TOC range for oid {oid} starts at byte {start}, behind the reader at byte {last_byte}"
            )));
        }
        let discarded = reader.discard(start - last_byte).await?;
        diagnostics::log_info!("Data Reader discarded {discarded} bytes", discarded: discarded);

        diagnostics::log_info!("Restoring table with oid {oid}", oid: oid);
        let copied = match reader.copy_into(writer.writer(), entry.len()).await {
            Ok(copied) => copied,
            Err(partial) => {
                // Hand the loader whatever was accepted before the failure
                let _ = writer.flush_and_close().await;
                return Err(RestoreError::Copy {
                    oid,
                    copied: partial.copied,
                    source: partial.error,
                });
            }
        };
        diagnostics::log_info!("Copied {copied} bytes into the pipe", copied: copied);

        diagnostics::log_info!("Closing pipe for oid {oid}: {pipe}", oid: oid, pipe: pipe_display);
        writer
            .flush_and_close()
            .await
            .map_err(|source| RestoreError::PipeClose { oid, source })
    }
}
