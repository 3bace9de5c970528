// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Command line front end for the segment restore agent

use anyhow::{Context, Result};
use clap::Parser;
use segrestore::{CancellationToken, RestoreAgent, RestoreOptions, RestoreSummary};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
#[command(name = "segrestore")]
#[command(about = "Feed one segment's backup data into per-table restore pipes")]
pub struct Cli {
    /// Run as the segment restore agent
    #[arg(long, required = true)]
    pub restore_agent: bool,

    /// TOC file with each table's byte range in the data file
    #[arg(long)]
    pub toc_file: PathBuf,

    /// File listing the table oids to restore, one per line, in order
    #[arg(long)]
    pub oid_file: PathBuf,

    /// Pipe name prefix; each table's pipe is `<pipe_file>_<oid>`
    #[arg(long)]
    pub pipe_file: PathBuf,

    /// Backup data file for this segment
    #[arg(long)]
    pub data_file: PathBuf,

    /// Segment content id
    #[arg(long)]
    pub content: Option<i32>,

    /// Nonzero when the data file is gzip compressed
    #[arg(long, default_value_t = 0)]
    pub compression_level: i32,

    /// Storage plugin config; the data file is then read through the plugin
    #[arg(long)]
    pub plugin_config: Option<PathBuf>,

    /// Only a subset of the segment's tables is being restored
    #[arg(long)]
    pub with_filters: bool,

    /// Log and skip tables that fail instead of stopping
    #[arg(long)]
    pub on_error_continue: bool,
}

impl Cli {
    #[must_use]
    pub fn options(&self) -> RestoreOptions {
        RestoreOptions {
            data_file: self.data_file.clone(),
            toc_file: self.toc_file.clone(),
            oid_file: self.oid_file.clone(),
            pipe_file: self.pipe_file.clone(),
            compression_level: self.compression_level,
            plugin_config_file: self.plugin_config.clone(),
            is_filter: self.with_filters,
            on_error_continue: self.on_error_continue,
            content: self.content,
        }
    }
}

/// How a run ended, as far as the coordinator is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Restored,
    /// Some tables were skipped under on-error-continue
    RestoredWithErrors,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        match self {
            RunStatus::Restored | RunStatus::RestoredWithErrors => ExitCode::SUCCESS,
            RunStatus::Failed => ExitCode::FAILURE,
        }
    }
}

/// Create the empty `<pipe_file>_error` file the coordinator checks for
pub async fn write_error_marker(path: &Path) -> Result<()> {
    tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create error marker {}", path.display()))?;
    Ok(())
}

/// Load and run the agent, then report the outcome through logs and the
/// error marker
pub async fn run(options: RestoreOptions, cancel: CancellationToken) -> RunStatus {
    let marker = options.error_marker_path();
    let result = match RestoreAgent::load(options, cancel).await {
        Ok(agent) => agent.run().await,
        Err(e) => Err(e),
    };

    let status = report(&result);
    if status != RunStatus::Restored {
        if let Err(e) = write_error_marker(&marker).await {
            let error = format!("{e:#}");
            diagnostics::log_error!("{error}", error: error);
        }
    }
    status
}

fn report(result: &segrestore::Result<RestoreSummary>) -> RunStatus {
    match result {
        Ok(summary) => {
            let restored = summary.tables_restored();
            let failed = summary.tables_failed();
            let bytes = summary.bytes_copied();
            let last_byte = summary.last_byte;
            diagnostics::log_info!("Restored {restored} tables ({failed} skipped), {bytes} bytes copied, reader at byte {last_byte}",
                restored: restored, failed: failed, bytes: bytes, last_byte: last_byte);
            match &summary.last_error {
                Some(e) => {
                    let error = e.to_string();
                    diagnostics::log_warn!("Last error encountered: {error}", error: error);
                    RunStatus::RestoredWithErrors
                }
                None => RunStatus::Restored,
            }
        }
        Err(e) if e.is_terminated() => {
            diagnostics::log_warn!("Terminated due to user request");
            RunStatus::Failed
        }
        Err(e) => {
            let error = e.to_string();
            diagnostics::log_error!("Error encountered: {error}", error: error);
            RunStatus::Failed
        }
    }
}
