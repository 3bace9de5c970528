// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Forward-only reader over the segment data stream
//!
//! The stream is either a local data file or the stdout of a restore
//! plugin, optionally gzip encoded. TOC offsets are offsets into the
//! decoded stream, so positioning happens after decompression and only
//! ever moves forward: skip with [`RestoreReader::discard`], deliver with
//! [`RestoreReader::copy_into`].

use crate::error::{RestoreError, Result};
use crate::options::RestoreOptions;
use crate::plugin::{PluginConfig, PluginProcess};
use crate::toc::SegmentToc;
use async_compression::tokio::bufread::GzipDecoder;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Read buffer between the source and the pipes
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

const STDERR_SETTLE: Duration = Duration::from_millis(100);

type BoxedRead = Pin<Box<dyn AsyncRead + Send>>;

/// A copy that stopped early, with how far it got
#[derive(Debug)]
pub struct PartialCopy {
    pub copied: u64,
    pub error: std::io::Error,
}

pub struct RestoreReader {
    reader: BufReader<BoxedRead>,
    position: u64,
    plugin: Option<PluginProcess>,
}

impl RestoreReader {
    /// Open the source selected by `options` and check the plugin started cleanly
    pub async fn open(options: &RestoreOptions, toc: &SegmentToc) -> Result<Self> {
        let (raw, plugin): (BoxedRead, Option<PluginProcess>) = match options.plugin_config() {
            Some(config_path) => {
                let config = PluginConfig::load(config_path).await?;
                let mut process = PluginProcess::start(&config, options, toc).await?;
                let stdout = process.take_stdout()?;
                (Box::pin(stdout), Some(process))
            }
            None => {
                let file = tokio::fs::File::open(&options.data_file)
                    .await
                    .map_err(|source| RestoreError::SourceRead {
                        position: 0,
                        source: std::io::Error::new(
                            source.kind(),
                            format!(
                                "failed to open data file {}: {source}",
                                options.data_file.display()
                            ),
                        ),
                    })?;
                (Box::pin(file), None)
            }
        };

        let mut reader = Self::new(raw, options.is_compressed());
        reader.plugin = plugin;
        if let Err(e) = reader.check_startup().await {
            if let Some(plugin) = reader.plugin.take() {
                plugin.abort().await;
            }
            return Err(e);
        }
        Ok(reader)
    }

    /// Wrap an already open stream
    #[must_use]
    pub fn from_stream<R>(stream: R, compressed: bool) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::new(Box::pin(stream), compressed)
    }

    fn new(raw: BoxedRead, compressed: bool) -> Self {
        let decoded: BoxedRead = if compressed {
            let mut decoder = GzipDecoder::new(BufReader::new(raw));
            // Parallel gzip writers emit one member per block
            decoder.multiple_members(true);
            Box::pin(decoder)
        } else {
            raw
        };
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, decoded),
            position: 0,
            plugin: None,
        }
    }

    /// Pull the first bytes so a plugin that fails immediately is reported
    /// as a startup failure with its own message. A plugin that writes to
    /// stderr before stdout fails startup even if it never closes stdout.
    async fn check_startup(&mut self) -> Result<()> {
        let stderr = self.plugin.as_ref().map(|p| p.stderr().clone());
        let first = match &stderr {
            Some(stderr) => tokio::select! {
                first = self.reader.fill_buf() => first.map(|buf| buf.is_empty()),
                () = stderr.spoken() => {
                    // Let the rest of the complaint arrive
                    tokio::time::sleep(STDERR_SETTLE).await;
                    return Err(RestoreError::plugin_startup(stderr.message()));
                }
            },
            None => self.reader.fill_buf().await.map(|buf| buf.is_empty()),
        };

        if let Some(plugin) = self.plugin.as_mut() {
            if !matches!(first, Ok(false)) {
                // Nothing arrived on stdout; let stderr finish so the
                // plugin's complaint is not lost to a race.
                plugin.wait_for_stderr().await;
            }
            let message = plugin.stderr().message();
            if !message.is_empty() {
                return Err(RestoreError::plugin_startup(message));
            }
        }

        match first {
            Ok(_) => Ok(()),
            Err(source) => Err(RestoreError::SourceRead {
                position: 0,
                source,
            }),
        }
    }

    /// Bytes consumed from the decoded stream so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub fn is_subset(&self) -> bool {
        self.plugin.as_ref().is_some_and(PluginProcess::is_subset)
    }

    /// Trimmed plugin stderr, empty in local mode
    #[must_use]
    pub fn plugin_stderr(&self) -> String {
        self.plugin
            .as_ref()
            .map(|p| p.stderr().message())
            .unwrap_or_default()
    }

    /// Prefix `err` with whatever the plugin has written to stderr
    #[must_use]
    pub fn enrich(&self, err: RestoreError) -> RestoreError {
        err.with_plugin_stderr(&self.plugin_stderr())
    }

    /// Skip exactly `n` bytes. Running out of stream first is an error.
    pub async fn discard(&mut self, n: u64) -> Result<u64> {
        let mut discarded = 0u64;
        while discarded < n {
            let available = match self.reader.fill_buf().await {
                Ok(buf) => buf.len(),
                Err(source) => return Err(self.read_error(source)),
            };
            if available == 0 {
                return Err(self.read_error(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended after discarding {discarded} of {n} bytes"),
                )));
            }
            let step = available.min(usize::try_from(n - discarded).unwrap_or(usize::MAX));
            self.reader.consume(step);
            discarded += step as u64;
            self.position += step as u64;
        }
        Ok(discarded)
    }

    /// Copy exactly `n` bytes into `sink`.
    ///
    /// Only bytes the sink accepted are consumed, so on failure
    /// `position()` has advanced by exactly `PartialCopy::copied`.
    pub async fn copy_into<W>(&mut self, sink: &mut W, n: u64) -> std::result::Result<u64, PartialCopy>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut copied = 0u64;
        while copied < n {
            let buf = match self.reader.fill_buf().await {
                Ok(buf) => buf,
                Err(error) => return Err(PartialCopy { copied, error }),
            };
            if buf.is_empty() {
                return Err(PartialCopy {
                    copied,
                    error: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("stream ended after copying {copied} of {n} bytes"),
                    ),
                });
            }
            let want = buf.len().min(usize::try_from(n - copied).unwrap_or(usize::MAX));
            let written = match sink.write(&buf[..want]).await {
                Ok(0) => {
                    return Err(PartialCopy {
                        copied,
                        error: std::io::Error::from(std::io::ErrorKind::WriteZero),
                    });
                }
                Ok(written) => written,
                Err(error) => return Err(PartialCopy { copied, error }),
            };
            self.reader.consume(written);
            copied += written as u64;
            self.position += written as u64;
        }
        Ok(copied)
    }

    fn read_error(&self, source: std::io::Error) -> RestoreError {
        RestoreError::SourceRead {
            position: self.position,
            source,
        }
    }

    /// Drop the stream and reap the plugin. Unread trailing bytes are abandoned.
    pub async fn close(self) {
        let Self { reader, plugin, .. } = self;
        drop(reader);
        if let Some(plugin) = plugin {
            plugin.finish().await;
        }
    }
}
