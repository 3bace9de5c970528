// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Named pipes between this agent and the database loader
//!
//! The agent creates each pipe, opens its write end, and unlinks it. The
//! loader opens the read end. Opening either end blocks until the other
//! side arrives, which is the handshake that sequences tables.

use crate::error::{RestoreError, Result};
use nix::sys::stat::Mode;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Write buffer in front of each pipe
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

/// Create a FIFO at `path`, readable and writable by the owner only.
/// An existing file at `path` is an error.
pub fn create_pipe(path: &Path) -> Result<()> {
    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
        .map_err(|errno| RestoreError::pipe_provisioning(path, std::io::Error::from(errno)))
}

/// Unlink `path`; already gone is fine
pub async fn remove_pipe(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Owns a pipe path and unlinks it when the owner is done with it.
///
/// [`PipeGuard::remove`] reports failures; dropping the guard without
/// calling it still unlinks, so early returns never leave a FIFO behind.
#[derive(Debug)]
pub struct PipeGuard {
    path: Option<PathBuf>,
}

impl PipeGuard {
    /// Take ownership of a pipe someone else created
    #[must_use]
    pub fn adopt(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn create(path: PathBuf) -> Result<Self> {
        create_pipe(&path)?;
        Ok(Self::adopt(path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    pub async fn remove(mut self) -> Result<()> {
        match self.path.take() {
            Some(path) => remove_pipe(&path)
                .await
                .map_err(|e| RestoreError::pipe_provisioning(&path, e)),
            None => Ok(()),
        }
    }
}

impl Drop for PipeGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    let pipe = path.display().to_string();
                    let error = e.to_string();
                    diagnostics::log_warn!("Failed to remove pipe {pipe}: {error}", pipe: pipe, error: error);
                }
            }
        }
    }
}

/// Buffered write end of one table's pipe
pub struct PipeWriter {
    writer: BufWriter<File>,
}

impl PipeWriter {
    /// Open an existing pipe for writing. Blocks until the loader opens
    /// the read end; never creates the file.
    pub async fn open(path: &Path) -> Result<Self> {
        let owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new().write(true).open(&owned)
        })
        .await
        .map_err(|e| RestoreError::pipe_open(path, std::io::Error::other(e)))?
        .map_err(|e| RestoreError::pipe_open(path, e))?;

        Ok(Self {
            writer: BufWriter::with_capacity(PIPE_BUFFER_SIZE, File::from_std(file)),
        })
    }

    pub fn writer(&mut self) -> &mut BufWriter<File> {
        &mut self.writer
    }

    /// Flush buffered bytes, then close the handle. The close happens even
    /// when the flush fails; the flush error is what gets reported.
    pub async fn flush_and_close(mut self) -> std::io::Result<()> {
        let flushed = self.writer.flush().await;
        // into_std waits for any write still in flight
        let file = self.writer.into_inner().into_std().await;
        drop(file);
        flushed
    }
}
