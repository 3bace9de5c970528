// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

// Error types for segment restore operations
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, RestoreError>;

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Plugin startup failed: {message}")]
    PluginStartup { message: String },

    #[error("Failed to manage pipe {}: {source}", .path.display())]
    PipeProvisioning {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open pipe {}: {source}", .path.display())]
    PipeOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Data reader error at byte {position}: {source}")]
    SourceRead {
        position: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to restore table with oid {oid} after {copied} bytes: {source}")]
    Copy {
        oid: u32,
        copied: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to close pipe for oid {oid}: {source}")]
    PipeClose {
        oid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Terminated due to user request")]
    Terminated,

    /// Any of the above, prefixed with what the plugin wrote to stderr
    #[error("{stderr}: {source}")]
    Plugin {
        stderr: String,
        #[source]
        source: Box<RestoreError>,
    },
}

impl RestoreError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        RestoreError::Config {
            message: message.into(),
        }
    }

    pub fn plugin_startup<S: Into<String>>(message: S) -> Self {
        RestoreError::PluginStartup {
            message: message.into(),
        }
    }

    pub fn pipe_provisioning<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        RestoreError::PipeProvisioning {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn pipe_open<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        RestoreError::PipeOpen {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Attach plugin stderr, minus NUL padding and trailing newlines; no-op when there is nothing to attach
    #[must_use]
    pub fn with_plugin_stderr(self, stderr: &str) -> Self {
        let stderr = stderr.trim_matches('\0').trim_end();
        if stderr.is_empty() {
            return self;
        }
        RestoreError::Plugin {
            stderr: stderr.to_string(),
            source: Box::new(self),
        }
    }

    /// The underlying error with any plugin stderr wrapper removed
    #[must_use]
    pub fn kind(&self) -> &RestoreError {
        match self {
            RestoreError::Plugin { source, .. } => source.kind(),
            other => other,
        }
    }

    /// Per-table failures that on-error-continue may skip past.
    /// Everything else means the stream or the filesystem can no longer be trusted.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            RestoreError::Copy { .. } | RestoreError::PipeClose { .. }
        )
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self.kind(), RestoreError::Terminated)
    }
}
