// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Options for one segment restore, as handed down by the coordinator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Source data file, or the identifier the plugin resolves
    pub data_file: PathBuf,
    pub toc_file: PathBuf,
    pub oid_file: PathBuf,
    /// Prefix of every per-table pipe; the pipe for an oid is `{pipe_file}_{oid}`
    pub pipe_file: PathBuf,
    /// Greater than zero means the data stream is gzip encoded
    #[serde(default)]
    pub compression_level: i32,
    #[serde(default)]
    pub plugin_config_file: Option<PathBuf>,
    #[serde(default)]
    pub is_filter: bool,
    #[serde(default)]
    pub on_error_continue: bool,
    /// Segment content id, only used to label log output
    #[serde(default)]
    pub content: Option<i32>,
}

impl RestoreOptions {
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compression_level > 0
    }

    /// Plugin config path, treating an empty path the same as none
    #[must_use]
    pub fn plugin_config(&self) -> Option<&Path> {
        self.plugin_config_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Path of the named pipe for `oid`
    #[must_use]
    pub fn pipe_path(&self, oid: u32) -> PathBuf {
        pipe_path(&self.pipe_file, oid)
    }

    /// Marker file the coordinator checks to learn this segment failed
    #[must_use]
    pub fn error_marker_path(&self) -> PathBuf {
        let mut name = self.pipe_file.clone().into_os_string();
        name.push("_error");
        PathBuf::from(name)
    }
}

pub fn pipe_path(prefix: &Path, oid: u32) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!("_{oid}"));
    PathBuf::from(name)
}
