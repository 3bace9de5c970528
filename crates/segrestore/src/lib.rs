// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Segment-local restore agent
//!
//! One agent runs per database segment during a parallel restore. It reads
//! the segment's backup data stream (a local file or a plugin's stdout,
//! optionally gzip encoded) and feeds each table's byte range into a named
//! pipe that the database loader is reading with `COPY FROM`.

mod agent;
mod error;
mod options;
mod pipe;
mod plugin;
mod schedule;
mod source;
mod toc;

pub use agent::{RestoreAgent, RestoreSummary, TableOutcome};
pub use error::{RestoreError, Result};
pub use options::{RestoreOptions, pipe_path};
pub use pipe::{PipeGuard, PipeWriter, create_pipe, remove_pipe};
pub use plugin::{
    OFFSETS_DIR, PluginConfig, PluginInvocation, PluginProcess, PluginStderr,
    SUBSET_PLUGIN_PREFIX, encode_offsets, offsets_path, write_offsets_file,
};
pub use schedule::OidSchedule;
pub use source::{PartialCopy, READ_BUFFER_SIZE, RestoreReader};
pub use toc::{SegmentDataEntry, SegmentToc};
pub use tokio_util::sync::CancellationToken;
