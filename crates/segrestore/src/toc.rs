// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Segment table of contents
//!
//! The backup writes one TOC per segment. Restore only needs the data
//! entries: for each table oid, the half-open byte range its COPY payload
//! occupies in the (decompressed) data stream.

use crate::error::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Byte range `[start_byte, end_byte)` of one table in the data stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDataEntry {
    #[serde(rename = "startbyte")]
    pub start_byte: u64,
    #[serde(rename = "endbyte")]
    pub end_byte: u64,
}

impl SegmentDataEntry {
    #[must_use]
    pub fn new(start_byte: u64, end_byte: u64) -> Self {
        Self {
            start_byte,
            end_byte,
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start_byte == self.end_byte
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentToc {
    #[serde(rename = "dataentries", default)]
    data_entries: BTreeMap<u32, SegmentDataEntry>,
}

impl SegmentToc {
    /// Build from entries already in memory
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, SegmentDataEntry)>,
    {
        let toc = Self {
            data_entries: entries.into_iter().collect(),
        };
        toc.validate()?;
        Ok(toc)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let toc: SegmentToc = serde_yaml_ng::from_str(text)
            .map_err(|e| RestoreError::config(format!("Malformed TOC: {e}")))?;
        toc.validate()?;
        Ok(toc)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            RestoreError::config(format!("Failed to read TOC file {}: {e}", path.display()))
        })?;
        let toc = Self::from_yaml(&text)?;
        let path_display = path.display().to_string();
        let count = toc.data_entries.len();
        diagnostics::log_debug!("Loaded TOC {path} with {count} data entries", path: path_display, count: count);
        Ok(toc)
    }

    fn validate(&self) -> Result<()> {
        for (oid, entry) in &self.data_entries {
            if entry.start_byte > entry.end_byte {
                return Err(RestoreError::config(format!(
                    "TOC entry for oid {oid} starts at byte {} after its end byte {}",
                    entry.start_byte, entry.end_byte
                )));
            }
        }
        Ok(())
    }

    /// Byte range of `oid`; a missing entry is a configuration error
    pub fn lookup(&self, oid: u32) -> Result<SegmentDataEntry> {
        self.data_entries
            .get(&oid)
            .copied()
            .ok_or_else(|| RestoreError::config(format!("No TOC data entry for oid {oid}")))
    }

    #[must_use]
    pub fn contains(&self, oid: u32) -> bool {
        self.data_entries.contains_key(&oid)
    }

    /// All data entries in ascending oid order
    pub fn data_entries(&self) -> impl Iterator<Item = (u32, SegmentDataEntry)> + '_ {
        self.data_entries.iter().map(|(oid, entry)| (*oid, *entry))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data_entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_entries.is_empty()
    }
}
