// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Ordered list of table oids this segment restores.
//!
//! The coordinator issues COPY statements in the same order, so the
//! schedule fixes both the pipe names and the order byte ranges are read.

use crate::error::{RestoreError, Result};
use crate::toc::SegmentToc;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OidSchedule {
    oids: Vec<u32>,
}

impl OidSchedule {
    pub fn new(oids: Vec<u32>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(oids.len());
        for oid in &oids {
            if !seen.insert(*oid) {
                return Err(RestoreError::config(format!(
                    "Oid {oid} appears more than once in the oid list"
                )));
            }
        }
        Ok(Self { oids })
    }

    /// One decimal oid per line; blank lines are skipped
    pub fn parse(text: &str) -> Result<Self> {
        let mut oids = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let oid = line.parse::<u32>().map_err(|e| {
                RestoreError::config(format!(
                    "Invalid oid '{line}' on line {} of oid list: {e}",
                    lineno + 1
                ))
            })?;
            oids.push(oid);
        }
        Self::new(oids)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            RestoreError::config(format!("Failed to read oid list {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Every scheduled oid must have a data entry
    pub fn check_against(&self, toc: &SegmentToc) -> Result<()> {
        match self.oids.iter().find(|oid| !toc.contains(**oid)) {
            Some(oid) => Err(RestoreError::config(format!(
                "No TOC data entry for scheduled oid {oid}"
            ))),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn oids(&self) -> &[u32] {
        &self.oids
    }

    #[must_use]
    pub fn first(&self) -> Option<u32> {
        self.oids.first().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.oids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.oids.is_empty()
    }
}
