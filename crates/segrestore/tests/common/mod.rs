// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: a segment on disk and a stand-in for the database loader

#![allow(dead_code)]

use segrestore::{CancellationToken, RestoreAgent, RestoreOptions, RestoreSummary, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const SEGMENT: &[u8] = b"AAAAA.....BBBBB.....CCCCC.....";

pub const AGENT_TIMEOUT: Duration = Duration::from_secs(30);
const PIPE_WAIT: Duration = Duration::from_secs(20);

/// Data file, TOC and oid list for one segment, in a temp dir
pub struct Segment {
    pub dir: TempDir,
    pub options: RestoreOptions,
}

impl Segment {
    pub fn new(data: &[u8], toc: &[(u32, u64, u64)], oids: &[u32]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_file = dir.path().join("gpbackup_0_20250101120000_3");
        let toc_file = dir.path().join("gpbackup_0_20250101120000_toc.yaml");
        let oid_file = dir.path().join("gpbackup_0_20250101120000_oid");

        std::fs::write(&data_file, data).expect("write data");

        let mut yaml = String::from(if toc.is_empty() {
            "dataentries: {}\n"
        } else {
            "dataentries:\n"
        });
        for (oid, start, end) in toc {
            yaml.push_str(&format!("  {oid}:\n    startbyte: {start}\n    endbyte: {end}\n"));
        }
        std::fs::write(&toc_file, yaml).expect("write toc");

        let list: Vec<String> = oids.iter().map(u32::to_string).collect();
        std::fs::write(&oid_file, list.join("\n")).expect("write oids");

        let options = RestoreOptions {
            data_file,
            toc_file,
            oid_file,
            pipe_file: dir.path().join("gpbackup_0_20250101120000_pipe"),
            ..Default::default()
        };
        Self { dir, options }
    }

    /// The three-table segment from the happy path
    pub fn three_tables() -> Self {
        Self::new(SEGMENT, &[(10, 0, 5), (20, 10, 15), (30, 20, 25)], &[10, 20, 30])
    }

    pub fn pipe(&self, oid: u32) -> PathBuf {
        self.options.pipe_path(oid)
    }

    /// What the coordinator does before starting the agent
    pub fn create_first_pipe(&self, oid: u32) {
        segrestore::create_pipe(&self.pipe(oid)).expect("create first pipe");
    }

    /// Any pipe with this segment's prefix still on disk
    pub fn leftover_pipes(&self) -> Vec<PathBuf> {
        let prefix = self
            .options
            .pipe_file
            .file_name()
            .expect("prefix")
            .to_string_lossy()
            .to_string();
        std::fs::read_dir(self.dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
            })
            .collect()
    }

    pub async fn agent(&self, cancel: CancellationToken) -> RestoreAgent {
        RestoreAgent::load(self.options.clone(), cancel)
            .await
            .expect("agent loads")
    }
}

pub async fn run_agent(agent: &RestoreAgent) -> Result<RestoreSummary> {
    tokio::time::timeout(AGENT_TIMEOUT, agent.run())
        .await
        .expect("agent finished in time")
}

/// How the loader consumes one table's pipe
#[derive(Debug, Clone, Copy)]
pub enum Serve {
    /// Read to end of file, like a COPY that succeeds
    All,
    /// Read this many bytes and hang up, like a COPY that errors out
    FirstBytes(usize),
}

#[derive(Debug, Default)]
pub struct LoaderReport {
    pub received: Vec<(u32, Vec<u8>)>,
    /// For each fully read table: whether the following table's pipe was
    /// already on disk when this one hit end of file
    pub next_pipe_ready: Vec<(u32, bool)>,
}

impl LoaderReport {
    pub fn bytes_for(&self, oid: u32) -> &[u8] {
        self.received
            .iter()
            .find(|(o, _)| *o == oid)
            .map(|(_, b)| b.as_slice())
            .unwrap_or_default()
    }

    pub fn concatenated(&self) -> Vec<u8> {
        self.received.iter().flat_map(|(_, b)| b.clone()).collect()
    }
}

pub struct Loader {
    handle: JoinHandle<LoaderReport>,
}

impl Loader {
    /// Serve `plan` in order, the way the coordinator's COPY statements
    /// open each table's pipe. `schedule` is the agent's full oid order.
    pub fn spawn(prefix: &Path, schedule: &[u32], plan: Vec<(u32, Serve)>) -> Self {
        let prefix = prefix.to_path_buf();
        let schedule = schedule.to_vec();
        let handle = std::thread::spawn(move || {
            let mut report = LoaderReport::default();
            for (oid, serve) in plan {
                let path = segrestore::pipe_path(&prefix, oid);
                wait_for(&path);
                let mut file = std::fs::File::open(&path).expect("open read end");
                let mut bytes = Vec::new();
                match serve {
                    Serve::All => {
                        let _ = file.read_to_end(&mut bytes).expect("read");
                        let next = schedule
                            .iter()
                            .position(|o| *o == oid)
                            .and_then(|i| schedule.get(i + 1));
                        if let Some(next) = next {
                            let ready = segrestore::pipe_path(&prefix, *next).exists();
                            report.next_pipe_ready.push((oid, ready));
                        }
                    }
                    Serve::FirstBytes(n) => {
                        bytes.resize(n, 0);
                        file.read_exact(&mut bytes).expect("read prefix");
                    }
                }
                drop(file);
                report.received.push((oid, bytes));
            }
            report
        });
        Self { handle }
    }

    pub async fn finish(self) -> LoaderReport {
        tokio::task::spawn_blocking(move || self.handle.join().expect("loader thread"))
            .await
            .expect("join")
    }
}

pub fn wait_for(path: &Path) {
    let deadline = Instant::now() + PIPE_WAIT;
    while !path.exists() {
        assert!(Instant::now() < deadline, "{} never appeared", path.display());
        std::thread::sleep(Duration::from_millis(5));
    }
}
