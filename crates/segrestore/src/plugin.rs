// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Storage plugin launcher
//!
//! A restore plugin is an opaque executable that writes the segment data
//! stream to stdout. Plugins that can skip server-side are handed an
//! offsets file listing every data range, and asked for just those bytes.

use crate::error::{RestoreError, Result};
use crate::options::RestoreOptions;
use crate::toc::SegmentToc;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Executables with this prefix understand `restore_data_subset`
pub const SUBSET_PLUGIN_PREFIX: &str = "gpbackup_ddboost_plugin";

/// Directory the offsets file is written to
pub const OFFSETS_DIR: &str = "/tmp";

/// Cap on retained plugin stderr
const MAX_STDERR_BYTES: usize = 64 * 1024;

const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const EXIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    #[serde(rename = "executablepath")]
    pub executable_path: String,
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml_ng::Value>,
    /// Path this config was read from; handed to the plugin
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl PluginConfig {
    pub fn from_yaml<P: AsRef<Path>>(text: &str, config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();
        let mut config: PluginConfig = serde_yaml_ng::from_str(text).map_err(|e| {
            RestoreError::config(format!(
                "Malformed plugin config {}: {e}",
                config_path.display()
            ))
        })?;
        config.executable_path = config.executable_path.trim().to_string();
        if config.executable_path.is_empty() {
            return Err(RestoreError::config(format!(
                "Plugin config {} has no executablepath",
                config_path.display()
            )));
        }
        config.config_path = config_path.to_path_buf();
        Ok(config)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            RestoreError::config(format!(
                "Failed to read plugin config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&text, path)
    }
}

/// Which plugin entry point to call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginInvocation {
    /// `restore_data`: the whole data file
    Full,
    /// `restore_data_subset`: only the ranges listed in `offsets_file`
    Subset { offsets_file: PathBuf },
}

impl PluginInvocation {
    #[must_use]
    pub fn select(config: &PluginConfig, options: &RestoreOptions) -> Self {
        if config.executable_path.starts_with(SUBSET_PLUGIN_PREFIX)
            && options.is_filter
            && options.is_compressed()
        {
            PluginInvocation::Subset {
                offsets_file: offsets_path(&options.data_file),
            }
        } else {
            PluginInvocation::Full
        }
    }

    /// Shell command line for this invocation
    #[must_use]
    pub fn command_line(&self, config: &PluginConfig, data_file: &Path) -> String {
        match self {
            PluginInvocation::Full => format!(
                "{} restore_data {} {}",
                config.executable_path,
                config.config_path.display(),
                data_file.display()
            ),
            PluginInvocation::Subset { offsets_file } => format!(
                "{} restore_data_subset {} {} {}",
                config.executable_path,
                config.config_path.display(),
                data_file.display(),
                offsets_file.display()
            ),
        }
    }
}

/// `/tmp/{basename(data_file)}`
#[must_use]
pub fn offsets_path(data_file: &Path) -> PathBuf {
    let name = data_file.file_name().unwrap_or(data_file.as_os_str());
    Path::new(OFFSETS_DIR).join(name)
}

/// Little-endian `(start, end)` u64 pairs for every data entry, in TOC order
#[must_use]
pub fn encode_offsets(toc: &SegmentToc) -> Vec<u8> {
    let mut buf = Vec::with_capacity(toc.len() * 16);
    for (_, entry) in toc.data_entries() {
        buf.extend_from_slice(&entry.start_byte.to_le_bytes());
        buf.extend_from_slice(&entry.end_byte.to_le_bytes());
    }
    buf
}

/// Write `contents` to `path` and leave it read-only
pub async fn write_offsets_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    // A previous run leaves a read-only file behind
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::write(path, contents).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o444)).await
}

/// Shared buffer the plugin's stderr is collected into
#[derive(Debug, Clone, Default)]
pub struct PluginStderr {
    buf: Arc<Mutex<Vec<u8>>>,
    appended: Arc<Notify>,
}

impl PluginStderr {
    pub fn append(&self, bytes: &[u8]) {
        {
            let mut buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let room = MAX_STDERR_BYTES.saturating_sub(buf.len());
            buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
        }
        self.appended.notify_waiters();
    }

    /// Resolves once [`PluginStderr::message`] is non-empty
    pub async fn spoken(&self) {
        loop {
            // Registered before the check so an append in between still wakes us
            let appended = self.appended.notified();
            if !self.message().is_empty() {
                return;
            }
            appended.await;
        }
    }

    /// Contents with NUL padding and trailing whitespace trimmed
    #[must_use]
    pub fn message(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf)
            .trim_matches('\0')
            .trim_end()
            .to_string()
    }

    fn capture(&self, mut stderr: ChildStderr) -> JoinHandle<()> {
        let sink = self.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink.append(&chunk[..n]),
                    Err(e) => {
                        let error = e.to_string();
                        diagnostics::log_warn!("Lost plugin stderr: {error}", error: error);
                        break;
                    }
                }
            }
        })
    }
}

/// A running plugin subprocess
pub struct PluginProcess {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: PluginStderr,
    drain: Option<JoinHandle<()>>,
    invocation: PluginInvocation,
}

impl PluginProcess {
    /// Start the plugin under `bash -c` without waiting for it
    pub async fn start(
        config: &PluginConfig,
        options: &RestoreOptions,
        toc: &SegmentToc,
    ) -> Result<Self> {
        let invocation = PluginInvocation::select(config, options);
        if let PluginInvocation::Subset { offsets_file } = &invocation {
            let offsets = encode_offsets(toc);
            write_offsets_file(offsets_file, &offsets).await.map_err(|e| {
                RestoreError::plugin_startup(format!(
                    "Failed to write offsets file {}: {e}",
                    offsets_file.display()
                ))
            })?;
            let file = offsets_file.display().to_string();
            let pairs = toc.len();
            diagnostics::log_debug!("Wrote {pairs} offset pairs to {file}", pairs: pairs, file: file);
        }

        let command_line = invocation.command_line(config, &options.data_file);
        let logged_command = command_line.clone();
        diagnostics::log_info!("Starting plugin: {command}", command: logged_command);

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own group, so anything the plugin forks can be killed with it
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RestoreError::plugin_startup(format!("Failed to start '{command_line}': {e}"))
            })?;

        let stderr = PluginStderr::default();
        let drain = child.stderr.take().map(|pipe| stderr.capture(pipe));
        let stdout = child.stdout.take();

        Ok(Self {
            child,
            stdout,
            stderr,
            drain,
            invocation,
        })
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.stdout
            .take()
            .ok_or_else(|| RestoreError::plugin_startup("Plugin stdout is not available"))
    }

    #[must_use]
    pub fn stderr(&self) -> &PluginStderr {
        &self.stderr
    }

    #[must_use]
    pub fn is_subset(&self) -> bool {
        matches!(self.invocation, PluginInvocation::Subset { .. })
    }

    /// Wait (bounded) until the plugin closes stderr
    pub async fn wait_for_stderr(&mut self) {
        if let Some(drain) = self.drain.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, drain).await.is_err() {
                diagnostics::log_warn!("Plugin stderr still open after stdout closed");
            }
        }
    }

    /// Reap the plugin after the stream has been dropped
    pub async fn finish(mut self) {
        drop(self.stdout.take());
        let status = match tokio::time::timeout(EXIT_TIMEOUT, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                diagnostics::log_warn!("Plugin did not exit; killing it");
                self.kill();
                self.child.wait().await
            }
        };
        self.wait_for_stderr().await;
        log_exit(status);
    }

    /// Kill the plugin without waiting for it to finish on its own, then reap it
    pub async fn abort(mut self) {
        drop(self.stdout.take());
        self.kill();
        let status = self.child.wait().await;
        self.wait_for_stderr().await;
        log_exit(status);
    }

    /// SIGKILL the plugin's whole process group
    fn kill(&mut self) {
        let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => {
                let error = errno.to_string();
                diagnostics::log_warn!("Failed to kill plugin: {error}", error: error);
                if let Err(e) = self.child.start_kill() {
                    let error = e.to_string();
                    diagnostics::log_warn!("Failed to kill plugin: {error}", error: error);
                }
            }
        }
    }
}

fn log_exit(status: std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => {
            diagnostics::log_debug!("Plugin exited cleanly");
        }
        Ok(status) => {
            let status = status.to_string();
            diagnostics::log_warn!("Plugin exited with {status}", status: status);
        }
        Err(e) => {
            let error = e.to_string();
            diagnostics::log_warn!("Failed to wait for plugin: {error}", error: error);
        }
    }
}
