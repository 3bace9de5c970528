// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Logging for the segment restore helper
//!
//! The helper runs as a child of the coordinating restore process, so its
//! events go to stderr where the coordinator collects them.
//!
//! Usage:
//! - Set SEGRESTORE_LOG=off (default) - no logs
//! - Set SEGRESTORE_LOG=info - per-table restore progress
//! - Set SEGRESTORE_LOG=debug - reader positions and plugin details

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable that selects the minimum level
pub const LOG_ENV: &str = "SEGRESTORE_LOG";

static INIT: Once = Once::new();

fn level_from_str(value: &str) -> Option<Option<emit::Level>> {
    match value {
        "off" => Some(None),
        "debug" => Some(Some(emit::Level::Debug)),
        "info" => Some(Some(emit::Level::Info)),
        "warn" => Some(Some(emit::Level::Warn)),
        "error" => Some(Some(emit::Level::Error)),
        _ => None,
    }
}

/// Initialize diagnostics based on the SEGRESTORE_LOG environment variable
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());

        let (min_level, unknown) = match level_from_str(&log_level) {
            Some(None) => return,
            Some(Some(level)) => (level, false),
            None => (emit::Level::Info, true),
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(min_level))
            .init();

        if unknown {
            emit::warn!("Unknown {env} value '{value}', using 'info'", env: LOG_ENV, value: log_level);
        }

        // The runtime must outlive every emitting thread
        std::mem::forget(rt);
    });
}

/// Log restore progress (pipes opened, tables copied, pipes removed)
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (reader positions, plugin command lines)
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log conditions worth noting that do not stop the restore
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log table failures and fatal errors
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
