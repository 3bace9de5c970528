// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use cmd::Cli;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    diagnostics::init();

    let cli = Cli::parse();
    let options = cli.options();

    let content = options.content.unwrap_or(-1);
    let data_file = options.data_file.display().to_string();
    diagnostics::log_info!("Starting restore agent for segment {content}, data file {data_file}",
        content: content, data_file: data_file);

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));

    let status = cmd::run(options, cancel).await;
    watcher.abort();
    status.exit_code()
}

/// Cancel `cancel` on SIGINT or SIGTERM. The restore loop notices at the
/// next table boundary.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            let error = e.to_string();
            diagnostics::log_warn!("Failed to install Ctrl+C handler: {error}", error: error);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                let error = e.to_string();
                diagnostics::log_warn!("Failed to install SIGTERM handler: {error}", error: error);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    diagnostics::log_warn!("Received termination signal");
    cancel.cancel();
}
