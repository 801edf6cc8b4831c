// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use ask4me::config::{AskConfig, CliArgs};

#[tokio::main]
async fn main() {
    // reqwest is built against `rustls-no-provider`; the notifier's
    // push-gateway branch dials a real TLS endpoint, so a process-level
    // crypto provider must be installed before the first such call.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match AskConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = ask4me::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
