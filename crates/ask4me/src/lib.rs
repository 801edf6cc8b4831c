// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ask4me: a human-in-the-loop rendezvous service. A programmatic caller
//! submits a question over `/v1/ask`, a human answers it on a
//! token-gated page delivered by an out-of-band notification channel,
//! and the original call returns that answer synchronously.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod hub;
pub mod ids;
pub mod mcd;
pub mod notifier;
pub mod state;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AskConfig;
use crate::hub::Hub;
use crate::state::AppState;
use crate::store::Store;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Spec §4.F caps the `/v1/ask` POST body at 1 MiB.
const ASK_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Build the axum `Router` with every route from spec §4.F wired up.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/ask", get(api::ask::ask_get).post(api::ask::ask_post))
        .route_layer(axum::extract::DefaultBodyLimit::max(ASK_BODY_LIMIT_BYTES))
        .route("/r/{request_id}/", get(api::page::show_page))
        .route("/r/{request_id}/submit", post(api::page::submit_page))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server until shutdown: open the store, start the hub sweeper,
/// bind the listener, and serve `build_router`'s routes until ctrl-c.
pub async fn run(config: AskConfig) -> anyhow::Result<()> {
    let store = Store::connect(&config.sqlite_path).await?;
    let hub = Hub::new(config.terminal_cache_ttl());
    let config = Arc::new(config);
    let shutdown = CancellationToken::new();

    spawn_sweeper(hub.clone(), shutdown.clone());

    let state = AppState { store, hub, config: Arc::clone(&config) };
    let router = build_router(state);

    let addr = config.bind_addr();
    tracing::info!(addr = %addr, "ask4me listening");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown)).await?;

    Ok(())
}

/// Wait for ctrl-c, then cancel `shutdown` so background tasks (the
/// sweeper) and the axum server both unwind together.
async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}

/// Periodically evict expired terminal-cache entries (spec §4.C, §5).
/// Never required for correctness — `Hub::get_terminal` already discards
/// stale entries on lookup — only for bounding memory on a server that
/// runs for a long time without every request being re-queried.
fn spawn_sweeper(hub: Hub, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => hub.sweep_expired().await,
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
