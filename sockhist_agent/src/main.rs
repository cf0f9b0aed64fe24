//! sockhist_agent: samples this host every tick and serves history and live ticks over /ws.

use std::net::SocketAddr;

use anyhow::Context;
use axum::{routing::get, Router};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sockhist_agent::config::{archive_ticks, interval_ms, parse_port, DEFAULT_PORT};
use sockhist_agent::sampler::spawn_sampler;
use sockhist_agent::state::AppState;
use sockhist_agent::ws::ws_handler;

const USAGE: &str = "[--port PORT|-p PORT]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|a| a == "-h" || a == "--help") {
        println!("Usage: sockhist_agent {USAGE}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = parse_port(std::env::args(), DEFAULT_PORT);
    let hostname = hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned());

    let state = AppState::new(interval_ms(), archive_ticks(), hostname);
    if !state.supported {
        warn!("sysinfo does not support this platform; subscriptions will be refused");
    }
    let _sampler = spawn_sampler(state.clone());

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(interval_ms = interval_ms(), archive_ticks = archive_ticks(), "sockhist_agent listening on ws://{addr}/ws");
    axum::serve(listener, app).await.context("serving websocket")?;
    Ok(())
}
