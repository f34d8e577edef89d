use anyhow::{Context, Result};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod codec;
mod config;
mod error;
mod routes;

use config::Config;
use routes::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "moodlensd starting");

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        model_dir = %config.model_dir.display(),
        layout = ?config.input_layout,
        "configuration loaded"
    );

    // ort session construction is blocking; keep it off the runtime threads.
    let model_dir = config.model_dir.clone();
    let layout = config.input_layout;
    let pipeline_config = config.pipeline.clone();
    let pipeline = tokio::task::spawn_blocking(move || {
        moodlens_core::load_pipeline(&model_dir, layout, pipeline_config)
    })
    .await?
    .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;

    let app = create_router(AppState::new(pipeline), config.max_body_bytes);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "moodlensd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("moodlensd shutting down");
    Ok(())
}

/// Human-readable output by default, JSON with `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
