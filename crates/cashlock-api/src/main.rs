//! # cashlock-api server
//!
//! Reads settings from the environment, loads the engine configuration,
//! connects to PostgreSQL when `DATABASE_URL` is set, restores state, and
//! serves the API.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use cashlock_api::config::LogFormat;
use cashlock_api::{app, db, AppConfig, AppState, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid environment")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let engine = EngineConfig::for_app(&config).context("failed to load engine configuration")?;
    let pool = db::init_pool(config.database_url.as_deref())
        .await
        .context("failed to initialize database")?;
    let port = config.port;
    let state = AppState::with_config(config, engine, pool).context("invalid signing key")?;
    tracing::info!(
        key_source = ?state.signer.source(),
        public_key = %state.signer.public_key().to_hex(),
        "certification signer ready"
    );
    state.hydrate().await.context("failed to restore state")?;

    // Install the recorder before the first request records anything.
    let _ = cashlock_api::middleware::metrics::prometheus_handle();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!(port, "cashlock-api listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
    tracing::info!("shutting down");
}
