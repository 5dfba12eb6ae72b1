//! Portfolio Stream Binary
//!
//! Starts the WebSocket portfolio stream and its health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin portfolio-stream
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//!
//! - `STREAM_HOST`: Bind address (default: 0.0.0.0)
//! - `STREAM_PORT`: WebSocket port (default: 8000)
//! - `STREAM_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `STREAM_WS_PATH`: WebSocket route (default: /ws/portfolio/)
//! - `STREAM_TICK_INTERVAL_MS`: Push interval (default: 5000)
//! - `STREAM_PROVIDER_TIMEOUT_MS`: Portfolio data timeout (default: 2000)
//! - `STREAM_OUTBOUND_CAPACITY`: Per-connection queue size (default: 64)
//! - `STREAM_MAX_MOVE_PERCENT`: Max per-tick price move (default: 2)
//! - `STREAM_DEFAULT_PORTFOLIO`: Streamed portfolio id (default: default)
//! - `STREAM_AUTO_START`: Stream right after connect (default: false)
//! - `STREAM_SHUTDOWN_TIMEOUT_SECS`: Session drain timeout (default: 30)
//! - `STREAM_TRUSTED_USER_HEADER`: Identity header (default: x-authenticated-user)
//! - `STREAM_ALLOW_ANONYMOUS`: Accept anonymous clients (default: true)
//! - `STREAM_PORTFOLIO_FILE`: JSON holdings fixture (default: unset)
//! - `STREAM_RNG_SEED`: Seed for reproducible price moves (default: unset)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: portfolio-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use portfolio_stream::application::ports::{NoPortfolioData, PortfolioDataPort};
use portfolio_stream::application::services::{SessionRegistry, StreamContext};
use portfolio_stream::infrastructure::health::{HealthServer, HealthServerState};
use portfolio_stream::infrastructure::identity::TrustedHeaderIdentityResolver;
use portfolio_stream::infrastructure::portfolio::FilePortfolioData;
use portfolio_stream::infrastructure::telemetry;
use portfolio_stream::infrastructure::websocket::{StreamServer, StreamServerState};
use portfolio_stream::{SnapshotGenerator, StreamConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Portfolio Stream");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = StreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let registry = Arc::new(SessionRegistry::new());

    let portfolio_data: Arc<dyn PortfolioDataPort> = match &config.portfolio_file {
        Some(path) => Arc::new(
            FilePortfolioData::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
        ),
        None => Arc::new(NoPortfolioData),
    };

    let context = Arc::new(StreamContext::new(
        config.stream.session_config(),
        SnapshotGenerator::new(config.stream.max_move_percent),
        portfolio_data,
        Arc::clone(&registry),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
    ));
    let health_server = HealthServer::new(
        config.server.health_addr(),
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // WebSocket server
    let stream_state = Arc::new(StreamServerState::new(
        context,
        Arc::new(TrustedHeaderIdentityResolver::new()),
        config.auth.clone(),
        config.stream.outbound_capacity,
    ));
    let stream_server = StreamServer::new(
        config.server.stream_addr(),
        config.server.ws_path.clone(),
        stream_state,
        shutdown_token.clone(),
    );
    let stream_task = tokio::spawn(async move {
        if let Err(e) = stream_server.run().await {
            tracing::error!(error = %e, "WebSocket server error");
        }
    });

    tracing::info!("Portfolio stream ready");

    await_shutdown().await;

    let signalled = registry.shutdown_all();
    tracing::info!(
        sessions = signalled,
        timeout_secs = config.shutdown_timeout.as_secs(),
        "Graceful shutdown started"
    );

    if !registry.wait_until_empty(config.shutdown_timeout).await {
        tracing::warn!(
            remaining = registry.len(),
            "Sessions still open after shutdown timeout"
        );
    }

    shutdown_token.cancel();
    let _ = stream_task.await;

    tracing::info!("Portfolio stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        stream_addr = %config.server.stream_addr(),
        health_addr = %config.server.health_addr(),
        ws_path = %config.server.ws_path,
        tick_interval_ms = u64::try_from(config.stream.tick_interval.as_millis()).unwrap_or(u64::MAX),
        default_portfolio = %config.stream.default_portfolio,
        auto_start = config.stream.auto_start,
        allow_anonymous = config.auth.allow_anonymous,
        "Configuration loaded"
    );
    tracing::debug!(
        provider_timeout = ?config.stream.provider_timeout,
        outbound_capacity = config.stream.outbound_capacity,
        max_move_percent = config.stream.max_move_percent,
        trusted_user_header = %config.auth.trusted_user_header,
        portfolio_file = ?config.portfolio_file,
        seeded = config.stream.rng_seed.is_some(),
        "Stream settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
