//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session introspection, and Prometheus
//! metrics. Used by container orchestrators, load balancers, and monitoring
//! systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (fails once shutdown begins)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /sessions` - Active session summaries

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{RegistryStats, SessionRegistry, SessionSummary};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Session counts by state.
    pub sessions: RegistryStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting connections.
    Healthy,
    /// Shutting down; existing sessions are draining.
    Draining,
}

/// Active session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionsResponse {
    /// Number of sessions listed.
    pub count: usize,
    /// Session summaries, oldest first.
    pub sessions: Vec<SessionSummary>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<SessionRegistry>,
    metrics: Option<PrometheusHandle>,
}

impl HealthServerState {
    /// Create new health server state rendering the global metrics recorder.
    #[must_use]
    pub fn new(version: String, registry: Arc<SessionRegistry>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            metrics: None,
        }
    }

    /// Render metrics from `handle` instead of the global recorder.
    #[must_use]
    pub fn with_metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn metrics_handle(&self) -> Option<PrometheusHandle> {
        self.metrics.clone().or_else(get_metrics_handle)
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(
        addr: SocketAddr,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.addr, e.to_string()))?;

        tracing::info!(addr = %self.addr, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/sessions", get(sessions_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(build_health_response(&state)))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.registry.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    state.metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn sessions_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let sessions = state.registry.list_active();
    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let status = if state.registry.is_shutting_down() {
        HealthStatus::Draining
    } else {
        HealthStatus::Healthy
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        sessions: state.registry.stats(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
