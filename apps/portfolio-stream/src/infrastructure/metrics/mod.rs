//! Prometheus Metrics Module
//!
//! Exposes stream metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Active session gauge, opened/closed counters by reason
//! - **Messages**: Outbound messages by type, protocol errors by kind
//! - **Data**: Portfolio data fallbacks and snapshot generation latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

const SESSIONS_ACTIVE: &str = "portfolio_stream_sessions_active";
const SESSIONS_OPENED: &str = "portfolio_stream_sessions_opened_total";
const SESSIONS_CLOSED: &str = "portfolio_stream_sessions_closed_total";
const MESSAGES_SENT: &str = "portfolio_stream_messages_sent_total";
const PROTOCOL_ERRORS: &str = "portfolio_stream_protocol_errors_total";
const PROVIDER_FALLBACKS: &str = "portfolio_stream_provider_fallbacks_total";
const SNAPSHOT_GENERATION: &str = "portfolio_stream_snapshot_generation_seconds";

fn register_metrics() {
    describe_gauge!(SESSIONS_ACTIVE, "Number of open client sessions");
    describe_counter!(SESSIONS_OPENED, "Total client sessions opened");
    describe_counter!(SESSIONS_CLOSED, "Total client sessions closed by reason");

    describe_counter!(MESSAGES_SENT, "Total messages written to clients by type");
    describe_counter!(
        PROTOCOL_ERRORS,
        "Total malformed or unsupported client frames by kind"
    );

    describe_counter!(
        PROVIDER_FALLBACKS,
        "Total snapshots seeded with synthetic data because portfolio data was unavailable"
    );
    describe_histogram!(SNAPSHOT_GENERATION, "Time to produce one snapshot");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why real portfolio data was not used for a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The data port returned an error.
    Error,
    /// The data port did not answer in time.
    Timeout,
}

impl FallbackReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// Record a newly opened session.
pub fn record_session_opened() {
    counter!(SESSIONS_OPENED).increment(1);
}

/// Record a closed session.
pub fn record_session_closed(reason: &'static str) {
    counter!(SESSIONS_CLOSED, "reason" => reason).increment(1);
}

/// Update the active session gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_sessions_active(count: usize) {
    gauge!(SESSIONS_ACTIVE).set(count as f64);
}

/// Record a message written to a client.
pub fn record_message_sent(message_type: &'static str) {
    counter!(MESSAGES_SENT, "message_type" => message_type).increment(1);
}

/// Record a rejected client frame.
pub fn record_protocol_error(kind: &'static str) {
    counter!(PROTOCOL_ERRORS, "kind" => kind).increment(1);
}

/// Record a synthetic fallback for a portfolio baseline.
pub fn record_provider_fallback(reason: FallbackReason) {
    counter!(PROVIDER_FALLBACKS, "reason" => reason.as_str()).increment(1);
}

/// Record snapshot generation duration.
pub fn record_snapshot_generation(duration: Duration) {
    histogram!(SNAPSHOT_GENERATION).record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
