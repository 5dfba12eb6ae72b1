//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the transport and operational
//! plumbing around them.

/// JSON codec for the control/update message set.
pub mod protocol;

/// axum WebSocket server for the portfolio channel.
pub mod websocket;

/// Trusted-header identity resolver.
pub mod identity;

/// File-backed portfolio holdings.
pub mod portfolio;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry integration.
pub mod telemetry;
