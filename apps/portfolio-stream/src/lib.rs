#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Portfolio Stream - Live Portfolio Updates over WebSocket
//!
//! Pushes periodic portfolio snapshots to each connected client. Every
//! connection gets its own session with an independently cancellable push
//! loop, driven by `start_updates` / `stop_updates` / `get_portfolio_data`
//! control messages.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and logic
//!   - `snapshot`: Snapshot model and generator
//!   - `session`: Session identity and state machine
//!   - `messages`: Control and update messages
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Identity resolution, portfolio data lookup
//!   - `services`: Stream sessions, session registry
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `protocol`: JSON codec
//!   - `websocket`: axum WebSocket server
//!   - `identity`, `portfolio`: Port adapters
//!   - `config`, `health`, `metrics`, `telemetry`: Operational plumbing
//!
//! # Data Flow
//!
//! ```text
//! client ──WS──► reader task ──decode──► StreamSession ──► push loop
//!   ▲                                        │                │
//!   │                                   SessionRegistry  SnapshotGenerator
//!   │                                                         │
//!   └──WS── writer task ◄── bounded mpsc ◄────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::messages::{ControlMessage, OutboundMessage};
pub use domain::session::{CloseReason, Identity, SessionId, SessionState};
pub use domain::snapshot::{Holding, PortfolioHoldings, PositionSeed, Snapshot, SnapshotGenerator};

// Application
pub use application::ports::{
    AnonymousIdentityResolver, Handshake, IdentityResolver, InMemoryPortfolioData,
    NoPortfolioData, PortfolioDataError, PortfolioDataPort,
};
pub use application::services::{
    RegistryStats, SessionConfig, SessionError, SessionRegistry, SessionSummary, StreamContext,
    StreamSession,
};

// Infrastructure config
pub use infrastructure::config::{
    AuthSettings, ConfigError, ServerSettings, StreamConfig, StreamSettings,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::websocket::{StreamServer, StreamServerError, StreamServerState};

// Adapters
pub use infrastructure::identity::TrustedHeaderIdentityResolver;
pub use infrastructure::portfolio::FilePortfolioData;
pub use infrastructure::protocol::{CodecError, ProtocolCodec};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
