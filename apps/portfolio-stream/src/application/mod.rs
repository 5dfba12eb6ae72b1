//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the connection session service and the port
//! interfaces through which it reaches external collaborators.

/// Port interfaces for external systems (identity, portfolio data).
pub mod ports;

/// Application services (connection sessions, session registry).
pub mod services;
