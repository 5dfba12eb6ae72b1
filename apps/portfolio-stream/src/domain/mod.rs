//! Domain Layer - Core portfolio streaming types and business logic.
//!
//! This layer contains the snapshot model, the snapshot generator and the
//! session state machine. Nothing here performs I/O; randomness and time are
//! supplied by the caller.

/// Portfolio snapshots and the snapshot generator.
pub mod snapshot;

/// Session identity and the session state machine.
pub mod session;

/// Control and update messages exchanged with clients.
pub mod messages;
