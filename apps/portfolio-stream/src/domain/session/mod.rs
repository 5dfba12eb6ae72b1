//! Session Identity and State Machine
//!
//! Pure types describing a client session: who it belongs to, which state it
//! is in, and what a control event does to that state.
//!
//! ```text
//!   Connected ──start──► Streaming ──stop──► Paused
//!                            ▲                  │
//!                            └──────start───────┘
//!
//!   any state ──disconnect──► Closed (terminal)
//! ```
//!
//! The state machine decides *what* happens ([`Effect`]); the session service
//! performs it (spawning or cancelling the push loop).

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

// =============================================================================
// Session Identifier
// =============================================================================

/// Opaque, unique session identifier assigned at connection time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Identity resolved once at handshake; immutable for the session lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// A user authenticated upstream.
    Authenticated(String),
    /// No authenticated user.
    Anonymous,
}

impl Identity {
    /// Label shown to clients and in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Authenticated(user) => user,
            Self::Anonymous => "anonymous",
        }
    }

    /// Check whether this is the anonymous identity.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Handshake done, no push loop yet.
    Connected,
    /// Push loop active.
    Streaming,
    /// Push loop stopped, session still open.
    Paused,
    /// Terminal.
    Closed,
}

/// Events that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Client asked to start streaming.
    Start,
    /// Client asked to stop streaming.
    Stop,
    /// Transport went away or the server is shutting down.
    Disconnect,
}

/// Side effect the session must perform for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Spawn a new push loop with a fresh cancel token.
    SpawnLoop,
    /// Cancel the current push loop.
    CancelLoop,
    /// Cancel any loop and tear the session down.
    Teardown,
    /// Nothing to do; the event was redundant.
    None,
    /// The session is closed; the event is dropped.
    Ignored,
}

/// Result of applying a [`ControlEvent`] to a [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State after the event.
    pub next: SessionState,
    /// Effect to perform.
    pub effect: Effect,
}

impl SessionState {
    /// Apply an event and return the resulting transition.
    #[must_use]
    pub const fn apply(self, event: ControlEvent) -> Transition {
        let (next, effect) = match (self, event) {
            (Self::Closed, _) => (Self::Closed, Effect::Ignored),
            (_, ControlEvent::Disconnect) => (Self::Closed, Effect::Teardown),
            (Self::Connected | Self::Paused, ControlEvent::Start) => {
                (Self::Streaming, Effect::SpawnLoop)
            }
            (Self::Streaming, ControlEvent::Start) => (Self::Streaming, Effect::None),
            (Self::Streaming, ControlEvent::Stop) => (Self::Paused, Effect::CancelLoop),
            (state @ (Self::Connected | Self::Paused), ControlEvent::Stop) => (state, Effect::None),
        };
        Transition { next, effect }
    }

    /// State name as used in logs and summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Streaming => "streaming",
            Self::Paused => "paused",
            Self::Closed => "closed",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Streaming => 1,
            Self::Paused => 2,
            Self::Closed => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connected,
            1 => Self::Streaming,
            2 => Self::Paused,
            _ => Self::Closed,
        }
    }
}

/// Lock-free published copy of a session's state, readable by the registry.
///
/// Only the owning session writes it.
#[derive(Debug)]
pub struct StateFlag(AtomicU8);

impl StateFlag {
    /// Create a flag holding `state`.
    #[must_use]
    pub const fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    /// Read the current state.
    #[must_use]
    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Publish a new state.
    pub fn store(&self, state: SessionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

// =============================================================================
// Close Reasons
// =============================================================================

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Client closed the connection.
    ClientDisconnected,
    /// A read or write on the transport failed.
    TransportFailed,
    /// Server shutdown broadcast.
    Shutdown,
}

impl CloseReason {
    /// Reason name for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnected => "client_disconnected",
            Self::TransportFailed => "transport_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
