//! Session Registry
//!
//! Tracks live sessions for introspection and shutdown. The registry is not a
//! message bus: it never writes to clients and never drives a session's state
//! machine, except for the shutdown broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::domain::session::{SessionId, SessionState, StateFlag};
use crate::infrastructure::metrics;

/// Registry entry for one session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    user: String,
    connected_at: DateTime<Utc>,
    state: Arc<StateFlag>,
    lifetime: CancellationToken,
}

impl SessionHandle {
    /// Create a handle.
    #[must_use]
    pub const fn new(
        id: SessionId,
        user: String,
        connected_at: DateTime<Utc>,
        state: Arc<StateFlag>,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            id,
            user,
            connected_at,
            state,
            lifetime,
        }
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Copy of the externally visible session fields.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            user: self.user.clone(),
            state: self.state.load(),
            connected_at: self.connected_at,
        }
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session id.
    pub session_id: SessionId,
    /// Identity label.
    pub user: String,
    /// State at the time of the call.
    pub state: SessionState,
    /// Handshake time.
    pub connected_at: DateTime<Utc>,
}

/// Session counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// All registered sessions.
    pub total: usize,
    /// Sessions that have not started streaming.
    pub connected: usize,
    /// Sessions with an active push loop.
    pub streaming: usize,
    /// Sessions with a stopped push loop.
    pub paused: usize,
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    shutdown: CancellationToken,
    drained: Notify,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime token for a new session.
    ///
    /// The token is cancelled by [`shutdown_all`](Self::shutdown_all), and is
    /// born cancelled once shutdown has begun.
    #[must_use]
    pub fn session_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Add a session.
    ///
    /// A handle with an id already present replaces the old entry.
    pub fn register(&self, handle: SessionHandle) {
        let count = {
            let mut sessions = self.sessions.write();
            sessions.insert(handle.id.clone(), handle);
            sessions.len()
        };
        metrics::set_sessions_active(count);
    }

    /// Remove a session. Returns `true` if it was registered.
    pub fn deregister(&self, id: &SessionId) -> bool {
        let (removed, count) = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(id).is_some();
            (removed, sessions.len())
        };

        if removed {
            metrics::set_sessions_active(count);
            if count == 0 {
                self.drained.notify_waiters();
            }
        }
        removed
    }

    /// Summaries of all registered sessions, oldest first.
    #[must_use]
    pub fn list_active(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .values()
            .map(SessionHandle::summary)
            .collect();
        summaries.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        summaries
    }

    /// Look up one session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<SessionSummary> {
        self.sessions.read().get(id).map(SessionHandle::summary)
    }

    /// Count sessions by state.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.read();
        let mut stats = RegistryStats {
            total: sessions.len(),
            ..RegistryStats::default()
        };
        for handle in sessions.values() {
            match handle.state.load() {
                SessionState::Connected => stats.connected += 1,
                SessionState::Streaming => stats.streaming += 1,
                SessionState::Paused => stats.paused += 1,
                SessionState::Closed => {}
            }
        }
        stats
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Check if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Check if [`shutdown_all`](Self::shutdown_all) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every session's lifetime token. Sessions close themselves.
    ///
    /// Returns the number of sessions signalled.
    pub fn shutdown_all(&self) -> usize {
        self.shutdown.cancel();
        let sessions = self.sessions.read();
        for handle in sessions.values() {
            handle.lifetime.cancel();
        }
        tracing::info!(sessions = sessions.len(), "Shutdown broadcast to sessions");
        sessions.len()
    }

    /// Wait until every session has deregistered or `timeout` elapses.
    ///
    /// Returns `true` if the registry drained.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let drained = self.drained.notified();
            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                return self.is_empty();
            }
        }
    }
}
