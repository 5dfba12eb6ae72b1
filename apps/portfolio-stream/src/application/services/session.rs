//! Stream Session Service
//!
//! One [`StreamSession`] per connected client. It owns the client's state
//! machine, its cancellable push loop, its previous snapshots and its
//! randomness source. The transport feeds it decoded control messages and
//! drains its outbound queue.
//!
//! # Locking
//!
//! - `control` (`parking_lot::Mutex`): state + loop token. Never held across
//!   an `.await`.
//! - `book` (`tokio::sync::Mutex`): previous snapshots, RNG and last push
//!   time. Held across a generate-push-record cycle so snapshots reach the
//!   client in generation order and deltas are always relative to what the
//!   client last received.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::registry::{SessionHandle, SessionRegistry, SessionSummary};
use crate::application::ports::PortfolioDataPort;
use crate::domain::messages::{ControlMessage, OutboundMessage};
use crate::domain::session::{
    CloseReason, ControlEvent, Effect, Identity, SessionId, SessionState, StateFlag,
};
use crate::domain::snapshot::{
    DEFAULT_PORTFOLIO_ID, PortfolioHoldings, Snapshot, SnapshotGenerator,
};
use crate::infrastructure::metrics::{self, FallbackReason};

/// Notice queued to clients when the server shuts down.
pub const SHUTDOWN_NOTICE: &str = "server is shutting down";

// =============================================================================
// Configuration
// =============================================================================

/// Per-session behaviour shared by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Push loop interval.
    pub tick_interval: Duration,
    /// Upper bound on a portfolio data lookup.
    pub provider_timeout: Duration,
    /// Portfolio streamed by the push loop and used for bare snapshot requests.
    pub default_portfolio: String,
    /// Start streaming right after the greeting.
    pub auto_start: bool,
    /// Base seed for deterministic session RNGs; OS entropy when `None`.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            provider_timeout: Duration::from_secs(2),
            default_portfolio: DEFAULT_PORTFOLIO_ID.to_string(),
            auto_start: false,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    /// Effective provider deadline: never longer than one tick.
    #[must_use]
    pub fn provider_deadline(&self) -> Duration {
        self.provider_timeout.min(self.tick_interval)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session already closed.
    #[error("session {0} is closed")]
    Closed(SessionId),

    /// The transport stopped draining the outbound queue.
    #[error("outbound channel closed for session {0}")]
    OutboundClosed(SessionId),
}

// =============================================================================
// Shared Context
// =============================================================================

/// Dependencies shared by all sessions of a server.
pub struct StreamContext {
    config: SessionConfig,
    generator: SnapshotGenerator,
    portfolio_data: Arc<dyn PortfolioDataPort>,
    registry: Arc<SessionRegistry>,
    sessions_created: AtomicU64,
}

impl StreamContext {
    /// Create a context.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        generator: SnapshotGenerator,
        portfolio_data: Arc<dyn PortfolioDataPort>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            config,
            generator,
            portfolio_data,
            registry,
            sessions_created: AtomicU64::new(0),
        }
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Session registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn session_rng(&self) -> StdRng {
        let ordinal = self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.config.rng_seed.map_or_else(StdRng::from_os_rng, |seed| {
            StdRng::seed_from_u64(seed.wrapping_add(ordinal))
        })
    }
}

impl std::fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamContext")
            .field("config", &self.config)
            .field("generator", &self.generator)
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug)]
struct ControlState {
    state: SessionState,
    loop_token: Option<CancellationToken>,
}

#[derive(Debug)]
struct SnapshotBook {
    previous: HashMap<String, Snapshot>,
    rng: StdRng,
    last_push: Option<tokio::time::Instant>,
}

/// A client session.
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    identity: Identity,
    connected_at: DateTime<Utc>,
    context: Arc<StreamContext>,
    control: Mutex<ControlState>,
    flag: Arc<StateFlag>,
    lifetime: CancellationToken,
    outbound: Mutex<Option<mpsc::Sender<OutboundMessage>>>,
    book: tokio::sync::Mutex<SnapshotBook>,
}

impl StreamSession {
    /// Create a session writing to `outbound`.
    ///
    /// The session is not visible to the registry until [`open`](Self::open).
    #[must_use]
    pub fn new(
        id: SessionId,
        identity: Identity,
        context: Arc<StreamContext>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Arc<Self> {
        let lifetime = context.registry.session_token();
        let rng = context.session_rng();
        Arc::new(Self {
            id,
            identity,
            connected_at: Utc::now(),
            context,
            control: Mutex::new(ControlState {
                state: SessionState::Connected,
                loop_token: None,
            }),
            flag: Arc::new(StateFlag::new(SessionState::Connected)),
            lifetime,
            outbound: Mutex::new(Some(outbound)),
            book: tokio::sync::Mutex::new(SnapshotBook {
                previous: HashMap::new(),
                rng,
                last_push: None,
            }),
        })
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Identity resolved at handshake.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.control.lock().state
    }

    /// Token cancelled when the session closes or the server shuts down.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.lifetime.clone()
    }

    /// Read-only view of the session.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            user: self.identity.label().to_string(),
            state: self.flag.load(),
            connected_at: self.connected_at,
        }
    }

    /// Register the session and greet the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the greeting cannot be
    /// queued.
    pub async fn open(self: &Arc<Self>) -> Result<(), SessionError> {
        self.context.registry.register(SessionHandle::new(
            self.id.clone(),
            self.identity.label().to_string(),
            self.connected_at,
            Arc::clone(&self.flag),
            self.lifetime.clone(),
        ));
        metrics::record_session_opened();

        tracing::info!(
            session_id = %self.id,
            user = %self.identity,
            "Session opened"
        );

        self.send(OutboundMessage::connection_established(
            &self.id,
            &self.identity,
        ))
        .await?;

        if self.context.config.auto_start {
            self.start();
        }
        Ok(())
    }

    /// Handle one decoded control message.
    ///
    /// Messages for a closed session are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot cannot be queued.
    pub async fn handle_control(self: &Arc<Self>, message: ControlMessage) -> Result<(), SessionError> {
        if self.state() == SessionState::Closed {
            tracing::debug!(
                session_id = %self.id,
                message_type = message.kind(),
                "Ignoring control message on closed session"
            );
            return Ok(());
        }

        tracing::debug!(session_id = %self.id, message_type = message.kind(), "Control message");

        match message {
            ControlMessage::StartUpdates => {
                self.start();
                Ok(())
            }
            ControlMessage::StopUpdates => {
                self.stop();
                Ok(())
            }
            ControlMessage::RequestSnapshot { portfolio_id } => {
                self.request_snapshot(portfolio_id.as_deref()).await
            }
        }
    }

    /// Start the push loop. No-op while streaming or after close.
    pub fn start(self: &Arc<Self>) {
        let token = {
            let mut control = self.control.lock();
            let transition = control.state.apply(ControlEvent::Start);
            match transition.effect {
                Effect::SpawnLoop => {
                    let token = self.lifetime.child_token();
                    control.loop_token = Some(token.clone());
                    control.state = transition.next;
                    self.flag.store(transition.next);
                    token
                }
                Effect::Ignored => {
                    tracing::debug!(session_id = %self.id, "Start ignored on closed session");
                    return;
                }
                Effect::None | Effect::CancelLoop | Effect::Teardown => {
                    tracing::debug!(session_id = %self.id, "Already streaming");
                    return;
                }
            }
        };

        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.run_push_loop(token).await;
        });
    }

    /// Stop the push loop. No-op unless streaming.
    pub fn stop(&self) {
        let token = {
            let mut control = self.control.lock();
            let transition = control.state.apply(ControlEvent::Stop);
            if transition.effect != Effect::CancelLoop {
                tracing::debug!(
                    session_id = %self.id,
                    state = control.state.as_str(),
                    "Stop ignored"
                );
                return;
            }
            control.state = transition.next;
            self.flag.store(transition.next);
            control.loop_token.take()
        };

        if let Some(token) = token {
            token.cancel();
        }
        tracing::info!(session_id = %self.id, "Streaming paused");
    }

    /// Push one `portfolio_data` snapshot without changing state.
    ///
    /// A missing or blank `portfolio_id` means the default portfolio.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the snapshot cannot be
    /// queued.
    pub async fn request_snapshot(&self, portfolio_id: Option<&str>) -> Result<(), SessionError> {
        if self.state() == SessionState::Closed {
            return Err(SessionError::Closed(self.id.clone()));
        }

        let portfolio_id = portfolio_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.context.config.default_portfolio)
            .to_string();

        let mut book = self.book.lock().await;
        let snapshot = self.next_snapshot(&mut book, &portfolio_id).await;
        self.send(OutboundMessage::portfolio_data(snapshot.clone()))
            .await?;
        book.previous.insert(portfolio_id, snapshot);
        Ok(())
    }

    /// Tell the client its frame was rejected. The session stays usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the notice cannot be queued.
    pub async fn report_protocol_error(
        &self,
        kind: &'static str,
        reason: String,
    ) -> Result<(), SessionError> {
        metrics::record_protocol_error(kind);
        tracing::warn!(session_id = %self.id, kind, reason = %reason, "Rejected client frame");
        self.send(OutboundMessage::error(reason)).await
    }

    /// Close the session. Idempotent; returns `true` on the first call.
    ///
    /// Cancels any push loop, deregisters the session and releases the
    /// outbound queue so the transport writer can finish.
    pub fn close(&self, reason: CloseReason) -> bool {
        let token = {
            let mut control = self.control.lock();
            let transition = control.state.apply(ControlEvent::Disconnect);
            if transition.effect != Effect::Teardown {
                return false;
            }
            control.state = transition.next;
            self.flag.store(transition.next);
            control.loop_token.take()
        };

        if let Some(token) = token {
            token.cancel();
        }
        self.lifetime.cancel();
        self.context.registry.deregister(&self.id);

        let outbound = self.outbound.lock().take();
        if reason == CloseReason::Shutdown
            && let Some(sender) = &outbound
        {
            let _ = sender.try_send(OutboundMessage::error(SHUTDOWN_NOTICE));
        }
        drop(outbound);

        metrics::record_session_closed(reason.as_str());
        tracing::info!(
            session_id = %self.id,
            reason = reason.as_str(),
            "Session closed"
        );
        true
    }

    // =========================================================================
    // Push Loop
    // =========================================================================

    async fn run_push_loop(self: Arc<Self>, token: CancellationToken) {
        let tick = self.context.config.tick_interval;
        // A restart within one tick of the last push waits for the next slot.
        let first_tick = {
            let now = tokio::time::Instant::now();
            self.book
                .lock()
                .await
                .last_push
                .map_or(now, |last| (last + tick).max(now))
        };
        let mut interval = tokio::time::interval_at(first_tick, tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let portfolio_id = self.context.config.default_portfolio.clone();

        tracing::info!(
            session_id = %self.id,
            interval = ?tick,
            "Streaming started"
        );

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let mut book = self.book.lock().await;
            if token.is_cancelled() {
                break;
            }

            let snapshot = self.next_snapshot(&mut book, &portfolio_id).await;

            let sent = tokio::select! {
                biased;
                () = token.cancelled() => break,
                sent = self.send(OutboundMessage::price_update(snapshot.clone())) => sent,
            };

            match sent {
                Ok(()) => {
                    book.previous.insert(portfolio_id.clone(), snapshot);
                    book.last_push = Some(tokio::time::Instant::now());
                }
                Err(e) => {
                    drop(book);
                    tracing::warn!(session_id = %self.id, error = %e, "Push failed");
                    self.close(CloseReason::TransportFailed);
                    break;
                }
            }
        }

        tracing::debug!(session_id = %self.id, "Push loop exited");
    }

    async fn next_snapshot(&self, book: &mut SnapshotBook, portfolio_id: &str) -> Snapshot {
        let started = Instant::now();
        let generator = &self.context.generator;

        let snapshot = if let Some(previous) = book.previous.get(portfolio_id) {
            generator.generate(Some(previous), portfolio_id, Utc::now(), &mut book.rng)
        } else {
            let seed = self.lookup_holdings(portfolio_id).await;
            generator.generate_seeded(None, portfolio_id, seed.as_ref(), Utc::now(), &mut book.rng)
        };

        metrics::record_snapshot_generation(started.elapsed());
        snapshot
    }

    async fn lookup_holdings(&self, portfolio_id: &str) -> Option<PortfolioHoldings> {
        let deadline = self.context.config.provider_deadline();
        let lookup = self
            .context
            .portfolio_data
            .holdings(portfolio_id, &self.identity);

        match tokio::time::timeout(deadline, lookup).await {
            Ok(Ok(holdings)) => holdings,
            Ok(Err(e)) => {
                metrics::record_provider_fallback(FallbackReason::Error);
                tracing::warn!(
                    session_id = %self.id,
                    portfolio_id,
                    error = %e,
                    "Portfolio data lookup failed, using synthetic holdings"
                );
                None
            }
            Err(_) => {
                metrics::record_provider_fallback(FallbackReason::Timeout);
                tracing::warn!(
                    session_id = %self.id,
                    portfolio_id,
                    timeout = ?deadline,
                    "Portfolio data lookup timed out, using synthetic holdings"
                );
                None
            }
        }
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), SessionError> {
        let sender = self
            .outbound
            .lock()
            .clone()
            .ok_or_else(|| SessionError::Closed(self.id.clone()))?;

        sender
            .send(message)
            .await
            .map_err(|_| SessionError::OutboundClosed(self.id.clone()))
    }
}

// =============================================================================
// Tests
// =============================================================================
