//! WebSocket Server
//!
//! axum router, upgrade handler and per-connection reader/writer tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Handshake, IdentityResolver};
use crate::application::services::{SessionError, StreamContext, StreamSession};
use crate::domain::messages::OutboundMessage;
use crate::domain::session::{CloseReason, Identity, SessionId};
use crate::infrastructure::config::AuthSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::protocol::{CodecError, MAX_FRAME_BYTES, ProtocolCodec};

/// Largest WebSocket message the transport buffers. Text frames above
/// [`MAX_FRAME_BYTES`] still get an `error` reply from the codec.
const MAX_MESSAGE_BYTES: usize = MAX_FRAME_BYTES * 16;

/// How long a closing connection waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// State
// =============================================================================

/// Shared state of the WebSocket endpoint.
pub struct StreamServerState {
    context: Arc<StreamContext>,
    identity: Arc<dyn IdentityResolver>,
    auth: AuthSettings,
    outbound_capacity: usize,
    codec: ProtocolCodec,
}

impl StreamServerState {
    /// Create endpoint state.
    #[must_use]
    pub fn new(
        context: Arc<StreamContext>,
        identity: Arc<dyn IdentityResolver>,
        auth: AuthSettings,
        outbound_capacity: usize,
    ) -> Self {
        Self {
            context,
            identity,
            auth,
            outbound_capacity: outbound_capacity.max(1),
            codec: ProtocolCodec::new(),
        }
    }

    fn handshake(&self, headers: &HeaderMap, remote_addr: SocketAddr) -> Handshake {
        let principal = headers
            .get(self.auth.trusted_user_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Handshake {
            principal,
            remote_addr: Some(remote_addr),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// WebSocket server for the portfolio channel.
pub struct StreamServer {
    addr: SocketAddr,
    path: String,
    state: Arc<StreamServerState>,
    cancel: CancellationToken,
}

impl StreamServer {
    /// Create a server bound to `addr` serving `path`.
    #[must_use]
    pub fn new(
        addr: SocketAddr,
        path: impl Into<String>,
        state: Arc<StreamServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            path: path.into(),
            state,
            cancel,
        }
    }

    /// Router serving the WebSocket endpoint.
    #[must_use]
    pub fn router(&self) -> Router {
        router(&self.path, Arc::clone(&self.state))
    }

    /// Bind and run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StreamServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), StreamServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| StreamServerError::BindFailed(self.addr, e.to_string()))?;
        self.serve(listener).await
    }

    /// Run on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StreamServerError` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), StreamServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| StreamServerError::BindFailed(self.addr, e.to_string()))?;
        let app = self.router();

        tracing::info!(addr = %local_addr, path = %self.path, "WebSocket server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.cancel.cancelled_owned())
        .await
        .map_err(|e| StreamServerError::ServerFailed(e.to_string()))?;

        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

/// Build the WebSocket router.
#[must_use]
pub fn router(path: &str, state: Arc<StreamServerState>) -> Router {
    Router::new().route(path, get(ws_handler)).with_state(state)
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<StreamServerState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if state.context.registry().is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    let handshake = state.handshake(&headers, remote_addr);
    let identity = state.identity.resolve(&handshake).await;

    if identity.is_anonymous() && !state.auth.allow_anonymous {
        tracing::info!(remote_addr = %remote_addr, "Rejected anonymous connection");
        return (StatusCode::UNAUTHORIZED, "authentication required").into_response();
    }

    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: Arc<StreamServerState>, identity: Identity) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.outbound_capacity);

    let session = StreamSession::new(
        SessionId::generate(),
        identity,
        Arc::clone(&state.context),
        tx,
    );
    let codec = state.codec;

    let writer_session = Arc::clone(&session);
    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match codec.encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(
                        session_id = %writer_session.id(),
                        error = %e,
                        "Dropping unencodable message"
                    );
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                tracing::debug!(session_id = %writer_session.id(), error = %e, "Write failed");
                writer_session.close(CloseReason::TransportFailed);
                return;
            }
            metrics::record_message_sent(message.kind());
        }
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    });

    if let Err(e) = session.open().await {
        tracing::warn!(session_id = %session.id(), error = %e, "Failed to open session");
        session.close(CloseReason::TransportFailed);
    }

    let closed = session.closed_token();
    let reason = loop {
        tokio::select! {
            () = closed.cancelled() => break CloseReason::Shutdown,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = dispatch(&session, codec, text.as_str()).await {
                        tracing::debug!(session_id = %session.id(), error = %e, "Dispatch failed");
                        break CloseReason::TransportFailed;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = CodecError::BinaryFrame;
                    if session.report_protocol_error(err.kind(), err.to_string()).await.is_err() {
                        break CloseReason::TransportFailed;
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break CloseReason::ClientDisconnected,
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session.id(), error = %e, "Read failed");
                    break CloseReason::TransportFailed;
                }
            },
        }
    };

    session.close(reason);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

async fn dispatch(
    session: &Arc<StreamSession>,
    codec: ProtocolCodec,
    text: &str,
) -> Result<(), SessionError> {
    match codec.decode_control(text) {
        Ok(message) => session.handle_control(message).await,
        Err(e) => session.report_protocol_error(e.kind(), e.to_string()).await,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamServerError {
    /// Failed to bind.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
