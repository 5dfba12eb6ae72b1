//! WebSocket Transport
//!
//! Serves the portfolio channel over axum WebSockets.
//!
//! # Connection Flow
//!
//! 1. The upgrade handler resolves the caller's identity from the trusted
//!    header and rejects anonymous callers when they are not allowed
//! 2. A `StreamSession` is created and registered; the greeting is queued
//! 3. The reader task decodes text frames and feeds the session in order
//! 4. A writer task drains the session's bounded outbound queue to the socket
//! 5. Close, read/write failure or server shutdown closes the session

pub mod server;

pub use server::{StreamServer, StreamServerError, StreamServerState, router};
