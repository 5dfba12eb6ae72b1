//! Client Message Types
//!
//! The JSON message set exchanged over the portfolio channel. Every message is
//! an object discriminated by its `"type"` field.
//!
//! Inbound (client → server):
//!
//! ```json
//! {"type": "start_updates"}
//! {"type": "stop_updates"}
//! {"type": "get_portfolio_data", "portfolio_id": "optional"}
//! ```
//!
//! Outbound (server → client): `connection_established`, `portfolio_data`,
//! `price_update` and `error`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{Identity, SessionId};
use super::snapshot::Snapshot;

/// Greeting sent with `connection_established`.
pub const CONNECTED_GREETING: &str = "Connected to portfolio price feed";

/// Control message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Start the periodic push loop.
    StartUpdates,
    /// Stop the periodic push loop.
    StopUpdates,
    /// Push one snapshot now.
    #[serde(rename = "get_portfolio_data")]
    RequestSnapshot {
        /// Portfolio to snapshot; the default portfolio when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        portfolio_id: Option<String>,
    },
}

impl ControlMessage {
    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StartUpdates => "start_updates",
            Self::StopUpdates => "stop_updates",
            Self::RequestSnapshot { .. } => "get_portfolio_data",
        }
    }
}

/// Message sent to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// First message on every connection.
    ConnectionEstablished {
        /// Session identifier.
        session_id: String,
        /// Human readable greeting.
        message: String,
        /// Identity label (`anonymous` when unauthenticated).
        user: String,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Answer to `get_portfolio_data`.
    PortfolioData {
        /// The snapshot.
        data: Snapshot,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Periodic update from the push loop.
    PriceUpdate {
        /// The snapshot.
        data: Snapshot,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Protocol error or server notice.
    Error {
        /// Reason.
        message: String,
    },
}

impl OutboundMessage {
    /// Build the greeting for a new session.
    #[must_use]
    pub fn connection_established(session_id: &SessionId, identity: &Identity) -> Self {
        Self::ConnectionEstablished {
            session_id: session_id.to_string(),
            message: CONNECTED_GREETING.to_string(),
            user: identity.label().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Wrap an on-demand snapshot.
    #[must_use]
    pub fn portfolio_data(data: Snapshot) -> Self {
        Self::PortfolioData {
            data,
            timestamp: Utc::now(),
        }
    }

    /// Wrap a periodic snapshot.
    #[must_use]
    pub fn price_update(data: Snapshot) -> Self {
        Self::PriceUpdate {
            data,
            timestamp: Utc::now(),
        }
    }

    /// Build an error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::PortfolioData { .. } => "portfolio_data",
            Self::PriceUpdate { .. } => "price_update",
            Self::Error { .. } => "error",
        }
    }

    /// Snapshot carried by the message, if any.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::PortfolioData { data, .. } | Self::PriceUpdate { data, .. } => Some(data),
            Self::ConnectionEstablished { .. } | Self::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_message_wire_names() {
        let json = serde_json::to_string(&ControlMessage::StartUpdates).unwrap();
        assert_eq!(json, r#"{"type":"start_updates"}"#);

        let json = serde_json::to_string(&ControlMessage::RequestSnapshot { portfolio_id: None })
            .unwrap();
        assert_eq!(json, r#"{"type":"get_portfolio_data"}"#);
    }

    #[test]
    fn greeting_carries_session_and_user() {
        let id = SessionId::from("abc");
        let msg = OutboundMessage::connection_established(
            &id,
            &Identity::Authenticated("alice".to_string()),
        );
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "connection_established");
        assert_eq!(value["session_id"], "abc");
        assert_eq!(value["user"], "alice");
        assert_eq!(value["message"], CONNECTED_GREETING);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn error_shape() {
        let value = serde_json::to_value(OutboundMessage::error("boom")).unwrap();
        assert_eq!(value, serde_json::json!({"type": "error", "message": "boom"}));
    }
}
