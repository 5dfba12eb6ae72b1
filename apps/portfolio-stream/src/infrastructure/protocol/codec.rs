//! Protocol Codec
//!
//! Parses inbound text frames into [`ControlMessage`]s and serializes
//! [`OutboundMessage`]s. Decoding never panics; every failure maps to a
//! [`CodecError`] whose `Display` text is what the client sees in the
//! resulting `error` message.

use serde_json::Value;

use crate::domain::messages::{ControlMessage, OutboundMessage};

/// Largest inbound text frame accepted, in bytes.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is not valid JSON.
    #[error("Invalid JSON format")]
    InvalidJson(#[source] serde_json::Error),

    /// Frame has no `type` field.
    #[error("message type is required")]
    MissingType,

    /// Frame names a type this server does not know.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Frame is JSON but not shaped like a message.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Known type with an invalid payload.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Message type.
        kind: String,
        /// What was wrong.
        reason: String,
    },

    /// Frame exceeds [`MAX_FRAME_BYTES`].
    #[error("message too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Binary frame received.
    #[error("binary frames are not supported")]
    BinaryFrame,

    /// Outbound serialization failed.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::MissingType => "missing_type",
            Self::UnknownMessageType(_) => "unknown_type",
            Self::InvalidFormat(_) => "invalid_format",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::FrameTooLarge(_) => "frame_too_large",
            Self::BinaryFrame => "binary_frame",
            Self::Encode(_) => "encode",
        }
    }
}

/// JSON codec for the portfolio channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolCodec;

impl ProtocolCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is oversized, not JSON, not an object,
    /// lacks a string `type`, names an unknown type, or carries an invalid
    /// payload for a known type.
    pub fn decode_control(&self, text: &str) -> Result<ControlMessage, CodecError> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(text.len()));
        }

        let value: Value = serde_json::from_str(text.trim()).map_err(CodecError::InvalidJson)?;

        let Some(object) = value.as_object() else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got {}",
                json_kind(&value)
            )));
        };

        let kind = match object.get("type") {
            None | Some(Value::Null) => return Err(CodecError::MissingType),
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => {
                return Err(CodecError::InvalidFormat(format!(
                    "message type must be a string, got {}",
                    json_kind(other)
                )));
            }
        };

        match kind.as_str() {
            "start_updates" | "stop_updates" | "get_portfolio_data" => {
                serde_json::from_value(value).map_err(|e| CodecError::InvalidPayload {
                    kind,
                    reason: e.to_string(),
                })
            }
            _ => Err(CodecError::UnknownMessageType(kind)),
        }
    }

    /// Encode an outbound message as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &OutboundMessage) -> Result<String, CodecError> {
        serde_json::to_string(message).map_err(CodecError::Encode)
    }

    /// Decode an outbound message (client side).
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a valid outbound message.
    pub fn decode_outbound(&self, text: &str) -> Result<OutboundMessage, CodecError> {
        serde_json::from_str(text).map_err(CodecError::InvalidJson)
    }

    /// Encode a control message (client side).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_control(&self, message: &ControlMessage) -> Result<String, CodecError> {
        serde_json::to_string(message).map_err(CodecError::Encode)
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use test_case::test_case;

    use super::*;
    use crate::domain::snapshot::{DEFAULT_PORTFOLIO_ID, SnapshotGenerator};

    #[test_case(r#"{"type":"start_updates"}"#, ControlMessage::StartUpdates ; "start")]
    #[test_case(r#"{"type":"stop_updates"}"#, ControlMessage::StopUpdates ; "stop")]
    #[test_case(r#"  {"type":"stop_updates"}  "#, ControlMessage::StopUpdates ; "surrounding whitespace")]
    #[test_case(r#"{"type":"get_portfolio_data"}"#, ControlMessage::RequestSnapshot { portfolio_id: None } ; "snapshot default")]
    #[test_case(r#"{"type":"get_portfolio_data","portfolio_id":"p7"}"#, ControlMessage::RequestSnapshot { portfolio_id: Some("p7".to_string()) } ; "snapshot with portfolio")]
    #[test_case(r#"{"type":"start_updates","extra":true}"#, ControlMessage::StartUpdates ; "extra fields ignored")]
    fn decodes_control_messages(text: &str, expected: ControlMessage) {
        assert_eq!(ProtocolCodec::new().decode_control(text).unwrap(), expected);
    }

    #[test_case("not json", "invalid_json" ; "garbage")]
    #[test_case("", "invalid_json" ; "empty")]
    #[test_case("[1,2]", "invalid_format" ; "array")]
    #[test_case(r#""start_updates""#, "invalid_format" ; "bare string")]
    #[test_case("{}", "missing_type" ; "no type")]
    #[test_case(r#"{"type":null}"#, "missing_type" ; "null type")]
    #[test_case(r#"{"type":42}"#, "invalid_format" ; "numeric type")]
    #[test_case(r#"{"type":"bogus"}"#, "unknown_type" ; "unknown type")]
    #[test_case(r#"{"type":"get_portfolio_data","portfolio_id":5}"#, "invalid_payload" ; "bad payload")]
    fn rejects_bad_frames(text: &str, kind: &str) {
        let err = ProtocolCodec::new().decode_control(text).unwrap_err();
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn client_facing_error_texts() {
        let codec = ProtocolCodec::new();
        assert_eq!(
            codec.decode_control("{oops").unwrap_err().to_string(),
            "Invalid JSON format"
        );
        assert_eq!(
            codec
                .decode_control(r#"{"type":"bogus"}"#)
                .unwrap_err()
                .to_string(),
            "unknown message type: bogus"
        );
        assert_eq!(
            CodecError::BinaryFrame.to_string(),
            "binary frames are not supported"
        );
    }

    #[test]
    fn oversized_frame_rejected_before_parsing() {
        let text = format!(r#"{{"type":"start_updates","pad":"{}"}}"#, "x".repeat(MAX_FRAME_BYTES));
        let err = ProtocolCodec::new().decode_control(&text).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge(_)));
    }

    #[test]
    fn snapshot_round_trip_preserves_order_and_values() {
        let codec = ProtocolCodec::new();
        let generator = SnapshotGenerator::default();
        let mut rng = StdRng::seed_from_u64(11);
        let base = generator.generate(None, DEFAULT_PORTFOLIO_ID, Utc::now(), &mut rng);
        let snapshot = generator.generate(Some(&base), DEFAULT_PORTFOLIO_ID, Utc::now(), &mut rng);

        let text = codec
            .encode(&OutboundMessage::price_update(snapshot.clone()))
            .unwrap();
        let decoded = codec.decode_outbound(&text).unwrap();

        let OutboundMessage::PriceUpdate { data, .. } = decoded else {
            panic!("expected price_update");
        };
        assert_eq!(data.portfolio_id, snapshot.portfolio_id);
        assert_eq!(data.symbols(), snapshot.symbols());
        assert_eq!(data.total_value, snapshot.total_value);
        assert_eq!(data.total_change, snapshot.total_change);
        assert_eq!(data.total_change_percent, snapshot.total_change_percent);
        assert_eq!(data.investments, snapshot.investments);
    }

    #[test]
    fn control_round_trip() {
        let codec = ProtocolCodec::new();
        let msg = ControlMessage::RequestSnapshot {
            portfolio_id: Some("p1".to_string()),
        };
        let text = codec.encode_control(&msg).unwrap();
        assert_eq!(codec.decode_control(&text).unwrap(), msg);
    }
}
