//! Control Protocol
//!
//! JSON text-frame codec for the portfolio channel. Message types live in
//! [`crate::domain::messages`]; this module only deals with the wire.

pub mod codec;

pub use codec::{CodecError, MAX_FRAME_BYTES, ProtocolCodec};
