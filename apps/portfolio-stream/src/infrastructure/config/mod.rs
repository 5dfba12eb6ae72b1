//! Configuration Module
//!
//! Configuration loading for the stream service.

mod settings;

pub use settings::{AuthSettings, ConfigError, ServerSettings, StreamConfig, StreamSettings};
