//! Stream Configuration Settings
//!
//! Configuration types for the portfolio stream, loaded from environment
//! variables. Unparseable numbers fall back to defaults; values that parse but
//! make no sense (a zero tick, a route without a leading `/`) are rejected.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::SessionConfig;
use crate::domain::snapshot::{
    DEFAULT_MAX_MOVE_PERCENT, DEFAULT_PORTFOLIO_ID, MAX_MOVE_PERCENT_LIMIT,
};

/// Server bind settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address for both servers.
    pub host: IpAddr,
    /// WebSocket server port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// WebSocket route.
    pub ws_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8000,
            health_port: 8082,
            ws_path: "/ws/portfolio/".to_string(),
        }
    }
}

impl ServerSettings {
    /// WebSocket server socket address.
    #[must_use]
    pub const fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Health server socket address.
    #[must_use]
    pub const fn health_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.health_port)
    }
}

/// Streaming behaviour settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Push loop interval.
    pub tick_interval: Duration,
    /// Portfolio data lookup timeout (clamped to the tick interval).
    pub provider_timeout: Duration,
    /// Per-connection outbound queue capacity.
    pub outbound_capacity: usize,
    /// Maximum per-tick price move in percent.
    pub max_move_percent: f64,
    /// Streamed portfolio id.
    pub default_portfolio: String,
    /// Start streaming on connect.
    pub auto_start: bool,
    /// Base seed for reproducible session randomness.
    pub rng_seed: Option<u64>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(5_000),
            provider_timeout: Duration::from_millis(2_000),
            outbound_capacity: 64,
            max_move_percent: DEFAULT_MAX_MOVE_PERCENT,
            default_portfolio: DEFAULT_PORTFOLIO_ID.to_string(),
            auto_start: false,
            rng_seed: None,
        }
    }
}

impl StreamSettings {
    /// Session configuration derived from these settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_interval: self.tick_interval,
            provider_timeout: self.provider_timeout.min(self.tick_interval),
            default_portfolio: self.default_portfolio.clone(),
            auto_start: self.auto_start,
            rng_seed: self.rng_seed,
        }
    }
}

/// Handshake identity settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    /// Header carrying the principal set by the upstream proxy.
    pub trusted_user_header: String,
    /// Accept clients without a principal.
    pub allow_anonymous: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            trusted_user_header: "x-authenticated-user".to_string(),
            allow_anonymous: true,
        }
    }
}

/// Complete stream configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Server bind settings.
    pub server: ServerSettings,
    /// Streaming behaviour.
    pub stream: StreamSettings,
    /// Handshake identity.
    pub auth: AuthSettings,
    /// JSON holdings fixture.
    pub portfolio_file: Option<PathBuf>,
    /// How long shutdown waits for sessions to drain.
    pub shutdown_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            stream: StreamSettings::default(),
            auth: AuthSettings::default(),
            portfolio_file: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds a semantically invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds a semantically invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let server = ServerSettings {
            host: env.parse("STREAM_HOST", defaults.server.host),
            port: env.parse("STREAM_PORT", defaults.server.port),
            health_port: env.parse("STREAM_HEALTH_PORT", defaults.server.health_port),
            ws_path: env.string("STREAM_WS_PATH", &defaults.server.ws_path),
        };

        let stream = StreamSettings {
            tick_interval: env.duration_millis(
                "STREAM_TICK_INTERVAL_MS",
                defaults.stream.tick_interval,
            ),
            provider_timeout: env.duration_millis(
                "STREAM_PROVIDER_TIMEOUT_MS",
                defaults.stream.provider_timeout,
            ),
            outbound_capacity: env.parse(
                "STREAM_OUTBOUND_CAPACITY",
                defaults.stream.outbound_capacity,
            ),
            max_move_percent: env.parse(
                "STREAM_MAX_MOVE_PERCENT",
                defaults.stream.max_move_percent,
            ),
            default_portfolio: env.string(
                "STREAM_DEFAULT_PORTFOLIO",
                &defaults.stream.default_portfolio,
            ),
            auto_start: env.bool("STREAM_AUTO_START", defaults.stream.auto_start),
            rng_seed: env.get("STREAM_RNG_SEED").and_then(|v| v.parse().ok()),
        };

        let auth = AuthSettings {
            trusted_user_header: env
                .string(
                    "STREAM_TRUSTED_USER_HEADER",
                    &defaults.auth.trusted_user_header,
                )
                .to_ascii_lowercase(),
            allow_anonymous: env.bool("STREAM_ALLOW_ANONYMOUS", defaults.auth.allow_anonymous),
        };

        let config = Self {
            server,
            stream,
            auth,
            portfolio_file: env.get("STREAM_PORTFOLIO_FILE").map(PathBuf::from),
            shutdown_timeout: env.duration_secs(
                "STREAM_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.tick_interval.is_zero() {
            return Err(ConfigError::invalid(
                "STREAM_TICK_INTERVAL_MS",
                "must be greater than zero",
            ));
        }
        if self.stream.outbound_capacity == 0 {
            return Err(ConfigError::invalid(
                "STREAM_OUTBOUND_CAPACITY",
                "must be greater than zero",
            ));
        }
        if !(self.stream.max_move_percent > 0.0
            && self.stream.max_move_percent <= MAX_MOVE_PERCENT_LIMIT)
        {
            return Err(ConfigError::invalid(
                "STREAM_MAX_MOVE_PERCENT",
                format!("must be in (0, {MAX_MOVE_PERCENT_LIMIT}]"),
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "STREAM_WS_PATH",
                "must start with '/'",
            ));
        }
        if self.stream.default_portfolio.is_empty() {
            return Err(ConfigError::EmptyValue(
                "STREAM_DEFAULT_PORTFOLIO".to_string(),
            ));
        }
        if self.auth.trusted_user_header.is_empty() {
            return Err(ConfigError::EmptyValue(
                "STREAM_TRUSTED_USER_HEADER".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable holds an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Environment Parsing
// =============================================================================

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            })
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }
}
