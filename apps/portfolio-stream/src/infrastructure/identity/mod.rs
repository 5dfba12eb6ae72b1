//! Trusted Header Identity
//!
//! Authentication is done by the proxy in front of this service, which puts
//! the authenticated user in a request header. This adapter accepts that
//! principal as-is after basic sanity checks.

use async_trait::async_trait;

use crate::application::ports::{Handshake, IdentityResolver};
use crate::domain::session::Identity;

/// Longest principal accepted.
pub const MAX_PRINCIPAL_LEN: usize = 256;

/// Resolves identity from the principal asserted by an upstream proxy.
///
/// Missing, blank, oversized or control-character principals resolve to
/// [`Identity::Anonymous`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedHeaderIdentityResolver;

impl TrustedHeaderIdentityResolver {
    /// Create a resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn accept(principal: &str) -> Option<&str> {
        let principal = principal.trim();
        let valid = !principal.is_empty()
            && principal.len() <= MAX_PRINCIPAL_LEN
            && !principal.chars().any(char::is_control);
        valid.then_some(principal)
    }
}

#[async_trait]
impl IdentityResolver for TrustedHeaderIdentityResolver {
    async fn resolve(&self, handshake: &Handshake) -> Identity {
        match handshake.principal.as_deref() {
            Some(raw) => Self::accept(raw).map_or_else(
                || {
                    tracing::debug!(
                        remote_addr = ?handshake.remote_addr,
                        "Ignoring malformed principal"
                    );
                    Identity::Anonymous
                },
                |user| Identity::Authenticated(user.to_string()),
            ),
            None => Identity::Anonymous,
        }
    }
}
