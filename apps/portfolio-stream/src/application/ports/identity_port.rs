//! Identity Resolver Port (Driven Port)
//!
//! Authentication happens upstream. The transport hands over what it learned
//! during the handshake and the resolver turns it into an [`Identity`].

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::domain::session::Identity;

/// Transport facts available when a client connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Principal asserted by the upstream authenticating proxy, if any.
    pub principal: Option<String>,
    /// Peer address, when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
}

impl Handshake {
    /// Handshake carrying a principal.
    #[must_use]
    pub fn with_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            remote_addr: None,
        }
    }
}

/// Port for resolving a connecting client's identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve the identity for a handshake. Never fails: unknown callers are
    /// [`Identity::Anonymous`].
    async fn resolve(&self, handshake: &Handshake) -> Identity;
}

/// Resolver that treats every client as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentityResolver;

#[async_trait]
impl IdentityResolver for AnonymousIdentityResolver {
    async fn resolve(&self, _handshake: &Handshake) -> Identity {
        Identity::Anonymous
    }
}
