//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `IdentityResolver`: Resolves the connecting user at handshake time
//! - `PortfolioDataPort`: Supplies real holdings used to seed snapshots

mod identity_port;
mod portfolio_data_port;

pub use identity_port::{AnonymousIdentityResolver, Handshake, IdentityResolver};
#[cfg(test)]
pub use portfolio_data_port::MockPortfolioDataPort;
pub use portfolio_data_port::{
    InMemoryPortfolioData, NoPortfolioData, PortfolioDataError, PortfolioDataPort,
};
