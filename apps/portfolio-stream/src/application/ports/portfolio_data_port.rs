//! Portfolio Data Port (Driven Port)
//!
//! Interface to the collaborator that owns real portfolio holdings. The
//! stream treats it as optional: absence, errors and timeouts all fall back
//! to synthetic data.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::session::Identity;
use crate::domain::snapshot::PortfolioHoldings;

/// Portfolio data lookup error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortfolioDataError {
    /// Backing store unavailable.
    #[error("portfolio data unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be interpreted.
    #[error("invalid portfolio data: {0}")]
    Invalid(String),
}

/// Port for looking up the holdings of a portfolio.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortfolioDataPort: Send + Sync {
    /// Holdings of `portfolio_id` as visible to `identity`.
    ///
    /// Returns `Ok(None)` when the portfolio is unknown.
    async fn holdings(
        &self,
        portfolio_id: &str,
        identity: &Identity,
    ) -> Result<Option<PortfolioHoldings>, PortfolioDataError>;
}

/// Port implementation with no data; every snapshot is synthetic.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPortfolioData;

#[async_trait]
impl PortfolioDataPort for NoPortfolioData {
    async fn holdings(
        &self,
        _portfolio_id: &str,
        _identity: &Identity,
    ) -> Result<Option<PortfolioHoldings>, PortfolioDataError> {
        Ok(None)
    }
}

/// In-memory holdings keyed by portfolio id.
///
/// Portfolios are visible to every identity.
#[derive(Debug, Default)]
pub struct InMemoryPortfolioData {
    portfolios: RwLock<HashMap<String, PortfolioHoldings>>,
}

impl InMemoryPortfolioData {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `holdings`.
    #[must_use]
    pub fn with_portfolios(holdings: impl IntoIterator<Item = PortfolioHoldings>) -> Self {
        let store = Self::new();
        for h in holdings {
            store.insert(h);
        }
        store
    }

    /// Insert or replace a portfolio.
    pub fn insert(&self, holdings: PortfolioHoldings) {
        self.portfolios
            .write()
            .insert(holdings.portfolio_id.clone(), holdings);
    }

    /// Check whether a portfolio is stored.
    #[must_use]
    pub fn contains(&self, portfolio_id: &str) -> bool {
        self.portfolios.read().contains_key(portfolio_id)
    }

    /// Number of stored portfolios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.portfolios.read().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.portfolios.read().is_empty()
    }
}

#[async_trait]
impl PortfolioDataPort for InMemoryPortfolioData {
    async fn holdings(
        &self,
        portfolio_id: &str,
        _identity: &Identity,
    ) -> Result<Option<PortfolioHoldings>, PortfolioDataError> {
        Ok(self.portfolios.read().get(portfolio_id).cloned())
    }
}
