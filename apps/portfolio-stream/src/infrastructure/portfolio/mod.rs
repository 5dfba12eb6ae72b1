//! File-backed Portfolio Data
//!
//! Loads real holdings from a JSON fixture at startup:
//!
//! ```json
//! {
//!   "portfolios": [
//!     {
//!       "portfolio_id": "retirement",
//!       "portfolio_name": "Retirement",
//!       "positions": [
//!         {"symbol": "VTI", "name": "Vanguard Total Stock Market", "price": 250.10, "quantity": 40}
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::application::ports::{InMemoryPortfolioData, PortfolioDataError, PortfolioDataPort};
use crate::domain::session::Identity;
use crate::domain::snapshot::PortfolioHoldings;

#[derive(Debug, Deserialize)]
struct PortfolioFile {
    portfolios: Vec<PortfolioHoldings>,
}

/// Holdings loaded from a JSON file. Visible to every identity.
#[derive(Debug, Default)]
pub struct FilePortfolioData {
    store: InMemoryPortfolioData,
}

impl FilePortfolioData {
    /// Load holdings from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// contains an invalid portfolio.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PortfolioDataError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PortfolioDataError::Unavailable(format!("{}: {e}", path.display()))
        })?;
        let data = Self::from_json(&text)?;

        tracing::info!(
            path = %path.display(),
            portfolios = data.len(),
            "Loaded portfolio holdings"
        );
        Ok(data)
    }

    /// Parse holdings from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid holdings document.
    pub fn from_json(text: &str) -> Result<Self, PortfolioDataError> {
        let file: PortfolioFile =
            serde_json::from_str(text).map_err(|e| PortfolioDataError::Invalid(e.to_string()))?;

        let store = InMemoryPortfolioData::new();
        for holdings in file.portfolios {
            validate(&holdings)?;
            if store.contains(&holdings.portfolio_id) {
                return Err(PortfolioDataError::Invalid(format!(
                    "duplicate portfolio id: {}",
                    holdings.portfolio_id
                )));
            }
            store.insert(holdings);
        }
        Ok(Self { store })
    }

    /// Number of loaded portfolios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if no portfolio was loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

fn validate(holdings: &PortfolioHoldings) -> Result<(), PortfolioDataError> {
    if holdings.portfolio_id.trim().is_empty() {
        return Err(PortfolioDataError::Invalid(
            "portfolio_id cannot be empty".to_string(),
        ));
    }
    let mut total = Decimal::ZERO;
    for position in &holdings.positions {
        if position.symbol.trim().is_empty() {
            return Err(PortfolioDataError::Invalid(format!(
                "empty symbol in portfolio {}",
                holdings.portfolio_id
            )));
        }
        if position.price.is_sign_negative() || position.quantity.is_sign_negative() {
            return Err(PortfolioDataError::Invalid(format!(
                "negative price or quantity for {} in portfolio {}",
                position.symbol, holdings.portfolio_id
            )));
        }
        total = position
            .price
            .checked_mul(position.quantity)
            .and_then(|value| total.checked_add(value))
            .ok_or_else(|| {
                PortfolioDataError::Invalid(format!(
                    "value of {} in portfolio {} is out of range",
                    position.symbol, holdings.portfolio_id
                ))
            })?;
    }
    Ok(())
}

#[async_trait]
impl PortfolioDataPort for FilePortfolioData {
    async fn holdings(
        &self,
        portfolio_id: &str,
        identity: &Identity,
    ) -> Result<Option<PortfolioHoldings>, PortfolioDataError> {
        self.store.holdings(portfolio_id, identity).await
    }
}
