//! Portfolio Snapshot Types
//!
//! A [`Snapshot`] is the unit pushed to clients: one valuation of a portfolio
//! at a point in time, with per-holding prices and deltas against the
//! previous snapshot the client received for the same portfolio.
//!
//! # Generation Policy
//!
//! [`SnapshotGenerator`] is a pure function of its explicit inputs:
//!
//! - No previous snapshot: a fixed baseline (or one seeded from real
//!   holdings) with zero deltas.
//! - Previous snapshot: every price moves by a uniform random factor within
//!   `±max_move_percent`, rounded to cents, and all derived fields are
//!   recomputed.
//!
//! All amounts are [`Decimal`] rounded to two places, so
//! `next.total_value - previous.total_value == next.total_change` exactly.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Constants
// =============================================================================

/// Portfolio id used when a client does not name one.
pub const DEFAULT_PORTFOLIO_ID: &str = "default";

/// Display name of the synthetic default portfolio.
pub const DEFAULT_PORTFOLIO_NAME: &str = "Sample Portfolio";

/// Default maximum per-tick price move, in percent.
pub const DEFAULT_MAX_MOVE_PERCENT: f64 = 2.0;

/// Upper bound accepted for the per-tick price move, in percent.
pub const MAX_MOVE_PERCENT_LIMIT: f64 = 50.0;

const PRICE_SCALE: u32 = 2;

/// Baseline holdings: (symbol, name, price in cents, quantity).
const BASELINE_POSITIONS: [(&str, &str, i64, i64); 3] = [
    ("AAPL", "Apple Inc.", 17_500, 100),
    ("MSFT", "Microsoft Corporation", 35_000, 50),
    ("GOOGL", "Alphabet Inc.", 13_500, 75),
];

// =============================================================================
// Snapshot Model
// =============================================================================

/// One holding line inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Ticker symbol.
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Current price.
    #[serde(with = "number")]
    pub current_price: Decimal,
    /// Signed price change since the previous snapshot.
    #[serde(with = "number")]
    pub change: Decimal,
    /// Price change in percent.
    #[serde(with = "number")]
    pub change_percent: Decimal,
    /// Quantity held.
    #[serde(with = "number")]
    pub quantity: Decimal,
    /// Position value (`current_price * quantity`).
    #[serde(with = "number")]
    pub value: Decimal,
}

/// A point-in-time valuation of one portfolio.
///
/// Snapshots are never mutated after creation; the generator always builds a
/// fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Portfolio the snapshot describes.
    pub portfolio_id: String,
    /// Portfolio display name.
    pub portfolio_name: String,
    /// Generation time.
    pub as_of: DateTime<Utc>,
    /// Sum of all holding values.
    #[serde(with = "number")]
    pub total_value: Decimal,
    /// Signed change of `total_value` since the previous snapshot.
    #[serde(with = "number")]
    pub total_change: Decimal,
    /// `total_change` in percent of the previous total.
    #[serde(with = "number")]
    pub total_change_percent: Decimal,
    /// Holdings, in stable insertion order.
    pub investments: Vec<Holding>,
}

impl Snapshot {
    /// Symbols in snapshot order.
    #[must_use]
    pub fn symbols(&self) -> Vec<&str> {
        self.investments.iter().map(|h| h.symbol.as_str()).collect()
    }
}

// =============================================================================
// Real Holdings (seed data)
// =============================================================================

/// A position as reported by the portfolio data collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSeed {
    /// Ticker symbol.
    pub symbol: String,
    /// Display name. Defaults to the symbol.
    #[serde(default)]
    pub name: Option<String>,
    /// Last known price.
    pub price: Decimal,
    /// Quantity held.
    pub quantity: Decimal,
}

/// Holdings of one portfolio, used to seed a baseline snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioHoldings {
    /// Portfolio id.
    pub portfolio_id: String,
    /// Portfolio display name.
    pub portfolio_name: String,
    /// Positions in display order.
    pub positions: Vec<PositionSeed>,
}

// =============================================================================
// Generator
// =============================================================================

/// Produces snapshots from the previous snapshot and a randomness source.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotGenerator {
    max_move_fraction: f64,
}

impl Default for SnapshotGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MOVE_PERCENT)
    }
}

impl SnapshotGenerator {
    /// Create a generator with the given maximum per-tick move in percent.
    ///
    /// Values outside `(0, 50]` (including NaN) fall back to the default.
    #[must_use]
    pub fn new(max_move_percent: f64) -> Self {
        let percent = if max_move_percent > 0.0 && max_move_percent <= MAX_MOVE_PERCENT_LIMIT {
            max_move_percent
        } else {
            DEFAULT_MAX_MOVE_PERCENT
        };
        Self {
            max_move_fraction: percent / 100.0,
        }
    }

    /// Maximum per-tick move in percent.
    #[must_use]
    pub fn max_move_percent(&self) -> f64 {
        self.max_move_fraction * 100.0
    }

    /// Generate the next snapshot for `portfolio_id`.
    pub fn generate<R: Rng>(
        &self,
        previous: Option<&Snapshot>,
        portfolio_id: &str,
        as_of: DateTime<Utc>,
        rng: &mut R,
    ) -> Snapshot {
        self.generate_seeded(previous, portfolio_id, None, as_of, rng)
    }

    /// Generate the next snapshot, seeding the baseline from real holdings
    /// when there is no previous snapshot.
    ///
    /// A `previous` snapshot that belongs to another portfolio is ignored.
    pub fn generate_seeded<R: Rng>(
        &self,
        previous: Option<&Snapshot>,
        portfolio_id: &str,
        seed: Option<&PortfolioHoldings>,
        as_of: DateTime<Utc>,
        rng: &mut R,
    ) -> Snapshot {
        match previous {
            Some(prev) if prev.portfolio_id == portfolio_id => self.advance(prev, as_of, rng),
            _ => Self::baseline(portfolio_id, seed, as_of),
        }
    }

    /// Build a baseline snapshot with zero deltas.
    ///
    /// Seeds without positions, or whose values cannot be represented, fall
    /// back to the synthetic holdings.
    #[must_use]
    pub fn baseline(
        portfolio_id: &str,
        seed: Option<&PortfolioHoldings>,
        as_of: DateTime<Utc>,
    ) -> Snapshot {
        let (portfolio_name, investments, total) = seed
            .filter(|holdings| !holdings.positions.is_empty())
            .and_then(seeded_baseline)
            .unwrap_or_else(|| synthetic_baseline(portfolio_id));

        Snapshot {
            portfolio_id: portfolio_id.to_string(),
            portfolio_name,
            as_of,
            total_value: total,
            total_change: Decimal::ZERO,
            total_change_percent: Decimal::ZERO,
            investments,
        }
    }

    fn advance<R: Rng>(
        &self,
        previous: &Snapshot,
        as_of: DateTime<Utc>,
        rng: &mut R,
    ) -> Snapshot {
        let moved: Vec<Holding> = previous
            .investments
            .iter()
            .map(|h| {
                let factor = rng.random_range(-self.max_move_fraction..=self.max_move_fraction);
                move_holding(h, factor)
            })
            .collect();

        let next = total_value(&moved)
            .and_then(|total| Some((total, total.checked_sub(previous.total_value)?)));

        // Unrepresentable totals hold the previous prices for this tick.
        let (investments, total, total_change) = match next {
            Some((total, change)) => (moved, total, change),
            None => (
                previous.investments.iter().map(unchanged).collect(),
                previous.total_value,
                Decimal::ZERO,
            ),
        };

        Snapshot {
            portfolio_id: previous.portfolio_id.clone(),
            portfolio_name: previous.portfolio_name.clone(),
            as_of,
            total_value: total,
            total_change,
            total_change_percent: percent_of(total_change, previous.total_value),
            investments,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn default_portfolio_name(portfolio_id: &str) -> String {
    if portfolio_id == DEFAULT_PORTFOLIO_ID {
        DEFAULT_PORTFOLIO_NAME.to_string()
    } else {
        format!("Portfolio {portfolio_id}")
    }
}

fn seeded_baseline(holdings: &PortfolioHoldings) -> Option<(String, Vec<Holding>, Decimal)> {
    let investments = holdings
        .positions
        .iter()
        .map(|p| {
            baseline_holding(
                &p.symbol,
                p.name.as_deref().unwrap_or(&p.symbol),
                p.price,
                p.quantity,
            )
        })
        .collect::<Option<Vec<_>>>()?;
    let total = total_value(&investments)?;
    Some((holdings.portfolio_name.clone(), investments, total))
}

fn synthetic_baseline(portfolio_id: &str) -> (String, Vec<Holding>, Decimal) {
    let investments: Vec<Holding> = BASELINE_POSITIONS
        .iter()
        .filter_map(|&(symbol, name, cents, quantity)| {
            baseline_holding(
                symbol,
                name,
                Decimal::new(cents, PRICE_SCALE),
                Decimal::from(quantity),
            )
        })
        .collect();
    let total = total_value(&investments).unwrap_or(Decimal::ZERO);
    (default_portfolio_name(portfolio_id), investments, total)
}

/// Baseline line for one position; `None` when its value overflows.
fn baseline_holding(
    symbol: &str,
    name: &str,
    price: Decimal,
    quantity: Decimal,
) -> Option<Holding> {
    let price = price.round_dp(PRICE_SCALE).max(min_price());
    let value = price.checked_mul(quantity)?.round_dp(PRICE_SCALE);
    Some(Holding {
        symbol: symbol.to_string(),
        name: name.to_string(),
        current_price: price,
        change: Decimal::ZERO,
        change_percent: Decimal::ZERO,
        quantity,
        value,
    })
}

/// Apply one price move. A move whose price or value overflows keeps the
/// previous price.
fn move_holding(previous: &Holding, factor: f64) -> Holding {
    let factor = Decimal::try_from(factor).unwrap_or(Decimal::ZERO);
    let moved = previous
        .current_price
        .checked_mul(Decimal::ONE + factor)
        .map(|price| price.round_dp(PRICE_SCALE).max(min_price()))
        .and_then(|price| {
            let value = price.checked_mul(previous.quantity)?.round_dp(PRICE_SCALE);
            let change = price.checked_sub(previous.current_price)?;
            Some((price, value, change))
        });

    let Some((price, value, change)) = moved else {
        return unchanged(previous);
    };

    Holding {
        symbol: previous.symbol.clone(),
        name: previous.name.clone(),
        current_price: price,
        change,
        change_percent: percent_of(change, previous.current_price),
        quantity: previous.quantity,
        value,
    }
}

fn unchanged(previous: &Holding) -> Holding {
    Holding {
        change: Decimal::ZERO,
        change_percent: Decimal::ZERO,
        ..previous.clone()
    }
}

fn total_value(investments: &[Holding]) -> Option<Decimal> {
    investments
        .iter()
        .try_fold(Decimal::ZERO, |total, h| total.checked_add(h.value))
}

fn percent_of(change: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        return Decimal::ZERO;
    }
    change
        .checked_div(base)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map_or(Decimal::ZERO, |percent| percent.round_dp(PRICE_SCALE))
}

const fn min_price() -> Decimal {
    Decimal::from_parts(1, 0, 0, false, PRICE_SCALE)
}

/// Serde adapter writing [`Decimal`] as a JSON number.
///
/// Conversion goes through the decimal string so that `178.37` is emitted as
/// `178.37` and parses back to the same decimal. JSON numbers are IEEE-754
/// doubles: values with up to 15 significant digits (cent amounts below
/// 10^13) round-trip exactly, longer ones are rounded to the nearest double.
mod number {
    use super::{Decimal, Deserialize, Deserializer, FromStr, Serializer};

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        let number = f64::from_str(&value.to_string()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_f64(number)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let number = f64::deserialize(deserializer)?;
        Decimal::from_str(&number.to_string()).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn baseline_uses_default_holdings() {
        let snapshot = SnapshotGenerator::baseline(DEFAULT_PORTFOLIO_ID, None, Utc::now());

        assert_eq!(snapshot.portfolio_name, DEFAULT_PORTFOLIO_NAME);
        assert_eq!(snapshot.symbols(), vec!["AAPL", "MSFT", "GOOGL"]);
        assert_eq!(snapshot.investments[0].current_price, dec("175.00"));
        assert_eq!(snapshot.investments[0].value, dec("17500.00"));
        // 17500 + 17500 + 10125
        assert_eq!(snapshot.total_value, dec("45125.00"));
        assert_eq!(snapshot.total_change, Decimal::ZERO);
        assert_eq!(snapshot.total_change_percent, Decimal::ZERO);
    }

    #[test]
    fn unknown_portfolio_still_gets_synthetic_snapshot() {
        let snapshot = SnapshotGenerator::default().generate(
            None,
            "retirement",
            Utc::now(),
            &mut StdRng::seed_from_u64(1),
        );

        assert_eq!(snapshot.portfolio_id, "retirement");
        assert_eq!(snapshot.portfolio_name, "Portfolio retirement");
        assert_eq!(snapshot.investments.len(), 3);
    }

    #[test]
    fn baseline_seeded_from_holdings() {
        let seed = PortfolioHoldings {
            portfolio_id: "p1".to_string(),
            portfolio_name: "Growth".to_string(),
            positions: vec![
                PositionSeed {
                    symbol: "NVDA".to_string(),
                    name: Some("NVIDIA Corporation".to_string()),
                    price: dec("120.555"),
                    quantity: dec("10"),
                },
                PositionSeed {
                    symbol: "TSLA".to_string(),
                    name: None,
                    price: dec("200"),
                    quantity: dec("2.5"),
                },
            ],
        };

        let snapshot = SnapshotGenerator::baseline("p1", Some(&seed), Utc::now());

        assert_eq!(snapshot.portfolio_name, "Growth");
        assert_eq!(snapshot.symbols(), vec!["NVDA", "TSLA"]);
        assert_eq!(snapshot.investments[0].current_price, dec("120.56"));
        assert_eq!(snapshot.investments[1].name, "TSLA");
        assert_eq!(snapshot.total_value, dec("1705.60"));
    }

    #[test]
    fn empty_seed_falls_back_to_synthetic() {
        let seed = PortfolioHoldings {
            portfolio_id: "p1".to_string(),
            portfolio_name: "Empty".to_string(),
            positions: vec![],
        };

        let snapshot = SnapshotGenerator::baseline("p1", Some(&seed), Utc::now());
        assert_eq!(snapshot.symbols(), vec!["AAPL", "MSFT", "GOOGL"]);
    }

    #[test]
    fn previous_for_other_portfolio_is_ignored() {
        let generator = SnapshotGenerator::default();
        let mut rng = StdRng::seed_from_u64(3);
        let other = generator.generate(None, "other", Utc::now(), &mut rng);

        let snapshot =
            generator.generate(Some(&other), DEFAULT_PORTFOLIO_ID, Utc::now(), &mut rng);

        assert_eq!(snapshot.portfolio_id, DEFAULT_PORTFOLIO_ID);
        assert_eq!(snapshot.total_change, Decimal::ZERO);
    }

    #[test]
    fn same_seed_same_sequence() {
        let generator = SnapshotGenerator::default();
        let as_of = Utc::now();
        let base = SnapshotGenerator::baseline(DEFAULT_PORTFOLIO_ID, None, as_of);

        let mut rng_a = StdRng::seed_from_u64(9);
        let mut rng_b = StdRng::seed_from_u64(9);
        let a = generator.generate(Some(&base), DEFAULT_PORTFOLIO_ID, as_of, &mut rng_a);
        let b = generator.generate(Some(&base), DEFAULT_PORTFOLIO_ID, as_of, &mut rng_b);

        assert_eq!(a, b);
    }

    #[test]
    fn invalid_move_percent_uses_default() {
        assert!((SnapshotGenerator::new(0.0).max_move_percent() - 2.0).abs() < 1e-9);
        assert!((SnapshotGenerator::new(f64::NAN).max_move_percent() - 2.0).abs() < 1e-9);
        assert!((SnapshotGenerator::new(75.0).max_move_percent() - 2.0).abs() < 1e-9);
        assert!((SnapshotGenerator::new(5.0).max_move_percent() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn percent_of_zero_base_is_zero() {
        assert_eq!(percent_of(dec("5"), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(percent_of(dec("5"), dec("200")), dec("2.50"));
    }

    #[test]
    fn price_never_drops_below_one_cent() {
        let holding =
            baseline_holding("PENNY", "Penny Stock", dec("0.01"), dec("1000")).unwrap();
        let moved = move_holding(&holding, -0.5);
        assert_eq!(moved.current_price, dec("0.01"));
        assert_eq!(moved.change, Decimal::ZERO);
    }

    fn big_seed(positions: &[(&str, &str)]) -> PortfolioHoldings {
        PortfolioHoldings {
            portfolio_id: "big".to_string(),
            portfolio_name: "Big".to_string(),
            positions: positions
                .iter()
                .map(|&(price, quantity)| PositionSeed {
                    symbol: "X".to_string(),
                    name: None,
                    price: dec(price),
                    quantity: dec(quantity),
                })
                .collect(),
        }
    }

    #[test]
    fn unrepresentable_position_value_falls_back_to_synthetic() {
        let seed = big_seed(&[("70000000000000000000000000000", "10")]);

        let snapshot = SnapshotGenerator::baseline("big", Some(&seed), Utc::now());

        assert_eq!(snapshot.portfolio_name, "Portfolio big");
        assert_eq!(snapshot.symbols(), vec!["AAPL", "MSFT", "GOOGL"]);
        assert_eq!(snapshot.total_value, dec("45125.00"));
    }

    #[test]
    fn unrepresentable_total_falls_back_to_synthetic() {
        let seed = big_seed(&[
            ("50000000000000000000000000", "1000"),
            ("50000000000000000000000000", "1000"),
        ]);

        let snapshot = SnapshotGenerator::baseline("big", Some(&seed), Utc::now());
        assert_eq!(snapshot.symbols(), vec!["AAPL", "MSFT", "GOOGL"]);
    }

    #[test]
    fn overflowing_move_keeps_previous_price() {
        let holding =
            baseline_holding("X", "X", dec("79000000000000000000000000"), dec("1000")).unwrap();

        let moved = move_holding(&holding, 0.02);

        assert_eq!(moved.current_price, holding.current_price);
        assert_eq!(moved.value, holding.value);
        assert_eq!(moved.change, Decimal::ZERO);
    }

    #[test]
    fn ticks_near_decimal_limit_stay_consistent() {
        let generator = SnapshotGenerator::default();
        let seed = big_seed(&[
            ("39000000000000000000000000", "1000"),
            ("39000000000000000000000000", "1000"),
        ]);
        let base = SnapshotGenerator::baseline("big", Some(&seed), Utc::now());
        assert_eq!(base.portfolio_name, "Big");

        for rng_seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(rng_seed);
            let next = generator.generate(Some(&base), "big", Utc::now(), &mut rng);

            assert_eq!(next.total_value - base.total_value, next.total_change);
            assert_eq!(
                next.investments.iter().map(|h| h.value).sum::<Decimal>(),
                next.total_value
            );
        }
    }

    #[test]
    fn percent_of_huge_ratio_is_zero() {
        assert_eq!(
            percent_of(dec("79000000000000000000000000000"), dec("0.01")),
            Decimal::ZERO
        );
    }

    #[test]
    fn fifteen_digit_amounts_round_trip_exactly() {
        let mut snapshot = SnapshotGenerator::baseline(DEFAULT_PORTFOLIO_ID, None, Utc::now());
        snapshot.total_value = dec("1234567890123.45");

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: Snapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.total_value, snapshot.total_value);
        assert_eq!(parsed.investments, snapshot.investments);
    }

    #[test]
    fn snapshot_json_shape() {
        let snapshot = SnapshotGenerator::baseline(DEFAULT_PORTFOLIO_ID, None, Utc::now());
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["portfolio_id"], "default");
        assert_eq!(value["total_value"], 45125.0);
        assert_eq!(value["investments"][0]["symbol"], "AAPL");
        assert_eq!(value["investments"][0]["current_price"], 175.0);
        assert_eq!(value["investments"][2]["quantity"], 75.0);
    }

    proptest! {
        #[test]
        fn ticks_stay_bounded_and_consistent(seed in any::<u64>(), ticks in 1usize..20) {
            let generator = SnapshotGenerator::default();
            let mut rng = StdRng::seed_from_u64(seed);
            let mut previous = SnapshotGenerator::baseline(DEFAULT_PORTFOLIO_ID, None, Utc::now());

            for _ in 0..ticks {
                let next =
                    generator.generate(Some(&previous), DEFAULT_PORTFOLIO_ID, Utc::now(), &mut rng);

                prop_assert_eq!(next.symbols(), previous.symbols());
                prop_assert_eq!(next.total_value - previous.total_value, next.total_change);
                prop_assert_eq!(
                    next.investments.iter().map(|h| h.value).sum::<Decimal>(),
                    next.total_value
                );

                for (old, new) in previous.investments.iter().zip(&next.investments) {
                    let bound = old.current_price * Decimal::new(2, 2) + Decimal::new(1, 2);
                    prop_assert!(new.change.abs() <= bound);
                    prop_assert_eq!(new.current_price - old.current_price, new.change);
                    prop_assert_eq!(new.quantity, old.quantity);
                }

                previous = next;
            }
        }
    }
}
