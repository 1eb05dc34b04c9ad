//! Funding-rate aggregation across the two venues.

use crate::error::HedgeError;
use crate::exchange::{normalize_symbol, FundingSnapshot, VenueClient};
use crate::position::HedgeDirection;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

/// One symbol listed on both venues.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFundingRow {
    pub symbol: String,
    pub primary: FundingSnapshot,
    pub secondary: FundingSnapshot,
    /// Secondary rate minus primary rate
    pub fr_diff: Decimal,
}

impl MergedFundingRow {
    pub fn direction(&self) -> HedgeDirection {
        HedgeDirection::from_fr_diff(self.fr_diff)
    }
}

/// Joined funding view for one tick.
#[derive(Debug, Clone, Default)]
pub struct MergedFundingView {
    /// Sorted by `fr_diff` descending, then symbol
    pub rows: Vec<MergedFundingRow>,
    primary_min: Option<DateTime<Utc>>,
    secondary_min: Option<DateTime<Utc>>,
}

impl MergedFundingView {
    /// Inner-join both venues' tables on normalized symbol.
    pub fn merge(primary: &[FundingSnapshot], secondary: &[FundingSnapshot]) -> Self {
        let secondary_by_symbol: HashMap<String, &FundingSnapshot> = secondary
            .iter()
            .map(|s| (normalize_symbol(&s.symbol), s))
            .collect();

        // Keyed so a venue repeating a symbol still yields one row.
        let mut joined: HashMap<String, MergedFundingRow> = HashMap::new();
        for p in primary {
            let symbol = normalize_symbol(&p.symbol);
            if let Some(s) = secondary_by_symbol.get(&symbol) {
                joined.insert(
                    symbol.clone(),
                    MergedFundingRow {
                        symbol,
                        primary: p.clone(),
                        secondary: (*s).clone(),
                        fr_diff: s.funding_rate - p.funding_rate,
                    },
                );
            }
        }

        let mut rows: Vec<MergedFundingRow> = joined.into_values().collect();
        rows.sort_by(|a, b| {
            b.fr_diff
                .cmp(&a.fr_diff)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        Self {
            rows,
            primary_min: primary.iter().map(|s| s.next_funding).min(),
            secondary_min: secondary.iter().map(|s| s.next_funding).min(),
        }
    }

    /// The earlier of the two venues' global minimum next-funding instants.
    pub fn next_funding_instant(&self) -> Option<DateTime<Utc>> {
        match (self.primary_min, self.secondary_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Rows whose funding settles at `instant` on both venues.
    pub fn filter_aligned(&self, instant: DateTime<Utc>) -> Vec<&MergedFundingRow> {
        self.rows
            .iter()
            .filter(|r| r.primary.next_funding == instant && r.secondary.next_funding == instant)
            .collect()
    }

    /// Aligned rows with `|fr_diff| >= threshold`, best first.
    ///
    /// Ordering is by `|fr_diff|` descending with ties broken by symbol, so
    /// the selection is deterministic.
    pub fn candidates(&self, instant: DateTime<Utc>, threshold: Decimal) -> Vec<MergedFundingRow> {
        let mut candidates: Vec<MergedFundingRow> = self
            .filter_aligned(instant)
            .into_iter()
            .filter(|r| r.fr_diff.abs() >= threshold)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.fr_diff
                .abs()
                .cmp(&a.fr_diff.abs())
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        candidates
    }

    pub fn get(&self, symbol: &str) -> Option<&MergedFundingRow> {
        self.rows.iter().find(|r| r.symbol == symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Polls both venues and builds the merged view.
pub struct FundingRateAggregator {
    primary: Arc<dyn VenueClient>,
    secondary: Arc<dyn VenueClient>,
}

impl FundingRateAggregator {
    pub fn new(primary: Arc<dyn VenueClient>, secondary: Arc<dyn VenueClient>) -> Self {
        Self { primary, secondary }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<MergedFundingView, HedgeError> {
        let (primary, secondary) = tokio::join!(
            self.primary.funding_snapshot(),
            self.secondary.funding_snapshot()
        );
        let primary = primary
            .map_err(|e| HedgeError::transient(self.primary.venue(), "funding snapshot", e))?;
        let secondary = secondary
            .map_err(|e| HedgeError::transient(self.secondary.venue(), "funding snapshot", e))?;

        let view = MergedFundingView::merge(&primary, &secondary);
        debug!(
            primary = primary.len(),
            secondary = secondary.len(),
            merged = view.rows.len(),
            "Merged funding snapshots"
        );
        Ok(view)
    }

    /// Shared symbols whose funding intervals differ between the venues.
    #[instrument(skip(self))]
    pub async fn funding_interval_mismatches(&self) -> Result<BTreeSet<String>, HedgeError> {
        let (primary, secondary) = tokio::join!(
            self.primary.funding_intervals(),
            self.secondary.funding_intervals()
        );
        let primary = primary
            .map_err(|e| HedgeError::transient(self.primary.venue(), "funding intervals", e))?;
        let secondary = secondary
            .map_err(|e| HedgeError::transient(self.secondary.venue(), "funding intervals", e))?;

        let mismatches = interval_mismatches(&primary, &secondary);
        debug!(count = mismatches.len(), "Funding interval mismatches");
        Ok(mismatches)
    }
}

/// Symbols present in both maps with different interval hours.
pub fn interval_mismatches(
    primary: &HashMap<String, u32>,
    secondary: &HashMap<String, u32>,
) -> BTreeSet<String> {
    primary
        .iter()
        .filter(|(symbol, hours)| secondary.get(*symbol).is_some_and(|h| h != *hours))
        .map(|(symbol, _)| symbol.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockOp, MockVenue, Venue};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn snap(symbol: &str, rate: Decimal, next: DateTime<Utc>) -> FundingSnapshot {
        FundingSnapshot {
            symbol: symbol.to_string(),
            mark_price: dec!(100),
            funding_rate: rate,
            next_funding: next,
        }
    }

    #[test]
    fn test_merge_one_row_per_shared_symbol() {
        let primary = vec![
            snap("BTCUSDT", dec!(0.0001), at(8)),
            snap("ETHUSDT", dec!(0.0002), at(8)),
            snap("ETHUSDT", dec!(0.0002), at(8)),
            snap("SOLUSDT", dec!(0.0003), at(8)),
        ];
        let secondary = vec![
            snap("BTC_USDT", dec!(0.0004), at(8)),
            snap("ETH_USDT", dec!(-0.0001), at(8)),
            snap("DOGE_USDT", dec!(0.001), at(8)),
        ];

        let view = MergedFundingView::merge(&primary, &secondary);
        let symbols: Vec<&str> = view.rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(view.get("BTCUSDT").unwrap().fr_diff, dec!(0.0003));
        assert_eq!(view.get("ETHUSDT").unwrap().fr_diff, dec!(-0.0003));
    }

    #[test]
    fn test_next_funding_instant_uses_global_minimum() {
        let primary = vec![
            snap("BTCUSDT", dec!(0.0001), at(8)),
            snap("XYZUSDT", dec!(0.0001), at(4)),
        ];
        let secondary = vec![snap("BTC_USDT", dec!(0.0001), at(8))];

        let view = MergedFundingView::merge(&primary, &secondary);
        // XYZ is not shared but still sets the primary venue's minimum.
        assert_eq!(view.next_funding_instant(), Some(at(4)));
        assert!(view.filter_aligned(at(4)).is_empty());
        assert_eq!(view.filter_aligned(at(8)).len(), 1);
    }

    #[test]
    fn test_filter_aligned_requires_both_venues() {
        let primary = vec![
            snap("BTCUSDT", dec!(0.0001), at(8)),
            snap("ETHUSDT", dec!(0.0001), at(8)),
        ];
        let secondary = vec![
            snap("BTC_USDT", dec!(0.0002), at(8)),
            snap("ETH_USDT", dec!(0.0002), at(12)),
        ];

        let view = MergedFundingView::merge(&primary, &secondary);
        let aligned = view.filter_aligned(at(8));
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].symbol, "BTCUSDT");
    }

    #[test]
    fn test_candidate_selects_type1_on_positive_diff() {
        let primary = vec![
            snap("BTCUSDT", dec!(0.001), at(8)),
            snap("ETHUSDT", dec!(0.0001), at(8)),
        ];
        let secondary = vec![
            snap("BTC_USDT", dec!(0.004), at(8)),
            snap("ETH_USDT", dec!(0.0002), at(8)),
        ];

        let view = MergedFundingView::merge(&primary, &secondary);
        let candidates = view.candidates(at(8), dec!(0.0005));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "BTCUSDT");
        assert_eq!(candidates[0].fr_diff, dec!(0.003));
        assert_eq!(candidates[0].direction(), HedgeDirection::Type1);
    }

    #[test]
    fn test_candidate_ties_break_by_symbol() {
        let primary = vec![
            snap("BBBUSDT", dec!(0.001), at(8)),
            snap("AAAUSDT", dec!(0.004), at(8)),
        ];
        let secondary = vec![
            snap("BBB_USDT", dec!(0.004), at(8)),
            snap("AAA_USDT", dec!(0.001), at(8)),
        ];

        let view = MergedFundingView::merge(&primary, &secondary);
        let candidates = view.candidates(at(8), dec!(0.0005));
        assert_eq!(candidates[0].symbol, "AAAUSDT");
        assert_eq!(candidates[0].direction(), HedgeDirection::Type2);
        assert_eq!(candidates[1].symbol, "BBBUSDT");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_transient() {
        let primary = Arc::new(MockVenue::new(Venue::Binance));
        let secondary = Arc::new(MockVenue::new(Venue::Gate));
        secondary.fail(MockOp::FundingSnapshot).await;

        let aggregator = FundingRateAggregator::new(primary, secondary);
        let err = aggregator.fetch().await.unwrap_err();
        assert!(matches!(err, HedgeError::TransientVenue { venue: Venue::Gate, .. }));
    }

    #[tokio::test]
    async fn test_interval_mismatches_only_for_shared_symbols() {
        let primary = MockVenue::new(Venue::Binance);
        let secondary = MockVenue::new(Venue::Gate);
        primary
            .set_intervals(HashMap::from([
                ("BTCUSDT".to_string(), 8),
                ("AEVOUSDT".to_string(), 4),
                ("ONLYBNUSDT".to_string(), 1),
            ]))
            .await;
        secondary
            .set_intervals(HashMap::from([
                ("BTCUSDT".to_string(), 8),
                ("AEVOUSDT".to_string(), 8),
                ("ONLYGTUSDT".to_string(), 4),
            ]))
            .await;

        let aggregator = FundingRateAggregator::new(Arc::new(primary), Arc::new(secondary));
        let mismatches = aggregator.funding_interval_mismatches().await.unwrap();
        assert_eq!(mismatches, BTreeSet::from(["AEVOUSDT".to_string()]));
    }
}
