//! Startup reconciliation of venue positions into the ledger.

use super::hedge::{HedgeDirection, HedgePosition};
use super::ledger::PositionLedger;
use crate::alert::{raise_breach, Alerter};
use crate::error::{FatalBreach, HedgeError};
use crate::exchange::{PositionSide, Venue, VenueClient, VenuePosition};
use crate::strategy::MergedFundingView;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Symbols restored as open hedges
    pub restored: Vec<String>,
    /// Breaches raised for one-sided or inconsistent positions
    pub breaches: Vec<FatalBreach>,
}

/// Rebuild the ledger from what both venues actually hold.
///
/// Opposite-side pairs become `Open` hedges. Anything else is a naked leg:
/// it is alerted and the symbol is halted.
pub async fn recover_positions(
    primary: &dyn VenueClient,
    secondary: &dyn VenueClient,
    view: &MergedFundingView,
    ledger: &PositionLedger,
    alerter: &dyn Alerter,
    now: DateTime<Utc>,
) -> Result<RecoveryReport, HedgeError> {
    let (primary_positions, secondary_positions) =
        tokio::join!(primary.open_positions(), secondary.open_positions());
    let primary_positions = primary_positions
        .map_err(|e| HedgeError::transient(primary.venue(), "open positions", e))?;
    let secondary_positions = secondary_positions
        .map_err(|e| HedgeError::transient(secondary.venue(), "open positions", e))?;

    let by_symbol = |positions: Vec<VenuePosition>| {
        let mut grouped: BTreeMap<String, Vec<VenuePosition>> = BTreeMap::new();
        for p in positions {
            grouped.entry(p.symbol.clone()).or_default().push(p);
        }
        grouped
    };
    let primary_positions = by_symbol(primary_positions);
    let secondary_positions = by_symbol(secondary_positions);

    let symbols: BTreeSet<&String> = primary_positions
        .keys()
        .chain(secondary_positions.keys())
        .collect();

    let mut report = RecoveryReport::default();
    for symbol in symbols {
        let a = primary_positions.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let b = secondary_positions.get(symbol).map(Vec::as_slice).unwrap_or(&[]);

        match classify(symbol, a, b) {
            Ok((direction, primary_leg, secondary_leg)) => {
                let funding_instant = funding_instant_for(symbol, view).unwrap_or(now);
                let position = HedgePosition::open(
                    symbol,
                    direction,
                    primary_leg.size,
                    primary_leg.entry_price,
                    secondary_leg.size,
                    secondary_leg.entry_price,
                    funding_instant,
                    now,
                );
                ledger.insert(position)?;
                info!(%symbol, %direction, %funding_instant, "♻️ Restored hedge");
                report.restored.push(symbol.clone());
            }
            Err(breach) => {
                raise_breach(alerter, &breach, now).await;
                ledger.halt(breach.clone(), now);
                report.breaches.push(breach);
            }
        }
    }

    Ok(report)
}

fn classify<'a>(
    symbol: &str,
    primary: &'a [VenuePosition],
    secondary: &'a [VenuePosition],
) -> Result<(HedgeDirection, &'a VenuePosition, &'a VenuePosition), FatalBreach> {
    match (primary, secondary) {
        ([a], [b]) => match (a.side, b.side) {
            (PositionSide::Long, PositionSide::Short) => Ok((HedgeDirection::Type1, a, b)),
            (PositionSide::Short, PositionSide::Long) => Ok((HedgeDirection::Type2, a, b)),
            _ => Err(FatalBreach::orphan(
                symbol,
                Venue::Binance,
                format!("both legs {:?}", a.side),
            )),
        },
        ([], [_]) => Err(FatalBreach::orphan(symbol, Venue::Gate, "no Binance counterpart")),
        ([_], []) => Err(FatalBreach::orphan(symbol, Venue::Binance, "no Gate counterpart")),
        _ => Err(FatalBreach::orphan(
            symbol,
            Venue::Binance,
            format!(
                "ambiguous legs: {} on Binance, {} on Gate",
                primary.len(),
                secondary.len()
            ),
        )),
    }
}

/// Funding instant for a restored hedge. On disagreement the secondary
/// venue's value is used.
///
/// Venues only report the upcoming settlement, so a hedge restored after
/// its settlement is keyed to the next one. Reversal exits are unaffected.
fn funding_instant_for(symbol: &str, view: &MergedFundingView) -> Option<DateTime<Utc>> {
    let row = view.get(symbol)?;
    if row.primary.next_funding != row.secondary.next_funding {
        warn!(
            %symbol,
            binance = %row.primary.next_funding,
            gate = %row.secondary.next_funding,
            "Venues disagree on next funding time, using Gate's"
        );
    }
    Some(row.secondary.next_funding)
}
