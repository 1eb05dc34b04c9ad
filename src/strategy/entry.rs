//! Two-leg entry with compensating rollback.
//!
//! Both market orders are dispatched together and both results are joined
//! before anything is committed. A hedge is recorded only when both legs
//! are confirmed filled; any executed quantity short of that, including
//! partial fills, is closed again immediately.

use super::aggregator::{MergedFundingRow, MergedFundingView};
use super::sizing::{ContractSpecResolver, TradeSizing};
use crate::alert::{notify_operator, raise_breach, Alerter};
use crate::clock::Clock;
use crate::config::StrategyConfig;
use crate::error::{FatalBreach, HedgeError};
use crate::exchange::{ContractSpec, OrderResult, PositionSide, VenueClient};
use crate::persistence::{JournalAction, TradeJournal};
use crate::position::{HedgeDirection, HedgeLeg, HedgePosition, PositionLedger};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one pass over the candidate list.
#[derive(Debug, Default)]
pub struct EntryTickReport {
    pub opened: Vec<HedgePosition>,
    pub skipped: Vec<(String, String)>,
    pub breaches: Vec<FatalBreach>,
}

pub struct EntryCoordinator {
    primary: Arc<dyn VenueClient>,
    secondary: Arc<dyn VenueClient>,
    ledger: Arc<PositionLedger>,
    journal: Arc<TradeJournal>,
    alerter: Arc<dyn Alerter>,
    clock: Arc<dyn Clock>,
    resolver: ContractSpecResolver,
    config: StrategyConfig,
}

/// One leg's order result, or why there is none.
type LegOutcome = Result<OrderResult>;

impl EntryCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        primary: Arc<dyn VenueClient>,
        secondary: Arc<dyn VenueClient>,
        ledger: Arc<PositionLedger>,
        journal: Arc<TradeJournal>,
        alerter: Arc<dyn Alerter>,
        clock: Arc<dyn Clock>,
        config: StrategyConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            ledger,
            journal,
            alerter,
            clock,
            resolver: ContractSpecResolver,
            config,
        }
    }

    /// Walk the candidates for the next funding instant, best first.
    #[instrument(skip(self, view))]
    pub async fn run_tick(&self, view: &MergedFundingView) -> EntryTickReport {
        let mut report = EntryTickReport::default();
        let Some(instant) = view.next_funding_instant() else {
            debug!("No funding instant in view");
            return report;
        };

        let candidates = view.candidates(instant, self.config.entry_threshold);
        info!(
            %instant,
            count = candidates.len(),
            best = candidates.first().map(|c| c.symbol.as_str()).unwrap_or("-"),
            "📋 Entry candidates"
        );

        for candidate in &candidates {
            if report.opened.len() >= self.config.max_entries_per_tick {
                break;
            }
            match self.try_enter(candidate, instant).await {
                Ok(position) => report.opened.push(position),
                Err(e) if e.stops_entry_tick() => {
                    info!(symbol = %candidate.symbol, "{}; stopping this tick", e);
                    break;
                }
                Err(HedgeError::Fatal(breach)) => report.breaches.push(breach),
                Err(e) => {
                    match &e {
                        HedgeError::TransientVenue { .. } => warn!(symbol = %candidate.symbol, "{}", e),
                        _ => info!(symbol = %candidate.symbol, "Skipping: {}", e),
                    }
                    report.skipped.push((candidate.symbol.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Run the full entry sequence for one candidate.
    #[instrument(skip(self, row), fields(symbol = %row.symbol, fr_diff = %row.fr_diff))]
    pub async fn try_enter(
        &self,
        row: &MergedFundingRow,
        funding_instant: DateTime<Utc>,
    ) -> Result<HedgePosition, HedgeError> {
        let symbol = row.symbol.as_str();

        let remaining = funding_instant - self.clock.now();
        if remaining < self.config.min_time_to_funding() {
            return Err(HedgeError::FundingTooClose {
                symbol: symbol.to_string(),
                seconds_left: remaining.num_seconds(),
            });
        }

        let _claim = self.ledger.claim_for_entry(symbol)?;

        self.check_balances().await?;
        let (primary_spec, secondary_spec) = self.fetch_specs(symbol).await?;
        let sizing = self
            .resolver
            .resolve(self.config.trade_amount, &primary_spec, &secondary_spec)
            .map_err(|reason| HedgeError::SizingInfeasible {
                symbol: symbol.to_string(),
                reason,
            })?;

        self.prepare_leverage(symbol).await;

        let direction = row.direction();
        info!(
            %symbol,
            %direction,
            primary_size = %sizing.primary_size,
            secondary_size = %sizing.secondary_size,
            "🚀 Opening hedge"
        );

        let (primary_result, secondary_result) = tokio::join!(
            self.primary
                .place_market_order(symbol, direction.primary_side(), sizing.primary_size),
            self.secondary
                .place_market_order(symbol, direction.secondary_side(), sizing.secondary_size),
        );

        if let (Ok(a), Ok(b)) = (&primary_result, &secondary_result) {
            if a.filled && b.filled {
                return self
                    .commit(
                        symbol,
                        direction,
                        funding_instant,
                        &sizing,
                        (a, &primary_spec),
                        (b, &secondary_spec),
                    )
                    .await;
            }
        }

        let legs = [
            EntryLeg {
                client: &*self.primary,
                side: direction.primary_side(),
                planned: sizing.primary_size,
                outcome: primary_result,
            },
            EntryLeg {
                client: &*self.secondary,
                side: direction.secondary_side(),
                planned: sizing.secondary_size,
                outcome: secondary_result,
            },
        ];
        self.unwind(symbol, legs).await
    }

    async fn check_balances(&self) -> Result<(), HedgeError> {
        let (a, b) = tokio::join!(
            self.primary.available_balance(),
            self.secondary.available_balance()
        );
        for (client, balance) in [(&self.primary, a), (&self.secondary, b)] {
            let available =
                balance.map_err(|e| HedgeError::transient(client.venue(), "balance", e))?;
            if available < self.config.trade_amount {
                return Err(HedgeError::InsufficientBalance {
                    venue: client.venue(),
                    available,
                    required: self.config.trade_amount,
                });
            }
        }
        Ok(())
    }

    async fn fetch_specs(&self, symbol: &str) -> Result<(ContractSpec, ContractSpec), HedgeError> {
        let (a, b) = tokio::join!(
            self.primary.contract_spec(symbol),
            self.secondary.contract_spec(symbol)
        );
        let a = a.map_err(|e| HedgeError::transient(self.primary.venue(), "contract spec", e))?;
        let b = b.map_err(|e| HedgeError::transient(self.secondary.venue(), "contract spec", e))?;

        for (client, spec) in [(&self.primary, &a), (&self.secondary, &b)] {
            if !spec.is_tradable() {
                return Err(HedgeError::ContractNotTradable {
                    symbol: symbol.to_string(),
                    venue: client.venue(),
                    status: format!("{:?}", spec.status),
                });
            }
        }
        Ok((a, b))
    }

    /// Leverage is idempotent; a failure here is logged and entry proceeds.
    async fn prepare_leverage(&self, symbol: &str) {
        let leverage = self.config.leverage;
        let (a, b) = tokio::join!(
            self.primary.set_leverage(symbol, leverage),
            self.secondary.set_leverage(symbol, leverage)
        );
        for (client, result) in [(&self.primary, a), (&self.secondary, b)] {
            if let Err(e) = result {
                warn!(%symbol, venue = %client.venue(), "Failed to set leverage: {:#}", e);
            }
        }
    }

    async fn commit(
        &self,
        symbol: &str,
        direction: HedgeDirection,
        funding_instant: DateTime<Utc>,
        sizing: &TradeSizing,
        primary: (&OrderResult, &ContractSpec),
        secondary: (&OrderResult, &ContractSpec),
    ) -> Result<HedgePosition, HedgeError> {
        let now = self.clock.now();
        self.journal.record(now, symbol, JournalAction::Open, primary.0);
        self.journal.record(now, symbol, JournalAction::Open, secondary.0);

        let (primary_price, secondary_price) = tokio::join!(
            self.fill_price(&*self.primary, symbol, primary),
            self.fill_price(&*self.secondary, symbol, secondary),
        );

        let position = HedgePosition::open(
            symbol,
            direction,
            filled_size(primary.0, sizing.primary_size),
            primary_price,
            filled_size(secondary.0, sizing.secondary_size),
            secondary_price,
            funding_instant,
            now,
        );

        self.ledger.insert(position.clone())?;
        info!(
            %symbol,
            %direction,
            primary_entry = %primary_price,
            secondary_entry = %secondary_price,
            "✅ Hedge opened"
        );
        notify_operator(
            &*self.alerter,
            &format!(
                "✅ Opened {} hedge on {}: Binance {:?} {} @ {}, Gate {:?} {} @ {}",
                direction,
                symbol,
                position.primary.side,
                position.primary.size,
                primary_price,
                position.secondary.side,
                position.secondary.size,
                secondary_price
            ),
        )
        .await;
        Ok(position)
    }

    /// Average fill price, queried when the order response omitted it.
    async fn fill_price(
        &self,
        client: &dyn VenueClient,
        symbol: &str,
        (order, spec): (&OrderResult, &ContractSpec),
    ) -> Decimal {
        if let Some(price) = order.fill_price {
            return price;
        }
        match client.order_fill_price(symbol, &order.order_id).await {
            Ok(Some(price)) => price,
            Ok(None) => {
                warn!(%symbol, venue = %client.venue(), "Fill price unavailable, using contract price");
                spec.price
            }
            Err(e) => {
                warn!(%symbol, venue = %client.venue(), "Fill price query failed: {:#}", e);
                spec.price
            }
        }
    }

    /// Roll back an entry where at least one leg did not fully fill.
    ///
    /// Every leg with executed quantity is closed again. An acknowledged
    /// order that executed nothing and cannot be cancelled may still fill,
    /// so it counts as open exposure.
    async fn unwind(
        &self,
        symbol: &str,
        legs: [EntryLeg<'_>; 2],
    ) -> Result<HedgePosition, HedgeError> {
        let mut executed_on = Vec::new();
        let mut breaches = Vec::new();

        for leg in &legs {
            let venue = leg.client.venue();
            let order = match &leg.outcome {
                Ok(order) => order,
                Err(e) => {
                    warn!(%symbol, %venue, "Entry leg failed: {:#}", e);
                    continue;
                }
            };
            let executed = executed_size(order, leg.planned);

            if !order.filled {
                warn!(%symbol, %venue, order_id = %order.order_id, filled_qty = %order.filled_qty, "Entry leg not filled");
                if let Err(e) = leg.client.cancel_order(symbol, &order.order_id).await {
                    match executed {
                        // A partly executed market order has already finished.
                        Some(_) => debug!(%symbol, %venue, "Partial entry order not cancellable: {:#}", e),
                        None => breaches.push(FatalBreach::hedge(
                            symbol,
                            venue,
                            format!(
                                "entry order {} could not be cancelled and may still fill: {:#}",
                                order.order_id, e
                            ),
                        )),
                    }
                }
            }

            let Some(size) = executed else { continue };
            executed_on.push(venue);
            self.journal
                .record(self.clock.now(), symbol, JournalAction::Open, order);
            if let Err(detail) = self.compensate(symbol, leg, order, size).await {
                breaches.push(FatalBreach::hedge(symbol, venue, detail));
            }
        }

        if let Some(breach) = breaches.first().cloned() {
            let now = self.clock.now();
            for b in &breaches {
                error!(%symbol, venue = %b.open_leg, "{}", b);
                raise_breach(&*self.alerter, b, now).await;
            }
            self.ledger.halt(breach.clone(), now);
            return Err(breach.into());
        }

        match executed_on.first() {
            Some(&filled) => Err(HedgeError::EntryPartialFillMismatch {
                symbol: symbol.to_string(),
                filled,
            }),
            None => Err(HedgeError::EntryNotFilled {
                symbol: symbol.to_string(),
            }),
        }
    }

    /// Close `size` of an executed entry leg. The error says why it stays open.
    async fn compensate(
        &self,
        symbol: &str,
        leg: &EntryLeg<'_>,
        order: &OrderResult,
        size: Decimal,
    ) -> Result<(), String> {
        let venue = leg.client.venue();
        let close = HedgeLeg {
            venue,
            side: leg.side,
            size,
            entry_price: order.fill_price.unwrap_or_default(),
        }
        .close_order(leg.client.close_convention());

        warn!(%symbol, %venue, %size, "↩️ Compensating executed entry leg");
        match leg.client.close_market(symbol, &close).await {
            Ok(result) => {
                self.journal
                    .record(self.clock.now(), symbol, JournalAction::Compensate, &result);
                if result.filled {
                    info!(%symbol, %venue, "Compensating close filled");
                    Ok(())
                } else {
                    Err(format!("compensating close {} not confirmed filled", result.order_id))
                }
            }
            Err(e) => Err(format!("compensating close failed: {:#}", e)),
        }
    }
}

/// One submitted entry leg.
struct EntryLeg<'a> {
    client: &'a dyn VenueClient,
    side: PositionSide,
    planned: Decimal,
    outcome: LegOutcome,
}

/// Quantity an entry order executed, if any. Partial fills count.
fn executed_size(order: &OrderResult, planned: Decimal) -> Option<Decimal> {
    if order.filled {
        Some(filled_size(order, planned))
    } else if order.filled_qty > Decimal::ZERO {
        Some(order.filled_qty)
    } else {
        None
    }
}

fn filled_size(order: &OrderResult, planned: Decimal) -> Decimal {
    if order.filled_qty > Decimal::ZERO {
        order.filled_qty
    } else {
        planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BreachKind;
    use crate::exchange::mock::OrderCall;
    use crate::exchange::{MockOp, Venue};
    use crate::persistence::JournalAction;
    use crate::position::HedgeState;
    use crate::strategy::fixtures::*;
    use crate::strategy::SizingError;
    use rust_decimal_macros::dec;

    fn config() -> StrategyConfig {
        StrategyConfig {
            trade_amount: dec!(200),
            ..StrategyConfig::default()
        }
    }

    /// Gate pays 0.001 more than Binance, a type1 candidate.
    fn view() -> MergedFundingView {
        view_with_rates(dec!(0.0001), dec!(0.0011))
    }

    fn candidate() -> MergedFundingRow {
        view().get(SYMBOL).cloned().unwrap()
    }

    #[tokio::test]
    async fn test_opens_matched_hedge() {
        let h = Harness::new(at(7, 58, 30)).await;
        let entry = h.entry(quiet_alerter(), config());

        let report = entry.run_tick(&view()).await;
        assert_eq!(report.opened.len(), 1);

        let hedge = h.ledger.get(SYMBOL).unwrap();
        assert_eq!(hedge.direction, HedgeDirection::Type1);
        assert_eq!(hedge.state, HedgeState::Open);
        assert_eq!(hedge.primary.size, dec!(0.003));
        assert_eq!(hedge.secondary.size, dec!(30));
        assert_eq!(hedge.primary.entry_price, dec!(65010));
        assert_eq!(hedge.secondary.entry_price, dec!(65000));
        assert_eq!(hedge.funding_instant, funding_instant());

        assert_eq!(
            h.primary.position(SYMBOL).await.unwrap().side,
            PositionSide::Long
        );
        assert_eq!(
            h.secondary.position(SYMBOL).await.unwrap().side,
            PositionSide::Short
        );
        assert_eq!(h.journal_actions().len(), 2);
        assert!(h
            .journal_actions()
            .iter()
            .all(|(_, action)| action == &JournalAction::Open.to_string()));
    }

    #[tokio::test]
    async fn test_single_fill_is_compensated() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.secondary.fail(MockOp::MarketOrder).await;
        let entry = h.entry(alerter_expecting_breaches(0), config());

        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();

        assert!(matches!(
            err,
            HedgeError::EntryPartialFillMismatch {
                filled: Venue::Binance,
                ..
            }
        ));
        assert!(h.ledger.is_empty());
        assert!(!h.ledger.is_halted(SYMBOL));
        assert!(h.primary.position(SYMBOL).await.is_none());

        let close = h
            .primary
            .calls()
            .await
            .into_iter()
            .find(|c| c.op == MockOp::CloseMarket)
            .unwrap();
        assert_eq!(close.side, Some(PositionSide::Long));
        assert_eq!(close.size, Some(dec!(0.003)));
        assert_eq!(
            h.journal_actions(),
            vec![
                ("BN".to_string(), "open".to_string()),
                ("BN".to_string(), "compensate".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_compensation_halts_symbol() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.secondary.fail(MockOp::MarketOrder).await;
        h.primary.fail(MockOp::CloseMarket).await;
        let entry = h.entry(alerter_expecting_breaches(1), config());

        let report = entry.run_tick(&view()).await;

        assert!(report.opened.is_empty());
        assert_eq!(report.breaches.len(), 1);
        assert_eq!(report.breaches[0].kind, BreachKind::Hedge);
        assert_eq!(report.breaches[0].open_leg, Venue::Binance);
        assert!(h.ledger.is_halted(SYMBOL));
        assert!(h.ledger.is_empty());
        assert!(h.primary.position(SYMBOL).await.is_some());

        // Halted symbols are not entered again.
        h.secondary.clear_failure(MockOp::MarketOrder).await;
        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();
        assert!(matches!(err, HedgeError::SymbolHalted { .. }));
    }

    fn closes(calls: Vec<OrderCall>) -> Vec<(Option<PositionSide>, Option<Decimal>)> {
        calls
            .into_iter()
            .filter(|c| c.op == MockOp::CloseMarket)
            .map(|c| (c.side, c.size))
            .collect()
    }

    #[tokio::test]
    async fn test_partial_fill_on_one_leg_is_closed() {
        let h = Harness::new(at(7, 58, 30)).await;
        // Gate IOC executes 20 of 30 contracts and expires the rest.
        h.secondary.set_partial_market_fill(Some(dec!(20))).await;
        let entry = h.entry(alerter_expecting_breaches(0), config());

        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();

        assert!(!err.is_fatal());
        assert!(matches!(err, HedgeError::EntryPartialFillMismatch { .. }));
        assert!(h.ledger.is_empty());
        assert!(!h.ledger.is_halted(SYMBOL));
        assert!(h.primary.position(SYMBOL).await.is_none());
        assert!(h.secondary.position(SYMBOL).await.is_none());

        assert_eq!(
            closes(h.primary.calls().await),
            vec![(Some(PositionSide::Long), Some(dec!(0.003)))]
        );
        // Gate closes auto-sized by side.
        assert_eq!(
            closes(h.secondary.calls().await),
            vec![(Some(PositionSide::Short), None)]
        );
        assert_eq!(
            h.journal_actions(),
            vec![
                ("BN".to_string(), "open".to_string()),
                ("BN".to_string(), "compensate".to_string()),
                ("GT".to_string(), "open".to_string()),
                ("GT".to_string(), "compensate".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_fills_on_both_legs_are_closed() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.primary.set_partial_market_fill(Some(dec!(0.002))).await;
        h.secondary.set_partial_market_fill(Some(dec!(10))).await;
        let entry = h.entry(alerter_expecting_breaches(0), config());

        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();

        assert!(matches!(
            err,
            HedgeError::EntryPartialFillMismatch {
                filled: Venue::Binance,
                ..
            }
        ));
        assert!(h.ledger.is_empty());
        assert!(h.primary.position(SYMBOL).await.is_none());
        assert!(h.secondary.position(SYMBOL).await.is_none());
        // Binance closes exactly what executed.
        assert_eq!(
            closes(h.primary.calls().await),
            vec![(Some(PositionSide::Long), Some(dec!(0.002)))]
        );
        assert_eq!(closes(h.secondary.calls().await).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_close_of_partial_leg_halts_symbol() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.secondary.set_partial_market_fill(Some(dec!(20))).await;
        h.secondary.fail(MockOp::CloseMarket).await;
        let entry = h.entry(alerter_expecting_breaches(1), config());

        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();

        match err {
            HedgeError::Fatal(breach) => {
                assert_eq!(breach.kind, BreachKind::Hedge);
                assert_eq!(breach.open_leg, Venue::Gate);
            }
            other => panic!("expected hedge breach, got {:?}", other),
        }
        assert!(h.ledger.is_halted(SYMBOL));
        assert!(h.ledger.is_empty());
        assert!(h.primary.position(SYMBOL).await.is_none());
        assert_eq!(h.secondary.position(SYMBOL).await.unwrap().size, dec!(20));
    }

    #[tokio::test]
    async fn test_uncancellable_unfilled_order_halts_symbol() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.primary.set_unfilled_market_orders(true).await;
        h.primary.fail(MockOp::Cancel).await;
        let entry = h.entry(alerter_expecting_breaches(1), config());

        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();

        match err {
            HedgeError::Fatal(breach) => assert_eq!(breach.open_leg, Venue::Binance),
            other => panic!("expected hedge breach, got {:?}", other),
        }
        assert!(h.ledger.is_halted(SYMBOL));
        // The Gate fill is still unwound.
        assert!(h.secondary.position(SYMBOL).await.is_none());
    }

    #[tokio::test]
    async fn test_neither_leg_filled() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.primary.set_unfilled_market_orders(true).await;
        h.secondary.set_unfilled_market_orders(true).await;
        let entry = h.entry(quiet_alerter(), config());

        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();

        assert!(matches!(err, HedgeError::EntryNotFilled { .. }));
        assert!(h.ledger.is_empty());
        assert_eq!(h.primary.count_calls(MockOp::Cancel).await, 1);
        assert_eq!(h.secondary.count_calls(MockOp::Cancel).await, 1);
    }

    #[tokio::test]
    async fn test_insufficient_balance_places_nothing() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.secondary.set_balance(dec!(150)).await;
        let entry = h.entry(quiet_alerter(), config());

        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();

        assert!(matches!(
            err,
            HedgeError::InsufficientBalance {
                venue: Venue::Gate,
                ..
            }
        ));
        assert_eq!(h.primary.count_calls(MockOp::MarketOrder).await, 0);
        assert_eq!(h.secondary.count_calls(MockOp::MarketOrder).await, 0);
    }

    #[tokio::test]
    async fn test_infeasible_sizing_is_skipped() {
        let h = Harness::new(at(7, 58, 30)).await;
        let entry = h.entry(quiet_alerter(), StrategyConfig::default());

        let err = entry.try_enter(&candidate(), funding_instant()).await.unwrap_err();

        match err {
            HedgeError::SizingInfeasible { reason, .. } => {
                assert!(matches!(
                    reason,
                    SizingError::BelowMinimum {
                        venue: Venue::Binance,
                        ..
                    }
                ));
            }
            other => panic!("expected infeasible sizing, got {:?}", other),
        }
        assert_eq!(h.primary.count_calls(MockOp::MarketOrder).await, 0);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_funding_too_close_stops_the_tick() {
        let h = Harness::new(at(7, 59, 45)).await;
        let entry = h.entry(quiet_alerter(), config());

        let report = entry.run_tick(&view()).await;

        assert!(report.opened.is_empty());
        assert!(report.skipped.is_empty());
        assert_eq!(h.primary.count_calls(MockOp::MarketOrder).await, 0);
    }

    #[tokio::test]
    async fn test_existing_hedge_is_not_reentered() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.open_type1().await;
        let entry = h.entry(quiet_alerter(), config());

        let report = entry.run_tick(&view()).await;

        assert!(report.opened.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(h.primary.count_calls(MockOp::MarketOrder).await, 0);
    }

    #[tokio::test]
    async fn test_leverage_failure_does_not_block_entry() {
        let h = Harness::new(at(7, 58, 30)).await;
        h.secondary.fail(MockOp::SetLeverage).await;
        let entry = h.entry(quiet_alerter(), config());

        let position = entry.try_enter(&candidate(), funding_instant()).await.unwrap();
        assert_eq!(position.symbol, SYMBOL);
        assert!(h.ledger.contains(SYMBOL));
    }
}
