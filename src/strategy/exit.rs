//! Exit state machine for recorded hedges.
//!
//! Open hedges are checked against three triggers. Mismatch and reversal
//! close both legs at market; the profit trigger rests break-even limit
//! orders plus an optional stop on the Binance leg. Exiting hedges are
//! polled until both legs are confirmed closed or the timeout forces the
//! remainder to market.

use super::aggregator::MergedFundingView;
use super::pnl::{break_even_quote, stop_trigger_price, worst_case_pnl, PriceWindow};
use crate::alert::{notify_operator, raise_breach, Alerter};
use crate::clock::Clock;
use crate::config::ExitConfig;
use crate::error::{FatalBreach, HedgeError};
use crate::exchange::{
    ContractSpec, OrderBook, OrderId, OrderResult, StopOrder, Venue, VenueClient,
};
use crate::persistence::{JournalAction, TradeJournal};
use crate::position::{
    ExitOrders, ExitProgress, ExitReason, HedgeLeg, HedgePosition, HedgeState, PositionLedger,
};
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What one evaluation or poll did.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    /// No trigger fired, or nothing for this state to do
    Held,
    /// Resting exit orders placed
    OrdersPlaced(ExitReason),
    /// Resting exit orders still working
    Waiting,
    /// Both legs confirmed closed and the hedge removed
    Closed(ExitReason),
}

#[derive(Debug, Default)]
pub struct ExitTickReport {
    pub closed: Vec<String>,
    pub placed: Vec<String>,
    pub breaches: Vec<FatalBreach>,
}

pub struct ExitCoordinator {
    primary: Arc<dyn VenueClient>,
    secondary: Arc<dyn VenueClient>,
    ledger: Arc<PositionLedger>,
    journal: Arc<TradeJournal>,
    alerter: Arc<dyn Alerter>,
    clock: Arc<dyn Clock>,
    config: ExitConfig,
    exit_threshold: Decimal,
    /// Binance mid prices per symbol, sampled after the funding instant
    windows: Mutex<HashMap<String, PriceWindow>>,
}

impl ExitCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        primary: Arc<dyn VenueClient>,
        secondary: Arc<dyn VenueClient>,
        ledger: Arc<PositionLedger>,
        journal: Arc<TradeJournal>,
        alerter: Arc<dyn Alerter>,
        clock: Arc<dyn Clock>,
        config: ExitConfig,
        exit_threshold: Decimal,
    ) -> Self {
        Self {
            primary,
            secondary,
            ledger,
            journal,
            alerter,
            clock,
            config,
            exit_threshold,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check every recorded hedge once.
    #[instrument(skip_all)]
    pub async fn run_tick(
        &self,
        view: &MergedFundingView,
        mismatches: &BTreeSet<String>,
    ) -> ExitTickReport {
        let mut report = ExitTickReport::default();

        for snapshot in self.ledger.snapshot() {
            let symbol = snapshot.symbol.clone();
            let _claim = match self.ledger.claim(&symbol) {
                Ok(claim) => claim,
                Err(e) => {
                    debug!(%symbol, "Skipping exit check: {}", e);
                    continue;
                }
            };
            let result = match snapshot.state {
                HedgeState::Open => self.evaluate(&symbol, view, mismatches).await,
                HedgeState::Exiting(_) => self.poll_exiting(&symbol).await,
                HedgeState::Closed => continue,
            };

            match result {
                Ok(ExitOutcome::Closed(_)) => report.closed.push(symbol),
                Ok(ExitOutcome::OrdersPlaced(_)) => report.placed.push(symbol),
                Ok(_) => {}
                Err(HedgeError::Fatal(breach)) => report.breaches.push(breach),
                Err(e) => warn!(%symbol, "Exit check failed: {}", e),
            }
        }

        report
    }

    /// Evaluate the exit triggers for an `Open` hedge. The state is read
    /// from the ledger and any other state is left alone, so repeated
    /// evaluation never places a second exit.
    #[instrument(skip(self, view, mismatches))]
    pub async fn evaluate(
        &self,
        symbol: &str,
        view: &MergedFundingView,
        mismatches: &BTreeSet<String>,
    ) -> Result<ExitOutcome, HedgeError> {
        let Some(position) = self.ledger.get(symbol) else {
            return Ok(ExitOutcome::Held);
        };
        if !position.is_open() {
            debug!(state = position.state.name(), "Not open, triggers skipped");
            return Ok(ExitOutcome::Held);
        }
        let position = &position;

        let now = self.clock.now();
        let past_grace = now >= position.funding_instant + self.config.funding_grace();

        if past_grace && mismatches.contains(symbol) {
            info!(%symbol, "⏱️ Funding interval mismatch, closing at market");
            return self
                .market_exit(position, ExitReason::FundingIntervalMismatch)
                .await;
        }

        if let Some(row) = view.get(symbol) {
            if position.direction.is_reversed(row.fr_diff, self.exit_threshold) {
                info!(
                    %symbol,
                    direction = %position.direction,
                    fr_diff = %row.fr_diff,
                    "🔄 Signal reversed, closing at market"
                );
                return self.market_exit(position, ExitReason::SignalReversal).await;
            }
        }

        if now < position.funding_instant {
            return Ok(ExitOutcome::Held);
        }

        let (primary_book, secondary_book) = self.books(symbol).await?;
        let extremum = self.sample(position, now, &primary_book);
        if !past_grace {
            return Ok(ExitOutcome::Held);
        }

        let pnl = worst_case_pnl(
            position.direction,
            position.primary.entry_price,
            position.secondary.entry_price,
            &primary_book,
            &secondary_book,
        );
        let reason = match pnl {
            Some(pnl) if pnl >= self.config.profit_threshold => ExitReason::ProfitTarget,
            _ if extremum => ExitReason::LocalExtremum,
            _ => {
                debug!(%symbol, pnl = ?pnl, "No exit trigger");
                return Ok(ExitOutcome::Held);
            }
        };

        info!(%symbol, ?reason, pnl = ?pnl, "💰 Exit trigger fired");
        self.limit_exit(position, reason, &secondary_book).await
    }

    /// Poll the resting exit orders of an `Exiting` hedge.
    #[instrument(skip(self))]
    pub async fn poll_exiting(&self, symbol: &str) -> Result<ExitOutcome, HedgeError> {
        let Some(position) = self.ledger.get(symbol) else {
            return Ok(ExitOutcome::Held);
        };
        let Some(progress) = position.exit_progress() else {
            return Ok(ExitOutcome::Held);
        };
        let position = &position;
        let ExitOrders::Resting {
            primary,
            secondary,
            stop_loss,
        } = &progress.orders
        else {
            debug!(%symbol, "Market exit in flight");
            return Ok(ExitOutcome::Waiting);
        };

        let (primary_filled, secondary_filled, stop_filled) = tokio::join!(
            self.primary.check_order_filled(symbol, primary),
            self.secondary.check_order_filled(symbol, secondary),
            self.stop_filled(symbol, stop_loss.as_ref()),
        );
        let primary_filled = primary_filled
            .map_err(|e| HedgeError::transient(self.primary.venue(), "order status", e))?;
        let secondary_filled = secondary_filled
            .map_err(|e| HedgeError::transient(self.secondary.venue(), "order status", e))?;
        let stop_filled = stop_filled
            .map_err(|e| HedgeError::transient(self.primary.venue(), "stop status", e))?;

        if (primary_filled || stop_filled) && secondary_filled {
            // Whatever still rests on the Binance side is now redundant.
            let leftover = if primary_filled {
                stop_loss.as_ref().filter(|_| !stop_filled)
            } else {
                Some(primary)
            };
            if let Some(order_id) = leftover {
                self.cancel_quietly(&*self.primary, symbol, order_id).await;
            }
            info!(%symbol, stop_filled, "Both exit legs filled");
            return self.finish(symbol, progress.reason).await;
        }

        if stop_filled {
            warn!(%symbol, "🛑 Stop-loss filled, closing Gate leg at market");
            self.cancel_quietly(&*self.primary, symbol, primary).await;
            return match self
                .force_close(&*self.secondary, symbol, &position.secondary, secondary)
                .await
            {
                Ok(()) => self.finish(symbol, progress.reason).await,
                Err(e) => {
                    self.exit_breach(
                        symbol,
                        self.secondary.venue(),
                        format!("stop-loss filled, Gate close failed: {:#}", e),
                    )
                    .await
                }
            };
        }

        let elapsed = self.clock.now() - progress.started_at;
        if elapsed < self.config.timeout() {
            debug!(
                %symbol,
                primary_filled,
                secondary_filled,
                elapsed_secs = elapsed.num_seconds(),
                "Exit orders working"
            );
            return Ok(ExitOutcome::Waiting);
        }

        warn!(
            %symbol,
            primary_filled,
            secondary_filled,
            elapsed_secs = elapsed.num_seconds(),
            "⌛ Exit timed out, forcing market close"
        );
        if let Some(stop) = stop_loss {
            self.cancel_quietly(&*self.primary, symbol, stop).await;
        }

        let primary_job = async {
            if primary_filled {
                Ok(())
            } else {
                self.force_close(&*self.primary, symbol, &position.primary, primary)
                    .await
            }
        };
        let secondary_job = async {
            if secondary_filled {
                Ok(())
            } else {
                self.force_close(&*self.secondary, symbol, &position.secondary, secondary)
                    .await
            }
        };

        match tokio::join!(primary_job, secondary_job) {
            (Ok(()), Ok(())) => self.finish(symbol, progress.reason).await,
            (Ok(()), Err(e)) => {
                self.exit_breach(
                    symbol,
                    self.secondary.venue(),
                    format!("forced close failed: {:#}", e),
                )
                .await
            }
            (Err(e), Ok(())) => {
                self.exit_breach(
                    symbol,
                    self.primary.venue(),
                    format!("forced close failed: {:#}", e),
                )
                .await
            }
            (Err(primary_err), Err(secondary_err)) => {
                // Neither leg moved, the hedge is intact.
                error!(
                    %symbol,
                    "Forced exit failed on both venues: {:#} / {:#}",
                    primary_err,
                    secondary_err
                );
                self.ledger.reopen(symbol)?;
                Err(HedgeError::transient(
                    self.primary.venue(),
                    "forced exit",
                    primary_err,
                ))
            }
        }
    }

    async fn books(&self, symbol: &str) -> Result<(OrderBook, OrderBook), HedgeError> {
        let depth = self.config.order_book_depth;
        let (a, b) = tokio::join!(
            self.primary.order_book(symbol, depth),
            self.secondary.order_book(symbol, depth)
        );
        let a = a.map_err(|e| HedgeError::transient(self.primary.venue(), "order book", e))?;
        let b = b.map_err(|e| HedgeError::transient(self.secondary.venue(), "order book", e))?;
        Ok((a, b))
    }

    /// Record the Binance mid and report whether it is a local extremum.
    fn sample(&self, position: &HedgePosition, now: DateTime<Utc>, book: &OrderBook) -> bool {
        let mut windows = self.windows.lock();
        let window = windows
            .entry(position.symbol.clone())
            .or_insert_with(|| PriceWindow::new(self.config.lookback()));
        if let Some(mid) = book.mid() {
            window.push(now, mid);
        }
        window.is_local_extremum(position.direction, self.config.min_lookback_samples)
    }

    async fn market_exit(
        &self,
        position: &HedgePosition,
        reason: ExitReason,
    ) -> Result<ExitOutcome, HedgeError> {
        let symbol = position.symbol.as_str();
        self.ledger.begin_exit(
            symbol,
            ExitProgress {
                reason,
                started_at: self.clock.now(),
                orders: ExitOrders::Market,
            },
        )?;

        let primary_close = position.primary.close_order(self.primary.close_convention());
        let secondary_close = position
            .secondary
            .close_order(self.secondary.close_convention());
        let (a, b) = tokio::join!(
            self.primary.close_market(symbol, &primary_close),
            self.secondary.close_market(symbol, &secondary_close),
        );

        let now = self.clock.now();
        match (confirmed(a), confirmed(b)) {
            (Ok(a), Ok(b)) => {
                self.journal.record(now, symbol, JournalAction::MarketExit, &a);
                self.journal.record(now, symbol, JournalAction::MarketExit, &b);
                self.finish(symbol, reason).await
            }
            (Ok(closed), Err(e)) => {
                self.journal
                    .record(now, symbol, JournalAction::MarketExit, &closed);
                self.exit_breach(
                    symbol,
                    self.secondary.venue(),
                    format!("market close failed: {:#}", e),
                )
                .await
            }
            (Err(e), Ok(closed)) => {
                self.journal
                    .record(now, symbol, JournalAction::MarketExit, &closed);
                self.exit_breach(
                    symbol,
                    self.primary.venue(),
                    format!("market close failed: {:#}", e),
                )
                .await
            }
            (Err(primary_err), Err(secondary_err)) => {
                warn!(
                    %symbol,
                    "Market exit failed on both venues, hedge stays open: {:#} / {:#}",
                    primary_err,
                    secondary_err
                );
                self.ledger.reopen(symbol)?;
                Err(HedgeError::transient(
                    self.primary.venue(),
                    "market exit",
                    primary_err,
                ))
            }
        }
    }

    async fn limit_exit(
        &self,
        position: &HedgePosition,
        reason: ExitReason,
        secondary_book: &OrderBook,
    ) -> Result<ExitOutcome, HedgeError> {
        let symbol = position.symbol.as_str();
        let primary_spec = self
            .primary
            .contract_spec(symbol)
            .await
            .map_err(|e| HedgeError::transient(self.primary.venue(), "contract spec", e))?;

        let Some(quote) = break_even_quote(
            position.direction,
            position.primary.entry_price,
            position.secondary.entry_price,
            secondary_book,
            primary_spec.price_tick,
        ) else {
            warn!(%symbol, "No break-even quote, exit deferred");
            return Ok(ExitOutcome::Held);
        };

        info!(
            %symbol,
            ?reason,
            primary_price = %quote.primary_price,
            secondary_price = %quote.secondary_price,
            "Placing break-even exit orders"
        );

        let primary_close = position.primary.close_order(self.primary.close_convention());
        let secondary_close = position
            .secondary
            .close_order(self.secondary.close_convention());
        let (a, b) = tokio::join!(
            self.primary.close_limit(symbol, quote.primary_price, &primary_close),
            self.secondary.close_limit(symbol, quote.secondary_price, &secondary_close),
        );

        let (primary_order, secondary_order) = match (a, b) {
            (Ok(a), Ok(b)) => (a, b),
            (Ok(placed), Err(e)) => {
                let placed = (&*self.primary, placed);
                let failed = (&*self.secondary, e);
                return self.withdraw_partial_exit(position, reason, placed, failed).await;
            }
            (Err(e), Ok(placed)) => {
                let placed = (&*self.secondary, placed);
                let failed = (&*self.primary, e);
                return self.withdraw_partial_exit(position, reason, placed, failed).await;
            }
            (Err(primary_err), Err(secondary_err)) => {
                warn!(
                    %symbol,
                    "Exit orders rejected on both venues: {:#} / {:#}",
                    primary_err,
                    secondary_err
                );
                return Err(HedgeError::transient(
                    self.primary.venue(),
                    "limit exit",
                    primary_err,
                ));
            }
        };

        let now = self.clock.now();
        self.journal
            .record(now, symbol, JournalAction::LimitExit, &primary_order);
        self.journal
            .record(now, symbol, JournalAction::LimitExit, &secondary_order);

        let stop_loss = self.place_stop(position, &primary_spec).await;
        self.ledger.begin_exit(
            symbol,
            ExitProgress {
                reason,
                started_at: now,
                orders: ExitOrders::Resting {
                    primary: primary_order.order_id,
                    secondary: secondary_order.order_id,
                    stop_loss,
                },
            },
        )?;
        Ok(ExitOutcome::OrdersPlaced(reason))
    }

    /// Stop on the Binance leg; a rejected stop only costs the fallback.
    async fn place_stop(&self, position: &HedgePosition, spec: &ContractSpec) -> Option<OrderId> {
        let symbol = position.symbol.as_str();
        let trigger = stop_trigger_price(
            position.direction,
            position.primary.entry_price,
            self.config.stop_loss_fraction,
            spec.price_tick,
        )?;
        let stop = StopOrder::for_style(self.primary.stop_style(), position.primary.side, trigger);

        match self.primary.place_stop_order(symbol, &stop).await {
            Ok(order) => {
                self.journal
                    .record(self.clock.now(), symbol, JournalAction::StopLoss, &order);
                info!(%symbol, %trigger, order_id = %order.order_id, "Stop-loss placed");
                Some(order.order_id)
            }
            Err(e) => {
                warn!(%symbol, %trigger, "Stop-loss not placed: {:#}", e);
                None
            }
        }
    }

    /// Only one exit order was accepted. Withdraw it and stay `Open`; if it
    /// cannot be withdrawn, close the other leg at market and let polling
    /// finish the accepted order.
    async fn withdraw_partial_exit(
        &self,
        position: &HedgePosition,
        reason: ExitReason,
        (placed_client, placed): (&dyn VenueClient, OrderResult),
        (failed_client, failure): (&dyn VenueClient, anyhow::Error),
    ) -> Result<ExitOutcome, HedgeError> {
        let symbol = position.symbol.as_str();
        warn!(
            %symbol,
            venue = %failed_client.venue(),
            "Exit order rejected: {:#}; withdrawing {}",
            failure,
            placed.order_id
        );

        let cancel_err = match placed_client.cancel_order(symbol, &placed.order_id).await {
            Ok(()) => {
                self.journal.record(
                    self.clock.now(),
                    symbol,
                    JournalAction::Cancel,
                    &OrderResult::cancelled(placed_client.venue(), &placed.order_id),
                );
                return Err(HedgeError::transient(
                    failed_client.venue(),
                    "limit exit",
                    failure,
                ));
            }
            Err(e) => e,
        };

        warn!(
            %symbol,
            venue = %placed_client.venue(),
            "Could not withdraw {}: {:#}; closing {} leg at market",
            placed.order_id,
            cancel_err,
            failed_client.venue()
        );
        let leg = position.leg(failed_client.venue());
        let close = leg.close_order(failed_client.close_convention());
        let closed = match confirmed(failed_client.close_market(symbol, &close).await) {
            Ok(closed) => closed,
            Err(e) => {
                return self
                    .exit_breach(
                        symbol,
                        failed_client.venue(),
                        format!(
                            "{} close order {} cannot be withdrawn and market close failed: {:#}",
                            placed_client.venue(),
                            placed.order_id,
                            e
                        ),
                    )
                    .await;
            }
        };

        let now = self.clock.now();
        self.journal
            .record(now, symbol, JournalAction::LimitExit, &placed);
        self.journal
            .record(now, symbol, JournalAction::ForcedExit, &closed);

        let (primary, secondary) = if placed_client.venue() == self.primary.venue() {
            (placed.order_id, closed.order_id)
        } else {
            (closed.order_id, placed.order_id)
        };
        self.ledger.begin_exit(
            symbol,
            ExitProgress {
                reason,
                started_at: now,
                orders: ExitOrders::Resting {
                    primary,
                    secondary,
                    stop_loss: None,
                },
            },
        )?;
        Ok(ExitOutcome::OrdersPlaced(reason))
    }

    async fn stop_filled(&self, symbol: &str, stop: Option<&OrderId>) -> Result<bool> {
        match stop {
            Some(order_id) => self.primary.check_order_filled(symbol, order_id).await,
            None => Ok(false),
        }
    }

    /// Cancel the resting order for `leg` and close it at market.
    async fn force_close(
        &self,
        client: &dyn VenueClient,
        symbol: &str,
        leg: &HedgeLeg,
        resting: &OrderId,
    ) -> Result<()> {
        if let Err(e) = client.cancel_order(symbol, resting).await {
            // The cancel can lose the race against a fill.
            if client
                .check_order_filled(symbol, resting)
                .await
                .unwrap_or(false)
            {
                debug!(%symbol, venue = %client.venue(), order_id = %resting, "Filled before cancel");
                return Ok(());
            }
            return Err(e.context(format!("cancel {} failed", resting)));
        }
        self.journal.record(
            self.clock.now(),
            symbol,
            JournalAction::Cancel,
            &OrderResult::cancelled(client.venue(), resting),
        );

        let close = leg.close_order(client.close_convention());
        let result = client.close_market(symbol, &close).await?;
        if !result.filled {
            bail!("market close {} not confirmed filled", result.order_id);
        }
        self.journal
            .record(self.clock.now(), symbol, JournalAction::ForcedExit, &result);
        info!(%symbol, venue = %client.venue(), order_id = %result.order_id, "Forced market close filled");
        Ok(())
    }

    async fn cancel_quietly(&self, client: &dyn VenueClient, symbol: &str, order_id: &OrderId) {
        match client.cancel_order(symbol, order_id).await {
            Ok(()) => self.journal.record(
                self.clock.now(),
                symbol,
                JournalAction::Cancel,
                &OrderResult::cancelled(client.venue(), order_id),
            ),
            Err(e) => {
                warn!(%symbol, venue = %client.venue(), %order_id, "Failed to cancel leftover order: {:#}", e)
            }
        }
    }

    async fn finish(&self, symbol: &str, reason: ExitReason) -> Result<ExitOutcome, HedgeError> {
        let closed = self.ledger.close(symbol)?;
        self.windows.lock().remove(symbol);
        info!(%symbol, ?reason, direction = %closed.direction, "✅ Hedge closed");
        notify_operator(
            &*self.alerter,
            &format!("✅ Closed {} hedge on {} ({:?})", closed.direction, symbol, reason),
        )
        .await;
        Ok(ExitOutcome::Closed(reason))
    }

    async fn exit_breach(
        &self,
        symbol: &str,
        open_leg: Venue,
        detail: String,
    ) -> Result<ExitOutcome, HedgeError> {
        let breach = FatalBreach::exit(symbol, open_leg, detail);
        error!(%symbol, venue = %open_leg, "{}", breach);
        let now = self.clock.now();
        raise_breach(&*self.alerter, &breach, now).await;
        self.ledger.halt(breach.clone(), now);
        self.windows.lock().remove(symbol);
        Err(breach.into())
    }
}

/// Only an explicitly filled response counts as a close.
fn confirmed(result: Result<OrderResult>) -> Result<OrderResult> {
    result.and_then(|order| {
        if order.filled {
            Ok(order)
        } else {
            Err(anyhow!("order {} not confirmed filled", order.order_id))
        }
    })
}
