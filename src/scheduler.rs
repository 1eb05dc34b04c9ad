//! Loop driver: entry, exit monitoring and the daily mismatch refresh.
//!
//! Each loop runs on its own cadence and only shares the ledger. Sleeping
//! goes through the injected [`Clock`] in short steps so a shutdown request
//! is noticed promptly.

use crate::alert::Alerter;
use crate::clock::Clock;
use crate::config::{Config, StrategyConfig};
use crate::exchange::VenueClient;
use crate::persistence::{MismatchStore, TradeJournal};
use crate::position::PositionLedger;
use crate::strategy::{
    EntryCoordinator, ExitCoordinator, ExitTickReport, FundingRateAggregator, MergedFundingView,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// UTC hour after which the daily mismatch refresh may run.
const REFRESH_HOUR_UTC: u32 = 12;
const REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(600);
const SLEEP_STEP: Duration = Duration::from_secs(1);

/// Fetch both venues' funding intervals and rewrite the mismatch list.
pub async fn refresh_mismatch_list(
    aggregator: &FundingRateAggregator,
    store: &MismatchStore,
) -> Result<BTreeSet<String>> {
    let mismatches = aggregator
        .funding_interval_mismatches()
        .await
        .context("Failed to fetch funding intervals")?;
    store.save(&mismatches)?;
    info!(count = mismatches.len(), "🔁 Mismatch list refreshed");
    Ok(mismatches)
}

pub struct Scheduler {
    aggregator: FundingRateAggregator,
    entry: EntryCoordinator,
    exit: ExitCoordinator,
    mismatch_store: MismatchStore,
    clock: Arc<dyn Clock>,
    strategy: StrategyConfig,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    last_refresh: Mutex<Option<NaiveDate>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        primary: Arc<dyn VenueClient>,
        secondary: Arc<dyn VenueClient>,
        ledger: Arc<PositionLedger>,
        journal: Arc<TradeJournal>,
        alerter: Arc<dyn Alerter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let entry = EntryCoordinator::new(
            primary.clone(),
            secondary.clone(),
            ledger.clone(),
            journal.clone(),
            alerter.clone(),
            clock.clone(),
            config.strategy.clone(),
        );
        let exit = ExitCoordinator::new(
            primary.clone(),
            secondary.clone(),
            ledger,
            journal,
            alerter,
            clock.clone(),
            config.exit.clone(),
            config.strategy.exit_threshold,
        );

        Self {
            aggregator: FundingRateAggregator::new(primary, secondary),
            entry,
            exit,
            mismatch_store: MismatchStore::new(&config.paths.mismatch_file),
            clock,
            strategy: config.strategy.clone(),
            poll_interval: config.exit.poll_interval(),
            shutdown: Arc::new(AtomicBool::new(false)),
            last_refresh: Mutex::new(None),
        }
    }

    /// Setting the flag stops every loop after its current step.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn aggregator(&self) -> &FundingRateAggregator {
        &self.aggregator
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run all loops until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("🚀 Starting entry, exit and refresh loops");
        let entry = tokio::spawn(self.clone().entry_loop());
        let exit = tokio::spawn(self.clone().exit_loop());
        let refresh = tokio::spawn(self.clone().refresh_loop());

        let (entry, exit, refresh) = tokio::join!(entry, exit, refresh);
        entry.context("Entry loop panicked")?;
        exit.context("Exit loop panicked")?;
        refresh.context("Refresh loop panicked")?;
        info!("All loops stopped");
        Ok(())
    }

    async fn entry_loop(self: Arc<Self>) {
        while !self.is_shutdown() {
            let pause = self.entry_tick().await;
            self.pause(pause).await;
        }
    }

    async fn exit_loop(self: Arc<Self>) {
        while !self.is_shutdown() {
            self.exit_tick().await;
            self.pause(self.poll_interval).await;
        }
    }

    async fn refresh_loop(self: Arc<Self>) {
        while !self.is_shutdown() {
            self.refresh_if_due().await;
            self.pause(REFRESH_CHECK_INTERVAL).await;
        }
    }

    /// Sleep in short steps, returning early on shutdown.
    async fn pause(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && !self.is_shutdown() {
            let step = remaining.min(SLEEP_STEP);
            self.clock.sleep(step).await;
            remaining -= step;
        }
    }

    /// One entry iteration. Returns how long to wait before the next one.
    pub async fn entry_tick(&self) -> Duration {
        let idle = self.strategy.idle_interval();
        let active = self.strategy.active_interval();

        let view = match self.aggregator.fetch().await {
            Ok(view) => view,
            Err(e) => {
                warn!("Funding fetch failed: {}", e);
                return active;
            }
        };
        let Some(instant) = view.next_funding_instant() else {
            debug!("No funding schedule available");
            return idle;
        };

        let remaining = instant - self.clock.now();
        let buffer = self.strategy.funding_buffer();
        if remaining <= chrono::Duration::zero() || remaining > buffer {
            // Wake up no later than the start of the buffer window.
            let until_window = (remaining - buffer).to_std().unwrap_or(active);
            debug!(%instant, secs_left = remaining.num_seconds(), "Outside entry window");
            return idle.min(until_window.max(active));
        }

        info!(%instant, secs_left = remaining.num_seconds(), "⏰ Inside entry window");
        let report = self.entry.run_tick(&view).await;
        if !report.opened.is_empty() {
            info!(opened = report.opened.len(), "Entry tick complete");
        }
        for breach in &report.breaches {
            error!(symbol = %breach.symbol, "Entry left a breach: {}", breach);
        }
        active
    }

    /// One exit-monitor iteration.
    pub async fn exit_tick(&self) -> ExitTickReport {
        let mismatches = self.mismatch_store.load().unwrap_or_else(|e| {
            warn!("Mismatch list unreadable, treating as empty: {:#}", e);
            BTreeSet::new()
        });
        // Without a view only reversal checks are lost; the rest still run.
        let view = self.aggregator.fetch().await.unwrap_or_else(|e| {
            warn!("Funding fetch failed, reversal checks skipped: {}", e);
            MergedFundingView::default()
        });

        let report = self.exit.run_tick(&view, &mismatches).await;
        if !report.closed.is_empty() || !report.placed.is_empty() {
            info!(closed = ?report.closed, placed = ?report.placed, "Exit tick complete");
        }
        report
    }

    fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        now.hour() >= REFRESH_HOUR_UTC && *self.last_refresh.lock() != Some(now.date_naive())
    }

    /// Refresh the mismatch list once per UTC day after noon.
    pub async fn refresh_if_due(&self) -> bool {
        let now = self.clock.now();
        if !self.refresh_due(now) {
            return false;
        }
        match refresh_mismatch_list(&self.aggregator, &self.mismatch_store).await {
            Ok(_) => {
                *self.last_refresh.lock() = Some(now.date_naive());
                true
            }
            Err(e) => {
                warn!("Mismatch refresh failed, will retry: {:#}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LogAlerter;
    use crate::clock::ManualClock;
    use crate::exchange::{FundingSnapshot, MockOp, MockVenue, Venue};
    use crate::strategy::fixtures::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct Setup {
        harness: Harness,
        scheduler: Scheduler,
        dir: PathBuf,
    }

    impl Drop for Setup {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn snap(symbol: &str, rate: Decimal) -> FundingSnapshot {
        FundingSnapshot {
            symbol: symbol.to_string(),
            mark_price: dec!(65000),
            funding_rate: rate,
            next_funding: funding_instant(),
        }
    }

    async fn setup(name: &str, now: DateTime<Utc>) -> Setup {
        let harness = Harness::new(now).await;
        harness
            .primary
            .set_funding(vec![snap(SYMBOL, dec!(0.0001))])
            .await;
        harness
            .secondary
            .set_funding(vec![snap("BTC_USDT", dec!(0.0011))])
            .await;

        let dir = std::env::temp_dir().join(format!("fdh-sched-{}-{}", name, std::process::id()));
        let mut config = Config::default();
        config.strategy.trade_amount = dec!(200);
        config.paths.mismatch_file = dir.join("mismatch.txt").to_string_lossy().into_owned();

        let scheduler = Scheduler::new(
            &config,
            harness.primary.clone(),
            harness.secondary.clone(),
            harness.ledger.clone(),
            harness.journal.clone(),
            Arc::new(LogAlerter),
            harness.clock.clone(),
        );
        Setup {
            harness,
            scheduler,
            dir,
        }
    }

    #[tokio::test]
    async fn test_entry_idles_until_buffer_window() {
        // 10 minutes out: sleep the idle interval.
        let s = setup("idle", at(7, 50, 0)).await;
        assert_eq!(s.scheduler.entry_tick().await, Duration::from_secs(120));

        // 150s out: wake exactly when the 90s window opens.
        s.harness.clock.set(at(7, 57, 30));
        assert_eq!(s.scheduler.entry_tick().await, Duration::from_secs(60));
        assert!(s.harness.ledger.is_empty());
        assert_eq!(s.harness.primary.count_calls(MockOp::MarketOrder).await, 0);
    }

    #[tokio::test]
    async fn test_entry_runs_inside_buffer_window() {
        let s = setup("window", at(7, 58, 45)).await;
        assert_eq!(s.scheduler.entry_tick().await, Duration::from_secs(10));
        assert!(s.harness.ledger.contains(SYMBOL));
    }

    #[tokio::test]
    async fn test_exit_tick_reads_mismatch_list() {
        let s = setup("exit", at(8, 1, 0)).await;
        s.harness.open_type1().await;
        std::fs::create_dir_all(&s.dir).unwrap();
        std::fs::write(s.dir.join("mismatch.txt"), format!("{}\n", SYMBOL)).unwrap();

        let report = s.scheduler.exit_tick().await;
        assert_eq!(report.closed, vec![SYMBOL.to_string()]);
        assert!(s.harness.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_daily_refresh_runs_once_after_noon() {
        let s = setup("refresh", at(11, 0, 0)).await;
        s.harness
            .primary
            .set_intervals(HashMap::from([(SYMBOL.to_string(), 4)]))
            .await;
        s.harness
            .secondary
            .set_intervals(HashMap::from([(SYMBOL.to_string(), 8)]))
            .await;

        assert!(!s.scheduler.refresh_if_due().await);

        s.harness.clock.set(at(12, 5, 0));
        assert!(s.scheduler.refresh_if_due().await);
        assert!(!s.scheduler.refresh_if_due().await);

        let store = MismatchStore::new(s.dir.join("mismatch.txt"));
        assert_eq!(store.load().unwrap(), BTreeSet::from([SYMBOL.to_string()]));

        s.harness.clock.advance(chrono::Duration::days(1));
        assert!(s.scheduler.refresh_if_due().await);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_retried() {
        let s = setup("retry", at(13, 0, 0)).await;
        s.harness.secondary.fail_times(MockOp::FundingIntervals, 1).await;

        assert!(!s.scheduler.refresh_if_due().await);
        assert!(s.scheduler.refresh_if_due().await);
    }

    #[tokio::test]
    async fn test_run_returns_after_shutdown() {
        let clock = Arc::new(ManualClock::new(at(7, 0, 0)));
        let primary = Arc::new(MockVenue::new(Venue::Binance));
        let secondary = Arc::new(MockVenue::new(Venue::Gate));
        let scheduler = Arc::new(Scheduler::new(
            &Config::default(),
            primary,
            secondary,
            Arc::new(PositionLedger::new()),
            Arc::new(TradeJournal::in_memory().unwrap()),
            Arc::new(LogAlerter),
            clock,
        ));

        scheduler.shutdown_handle().store(true, Ordering::SeqCst);
        scheduler.run().await.unwrap();
    }
}
