//! Shared doubles for coordinator tests.

use super::aggregator::MergedFundingView;
use super::entry::EntryCoordinator;
use super::exit::ExitCoordinator;
use crate::alert::{Alerter, LogAlerter, MockAlerter};
use crate::clock::ManualClock;
use crate::config::{ExitConfig, StrategyConfig};
use crate::exchange::{
    BookLevel, ContractSpec, FundingSnapshot, MockVenue, OrderBook, PositionSide, TradingStatus,
    Venue, VenuePosition,
};
use crate::persistence::TradeJournal;
use crate::position::{HedgeDirection, HedgePosition, PositionLedger};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const SYMBOL: &str = "BTCUSDT";

pub fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, min, sec).unwrap()
}

pub fn funding_instant() -> DateTime<Utc> {
    at(8, 0, 0)
}

pub fn binance_spec(symbol: &str, price: Decimal) -> ContractSpec {
    ContractSpec {
        symbol: symbol.to_string(),
        price,
        lot_multiplier: Decimal::ONE,
        step_size: dec!(0.001),
        min_qty: dec!(0.001),
        max_qty: dec!(1000),
        min_notional: Decimal::ZERO,
        price_tick: dec!(0.1),
        status: TradingStatus::Trading,
    }
}

pub fn gate_spec(symbol: &str, price: Decimal) -> ContractSpec {
    ContractSpec {
        symbol: symbol.to_string(),
        price,
        lot_multiplier: dec!(0.0001),
        step_size: Decimal::ONE,
        min_qty: Decimal::ONE,
        max_qty: dec!(1000000),
        min_notional: Decimal::ZERO,
        price_tick: dec!(0.1),
        status: TradingStatus::Trading,
    }
}

pub fn book(bids: &[Decimal], asks: &[Decimal]) -> OrderBook {
    let level = |price: &Decimal| BookLevel {
        price: *price,
        qty: Decimal::ONE,
    };
    OrderBook {
        bids: bids.iter().map(level).collect(),
        asks: asks.iter().map(level).collect(),
    }
}

fn snapshot(symbol: &str, rate: Decimal) -> FundingSnapshot {
    FundingSnapshot {
        symbol: symbol.to_string(),
        mark_price: dec!(65000),
        funding_rate: rate,
        next_funding: funding_instant(),
    }
}

/// View of BTCUSDT settling at 08:00 on both venues.
pub fn view_with_rates(binance_rate: Decimal, gate_rate: Decimal) -> MergedFundingView {
    MergedFundingView::merge(
        &[snapshot(SYMBOL, binance_rate)],
        &[snapshot("BTC_USDT", gate_rate)],
    )
}

pub fn quiet_alerter() -> Arc<dyn Alerter> {
    Arc::new(LogAlerter)
}

/// Alerter that must receive exactly `breaches` breach alerts.
pub fn alerter_expecting_breaches(breaches: usize) -> Arc<dyn Alerter> {
    let mut alerter = MockAlerter::new();
    alerter.expect_send().times(breaches).returning(|_| Ok(()));
    alerter.expect_notify().returning(|_| Ok(()));
    Arc::new(alerter)
}

pub struct Harness {
    pub primary: Arc<MockVenue>,
    pub secondary: Arc<MockVenue>,
    pub ledger: Arc<PositionLedger>,
    pub journal: Arc<TradeJournal>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Both venues list BTCUSDT; Binance trades at 65010, Gate at 65000.
    pub async fn new(now: DateTime<Utc>) -> Self {
        let primary = Arc::new(MockVenue::new(Venue::Binance));
        let secondary = Arc::new(MockVenue::new(Venue::Gate));
        primary.set_spec(binance_spec(SYMBOL, dec!(65010))).await;
        secondary.set_spec(gate_spec(SYMBOL, dec!(65000))).await;

        Self {
            primary,
            secondary,
            ledger: Arc::new(PositionLedger::new()),
            journal: Arc::new(TradeJournal::in_memory().unwrap()),
            clock: Arc::new(ManualClock::new(now)),
        }
    }

    pub fn entry(&self, alerter: Arc<dyn Alerter>, config: StrategyConfig) -> EntryCoordinator {
        EntryCoordinator::new(
            self.primary.clone(),
            self.secondary.clone(),
            self.ledger.clone(),
            self.journal.clone(),
            alerter,
            self.clock.clone(),
            config,
        )
    }

    pub fn exit(&self, alerter: Arc<dyn Alerter>) -> ExitCoordinator {
        ExitCoordinator::new(
            self.primary.clone(),
            self.secondary.clone(),
            self.ledger.clone(),
            self.journal.clone(),
            alerter,
            self.clock.clone(),
            ExitConfig::default(),
            StrategyConfig::default().exit_threshold,
        )
    }

    /// Record an open type1 hedge (Binance long 0.003, Gate short 30) and
    /// the matching venue positions.
    pub async fn open_type1(&self) -> HedgePosition {
        let position = HedgePosition::open(
            SYMBOL,
            HedgeDirection::Type1,
            dec!(0.003),
            dec!(65010),
            dec!(30),
            dec!(65000),
            funding_instant(),
            at(7, 59, 0),
        );
        self.primary
            .set_position(VenuePosition {
                symbol: SYMBOL.to_string(),
                side: PositionSide::Long,
                size: dec!(0.003),
                entry_price: dec!(65010),
            })
            .await;
        self.secondary
            .set_position(VenuePosition {
                symbol: SYMBOL.to_string(),
                side: PositionSide::Short,
                size: dec!(30),
                entry_price: dec!(65000),
            })
            .await;
        self.ledger.insert(position.clone()).unwrap();
        position
    }

    pub fn journal_actions(&self) -> Vec<(String, String)> {
        self.journal
            .entries(SYMBOL)
            .unwrap()
            .into_iter()
            .map(|e| (e.venue, e.action))
            .collect()
    }
}
