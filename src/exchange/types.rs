//! Venue-neutral types shared by both exchange clients and the coordinators.
//!
//! Symbols are always in normalized form (`BTCUSDT`); each client maps to its
//! native contract name internally.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two venues a hedge spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    /// Primary venue: sizes in base asset, closes by exact quantity.
    Binance,
    /// Secondary venue: sizes in contracts, closes by auto-size side.
    Gate,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Binance => write!(f, "Binance"),
            Venue::Gate => write!(f, "Gate"),
        }
    }
}

impl Venue {
    /// Short code used as the journal tag.
    pub fn short_code(&self) -> &'static str {
        match self {
            Venue::Binance => "BN",
            Venue::Gate => "GT",
        }
    }
}

/// Direction of a single leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }
}

/// Strip the quote separator used by some venues (`BTC_USDT` -> `BTCUSDT`).
pub fn normalize_symbol(native: &str) -> String {
    native.replace('_', "")
}

/// One venue's funding state for one symbol, as polled.
#[derive(Debug, Clone, PartialEq)]
pub struct FundingSnapshot {
    pub symbol: String,
    pub mark_price: Decimal,
    pub funding_rate: Decimal,
    pub next_funding: DateTime<Utc>,
}

/// Whether a contract currently accepts new orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradingStatus {
    Trading,
    Halted(String),
}

/// Venue-enforced order constraints for one symbol.
///
/// Sizes are in the venue's order unit: base asset for Binance (multiplier 1),
/// contracts for Gate (multiplier = quanto multiplier).
#[derive(Debug, Clone, PartialEq)]
pub struct ContractSpec {
    pub symbol: String,
    /// Latest traded price used for sizing
    pub price: Decimal,
    /// Base-asset quantity per order unit
    pub lot_multiplier: Decimal,
    /// Order-unit granularity
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    /// Minimum order notional in quote currency (zero when not enforced)
    pub min_notional: Decimal,
    pub price_tick: Decimal,
    pub status: TradingStatus,
}

impl ContractSpec {
    pub fn is_tradable(&self) -> bool {
        self.status == TradingStatus::Trading
    }
}

/// Distinguishes plain orders from venue-side trigger orders, which some
/// venues manage through a separate endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    Regular,
    Trigger,
}

/// Venue order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId {
    pub id: String,
    pub kind: OrderKind,
}

impl OrderId {
    pub fn regular(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: OrderKind::Regular,
        }
    }

    pub fn trigger(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: OrderKind::Trigger,
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OrderKind::Regular => write!(f, "{}", self.id),
            OrderKind::Trigger => write!(f, "trigger:{}", self.id),
        }
    }
}

/// Outcome of a single order call.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub venue: Venue,
    pub order_id: OrderId,
    /// Fully filled at the time of the response
    pub filled: bool,
    pub fill_price: Option<Decimal>,
    /// Filled size in venue order units
    pub filled_qty: Decimal,
    /// Raw venue payload, kept for the trade journal
    pub raw: serde_json::Value,
}

impl OrderResult {
    /// Journal record for an order withdrawn by a cancel request.
    pub fn cancelled(venue: Venue, order_id: &OrderId) -> Self {
        Self {
            venue,
            raw: serde_json::json!({ "orderId": order_id.to_string(), "status": "CANCELED" }),
            order_id: order_id.clone(),
            filled: false,
            fill_price: None,
            filled_qty: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

/// Order book snapshot, best level first on both sides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Deepest fetched bid, the least favourable price for a seller.
    pub fn deepest_bid(&self) -> Option<Decimal> {
        self.bids.last().map(|l| l.price)
    }

    /// Deepest fetched ask, the least favourable price for a buyer.
    pub fn deepest_ask(&self) -> Option<Decimal> {
        self.asks.last().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

/// How a venue expects a position to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseConvention {
    /// The exact original quantity must be sent with the closing side.
    ExactQuantity,
    /// The venue sizes the close itself; only the side is given.
    AutoSizeBySide,
}

/// Request to close one leg.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOrder {
    /// Side of the position being closed
    pub position_side: PositionSide,
    /// Quantity in order units; `None` for auto-size venues
    pub quantity: Option<Decimal>,
}

impl CloseOrder {
    pub fn exact(position_side: PositionSide, quantity: Decimal) -> Self {
        Self {
            position_side,
            quantity: Some(quantity),
        }
    }

    pub fn auto_size(position_side: PositionSide) -> Self {
        Self {
            position_side,
            quantity: None,
        }
    }
}

/// How a venue exposes stop orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStyle {
    /// Stop-market flag with a stop price that closes the whole position.
    StopMarketFlag,
    /// Separate trigger order carrying trigger price, order price and rule.
    TriggerWithOrderPrice,
}

/// Price comparison a trigger order fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerRule {
    AtOrAbove,
    AtOrBelow,
}

/// Stop-loss order in the venue's own convention.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOrder {
    StopMarket {
        trigger_price: Decimal,
        closing: PositionSide,
    },
    Trigger {
        trigger_price: Decimal,
        /// Zero means execute at market once triggered
        order_price: Decimal,
        rule: TriggerRule,
        closing: PositionSide,
    },
}

impl StopOrder {
    /// Build a stop closing `closing` at `trigger_price` for the given style.
    pub fn for_style(style: StopStyle, closing: PositionSide, trigger_price: Decimal) -> Self {
        match style {
            StopStyle::StopMarketFlag => StopOrder::StopMarket {
                trigger_price,
                closing,
            },
            StopStyle::TriggerWithOrderPrice => StopOrder::Trigger {
                trigger_price,
                order_price: Decimal::ZERO,
                rule: match closing {
                    // A long is stopped out when price falls, a short when it rises.
                    PositionSide::Long => TriggerRule::AtOrBelow,
                    PositionSide::Short => TriggerRule::AtOrAbove,
                },
                closing,
            },
        }
    }
}

/// An open position as reported by a venue.
#[derive(Debug, Clone, PartialEq)]
pub struct VenuePosition {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute size in order units
    pub size: Decimal,
    pub entry_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("BTC_USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol("BTCUSDT"), "BTCUSDT");
    }

    #[test]
    fn test_order_book_levels() {
        let book = OrderBook {
            bids: vec![
                BookLevel { price: dec!(100), qty: dec!(1) },
                BookLevel { price: dec!(99), qty: dec!(2) },
            ],
            asks: vec![
                BookLevel { price: dec!(101), qty: dec!(1) },
                BookLevel { price: dec!(103), qty: dec!(2) },
            ],
        };
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.deepest_bid(), Some(dec!(99)));
        assert_eq!(book.deepest_ask(), Some(dec!(103)));
        assert_eq!(book.mid(), Some(dec!(100.5)));
        assert_eq!(OrderBook::default().mid(), None);
    }

    #[test]
    fn test_stop_order_follows_venue_style() {
        let stop = StopOrder::for_style(StopStyle::StopMarketFlag, PositionSide::Long, dec!(95));
        assert_eq!(
            stop,
            StopOrder::StopMarket {
                trigger_price: dec!(95),
                closing: PositionSide::Long
            }
        );

        match StopOrder::for_style(StopStyle::TriggerWithOrderPrice, PositionSide::Short, dec!(105)) {
            StopOrder::Trigger { rule, order_price, .. } => {
                assert_eq!(rule, TriggerRule::AtOrAbove);
                assert_eq!(order_price, Decimal::ZERO);
            }
            other => panic!("unexpected stop {:?}", other),
        }
    }

    #[test]
    fn test_venue_display() {
        assert_eq!(Venue::Binance.to_string(), "Binance");
        assert_eq!(Venue::Gate.short_code(), "GT");
        assert_eq!(PositionSide::Long.opposite(), PositionSide::Short);
    }
}
