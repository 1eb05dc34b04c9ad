//! Venue-agnostic trading interface.
//!
//! Both legs of a hedge are driven through [`VenueClient`], so the
//! coordinators hold two independently owned handles rather than a
//! combined client. Every method is a network call that may fail; callers
//! treat `Err` as "no result", never as success.

use super::types::*;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Returns the venue identifier.
    fn venue(&self) -> Venue;

    /// How this venue closes positions.
    fn close_convention(&self) -> CloseConvention;

    /// How this venue exposes stop orders.
    fn stop_style(&self) -> StopStyle;

    /// Available USDT margin balance.
    async fn available_balance(&self) -> Result<Decimal>;

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()>;

    /// Current order constraints and price; never cached across ticks.
    async fn contract_spec(&self, symbol: &str) -> Result<ContractSpec>;

    /// Open (or add to) a position at market. `size` is in order units.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: PositionSide,
        size: Decimal,
    ) -> Result<OrderResult>;

    /// Open (or add to) a position with a resting limit order.
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: PositionSide,
        price: Decimal,
        size: Decimal,
    ) -> Result<OrderResult>;

    async fn close_market(&self, symbol: &str, close: &CloseOrder) -> Result<OrderResult>;

    async fn close_limit(
        &self,
        symbol: &str,
        price: Decimal,
        close: &CloseOrder,
    ) -> Result<OrderResult>;

    async fn place_stop_order(&self, symbol: &str, stop: &StopOrder) -> Result<OrderResult>;

    async fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> Result<()>;

    /// Whether the order is completely filled (or, for triggers, executed).
    async fn check_order_filled(&self, symbol: &str, order_id: &OrderId) -> Result<bool>;

    /// Average fill price, once known.
    async fn order_fill_price(&self, symbol: &str, order_id: &OrderId) -> Result<Option<Decimal>>;

    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook>;

    /// Funding snapshot for every perpetual on the venue.
    async fn funding_snapshot(&self) -> Result<Vec<FundingSnapshot>>;

    /// Funding interval in hours keyed by normalized symbol.
    async fn funding_intervals(&self) -> Result<HashMap<String, u32>>;

    /// All non-zero positions.
    async fn open_positions(&self) -> Result<Vec<VenuePosition>>;
}
