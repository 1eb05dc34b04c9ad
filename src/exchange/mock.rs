//! Scriptable in-memory venue for coordinator tests.
//!
//! Market orders fill immediately at the contract price. Limit closes and
//! stop orders rest until a test fills or triggers them. Any operation can
//! be scripted to fail a number of times.

use super::traits::VenueClient;
use super::types::*;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Venue operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Balance,
    SetLeverage,
    ContractSpec,
    MarketOrder,
    LimitOrder,
    CloseMarket,
    CloseLimit,
    StopOrder,
    Cancel,
    CheckOrder,
    FillPrice,
    OrderBook,
    FundingSnapshot,
    FundingIntervals,
    OpenPositions,
}

/// What a resting order does once filled.
#[derive(Debug, Clone, PartialEq)]
pub enum RestingAction {
    Open { side: PositionSide, size: Decimal },
    Close(CloseOrder),
}

#[derive(Debug, Clone)]
pub struct MockOrder {
    pub symbol: String,
    pub id: OrderId,
    pub price: Decimal,
    pub action: RestingAction,
    pub filled: bool,
    pub cancelled: bool,
    /// Finished without filling completely (IOC remainder expired)
    pub expired: bool,
}

/// One accepted call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCall {
    pub op: MockOp,
    pub symbol: String,
    pub side: Option<PositionSide>,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
}

#[derive(Debug, Default)]
pub struct MockVenueState {
    pub balance: Decimal,
    pub specs: HashMap<String, ContractSpec>,
    pub books: HashMap<String, OrderBook>,
    pub funding: Vec<FundingSnapshot>,
    pub intervals: HashMap<String, u32>,
    pub positions: HashMap<String, VenuePosition>,
    pub orders: HashMap<String, MockOrder>,
    pub calls: Vec<OrderCall>,
    pub leverage: HashMap<String, u8>,
    /// Remaining failures per operation; `u32::MAX` fails forever
    failures: HashMap<MockOp, u32>,
    /// Market opens are acknowledged without filling
    pub unfilled_market_orders: bool,
    /// Market opens execute only this quantity and expire the rest
    pub partial_market_fill: Option<Decimal>,
}

/// In-memory [`VenueClient`] used by tests.
pub struct MockVenue {
    venue: Venue,
    state: Arc<RwLock<MockVenueState>>,
    order_id_counter: AtomicU64,
}

impl MockVenue {
    pub fn new(venue: Venue) -> Self {
        let state = MockVenueState {
            balance: dec!(1000),
            ..Default::default()
        };
        Self {
            venue,
            state: Arc::new(RwLock::new(state)),
            order_id_counter: AtomicU64::new(1),
        }
    }

    fn next_order_id(&self) -> String {
        let id = self.order_id_counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.venue.short_code(), id)
    }

    pub async fn set_balance(&self, balance: Decimal) {
        self.state.write().await.balance = balance;
    }

    pub async fn set_spec(&self, spec: ContractSpec) {
        self.state
            .write()
            .await
            .specs
            .insert(spec.symbol.clone(), spec);
    }

    pub async fn set_book(&self, symbol: &str, book: OrderBook) {
        self.state
            .write()
            .await
            .books
            .insert(symbol.to_string(), book);
    }

    pub async fn set_funding(&self, funding: Vec<FundingSnapshot>) {
        self.state.write().await.funding = funding;
    }

    pub async fn set_intervals(&self, intervals: HashMap<String, u32>) {
        self.state.write().await.intervals = intervals;
    }

    pub async fn set_position(&self, position: VenuePosition) {
        self.state
            .write()
            .await
            .positions
            .insert(position.symbol.clone(), position);
    }

    pub async fn set_unfilled_market_orders(&self, unfilled: bool) {
        self.state.write().await.unfilled_market_orders = unfilled;
    }

    /// Execute market opens only up to `qty`, reporting them unfilled.
    pub async fn set_partial_market_fill(&self, qty: Option<Decimal>) {
        self.state.write().await.partial_market_fill = qty;
    }

    /// Make `op` fail on every call until cleared.
    pub async fn fail(&self, op: MockOp) {
        self.state.write().await.failures.insert(op, u32::MAX);
    }

    /// Make `op` fail for its next `times` calls.
    pub async fn fail_times(&self, op: MockOp, times: u32) {
        self.state.write().await.failures.insert(op, times);
    }

    pub async fn clear_failure(&self, op: MockOp) {
        self.state.write().await.failures.remove(&op);
    }

    pub async fn position(&self, symbol: &str) -> Option<VenuePosition> {
        self.state.read().await.positions.get(symbol).cloned()
    }

    pub async fn calls(&self) -> Vec<OrderCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn count_calls(&self, op: MockOp) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    pub async fn order(&self, id: &OrderId) -> Option<MockOrder> {
        self.state.read().await.orders.get(&id.id).cloned()
    }

    /// Resting (unfilled, uncancelled) orders for a symbol.
    pub async fn resting_orders(&self, symbol: &str) -> Vec<MockOrder> {
        self.state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.symbol == symbol && !o.filled && !o.cancelled && !o.expired)
            .cloned()
            .collect()
    }

    /// Fill a resting order and apply its position effect.
    pub async fn fill_order(&self, id: &OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id.id)
            .ok_or_else(|| anyhow!("unknown order {}", id))?;
        if order.filled || order.cancelled || order.expired {
            bail!("order {} is no longer resting", id);
        }
        order.filled = true;
        let (symbol, action, price) = (order.symbol.clone(), order.action.clone(), order.price);
        Self::apply(&mut state, &symbol, &action, price);
        Ok(())
    }

    /// Fire the resting stop order for `symbol`, if any.
    pub async fn trigger_stop(&self, symbol: &str) -> Result<OrderId> {
        let id = {
            let state = self.state.read().await;
            state
                .orders
                .values()
                .find(|o| {
                    o.symbol == symbol
                        && o.id.kind == OrderKind::Trigger
                        && !o.filled
                        && !o.cancelled
                })
                .map(|o| o.id.clone())
                .ok_or_else(|| anyhow!("no resting stop for {}", symbol))?
        };
        self.fill_order(&id).await?;
        Ok(id)
    }

    async fn check(&self, op: MockOp) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(remaining) = state.failures.get_mut(&op) {
            if *remaining == u32::MAX {
                bail!("{} {:?} unavailable", self.venue, op);
            }
            if *remaining > 0 {
                *remaining -= 1;
                bail!("{} {:?} failed", self.venue, op);
            }
        }
        Ok(())
    }

    fn apply(state: &mut MockVenueState, symbol: &str, action: &RestingAction, price: Decimal) {
        match action {
            RestingAction::Open { side, size } => {
                let position = state
                    .positions
                    .entry(symbol.to_string())
                    .or_insert_with(|| VenuePosition {
                        symbol: symbol.to_string(),
                        side: *side,
                        size: Decimal::ZERO,
                        entry_price: price,
                    });
                position.size += *size;
            }
            RestingAction::Close(close) => {
                let remove = match (state.positions.get_mut(symbol), close.quantity) {
                    (Some(position), Some(qty)) if position.side == close.position_side => {
                        position.size -= qty;
                        position.size <= Decimal::ZERO
                    }
                    (Some(position), None) => position.side == close.position_side,
                    _ => false,
                };
                if remove {
                    state.positions.remove(symbol);
                }
            }
        }
    }

    async fn record(&self, call: OrderCall) {
        debug!(venue = %self.venue, ?call, "Mock venue call");
        self.state.write().await.calls.push(call);
    }

    async fn price_for(&self, symbol: &str) -> Result<Decimal> {
        self.state
            .read()
            .await
            .specs
            .get(symbol)
            .map(|s| s.price)
            .ok_or_else(|| anyhow!("no contract spec for {}", symbol))
    }

    fn result(&self, order_id: OrderId, filled: bool, price: Option<Decimal>, qty: Decimal) -> OrderResult {
        OrderResult {
            venue: self.venue,
            raw: serde_json::json!({
                "orderId": order_id.id,
                "filled": filled,
                "price": price.map(|p| p.to_string()),
            }),
            order_id,
            filled,
            fill_price: price,
            filled_qty: if filled { qty } else { Decimal::ZERO },
        }
    }

    /// Execute a market action immediately.
    async fn execute_market(&self, symbol: &str, action: RestingAction) -> Result<OrderResult> {
        let price = self.price_for(symbol).await?;
        let id = OrderId::regular(self.next_order_id());
        let mut state = self.state.write().await;

        let partial = match &action {
            RestingAction::Open { side, size } if !state.unfilled_market_orders => state
                .partial_market_fill
                .filter(|qty| qty < size)
                .map(|qty| (*side, qty)),
            _ => None,
        };
        if let Some((side, executed)) = partial {
            Self::apply(&mut state, symbol, &RestingAction::Open { side, size: executed }, price);
        }
        let expired = partial.is_some();
        let filled = match action {
            RestingAction::Open { .. } => !state.unfilled_market_orders && !expired,
            RestingAction::Close(_) => true,
        };
        let qty = match &action {
            RestingAction::Open { size, .. } => *size,
            RestingAction::Close(close) => close.quantity.unwrap_or_else(|| {
                state
                    .positions
                    .get(symbol)
                    .map(|p| p.size)
                    .unwrap_or(Decimal::ZERO)
            }),
        };
        if filled {
            Self::apply(&mut state, symbol, &action, price);
        }
        state.orders.insert(
            id.id.clone(),
            MockOrder {
                symbol: symbol.to_string(),
                id: id.clone(),
                price,
                action,
                filled,
                cancelled: false,
                expired,
            },
        );
        drop(state);

        let mut result = self.result(id, filled, filled.then_some(price), qty);
        if let Some((_, executed)) = partial {
            result.fill_price = Some(price);
            result.filled_qty = executed;
        }
        Ok(result)
    }

    async fn rest(&self, symbol: &str, id: OrderId, price: Decimal, action: RestingAction) -> OrderResult {
        self.state.write().await.orders.insert(
            id.id.clone(),
            MockOrder {
                symbol: symbol.to_string(),
                id: id.clone(),
                price,
                action,
                filled: false,
                cancelled: false,
                expired: false,
            },
        );
        self.result(id, false, None, Decimal::ZERO)
    }
}

#[async_trait]
impl VenueClient for MockVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn close_convention(&self) -> CloseConvention {
        match self.venue {
            Venue::Binance => CloseConvention::ExactQuantity,
            Venue::Gate => CloseConvention::AutoSizeBySide,
        }
    }

    fn stop_style(&self) -> StopStyle {
        match self.venue {
            Venue::Binance => StopStyle::StopMarketFlag,
            Venue::Gate => StopStyle::TriggerWithOrderPrice,
        }
    }

    async fn available_balance(&self) -> Result<Decimal> {
        self.check(MockOp::Balance).await?;
        Ok(self.state.read().await.balance)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()> {
        self.check(MockOp::SetLeverage).await?;
        self.state
            .write()
            .await
            .leverage
            .insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn contract_spec(&self, symbol: &str) -> Result<ContractSpec> {
        self.check(MockOp::ContractSpec).await?;
        self.state
            .read()
            .await
            .specs
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("{} not listed on {}", symbol, self.venue))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: PositionSide,
        size: Decimal,
    ) -> Result<OrderResult> {
        self.check(MockOp::MarketOrder).await?;
        self.record(OrderCall {
            op: MockOp::MarketOrder,
            symbol: symbol.to_string(),
            side: Some(side),
            price: None,
            size: Some(size),
        })
        .await;
        self.execute_market(symbol, RestingAction::Open { side, size })
            .await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: PositionSide,
        price: Decimal,
        size: Decimal,
    ) -> Result<OrderResult> {
        self.check(MockOp::LimitOrder).await?;
        self.record(OrderCall {
            op: MockOp::LimitOrder,
            symbol: symbol.to_string(),
            side: Some(side),
            price: Some(price),
            size: Some(size),
        })
        .await;
        let id = OrderId::regular(self.next_order_id());
        Ok(self
            .rest(symbol, id, price, RestingAction::Open { side, size })
            .await)
    }

    async fn close_market(&self, symbol: &str, close: &CloseOrder) -> Result<OrderResult> {
        self.check(MockOp::CloseMarket).await?;
        self.record(OrderCall {
            op: MockOp::CloseMarket,
            symbol: symbol.to_string(),
            side: Some(close.position_side),
            price: None,
            size: close.quantity,
        })
        .await;
        self.execute_market(symbol, RestingAction::Close(close.clone()))
            .await
    }

    async fn close_limit(
        &self,
        symbol: &str,
        price: Decimal,
        close: &CloseOrder,
    ) -> Result<OrderResult> {
        self.check(MockOp::CloseLimit).await?;
        self.record(OrderCall {
            op: MockOp::CloseLimit,
            symbol: symbol.to_string(),
            side: Some(close.position_side),
            price: Some(price),
            size: close.quantity,
        })
        .await;
        let id = OrderId::regular(self.next_order_id());
        Ok(self
            .rest(symbol, id, price, RestingAction::Close(close.clone()))
            .await)
    }

    async fn place_stop_order(&self, symbol: &str, stop: &StopOrder) -> Result<OrderResult> {
        self.check(MockOp::StopOrder).await?;
        let (trigger_price, closing) = match stop {
            StopOrder::StopMarket {
                trigger_price,
                closing,
            }
            | StopOrder::Trigger {
                trigger_price,
                closing,
                ..
            } => (*trigger_price, *closing),
        };
        self.record(OrderCall {
            op: MockOp::StopOrder,
            symbol: symbol.to_string(),
            side: Some(closing),
            price: Some(trigger_price),
            size: None,
        })
        .await;
        let id = match self.stop_style() {
            StopStyle::StopMarketFlag => OrderId::regular(self.next_order_id()),
            StopStyle::TriggerWithOrderPrice => OrderId::trigger(self.next_order_id()),
        };
        Ok(self
            .rest(
                symbol,
                id,
                trigger_price,
                RestingAction::Close(CloseOrder::auto_size(closing)),
            )
            .await)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> Result<()> {
        self.check(MockOp::Cancel).await?;
        self.record(OrderCall {
            op: MockOp::Cancel,
            symbol: symbol.to_string(),
            side: None,
            price: None,
            size: None,
        })
        .await;
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id.id)
            .ok_or_else(|| anyhow!("unknown order {}", order_id))?;
        if order.filled {
            bail!("order {} already filled", order_id);
        }
        if order.expired {
            bail!("order {} already finished", order_id);
        }
        order.cancelled = true;
        Ok(())
    }

    async fn check_order_filled(&self, _symbol: &str, order_id: &OrderId) -> Result<bool> {
        self.check(MockOp::CheckOrder).await?;
        self.state
            .read()
            .await
            .orders
            .get(&order_id.id)
            .map(|o| o.filled)
            .ok_or_else(|| anyhow!("unknown order {}", order_id))
    }

    async fn order_fill_price(&self, _symbol: &str, order_id: &OrderId) -> Result<Option<Decimal>> {
        self.check(MockOp::FillPrice).await?;
        let state = self.state.read().await;
        let order = state
            .orders
            .get(&order_id.id)
            .ok_or_else(|| anyhow!("unknown order {}", order_id))?;
        Ok(order.filled.then_some(order.price))
    }

    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        self.check(MockOp::OrderBook).await?;
        let mut book = self
            .state
            .read()
            .await
            .books
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("no order book for {}", symbol))?;
        book.bids.truncate(depth as usize);
        book.asks.truncate(depth as usize);
        Ok(book)
    }

    async fn funding_snapshot(&self) -> Result<Vec<FundingSnapshot>> {
        self.check(MockOp::FundingSnapshot).await?;
        Ok(self.state.read().await.funding.clone())
    }

    async fn funding_intervals(&self) -> Result<HashMap<String, u32>> {
        self.check(MockOp::FundingIntervals).await?;
        Ok(self.state.read().await.intervals.clone())
    }

    async fn open_positions(&self) -> Result<Vec<VenuePosition>> {
        self.check(MockOp::OpenPositions).await?;
        Ok(self.state.read().await.positions.values().cloned().collect())
    }
}
