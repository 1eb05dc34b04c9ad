//! Binance USDⓈ-M futures REST client (primary venue).
//!
//! The account is expected to run in hedge mode, so every order carries a
//! `positionSide` and closes must send the exact quantity being closed.

use super::types::*;
use crate::config::VenueCredentials;
use crate::exchange::traits::VenueClient;
use crate::exchange::types::*;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const DEFAULT_FUNDING_INTERVAL_HOURS: u32 = 8;
const DEPTH_LIMITS: [u32; 7] = [5, 10, 20, 50, 100, 500, 1000];

/// Binance futures client implementing [`VenueClient`].
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &VenueCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| FUTURES_BASE_URL.to_string()),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| anyhow!("Invalid Binance secret key: {}", e))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn encode(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Send a request and return the raw JSON body, failing on non-2xx.
    async fn send(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
        signed: bool,
    ) -> Result<serde_json::Value> {
        let mut query = Self::encode(&params);
        if signed {
            let timestamp = format!("timestamp={}", Utc::now().timestamp_millis());
            query = if query.is_empty() {
                timestamp
            } else {
                format!("{}&{}", query, timestamp)
            };
            let signature = self.sign(&query)?;
            query = format!("{}&signature={}", query, signature);
        }

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.http.request(method.clone(), &url);
        if signed {
            request = request.header("X-MBX-APIKEY", &self.api_key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", method, path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
                bail!("Binance rate limit on {}: {}", path, body);
            }
            bail!("Binance API error {} on {}: {}", status, path, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&str, String)>,
        signed: bool,
    ) -> Result<T> {
        let value = self.send(Method::GET, path, params, signed).await?;
        serde_json::from_value(value).with_context(|| format!("Unexpected {} payload", path))
    }

    /// Submit an order and convert the venue response.
    async fn submit_order(&self, params: Vec<(&str, String)>) -> Result<OrderResult> {
        debug!(?params, "Placing Binance order");
        let raw = self.send(Method::POST, "/fapi/v1/order", params, true).await?;
        let order: OrderResponse =
            serde_json::from_value(raw.clone()).context("Unexpected order payload")?;
        Ok(Self::to_result(order, raw))
    }

    fn to_result(order: OrderResponse, raw: serde_json::Value) -> OrderResult {
        OrderResult {
            venue: Venue::Binance,
            order_id: OrderId::regular(order.order_id.to_string()),
            filled: order.status == OrderStatus::Filled,
            fill_price: order.fill_price(),
            filled_qty: order.executed_qty,
            raw,
        }
    }

    async fn query_order(&self, symbol: &str, order_id: &OrderId) -> Result<OrderResponse> {
        self.get(
            "/fapi/v1/order",
            vec![
                ("symbol", symbol.to_string()),
                ("orderId", order_id.id.clone()),
            ],
            true,
        )
        .await
    }

    fn open_side(side: PositionSide) -> (OrderSide, BinancePositionSide) {
        match side {
            PositionSide::Long => (OrderSide::Buy, BinancePositionSide::Long),
            PositionSide::Short => (OrderSide::Sell, BinancePositionSide::Short),
        }
    }

    fn close_side(side: PositionSide) -> (OrderSide, BinancePositionSide) {
        match side {
            PositionSide::Long => (OrderSide::Sell, BinancePositionSide::Long),
            PositionSide::Short => (OrderSide::Buy, BinancePositionSide::Short),
        }
    }

    fn side_str(side: OrderSide) -> String {
        match side {
            OrderSide::Buy => "BUY".to_string(),
            OrderSide::Sell => "SELL".to_string(),
        }
    }

    fn position_side_str(side: BinancePositionSide) -> String {
        match side {
            BinancePositionSide::Both => "BOTH".to_string(),
            BinancePositionSide::Long => "LONG".to_string(),
            BinancePositionSide::Short => "SHORT".to_string(),
        }
    }

    fn close_quantity(close: &CloseOrder) -> Result<Decimal> {
        close
            .quantity
            .ok_or_else(|| anyhow!("Binance closes require the exact position quantity"))
    }

    async fn last_price(&self, symbol: &str) -> Result<Decimal> {
        let ticker: TickerPrice = self
            .get(
                "/fapi/v1/ticker/price",
                vec![("symbol", symbol.to_string())],
                false,
            )
            .await?;
        Ok(ticker.price)
    }

    fn parse_levels(levels: &[[String; 2]]) -> Result<Vec<BookLevel>> {
        levels
            .iter()
            .map(|[price, qty]| {
                Ok(BookLevel {
                    price: price.parse().context("Invalid depth price")?,
                    qty: qty.parse().context("Invalid depth quantity")?,
                })
            })
            .collect()
    }

    /// Build a [`ContractSpec`] from exchange info filters.
    fn spec_from_info(info: &SymbolInfo, price: Decimal) -> Result<ContractSpec> {
        let mut tick = None;
        let mut lot = None;
        let mut min_notional = Decimal::ZERO;

        for filter in &info.filters {
            match filter {
                SymbolFilter::Price { tick_size } => tick = Some(*tick_size),
                SymbolFilter::LotSize {
                    min_qty,
                    max_qty,
                    step_size,
                } => lot = Some((*min_qty, *max_qty, *step_size)),
                SymbolFilter::MinNotional { notional } => min_notional = *notional,
                SymbolFilter::Other => {}
            }
        }

        let (min_qty, max_qty, step_size) =
            lot.ok_or_else(|| anyhow!("{} has no LOT_SIZE filter", info.symbol))?;

        Ok(ContractSpec {
            symbol: info.symbol.clone(),
            price,
            lot_multiplier: Decimal::ONE,
            step_size,
            min_qty,
            max_qty,
            min_notional,
            price_tick: tick.unwrap_or(Decimal::ZERO),
            status: if info.status == "TRADING" {
                TradingStatus::Trading
            } else {
                TradingStatus::Halted(info.status.clone())
            },
        })
    }
}

#[async_trait]
impl VenueClient for BinanceClient {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn close_convention(&self) -> CloseConvention {
        CloseConvention::ExactQuantity
    }

    fn stop_style(&self) -> StopStyle {
        StopStyle::StopMarketFlag
    }

    #[instrument(skip(self))]
    async fn available_balance(&self) -> Result<Decimal> {
        let balances: Vec<AccountBalance> = self.get("/fapi/v2/balance", vec![], true).await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset == "USDT")
            .map(|b| b.available_balance)
            .unwrap_or(Decimal::ZERO))
    }

    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()> {
        self.send(
            Method::POST,
            "/fapi/v1/leverage",
            vec![
                ("symbol", symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
            true,
        )
        .await
        .context("Failed to set leverage")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn contract_spec(&self, symbol: &str) -> Result<ContractSpec> {
        let (info, price) = tokio::try_join!(
            self.get::<ExchangeInfo>(
                "/fapi/v1/exchangeInfo",
                vec![("symbol", symbol.to_string())],
                false
            ),
            self.last_price(symbol),
        )?;

        let symbol_info = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| anyhow!("{} not listed on Binance futures", symbol))?;

        Self::spec_from_info(symbol_info, price)
    }

    #[instrument(skip(self))]
    async fn place_market_order(
        &self,
        symbol: &str,
        side: PositionSide,
        size: Decimal,
    ) -> Result<OrderResult> {
        let (order_side, position_side) = Self::open_side(side);
        self.submit_order(vec![
            ("symbol", symbol.to_string()),
            ("side", Self::side_str(order_side)),
            ("positionSide", Self::position_side_str(position_side)),
            ("type", "MARKET".to_string()),
            ("quantity", size.to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ])
        .await
    }

    #[instrument(skip(self))]
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: PositionSide,
        price: Decimal,
        size: Decimal,
    ) -> Result<OrderResult> {
        let (order_side, position_side) = Self::open_side(side);
        self.submit_order(vec![
            ("symbol", symbol.to_string()),
            ("side", Self::side_str(order_side)),
            ("positionSide", Self::position_side_str(position_side)),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", size.to_string()),
            ("price", price.to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ])
        .await
    }

    #[instrument(skip(self))]
    async fn close_market(&self, symbol: &str, close: &CloseOrder) -> Result<OrderResult> {
        let quantity = Self::close_quantity(close)?;
        let (order_side, position_side) = Self::close_side(close.position_side);
        self.submit_order(vec![
            ("symbol", symbol.to_string()),
            ("side", Self::side_str(order_side)),
            ("positionSide", Self::position_side_str(position_side)),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ])
        .await
    }

    #[instrument(skip(self))]
    async fn close_limit(
        &self,
        symbol: &str,
        price: Decimal,
        close: &CloseOrder,
    ) -> Result<OrderResult> {
        let quantity = Self::close_quantity(close)?;
        let (order_side, position_side) = Self::close_side(close.position_side);
        self.submit_order(vec![
            ("symbol", symbol.to_string()),
            ("side", Self::side_str(order_side)),
            ("positionSide", Self::position_side_str(position_side)),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", quantity.to_string()),
            ("price", price.to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ])
        .await
    }

    #[instrument(skip(self))]
    async fn place_stop_order(&self, symbol: &str, stop: &StopOrder) -> Result<OrderResult> {
        let (trigger_price, closing) = match stop {
            StopOrder::StopMarket {
                trigger_price,
                closing,
            } => (*trigger_price, *closing),
            StopOrder::Trigger { .. } => {
                bail!("Binance stops are stop-market orders without an order price")
            }
        };

        let (order_side, position_side) = Self::close_side(closing);
        self.submit_order(vec![
            ("symbol", symbol.to_string()),
            ("side", Self::side_str(order_side)),
            ("positionSide", Self::position_side_str(position_side)),
            ("type", "STOP_MARKET".to_string()),
            ("stopPrice", trigger_price.to_string()),
            ("closePosition", "true".to_string()),
            ("workingType", "MARK_PRICE".to_string()),
        ])
        .await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> Result<()> {
        self.send(
            Method::DELETE,
            "/fapi/v1/order",
            vec![
                ("symbol", symbol.to_string()),
                ("orderId", order_id.id.clone()),
            ],
            true,
        )
        .await
        .context("Failed to cancel Binance order")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn check_order_filled(&self, symbol: &str, order_id: &OrderId) -> Result<bool> {
        let order = self.query_order(symbol, order_id).await?;
        Ok(order.status == OrderStatus::Filled)
    }

    #[instrument(skip(self))]
    async fn order_fill_price(&self, symbol: &str, order_id: &OrderId) -> Result<Option<Decimal>> {
        let order = self.query_order(symbol, order_id).await?;
        Ok(order.fill_price())
    }

    #[instrument(skip(self))]
    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        // The endpoint only accepts a fixed set of limits.
        let limit = DEPTH_LIMITS
            .iter()
            .copied()
            .find(|l| *l >= depth)
            .unwrap_or(1000);

        let book: Depth = self
            .get(
                "/fapi/v1/depth",
                vec![
                    ("symbol", symbol.to_string()),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;

        let mut bids = Self::parse_levels(&book.bids)?;
        let mut asks = Self::parse_levels(&book.asks)?;
        bids.truncate(depth as usize);
        asks.truncate(depth as usize);
        Ok(OrderBook { bids, asks })
    }

    #[instrument(skip(self))]
    async fn funding_snapshot(&self) -> Result<Vec<FundingSnapshot>> {
        let rates: Vec<PremiumIndex> = self.get("/fapi/v1/premiumIndex", vec![], false).await?;

        Ok(rates
            .into_iter()
            .filter(|r| r.next_funding_time > 0)
            .filter_map(|r| {
                let next_funding = Utc.timestamp_millis_opt(r.next_funding_time).single()?;
                Some(FundingSnapshot {
                    symbol: r.symbol,
                    mark_price: r.mark_price,
                    funding_rate: r.last_funding_rate,
                    next_funding,
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn funding_intervals(&self) -> Result<HashMap<String, u32>> {
        // fundingInfo only lists symbols with a non-default interval.
        let (rates, overrides) = tokio::try_join!(
            self.get::<Vec<PremiumIndex>>("/fapi/v1/premiumIndex", vec![], false),
            self.get::<Vec<FundingInfo>>("/fapi/v1/fundingInfo", vec![], false),
        )?;

        let mut intervals: HashMap<String, u32> = rates
            .into_iter()
            .filter(|r| r.next_funding_time > 0)
            .map(|r| (r.symbol, DEFAULT_FUNDING_INTERVAL_HOURS))
            .collect();

        for info in overrides {
            intervals.insert(info.symbol, info.funding_interval_hours);
        }

        Ok(intervals)
    }

    #[instrument(skip(self))]
    async fn open_positions(&self) -> Result<Vec<VenuePosition>> {
        let positions: Vec<PositionRisk> = self.get("/fapi/v2/positionRisk", vec![], true).await?;

        Ok(positions
            .into_iter()
            .filter(|p| p.position_amt != Decimal::ZERO)
            .map(|p| {
                let side = match p.position_side {
                    BinancePositionSide::Long => PositionSide::Long,
                    BinancePositionSide::Short => PositionSide::Short,
                    BinancePositionSide::Both if p.position_amt > Decimal::ZERO => {
                        PositionSide::Long
                    }
                    BinancePositionSide::Both => PositionSide::Short,
                };
                VenuePosition {
                    symbol: p.symbol,
                    side,
                    size: p.position_amt.abs(),
                    entry_price: p.entry_price,
                }
            })
            .collect())
    }
}
