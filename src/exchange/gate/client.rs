//! Gate.io USDT-settled futures REST client (secondary venue).
//!
//! Orders are sized in contracts. The account runs in dual (hedge) mode, so
//! closes are size-zero reduce-only orders with an `auto_size` side.

use super::types::*;
use crate::config::VenueCredentials;
use crate::exchange::traits::VenueClient;
use crate::exchange::types::*;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

const FUTURES_BASE_URL: &str = "https://api.gateio.ws";
const API_PREFIX: &str = "/api/v4";
const ORDER_TAG: &str = "t-fdh";

/// Gate.io futures client implementing [`VenueClient`].
pub struct GateClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

/// `BTCUSDT` -> `BTC_USDT`.
pub fn to_contract_name(symbol: &str) -> String {
    match symbol.strip_suffix("USDT") {
        Some(base) if !base.is_empty() => format!("{}_USDT", base),
        _ => symbol.to_string(),
    }
}

impl GateClient {
    /// Create a new Gate client from configuration.
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

    /// APIv4 signature: HMAC-SHA512 over method, path, query, body hash and timestamp.
    fn sign(
        &self,
        method: &Method,
        path: &str,
        query: &str,
        body: &str,
        timestamp: i64,
    ) -> Result<String> {
        let body_hash = hex::encode(Sha512::digest(body.as_bytes()));
        let payload = format!(
            "{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            path,
            query,
            body_hash,
            timestamp
        );

        let mut mac = Hmac::<Sha512>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| anyhow!("Invalid Gate secret key: {}", e))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
        body: Option<serde_json::Value>,
        signed: bool,
    ) -> Result<serde_json::Value> {
        let path = format!("{}{}", API_PREFIX, endpoint);
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let body = body.map(|b| b.to_string()).unwrap_or_default();

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");

        if signed {
            let timestamp = Utc::now().timestamp();
            let signature = self.sign(&method, &path, &query, &body, timestamp)?;
            request = request
                .header("KEY", &self.api_key)
                .header("Timestamp", timestamp.to_string())
                .header("SIGN", signature);
        }

        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", method, endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS {
                bail!("Gate rate limit on {}: {}", endpoint, text);
            }
            bail!("Gate API error {} on {}: {}", status, endpoint, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", endpoint))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
        signed: bool,
    ) -> Result<T> {
        let value = self.send(Method::GET, endpoint, params, None, signed).await?;
        serde_json::from_value(value).with_context(|| format!("Unexpected {} payload", endpoint))
    }

    async fn submit_order(&self, order: OrderRequest) -> Result<OrderResult> {
        debug!(?order, "Placing Gate order");
        let body = serde_json::to_value(&order).context("Failed to encode order")?;
        let raw = self
            .send(Method::POST, "/futures/usdt/orders", vec![], Some(body), true)
            .await?;
        let placed: FuturesOrder =
            serde_json::from_value(raw.clone()).context("Unexpected order payload")?;

        Ok(OrderResult {
            venue: Venue::Gate,
            order_id: OrderId::regular(placed.id.to_string()),
            filled: placed.is_filled(),
            fill_price: placed.average_price(),
            filled_qty: Decimal::from((placed.size - placed.left).abs()),
            raw,
        })
    }

    /// Signed contract count for opening `side`.
    fn signed_size(side: PositionSide, size: Decimal) -> Result<i64> {
        let contracts = size
            .trunc()
            .to_i64()
            .ok_or_else(|| anyhow!("Contract count {} out of range", size))?;
        if contracts <= 0 {
            bail!("Gate orders need at least one contract, got {}", size);
        }
        Ok(match side {
            PositionSide::Long => contracts,
            PositionSide::Short => -contracts,
        })
    }

    fn auto_size(closing: PositionSide) -> AutoSize {
        match closing {
            PositionSide::Long => AutoSize::CloseLong,
            PositionSide::Short => AutoSize::CloseShort,
        }
    }

    fn close_request(symbol: &str, price: Decimal, tif: TimeInForce, close: &CloseOrder) -> OrderRequest {
        OrderRequest {
            contract: to_contract_name(symbol),
            size: 0,
            price: price.to_string(),
            tif,
            reduce_only: true,
            auto_size: Some(Self::auto_size(close.position_side)),
            text: ORDER_TAG.to_string(),
        }
    }

    fn spec_from_contract(symbol: &str, contract: &Contract) -> ContractSpec {
        ContractSpec {
            symbol: symbol.to_string(),
            price: contract.last_price.unwrap_or(contract.mark_price),
            lot_multiplier: contract.quanto_multiplier,
            step_size: Decimal::ONE,
            min_qty: Decimal::from(contract.order_size_min),
            max_qty: Decimal::from(contract.order_size_max),
            min_notional: Decimal::ZERO,
            price_tick: contract.order_price_round,
            status: if contract.is_trading() {
                TradingStatus::Trading
            } else {
                TradingStatus::Halted(
                    contract
                        .status
                        .clone()
                        .unwrap_or_else(|| "delisting".to_string()),
                )
            },
        }
    }

    fn to_levels(entries: Vec<BookEntry>) -> Vec<BookLevel> {
        entries
            .into_iter()
            .map(|e| BookLevel {
                price: e.price,
                qty: Decimal::from(e.size),
            })
            .collect()
    }

    async fn contracts(&self) -> Result<Vec<Contract>> {
        self.get("/futures/usdt/contracts", vec![], false).await
    }
}

#[async_trait]
impl VenueClient for GateClient {
    fn venue(&self) -> Venue {
        Venue::Gate
    }

    fn close_convention(&self) -> CloseConvention {
        CloseConvention::AutoSizeBySide
    }

    fn stop_style(&self) -> StopStyle {
        StopStyle::TriggerWithOrderPrice
    }

    #[instrument(skip(self))]
    async fn available_balance(&self) -> Result<Decimal> {
        let account: FuturesAccount = self.get("/futures/usdt/accounts", vec![], true).await?;
        Ok(account.available)
    }

    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()> {
        let endpoint = format!(
            "/futures/usdt/dual_comp/positions/{}/leverage",
            to_contract_name(symbol)
        );
        self.send(
            Method::POST,
            &endpoint,
            vec![("leverage", leverage.to_string())],
            None,
            true,
        )
        .await
        .context("Failed to set leverage")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn contract_spec(&self, symbol: &str) -> Result<ContractSpec> {
        let endpoint = format!("/futures/usdt/contracts/{}", to_contract_name(symbol));
        let contract: Contract = self.get(&endpoint, vec![], false).await?;
        Ok(Self::spec_from_contract(symbol, &contract))
    }

    #[instrument(skip(self))]
    async fn place_market_order(
        &self,
        symbol: &str,
        side: PositionSide,
        size: Decimal,
    ) -> Result<OrderResult> {
        self.submit_order(OrderRequest {
            contract: to_contract_name(symbol),
            size: Self::signed_size(side, size)?,
            price: "0".to_string(),
            tif: TimeInForce::Ioc,
            reduce_only: false,
            auto_size: None,
            text: ORDER_TAG.to_string(),
        })
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
        self.submit_order(OrderRequest {
            contract: to_contract_name(symbol),
            size: Self::signed_size(side, size)?,
            price: price.to_string(),
            tif: TimeInForce::Gtc,
            reduce_only: false,
            auto_size: None,
            text: ORDER_TAG.to_string(),
        })
        .await
    }

    #[instrument(skip(self))]
    async fn close_market(&self, symbol: &str, close: &CloseOrder) -> Result<OrderResult> {
        self.submit_order(Self::close_request(
            symbol,
            Decimal::ZERO,
            TimeInForce::Ioc,
            close,
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn close_limit(
        &self,
        symbol: &str,
        price: Decimal,
        close: &CloseOrder,
    ) -> Result<OrderResult> {
        self.submit_order(Self::close_request(symbol, price, TimeInForce::Gtc, close))
            .await
    }

    #[instrument(skip(self))]
    async fn place_stop_order(&self, symbol: &str, stop: &StopOrder) -> Result<OrderResult> {
        let (trigger_price, order_price, rule, closing) = match stop {
            StopOrder::Trigger {
                trigger_price,
                order_price,
                rule,
                closing,
            } => (*trigger_price, *order_price, *rule, *closing),
            StopOrder::StopMarket { .. } => {
                bail!("Gate stops are trigger orders with an explicit order price")
            }
        };

        let order = PriceTriggeredOrder {
            initial: TriggerInitial {
                contract: to_contract_name(symbol),
                size: 0,
                price: order_price.to_string(),
                tif: if order_price.is_zero() {
                    TimeInForce::Ioc
                } else {
                    TimeInForce::Gtc
                },
                reduce_only: true,
                auto_size: Self::auto_size(closing),
            },
            trigger: TriggerCondition {
                strategy_type: 0,
                price_type: 1,
                price: trigger_price.to_string(),
                rule: match rule {
                    TriggerRule::AtOrAbove => 1,
                    TriggerRule::AtOrBelow => 2,
                },
            },
        };

        let body = serde_json::to_value(&order).context("Failed to encode trigger order")?;
        let raw = self
            .send(
                Method::POST,
                "/futures/usdt/price_orders",
                vec![],
                Some(body),
                true,
            )
            .await?;
        let placed: TriggerOrderResponse =
            serde_json::from_value(raw.clone()).context("Unexpected trigger order payload")?;

        Ok(OrderResult {
            venue: Venue::Gate,
            order_id: OrderId::trigger(placed.id.to_string()),
            filled: false,
            fill_price: None,
            filled_qty: Decimal::ZERO,
            raw,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> Result<()> {
        let endpoint = match order_id.kind {
            OrderKind::Regular => format!("/futures/usdt/orders/{}", order_id.id),
            OrderKind::Trigger => format!("/futures/usdt/price_orders/{}", order_id.id),
        };
        self.send(Method::DELETE, &endpoint, vec![], None, true)
            .await
            .context("Failed to cancel Gate order")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn check_order_filled(&self, symbol: &str, order_id: &OrderId) -> Result<bool> {
        match order_id.kind {
            OrderKind::Regular => {
                let endpoint = format!("/futures/usdt/orders/{}", order_id.id);
                let order: FuturesOrder = self.get(&endpoint, vec![], true).await?;
                Ok(order.is_filled())
            }
            OrderKind::Trigger => {
                let endpoint = format!("/futures/usdt/price_orders/{}", order_id.id);
                let order: TriggerOrderStatus = self.get(&endpoint, vec![], true).await?;
                Ok(order.is_executed())
            }
        }
    }

    #[instrument(skip(self))]
    async fn order_fill_price(&self, symbol: &str, order_id: &OrderId) -> Result<Option<Decimal>> {
        if order_id.kind == OrderKind::Trigger {
            return Ok(None);
        }
        let endpoint = format!("/futures/usdt/orders/{}", order_id.id);
        let order: FuturesOrder = self.get(&endpoint, vec![], true).await?;
        Ok(order.average_price())
    }

    #[instrument(skip(self))]
    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        let book: FuturesOrderBook = self
            .get(
                "/futures/usdt/order_book",
                vec![
                    ("contract", to_contract_name(symbol)),
                    ("limit", depth.to_string()),
                ],
                false,
            )
            .await?;

        // Level sizes stay in contracts.
        Ok(OrderBook {
            bids: Self::to_levels(book.bids),
            asks: Self::to_levels(book.asks),
        })
    }

    #[instrument(skip(self))]
    async fn funding_snapshot(&self) -> Result<Vec<FundingSnapshot>> {
        let contracts = self.contracts().await?;

        Ok(contracts
            .into_iter()
            .filter(|c| c.name.ends_with("_USDT") && c.is_trading())
            .filter_map(|c| {
                let next_funding = Utc
                    .timestamp_opt(c.funding_next_apply.trunc() as i64, 0)
                    .single()?;
                Some(FundingSnapshot {
                    symbol: normalize_symbol(&c.name),
                    mark_price: c.mark_price,
                    funding_rate: c.funding_rate,
                    next_funding,
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn funding_intervals(&self) -> Result<HashMap<String, u32>> {
        let contracts = self.contracts().await?;

        Ok(contracts
            .into_iter()
            .filter(|c| c.name.ends_with("_USDT") && c.funding_interval > 0)
            .map(|c| (normalize_symbol(&c.name), (c.funding_interval / 3600) as u32))
            .collect())
    }

    #[instrument(skip(self))]
    async fn open_positions(&self) -> Result<Vec<VenuePosition>> {
        let positions: Vec<Position> = self.get("/futures/usdt/positions", vec![], true).await?;

        Ok(positions
            .into_iter()
            .filter(|p| p.size != 0)
            .map(|p| {
                let side = match p.mode.as_str() {
                    "dual_long" => PositionSide::Long,
                    "dual_short" => PositionSide::Short,
                    _ if p.size > 0 => PositionSide::Long,
                    _ => PositionSide::Short,
                };
                VenuePosition {
                    symbol: normalize_symbol(&p.contract),
                    side,
                    size: Decimal::from(p.size.abs()),
                    entry_price: p.entry_price,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GateClient {
        GateClient::new(&VenueCredentials {
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
            base_url: Some(server.uri()),
        })
        .unwrap()
    }

    fn contract_json(name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name, "quanto_multiplier": "0.0001", "last_price": "65000",
            "mark_price": "65001", "order_price_round": "0.1", "order_size_min": 1,
            "order_size_max": 1000000, "funding_rate": "0.0003",
            "funding_next_apply": 1700000000, "funding_interval": 14400,
            "in_delisting": false, "status": "trading"
        })
    }

    #[test]
    fn test_contract_name_mapping() {
        assert_eq!(to_contract_name("BTCUSDT"), "BTC_USDT");
        assert_eq!(to_contract_name("1000PEPEUSDT"), "1000PEPE_USDT");
        assert_eq!(normalize_symbol("BTC_USDT"), "BTCUSDT");
    }

    #[test]
    fn test_signed_size() {
        assert_eq!(GateClient::signed_size(PositionSide::Long, dec!(30)).unwrap(), 30);
        assert_eq!(GateClient::signed_size(PositionSide::Short, dec!(30.7)).unwrap(), -30);
        assert!(GateClient::signed_size(PositionSide::Short, dec!(0.5)).is_err());
    }

    #[tokio::test]
    async fn test_contract_spec_uses_quanto_multiplier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/futures/usdt/contracts/BTC_USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contract_json("BTC_USDT")))
            .mount(&server)
            .await;

        let spec = client_for(&server).contract_spec("BTCUSDT").await.unwrap();
        assert_eq!(spec.symbol, "BTCUSDT");
        assert_eq!(spec.lot_multiplier, dec!(0.0001));
        assert_eq!(spec.min_qty, dec!(1));
        assert_eq!(spec.price, dec!(65000));
    }

    #[tokio::test]
    async fn test_funding_intervals_in_hours() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/futures/usdt/contracts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                contract_json("BTC_USDT"),
                contract_json("ETH_USDT")
            ])))
            .mount(&server)
            .await;

        let intervals = client_for(&server).funding_intervals().await.unwrap();
        assert_eq!(intervals.get("BTCUSDT"), Some(&4));
        assert_eq!(intervals.len(), 2);
    }

    #[tokio::test]
    async fn test_close_market_sends_auto_size() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/futures/usdt/orders"))
            .and(header_exists("SIGN"))
            .and(body_partial_json(serde_json::json!({
                "contract": "BTC_USDT", "size": 0, "reduce_only": true,
                "auto_size": "close_short", "tif": "ioc"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 55, "contract": "BTC_USDT", "size": 30, "left": 0,
                "fill_price": "65003", "status": "finished", "finish_as": "filled"
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .close_market("BTCUSDT", &CloseOrder::auto_size(PositionSide::Short))
            .await
            .unwrap();
        assert!(result.filled);
        assert_eq!(result.order_id, OrderId::regular("55"));
        assert_eq!(result.fill_price, Some(dec!(65003)));
    }

    #[tokio::test]
    async fn test_trigger_order_id_is_tagged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/futures/usdt/price_orders"))
            .and(body_partial_json(serde_json::json!({
                "trigger": {"rule": 2, "price": "64545"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 88})))
            .mount(&server)
            .await;

        let stop = StopOrder::for_style(
            StopStyle::TriggerWithOrderPrice,
            PositionSide::Long,
            dec!(64545),
        );
        let result = client_for(&server)
            .place_stop_order("BTCUSDT", &stop)
            .await
            .unwrap();
        assert_eq!(result.order_id, OrderId::trigger("88"));
    }

    #[tokio::test]
    async fn test_api_error_surfaces_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/futures/usdt/accounts"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"label":"INVALID_SIGNATURE"}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).available_balance().await.unwrap_err();
        assert!(err.to_string().contains("INVALID_SIGNATURE"));
    }
}
