//! Type definitions for Gate.io USDT-settled futures (APIv4).
//!
//! Gate encodes most numbers as strings and sizes as signed integer contract
//! counts: positive for long, negative for short.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Contract details from `/futures/usdt/contracts`.
#[derive(Debug, Clone, Deserialize)]
pub struct Contract {
    /// Native contract name, e.g. `BTC_USDT`
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub quanto_multiplier: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub last_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub order_price_round: Decimal,
    pub order_size_min: i64,
    pub order_size_max: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub funding_rate: Decimal,
    /// Seconds since epoch
    pub funding_next_apply: f64,
    /// Seconds
    #[serde(default)]
    pub funding_interval: u64,
    #[serde(default)]
    pub in_delisting: bool,
    #[serde(default)]
    pub status: Option<String>,
}

impl Contract {
    pub fn is_trading(&self) -> bool {
        !self.in_delisting && self.status.as_deref().map_or(true, |s| s == "trading")
    }
}

/// Futures account summary from `/futures/usdt/accounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct FuturesAccount {
    #[serde(with = "rust_decimal::serde::str")]
    pub available: Decimal,
    #[serde(default)]
    pub currency: String,
}

/// Order submission body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderRequest {
    pub contract: String,
    pub size: i64,
    /// `"0"` with `ioc` for market orders
    pub price: String,
    pub tif: TimeInForce,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_size: Option<AutoSize>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Gtc,
    Ioc,
}

/// Side closed by a size-zero, reduce-only order in dual mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSize {
    CloseLong,
    CloseShort,
}

/// Order as returned by `/futures/usdt/orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct FuturesOrder {
    pub id: i64,
    pub contract: String,
    pub size: i64,
    #[serde(default)]
    pub left: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub fill_price: Option<Decimal>,
    pub status: String,
    #[serde(default)]
    pub finish_as: Option<String>,
}

impl FuturesOrder {
    pub fn is_filled(&self) -> bool {
        self.status == "finished" && self.finish_as.as_deref() == Some("filled")
    }

    /// Fill price, treating Gate's `"0"` placeholder as unknown.
    pub fn average_price(&self) -> Option<Decimal> {
        self.fill_price.filter(|p| *p > Decimal::ZERO)
    }
}

/// Price-triggered order body for `/futures/usdt/price_orders`.
#[derive(Debug, Clone, Serialize)]
pub struct PriceTriggeredOrder {
    pub initial: TriggerInitial,
    pub trigger: TriggerCondition,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerInitial {
    pub contract: String,
    pub size: i64,
    pub price: String,
    pub tif: TimeInForce,
    pub reduce_only: bool,
    pub auto_size: AutoSize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerCondition {
    /// 0: trigger on price
    pub strategy_type: u8,
    /// 1: mark price
    pub price_type: u8,
    pub price: String,
    /// 1: `>=`, 2: `<=`
    pub rule: u8,
}

/// Response to a trigger order submission.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerOrderResponse {
    pub id: i64,
}

/// Trigger order state from `/futures/usdt/price_orders/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerOrderStatus {
    pub id: i64,
    pub status: String,
    #[serde(default)]
    pub finish_as: Option<String>,
    #[serde(default)]
    pub trade_id: Option<i64>,
}

impl TriggerOrderStatus {
    pub fn is_executed(&self) -> bool {
        self.status == "finished" && self.finish_as.as_deref() == Some("succeeded")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookEntry {
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "s")]
    pub size: i64,
}

/// Depth snapshot from `/futures/usdt/order_book`.
#[derive(Debug, Clone, Deserialize)]
pub struct FuturesOrderBook {
    pub asks: Vec<BookEntry>,
    pub bids: Vec<BookEntry>,
}

/// Position from `/futures/usdt/positions`.
#[derive(Debug, Clone, Deserialize)]
pub struct Position {
    pub contract: String,
    pub size: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(default)]
    pub mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_contract_decode() {
        let json = r#"{
            "name": "BTC_USDT", "quanto_multiplier": "0.0001", "last_price": "65000",
            "mark_price": "65001.2", "order_price_round": "0.1", "order_size_min": 1,
            "order_size_max": 1000000, "funding_rate": "0.0003",
            "funding_next_apply": 1700000000, "funding_interval": 28800,
            "in_delisting": false, "status": "trading", "type": "direct"
        }"#;
        let contract: Contract = serde_json::from_str(json).unwrap();
        assert_eq!(contract.quanto_multiplier, dec!(0.0001));
        assert_eq!(contract.funding_interval, 28800);
        assert!(contract.is_trading());
    }

    #[test]
    fn test_close_request_omits_reduce_flag_only_when_false() {
        let open = OrderRequest {
            contract: "BTC_USDT".to_string(),
            size: -30,
            price: "0".to_string(),
            tif: TimeInForce::Ioc,
            reduce_only: false,
            auto_size: None,
            text: "t-fdh".to_string(),
        };
        let value = serde_json::to_value(&open).unwrap();
        assert!(value.get("reduce_only").is_none());
        assert!(value.get("auto_size").is_none());

        let close = OrderRequest {
            size: 0,
            reduce_only: true,
            auto_size: Some(AutoSize::CloseShort),
            ..open
        };
        let value = serde_json::to_value(&close).unwrap();
        assert_eq!(value["reduce_only"], true);
        assert_eq!(value["auto_size"], "close_short");
        assert_eq!(value["tif"], "ioc");
    }

    #[test]
    fn test_order_fill_state() {
        let json = r#"{"id": 9, "contract": "BTC_USDT", "size": 30, "left": 0,
                       "fill_price": "65002.1", "status": "finished", "finish_as": "filled"}"#;
        let order: FuturesOrder = serde_json::from_str(json).unwrap();
        assert!(order.is_filled());
        assert_eq!(order.average_price(), Some(dec!(65002.1)));

        let json = r#"{"id": 10, "contract": "BTC_USDT", "size": 30, "left": 30,
                       "fill_price": "0", "status": "open"}"#;
        let order: FuturesOrder = serde_json::from_str(json).unwrap();
        assert!(!order.is_filled());
        assert_eq!(order.average_price(), None);
    }
}
