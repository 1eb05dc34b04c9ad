//! Type definitions for Binance USDⓈ-M futures API responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Funding state from `/fapi/v1/premiumIndex`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumIndex {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_funding_rate: Decimal,
    /// Milliseconds since epoch; zero for delivery contracts
    pub next_funding_time: i64,
}

/// Exchange information for futures.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Symbol filters; only the ones used for sizing are decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price {
        #[serde(with = "rust_decimal::serde::str")]
        tick_size: Decimal,
    },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        #[serde(with = "rust_decimal::serde::str")]
        min_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        max_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional {
        #[serde(with = "rust_decimal::serde::str")]
        notional: Decimal,
    },
    #[serde(other)]
    Other,
}

/// Latest price from `/fapi/v1/ticker/price`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Account balance entry from `/fapi/v2/balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub available_balance: Decimal,
}

/// Position entry from `/fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    pub position_side: BinancePositionSide,
}

/// Funding interval override from `/fapi/v1/fundingInfo`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingInfo {
    pub symbol: String,
    pub funding_interval_hours: u32,
}

/// Depth snapshot from `/fapi/v1/depth`.
#[derive(Debug, Clone, Deserialize)]
pub struct Depth {
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// Position side in hedge mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BinancePositionSide {
    Both,
    Long,
    Short,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    #[serde(other)]
    Other,
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

/// Order response from the exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub avg_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
}

impl OrderResponse {
    /// Average price, treating Binance's `"0"` placeholder as unknown.
    pub fn fill_price(&self) -> Option<Decimal> {
        self.avg_price.filter(|p| *p > Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_filters_decode() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "status": "TRADING",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10", "minPrice": "556.80", "maxPrice": "4529764"},
                {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "1000", "stepSize": "0.001"},
                {"filterType": "MARKET_LOT_SIZE", "minQty": "0.001", "maxQty": "120", "stepSize": "0.001"},
                {"filterType": "MIN_NOTIONAL", "notional": "100"}
            ]
        }"#;
        let info: SymbolInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.filters.len(), 4);
        assert!(matches!(info.filters[1], SymbolFilter::LotSize { step_size, .. } if step_size == dec!(0.001)));
        assert!(matches!(info.filters[2], SymbolFilter::Other));
    }

    #[test]
    fn test_order_response_zero_avg_price_is_unknown() {
        let json = r#"{
            "orderId": 42, "symbol": "BTCUSDT", "status": "NEW", "avgPrice": "0.00000",
            "executedQty": "0", "side": "SELL", "type": "LIMIT", "positionSide": "LONG"
        }"#;
        let order: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(order.fill_price(), None);
        assert_eq!(order.status, OrderStatus::New);
    }
}
