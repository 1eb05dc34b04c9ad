//! Binance USDⓈ-M futures connectivity.

mod client;
pub mod types;

pub use client::BinanceClient;
