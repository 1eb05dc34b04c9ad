//! # Funding Diff Hedger
//!
//! Captures funding-rate differentials between Binance and Gate.io
//! USDT perpetuals with a delta-neutral two-venue hedge.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Binance and Gate.io REST clients plus a mock venue
//! - `strategy`: Funding aggregation, sizing, entry and exit coordination
//! - `position`: Hedge model, the in-memory ledger, startup recovery
//! - `persistence`: SQLite trade journal and the interval mismatch list
//! - `scheduler`: Entry, exit and refresh loops
//! - `alert`: Operator alerts for one-sided exposure
//! - `clock`: Injectable time source
//! - `utils`: Shared decimal arithmetic

pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod position;
pub mod scheduler;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{FatalBreach, HedgeError};
