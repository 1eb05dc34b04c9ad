//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Funding-rate aggregation across both venues
//! - Trade sizing under each venue's lot and notional rules
//! - Two-leg entry with compensating rollback
//! - The exit state machine and its pricing helpers

mod aggregator;
mod entry;
mod exit;
mod pnl;
mod sizing;

#[cfg(test)]
pub(crate) mod fixtures;

pub use aggregator::{
    interval_mismatches, FundingRateAggregator, MergedFundingRow, MergedFundingView,
};
pub use entry::{EntryCoordinator, EntryTickReport};
pub use exit::{ExitCoordinator, ExitOutcome, ExitTickReport};
pub use pnl::{break_even_quote, stop_trigger_price, worst_case_pnl, ExitQuote, PriceWindow};
pub use sizing::{ContractSpecResolver, SizingError, TradeSizing};
