//! Error taxonomy for the hedging core.
//!
//! Recoverable conditions (skips, transient venue failures) are ordinary
//! `HedgeError` values. Conditions that leave a one-sided position on a
//! venue are `FatalBreach` and must reach an operator.

use crate::exchange::Venue;
use crate::position::LedgerError;
use crate::strategy::SizingError;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Errors produced while entering, monitoring or unwinding a hedge.
#[derive(Debug, Error)]
pub enum HedgeError {
    #[error("transient {venue} error during {operation}: {source:#}")]
    TransientVenue {
        venue: Venue,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("insufficient {venue} balance: available {available}, required {required}")]
    InsufficientBalance {
        venue: Venue,
        available: Decimal,
        required: Decimal,
    },

    #[error("{symbol} is not tradable on {venue} ({status})")]
    ContractNotTradable {
        symbol: String,
        venue: Venue,
        status: String,
    },

    #[error("sizing infeasible for {symbol}: {reason}")]
    SizingInfeasible { symbol: String, reason: SizingError },

    #[error("funding for {symbol} settles in {seconds_left}s, below the safety margin")]
    FundingTooClose { symbol: String, seconds_left: i64 },

    #[error("{symbol} already has a hedge or an operation in flight")]
    SymbolBusy { symbol: String },

    #[error("{symbol} is halted pending manual remediation")]
    SymbolHalted { symbol: String },

    #[error("entry legs mismatched for {symbol}: only {filled} filled, compensated")]
    EntryPartialFillMismatch { symbol: String, filled: Venue },

    #[error("neither entry leg filled for {symbol}")]
    EntryNotFilled { symbol: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Fatal(#[from] FatalBreach),
}

impl HedgeError {
    pub fn transient(venue: Venue, operation: &'static str, source: anyhow::Error) -> Self {
        HedgeError::TransientVenue {
            venue,
            operation,
            source,
        }
    }

    /// Whether this error requires operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HedgeError::Fatal(_))
    }

    /// Whether the entry loop should stop walking candidates this tick.
    pub fn stops_entry_tick(&self) -> bool {
        matches!(self, HedgeError::FundingTooClose { .. })
    }
}

/// Kind of unhedged exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreachKind {
    /// A compensating close after a one-sided entry fill failed.
    Hedge,
    /// One leg closed on exit and the matching action on the other failed.
    Exit,
    /// A single-venue position was found during startup reconciliation.
    Orphan,
}

/// One-sided exposure that cannot be resolved automatically.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind:?} breach on {symbol}: {open_leg} leg left open ({detail})")]
pub struct FatalBreach {
    pub kind: BreachKind,
    pub symbol: String,
    pub open_leg: Venue,
    pub detail: String,
}

impl FatalBreach {
    pub fn hedge(symbol: &str, open_leg: Venue, detail: impl Into<String>) -> Self {
        Self {
            kind: BreachKind::Hedge,
            symbol: symbol.to_string(),
            open_leg,
            detail: detail.into(),
        }
    }

    pub fn exit(symbol: &str, open_leg: Venue, detail: impl Into<String>) -> Self {
        Self {
            kind: BreachKind::Exit,
            symbol: symbol.to_string(),
            open_leg,
            detail: detail.into(),
        }
    }

    pub fn orphan(symbol: &str, open_leg: Venue, detail: impl Into<String>) -> Self {
        Self {
            kind: BreachKind::Orphan,
            symbol: symbol.to_string(),
            open_leg,
            detail: detail.into(),
        }
    }
}
