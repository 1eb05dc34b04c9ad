//! The single owner of open hedges.
//!
//! All structural changes go through one `parking_lot::Mutex`. The lock is
//! never held across an await: callers take a snapshot, release, talk to
//! the venues, then commit. Per-symbol exclusion is a separate claim so the
//! entry and exit loops never work the same symbol at once.

use super::hedge::{ExitOrders, ExitProgress, HedgePosition, HedgeState};
use crate::error::{FatalBreach, HedgeError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("no hedge recorded for {0}")]
    Unknown(String),

    #[error("{symbol} cannot move from {from} to {to}")]
    InvalidTransition {
        symbol: String,
        from: &'static str,
        to: &'static str,
    },
}

/// A symbol taken out of automated handling after a breach.
#[derive(Debug, Clone, Serialize)]
pub struct HaltRecord {
    pub breach: FatalBreach,
    pub halted_at: DateTime<Utc>,
    /// Last known hedge state, when there was one
    pub position: Option<HedgePosition>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    positions: HashMap<String, HedgePosition>,
    claims: HashSet<String>,
    halted: HashMap<String, HaltRecord>,
}

#[derive(Debug, Default)]
pub struct PositionLedger {
    inner: Mutex<LedgerInner>,
}

/// Exclusive right to act on one symbol; released on drop.
#[must_use = "the claim is released as soon as it is dropped"]
#[derive(Debug)]
pub struct SymbolClaim<'a> {
    ledger: &'a PositionLedger,
    symbol: String,
}

impl SymbolClaim<'_> {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Drop for SymbolClaim<'_> {
    fn drop(&mut self) {
        self.ledger.inner.lock().claims.remove(&self.symbol);
    }
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a symbol that has no hedge yet, for an entry attempt.
    pub fn claim_for_entry(&self, symbol: &str) -> Result<SymbolClaim<'_>, HedgeError> {
        let mut inner = self.inner.lock();
        if inner.halted.contains_key(symbol) {
            return Err(HedgeError::SymbolHalted {
                symbol: symbol.to_string(),
            });
        }
        if inner.positions.contains_key(symbol) || !inner.claims.insert(symbol.to_string()) {
            return Err(HedgeError::SymbolBusy {
                symbol: symbol.to_string(),
            });
        }
        Ok(SymbolClaim {
            ledger: self,
            symbol: symbol.to_string(),
        })
    }

    /// Claim a symbol with a recorded hedge, for exit processing.
    pub fn claim(&self, symbol: &str) -> Result<SymbolClaim<'_>, HedgeError> {
        let mut inner = self.inner.lock();
        if inner.halted.contains_key(symbol) {
            return Err(HedgeError::SymbolHalted {
                symbol: symbol.to_string(),
            });
        }
        if !inner.claims.insert(symbol.to_string()) {
            return Err(HedgeError::SymbolBusy {
                symbol: symbol.to_string(),
            });
        }
        Ok(SymbolClaim {
            ledger: self,
            symbol: symbol.to_string(),
        })
    }

    /// Record a freshly opened hedge. Rejects a second hedge on the symbol.
    pub fn insert(&self, position: HedgePosition) -> Result<(), HedgeError> {
        let mut inner = self.inner.lock();
        if inner.positions.contains_key(&position.symbol) {
            return Err(HedgeError::SymbolBusy {
                symbol: position.symbol,
            });
        }
        debug!(symbol = %position.symbol, direction = %position.direction, "Hedge recorded");
        inner.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Option<HedgePosition> {
        self.inner.lock().positions.get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.inner.lock().positions.contains_key(symbol)
    }

    /// Open -> Exiting. Fails for any other state, so a second trigger on
    /// an exiting hedge cannot start another exit.
    pub fn begin_exit(
        &self,
        symbol: &str,
        progress: ExitProgress,
    ) -> Result<HedgePosition, LedgerError> {
        let mut inner = self.inner.lock();
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::Unknown(symbol.to_string()))?;
        if !position.is_open() {
            return Err(LedgerError::InvalidTransition {
                symbol: symbol.to_string(),
                from: position.state.name(),
                to: "exiting",
            });
        }
        position.state = HedgeState::Exiting(progress);
        Ok(position.clone())
    }

    /// Replace the orders of an exiting hedge.
    pub fn set_exit_orders(&self, symbol: &str, orders: ExitOrders) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::Unknown(symbol.to_string()))?;
        match &mut position.state {
            HedgeState::Exiting(progress) => {
                progress.orders = orders;
                Ok(())
            }
            other => Err(LedgerError::InvalidTransition {
                symbol: symbol.to_string(),
                from: other.name(),
                to: "exiting",
            }),
        }
    }

    /// Exiting -> Open, after an exit attempt was fully withdrawn.
    pub fn reopen(&self, symbol: &str) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::Unknown(symbol.to_string()))?;
        if position.exit_progress().is_none() {
            return Err(LedgerError::InvalidTransition {
                symbol: symbol.to_string(),
                from: position.state.name(),
                to: "open",
            });
        }
        position.state = HedgeState::Open;
        Ok(())
    }

    /// Both legs confirmed closed: remove and return the hedge as Closed.
    pub fn close(&self, symbol: &str) -> Result<HedgePosition, LedgerError> {
        let mut inner = self.inner.lock();
        let mut position = inner
            .positions
            .remove(symbol)
            .ok_or_else(|| LedgerError::Unknown(symbol.to_string()))?;
        position.state = HedgeState::Closed;
        debug!(%symbol, "Hedge closed");
        Ok(position)
    }

    /// Take a symbol out of automated handling after a breach. Any recorded
    /// hedge moves into the halt record.
    pub fn halt(&self, breach: FatalBreach, at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let position = inner.positions.remove(&breach.symbol);
        error!(symbol = %breach.symbol, kind = ?breach.kind, "Symbol halted");
        inner.halted.insert(
            breach.symbol.clone(),
            HaltRecord {
                breach,
                halted_at: at,
                position,
            },
        );
    }

    pub fn is_halted(&self, symbol: &str) -> bool {
        self.inner.lock().halted.contains_key(symbol)
    }

    pub fn halted(&self) -> Vec<HaltRecord> {
        let mut records: Vec<HaltRecord> = self.inner.lock().halted.values().cloned().collect();
        records.sort_by(|a, b| a.breach.symbol.cmp(&b.breach.symbol));
        records
    }

    /// All recorded hedges, ordered by symbol.
    pub fn snapshot(&self) -> Vec<HedgePosition> {
        let mut positions: Vec<HedgePosition> =
            self.inner.lock().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn len(&self) -> usize {
        self.inner.lock().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().positions.is_empty()
    }
}
