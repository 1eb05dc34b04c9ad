//! Hedge positions, their lifecycle, and the ledger that owns them.

mod hedge;
mod ledger;
mod recovery;

pub use hedge::{
    ExitOrders, ExitProgress, ExitReason, HedgeDirection, HedgeLeg, HedgePosition, HedgeState,
};
pub use ledger::{HaltRecord, LedgerError, PositionLedger, SymbolClaim};
pub use recovery::{recover_positions, RecoveryReport};
