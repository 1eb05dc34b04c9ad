//! Local persistence: the SQLite trade journal and the funding-interval
//! mismatch list.

mod journal;
mod mismatch;

pub use journal::{JournalAction, JournalEntry, TradeJournal};
pub use mismatch::MismatchStore;
