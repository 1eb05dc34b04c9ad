//! Shared utilities.

pub mod decimal;

pub use decimal::{round_down_to_lot, round_to_tick, safe_div, to_basis_points};
