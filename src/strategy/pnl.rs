//! Exit pricing: worst-case PnL, break-even quotes, stop prices and the
//! local-extremum window.

use crate::exchange::OrderBook;
use crate::position::HedgeDirection;
use crate::utils::{round_to_tick, safe_div};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Normalised PnL if both legs were closed at the deepest fetched book level.
///
/// A conservative lower bound: the seller takes the deepest bid, the buyer
/// the deepest ask. Returns `None` when either book is empty.
pub fn worst_case_pnl(
    direction: HedgeDirection,
    primary_entry: Decimal,
    secondary_entry: Decimal,
    primary_book: &OrderBook,
    secondary_book: &OrderBook,
) -> Option<Decimal> {
    let (primary_pnl, secondary_pnl) = match direction {
        HedgeDirection::Type1 => (
            primary_book.deepest_bid()? - primary_entry,
            secondary_entry - secondary_book.deepest_ask()?,
        ),
        HedgeDirection::Type2 => (
            primary_entry - primary_book.deepest_ask()?,
            secondary_book.deepest_bid()? - secondary_entry,
        ),
    };

    let avg_entry = (primary_entry + secondary_entry) / Decimal::TWO;
    Some(safe_div(primary_pnl + secondary_pnl, avg_entry))
}

/// Resting exit prices for both legs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitQuote {
    /// Primary-leg limit price that nets the hedge to zero
    pub primary_price: Decimal,
    /// Best opposite price on the secondary venue
    pub secondary_price: Decimal,
}

/// Price the secondary leg at its best opposite quote and solve the primary
/// leg's price for zero combined PnL, rounded to the primary tick.
pub fn break_even_quote(
    direction: HedgeDirection,
    primary_entry: Decimal,
    secondary_entry: Decimal,
    secondary_book: &OrderBook,
    primary_tick: Decimal,
) -> Option<ExitQuote> {
    let (secondary_price, primary_price) = match direction {
        // Secondary short is bought back at the ask, primary long sold at break-even.
        HedgeDirection::Type1 => {
            let exit = secondary_book.best_ask()?;
            (exit, primary_entry - secondary_entry + exit)
        }
        HedgeDirection::Type2 => {
            let exit = secondary_book.best_bid()?;
            (exit, primary_entry + exit - secondary_entry)
        }
    };

    if primary_price <= Decimal::ZERO {
        return None;
    }

    Some(ExitQuote {
        primary_price: round_to_tick(primary_price, primary_tick),
        secondary_price,
    })
}

/// Stop trigger for the primary leg, `fraction` away from entry against the
/// position. `None` when the stop is disabled.
pub fn stop_trigger_price(
    direction: HedgeDirection,
    primary_entry: Decimal,
    fraction: Decimal,
    tick: Decimal,
) -> Option<Decimal> {
    if fraction <= Decimal::ZERO {
        return None;
    }
    let raw = match direction {
        HedgeDirection::Type1 => primary_entry * (Decimal::ONE - fraction),
        HedgeDirection::Type2 => primary_entry * (Decimal::ONE + fraction),
    };
    Some(round_to_tick(raw, tick))
}

/// Rolling window of primary-venue mid prices.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    lookback: Duration,
    samples: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl PriceWindow {
    pub fn new(lookback: Duration) -> Self {
        Self {
            lookback,
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>, price: Decimal) {
        self.samples.push_back((at, price));
        let cutoff = at - self.lookback;
        while self.samples.front().is_some_and(|(t, _)| *t < cutoff) {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the latest sample is the most favourable exit price in the
    /// window: the high for a primary long, the low for a primary short.
    pub fn is_local_extremum(&self, direction: HedgeDirection, min_samples: usize) -> bool {
        if self.samples.len() < min_samples.max(1) {
            return false;
        }
        let Some(&(_, latest)) = self.samples.back() else {
            return false;
        };
        match direction {
            HedgeDirection::Type1 => self.samples.iter().all(|(_, p)| latest >= *p),
            HedgeDirection::Type2 => self.samples.iter().all(|(_, p)| latest <= *p),
        }
    }
}
