//! Hedge position model and its lifecycle states.

use crate::exchange::{CloseConvention, CloseOrder, OrderId, PositionSide, Venue};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Which venue holds the long leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HedgeDirection {
    /// Primary long, secondary short. Chosen when the secondary rate is higher.
    Type1,
    /// Primary short, secondary long.
    Type2,
}

impl HedgeDirection {
    /// Positive differential (secondary pays more) shorts the secondary venue.
    pub fn from_fr_diff(fr_diff: Decimal) -> Self {
        if fr_diff > Decimal::ZERO {
            HedgeDirection::Type1
        } else {
            HedgeDirection::Type2
        }
    }

    pub fn primary_side(&self) -> PositionSide {
        match self {
            HedgeDirection::Type1 => PositionSide::Long,
            HedgeDirection::Type2 => PositionSide::Short,
        }
    }

    pub fn secondary_side(&self) -> PositionSide {
        self.primary_side().opposite()
    }

    /// Whether `fr_diff` has crossed back through the exit threshold against
    /// this direction.
    pub fn is_reversed(&self, fr_diff: Decimal, exit_threshold: Decimal) -> bool {
        match self {
            HedgeDirection::Type1 => fr_diff < exit_threshold,
            HedgeDirection::Type2 => fr_diff > -exit_threshold,
        }
    }
}

impl fmt::Display for HedgeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HedgeDirection::Type1 => write!(f, "type1"),
            HedgeDirection::Type2 => write!(f, "type2"),
        }
    }
}

/// One side of the hedge on one venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgeLeg {
    pub venue: Venue,
    pub side: PositionSide,
    /// Size in the venue's order unit
    pub size: Decimal,
    pub entry_price: Decimal,
}

impl HedgeLeg {
    /// Close request in the venue's own convention.
    pub fn close_order(&self, convention: CloseConvention) -> CloseOrder {
        match convention {
            CloseConvention::ExactQuantity => CloseOrder::exact(self.side, self.size),
            CloseConvention::AutoSizeBySide => CloseOrder::auto_size(self.side),
        }
    }
}

/// Why a hedge is being unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    FundingIntervalMismatch,
    SignalReversal,
    ProfitTarget,
    LocalExtremum,
}

impl ExitReason {
    /// Market exits close both legs immediately; the rest rest limit orders.
    pub fn is_market(&self) -> bool {
        matches!(
            self,
            ExitReason::FundingIntervalMismatch | ExitReason::SignalReversal
        )
    }
}

/// Orders working an exit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExitOrders {
    /// Both legs being closed at market in the current tick.
    Market,
    Resting {
        primary: OrderId,
        secondary: OrderId,
        /// Stop on the primary leg, when enabled
        stop_loss: Option<OrderId>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitProgress {
    pub reason: ExitReason,
    /// When exit orders were placed; the timeout runs from here
    pub started_at: DateTime<Utc>,
    pub orders: ExitOrders,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HedgeState {
    Open,
    Exiting(ExitProgress),
    Closed,
}

impl HedgeState {
    pub fn name(&self) -> &'static str {
        match self {
            HedgeState::Open => "open",
            HedgeState::Exiting(_) => "exiting",
            HedgeState::Closed => "closed",
        }
    }
}

/// A two-legged hedge. Present in the ledger only while both legs are open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgePosition {
    pub symbol: String,
    pub direction: HedgeDirection,
    pub primary: HedgeLeg,
    pub secondary: HedgeLeg,
    /// Funding settlement this hedge targets
    pub funding_instant: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub state: HedgeState,
}

impl HedgePosition {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: &str,
        direction: HedgeDirection,
        primary_size: Decimal,
        primary_entry: Decimal,
        secondary_size: Decimal,
        secondary_entry: Decimal,
        funding_instant: DateTime<Utc>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction,
            primary: HedgeLeg {
                venue: Venue::Binance,
                side: direction.primary_side(),
                size: primary_size,
                entry_price: primary_entry,
            },
            secondary: HedgeLeg {
                venue: Venue::Gate,
                side: direction.secondary_side(),
                size: secondary_size,
                entry_price: secondary_entry,
            },
            funding_instant,
            opened_at,
            state: HedgeState::Open,
        }
    }

    pub fn exit_progress(&self) -> Option<&ExitProgress> {
        match &self.state {
            HedgeState::Exiting(progress) => Some(progress),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == HedgeState::Open
    }

    /// The leg held on `venue`.
    pub fn leg(&self, venue: Venue) -> &HedgeLeg {
        if self.primary.venue == venue {
            &self.primary
        } else {
            &self.secondary
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_from_differential() {
        assert_eq!(HedgeDirection::from_fr_diff(dec!(0.003)), HedgeDirection::Type1);
        assert_eq!(HedgeDirection::from_fr_diff(dec!(-0.003)), HedgeDirection::Type2);
        assert_eq!(HedgeDirection::from_fr_diff(Decimal::ZERO), HedgeDirection::Type2);
        assert_eq!(HedgeDirection::Type1.primary_side(), PositionSide::Long);
        assert_eq!(HedgeDirection::Type1.secondary_side(), PositionSide::Short);
    }

    #[test]
    fn test_reversal_threshold() {
        let threshold = dec!(0.0005);
        assert!(HedgeDirection::Type1.is_reversed(dec!(0.00005), threshold));
        assert!(!HedgeDirection::Type1.is_reversed(dec!(0.003), threshold));
        assert!(HedgeDirection::Type2.is_reversed(dec!(-0.0001), threshold));
        assert!(!HedgeDirection::Type2.is_reversed(dec!(-0.002), threshold));
    }

    #[test]
    fn test_close_order_follows_convention() {
        let leg = HedgeLeg {
            venue: Venue::Binance,
            side: PositionSide::Long,
            size: dec!(0.003),
            entry_price: dec!(65010),
        };
        assert_eq!(
            leg.close_order(CloseConvention::ExactQuantity),
            CloseOrder::exact(PositionSide::Long, dec!(0.003))
        );
        assert_eq!(
            leg.close_order(CloseConvention::AutoSizeBySide).quantity,
            None
        );
    }
}
