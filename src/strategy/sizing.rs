//! Matched order sizing across two lot conventions.
//!
//! Each venue sizes in its own order unit (base asset on the primary venue,
//! contracts on the secondary). Legs are compared in base-asset quantity,
//! which is what the hedge has to offset.

use crate::exchange::{ContractSpec, Venue};
use crate::utils::round_down_to_lot;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("{venue} reports a non-positive price or lot multiplier")]
    InvalidSpec { venue: Venue },

    #[error("{venue} size {size} below minimum {min}")]
    BelowMinimum {
        venue: Venue,
        size: Decimal,
        min: Decimal,
    },

    #[error("{venue} notional {notional} below minimum {min}")]
    BelowMinNotional {
        venue: Venue,
        notional: Decimal,
        min: Decimal,
    },
}

/// A matched pair of order sizes, each in its venue's order unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeSizing {
    pub primary_size: Decimal,
    pub secondary_size: Decimal,
}

impl TradeSizing {
    pub fn primary_base_qty(&self, spec: &ContractSpec) -> Decimal {
        self.primary_size * spec.lot_multiplier
    }

    pub fn secondary_base_qty(&self, spec: &ContractSpec) -> Decimal {
        self.secondary_size * spec.lot_multiplier
    }
}

/// Turns a per-leg budget and both venues' constraints into a [`TradeSizing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractSpecResolver;

impl ContractSpecResolver {
    /// Size both legs for `budget` quote currency per leg.
    ///
    /// The larger leg (in base quantity) is floored down to the smaller
    /// one's quantity, so the legs differ by less than one lot step and
    /// neither exceeds the budget. Fails as a whole if either reconciled
    /// leg misses its venue's minimums.
    pub fn resolve(
        &self,
        budget: Decimal,
        primary: &ContractSpec,
        secondary: &ContractSpec,
    ) -> Result<TradeSizing, SizingError> {
        let mut primary_size = Self::raw_size(Venue::Binance, budget, primary)?;
        let mut secondary_size = Self::raw_size(Venue::Gate, budget, secondary)?;

        let primary_base = primary_size * primary.lot_multiplier;
        let secondary_base = secondary_size * secondary.lot_multiplier;

        if primary_base > secondary_base {
            primary_size = round_down_to_lot(
                secondary_base / primary.lot_multiplier,
                primary.step_size,
            );
        } else if secondary_base > primary_base {
            secondary_size = round_down_to_lot(
                primary_base / secondary.lot_multiplier,
                secondary.step_size,
            );
        }

        Self::check(Venue::Binance, primary_size, primary)?;
        Self::check(Venue::Gate, secondary_size, secondary)?;

        debug!(
            symbol = %primary.symbol,
            %primary_size,
            %secondary_size,
            "Resolved matched sizing"
        );

        Ok(TradeSizing {
            primary_size,
            secondary_size,
        })
    }

    fn raw_size(venue: Venue, budget: Decimal, spec: &ContractSpec) -> Result<Decimal, SizingError> {
        let unit_value = spec.price * spec.lot_multiplier;
        if unit_value <= Decimal::ZERO {
            return Err(SizingError::InvalidSpec { venue });
        }
        let size = round_down_to_lot(budget / unit_value, spec.step_size);
        Ok(if spec.max_qty > Decimal::ZERO {
            size.min(round_down_to_lot(spec.max_qty, spec.step_size))
        } else {
            size
        })
    }

    fn check(venue: Venue, size: Decimal, spec: &ContractSpec) -> Result<(), SizingError> {
        if size <= Decimal::ZERO || size < spec.min_qty {
            return Err(SizingError::BelowMinimum {
                venue,
                size,
                min: spec.min_qty,
            });
        }
        let notional = size * spec.lot_multiplier * spec.price;
        if notional < spec.min_notional {
            return Err(SizingError::BelowMinNotional {
                venue,
                notional,
                min: spec.min_notional,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::TradingStatus;
    use rust_decimal_macros::dec;

    fn binance_spec(price: Decimal) -> ContractSpec {
        ContractSpec {
            symbol: "BTCUSDT".to_string(),
            price,
            lot_multiplier: Decimal::ONE,
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            max_qty: dec!(1000),
            min_notional: Decimal::ZERO,
            price_tick: dec!(0.1),
            status: TradingStatus::Trading,
        }
    }

    fn gate_spec(price: Decimal) -> ContractSpec {
        ContractSpec {
            symbol: "BTCUSDT".to_string(),
            price,
            lot_multiplier: dec!(0.0001),
            step_size: Decimal::ONE,
            min_qty: Decimal::ONE,
            max_qty: dec!(1000000),
            min_notional: Decimal::ZERO,
            price_tick: dec!(0.1),
            status: TradingStatus::Trading,
        }
    }

    #[test]
    fn test_small_budget_is_infeasible() {
        // 20 USDT buys 3 Gate contracts (0.0003 BTC) but rounds to zero on Binance.
        let result = ContractSpecResolver.resolve(
            dec!(20),
            &binance_spec(dec!(65010)),
            &gate_spec(dec!(65000)),
        );
        assert_eq!(
            result,
            Err(SizingError::BelowMinimum {
                venue: Venue::Binance,
                size: Decimal::ZERO,
                min: dec!(0.001),
            })
        );
    }

    #[test]
    fn test_matched_sizes_for_feasible_budget() {
        let primary = binance_spec(dec!(65010));
        let secondary = gate_spec(dec!(65000));
        let sizing = ContractSpecResolver
            .resolve(dec!(200), &primary, &secondary)
            .unwrap();

        assert_eq!(sizing.primary_size, dec!(0.003));
        assert_eq!(sizing.secondary_size, dec!(30));
        assert_eq!(sizing.primary_base_qty(&primary), sizing.secondary_base_qty(&secondary));
    }

    #[test]
    fn test_larger_leg_reduced_to_smaller() {
        // Binance gives 0.004, Gate only 33 contracts = 0.0033.
        let primary = binance_spec(dec!(65000));
        let mut secondary = gate_spec(dec!(65000));
        secondary.max_qty = dec!(33);

        let sizing = ContractSpecResolver
            .resolve(dec!(300), &primary, &secondary)
            .unwrap();
        assert_eq!(sizing.secondary_size, dec!(33));
        assert_eq!(sizing.primary_size, dec!(0.003));

        let gap = sizing.secondary_base_qty(&secondary) - sizing.primary_base_qty(&primary);
        assert!(gap >= Decimal::ZERO && gap < primary.step_size);
    }

    #[test]
    fn test_min_notional_enforced() {
        let mut primary = binance_spec(dec!(65000));
        primary.min_notional = dec!(100);
        let result = ContractSpecResolver.resolve(dec!(70), &primary, &gate_spec(dec!(65000)));
        assert!(matches!(
            result,
            Err(SizingError::BelowMinNotional { venue: Venue::Binance, .. })
        ));
    }

    #[test]
    fn test_results_are_uniformly_valid_or_invalid() {
        let primary = binance_spec(dec!(3000));
        let secondary = ContractSpec {
            lot_multiplier: dec!(0.01),
            ..gate_spec(dec!(3000))
        };
        for budget in [dec!(1), dec!(5), dec!(29), dec!(31), dec!(95), dec!(250), dec!(1000)] {
            match ContractSpecResolver.resolve(budget, &primary, &secondary) {
                Ok(sizing) => {
                    assert!(sizing.primary_size >= primary.min_qty);
                    assert!(sizing.secondary_size >= secondary.min_qty);
                    let a = sizing.primary_base_qty(&primary);
                    let b = sizing.secondary_base_qty(&secondary);
                    let step = primary.step_size.max(secondary.lot_multiplier);
                    assert!((a - b).abs() <= step, "budget {budget}: {a} vs {b}");
                }
                Err(SizingError::InvalidSpec { .. }) => panic!("spec is valid"),
                Err(_) => {}
            }
        }
    }

    #[test]
    fn test_zero_price_rejected() {
        let result =
            ContractSpecResolver.resolve(dec!(200), &binance_spec(Decimal::ZERO), &gate_spec(dec!(1)));
        assert_eq!(result, Err(SizingError::InvalidSpec { venue: Venue::Binance }));
    }
}
