//! Decimal helpers for venue price ticks and lot steps.

use rust_decimal::Decimal;

/// Nearest multiple of `tick`. A zero tick leaves the price untouched.
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    ((price / tick).round() * tick).normalize()
}

/// Largest multiple of `step` not above `qty`. Sizing never rounds up.
pub fn round_down_to_lot(qty: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return qty;
    }
    ((qty / step).floor() * step).normalize()
}

/// `numerator / denominator`, or zero when the denominator is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

pub fn to_basis_points(rate: Decimal) -> Decimal {
    rate * Decimal::from(10_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_ticks() {
        assert_eq!(round_to_tick(dec!(64554.93), dec!(0.1)), dec!(64554.9));
        assert_eq!(round_to_tick(dec!(0.123456), dec!(0.0001)), dec!(0.1235));
        assert_eq!(round_to_tick(dec!(65010.6), Decimal::ONE), dec!(65011));
        assert_eq!(round_to_tick(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
    }

    #[test]
    fn test_lot_steps_floor() {
        // Binance base quantity
        assert_eq!(round_down_to_lot(dec!(0.0030765), dec!(0.001)), dec!(0.003));
        // Gate whole contracts
        assert_eq!(round_down_to_lot(dec!(30.76), Decimal::ONE), dec!(30));
        assert_eq!(round_down_to_lot(dec!(0.0004), dec!(0.001)), Decimal::ZERO);
    }

    #[test]
    fn test_safe_div_and_bps() {
        assert_eq!(safe_div(dec!(200), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(safe_div(dec!(200), dec!(65000)).round_dp(8), dec!(0.00307692));
        assert_eq!(to_basis_points(dec!(0.001)), dec!(10));
    }
}
