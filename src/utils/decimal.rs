//! Decimal arithmetic utilities for order pricing and pnl.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Exchange tick size for NSE/NFO derivatives.
pub const NSE_TICK: Decimal = dec!(0.05);

/// Round a decimal to 2 places, the precision used for pnl reporting.
pub fn round_off(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Round a price up to the next tick, never below one tick.
///
/// Zero stays zero so "no price" is preserved for market orders.
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if value == Decimal::ZERO || tick_size == Decimal::ZERO {
        return value;
    }
    let rounded = ((value / tick_size).ceil() * tick_size).round_dp(2);
    rounded.max(tick_size)
}

/// Round to the NSE tick of 0.05.
pub fn round_to_nse_price(value: Decimal) -> Decimal {
    round_to_tick(value, NSE_TICK)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Calculate weighted average of `(value, weight)` pairs.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}

/// Scale a price by a percentage move, e.g. `shift_pct(100, 1)` = 101.
pub fn shift_pct(value: Decimal, pct: Decimal) -> Decimal {
    value * (Decimal::ONE + pct / dec!(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_nse_price() {
        assert_eq!(round_to_nse_price(dec!(101.01)), dec!(101.05));
        assert_eq!(round_to_nse_price(dec!(101.05)), dec!(101.05));
        assert_eq!(round_to_nse_price(dec!(19.999)), dec!(20.00));
        assert_eq!(round_to_nse_price(dec!(0.01)), dec!(0.05));
        assert_eq!(round_to_nse_price(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_round_to_tick_custom() {
        assert_eq!(round_to_tick(dec!(10.01), dec!(0.10)), dec!(10.10));
        assert_eq!(round_to_tick(dec!(10.01), Decimal::ZERO), dec!(10.01));
    }

    #[test]
    fn test_weighted_average() {
        let values = vec![(dec!(100), dec!(25)), (dec!(110), dec!(75))];
        assert_eq!(weighted_average(&values), dec!(107.5));
        assert_eq!(weighted_average(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_shift_pct() {
        assert_eq!(shift_pct(dec!(200), dec!(1)), dec!(202));
        assert_eq!(shift_pct(dec!(200), dec!(-1)), dec!(198));
    }
}
