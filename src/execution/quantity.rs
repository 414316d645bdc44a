use rust_decimal::{Decimal, RoundingStrategy};

/// Round `quantity` down to a multiple of `step`
///
/// The result keeps the step size's fractional precision, so `0.000499...` with
/// step `0.00001` becomes `0.00049`. A zero step leaves the quantity untouched.
pub fn floor_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO || quantity <= Decimal::ZERO {
        return quantity.max(Decimal::ZERO);
    }

    let precision = step.normalize().scale();
    let floored = (quantity / step).floor() * step;
    floored.round_dp_with_strategy(precision, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floor_to_step() {
        assert_eq!(floor_to_step(dec!(0.000499875), dec!(0.00001)), dec!(0.00049));
        assert_eq!(floor_to_step(dec!(12.9), dec!(1)), dec!(12));
        assert_eq!(floor_to_step(dec!(1.2345), dec!(0.001000)), dec!(1.234));
    }

    #[test]
    fn test_floor_is_idempotent() {
        for (quantity, step) in [
            (dec!(0.00049), dec!(0.00001)),
            (dec!(0.123), dec!(0.001)),
            (dec!(7), dec!(1)),
            (dec!(0.5), dec!(0.1)),
        ] {
            let once = floor_to_step(quantity, step);
            assert_eq!(once, quantity);
            assert_eq!(floor_to_step(once, step), once);
        }
    }

    #[test]
    fn test_step_with_non_power_of_ten() {
        assert_eq!(floor_to_step(dec!(1.26), dec!(0.05)), dec!(1.25));
    }

    #[test]
    fn test_below_one_step_floors_to_zero() {
        assert_eq!(floor_to_step(dec!(0.000009), dec!(0.00001)), Decimal::ZERO);
        assert_eq!(floor_to_step(dec!(-1), dec!(0.1)), Decimal::ZERO);
    }

    #[test]
    fn test_zero_step_passthrough() {
        assert_eq!(floor_to_step(dec!(0.123456), Decimal::ZERO), dec!(0.123456));
    }
}
