//! Fractional Kelly sizing for binary-outcome markets.

use rust_decimal::Decimal;

/// Cap applied to the estimated win probability before sizing.
pub const MAX_ESTIMATED_PROBABILITY: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

/// Fraction of capital to bet on an outcome token.
///
/// Full Kelly for a token priced at `buy_price` that pays 1 when it wins is
/// `(p - b) / (1 - b)`. Negative edges clamp to zero, as does a price at or
/// above 1. The result is scaled by the `fractional` multiplier.
pub fn kelly_fraction(
    estimated_probability: Decimal,
    buy_price: Decimal,
    fractional: Decimal,
) -> Decimal {
    if buy_price >= Decimal::ONE {
        return Decimal::ZERO;
    }
    let kelly = (estimated_probability - buy_price) / (Decimal::ONE - buy_price);
    if kelly <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    fractional * kelly
}

/// Blend the market price with the signal strength into a win-probability
/// estimate: `b + strength * (1 - b)`, capped at 0.99.
pub fn estimated_probability(buy_price: Decimal, strength: Decimal) -> Decimal {
    let estimate = buy_price + strength * (Decimal::ONE - buy_price);
    estimate.min(MAX_ESTIMATED_PROBABILITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_no_edge_yields_zero() {
        assert_eq!(kelly_fraction(dec!(0.5), dec!(0.5), dec!(0.25)), Decimal::ZERO);
    }

    #[test]
    fn test_negative_edge_clamps_to_zero() {
        assert_eq!(kelly_fraction(dec!(0.4), dec!(0.5), dec!(0.25)), Decimal::ZERO);
    }

    #[test]
    fn test_positive_edge() {
        // (0.8 - 0.5) / 0.5 = 0.6, quarter Kelly = 0.15
        assert_eq!(kelly_fraction(dec!(0.8), dec!(0.5), dec!(0.25)), dec!(0.15));
    }

    #[test]
    fn test_certain_win_full_kelly_is_one() {
        assert_eq!(kelly_fraction(Decimal::ONE, dec!(0.5), Decimal::ONE), Decimal::ONE);
    }

    #[test]
    fn test_price_at_one_yields_zero() {
        assert_eq!(kelly_fraction(dec!(0.99), Decimal::ONE, Decimal::ONE), Decimal::ZERO);
        assert_eq!(kelly_fraction(dec!(0.99), dec!(1.5), Decimal::ONE), Decimal::ZERO);
    }

    #[test]
    fn test_estimated_probability_blend() {
        // 0.6 + 0.5 * 0.4 = 0.8
        assert_eq!(estimated_probability(dec!(0.6), dec!(0.5)), dec!(0.8));
    }

    #[test]
    fn test_estimated_probability_caps_at_099() {
        assert_eq!(estimated_probability(dec!(0.98), Decimal::ONE), dec!(0.99));
        assert_eq!(estimated_probability(dec!(0.5), Decimal::ONE), dec!(0.99));
    }
}
