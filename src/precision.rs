// =============================================================================
// Precision — venue tick-size-aware decimal comparison
// =============================================================================
//
// Raw f64 comparison of prices/quantities is unsound once venue rounding
// enters the picture: two reads of the same resting order can differ in
// their last decimal digit purely from float round-trip noise. Everything
// here operates on `rust_decimal::Decimal`, which carries an exact scale.
// =============================================================================

use rust_decimal::Decimal;

/// A symbol's tick/step size, as reported by the exchange's instrument
/// metadata (`pricePrecision`/`quantityPrecision` on Binance futures).
#[derive(Debug, Clone, Copy)]
pub struct SymbolPrecision {
    pub price_decimals: u32,
    pub quantity_decimals: u32,
}

impl SymbolPrecision {
    pub fn round_price(&self, price: Decimal) -> Decimal {
        price.round_dp(self.price_decimals)
    }

    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        quantity.round_dp(self.quantity_decimals)
    }

    /// Two prices are equal if they round to the same value at this
    /// symbol's tick precision.
    pub fn prices_equal(&self, a: Decimal, b: Decimal) -> bool {
        self.round_price(a) == self.round_price(b)
    }

    /// Two quantities are equal if they round to the same value at this
    /// symbol's step precision.
    pub fn quantities_equal(&self, a: Decimal, b: Decimal) -> bool {
        self.round_quantity(a) == self.round_quantity(b)
    }
}

/// Whether `price` sits on a "round" level (spec's notion of a
/// psychologically significant price, e.g. a whole number or half-step).
/// Mirrors the round-level check used by both scanners: a price is round
/// if it is within `tolerance_percent` of the nearest multiple of
/// `round_step`.
pub fn is_round_level(price: Decimal, round_step: Decimal, tolerance_percent: f64) -> bool {
    if round_step.is_zero() || price.is_zero() {
        return false;
    }
    let nearest = (price / round_step).round() * round_step;
    let diff = (price - nearest).abs();
    let tolerance = price * Decimal::try_from(tolerance_percent / 100.0).unwrap_or_default();
    diff <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_equality_ignores_sub_tick_noise() {
        let precision = SymbolPrecision {
            price_decimals: 2,
            quantity_decimals: 3,
        };
        assert!(precision.prices_equal(dec!(50000.001), dec!(50000.004)));
        assert!(!precision.prices_equal(dec!(50000.00), dec!(50000.01)));
    }

    #[test]
    fn quantity_equality_rounds_to_step() {
        let precision = SymbolPrecision {
            price_decimals: 2,
            quantity_decimals: 3,
        };
        assert!(precision.quantities_equal(dec!(1.2345), dec!(1.2349)));
        assert!(!precision.quantities_equal(dec!(1.234), dec!(1.235)));
    }

    #[test]
    fn round_level_detects_whole_numbers() {
        assert!(is_round_level(dec!(50000), dec!(1000), 0.1));
        assert!(is_round_level(dec!(50005), dec!(1000), 0.1));
        assert!(!is_round_level(dec!(50500), dec!(1000), 0.1));
    }

    #[test]
    fn round_level_rejects_zero_step() {
        assert!(!is_round_level(dec!(50000), dec!(0), 0.1));
    }
}
