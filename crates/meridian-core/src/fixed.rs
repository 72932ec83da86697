use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Material and capacity quantities. Fixed-point so that running on-hand
/// sums are exact and independent of insertion order.
pub type Quantity = Fixed64;

/// Tolerance used when comparing quantities against targets.
pub const ROUNDING_ERROR: Quantity = Quantity::from_bits(4295); // ~1e-6

/// Convert an f64 to a quantity, saturating at the representable range.
#[inline]
pub fn qty(v: f64) -> Quantity {
    Quantity::saturating_from_num(v)
}

/// Convert a quantity to f64. Use only for display and weights.
#[inline]
pub fn qty_to_f64(v: Quantity) -> f64 {
    v.to_num::<f64>()
}

/// Multiply a number of seconds by a quantity, truncating to whole seconds.
///
/// Computed on the raw bits in 128-bit arithmetic so that large durations
/// do not overflow the 32 integer bits of [`Fixed64`].
#[inline]
pub fn scale_seconds(seconds: i64, factor: Quantity) -> i64 {
    let wide = (seconds as i128 * factor.to_bits() as i128) >> 32;
    wide.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// `numerator / denominator` of two second counts as a quantity.
/// Returns `None` when the denominator is not positive.
#[inline]
pub fn ratio_seconds(numerator: i64, denominator: i64) -> Option<Quantity> {
    if denominator <= 0 {
        return None;
    }
    let bits = ((numerator as i128) << 32) / denominator as i128;
    Some(Quantity::from_bits(bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64))
}

/// Checked multiplication that returns None on overflow.
#[inline]
pub fn checked_mul_64(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_mul(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_sum_exactly() {
        let a = qty(0.1);
        let b = qty(0.2);
        assert_eq!((a + b) - b, a);
    }

    #[test]
    fn scale_seconds_whole_and_fraction() {
        assert_eq!(scale_seconds(3600, qty(2.0)), 7200);
        assert_eq!(scale_seconds(3600, qty(0.5)), 1800);
        assert_eq!(scale_seconds(86_400 * 365 * 100, qty(3.0)), 86_400 * 365 * 300);
    }

    #[test]
    fn ratio_seconds_rejects_zero() {
        assert!(ratio_seconds(10, 0).is_none());
        assert_eq!(ratio_seconds(7200, 3600), Some(qty(2.0)));
    }

    #[test]
    fn saturating_conversion() {
        assert_eq!(qty(1e30), Quantity::MAX);
        assert_eq!(qty(-1e30), Quantity::MIN);
    }

    #[test]
    fn checked_mul_overflow() {
        assert!(checked_mul_64(Fixed64::MAX, qty(2.0)).is_none());
    }
}
