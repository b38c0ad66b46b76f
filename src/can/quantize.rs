//! Fixed-point scalar codec.
//!
//! Maps a bounded real value onto an unsigned integer of a fixed bit width by
//! linear scaling over `[min, max]`, and back.

use crate::error::{CodecError, CodecResult};

/// Value range and bit width of a single wire field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarRange {
    pub min: f64,
    pub max: f64,
    pub bits: u8,
}

impl ScalarRange {
    /// Constructor for protocol constants. Use [`ScalarRange::try_new`] for
    /// ranges built at runtime.
    ///
    /// # Panics
    /// If `max <= min` or `bits` is outside `1..=32`. In a `const` this is a
    /// compile error.
    pub const fn new(min: f64, max: f64, bits: u8) -> Self {
        assert!(max > min, "ScalarRange requires max > min");
        assert!(bits >= 1 && bits <= 32, "ScalarRange bits must be in 1..=32");
        Self { min, max, bits }
    }

    /// Validated constructor: `max > min` and `1 <= bits <= 32`.
    pub fn try_new(min: f64, max: f64, bits: u8) -> CodecResult<Self> {
        if !(min.is_finite() && max.is_finite()) || max <= min || bits == 0 || bits > 32 {
            return Err(CodecError::InvalidRange { min, max, bits });
        }
        Ok(Self { min, max, bits })
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Largest raw value, `(1 << bits) - 1`.
    pub const fn max_raw(&self) -> u32 {
        ((1u64 << self.bits) - 1) as u32
    }

    /// Quantization step: the worst-case round-trip error.
    pub fn resolution(&self) -> f64 {
        self.span() / self.max_raw() as f64
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.min && x <= self.max
    }
}

/// Encode `x` as a raw field value.
///
/// The fractional part is truncated toward zero, not rounded, so that encoded
/// frames stay bit-identical with what the motor firmware expects. `x` is not
/// checked against the range: a value below `min` produces a negative
/// intermediate whose two's complement bits are returned, and a value above
/// `max` produces a result wider than `bits`. Packing either one silently
/// aliases. See [`quantize_checked`] for a strict variant.
pub fn quantize(x: f64, range: ScalarRange) -> u32 {
    let scaled = (x - range.min) * range.max_raw() as f64 / range.span();
    scaled as i64 as u32
}

/// Like [`quantize`], but rejects values outside `[min, max]` and non-finite
/// values.
pub fn quantize_checked(x: f64, range: ScalarRange) -> CodecResult<u32> {
    if !range.contains(x) {
        return Err(CodecError::OutOfRange {
            value: x,
            min: range.min,
            max: range.max,
        });
    }
    Ok(quantize(x, range))
}

/// Decode a raw field value back to a real value.
pub fn dequantize(q: u32, range: ScalarRange) -> f64 {
    q as f64 * range.span() / range.max_raw() as f64 + range.min
}

#[cfg(test)]
mod tests {
    use super::*;

    const POS16: ScalarRange = ScalarRange::new(-40.0, 40.0, 16);

    #[test]
    fn test_boundaries_map_to_extremes() {
        assert_eq!(quantize(-40.0, POS16), 0);
        assert_eq!(quantize(40.0, POS16), 0xFFFF);
    }

    #[test]
    fn test_truncates_instead_of_rounding() {
        // 40 * 65535 / 80 = 32767.5
        assert_eq!(quantize(0.0, POS16), 32767);
        // 45 * 65535 / 80 = 36863.4375
        assert_eq!(quantize(5.0, POS16), 36863);
    }

    #[test]
    fn test_below_range_aliases() {
        let q = quantize(-41.0, POS16);
        assert!(q > POS16.max_raw());
        // low 16 bits hold the two's complement of -819
        assert_eq!(q & 0xFFFF, (-819i64 as u32) & 0xFFFF);
    }

    #[test]
    fn test_checked_rejects_out_of_range() {
        assert_eq!(
            quantize_checked(40.5, POS16),
            Err(CodecError::OutOfRange {
                value: 40.5,
                min: -40.0,
                max: 40.0
            })
        );
        assert!(quantize_checked(f64::NAN, POS16).is_err());
        assert_eq!(quantize_checked(5.0, POS16), Ok(36863));
    }

    #[test]
    fn test_try_new_validates() {
        assert!(ScalarRange::try_new(1.0, 1.0, 8).is_err());
        assert!(ScalarRange::try_new(0.0, 1.0, 0).is_err());
        assert!(ScalarRange::try_new(0.0, 1.0, 33).is_err());
        assert!(ScalarRange::try_new(0.0, f64::INFINITY, 8).is_err());
        let r = ScalarRange::try_new(0.0, 1.0, 32).unwrap();
        assert_eq!(r.max_raw(), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "bits must be in 1..=32")]
    fn test_new_rejects_zero_bits() {
        ScalarRange::new(-1.0, 1.0, 0);
    }

    #[test]
    #[should_panic(expected = "bits must be in 1..=32")]
    fn test_new_rejects_wide_fields() {
        ScalarRange::new(0.0, 1.0, 40);
    }

    #[test]
    #[should_panic(expected = "requires max > min")]
    fn test_new_rejects_inverted_range() {
        ScalarRange::new(1.0, -1.0, 8);
    }

    #[test]
    fn test_dequantize_extremes() {
        assert_eq!(dequantize(0, POS16), -40.0);
        assert_eq!(dequantize(0xFFFF, POS16), 40.0);
    }
}
