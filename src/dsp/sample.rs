//! Sample format conversion at the effect chain boundary
//!
//! Device blocks carry 32-bit signed fixed-point samples. Float effects work
//! on normalized samples in [-1, 1] and convert on the way in and out.

/// Fixed-point full scale (2^31)
pub const FIXED_SCALE: f32 = 2_147_483_648.0;

/// Reciprocal of the fixed-point full scale
const INV_FIXED_SCALE: f32 = 1.0 / FIXED_SCALE;

/// Convert a fixed-point sample to a normalized float
#[inline]
pub fn to_float(sample: i32) -> f32 {
    sample as f32 * INV_FIXED_SCALE
}

/// Convert a normalized float back to fixed-point
///
/// The input is clamped to [-1, 1] first. `+1.0` maps to `i32::MAX` and never
/// wraps to a negative value. NaN maps to silence.
#[inline]
pub fn to_fixed(sample: f32) -> i32 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = sample.clamp(-1.0, 1.0) as f64 * FIXED_SCALE as f64;
    scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Saturate a wide accumulator to the fixed-point range
#[inline]
pub fn saturate(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_to_float_scale() {
        assert_eq!(to_float(0), 0.0);
        assert_eq!(to_float(i32::MIN), -1.0);
        assert_relative_eq!(to_float(i32::MAX), 1.0, epsilon = 1e-6);
        assert_relative_eq!(to_float(1 << 30), 0.5);
    }

    #[test]
    fn test_to_fixed_clamps_without_wrapping() {
        assert_eq!(to_fixed(1.0), i32::MAX);
        assert_eq!(to_fixed(4.0), i32::MAX);
        assert_eq!(to_fixed(-1.0), i32::MIN);
        assert_eq!(to_fixed(-7.5), i32::MIN);
        assert_eq!(to_fixed(f32::NAN), 0);
        assert_eq!(to_fixed(0.5), 1 << 30);
    }

    #[test]
    fn test_saturate() {
        assert_eq!(saturate(i32::MAX as i64 + 10), i32::MAX);
        assert_eq!(saturate(i32::MIN as i64 - 10), i32::MIN);
        assert_eq!(saturate(-42), -42);
    }
}
