//! Numeric conversions behind the compressed storage precisions.
//!
//! - Half precision: IEEE 754 binary16 via the `half` crate (round to nearest
//!   even, gradual underflow into subnormals, flush to signed zero below the
//!   smallest subnormal, overflow to infinity). NaN inputs collapse to the
//!   canonical quiet NaN code so payload bits never reach disk.
//! - 8-bit quantization: symmetric, one scale per vector.
//!
//! ```text
//! scale  = max_i |v_i| / 127          (0 for the all-zero vector)
//! code_i = round(clamp(v_i / scale, -127, 127))
//! out_i  = code_i * scale             |out_i - v_i| <= scale / 2
//! ```
//!
//! Everything here is pure: no state, no I/O, safe from any thread.

use half::f16;

/// Canonical quiet NaN code (sign bit cleared).
pub const HALF_CANONICAL_NAN: u16 = 0x7E00;
/// Sign bit of a binary16 code.
pub const HALF_SIGN_BIT: u16 = 0x8000;
/// Largest code magnitude produced by [`quantize_int8`].
pub const INT8_CODE_MAX: i8 = 127;

/// Encode an `f32` into a binary16 bit pattern.
#[must_use]
pub fn encode_half(value: f32) -> u16 {
    if value.is_nan() {
        let sign = if value.is_sign_negative() {
            HALF_SIGN_BIT
        } else {
            0
        };
        return sign | HALF_CANONICAL_NAN;
    }
    f16::from_f32(value).to_bits()
}

/// Decode a binary16 bit pattern back to `f32`. Exact for every code.
#[must_use]
pub fn decode_half(code: u16) -> f32 {
    f16::from_bits(code).to_f32()
}

/// Quantize a vector to symmetric int8 codes with one shared scale.
///
/// Returns `(codes, scale)`. The scale is `0.0` exactly when every component
/// is zero; in that case all codes are zero and no division takes place.
/// Non-finite components are treated as zero when computing the scale and
/// encode to code `0`.
#[must_use]
pub fn quantize_int8(vector: &[f32]) -> (Vec<i8>, f32) {
    let max_abs = vector
        .iter()
        .filter(|value| value.is_finite())
        .fold(0.0_f32, |acc, value| acc.max(value.abs()));

    if max_abs == 0.0 {
        return (vec![0; vector.len()], 0.0);
    }

    // A subnormal max_abs can underflow the division; keep the scale positive.
    let scale = (max_abs / f32::from(INT8_CODE_MAX)).max(f32::from_bits(1));
    let inv_scale = scale.recip();
    let limit = f32::from(INT8_CODE_MAX);

    let codes = vector
        .iter()
        .map(|&value| {
            if !value.is_finite() {
                return 0;
            }
            #[allow(clippy::cast_possible_truncation)]
            let code = (value * inv_scale).clamp(-limit, limit).round() as i8;
            code
        })
        .collect();
    (codes, scale)
}

/// Reconstruct a vector from int8 codes and its scale.
#[must_use]
pub fn dequantize_int8(codes: &[i8], scale: f32) -> Vec<f32> {
    codes.iter().map(|&code| f32::from(code) * scale).collect()
}

/// Encode a whole vector to binary16 codes.
#[must_use]
pub fn encode_half_vector(vector: &[f32]) -> Vec<u16> {
    vector.iter().copied().map(encode_half).collect()
}

/// Decode a slice of binary16 codes.
#[must_use]
pub fn decode_half_vector(codes: &[u16]) -> Vec<f32> {
    codes.iter().copied().map(decode_half).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Smallest positive binary16 subnormal, 2^-24.
    const HALF_MIN_SUBNORMAL: f32 = 5.960_464_5e-8;
    /// Smallest positive binary16 normal, 2^-14.
    const HALF_MIN_NORMAL: f32 = 6.103_515_6e-5;
    const HALF_MAX: f32 = 65_504.0;

    fn half_ulp(x: f32) -> f32 {
        let magnitude = x.abs();
        if magnitude < HALF_MIN_NORMAL {
            return HALF_MIN_SUBNORMAL;
        }
        2.0_f32.powi(magnitude.log2().floor() as i32 - 10)
    }

    // ── Half precision ──────────────────────────────────────────────────

    #[test]
    fn exact_codes_for_representable_values() {
        assert_eq!(encode_half(1.0), 0x3C00);
        assert_eq!(encode_half(0.5), 0x3800);
        assert_eq!(encode_half(-2.0), 0xC000);
        assert_eq!(encode_half(HALF_MAX), 0x7BFF);
        assert_eq!(encode_half(HALF_MIN_NORMAL), 0x0400);
        assert_eq!(encode_half(HALF_MIN_SUBNORMAL), 0x0001);
        assert_eq!(decode_half(0x0001), HALF_MIN_SUBNORMAL);
        assert_eq!(decode_half(0x3555), 0.333_251_95);
    }

    #[test]
    fn signed_zero_survives() {
        assert_eq!(encode_half(0.0), 0x0000);
        assert_eq!(encode_half(-0.0), 0x8000);
        assert!(decode_half(0x8000).is_sign_negative());
        assert_eq!(decode_half(0x8000), 0.0);
    }

    #[test]
    fn below_subnormal_range_flushes_to_signed_zero() {
        assert_eq!(encode_half(1.0e-10), 0x0000);
        assert_eq!(encode_half(-1.0e-10), 0x8000);
        assert_eq!(encode_half(f32::MIN_POSITIVE), 0x0000);
    }

    #[test]
    fn overflow_becomes_infinity() {
        assert_eq!(encode_half(1.0e6), 0x7C00);
        assert_eq!(encode_half(-1.0e6), 0xFC00);
        assert_eq!(encode_half(f32::INFINITY), 0x7C00);
        assert_eq!(encode_half(f32::NEG_INFINITY), 0xFC00);
        assert_eq!(decode_half(0x7C00), f32::INFINITY);
    }

    #[test]
    fn nan_payload_collapses_to_canonical_code() {
        let payload_nan = f32::from_bits(0x7F80_0001);
        assert!(payload_nan.is_nan());
        assert_eq!(encode_half(payload_nan), HALF_CANONICAL_NAN);
        assert_eq!(encode_half(f32::NAN), HALF_CANONICAL_NAN);

        let negative_nan = f32::from_bits(0xFFC0_1234);
        assert_eq!(encode_half(negative_nan), HALF_SIGN_BIT | HALF_CANONICAL_NAN);
        assert!(decode_half(HALF_CANONICAL_NAN).is_nan());
    }

    #[test]
    fn vector_helpers_match_scalar_codec() {
        let values = [0.25_f32, -1.5, 1.0e-9, 70_000.0];
        let codes = encode_half_vector(&values);
        assert_eq!(codes, vec![0x3400, 0xBE00, 0x0000, 0x7C00]);
        let decoded = decode_half_vector(&codes);
        assert_eq!(decoded[0], 0.25);
        assert_eq!(decoded[1], -1.5);
        assert_eq!(decoded[3], f32::INFINITY);
    }

    proptest! {
        #[test]
        fn half_round_trip_within_one_ulp(x in -HALF_MAX..=HALF_MAX) {
            let restored = decode_half(encode_half(x));
            prop_assert!(
                (restored - x).abs() <= half_ulp(x),
                "x={x} restored={restored} ulp={}",
                half_ulp(x)
            );
        }

        #[test]
        fn subnormal_round_trip_keeps_sign(x in -HALF_MIN_NORMAL..HALF_MIN_NORMAL) {
            let restored = decode_half(encode_half(x));
            prop_assert!((restored - x).abs() <= HALF_MIN_SUBNORMAL);
            prop_assert_eq!(restored.is_sign_negative(), x.is_sign_negative());
        }
    }

    // ── Int8 quantization ───────────────────────────────────────────────

    #[test]
    fn all_zero_vector_has_zero_scale() {
        let (codes, scale) = quantize_int8(&[0.0; 6]);
        assert_eq!(scale, 0.0);
        assert!(codes.iter().all(|&code| code == 0));
        assert_eq!(dequantize_int8(&codes, scale), vec![0.0; 6]);
    }

    #[test]
    fn largest_component_maps_to_full_code() {
        let (codes, scale) = quantize_int8(&[0.5, -1.0, 0.25, 0.0]);
        assert!((scale - 1.0 / 127.0).abs() < 1e-9);
        assert_eq!(codes[1], -127);
        assert_eq!(codes[2], 32);
        assert!((63..=64).contains(&codes[0]));
        assert_eq!(codes[3], 0);
    }

    #[test]
    fn non_finite_components_encode_to_zero() {
        let (codes, scale) = quantize_int8(&[f32::NAN, 2.0, f32::INFINITY]);
        assert!((scale - 2.0 / 127.0).abs() < 1e-9);
        assert_eq!(codes, vec![0, 127, 0]);
    }

    #[test]
    fn empty_vector_quantizes_to_nothing() {
        let (codes, scale) = quantize_int8(&[]);
        assert!(codes.is_empty());
        assert_eq!(scale, 0.0);
    }

    proptest! {
        #[test]
        fn dequantization_error_within_half_scale(
            vector in proptest::collection::vec(-100.0_f32..100.0, 1..64)
        ) {
            let (codes, scale) = quantize_int8(&vector);
            let restored = dequantize_int8(&codes, scale);
            let all_zero = vector.iter().all(|&value| value == 0.0);
            prop_assert_eq!(scale == 0.0, all_zero);
            for (original, restored) in vector.iter().zip(&restored) {
                // f32 rounding in v/scale and code*scale adds a few ulps.
                let tolerance = scale / 2.0 + original.abs() * 1e-6;
                prop_assert!(
                    (restored - original).abs() <= tolerance,
                    "original={original} restored={restored} scale={scale}"
                );
            }
            prop_assert!(codes.iter().all(|&code| (-127..=127).contains(&code)));
        }
    }
}
