//! Packing of normalized floats into consecutive 8-bit texels.
//!
//! The shader decodes `n` bytes as `Σ b_i/255 · 255^-i`, so a value in [0, 1] is split into base-255
//! digits, the last one rounded.

/// Encode `value` (clamped to [0, 1]) into `out`, most significant byte first.
pub fn float_to_bytes(value: f32, out: &mut [u8]) {
    let n = out.len();
    if n == 0 {
        return;
    }
    let mut x = value.clamp(0.0, 1.0) as f64;
    for (i, byte) in out.iter_mut().enumerate() {
        x *= 255.0;
        if i + 1 == n {
            *byte = x.round().clamp(0.0, 255.0) as u8;
        } else {
            let digit = x.floor().clamp(0.0, 255.0);
            *byte = digit as u8;
            x -= digit;
        }
    }
}

/// Encode `value` mapped from [min, max] to [0, 1].
pub fn float_to_bytes_range(value: f32, min: f32, max: f32, out: &mut [u8]) {
    let span = max - min;
    let normalized = if span.abs() > f32::EPSILON { (value - min) / span } else { 0.0 };
    float_to_bytes(normalized, out);
}

/// Encode a value of arbitrary magnitude as a signed mantissa in [-1, 1] (all bytes but the last)
/// and an exponent byte `exp + 127`, where `value = mantissa · 2^exp`.
pub fn float_to_mantissa_exponent(value: f32, out: &mut [u8]) {
    let n = out.len();
    if n < 2 {
        return;
    }
    let (mantissa, exponent) = if value == 0.0 || !value.is_finite() {
        (0.0, 0)
    } else {
        let exponent = value.abs().log2().floor() as i32 + 1;
        (value / 2f32.powi(exponent), exponent)
    };
    float_to_bytes_range(mantissa, -1.0, 1.0, &mut out[..n - 1]);
    out[n - 1] = (exponent + 127).clamp(0, 255) as u8;
}

/// Shader-side decode of [`float_to_bytes`].
pub fn bytes_to_float(bytes: &[u8]) -> f32 {
    let mut scale = 1.0f64 / 255.0;
    let mut sum = 0.0f64;
    for &b in bytes {
        sum += b as f64 * scale;
        scale /= 255.0;
    }
    sum as f32
}

pub fn bytes_to_float_range(bytes: &[u8], min: f32, max: f32) -> f32 {
    min + bytes_to_float(bytes) * (max - min)
}

pub fn mantissa_exponent_to_float(bytes: &[u8]) -> f32 {
    let n = bytes.len();
    if n < 2 {
        return 0.0;
    }
    let mantissa = bytes_to_float_range(&bytes[..n - 1], -1.0, 1.0);
    let exponent = bytes[n - 1] as i32 - 127;
    mantissa * 2f32.powi(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn one_encodes_as_leading_255() {
        let mut out = [0u8; 4];
        float_to_bytes(1.0, &mut out);
        assert_eq!(out, [255, 0, 0, 0]);
        float_to_bytes(0.0, &mut out);
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn round_trip_within_quantization_step() {
        for &v in &[0.0f32, 0.1, 0.333, 0.5, 0.77, 0.999, 1.0] {
            let mut two = [0u8; 2];
            float_to_bytes(v, &mut two);
            assert_abs_diff_eq!(bytes_to_float(&two), v, epsilon = 1.0 / 65025.0);
            let mut four = [0u8; 4];
            float_to_bytes(v, &mut four);
            assert_abs_diff_eq!(bytes_to_float(&four), v, epsilon = 1e-6);
        }
    }

    #[test]
    fn out_of_range_values_clamp() {
        let mut out = [0u8; 2];
        float_to_bytes_range(30.0, -1.0, 20.0, &mut out);
        assert_abs_diff_eq!(bytes_to_float_range(&out, -1.0, 20.0), 20.0, epsilon = 1e-3);
        float_to_bytes_range(-5.0, -1.0, 20.0, &mut out);
        assert_eq!(out, [0, 0]);
    }

    #[test]
    fn mantissa_exponent_handles_large_and_zero() {
        let mut out = [0u8; 4];
        for &v in &[-123.5f32, 0.003, 1.0, 4096.0] {
            float_to_mantissa_exponent(v, &mut out);
            let decoded = mantissa_exponent_to_float(&out);
            assert!((decoded - v).abs() <= v.abs() * 1e-4, "{v} decoded as {decoded}");
        }
        float_to_mantissa_exponent(0.0, &mut out);
        assert_eq!(out[3], 127);
        assert_abs_diff_eq!(mantissa_exponent_to_float(&out), 0.0, epsilon = 1e-4);
    }
}
