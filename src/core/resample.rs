//! Length fitting and sample-rate conversion by interpolation.
//!
//! All functions map the first input sample onto the first output sample and
//! the last onto the last, so the result spans the same material.

/// Read position in the input for output index `i`.
#[inline]
fn source_position(i: usize, input_len: usize, output_len: usize) -> f64 {
    if output_len <= 1 {
        return 0.0;
    }
    i as f64 * (input_len - 1) as f64 / (output_len - 1) as f64
}

/// Linear interpolation to exactly `output_len` samples.
pub fn resample_linear(input: &[f32], output_len: usize) -> Vec<f32> {
    if input.is_empty() || output_len == 0 {
        return vec![];
    }
    if input.len() == 1 {
        return vec![input[0]; output_len];
    }
    if input.len() == output_len {
        return input.to_vec();
    }

    let last = input.len() - 1;
    (0..output_len)
        .map(|i| {
            let pos = source_position(i, input.len(), output_len);
            let idx = (pos as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            if idx < last {
                input[idx] * (1.0 - frac) + input[idx + 1] * frac
            } else {
                input[last]
            }
        })
        .collect()
}

/// Cubic (4-point Hermite) interpolation to exactly `output_len` samples.
///
/// Falls back to linear interpolation for inputs shorter than four samples.
pub fn resample_cubic(input: &[f32], output_len: usize) -> Vec<f32> {
    if input.len() < 4 || output_len == 0 {
        return resample_linear(input, output_len);
    }
    if input.len() == output_len {
        return input.to_vec();
    }

    let last = input.len() - 1;
    (0..output_len)
        .map(|i| {
            let pos = source_position(i, input.len(), output_len);
            let idx = (pos as usize).min(last);
            let frac = (pos - idx as f64) as f32;

            let s0 = input[idx.saturating_sub(1)];
            let s1 = input[idx];
            let s2 = input[(idx + 1).min(last)];
            let s3 = input[(idx + 2).min(last)];

            let c0 = s1;
            let c1 = 0.5 * (s2 - s0);
            let c2 = s0 - 2.5 * s1 + 2.0 * s2 - 0.5 * s3;
            let c3 = 0.5 * (s3 - s0) + 1.5 * (s1 - s2);

            ((c3 * frac + c2) * frac + c1) * frac + c0
        })
        .collect()
}

/// Converts a mono signal from one sample rate to another.
pub fn resample_rate(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 {
        return input.to_vec();
    }
    let output_len =
        (input.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    resample_cubic(input, output_len)
}

/// Truncates or zero-pads `samples` to exactly `len` samples.
pub fn fit_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_endpoints_preserved() {
        let input = vec![0.0, 1.0, 0.0, -1.0];
        let out = resample_linear(&input, 7);
        assert_eq!(out.len(), 7);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[6], -1.0);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_same_length_is_copy() {
        let input: Vec<f32> = (0..16).map(|i| (i as f32 * 0.37).sin()).collect();
        assert_eq!(resample_linear(&input, 16), input);
        assert_eq!(resample_cubic(&input, 16), input);
    }

    #[test]
    fn test_cubic_on_line_is_exact() {
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let out = resample_cubic(&input, 19);
        assert_eq!(out.len(), 19);
        // Interior points have four real neighbours
        for (i, &v) in out.iter().enumerate().take(15).skip(2) {
            assert!((v - i as f32 * 0.5).abs() < 1e-4, "index {i}: {v}");
        }
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(resample_linear(&[], 10).is_empty());
        assert!(resample_cubic(&[1.0, 2.0], 0).is_empty());
        assert_eq!(resample_linear(&[0.3], 3), vec![0.3, 0.3, 0.3]);
    }

    #[test]
    fn test_resample_rate_length() {
        let input = vec![0.0f32; 8000];
        assert_eq!(resample_rate(&input, 8000, 16000).len(), 16000);
        assert_eq!(resample_rate(&input, 8000, 8000).len(), 8000);
    }

    #[test]
    fn test_fit_length() {
        assert_eq!(fit_length(vec![1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
        assert_eq!(fit_length(vec![1.0], 3), vec![1.0, 0.0, 0.0]);
    }
}
