//! Window functions for frame analysis.
//!
//! Feature extraction and the spectral blend use periodic Hann windows so that
//! overlap-added frames at quarter-window hops sum to a constant.

use std::f64::consts::PI;

/// Generates a periodic Hann window of `size` samples.
pub fn hann_window(size: usize) -> Vec<f32> {
    match size {
        0 => return vec![],
        1 => return vec![1.0],
        _ => {}
    }
    let n = size as f64;
    (0..size)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / n).cos()) as f32)
        .collect()
}

/// Multiplies `data` by `window` and writes the result into `out`.
///
/// `out` must be at least as long as `data`; positions past the end of
/// `data` are zero-filled, which gives zero-padding for FFT sizes larger
/// than the frame.
#[inline]
pub fn apply_window_into(data: &[f32], window: &[f32], out: &mut [f32]) {
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = match (data.get(i), window.get(i)) {
            (Some(&d), Some(&w)) => d * w,
            _ => 0.0,
        };
    }
}
