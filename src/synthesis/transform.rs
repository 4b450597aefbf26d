//! Pitch and duration adjustment of segment material.

use crate::core::resample::resample_cubic;
use crate::core::types::TransformParams;
use crate::error::{CollageError, Result};
use crate::synthesis::stretch::time_stretch;

/// Shifts pitch by `semitones` while keeping the length of `input`.
///
/// The signal is time-stretched by the pitch factor and resampled back to
/// its original length.
pub fn pitch_shift(input: &[f32], semitones: f64, sample_rate: u32) -> Vec<f32> {
    if semitones == 0.0 || input.is_empty() {
        return input.to_vec();
    }
    let factor = 2f64.powf(semitones / 12.0);
    let stretched_len = ((input.len() as f64 * factor).round() as usize).max(1);
    let stretched = time_stretch(input, stretched_len, sample_rate);
    resample_cubic(&stretched, input.len())
}

/// Applies `params` to `input` and fits the result to `output_len` samples.
///
/// Pitch is shifted first, then the material is time-stretched to the
/// requested length. Zero semitones at the input's own length returns an
/// identical copy.
///
/// # Errors
/// [`CollageError::Transform`] for non-finite parameters or output.
pub fn apply_transform(
    input: &[f32],
    params: &TransformParams,
    output_len: usize,
    sample_rate: u32,
) -> Result<Vec<f32>> {
    if !params.pitch_semitones.is_finite() {
        return Err(CollageError::Transform(format!(
            "pitch shift must be finite, got {}",
            params.pitch_semitones
        )));
    }
    if !params.stretch_ratio.is_finite() || params.stretch_ratio <= 0.0 {
        return Err(CollageError::Transform(format!(
            "stretch ratio must be positive and finite, got {}",
            params.stretch_ratio
        )));
    }

    let shifted = pitch_shift(input, params.pitch_semitones, sample_rate);
    let output = time_stretch(&shifted, output_len, sample_rate);

    if let Some(pos) = output.iter().position(|s| !s.is_finite()) {
        return Err(CollageError::Transform(format!(
            "non-finite sample at index {} after transform",
            pos
        )));
    }
    Ok(output)
}
