//! Autocorrelation pitch estimation.

/// Lowest pitch considered, in Hz.
pub const MIN_PITCH_HZ: f32 = 60.0;
/// Highest pitch considered, in Hz.
pub const MAX_PITCH_HZ: f32 = 1000.0;

/// Normalised autocorrelation a frame must reach to count as voiced.
const VOICING_THRESHOLD: f64 = 0.5;
/// Candidates within this fraction of the best peak prefer the shortest lag.
const OCTAVE_TOLERANCE: f64 = 0.9;
const SILENT_ENERGY: f64 = 1e-8;

/// Estimates the fundamental frequency of one frame.
///
/// Returns `None` for silent, unvoiced, or too-short frames.
pub fn estimate_pitch(frame: &[f32], sample_rate: u32) -> Option<f32> {
    let sr = sample_rate as f64;
    let min_lag = (sr / MAX_PITCH_HZ as f64).floor().max(2.0) as usize;
    let max_lag = ((sr / MIN_PITCH_HZ as f64).ceil() as usize).min(frame.len() / 2);
    if max_lag <= min_lag + 1 {
        return None;
    }

    let energy: f64 = frame.iter().map(|&s| (s as f64).powi(2)).sum();
    if energy / frame.len() as f64 <= SILENT_ENERGY {
        return None;
    }

    let nccf: Vec<f64> = (min_lag..=max_lag)
        .map(|lag| normalized_correlation(frame, lag))
        .collect();
    let best = nccf.iter().copied().fold(f64::MIN, f64::max);
    if best < VOICING_THRESHOLD {
        return None;
    }

    // Shortest lag whose local peak is close to the best avoids octave-down errors
    let idx = (0..nccf.len())
        .find(|&i| {
            let prev = if i > 0 { nccf[i - 1] } else { f64::MIN };
            let next = nccf.get(i + 1).copied().unwrap_or(f64::MIN);
            nccf[i] >= OCTAVE_TOLERANCE * best && nccf[i] >= prev && nccf[i] >= next
        })
        .unwrap_or(0);

    let refined = if idx > 0 && idx + 1 < nccf.len() {
        let (a, b, c) = (nccf[idx - 1], nccf[idx], nccf[idx + 1]);
        let denom = a - 2.0 * b + c;
        if denom.abs() > 1e-12 {
            idx as f64 + 0.5 * (a - c) / denom
        } else {
            idx as f64
        }
    } else {
        idx as f64
    };

    let lag = min_lag as f64 + refined;
    Some((sr / lag) as f32)
}

fn normalized_correlation(frame: &[f32], lag: usize) -> f64 {
    let n = frame.len() - lag;
    let (mut cross, mut e0, mut e1) = (0.0f64, 0.0f64, 0.0f64);
    for i in 0..n {
        let a = frame[i] as f64;
        let b = frame[i + lag] as f64;
        cross += a * b;
        e0 += a * a;
        e1 += b * b;
    }
    let denom = (e0 * e1).sqrt();
    if denom > 0.0 {
        cross / denom
    } else {
        0.0
    }
}

/// Median of the given pitch estimates, ignoring unvoiced frames.
pub fn median_pitch<I>(pitches: I) -> Option<f32>
where
    I: IntoIterator<Item = Option<f32>>,
{
    let mut voiced: Vec<f32> = pitches.into_iter().flatten().collect();
    if voiced.is_empty() {
        return None;
    }
    voiced.sort_by(|a, b| a.total_cmp(b));
    let mid = voiced.len() / 2;
    Some(if voiced.len() % 2 == 0 {
        (voiced[mid - 1] + voiced[mid]) / 2.0
    } else {
        voiced[mid]
    })
}
