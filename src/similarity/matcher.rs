//! Windowed top-K search of target windows against source sequences.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;

use crate::cancel::{checkpoint, CancellationToken};
use crate::config::CollageConfig;
use crate::core::types::{SampleSpan, Segment, SourceId, TransformParams};
use crate::error::{CollageError, Result, SourceFailure};
use crate::features::FeatureSequence;
use crate::similarity::distance::{similarity_from_cost, SequenceComparator};

/// A candidate source segment for one target span. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub target_span: SampleSpan,
    pub segment: Segment,
    /// Similarity in `(0, 1]`; higher is better.
    pub similarity: f64,
    pub cost: f64,
    pub transform: TransformParams,
}

/// Ranked candidates for one target window. Empty candidates mean a gap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowMatches {
    pub index: usize,
    pub span: SampleSpan,
    pub candidates: Vec<Match>,
}

impl WindowMatches {
    pub fn best(&self) -> Option<&Match> {
        self.candidates.first()
    }
}

/// Output of [`find_matches`]: every target window in left-to-right order.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    pub windows: Vec<WindowMatches>,
    /// Sources excluded from the search, with the reason.
    pub failures: Vec<SourceFailure>,
    pub target_samples: usize,
    pub sample_rate: u32,
    /// Sample count of every source that took part in the search.
    pub source_lengths: BTreeMap<SourceId, usize>,
}

impl MatchReport {
    /// Every surviving candidate, window by window, best first.
    pub fn matches(&self) -> impl Iterator<Item = &Match> {
        self.windows.iter().flat_map(|w| w.candidates.iter())
    }

    /// Windows that have no candidate at all.
    pub fn unmatched_windows(&self) -> impl Iterator<Item = &WindowMatches> {
        self.windows.iter().filter(|w| w.candidates.is_empty())
    }
}

/// Frame range and sample span of each target window.
///
/// Windows are consecutive blocks of `frames_per_window` frames; the last one
/// absorbs the remaining frames and extends to the end of the target.
fn target_windows(
    target: &FeatureSequence,
    frames_per_window: usize,
) -> Vec<(usize, usize, SampleSpan)> {
    let n = target.len();
    let count = (n / frames_per_window).max(1);
    (0..count)
        .map(|k| {
            let first = k * frames_per_window;
            let last = if k + 1 == count {
                n
            } else {
                first + frames_per_window
            };
            let start = target.frame_start(first);
            let end = if k + 1 == count {
                target.num_samples()
            } else {
                target.frame_start(last)
            };
            (first, last, SampleSpan::new(start, end))
        })
        .collect()
}

/// Checks that a source sequence can be compared with the target.
fn check_compatible(
    target: &FeatureSequence,
    source: &FeatureSequence,
    min_frames: usize,
) -> Result<()> {
    if source.sample_rate() != target.sample_rate() {
        return Err(CollageError::InvalidAudio(format!(
            "sample rate {} Hz does not match target rate {} Hz",
            source.sample_rate(),
            target.sample_rate()
        )));
    }
    if source.feature_type() != target.feature_type()
        || source.dimension() != target.dimension()
        || source.hop_size() != target.hop_size()
        || source.window_size() != target.window_size()
    {
        return Err(CollageError::InvalidConfig(format!(
            "features ({}, dim {}, hop {}) do not match target ({}, dim {}, hop {})",
            source.feature_type(),
            source.dimension(),
            source.hop_size(),
            target.feature_type(),
            target.dimension(),
            target.hop_size()
        )));
    }
    if source.len() < min_frames {
        return Err(CollageError::InvalidAudio(format!(
            "{} frames is shorter than one matching window of {} frames",
            source.len(),
            min_frames
        )));
    }
    Ok(())
}

struct Candidate<'a> {
    cost: f64,
    position: usize,
    source_id: &'a SourceId,
    sequence: &'a FeatureSequence,
}

fn rank(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.cost
        .total_cmp(&b.cost)
        .then(a.position.cmp(&b.position))
        .then_with(|| a.source_id.cmp(b.source_id))
}

/// Finds the best source segments for every target window.
///
/// Each window of `match_window_frames` target frames is compared against
/// every source position (stepping by `source_stride` frames). The `top_k`
/// lowest-cost candidates whose similarity reaches `similarity_threshold`
/// are kept, ranked by cost, then source position, then source id.
///
/// Incompatible sources are listed in [`MatchReport::failures`] and skipped.
///
/// # Errors
/// [`CollageError::InvalidConfig`] for bad settings or an empty target,
/// [`CollageError::Cancelled`] if the token fires between windows.
pub fn find_matches(
    target: &FeatureSequence,
    sources: &BTreeMap<SourceId, FeatureSequence>,
    config: &CollageConfig,
    cancel: Option<&CancellationToken>,
) -> Result<MatchReport> {
    config.validate()?;
    if target.is_empty() {
        return Err(CollageError::InvalidAudio(
            "target feature sequence is empty".to_string(),
        ));
    }

    let windows = target_windows(target, config.match_window_frames);
    let min_frames = windows
        .iter()
        .map(|(first, last, _)| last - first)
        .min()
        .unwrap_or(0);

    let mut failures = Vec::new();
    let mut usable: Vec<(&SourceId, &FeatureSequence)> = Vec::new();
    for (id, seq) in sources {
        match check_compatible(target, seq, min_frames) {
            Ok(()) => usable.push((id, seq)),
            Err(error) => {
                log::warn!("excluding source {} from matching: {}", id, error);
                failures.push(SourceFailure {
                    source_id: id.clone(),
                    error,
                });
            }
        }
    }
    let source_lengths = usable
        .iter()
        .map(|(id, seq)| ((*id).clone(), seq.num_samples()))
        .collect();

    let results: Result<Vec<WindowMatches>> = windows
        .par_iter()
        .enumerate()
        .map(|(index, &(first, last, span))| {
            checkpoint(cancel)?;
            let candidates = search_window(target, first, last, span, &usable, config);
            log::debug!(
                "window {} [{}, {}): {} candidate(s)",
                index,
                span.start,
                span.end,
                candidates.len()
            );
            Ok(WindowMatches {
                index,
                span,
                candidates,
            })
        })
        .collect();
    let windows = results?;

    let matched = windows.iter().filter(|w| !w.candidates.is_empty()).count();
    log::info!(
        "matched {}/{} target windows against {} source(s)",
        matched,
        windows.len(),
        usable.len()
    );

    Ok(MatchReport {
        windows,
        failures,
        target_samples: target.num_samples(),
        sample_rate: target.sample_rate(),
        source_lengths,
    })
}

fn search_window(
    target: &FeatureSequence,
    first: usize,
    last: usize,
    span: SampleSpan,
    sources: &[(&SourceId, &FeatureSequence)],
    config: &CollageConfig,
) -> Vec<Match> {
    let query = &target.frames()[first..last];
    let width = query.len();
    let comparator = config.distance_metric;

    let mut scored: Vec<Candidate<'_>> = Vec::new();
    for &(source_id, seq) in sources {
        if seq.len() < width {
            continue;
        }
        for position in (0..=seq.len() - width).step_by(config.source_stride) {
            let alignment = comparator.compare(query, &seq.frames()[position..position + width]);
            if alignment.cost.is_finite() {
                scored.push(Candidate {
                    cost: alignment.cost,
                    position,
                    source_id,
                    sequence: seq,
                });
            }
        }
    }

    let keep = config.top_k.min(scored.len());
    if keep == 0 {
        return Vec::new();
    }
    if keep < scored.len() {
        scored.select_nth_unstable_by(keep - 1, rank);
        scored.truncate(keep);
    }
    scored.sort_by(rank);

    let target_pitch = if config.adjust_pitch {
        target.median_pitch(first, last)
    } else {
        None
    };

    scored
        .into_iter()
        .filter(|c| similarity_from_cost(c.cost) >= config.similarity_threshold)
        .filter_map(|c| {
            let seq = c.sequence;
            let start = seq.frame_start(c.position);
            let end = (start + span.len()).min(seq.num_samples());
            if end <= start {
                return None;
            }
            let pitch_semitones = pitch_correction(
                target_pitch,
                seq.median_pitch(c.position, c.position + width),
                config.max_pitch_shift_semitones,
            );
            let stretch_ratio = span.len() as f64 / (end - start) as f64;
            Some(Match {
                target_span: span,
                segment: Segment::new(c.source_id.clone(), start, end),
                similarity: similarity_from_cost(c.cost),
                cost: c.cost,
                transform: TransformParams::new(pitch_semitones, stretch_ratio),
            })
        })
        .collect()
}

/// Semitones that move `source_hz` onto `target_hz`, clamped to
/// `±max_semitones`. Zero when either side is unvoiced.
fn pitch_correction(target_hz: Option<f32>, source_hz: Option<f32>, max_semitones: f64) -> f64 {
    match (target_hz, source_hz) {
        (Some(ft), Some(fs)) if ft > 0.0 && fs > 0.0 => {
            (12.0 * (ft as f64 / fs as f64).log2()).clamp(-max_semitones, max_semitones)
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AudioBuffer;
    use crate::features::{extract_features, FeatureType};
    use crate::similarity::DistanceMetric;

    fn config() -> CollageConfig {
        CollageConfig::default()
            .with_feature_type(FeatureType::Energy)
            .with_framing(100, 100)
            .with_match_window_frames(2)
            .with_similarity_threshold(0.0)
    }

    /// Constant-level blocks of 100 samples each.
    fn levels(values: &[f32]) -> AudioBuffer {
        let data = values.iter().flat_map(|&v| std::iter::repeat(v).take(100)).collect();
        AudioBuffer::from_mono(data, 1000).unwrap()
    }

    fn features(buffer: &AudioBuffer, config: &CollageConfig) -> FeatureSequence {
        extract_features(buffer, &config.feature_config()).unwrap()
    }

    #[test]
    fn test_windows_tile_target() {
        let cfg = config();
        let target = features(&levels(&[0.1, 0.2, 0.3, 0.4, 0.5]), &cfg);
        let windows = target_windows(&target, 2);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].2, SampleSpan::new(0, 200));
        assert_eq!(windows[1], (2, 5, SampleSpan::new(200, 500)));
    }

    #[test]
    fn test_finds_exact_segment() {
        let cfg = config();
        let target = features(&levels(&[0.5, 0.6, 0.1, 0.2]), &cfg);
        let mut sources = BTreeMap::new();
        sources.insert(
            SourceId::from("a"),
            features(&levels(&[0.9, 0.1, 0.2, 0.9, 0.5, 0.6]), &cfg),
        );
        let report = find_matches(&target, &sources, &cfg, None).unwrap();
        assert_eq!(report.windows.len(), 2);

        let first = report.windows[0].best().unwrap();
        assert_eq!(first.segment, Segment::new(SourceId::from("a"), 400, 600));
        assert!(first.cost < 1e-6);
        assert!((first.transform.stretch_ratio - 1.0).abs() < 1e-12);

        let second = report.windows[1].best().unwrap();
        assert_eq!(second.segment.start_sample, 100);
        assert_eq!(report.source_lengths[&SourceId::from("a")], 600);
    }

    #[test]
    fn test_ranking_and_top_k() {
        let cfg = config().with_top_k(3);
        let target = features(&levels(&[0.5, 0.5]), &cfg);
        let mut sources = BTreeMap::new();
        sources.insert(SourceId::from("b"), features(&levels(&[0.5, 0.5, 0.4]), &cfg));
        sources.insert(SourceId::from("a"), features(&levels(&[0.5, 0.5, 0.0]), &cfg));
        let report = find_matches(&target, &sources, &cfg, None).unwrap();
        let candidates = &report.windows[0].candidates;
        assert_eq!(candidates.len(), 3);
        // Equal cost at position 0: source id breaks the tie
        assert_eq!(candidates[0].segment.source_id, SourceId::from("a"));
        assert_eq!(candidates[1].segment.source_id, SourceId::from("b"));
        assert_eq!(candidates[2].segment.source_id, SourceId::from("b"));
        assert!(candidates.windows(2).all(|w| w[0].cost <= w[1].cost));
    }

    #[test]
    fn test_threshold_leaves_gap() {
        let cfg = config().with_similarity_threshold(0.9);
        let target = features(&levels(&[0.5, 0.5, 0.9, 0.9]), &cfg);
        let mut sources = BTreeMap::new();
        sources.insert(SourceId::from("a"), features(&levels(&[0.5, 0.5]), &cfg));
        let report = find_matches(&target, &sources, &cfg, None).unwrap();
        assert!(!report.windows[0].candidates.is_empty());
        assert!(report.windows[1].candidates.is_empty());
        assert!(report.matches().all(|m| m.similarity >= 0.9));
        assert_eq!(report.unmatched_windows().count(), 1);
    }

    #[test]
    fn test_incompatible_source_isolated() {
        let cfg = config();
        let target = features(&levels(&[0.5, 0.5]), &cfg);
        let other_rate = AudioBuffer::from_mono(vec![0.5; 400], 2000).unwrap();
        let mut sources = BTreeMap::new();
        sources.insert(SourceId::from("good"), features(&levels(&[0.5, 0.5]), &cfg));
        sources.insert(SourceId::from("bad"), features(&other_rate, &cfg));
        sources.insert(SourceId::from("tiny"), features(&levels(&[0.5]), &cfg));
        let report = find_matches(&target, &sources, &cfg, None).unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(report.windows[0].best().is_some());
        assert_eq!(report.source_lengths.len(), 1);
    }

    #[test]
    fn test_no_sources_yields_empty_windows() {
        let cfg = config();
        let target = features(&levels(&[0.5, 0.5, 0.5, 0.5]), &cfg);
        let report = find_matches(&target, &BTreeMap::new(), &cfg, None).unwrap();
        assert!(report.windows.iter().all(|w| w.candidates.is_empty()));
    }

    #[test]
    fn test_cancelled_before_search() {
        let cfg = config();
        let target = features(&levels(&[0.5, 0.5]), &cfg);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            find_matches(&target, &BTreeMap::new(), &cfg, Some(&token)),
            Err(CollageError::Cancelled)
        );
    }

    #[test]
    fn test_dtw_metric_runs() {
        let cfg = config().with_distance_metric(DistanceMetric::Dtw);
        let target = features(&levels(&[0.1, 0.3]), &cfg);
        let mut sources = BTreeMap::new();
        sources.insert(SourceId::from("a"), features(&levels(&[0.1, 0.3, 0.7]), &cfg));
        let report = find_matches(&target, &sources, &cfg, None).unwrap();
        assert_eq!(report.windows[0].best().unwrap().segment.start_sample, 0);
    }

    #[test]
    fn test_pitch_correction_clamps_and_falls_back() {
        assert_eq!(pitch_correction(Some(440.0), Some(220.0), 3.0), 3.0);
        assert!((pitch_correction(Some(220.0), Some(440.0), 12.0) + 12.0).abs() < 1e-9);
        assert!((pitch_correction(Some(440.0), Some(415.3), 12.0) - 1.0).abs() < 0.01);
        assert_eq!(pitch_correction(None, Some(220.0), 12.0), 0.0);
        assert_eq!(pitch_correction(Some(440.0), None, 12.0), 0.0);
    }

    fn sine(freq: f32, amp: f32, secs: usize) -> AudioBuffer {
        let sr = 16000;
        let data = (0..secs * sr as usize)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect();
        AudioBuffer::from_mono(data, sr).unwrap()
    }

    #[test]
    fn test_candidates_carry_pitch_correction() {
        let cfg = CollageConfig::default()
            .with_feature_type(FeatureType::Energy)
            .with_similarity_threshold(0.0)
            .with_pitch_adjustment(3.0);
        let target = features(&sine(440.0, 0.5, 1), &cfg);
        let mut sources = BTreeMap::new();
        sources.insert(SourceId::from("low"), features(&sine(220.0, 0.5, 2), &cfg));
        sources.insert(SourceId::from("quiet"), features(&sine(220.0, 0.0, 2), &cfg));

        let report = find_matches(&target, &sources, &cfg, None).unwrap();
        let candidates: Vec<&Match> = report.windows.iter().flat_map(|w| &w.candidates).collect();
        assert!(candidates.iter().any(|m| m.segment.source_id == SourceId::from("low")));
        for m in candidates {
            if m.segment.source_id == SourceId::from("low") {
                assert_eq!(m.transform.pitch_semitones, 3.0);
            } else {
                assert_eq!(m.transform.pitch_semitones, 0.0);
            }
        }
    }
}
