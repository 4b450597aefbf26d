//! Greedy segment selection and gap handling.
//!
//! One timeline slot is produced per target window, in window order. A
//! window whose candidates are all ineligible becomes a gap, filled
//! according to the configured [`GapPolicy`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::CollageConfig;
use crate::core::types::{SampleSpan, Segment, SourceId, TransformParams};
use crate::error::{CollageError, Result};
use crate::similarity::{Match, MatchReport};

/// How windows without an eligible candidate are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Render digital silence.
    #[default]
    Silence,
    /// Stretch the previous slot's segment over the gap.
    HoldPrevious,
    /// Use a seeded random source segment of the gap's length.
    RandomBaseline,
    /// Abort with [`CollageError::NoMatchFound`].
    Fail,
}

/// Why a window ended up unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// No candidate survived the similarity threshold.
    NoCandidates,
    /// Every candidate already reached `max_source_reuse`.
    ReuseExhausted,
    /// Every remaining candidate was shorter than the minimum segment length.
    TooShort,
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GapReason::NoCandidates => "no candidate above threshold",
            GapReason::ReuseExhausted => "source reuse limit reached",
            GapReason::TooShort => "candidates shorter than minimum segment",
        };
        f.write_str(text)
    }
}

/// A target span left without a real match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedSpan {
    pub span: SampleSpan,
    pub reason: GapReason,
}

/// Material rendered for a gap.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFill {
    Silence,
    Held(Match),
    Random(Match),
}

/// One contiguous piece of the output timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineSlot {
    Matched(Match),
    Gap {
        span: SampleSpan,
        reason: GapReason,
        fill: GapFill,
    },
}

impl TimelineSlot {
    pub fn span(&self) -> SampleSpan {
        match self {
            TimelineSlot::Matched(m) => m.target_span,
            TimelineSlot::Gap { span, .. } => *span,
        }
    }

    #[inline]
    pub fn is_gap(&self) -> bool {
        matches!(self, TimelineSlot::Gap { .. })
    }

    /// The source material rendered for this slot, if any.
    pub fn source_match(&self) -> Option<&Match> {
        match self {
            TimelineSlot::Matched(m) => Some(m),
            TimelineSlot::Gap {
                fill: GapFill::Held(m) | GapFill::Random(m),
                ..
            } => Some(m),
            TimelineSlot::Gap {
                fill: GapFill::Silence,
                ..
            } => None,
        }
    }
}

/// Ordered, contiguous slots covering `[0, target_samples)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    slots: Vec<TimelineSlot>,
    target_samples: usize,
    sample_rate: u32,
}

impl Timeline {
    /// Builds a timeline from explicit slots, validating coverage.
    pub fn new(
        slots: Vec<TimelineSlot>,
        target_samples: usize,
        sample_rate: u32,
        tolerance: usize,
    ) -> Result<Self> {
        let timeline = Self {
            slots,
            target_samples,
            sample_rate,
        };
        timeline.validate(tolerance)?;
        Ok(timeline)
    }

    pub fn slots(&self) -> &[TimelineSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn target_samples(&self) -> usize {
        self.target_samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Checks that spans start at 0, are non-empty, contiguous, and end
    /// within `tolerance` samples of the target length.
    pub fn validate(&self, tolerance: usize) -> Result<()> {
        let mut expected_start = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            let span = slot.span();
            if span.start != expected_start {
                return Err(CollageError::InvalidConfig(format!(
                    "timeline slot {} starts at {} but previous slot ends at {}",
                    i, span.start, expected_start
                )));
            }
            if span.is_empty() {
                return Err(CollageError::InvalidConfig(format!(
                    "timeline slot {} is empty at sample {}",
                    i, span.start
                )));
            }
            expected_start = span.end;
        }
        if expected_start.abs_diff(self.target_samples) > tolerance {
            return Err(CollageError::InvalidConfig(format!(
                "timeline covers {} samples, target has {} (tolerance {})",
                expected_start, self.target_samples, tolerance
            )));
        }
        Ok(())
    }

    /// Fraction of target samples covered by gaps.
    pub fn gap_ratio(&self) -> f64 {
        if self.target_samples == 0 {
            return 0.0;
        }
        let gap_samples: usize = self
            .slots
            .iter()
            .filter(|s| s.is_gap())
            .map(|s| s.span().len())
            .sum();
        gap_samples as f64 / self.target_samples as f64
    }

    /// Every gap span with its reason, in timeline order.
    pub fn unmatched(&self) -> Vec<UnmatchedSpan> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                TimelineSlot::Gap { span, reason, .. } => Some(UnmatchedSpan {
                    span: *span,
                    reason: *reason,
                }),
                TimelineSlot::Matched(_) => None,
            })
            .collect()
    }

    /// Source material rendered by the timeline, including gap fills.
    pub fn matches(&self) -> impl Iterator<Item = &Match> {
        self.slots.iter().filter_map(TimelineSlot::source_match)
    }

    /// Target samples rendered from each source.
    pub fn source_usage(&self) -> BTreeMap<SourceId, usize> {
        let mut usage = BTreeMap::new();
        for m in self.matches() {
            *usage.entry(m.segment.source_id.clone()).or_insert(0) += m.target_span.len();
        }
        usage
    }
}

/// Selects one slot per target window.
///
/// Each window takes its best-ranked candidate that is still under
/// `max_source_reuse` uses and at least `min(min_segment_samples, span)`
/// long. Ineligible windows become gaps handled by `config.gap_policy`.
///
/// # Errors
/// [`CollageError::NoMatchFound`] listing every unmatched span when the
/// policy is [`GapPolicy::Fail`].
pub fn build_timeline(report: &MatchReport, config: &CollageConfig) -> Result<Timeline> {
    config.validate()?;
    let min_samples = config.min_segment_samples(report.sample_rate);
    let mut uses: HashMap<&Segment, usize> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut slots: Vec<TimelineSlot> = Vec::with_capacity(report.windows.len());
    let mut unmatched = Vec::new();

    for window in &report.windows {
        let span = window.span;
        let min_len = min_samples.min(span.len());

        let mut saw_reuse = false;
        let mut chosen = None;
        for candidate in &window.candidates {
            if uses.get(&candidate.segment).copied().unwrap_or(0) >= config.max_source_reuse {
                saw_reuse = true;
                continue;
            }
            if candidate.segment.len() < min_len {
                continue;
            }
            chosen = Some(candidate);
            break;
        }

        if let Some(candidate) = chosen {
            *uses.entry(&candidate.segment).or_insert(0) += 1;
            slots.push(TimelineSlot::Matched(candidate.clone()));
            continue;
        }

        let reason = if window.candidates.is_empty() {
            GapReason::NoCandidates
        } else if saw_reuse {
            GapReason::ReuseExhausted
        } else {
            GapReason::TooShort
        };
        log::debug!("gap at [{}, {}): {}", span.start, span.end, reason);
        unmatched.push(UnmatchedSpan { span, reason });

        let fill = match config.gap_policy {
            GapPolicy::Silence | GapPolicy::Fail => GapFill::Silence,
            GapPolicy::HoldPrevious => slots
                .last()
                .and_then(TimelineSlot::source_match)
                .map(|prev| GapFill::Held(hold(prev, span)))
                .unwrap_or(GapFill::Silence),
            GapPolicy::RandomBaseline => random_segment(&mut rng, &report.source_lengths, span)
                .map(GapFill::Random)
                .unwrap_or(GapFill::Silence),
        };
        slots.push(TimelineSlot::Gap { span, reason, fill });
    }

    if config.gap_policy == GapPolicy::Fail && !unmatched.is_empty() {
        return Err(CollageError::NoMatchFound { unmatched });
    }

    let timeline = Timeline::new(
        slots,
        report.target_samples,
        report.sample_rate,
        config.gap_tolerance_samples,
    )?;
    log::info!(
        "timeline: {} slots, gap ratio {:.3}",
        timeline.len(),
        timeline.gap_ratio()
    );
    Ok(timeline)
}

/// Re-targets the previous slot's segment onto `span`.
fn hold(previous: &Match, span: SampleSpan) -> Match {
    let seg_len = previous.segment.len().max(1);
    Match {
        target_span: span,
        segment: previous.segment.clone(),
        similarity: 0.0,
        cost: f64::INFINITY,
        transform: TransformParams::new(
            previous.transform.pitch_semitones,
            span.len() as f64 / seg_len as f64,
        ),
    }
}

/// Picks a random source and offset covering `span.len()` samples where possible.
fn random_segment(
    rng: &mut StdRng,
    source_lengths: &BTreeMap<SourceId, usize>,
    span: SampleSpan,
) -> Option<Match> {
    let usable: Vec<(&SourceId, usize)> = source_lengths
        .iter()
        .filter(|(_, &len)| len > 0)
        .map(|(id, &len)| (id, len))
        .collect();
    if usable.is_empty() {
        return None;
    }
    let (source_id, source_len) = usable[rng.gen_range(0..usable.len())];
    let seg_len = span.len().min(source_len);
    let start = rng.gen_range(0..=source_len - seg_len);
    Some(Match {
        target_span: span,
        segment: Segment::new(source_id.clone(), start, start + seg_len),
        similarity: 0.0,
        cost: f64::INFINITY,
        transform: TransformParams::new(0.0, span.len() as f64 / seg_len.max(1) as f64),
    })
}
