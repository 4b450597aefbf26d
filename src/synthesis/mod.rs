//! Rendering a timeline into an output waveform.
//!
//! Slot `i` is rendered `span_len + F` samples long, where `F` is the
//! crossfade into slot `i + 1` clamped to both span lengths. Each slot is
//! written at its span start and crossfaded over the previous slot's tail,
//! so the output is exactly as long as the target.

pub mod blend;
pub mod dynamics;
pub mod stretch;
pub mod transform;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cache::{CacheKey, CacheStats, SegmentCache, TransformSignature};
use crate::cancel::{checkpoint, CancellationToken};
use crate::config::CollageConfig;
use crate::core::resample::resample_rate;
use crate::core::types::{AudioBuffer, SourceId, SourceRegistry};
use crate::error::{CollageError, Result, SourceFailure};
use crate::quality::QualityMetrics;
use crate::selection::{Timeline, UnmatchedSpan};
use crate::similarity::Match;

pub use blend::{crossfade, BlendAlgorithm};
pub use dynamics::{match_energy, noise_gate, normalize_peak, remove_clicks, rms_envelope};
pub use stretch::{time_stretch, Wsola};
pub use transform::{apply_transform, pitch_shift};

/// Bookkeeping for one synthesis run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisMetadata {
    pub sample_rate: u32,
    pub output_samples: usize,
    pub gap_ratio: f64,
    pub unmatched: Vec<UnmatchedSpan>,
    /// Slots rendered from source material, gap fills included.
    pub segments_rendered: usize,
    pub clipped_samples: usize,
    pub crossfade_samples: usize,
    pub blend_algorithm: BlendAlgorithm,
    pub source_usage: BTreeMap<SourceId, usize>,
    /// Whether rendered segments were scaled to the target's energy envelope.
    pub energy_matched: bool,
    pub clicks_removed: usize,
    /// Gain applied by peak normalization, if enabled.
    pub normalization_gain: Option<f32>,
    /// Sources skipped during extraction or matching.
    pub source_failures: Vec<SourceFailure>,
    /// Cache counters after the run.
    pub cache: CacheStats,
    pub elapsed_secs: f64,
}

impl SynthesisMetadata {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Output of [`synthesize`]. Immutable once built.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    output: AudioBuffer,
    timeline: Timeline,
    matches: Vec<Match>,
    metadata: SynthesisMetadata,
    quality: Option<QualityMetrics>,
}

impl SynthesisResult {
    pub fn output(&self) -> &AudioBuffer {
        &self.output
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Matches rendered into the output, in timeline order.
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn metadata(&self) -> &SynthesisMetadata {
        &self.metadata
    }

    pub fn quality(&self) -> Option<&QualityMetrics> {
        self.quality.as_ref()
    }

    /// Returns the result with quality metrics attached.
    pub fn with_quality(mut self, quality: QualityMetrics) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Returns the result with the sources skipped upstream recorded.
    pub fn with_source_failures(mut self, failures: Vec<SourceFailure>) -> Self {
        self.metadata.source_failures = failures;
        self
    }

    pub fn into_output(self) -> AudioBuffer {
        self.output
    }
}

/// Crossfade length at each boundary; the last slot has no tail.
fn boundary_fades(timeline: &Timeline, crossfade: usize) -> Vec<usize> {
    let slots = timeline.slots();
    (0..slots.len())
        .map(|i| match slots.get(i + 1) {
            Some(next) => crossfade
                .min(slots[i].span().len())
                .min(next.span().len()),
            None => 0,
        })
        .collect()
}

/// Target recording whose loudness rendered segments are scaled to.
struct EnergyReference {
    samples: Vec<f32>,
    frame_len: usize,
    hop: usize,
}

impl EnergyReference {
    /// Envelope of the `len` target samples starting at `start`.
    fn envelope(&self, start: usize, len: usize) -> Option<Vec<f32>> {
        let end = (start + len).min(self.samples.len());
        if start >= end {
            return None;
        }
        Some(rms_envelope(&self.samples[start..end], self.frame_len, self.hop))
    }
}

/// Reads, transforms and caches the material for one slot.
fn render_match(
    m: &Match,
    tail: usize,
    sample_rate: u32,
    registry: &SourceRegistry,
    cache: &SegmentCache,
    energy: Option<&EnergyReference>,
) -> Result<Arc<AudioBuffer>> {
    let source = registry.resolve(&m.segment.source_id)?;
    if source.sample_rate() != sample_rate {
        return Err(CollageError::InvalidAudio(format!(
            "source {} is {} Hz, timeline is {} Hz",
            m.segment.source_id,
            source.sample_rate(),
            sample_rate
        )));
    }
    let source_len = source.num_frames();
    if m.segment.start_sample >= source_len || m.segment.is_empty() {
        return Err(CollageError::InvalidAudio(format!(
            "segment [{}, {}) lies outside source {} of {} samples",
            m.segment.start_sample, m.segment.end_sample, m.segment.source_id, source_len
        )));
    }

    // The tail is read in source time, so scale it back by the stretch
    let ratio = m.transform.stretch_ratio.max(f64::EPSILON);
    let tail_in_source = (tail as f64 / ratio).round() as usize;
    let read_end = (m.segment.end_sample + tail_in_source).min(source_len);
    let output_len = m.target_span.len() + tail;

    let envelope = energy.and_then(|e| e.envelope(m.target_span.start, output_len));
    let mut signature = TransformSignature::new(&m.transform, output_len);
    if let Some(env) = &envelope {
        signature = signature.with_energy(env);
    }
    let key = CacheKey::new(
        m.segment.source_id.clone(),
        m.segment.start_sample,
        read_end,
        signature,
    );
    cache.get_or_create(&key, || {
        let material = &source.samples()[m.segment.start_sample..read_end];
        let mut rendered = apply_transform(material, &m.transform, output_len, sample_rate)?;
        if let (Some(env), Some(e)) = (&envelope, energy) {
            match_energy(&mut rendered, env, e.frame_len, e.hop);
        }
        AudioBuffer::from_mono(rendered, sample_rate)
    })
}

/// Renders `timeline` into a mono waveform at the timeline's sample rate.
///
/// Energy matching needs the target recording and is skipped here; use
/// [`synthesize_with_reference`] for it.
///
/// # Errors
/// [`CollageError::UnknownSource`] for a segment whose source is not
/// registered, [`CollageError::Transform`] if a transform produces
/// non-finite samples, [`CollageError::Cancelled`] between slots.
pub fn synthesize(
    timeline: &Timeline,
    registry: &SourceRegistry,
    config: &CollageConfig,
    cache: &SegmentCache,
    cancel: Option<&CancellationToken>,
) -> Result<SynthesisResult> {
    synthesize_with_reference(timeline, registry, config, cache, None, cancel)
}

/// [`synthesize`] with the target recording available as `reference`.
///
/// With `config.match_energy` set, every rendered segment is scaled to the
/// RMS envelope of the target span it fills. The reference is mixed to mono
/// and resampled to the timeline rate first.
pub fn synthesize_with_reference(
    timeline: &Timeline,
    registry: &SourceRegistry,
    config: &CollageConfig,
    cache: &SegmentCache,
    reference: Option<&AudioBuffer>,
    cancel: Option<&CancellationToken>,
) -> Result<SynthesisResult> {
    config.validate()?;
    timeline.validate(config.gap_tolerance_samples)?;
    let started = Instant::now();
    let sample_rate = timeline.sample_rate();
    let energy = match (config.match_energy, reference) {
        (false, _) => None,
        (true, None) => {
            log::warn!("energy matching enabled without a target reference, skipped");
            None
        }
        (true, Some(buffer)) => {
            let mono = buffer.to_mono();
            Some(EnergyReference {
                samples: resample_rate(mono.samples(), mono.sample_rate(), sample_rate),
                frame_len: config.window_size,
                hop: config.hop_length,
            })
        }
    };
    let target_len = timeline.target_samples();
    let crossfade_len = config.crossfade_samples(sample_rate);
    let fades = boundary_fades(timeline, crossfade_len);

    let covered = timeline.slots().last().map_or(0, |s| s.span().end);
    let mut out = vec![0.0f32; covered.max(target_len)];
    let mut segments_rendered = 0;
    let mut head = 0;

    for (i, slot) in timeline.slots().iter().enumerate() {
        checkpoint(cancel)?;
        let span = slot.span();
        let tail = fades[i];
        let len = span.len() + tail;

        let rendered: Arc<AudioBuffer> = match slot.source_match() {
            Some(m) => {
                segments_rendered += 1;
                render_match(m, tail, sample_rate, registry, cache, energy.as_ref())?
            }
            None => Arc::new(AudioBuffer::silence(len, sample_rate)?),
        };
        let samples = rendered.samples();
        log::debug!(
            "slot {} [{}, {}) {}: {} samples",
            i,
            span.start,
            span.end,
            if slot.is_gap() { "gap" } else { "matched" },
            samples.len()
        );

        let start = span.start;
        let head_len = head.min(samples.len());
        let blended = crossfade(
            &out[start..start + head_len],
            &samples[..head_len],
            config.blend_algorithm,
        );
        out[start..start + head_len].copy_from_slice(&blended);
        let body_end = (start + samples.len()).min(out.len());
        out[start + head_len..body_end].copy_from_slice(&samples[head_len..body_end - start]);

        head = tail;
    }

    out.truncate(target_len);
    if config.noise_gate {
        out = noise_gate(&out, sample_rate);
    }
    let clicks_removed = if config.remove_clicks {
        remove_clicks(&mut out)
    } else {
        0
    };
    if clicks_removed > 0 {
        log::debug!("repaired {} click(s)", clicks_removed);
    }
    let normalization_gain = config
        .normalize_level
        .map(|level| normalize_peak(&mut out, level));

    let mut clipped_samples = 0;
    for s in out.iter_mut() {
        if s.abs() > 1.0 {
            clipped_samples += 1;
            *s = s.clamp(-1.0, 1.0);
        }
    }
    if clipped_samples > 0 {
        log::warn!("clipped {} output samples", clipped_samples);
    }

    let output = AudioBuffer::from_mono(out, sample_rate)?;
    let metadata = SynthesisMetadata {
        sample_rate,
        output_samples: output.num_frames(),
        gap_ratio: timeline.gap_ratio(),
        unmatched: timeline.unmatched(),
        segments_rendered,
        clipped_samples,
        crossfade_samples: crossfade_len,
        blend_algorithm: config.blend_algorithm,
        source_usage: timeline.source_usage(),
        energy_matched: energy.is_some(),
        clicks_removed,
        normalization_gain,
        source_failures: Vec::new(),
        cache: cache.stats(),
        elapsed_secs: started.elapsed().as_secs_f64(),
    };
    log::info!(
        "synthesized {} samples from {} segments (gap ratio {:.3}) in {:.3}s",
        metadata.output_samples,
        segments_rendered,
        metadata.gap_ratio,
        metadata.elapsed_secs
    );

    Ok(SynthesisResult {
        output,
        timeline: timeline.clone(),
        matches: timeline.matches().cloned().collect(),
        metadata,
        quality: None,
    })
}
