use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CollageError, Result};

/// A single audio sample (32-bit float, nominal range -1.0 to 1.0).
pub type Sample = f32;

/// Identifier of a source recording in a [`SourceRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable buffer of interleaved audio samples.
///
/// Sample storage is shared, so cloning a buffer is cheap and never copies
/// audio. Derived buffers (mono mixdown, slices) are new instances.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    data: Arc<[Sample]>,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Creates a new audio buffer.
    ///
    /// # Errors
    /// Returns [`CollageError::InvalidAudio`] if `channels` or `sample_rate` is
    /// zero, or if the sample count is not a multiple of the channel count.
    pub fn new(data: Vec<Sample>, channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(CollageError::InvalidAudio(
                "channel count must be at least 1".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(CollageError::InvalidAudio(
                "sample rate must be positive".to_string(),
            ));
        }
        if data.len() % channels as usize != 0 {
            return Err(CollageError::InvalidAudio(format!(
                "{} samples is not a whole number of {}-channel frames",
                data.len(),
                channels
            )));
        }
        Ok(Self {
            data: data.into(),
            channels,
            sample_rate,
        })
    }

    /// Creates a mono buffer.
    pub fn from_mono(data: Vec<Sample>, sample_rate: u32) -> Result<Self> {
        Self::new(data, 1, sample_rate)
    }

    /// Creates a mono buffer of digital silence.
    pub fn silence(num_frames: usize, sample_rate: u32) -> Result<Self> {
        Self::new(vec![0.0; num_frames], 1, sample_rate)
    }

    /// Raw interleaved sample data.
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.data
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames in the buffer (total samples / channels).
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if both buffers share the same sample storage.
    pub fn shares_storage(&self, other: &AudioBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Mixes all channels down to a single channel by averaging.
    ///
    /// Mono buffers are returned as a cheap clone of the same storage.
    pub fn to_mono(&self) -> AudioBuffer {
        if self.channels == 1 {
            return self.clone();
        }
        let num_ch = self.channels as usize;
        let scale = 1.0 / num_ch as f32;
        let mixed: Vec<Sample> = self
            .data
            .chunks_exact(num_ch)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect();
        AudioBuffer {
            data: mixed.into(),
            channels: 1,
            sample_rate: self.sample_rate,
        }
    }

    /// Copies the frames in `[start, end)` (clamped to the buffer) into a new buffer.
    pub fn slice(&self, start: usize, end: usize) -> AudioBuffer {
        let frames = self.num_frames();
        let end = end.min(frames);
        let start = start.min(end);
        let ch = self.channels as usize;
        AudioBuffer {
            data: self.data[start * ch..end * ch].to_vec().into(),
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }
}

/// Half-open sample range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleSpan {
    pub start: usize,
    pub end: usize,
}

impl SampleSpan {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {start} after end {end}");
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.len() as f64 / sample_rate as f64
    }
}

/// Reference into a registered source recording. Never owns audio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub source_id: SourceId,
    pub start_sample: usize,
    pub end_sample: usize,
}

impl Segment {
    pub fn new(source_id: SourceId, start_sample: usize, end_sample: usize) -> Self {
        Self {
            source_id,
            start_sample,
            end_sample,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end_sample.saturating_sub(self.start_sample)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn span(&self) -> SampleSpan {
        SampleSpan::new(self.start_sample, self.end_sample.max(self.start_sample))
    }
}

/// Pitch and time adjustment applied to a segment before it is placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    /// Pitch shift in semitones; positive raises the pitch.
    pub pitch_semitones: f64,
    /// Output length over input length; >1.0 = longer.
    pub stretch_ratio: f64,
}

impl TransformParams {
    pub fn new(pitch_semitones: f64, stretch_ratio: f64) -> Self {
        Self {
            pitch_semitones,
            stretch_ratio,
        }
    }

    /// No pitch change at the original duration.
    pub fn identity() -> Self {
        Self::new(0.0, 1.0)
    }

    /// Frequency multiplier for the pitch shift.
    #[inline]
    pub fn pitch_factor(&self) -> f64 {
        2f64.powf(self.pitch_semitones / 12.0)
    }
}

impl Default for TransformParams {
    fn default() -> Self {
        Self::identity()
    }
}

/// Arena of source recordings keyed by id.
///
/// Buffers are stored as mono mixdowns; segments resolve against them by id.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceId, Arc<AudioBuffer>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source under a new id.
    ///
    /// Ids are never reused: transformed segments are cached by id, so a
    /// replaced buffer would be served stale material.
    ///
    /// # Errors
    /// [`CollageError::DuplicateSource`] if `id` is already registered.
    pub fn insert(&mut self, id: impl Into<SourceId>, buffer: AudioBuffer) -> Result<()> {
        match self.sources.entry(id.into()) {
            Entry::Occupied(entry) => Err(CollageError::DuplicateSource(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(buffer.to_mono()));
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &SourceId) -> Option<&Arc<AudioBuffer>> {
        self.sources.get(id)
    }

    /// Looks up a source, failing with [`CollageError::UnknownSource`].
    pub fn resolve(&self, id: &SourceId) -> Result<&Arc<AudioBuffer>> {
        self.sources
            .get(id)
            .ok_or_else(|| CollageError::UnknownSource(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Iterates sources in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &Arc<AudioBuffer>)> {
        self.sources.iter()
    }
}
