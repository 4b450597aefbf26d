#![forbid(unsafe_code)]
//! Segment-based audio similarity search and collage synthesis.
//!
//! `audiocollage` rebuilds a *target* recording out of short segments cut from
//! a set of *source* recordings. Both sides are reduced to per-frame feature
//! vectors (MFCC, spectral shape, energy or zero-crossing rate), every window of
//! target frames is compared against every position in every source, and the
//! best-scoring segments are laid out on a timeline, transformed to fit, and
//! crossfaded into one output buffer.
//!
//! # Quick Start
//!
//! ```
//! use audiocollage::{AudioBuffer, CollageConfig, CollageEngine, FeatureType};
//!
//! let sine = |freq: f32, len: usize| -> AudioBuffer {
//!     let data = (0..len)
//!         .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
//!         .collect();
//!     AudioBuffer::from_mono(data, 16000).unwrap()
//! };
//!
//! let config = CollageConfig::default()
//!     .with_feature_type(FeatureType::Spectral)
//!     .with_framing(512, 256);
//!
//! let mut engine = CollageEngine::new(config).unwrap();
//! engine.add_source("tone", sine(440.0, 32000)).unwrap();
//!
//! let result = engine.run(&sine(440.0, 16000), None).unwrap();
//! assert_eq!(result.output().num_frames(), 16000);
//! ```
//!
//! # Stages
//!
//! Each stage is usable on its own:
//!
//! ```
//! use audiocollage::{
//!     build_timeline, extract_features, extract_sources, find_matches, synthesize,
//!     AudioBuffer, CollageConfig, FeatureType, SegmentCache, SourceRegistry,
//! };
//!
//! let tone: Vec<f32> = (0..16000)
//!     .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16000.0).sin() * 0.4)
//!     .collect();
//! let target = AudioBuffer::from_mono(tone.clone(), 16000).unwrap();
//!
//! let mut registry = SourceRegistry::new();
//! registry.insert("a", AudioBuffer::from_mono(tone, 16000).unwrap()).unwrap();
//!
//! let config = CollageConfig::default().with_feature_type(FeatureType::Energy);
//! let features = config.feature_config();
//! let target_features = extract_features(&target, &features).unwrap();
//! let (sources, failures) = extract_sources(&registry, &features);
//! assert!(failures.is_empty());
//!
//! let report = find_matches(&target_features, &sources, &config, None).unwrap();
//! let timeline = build_timeline(&report, &config).unwrap();
//! let cache = SegmentCache::new(config.cache_capacity).unwrap();
//! let result = synthesize(&timeline, &registry, &config, &cache, None).unwrap();
//! assert_eq!(result.output().num_frames(), target.num_frames());
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod features;
pub mod quality;
pub mod selection;
pub mod similarity;
pub mod synthesis;

pub use cache::{CacheKey, CacheStats, SegmentCache};
pub use cancel::CancellationToken;
pub use config::CollageConfig;
pub use core::types::{
    AudioBuffer, Sample, SampleSpan, Segment, SourceId, SourceRegistry, TransformParams,
};
pub use engine::CollageEngine;
pub use error::{CollageError, Result, SourceFailure};
pub use features::{
    extract_features, extract_sources, FeatureConfig, FeatureSequence, FeatureType,
};
pub use quality::{compare_buffers, evaluate_quality, QualityMetrics, SignalStats};
pub use selection::{
    build_timeline, GapPolicy, GapReason, Timeline, TimelineSlot, UnmatchedSpan,
};
pub use similarity::{find_matches, DistanceMetric, Match, MatchReport};
pub use synthesis::{
    synthesize, synthesize_with_reference, BlendAlgorithm, SynthesisMetadata, SynthesisResult,
};
