//! End-to-end pipeline: extraction, matching, selection, synthesis, quality.

use std::sync::Arc;

use crate::cache::SegmentCache;
use crate::cancel::{checkpoint, CancellationToken};
use crate::config::CollageConfig;
use crate::core::types::{AudioBuffer, SourceId, SourceRegistry};
use crate::error::Result;
use crate::features::{extract_features, extract_sources};
use crate::quality::evaluate_quality;
use crate::selection::build_timeline;
use crate::similarity::find_matches;
use crate::synthesis::{synthesize_with_reference, SynthesisResult};

/// Owns the configuration, the source recordings and the segment cache.
///
/// The cache is shared by handle, so several engines (or repeated runs of
/// one engine) can reuse transformed segments.
#[derive(Debug)]
pub struct CollageEngine {
    config: CollageConfig,
    registry: SourceRegistry,
    cache: Arc<SegmentCache>,
}

impl CollageEngine {
    /// Creates an engine with its own cache of `config.cache_capacity` entries.
    pub fn new(config: CollageConfig) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(SegmentCache::new(config.cache_capacity)?);
        Ok(Self {
            config,
            registry: SourceRegistry::new(),
            cache,
        })
    }

    /// Creates an engine that uses an existing cache.
    pub fn with_cache(config: CollageConfig, cache: Arc<SegmentCache>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: SourceRegistry::new(),
            cache,
        })
    }

    /// Registers a source recording (stored as a mono mixdown).
    ///
    /// # Errors
    /// [`CollageError::DuplicateSource`](crate::error::CollageError::DuplicateSource)
    /// if `id` is already registered.
    pub fn add_source(&mut self, id: impl Into<SourceId>, buffer: AudioBuffer) -> Result<()> {
        self.registry.insert(id, buffer)
    }

    pub fn config(&self) -> &CollageConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<SegmentCache> {
        &self.cache
    }

    /// Builds a collage imitating `target` from the registered sources.
    ///
    /// Target and source features are extracted in parallel. Sources that
    /// fail extraction or matching are skipped and listed in the metadata.
    /// The returned result carries quality metrics against `target`.
    pub fn run(
        &self,
        target: &AudioBuffer,
        cancel: Option<&CancellationToken>,
    ) -> Result<SynthesisResult> {
        log::info!(
            "collage run: {:.2}s target, {} source(s)",
            target.duration_secs(),
            self.registry.len()
        );
        let feature_config = self.config.feature_config();
        let (target_features, (source_features, extraction_failures)) = rayon::join(
            || extract_features(target, &feature_config),
            || extract_sources(&self.registry, &feature_config),
        );
        let target_features = target_features?;
        checkpoint(cancel)?;

        let report = find_matches(&target_features, &source_features, &self.config, cancel)?;
        let mut failures = extraction_failures;
        failures.extend(report.failures.iter().cloned());
        if !failures.is_empty() {
            log::info!("{} source(s) skipped, see warnings above", failures.len());
        }

        let timeline = build_timeline(&report, &self.config)?;
        checkpoint(cancel)?;

        let result = synthesize_with_reference(
            &timeline,
            &self.registry,
            &self.config,
            &self.cache,
            Some(target),
            cancel,
        )?;
        let quality = evaluate_quality(&result, target);
        Ok(result.with_quality(quality).with_source_failures(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollageError;
    use crate::features::FeatureType;

    fn sine(freq: f32, sr: u32, n: usize) -> AudioBuffer {
        let data = (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect();
        AudioBuffer::from_mono(data, sr).unwrap()
    }

    fn config() -> CollageConfig {
        CollageConfig::default()
            .with_feature_type(FeatureType::Spectral)
            .with_framing(256, 128)
            .with_match_window_frames(4)
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let result = CollageEngine::new(config().with_cache_capacity(0));
        assert!(matches!(result, Err(CollageError::CacheCapacity(0))));
    }

    #[test]
    fn test_run_produces_target_length() {
        let mut engine = CollageEngine::new(config()).unwrap();
        engine.add_source("a", sine(440.0, 8000, 8000)).unwrap();
        let target = sine(440.0, 8000, 6000);
        let result = engine.run(&target, None).unwrap();
        assert_eq!(result.output().num_frames(), 6000);
        assert_eq!(result.output().sample_rate(), 8000);
        assert!(result.quality().is_some());
        assert_eq!(result.metadata().gap_ratio, 0.0);
    }

    #[test]
    fn test_short_source_skipped() {
        let mut engine = CollageEngine::new(config()).unwrap();
        engine.add_source("a", sine(440.0, 8000, 8000)).unwrap();
        engine.add_source("tiny", sine(440.0, 8000, 100)).unwrap();
        let result = engine.run(&sine(440.0, 8000, 4000), None).unwrap();
        assert!(!result.matches().is_empty());
        assert!(result
            .matches()
            .iter()
            .all(|m| m.segment.source_id == SourceId::from("a")));

        let failures = &result.metadata().source_failures;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source_id, SourceId::from("tiny"));
        assert!(matches!(failures[0].error, CollageError::InvalidAudio(_)));
        let json = result.metadata().to_json().unwrap();
        assert!(json.contains("\"tiny\""));
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let mut engine = CollageEngine::new(config()).unwrap();
        engine.add_source("a", sine(440.0, 8000, 8000)).unwrap();
        let again = engine.add_source("a", sine(880.0, 8000, 8000));
        assert!(matches!(again, Err(CollageError::DuplicateSource(_))));
        assert_eq!(engine.registry().len(), 1);
    }

    #[test]
    fn test_shared_cache() {
        let cache = Arc::new(SegmentCache::new(16).unwrap());
        let mut first = CollageEngine::with_cache(config(), Arc::clone(&cache)).unwrap();
        first.add_source("a", sine(440.0, 8000, 8000)).unwrap();
        let target = sine(440.0, 8000, 4000);
        first.run(&target, None).unwrap();
        let misses = cache.stats().misses;
        first.run(&target, None).unwrap();
        assert_eq!(cache.stats().misses, misses);
        assert!(Arc::ptr_eq(first.cache(), &cache));
    }

    #[test]
    fn test_cancelled_run() {
        let mut engine = CollageEngine::new(config()).unwrap();
        engine.add_source("a", sine(440.0, 8000, 8000)).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = engine.run(&sine(440.0, 8000, 4000), Some(&token));
        assert!(matches!(result, Err(CollageError::Cancelled)));
    }
}
