//! Thread-safe LRU cache of transformed segments.
//!
//! Entries are published atomically: a key is either absent, being
//! materialized by exactly one caller, or ready. Concurrent callers for a key
//! that is being materialized wait on a condition variable and receive the
//! same `Arc` once it is published.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::core::types::{AudioBuffer, Segment, SourceId, TransformParams};
use crate::error::{CollageError, Result};

/// Quantized transform parameters, stable enough to use as a hash key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransformSignature {
    /// Pitch shift in cents.
    pub pitch_cents: i64,
    /// Stretch ratio in parts per million.
    pub stretch_ppm: i64,
    /// Length of the rendered output in samples.
    pub output_len: usize,
    /// Fingerprint of the energy envelope the segment was matched to, if any.
    pub energy: Option<u64>,
}

impl TransformSignature {
    pub fn new(params: &TransformParams, output_len: usize) -> Self {
        Self {
            pitch_cents: (params.pitch_semitones * 100.0).round() as i64,
            stretch_ppm: (params.stretch_ratio * 1e6).round() as i64,
            output_len,
            energy: None,
        }
    }

    /// Adds the fingerprint of an energy envelope, quantized to 1e-6.
    pub fn with_energy(mut self, envelope: &[f32]) -> Self {
        let mut hasher = DefaultHasher::new();
        envelope.len().hash(&mut hasher);
        for v in envelope {
            ((*v as f64 * 1e6).round() as i64).hash(&mut hasher);
        }
        self.energy = Some(hasher.finish());
        self
    }
}

/// Identifies one transformed source excerpt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    pub source_id: SourceId,
    pub start: usize,
    pub end: usize,
    pub transform: TransformSignature,
}

impl CacheKey {
    pub fn new(
        source_id: SourceId,
        start: usize,
        end: usize,
        transform: TransformSignature,
    ) -> Self {
        Self {
            source_id,
            start,
            end,
            transform,
        }
    }

    /// Key for `segment` rendered with `params` to `output_len` samples.
    pub fn for_segment(segment: &Segment, params: &TransformParams, output_len: usize) -> Self {
        Self::new(
            segment.source_id.clone(),
            segment.start_sample,
            segment.end_sample,
            TransformSignature::new(params, output_len),
        )
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hits over total lookups, 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry {
    value: Arc<AudioBuffer>,
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Entry>,
    /// Access tick -> key, oldest first.
    recency: BTreeMap<u64, CacheKey>,
    in_flight: HashSet<CacheKey>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Returns a ready entry and marks it most recently used.
    fn touch(&mut self, key: &CacheKey) -> Option<Arc<AudioBuffer>> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.clone());
        Some(Arc::clone(&entry.value))
    }

    fn publish(&mut self, key: CacheKey, value: Arc<AudioBuffer>, capacity: usize) {
        while self.entries.len() >= capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions += 1;
            log::debug!(
                "cache evicted {}[{}, {})",
                oldest.source_id,
                oldest.start,
                oldest.end
            );
        }
        let tick = self.next_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, Entry { value, tick });
    }
}

/// Bounded LRU cache of transformed segments, shared by handle.
pub struct SegmentCache {
    capacity: usize,
    state: Mutex<CacheState>,
    ready: Condvar,
}

impl std::fmt::Debug for SegmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Clears the in-flight marker if materialization does not publish.
struct InFlight<'a> {
    cache: &'a SegmentCache,
    key: &'a CacheKey,
    published: bool,
}

impl InFlight<'_> {
    fn publish(mut self, value: Arc<AudioBuffer>) {
        {
            let mut state = self.cache.state.lock();
            state.in_flight.remove(self.key);
            state.publish(self.key.clone(), value, self.cache.capacity);
        }
        self.published = true;
        self.cache.ready.notify_all();
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.cache.state.lock().in_flight.remove(self.key);
            self.cache.ready.notify_all();
        }
    }
}

impl SegmentCache {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Errors
    /// [`CollageError::CacheCapacity`] when `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CollageError::CacheCapacity(capacity));
        }
        Ok(Self {
            capacity,
            state: Mutex::new(CacheState::default()),
            ready: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` is ready, without touching its recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Returns the entry for `key`, creating it with `factory` on a miss.
    ///
    /// At most one factory runs per key at a time. Callers arriving while
    /// it runs wait and receive the published entry. If the factory fails
    /// or panics nothing is published and one waiter retries with its own
    /// factory.
    pub fn get_or_create<F>(&self, key: &CacheKey, factory: F) -> Result<Arc<AudioBuffer>>
    where
        F: FnOnce() -> Result<AudioBuffer>,
    {
        {
            let mut state = self.state.lock();
            loop {
                if let Some(value) = state.touch(key) {
                    state.hits += 1;
                    log::debug!("cache hit {}[{}, {})", key.source_id, key.start, key.end);
                    return Ok(value);
                }
                if !state.in_flight.contains(key) {
                    break;
                }
                self.ready.wait(&mut state);
            }
            state.misses += 1;
            state.in_flight.insert(key.clone());
        }
        log::debug!("cache miss {}[{}, {})", key.source_id, key.start, key.end);

        let guard = InFlight {
            cache: self,
            key,
            published: false,
        };
        let value = Arc::new(factory()?);
        guard.publish(Arc::clone(&value));
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.entries.len(),
            capacity: self.capacity,
        }
    }

    /// Drops every ready entry and resets the counters.
    ///
    /// Materializations in flight are unaffected and still publish.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        state.hits = 0;
        state.misses = 0;
        state.evictions = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(start: usize) -> CacheKey {
        CacheKey::new(
            SourceId::from("src"),
            start,
            start + 10,
            TransformSignature::new(&TransformParams::identity(), 10),
        )
    }

    fn buffer(value: f32) -> Result<AudioBuffer> {
        AudioBuffer::from_mono(vec![value; 10], 8000)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(SegmentCache::new(0).err(), Some(CollageError::CacheCapacity(0)));
    }

    #[test]
    fn test_hit_returns_same_arc() {
        let cache = SegmentCache::new(4).unwrap();
        let a = cache.get_or_create(&key(0), || buffer(0.1)).unwrap();
        let b = cache
            .get_or_create(&key(0), || panic!("factory must not run on a hit"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = SegmentCache::new(2).unwrap();
        cache.get_or_create(&key(0), || buffer(0.0)).unwrap();
        cache.get_or_create(&key(1), || buffer(0.1)).unwrap();
        // Touch key 0 so key 1 becomes the eviction candidate
        cache.get_or_create(&key(0), || buffer(0.0)).unwrap();
        cache.get_or_create(&key(2), || buffer(0.2)).unwrap();
        assert!(cache.contains(&key(0)));
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_factory_publishes_nothing() {
        let cache = SegmentCache::new(2).unwrap();
        let result = cache.get_or_create(&key(0), || Err(CollageError::Transform("boom".into())));
        assert!(result.is_err());
        assert!(!cache.contains(&key(0)));
        // The key is free again
        assert!(cache.get_or_create(&key(0), || buffer(0.3)).is_ok());
    }

    #[test]
    fn test_panicking_factory_releases_key() {
        let cache = SegmentCache::new(2).unwrap();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cache.get_or_create(&key(0), || panic!("factory panic"));
        }));
        assert!(caught.is_err());
        assert!(cache.get_or_create(&key(0), || buffer(0.3)).is_ok());
    }

    #[test]
    fn test_concurrent_single_materialization() {
        let cache = Arc::new(SegmentCache::new(4).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_create(&key(0), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            buffer(0.5)
                        })
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[test]
    fn test_clear_resets() {
        let cache = SegmentCache::new(2).unwrap();
        cache.get_or_create(&key(0), || buffer(0.0)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats { capacity: 2, ..CacheStats::default() });
    }

    #[test]
    fn test_signature_quantization() {
        let a = TransformSignature::new(&TransformParams::new(1.0000001, 1.5), 100);
        let b = TransformSignature::new(&TransformParams::new(1.0, 1.5000000001), 100);
        assert_eq!(a, b);
        assert_eq!(a.pitch_cents, 100);
        assert_eq!(a.energy, None);
    }

    #[test]
    fn test_energy_envelope_distinguishes_keys() {
        let base = TransformSignature::new(&TransformParams::identity(), 100);
        let quiet = base.with_energy(&[0.1, 0.1, 0.1]);
        let loud = base.with_energy(&[0.3, 0.3, 0.3]);
        assert_ne!(quiet, loud);
        assert_ne!(quiet, base);
        assert_eq!(quiet, base.with_energy(&[0.1, 0.1, 0.100_000_01]));
    }
}
