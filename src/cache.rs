//! Inference result cache
//!
//! Keyed by input fingerprint, bounded by LRU eviction, expired by TTL.
//! Concurrent requests for the same fingerprint are coalesced: one caller
//! runs the model, the rest wait on its latch and share the outcome.

use crate::error::PipelineResult;
use crate::fingerprint::Fingerprint;
use crate::types::ForecastResult;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct Entry {
    result: ForecastResult,
    stored_at: Instant,
}

/// One-shot latch the leader publishes its outcome through.
#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<PipelineResult<ForecastResult>>>,
    ready: Condvar,
}

struct Shard {
    entries: LruCache<Fingerprint, Entry>,
    in_flight: HashMap<Fingerprint, Arc<Flight>>,
}

/// Cache effectiveness counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub len: usize,
}

impl CacheSnapshot {
    /// Fraction of lookups served without running the models.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

pub struct InferenceCache {
    shard: Mutex<Shard>,
    ttl: Duration,
    stats: CacheStats,
}

impl InferenceCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            shard: Mutex::new(Shard {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
            }),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn from_config(config: &crate::config::CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.capacity)
    }

    /// Return the cached result for `fingerprint`, or run `compute` to
    /// produce one.
    ///
    /// At most one caller computes a given fingerprint at a time; others
    /// arriving meanwhile block and share the leader's outcome. Errors and
    /// degraded results are handed to every waiting caller but never
    /// stored, so the next lookup retries the models.
    pub fn get_or_compute<F>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
    ) -> PipelineResult<ForecastResult>
    where
        F: FnOnce() -> PipelineResult<ForecastResult>,
    {
        let flight = {
            let mut shard = self.shard.lock();

            if let Some(entry) = shard.entries.get(&fingerprint) {
                if entry.stored_at.elapsed() < self.ttl {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(fingerprint = %fingerprint.short(), "cache hit");
                    return Ok(entry.result.clone());
                }
                shard.entries.pop(&fingerprint);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                trace!(fingerprint = %fingerprint.short(), "cache entry expired");
            }

            if let Some(flight) = shard.in_flight.get(&fingerprint) {
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(flight))
            } else {
                let flight = Arc::new(Flight::default());
                shard.in_flight.insert(fingerprint, Arc::clone(&flight));
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        };

        if let Some(flight) = flight {
            trace!(fingerprint = %fingerprint.short(), "joining in-flight computation");
            let mut outcome = flight.outcome.lock();
            loop {
                if let Some(result) = outcome.as_ref() {
                    return result.clone();
                }
                flight.ready.wait(&mut outcome);
            }
        }

        // Leader path. No lock is held while the models run.
        let result = compute();

        let flight = {
            let mut shard = self.shard.lock();
            let flight = shard.in_flight.remove(&fingerprint);
            match &result {
                Ok(value) if !value.degraded => {
                    if let Some((evicted, _)) = shard.entries.push(
                        fingerprint,
                        Entry {
                            result: value.clone(),
                            stored_at: Instant::now(),
                        },
                    ) {
                        if evicted != fingerprint {
                            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                            debug!(fingerprint = %evicted.short(), "evicted least recently used entry");
                        }
                    }
                }
                Ok(_) => {
                    trace!(fingerprint = %fingerprint.short(), "degraded result not cached");
                }
                Err(e) => {
                    debug!(fingerprint = %fingerprint.short(), error = %e, "computation failed");
                }
            }
            flight
        };

        if let Some(flight) = flight {
            let mut outcome = flight.outcome.lock();
            *outcome = Some(result.clone());
            flight.ready.notify_all();
        }

        result
    }

    /// Drop every cached entry. In-flight computations are unaffected.
    pub fn clear(&self) {
        self.shard.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.shard.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizationConfig;
    use crate::error::PipelineError;
    use crate::normalizer::FeatureNormalizer;
    use crate::types::{Reading, POLLUTANT_CHANNELS};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn fingerprint(base: f64) -> Fingerprint {
        let norm = FeatureNormalizer::new(2, &NormalizationConfig::default()).unwrap();
        let window: Vec<Reading> = (0..2)
            .map(|t| {
                let mut reading = Reading::new("Bangalore");
                for channel in POLLUTANT_CHANNELS {
                    reading.set_pollutant(channel, Some(base + t as f64));
                }
                reading
            })
            .collect();
        Fingerprint::of(&norm.normalize(&window).unwrap(), "f=lstm-v1;c=gbt-v1", 6)
    }

    fn result(aqi: f64) -> ForecastResult {
        ForecastResult::new("f=lstm-v1;c=gbt-v1")
            .with_forecast(vec![aqi])
            .with_band("Moderate")
    }

    #[test]
    fn test_second_lookup_hits() {
        let cache = InferenceCache::new(Duration::from_secs(60), 8);
        let fp = fingerprint(40.0);
        let calls = AtomicUsize::new(0);

        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(result(120.0))
        };
        let first = cache.get_or_compute(fp, compute).unwrap();
        let second = cache
            .get_or_compute(fp, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(result(999.0))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.forecast, second.forecast);
        let stats = cache.snapshot();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.len, 1);
    }

    #[test]
    fn test_ttl_expiry_recomputes() {
        let cache = InferenceCache::new(Duration::from_millis(20), 8);
        let fp = fingerprint(40.0);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_compute(fp, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(result(80.0))
                })
                .unwrap();
            thread::sleep(Duration::from_millis(50));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.snapshot().expirations, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache = InferenceCache::new(Duration::from_secs(60), 2);
        let (a, b, c) = (fingerprint(10.0), fingerprint(20.0), fingerprint(30.0));

        cache.get_or_compute(a, || Ok(result(1.0))).unwrap();
        cache.get_or_compute(b, || Ok(result(2.0))).unwrap();
        // Touch `a` so `b` becomes the eviction candidate.
        cache.get_or_compute(a, || Ok(result(99.0))).unwrap();
        cache.get_or_compute(c, || Ok(result(3.0))).unwrap();

        assert_eq!(cache.snapshot().evictions, 1);

        // `a` survived, `b` was evicted and must recompute.
        let calls = AtomicUsize::new(0);
        cache
            .get_or_compute(a, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(result(99.0))
            })
            .unwrap();
        cache
            .get_or_compute(b, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(result(2.0))
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_lookups_compute_once() {
        let cache = Arc::new(InferenceCache::new(Duration::from_secs(60), 8));
        let fp = fingerprint(40.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(fp, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(result(150.0))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<ForecastResult> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.forecast == vec![150.0]));
        let stats = cache.snapshot();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced + stats.hits, 7);
    }

    #[test]
    fn test_degraded_results_are_not_cached() {
        let cache = InferenceCache::new(Duration::from_secs(60), 8);
        let fp = fingerprint(40.0);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let out = cache
                .get_or_compute(fp, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(result(60.0).mark_degraded("forecaster unavailable"))
                })
                .unwrap();
            assert!(out.degraded);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = InferenceCache::new(Duration::from_secs(60), 8);
        let fp = fingerprint(40.0);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let err = cache
                .get_or_compute(fp, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::model_unavailable("forecaster", "load failed"))
                })
                .unwrap_err();
            assert!(matches!(err, PipelineError::ModelUnavailable { .. }));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_forces_recompute() {
        let cache = InferenceCache::new(Duration::from_secs(60), 8);
        let fp = fingerprint(40.0);
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute(fp, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(result(30.0))
            })
            .unwrap();
        cache.clear();
        cache
            .get_or_compute(fp, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(result(30.0))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hit_rate() {
        let snapshot = CacheSnapshot {
            hits: 6,
            misses: 2,
            coalesced: 2,
            evictions: 0,
            expirations: 0,
            len: 2,
        };
        assert!((snapshot.hit_rate() - 0.8).abs() < 1e-9);
    }
}
