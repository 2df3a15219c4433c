//! Precinct-keyed data-bin cache with bounded memory and pluggable
//! eviction.
//!
//! All map mutations happen under one mutex and never across I/O; the hit
//! and request counters update atomically so concurrent readers see
//! consistent statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use super::bin::{DataBin, Precinct3d};
use super::Frustum;
use crate::volume::Region;

/// Cache capacity limits.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_memory_bytes: usize,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024,
            max_entries: 4096,
        }
    }
}

/// How the cache frees space when a store would exceed its caps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvictionStrategy {
    /// Oldest access first.
    Lru,
    /// Drop the `target_fraction` of entries farthest from `center`.
    SpatialProximity {
        center: [f32; 3],
        target_fraction: f32,
    },
    /// Drop every entry whose region hint misses the frustum.
    ViewFrustum(Frustum),
    /// Drop every entry at resolution level `max` or coarser.
    ResolutionLevel { max: u8 },
}

/// One cached bin with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: Precinct3d,
    pub bin: DataBin,
    pub region_hint: Region,
    pub last_access: Instant,
    pub size: usize,
    /// Logical access clock; breaks `Instant` ties so LRU order matches
    /// the true access sequence.
    seq: u64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub total_requests: u64,
    pub hits: u64,
    pub evictions: u64,
    pub memory_used: usize,
    pub entry_count: usize,
    pub hit_rate: f64,
}

#[derive(Default)]
struct Inner {
    map: HashMap<Precinct3d, CacheEntry>,
    memory_used: usize,
    clock: u64,
}

/// Thread-safe data-bin cache.
pub struct BinCache {
    config: CacheConfig,
    strategy: Mutex<EvictionStrategy>,
    inner: Mutex<Inner>,
    total_requests: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

impl BinCache {
    pub fn new(config: CacheConfig, strategy: EvictionStrategy) -> Self {
        Self {
            config,
            strategy: Mutex::new(strategy),
            inner: Mutex::new(Inner::default()),
            total_requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_lru(config: CacheConfig) -> Self {
        Self::new(config, EvictionStrategy::Lru)
    }

    pub fn set_strategy(&self, strategy: EvictionStrategy) {
        *self.strategy.lock().unwrap_or_else(|e| e.into_inner()) = strategy;
    }

    /// Insert a bin, evicting under the configured strategy if either cap
    /// would be exceeded. Returns false when the bin still does not fit;
    /// overflow is never an error.
    pub fn store(&self, key: Precinct3d, bin: DataBin, region_hint: Region) -> bool {
        let size = bin.bytes.len();
        if size > self.config.max_memory_bytes {
            log::debug!("bin of {size} bytes exceeds the whole cache budget; not cached");
            return false;
        }
        let strategy = *self.strategy.lock().unwrap_or_else(|e| e.into_inner());
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Replacing an entry releases its footprint first.
        if let Some(old) = inner.map.remove(&key) {
            inner.memory_used -= old.size;
        }

        if !self.make_room(&mut inner, size, &strategy) {
            return false;
        }
        inner.memory_used += size;
        inner.clock += 1;
        let seq = inner.clock;
        inner.map.insert(
            key,
            CacheEntry {
                key,
                bin,
                region_hint,
                last_access: Instant::now(),
                size,
                seq,
            },
        );
        true
    }

    /// Look up a bin, refreshing its access time and the hit counters.
    pub fn retrieve(&self, key: &Precinct3d) -> Option<DataBin> {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clock += 1;
        let seq = inner.clock;
        match inner.map.get_mut(key) {
            Some(entry) => {
                entry.last_access = Instant::now();
                entry.seq = seq;
                self.hits.fetch_add(1, Ordering::SeqCst);
                Some(entry.bin.clone())
            }
            None => None,
        }
    }

    pub fn contains(&self, key: &Precinct3d) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.contains_key(key)
    }

    /// Remove every entry whose region hint intersects `region`.
    pub fn invalidate_region(&self, region: &Region) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<Precinct3d> = inner
            .map
            .values()
            .filter(|e| e.region_hint.intersects(region))
            .map(|e| e.key)
            .collect();
        for key in &doomed {
            if let Some(e) = inner.map.remove(key) {
                inner.memory_used -= e.size;
            }
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.clear();
        inner.memory_used = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let total_requests = self.total_requests.load(Ordering::SeqCst);
        let hits = self.hits.load(Ordering::SeqCst);
        CacheStats {
            total_requests,
            hits,
            evictions: self.evictions.load(Ordering::SeqCst),
            memory_used: inner.memory_used,
            entry_count: inner.map.len(),
            hit_rate: if total_requests == 0 {
                0.0
            } else {
                hits as f64 / total_requests as f64
            },
        }
    }

    /// Evict until `incoming` fits both caps. LRU loops entry by entry;
    /// the other strategies do one targeted sweep.
    fn make_room(&self, inner: &mut Inner, incoming: usize, strategy: &EvictionStrategy) -> bool {
        let fits = |inner: &Inner| {
            inner.map.len() < self.config.max_entries
                && inner.memory_used + incoming <= self.config.max_memory_bytes
        };
        if fits(inner) {
            return true;
        }
        match strategy {
            EvictionStrategy::Lru => {
                while !fits(inner) && !inner.map.is_empty() {
                    let oldest = inner
                        .map
                        .values()
                        .min_by_key(|e| e.seq)
                        .map(|e| e.key);
                    match oldest {
                        Some(key) => self.evict(inner, &key),
                        None => break,
                    }
                }
            }
            EvictionStrategy::SpatialProximity {
                center,
                target_fraction,
            } => {
                let mut by_distance: Vec<(f32, Precinct3d)> = inner
                    .map
                    .values()
                    .map(|e| {
                        let c = e.region_hint.center();
                        let d = (c[0] - center[0]).powi(2)
                            + (c[1] - center[1]).powi(2)
                            + (c[2] - center[2]).powi(2);
                        (d, e.key)
                    })
                    .collect();
                by_distance.sort_by(|a, b| b.0.total_cmp(&a.0));
                let doomed = ((by_distance.len() as f32 * target_fraction).ceil() as usize).max(1);
                for (_, key) in by_distance.into_iter().take(doomed) {
                    self.evict(inner, &key);
                }
            }
            EvictionStrategy::ViewFrustum(frustum) => {
                let doomed: Vec<Precinct3d> = inner
                    .map
                    .values()
                    .filter(|e| !frustum.intersects_region(&e.region_hint))
                    .map(|e| e.key)
                    .collect();
                for key in doomed {
                    self.evict(inner, &key);
                }
            }
            EvictionStrategy::ResolutionLevel { max } => {
                let doomed: Vec<Precinct3d> = inner
                    .map
                    .values()
                    .filter(|e| e.key.resolution_level <= *max)
                    .map(|e| e.key)
                    .collect();
                for key in doomed {
                    self.evict(inner, &key);
                }
            }
        }
        fits(inner)
    }

    fn evict(&self, inner: &mut Inner, key: &Precinct3d) {
        if let Some(e) = inner.map.remove(key) {
            inner.memory_used -= e.size;
            self.evictions.fetch_add(1, Ordering::SeqCst);
            log::trace!("evicted bin at level {}", e.key.resolution_level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpip::bin::{pack_bin_id, Subband3d};

    fn key(i: u32, level: u8) -> Precinct3d {
        Precinct3d {
            ix: i,
            iy: 0,
            iz: 0,
            resolution_level: level,
            component: 0,
            subband: Subband3d::Lll,
        }
    }

    fn bin(i: u32, level: u8, size: usize) -> DataBin {
        DataBin {
            bin_id: pack_bin_id(i as usize, level, 0),
            tile: (i, 0, 0),
            resolution_level: level,
            quality_layer: 0,
            bytes: vec![0xAB; size],
            is_complete: true,
        }
    }

    fn hint(i: u32) -> Region {
        Region::from_size(i * 8, 0, 0, 8, 8, 8)
    }

    #[test]
    fn test_lru_eviction_sequence() {
        // max_entries = 3, five 48-byte stores: k0 falls out, k4 hits.
        let cache = BinCache::with_lru(CacheConfig {
            max_memory_bytes: 1 << 20,
            max_entries: 3,
        });
        for i in 0..5u32 {
            assert!(cache.store(key(i, 0), bin(i, 0, 48), hint(i)));
        }
        let stats = cache.stats();
        assert!(stats.entry_count <= 3);
        assert!(cache.retrieve(&key(0, 0)).is_none());
        assert!(cache.retrieve(&key(4, 0)).is_some());
    }

    #[test]
    fn test_memory_cap_respected() {
        let cache = BinCache::with_lru(CacheConfig {
            max_memory_bytes: 100,
            max_entries: 100,
        });
        for i in 0..10u32 {
            cache.store(key(i, 0), bin(i, 0, 40), hint(i));
            assert!(cache.stats().memory_used <= 100);
        }
    }

    #[test]
    fn test_oversized_bin_rejected() {
        let cache = BinCache::with_lru(CacheConfig {
            max_memory_bytes: 32,
            max_entries: 8,
        });
        assert!(!cache.store(key(0, 0), bin(0, 0, 64), hint(0)));
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_hit_rate_accounting() {
        let cache = BinCache::with_lru(CacheConfig::default());
        cache.store(key(1, 0), bin(1, 0, 16), hint(1));
        assert!(cache.retrieve(&key(1, 0)).is_some());
        assert!(cache.retrieve(&key(2, 0)).is_none());
        let stats = cache.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.hits, 1);
        assert!(stats.hits <= stats.total_requests);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_resolution_level_eviction() {
        let cache = BinCache::new(
            CacheConfig {
                max_memory_bytes: 1 << 20,
                max_entries: 4,
            },
            EvictionStrategy::ResolutionLevel { max: 1 },
        );
        for (i, level) in [(0u32, 0u8), (1, 1), (2, 2), (3, 3)] {
            cache.store(key(i, level), bin(i, level, 16), hint(i));
        }
        // A fifth store sweeps out levels <= 1.
        cache.store(key(9, 3), bin(9, 3, 16), hint(9));
        assert!(cache.retrieve(&key(0, 0)).is_none());
        assert!(cache.retrieve(&key(1, 1)).is_none());
        assert!(cache.retrieve(&key(2, 2)).is_some());
    }

    #[test]
    fn test_spatial_proximity_evicts_farthest() {
        let cache = BinCache::new(
            CacheConfig {
                max_memory_bytes: 1 << 20,
                max_entries: 4,
            },
            EvictionStrategy::SpatialProximity {
                center: [0.0, 0.0, 0.0],
                target_fraction: 0.5,
            },
        );
        for i in 0..4u32 {
            cache.store(key(i, 0), bin(i, 0, 16), hint(i));
        }
        cache.store(key(10, 0), bin(10, 0, 16), hint(0));
        // The two hints farthest from the origin are gone.
        assert!(cache.retrieve(&key(3, 0)).is_none());
        assert!(cache.retrieve(&key(0, 0)).is_some());
    }

    #[test]
    fn test_view_frustum_eviction() {
        let frustum = Frustum {
            origin: [0.0, 0.0, -5.0],
            direction: [0.0, 0.0, 1.0],
            half_angle_deg: 15.0,
            far: 40.0,
        };
        let cache = BinCache::new(
            CacheConfig {
                max_memory_bytes: 1 << 20,
                max_entries: 2,
            },
            EvictionStrategy::ViewFrustum(frustum),
        );
        // hint(0) sits in front of the cone, hint(100) far outside it.
        cache.store(key(0, 0), bin(0, 0, 16), hint(0));
        cache.store(key(100, 0), bin(100, 0, 16), hint(100));
        cache.store(key(1, 0), bin(1, 0, 16), hint(0));
        assert!(cache.retrieve(&key(100, 0)).is_none());
        assert!(cache.retrieve(&key(0, 0)).is_some());
    }

    #[test]
    fn test_invalidate_region() {
        let cache = BinCache::with_lru(CacheConfig::default());
        for i in 0..4u32 {
            cache.store(key(i, 0), bin(i, 0, 16), hint(i));
        }
        let removed = cache.invalidate_region(&Region::from_size(0, 0, 0, 16, 8, 8));
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().entry_count, 2);
    }

    #[test]
    fn test_concurrent_store_retrieve() {
        use std::sync::Arc;
        let cache = Arc::new(BinCache::with_lru(CacheConfig {
            max_memory_bytes: 1 << 16,
            max_entries: 64,
        }));
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50u32 {
                    let k = key(t * 100 + i, 0);
                    cache.store(k, bin(i, 0, 8), hint(i));
                    cache.retrieve(&k);
                }
            }));
        }
        for h in handles {
            h.join().expect("worker panicked");
        }
        let stats = cache.stats();
        assert!(stats.hits <= stats.total_requests);
        assert!(stats.memory_used <= 1 << 16);
    }
}
