use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, trace};

/// Strong content hash used as a cache key (blake3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Processing-phase tag partitioning cache retention policy.
/// Stabilization entries are proven-stable results and are retained longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Regime {
    Exploration,
    Optimization,
    Stabilization,
}

impl Regime {
    pub const ALL: [Regime; 3] = [
        Regime::Exploration,
        Regime::Optimization,
        Regime::Stabilization,
    ];

    fn index(&self) -> usize {
        match self {
            Regime::Exploration => 0,
            Regime::Optimization => 1,
            Regime::Stabilization => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Regime::Exploration => "exploration",
            Regime::Optimization => "optimization",
            Regime::Stabilization => "stabilization",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Max entries per regime partition.
    pub capacity_per_regime: usize,
    pub exploration_ttl: Duration,
    pub optimization_ttl: Duration,
    pub stabilization_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_per_regime: 1024,
            exploration_ttl: Duration::from_secs(120),
            optimization_ttl: Duration::from_secs(300),
            stabilization_ttl: Duration::from_secs(900),
        }
    }
}

impl CacheConfig {
    fn ttl(&self, regime: Regime) -> Duration {
        match regime {
            Regime::Exploration => self.exploration_ttl,
            Regime::Optimization => self.optimization_ttl,
            Regime::Stabilization => self.stabilization_ttl,
        }
    }
}

struct CacheEntry<V> {
    // Stored alongside the key so a mismatch can be detected defensively.
    fingerprint: Fingerprint,
    value: V,
    stored_at: Instant,
    last_used: Instant,
}

/// Bounded, regime-partitioned content cache.
///
/// Concurrent reads are fine; writes to one fingerprint go through the
/// owning DashMap shard. A lookup racing a put may miss, but can never
/// observe another fingerprint's value: if an entry's stored fingerprint
/// disagrees with its key the whole partition is dropped.
pub struct ContentCache<V> {
    partitions: [DashMap<Fingerprint, CacheEntry<V>>; 3],
    config: CacheConfig,
    lookups: AtomicU64,
    hits: AtomicU64,
}

impl<V: Clone> ContentCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            partitions: [DashMap::new(), DashMap::new(), DashMap::new()],
            config,
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<V> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        for regime in Regime::ALL {
            let partition = &self.partitions[regime.index()];
            let expired = match partition.get_mut(fingerprint) {
                Some(mut entry) => {
                    if entry.fingerprint != *fingerprint {
                        // Invariant violation: defensive abort for this partition only.
                        error!(
                            "cache fingerprint mismatch in {} partition, dropping partition",
                            regime.name()
                        );
                        drop(entry);
                        partition.clear();
                        return None;
                    }
                    if entry.stored_at.elapsed() > self.config.ttl(regime) {
                        true
                    } else {
                        entry.last_used = Instant::now();
                        let value = entry.value.clone();
                        drop(entry);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        trace!("cache hit for {} in {}", fingerprint, regime.name());
                        return Some(value);
                    }
                }
                None => continue,
            };
            if expired {
                partition.remove(fingerprint);
            }
        }
        None
    }

    pub fn put(&self, fingerprint: Fingerprint, value: V, regime: Regime) {
        let partition = &self.partitions[regime.index()];

        partition.insert(
            fingerprint,
            CacheEntry {
                fingerprint,
                value,
                stored_at: Instant::now(),
                last_used: Instant::now(),
            },
        );

        // Evict least-recently-used entries within the partition on overflow.
        while partition.len() > self.config.capacity_per_regime {
            let oldest = partition
                .iter()
                .min_by_key(|e| e.value().last_used)
                .map(|e| *e.key());
            match oldest {
                Some(key) => {
                    partition.remove(&key);
                    trace!("evicted {} from {} partition", key, regime.name());
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Running hit ratio since creation or the last `reset_stats`.
    /// Telemetry only, not a correctness signal.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            return 0.0;
        }
        self.hits.load(Ordering::Relaxed) as f64 / lookups as f64
    }

    pub fn reset_stats(&self) {
        self.lookups.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
    }
}

impl<V: Clone> Default for ContentCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_get() {
        let cache: ContentCache<String> = ContentCache::default();
        let fp = Fingerprint::of(b"hello");
        cache.put(fp, "value".to_string(), Regime::Exploration);
        assert_eq!(cache.get(&fp), Some("value".to_string()));
    }

    #[test]
    fn test_distinct_fingerprints_do_not_alias() {
        let cache: ContentCache<String> = ContentCache::default();
        let fp_a = Fingerprint::of(b"aaa");
        let fp_b = Fingerprint::of(b"bbb");
        assert_ne!(fp_a, fp_b);
        cache.put(fp_a, "a".to_string(), Regime::Stabilization);
        assert_eq!(cache.get(&fp_b), None);
    }

    #[test]
    fn test_lru_eviction_within_partition() {
        let config = CacheConfig {
            capacity_per_regime: 2,
            ..CacheConfig::default()
        };
        let cache: ContentCache<u32> = ContentCache::new(config);
        let fp1 = Fingerprint::of(b"1");
        let fp2 = Fingerprint::of(b"2");
        let fp3 = Fingerprint::of(b"3");

        cache.put(fp1, 1, Regime::Exploration);
        std::thread::sleep(Duration::from_millis(5));
        cache.put(fp2, 2, Regime::Exploration);
        std::thread::sleep(Duration::from_millis(5));
        // Touch fp1 so fp2 becomes least recently used
        assert_eq!(cache.get(&fp1), Some(1));
        std::thread::sleep(Duration::from_millis(5));
        cache.put(fp3, 3, Regime::Exploration);

        assert_eq!(cache.get(&fp2), None);
        assert_eq!(cache.get(&fp1), Some(1));
        assert_eq!(cache.get(&fp3), Some(3));
    }

    #[test]
    fn test_ttl_expiry() {
        let config = CacheConfig {
            exploration_ttl: Duration::from_millis(0),
            ..CacheConfig::default()
        };
        let cache: ContentCache<u32> = ContentCache::new(config);
        let fp = Fingerprint::of(b"stale");
        cache.put(fp, 9, Regime::Exploration);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&fp), None);
    }

    #[test]
    fn test_hit_rate() {
        let cache: ContentCache<u32> = ContentCache::default();
        let fp = Fingerprint::of(b"x");
        cache.put(fp, 1, Regime::Optimization);
        let _ = cache.get(&fp); // hit
        let _ = cache.get(&Fingerprint::of(b"missing")); // miss
        assert!((cache.hit_rate() - 0.5).abs() < 1e-9);
        cache.reset_stats();
        assert_eq!(cache.hit_rate(), 0.0);
    }
}
