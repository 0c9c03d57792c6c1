//! Type-partitioned TTL cache for computed forecasts.
//!
//! - Keys hash `(type, target, serialized historical slice)` with blake3, so
//!   identical inputs always land on the same entry.
//! - Expiry is lazy: an expired entry is evicted when read and counts as a miss.
//! - A `max_entries` cap evicts the least-recently-written entry.
//! - Hit/miss/eviction counters are observability only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use foresight_core::{PredictionType, SharedClock};

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry cap; the least-recently-written entry goes first.
    pub max_entries: usize,
    /// Time-to-live per prediction type.
    pub ttls: BTreeMap<PredictionType, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut ttls = BTreeMap::new();
        ttls.insert(PredictionType::Failure, Duration::from_secs(30 * 60));
        ttls.insert(PredictionType::Load, Duration::from_secs(15 * 60));
        ttls.insert(PredictionType::Behavior, Duration::from_secs(60 * 60));
        ttls.insert(PredictionType::Trend, Duration::from_secs(120 * 60));
        Self {
            max_entries: 1_000,
            ttls,
        }
    }
}

impl CacheConfig {
    /// Fallback TTL for a type missing from `ttls`.
    const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

    pub fn ttl_for(&self, ptype: PredictionType) -> Duration {
        self.ttls.get(&ptype).copied().unwrap_or(Self::DEFAULT_TTL)
    }

    pub fn with_ttl(mut self, ptype: PredictionType, ttl: Duration) -> Self {
        self.ttls.insert(ptype, ttl);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache key input could not be serialized: {0}")]
    Serialize(String),
}

/// Identity of one cached forecast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub ptype: PredictionType,
    pub target: String,
    /// blake3 hex digest over type, target and the serialized input.
    pub input_hash: String,
}

impl CacheKey {
    pub fn derive<T: Serialize>(
        ptype: PredictionType,
        target: &str,
        input: &T,
    ) -> Result<Self, CacheError> {
        let bytes = serde_json::to_vec(input).map_err(|e| CacheError::Serialize(e.to_string()))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(ptype.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(target.as_bytes());
        hasher.update(&[0]);
        hasher.update(&bytes);
        Ok(Self {
            ptype,
            target: target.to_string(),
            input_hash: hasher.finalize().to_hex().to_string(),
        })
    }

    /// `type:target:hash`, the form used in logs and published keys.
    pub fn composite(&self) -> String {
        format!("{}:{}:{}", self.ptype, self.target, self.input_hash)
    }
}

impl core::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.composite())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
    /// Monotonic write sequence for least-recently-written eviction.
    written_seq: u64,
    size_bytes: usize,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// 0.0–1.0.
    pub hit_rate: f64,
    /// Approximate bytes held (serialized values plus keys).
    pub memory_estimate: usize,
}

/// TTL cache of forecasts partitioned by prediction type.
#[derive(Debug)]
pub struct PredictionCache<V> {
    config: CacheConfig,
    clock: SharedClock,
    entries: Mutex<HashMap<CacheKey, CacheEntry<V>>>,
    write_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    destroyed: AtomicBool,
}

impl<V> PredictionCache<V>
where
    V: Clone + Serialize,
{
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            entries: Mutex::new(HashMap::new()),
            write_seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a fresh entry. Expired entries are evicted here and count as misses.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache entry expired");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value`, replacing any entry under the same key wholesale.
    pub fn set(&self, key: CacheKey, value: V) {
        if self.destroyed.load(Ordering::Acquire) {
            debug!(key = %key, "cache destroyed; dropping write");
            return;
        }
        let now = self.clock.now();
        let ttl = TimeDelta::from_std(self.config.ttl_for(key.ptype))
            .unwrap_or_else(|_| TimeDelta::days(3650));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let size_bytes = serde_json::to_vec(&value).map(|b| b.len()).unwrap_or(0)
            + key.target.len()
            + key.input_hash.len();
        let written_seq = self.write_seq.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries.max(1) {
            self.make_room(&mut entries, now);
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                written_seq,
                size_bytes,
            },
        );
    }

    /// Remove entries; returns how many were removed.
    ///
    /// - `(None, None)`: everything
    /// - `(Some(t), None)`: every entry of type `t`
    /// - `(_, Some(key))`: that exact key (if `ptype` is given it must match)
    pub fn invalidate(&self, ptype: Option<PredictionType>, key: Option<&CacheKey>) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let removed = match (ptype, key) {
            (_, Some(key)) => {
                if ptype.is_some_and(|t| t != key.ptype) {
                    0
                } else {
                    usize::from(entries.remove(key).is_some())
                }
            }
            (Some(t), None) => {
                let before = entries.len();
                entries.retain(|k, _| k.ptype != t);
                before - entries.len()
            }
            (None, None) => {
                let n = entries.len();
                entries.clear();
                n
            }
        };
        if removed > 0 {
            debug!(ptype = ?ptype, removed, "cache invalidated");
        }
        removed
    }

    /// Evict every expired entry now. Returns how many were evicted.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        let purged = before - entries.len();
        self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: entries.len(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            memory_estimate: entries.values().map(|e| e.size_bytes).sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries and refuse further writes. Returns how many entries were dropped.
    pub fn destroy(&self) -> usize {
        self.destroyed.store(true, Ordering::Release);
        self.invalidate(None, None)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn make_room(&self, entries: &mut HashMap<CacheKey, CacheEntry<V>>, now: DateTime<Utc>) {
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        let mut evicted = before - entries.len();

        if entries.len() >= self.config.max_entries.max(1) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.written_seq)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use foresight_core::ManualClock;
    use proptest::prelude::*;

    fn cache_with(clock: Arc<ManualClock>, config: CacheConfig) -> PredictionCache<String> {
        PredictionCache::new(config, clock)
    }

    fn key(ptype: PredictionType, target: &str, input: &[u32]) -> CacheKey {
        CacheKey::derive(ptype, target, &input).unwrap()
    }

    #[test]
    fn identical_inputs_share_a_key() {
        let a = key(PredictionType::Load, "api", &[1, 2, 3]);
        let b = key(PredictionType::Load, "api", &[1, 2, 3]);
        let c = key(PredictionType::Load, "api", &[1, 2, 4]);
        let d = key(PredictionType::Trend, "api", &[1, 2, 3]);
        assert_eq!(a, b);
        assert_ne!(a.input_hash, c.input_hash);
        assert_ne!(a.input_hash, d.input_hash);
    }

    #[test]
    fn get_after_set_hits() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = cache_with(clock, CacheConfig::default());
        let k = key(PredictionType::Failure, "db", &[1]);

        cache.set(k.clone(), "forecast".to_string());
        assert_eq!(cache.get(&k).as_deref(), Some("forecast"));
    }

    #[test]
    fn load_entries_expire_after_fifteen_minutes() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = cache_with(clock.clone(), CacheConfig::default());
        assert_eq!(
            cache.config().ttl_for(PredictionType::Load),
            Duration::from_millis(900_000)
        );
        let k = key(PredictionType::Load, "api", &[7]);

        cache.set(k.clone(), "v".to_string());
        clock.advance_ms(899_999);
        assert!(cache.get(&k).is_some());

        clock.advance_ms(2); // t = 900_001
        assert!(cache.get(&k).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn purge_sweeps_only_expired_entries() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = cache_with(clock.clone(), CacheConfig::default());
        let load = key(PredictionType::Load, "api", &[1]);
        let trend = key(PredictionType::Trend, "revenue", &[1]);
        cache.set(load.clone(), "load".into());
        cache.set(trend.clone(), "trend".into());

        assert_eq!(cache.purge_expired(), 0);
        clock.advance_ms(900_000);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&trend).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn set_overwrites_and_restarts_ttl() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = cache_with(clock.clone(), CacheConfig::default());
        let k = key(PredictionType::Load, "api", &[1]);

        cache.set(k.clone(), "old".to_string());
        clock.advance_ms(800_000);
        cache.set(k.clone(), "new".to_string());
        clock.advance_ms(800_000);
        assert_eq!(cache.get(&k).as_deref(), Some("new"));
    }

    #[test]
    fn invalidate_by_exact_key_and_globally() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = cache_with(clock, CacheConfig::default());
        let a = key(PredictionType::Load, "api", &[1]);
        let b = key(PredictionType::Load, "web", &[1]);
        cache.set(a.clone(), "a".into());
        cache.set(b.clone(), "b".into());

        assert_eq!(cache.invalidate(Some(PredictionType::Trend), Some(&a)), 0);
        assert_eq!(cache.invalidate(None, Some(&a)), 1);
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());

        assert_eq!(cache.invalidate(None, None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn cap_evicts_least_recently_written() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = cache_with(clock, CacheConfig::default().with_max_entries(2));
        let a = key(PredictionType::Load, "a", &[1]);
        let b = key(PredictionType::Load, "b", &[1]);
        let c = key(PredictionType::Load, "c", &[1]);

        cache.set(a.clone(), "a".into());
        cache.set(b.clone(), "b".into());
        // rewriting `a` makes `b` the oldest write
        cache.set(a.clone(), "a2".into());
        cache.set(c.clone(), "c".into());

        assert!(cache.get(&b).is_none());
        assert_eq!(cache.get(&a).as_deref(), Some("a2"));
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn stats_report_hit_rate_and_memory() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = cache_with(clock, CacheConfig::default());
        let k = key(PredictionType::Behavior, "users", &[1]);
        cache.set(k.clone(), "payload".into());
        cache.get(&k);
        cache.get(&key(PredictionType::Behavior, "users", &[2]));

        let stats = cache.stats();
        assert_eq!(stats.hit_rate, 0.5);
        assert!(stats.memory_estimate > "payload".len());
    }

    #[test]
    fn destroyed_cache_rejects_writes() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = cache_with(clock, CacheConfig::default());
        let k = key(PredictionType::Trend, "revenue", &[1]);
        cache.set(k.clone(), "x".into());

        assert_eq!(cache.destroy(), 1);
        cache.set(k.clone(), "y".into());
        assert!(cache.get(&k).is_none());
    }

    fn ptype_strategy() -> impl Strategy<Value = PredictionType> {
        prop::sample::select(PredictionType::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: invalidating one type removes exactly that type's entries.
        #[test]
        fn invalidate_type_touches_only_that_type(
            writes in prop::collection::vec((ptype_strategy(), 0u32..20), 1..40),
            victim in ptype_strategy(),
        ) {
            let clock = Arc::new(ManualClock::at_epoch());
            let cache = cache_with(clock, CacheConfig::default());
            let mut keys = std::collections::HashSet::new();
            for (ptype, n) in &writes {
                let k = key(*ptype, "t", &[*n]);
                cache.set(k.clone(), n.to_string());
                keys.insert(k);
            }

            let expected = keys.iter().filter(|k| k.ptype == victim).count();
            prop_assert_eq!(cache.invalidate(Some(victim), None), expected);

            for k in &keys {
                prop_assert_eq!(cache.get(k).is_some(), k.ptype != victim);
            }
        }
    }
}
