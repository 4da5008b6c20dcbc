//! Tiered analytics cache
//!
//! Holds expensive derived analytics (zone analysis, configuration derivatives)
//! behind a single exclusive lock. Entries are classified hot/warm/cold from
//! their access frequency; eviction drains cold before warm before hot, oldest
//! first within a tier.

pub mod maintenance;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};

pub use maintenance::{CacheMaintenance, MemoryProbe, ProcStatmProbe};

/// Cold entries untouched for this long are eligible for scheduled trimming
const STALE_COLD_AGE_SECS: i64 = 3600;

/// Smoothing factor for the access time moving average
const ACCESS_TIME_ALPHA: f64 = 0.1;

/// Cache sizing, tiering and maintenance settings (`performance_optimization.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "crate::config::default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,
    /// Accesses per minute needed for the hot tier
    #[serde(default = "default_hot_threshold")]
    pub cache_hot_threshold: f64,
    /// Accesses per hour needed for the warm tier
    #[serde(default = "default_warm_threshold")]
    pub cache_warm_threshold: f64,
    /// Seconds between scheduled cleanups
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Cleanup interval once optimised for an active session
    #[serde(default = "default_session_cleanup_interval")]
    pub session_cleanup_interval: u64,
    /// Seconds between memory samples
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: u64,
    #[serde(default = "default_memory_high_mb")]
    pub memory_high_mb: f64,
    #[serde(default = "default_memory_critical_mb")]
    pub memory_critical_mb: f64,
}

fn default_max_cache_size() -> usize {
    1000
}

fn default_hot_threshold() -> f64 {
    10.0
}

fn default_warm_threshold() -> f64 {
    60.0
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_session_cleanup_interval() -> u64 {
    120
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_memory_high_mb() -> f64 {
    100.0
}

fn default_memory_critical_mb() -> f64 {
    200.0
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            max_cache_size: default_max_cache_size(),
            cache_hot_threshold: default_hot_threshold(),
            cache_warm_threshold: default_warm_threshold(),
            cleanup_interval: default_cleanup_interval(),
            session_cleanup_interval: default_session_cleanup_interval(),
            monitor_interval: default_monitor_interval(),
            memory_high_mb: default_memory_high_mb(),
            memory_critical_mb: default_memory_critical_mb(),
        }
    }
}

/// Eviction priority class of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Hot,
    Warm,
    Cold,
}

impl CacheTier {
    /// Order in which tiers give up entries under capacity pressure
    pub const EVICTION_ORDER: [CacheTier; 3] = [CacheTier::Cold, CacheTier::Warm, CacheTier::Hot];

    /// Initial tier guessed from the key name
    pub fn for_key(key: &str) -> Self {
        if key.contains("zone_analysis") {
            CacheTier::Warm
        } else if key.contains("position") || key.contains("balance") {
            CacheTier::Hot
        } else if key.contains("config") {
            CacheTier::Warm
        } else {
            CacheTier::Cold
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Hot => write!(f, "hot"),
            CacheTier::Warm => write!(f, "warm"),
            CacheTier::Cold => write!(f, "cold"),
        }
    }
}

/// Capacity share per tier, reported in stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
}

impl TierLimits {
    fn split(max: usize, hot_pct: usize, warm_pct: usize, cold_pct: usize) -> Self {
        Self {
            hot: max * hot_pct / 100,
            warm: max * warm_pct / 100,
            cold: max * cold_pct / 100,
        }
    }

    /// 30/50/20 split
    pub fn standard(max: usize) -> Self {
        Self::split(max, 30, 50, 20)
    }

    /// 50/40/10 split used during an active session
    pub fn session(max: usize) -> Self {
        Self::split(max, 50, 40, 10)
    }
}

/// Memory pressure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    /// Tie-breaker for entries touched within the same instant
    access_seq: u64,
    access_count: u64,
    size_bytes: usize,
    tier: CacheTier,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }

    fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.last_accessed, self.access_seq)
    }

    /// Recompute the tier from accesses per minute since creation
    fn retier(&mut self, now: DateTime<Utc>, hot_per_min: f64, warm_per_hour: f64) {
        let age_minutes = (now - self.created_at).num_seconds() as f64 / 60.0;
        let frequency = self.access_count as f64 / age_minutes.max(1.0);

        self.tier = if frequency >= hot_per_min {
            CacheTier::Hot
        } else if frequency >= warm_per_hour / 60.0 {
            CacheTier::Warm
        } else {
            CacheTier::Cold
        };
    }
}

#[derive(Debug, Default)]
struct CacheMetrics {
    hits: u64,
    misses: u64,
    errors: u64,
    avg_access_micros: f64,
    memory_usage_mb: Option<f64>,
    last_cleanup: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    seq: u64,
    metrics: CacheMetrics,
    tier_limits: TierLimits,
    cleanup_interval: Duration,
}

impl CacheInner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// True when `key` holds an unexpired entry; drops it and counts a miss otherwise
    fn take_live(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.metrics.misses += 1;
                return false;
            }
        };

        if expired {
            self.entries.remove(key);
            self.metrics.misses += 1;
            debug!(key, "Cache entry expired");
            return false;
        }
        true
    }

    /// Refresh recency and tier of a live entry
    fn touch(&mut self, key: &str, now: DateTime<Utc>, hot_per_min: f64, warm_per_hour: f64) {
        let seq = self.next_seq();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed = now;
            entry.access_seq = seq;
            entry.access_count += 1;
            entry.retier(now, hot_per_min, warm_per_hour);
        }
    }

    /// Remove the least recently accessed entry of the lowest non-empty tier
    fn evict_one(&mut self) -> Option<(String, CacheTier)> {
        for tier in CacheTier::EVICTION_ORDER {
            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| e.tier == tier)
                .min_by_key(|(_, e)| e.recency())
                .map(|(k, _)| k.clone());

            if let Some(key) = victim {
                self.entries.remove(&key);
                return Some((key, tier));
            }
        }
        None
    }

    /// Keys of cold entries matching `filter`, stalest first
    fn cold_keys_by_staleness(&self, filter: impl Fn(&CacheEntry) -> bool) -> Vec<String> {
        let mut cold: Vec<(&String, &CacheEntry)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.tier == CacheTier::Cold && filter(e))
            .collect();
        cold.sort_by_key(|(_, e)| e.recency());
        cold.into_iter().map(|(k, _)| k.clone()).collect()
    }

    fn record_access_time(&mut self, started: Instant) {
        let micros = started.elapsed().as_secs_f64() * 1_000_000.0;
        let avg = &mut self.metrics.avg_access_micros;
        *avg = ACCESS_TIME_ALPHA * micros + (1.0 - ACCESS_TIME_ALPHA) * *avg;
    }
}

/// Per-tier count and byte totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    pub entries: usize,
    pub bytes: usize,
}

/// Snapshot of cache state and counters
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups that hit
    pub hit_rate: f64,
    pub errors: u64,
    pub hot: TierUsage,
    pub warm: TierUsage,
    pub cold: TierUsage,
    pub tier_limits: TierLimits,
    pub avg_access_micros: f64,
    pub memory_usage_mb: Option<f64>,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub cleanup_interval_secs: u64,
}

/// Bounded key/value store with hot/warm/cold tiering
pub struct TieredCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
    clock: Arc<dyn Clock>,
}

impl TieredCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let inner = CacheInner {
            entries: HashMap::with_capacity(config.max_cache_size.min(4096)),
            seq: 0,
            metrics: CacheMetrics::default(),
            tier_limits: TierLimits::standard(config.max_cache_size),
            cleanup_interval: Duration::from_secs(config.cleanup_interval),
        };

        Self {
            config,
            inner: Mutex::new(inner),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enable_caching
    }

    /// Look up a value, refreshing its recency and tier on hit
    pub fn get(&self, key: &str) -> Option<Value> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut inner = self.lock();
        if !inner.take_live(key, now) {
            return None;
        }

        inner.touch(key, now, self.config.cache_hot_threshold, self.config.cache_warm_threshold);
        let value = inner.entries.get(key).map(|entry| entry.value.clone());
        inner.metrics.hits += 1;
        inner.record_access_time(started);
        value
    }

    /// Store a value with the tier guessed from its key
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> bool {
        self.set_with_tier(key, value, ttl, None)
    }

    /// Store a value, optionally forcing its initial tier
    ///
    /// Returns false when nothing was stored: caching is disabled or the
    /// capacity is zero.
    pub fn set_with_tier(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        tier: Option<CacheTier>,
    ) -> bool {
        if !self.stores_entries() {
            return false;
        }

        let now = self.clock.now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        let size_bytes = estimate_size(&value);
        let tier = tier.unwrap_or_else(|| CacheTier::for_key(key));

        let mut inner = self.lock();

        if !inner.entries.contains_key(key) {
            while inner.entries.len() >= self.config.max_cache_size {
                match inner.evict_one() {
                    Some((evicted, from)) => {
                        debug!(key = %evicted, tier = %from, "Evicted cache entry")
                    }
                    None => break,
                }
            }
        }

        let access_seq = inner.next_seq();
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                last_accessed: now,
                access_seq,
                access_count: 1,
                size_bytes,
                tier,
                expires_at,
            },
        );

        debug!(key, tier = %tier, size_bytes, "Cached entry");
        true
    }

    /// Typed lookup; an entry that no longer deserializes counts as a miss
    ///
    /// The lookup, decode and removal of a bad entry happen under one lock, so a
    /// concurrent `set` of a good value is never dropped.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut inner = self.lock();
        if !inner.take_live(key, now) {
            return None;
        }

        let decoded = inner
            .entries
            .get(key)
            .map(|entry| T::deserialize(&entry.value))?;
        match decoded {
            Ok(typed) => {
                inner.touch(key, now, self.config.cache_hot_threshold, self.config.cache_warm_threshold);
                inner.metrics.hits += 1;
                inner.record_access_time(started);
                Some(typed)
            }
            Err(e) => {
                warn!(key, error = %e, "Cached value has unexpected shape, dropping");
                inner.entries.remove(key);
                inner.metrics.misses += 1;
                inner.metrics.errors += 1;
                None
            }
        }
    }

    /// Typed store; fails when the cache is not storing entries
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let value = serde_json::to_value(value)?;
        if self.set(key, value, ttl) {
            Ok(())
        } else {
            Err(Error::Cache(format!("entry {} not stored, caching is off", key)))
        }
    }

    /// False when caching is disabled or has no capacity
    pub fn stores_entries(&self) -> bool {
        self.config.enable_caching && self.config.max_cache_size > 0
    }

    /// Return the cached value for `key` or compute, store and return it
    ///
    /// The flag is true when the value came from the cache. A value that cannot
    /// be stored is still returned.
    pub fn compute_or_cache<T, F>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(cached) = self.get_as::<T>(key) {
            return Ok((cached, true));
        }

        let value = compute()?;
        if !self.stores_entries() {
            return Ok((value, false));
        }
        if let Err(e) = self.set_as(key, &value, ttl) {
            warn!(key, error = %e, "Failed to cache computed value");
            self.lock().metrics.errors += 1;
        }
        Ok((value, false))
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.lock().entries.remove(key).is_some();
        if removed {
            debug!(key, "Invalidated cache entry");
        }
        removed
    }

    /// Remove every key containing `pattern`, returning how many were removed
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(pattern, removed, "Invalidated cache entries by pattern");
        }
        removed
    }

    /// Scheduled maintenance pass
    ///
    /// Drops expired entries, then up to a tenth (at least one) of the stale,
    /// single-access cold entries, oldest first.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let stale_before = now - chrono::Duration::seconds(STALE_COLD_AGE_SECS);
        let mut inner = self.lock();

        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        let mut removed = before - inner.entries.len();

        let stale = inner.cold_keys_by_staleness(|e| e.access_count <= 1 && e.last_accessed < stale_before);
        let limit = (stale.len() / 10).max(1);
        for key in stale.into_iter().take(limit) {
            inner.entries.remove(&key);
            removed += 1;
        }

        inner.metrics.last_cleanup = Some(now);
        drop(inner);

        if removed > 0 {
            info!(removed, "Cache cleanup removed entries");
        }
        removed
    }

    /// Remove the stalest half of the cold tier
    pub fn emergency_cleanup(&self) -> usize {
        let mut inner = self.lock();
        let cold = inner.cold_keys_by_staleness(|_| true);
        let count = cold.len() / 2;
        for key in cold.into_iter().take(count) {
            inner.entries.remove(&key);
        }
        drop(inner);

        warn!(removed = count, "Emergency cleanup removed cold entries");
        count
    }

    /// Record a memory sample and react to pressure
    pub fn check_memory(&self, usage_mb: f64) -> MemoryPressure {
        self.lock().metrics.memory_usage_mb = Some(usage_mb);

        if usage_mb > self.config.memory_critical_mb {
            warn!(
                usage_mb,
                critical_mb = self.config.memory_critical_mb,
                "Critical memory usage"
            );
            self.emergency_cleanup();
            MemoryPressure::Critical
        } else if usage_mb > self.config.memory_high_mb {
            warn!(usage_mb, high_mb = self.config.memory_high_mb, "High memory usage");
            MemoryPressure::High
        } else {
            MemoryPressure::Normal
        }
    }

    /// Shift tier capacity toward hot data and clean up more often
    pub fn optimize_for_session(&self) {
        let mut inner = self.lock();
        inner.tier_limits = TierLimits::session(self.config.max_cache_size);
        inner.cleanup_interval = Duration::from_secs(self.config.session_cleanup_interval);
        info!(
            cleanup_interval_secs = self.config.session_cleanup_interval,
            "Cache optimised for trading session"
        );
    }

    /// Current interval between scheduled cleanups
    pub fn cleanup_interval(&self) -> Duration {
        self.lock().cleanup_interval
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.config.monitor_interval)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Final cleanup pass, then drop everything
    pub fn shutdown(&self) {
        info!("Shutting down tiered cache");
        self.cleanup();
        self.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();

        let mut hot = TierUsage::default();
        let mut warm = TierUsage::default();
        let mut cold = TierUsage::default();
        for entry in inner.entries.values() {
            let usage = match entry.tier {
                CacheTier::Hot => &mut hot,
                CacheTier::Warm => &mut warm,
                CacheTier::Cold => &mut cold,
            };
            usage.entries += 1;
            usage.bytes += entry.size_bytes;
        }

        let m = &inner.metrics;
        let lookups = m.hits + m.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            m.hits as f64 / lookups as f64 * 100.0
        };

        CacheStats {
            entries: inner.entries.len(),
            total_bytes: hot.bytes + warm.bytes + cold.bytes,
            hits: m.hits,
            misses: m.misses,
            hit_rate,
            errors: m.errors,
            hot,
            warm,
            cold,
            tier_limits: inner.tier_limits,
            avg_access_micros: m.avg_access_micros,
            memory_usage_mb: m.memory_usage_mb,
            last_cleanup: m.last_cleanup,
            cleanup_interval_secs: inner.cleanup_interval.as_secs(),
        }
    }

    #[cfg(test)]
    fn tier_of(&self, key: &str) -> Option<CacheTier> {
        self.lock().entries.get(key).map(|e| e.tier)
    }
}

/// Serialized JSON length as a size estimate
fn estimate_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

impl fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}
