//! Short-lived response cache in front of the aggregation engine.
//!
//! Entries expire a fixed time after insertion regardless of how often they
//! are read. Expired entries are already invisible to `get`; a background
//! sweep additionally evicts them on a fraction of the TTL.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::{Config, model::AggregationResult};

pub const DEFAULT_TTL: Duration = Duration::from_secs(1800);
pub const DEFAULT_CHECK_PERIOD_RATIO: f64 = 0.2;

const MIN_CHECK_PERIOD: Duration = Duration::from_millis(1);

/// A stored aggregation result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Arc<AggregationResult>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub keys: Vec<String>,
    pub hits: u64,
    pub misses: u64,
    #[serde(rename = "hitRate")]
    pub hit_rate: f64,
}

/// Concurrent key → aggregation result map with TTL expiry and hit accounting.
///
/// Writes are last-write-wins. Concurrent misses on one key are not coalesced.
pub struct ResponseCache {
    cache: Cache<String, CacheEntry>,
    ttl: Duration,
    check_period: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.cache.entry_count())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_check_period_ratio(ttl, DEFAULT_CHECK_PERIOD_RATIO)
    }

    pub fn with_check_period_ratio(ttl: Duration, ratio: f64) -> Self {
        let ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            DEFAULT_CHECK_PERIOD_RATIO
        };

        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
            ttl,
            check_period: ttl.mul_f64(ratio).max(MIN_CHECK_PERIOD),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_check_period_ratio(config.cache_ttl(), config.cache.check_period_ratio)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Interval between background expiry sweeps.
    pub fn check_period(&self) -> Duration {
        self.check_period
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache miss");
                None
            }
        }
    }

    /// Store `result` under `key` with the cache-wide TTL.
    #[instrument(skip(self, result), level = "debug")]
    pub async fn put(&self, key: &str, result: Arc<AggregationResult>) -> CacheEntry {
        let entry = CacheEntry {
            result,
            created_at: Utc::now(),
            ttl: self.ttl,
        };
        self.cache.insert(key.to_string(), entry.clone()).await;
        debug!(key = %key, "Cache set");
        entry
    }

    /// Remove one entry, or every entry when `key` is `None`.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                info!(key = %key, "Invalidating cache entry");
                self.cache.invalidate(key).await;
            }
            None => {
                info!("Flushing entire cache");
                self.cache.invalidate_all();
            }
        }
        self.cache.run_pending_tasks().await;
    }

    /// Evict whatever has expired.
    pub async fn sweep(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub async fn stats(&self) -> CacheStats {
        self.sweep().await;

        let mut keys: Vec<String> = self.cache.iter().map(|(k, _)| (*k).clone()).collect();
        keys.sort();

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        CacheStats {
            keys,
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
        }
    }

    /// Run [`sweep`](Self::sweep) every check period until the cache is dropped.
    pub fn spawn_sweeper(cache: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(cache);
        let period = cache.check_period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    debug!("Cache dropped, stopping sweeper");
                    break;
                };
                cache.sweep().await;
            }
        })
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    hits as f64 / (hits + misses).max(1) as f64
}

/// Request signature: path plus the query string exactly as received.
pub fn cache_key(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CurrentAggregate, Location, Observation};

    fn result(temp: f64) -> Arc<AggregationResult> {
        Arc::new(AggregationResult::Current(CurrentAggregate {
            location: Location::at(1.0, 2.0),
            timestamp: Utc::now(),
            sources: Vec::new(),
            aggregated: Observation {
                temp: Some(temp),
                ..Observation::default()
            },
            failures: Vec::new(),
        }))
    }

    #[tokio::test]
    async fn put_then_get_returns_the_same_result() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let stored = result(21.0);

        cache.put("/api/weather/current?lat=1&lon=2", stored.clone()).await;
        let entry = cache.get("/api/weather/current?lat=1&lon=2").await.unwrap();

        assert_eq!(entry.result, stored);
        assert_eq!(entry.ttl, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = ResponseCache::new(Duration::from_millis(100));
        cache.put("k", result(1.0)).await;

        assert!(cache.get("k").await.is_some());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn reads_do_not_extend_lifetime() {
        let cache = ResponseCache::new(Duration::from_millis(200));
        cache.put("k", result(1.0)).await;

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            cache.get("k").await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_one_key() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put("a", result(1.0)).await;
        cache.put("b", result(2.0)).await;

        cache.invalidate(Some("a")).await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_without_key_clears_everything() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put("a", result(1.0)).await;
        cache.put("b", result(2.0)).await;

        cache.invalidate(None).await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_none());
        assert!(cache.stats().await.keys.is_empty());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put("k", result(1.0)).await;
        cache.put("k", result(2.0)).await;

        let entry = cache.get("k").await.unwrap();
        match entry.result.as_ref() {
            AggregationResult::Current(current) => assert_eq!(current.aggregated.temp, Some(2.0)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hit_rate_is_defined_without_traffic() {
        let cache = ResponseCache::default();
        let stats = cache.stats().await;

        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn stats_count_hits_and_misses() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put("k", result(1.0)).await;

        for _ in 0..3 {
            cache.get("k").await;
        }
        cache.get("missing").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.75);
        assert_eq!(stats.keys, vec!["k".to_string()]);
    }

    #[test]
    fn check_period_is_a_fraction_of_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(1800));
        assert_eq!(cache.check_period(), Duration::from_secs(360));

        let cache = ResponseCache::with_check_period_ratio(Duration::from_secs(10), -1.0);
        assert_eq!(cache.check_period(), Duration::from_secs(2));

        let cache = ResponseCache::new(Duration::ZERO);
        assert_eq!(cache.check_period(), MIN_CHECK_PERIOD);
    }

    #[tokio::test]
    async fn sweeper_stops_when_cache_is_dropped() {
        let cache = Arc::new(ResponseCache::new(Duration::from_millis(20)));
        let handle = ResponseCache::spawn_sweeper(&cache);

        drop(cache);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper should exit")
            .unwrap();
    }

    #[test]
    fn cache_key_preserves_query_order() {
        assert_eq!(
            cache_key("/api/weather/current", Some("lon=2&lat=1")),
            "/api/weather/current?lon=2&lat=1"
        );
        assert_eq!(cache_key("/api/weather/cache/stats", None), "/api/weather/cache/stats");
        assert_eq!(cache_key("/x", Some("")), "/x");
    }
}
