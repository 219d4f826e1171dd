//! Cache-aside storage for Redis.
//!
//! Payload-agnostic: this module manages keys, TTLs and fallback policy and
//! leaves the payload shape to the caller. Absence is never an error, only a
//! miss; a payload that fails to deserialize (corruption, schema drift) is
//! treated exactly like a miss; a store outage degrades reads to misses and
//! makes writes no-ops. Concurrent misses on one key may both compute - the
//! later write wins and both callers hold a fresh value.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

/// Raw TTL-bounded key-value access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stored payload for a key, `None` on miss.
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Write a payload with expiry.
    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
}

/// Redis implementation of CacheStore.
#[derive(Clone)]
pub struct RedisCacheStore {
    client: redis::Client,
    timeout: Duration,
}

impl RedisCacheStore {
    pub fn new(client: redis::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let value: Option<String> = conn.get(key).await?;
            anyhow::Ok(value)
        };

        tokio::time::timeout(self.timeout, op)
            .await
            .context("cache read timed out")?
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let _: () = conn.set_ex(key, value, ttl_secs).await?;
            anyhow::Ok(())
        };

        tokio::time::timeout(self.timeout, op)
            .await
            .context("cache write timed out")?
    }
}

/// Read and deserialize a cached value. A store failure or an unparseable
/// payload degrades to a miss, never an error.
pub async fn get_json<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Option<T> {
    let raw = match store.get_raw(key).await {
        Ok(raw) => raw?,
        Err(err) => {
            tracing::warn!(key = %key, "cache read failed, treating as miss: {:?}", err);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key = %key, "malformed cache payload, treating as miss: {}", err);
            None
        }
    }
}

/// Serialize and write a cached value. Write failures are logged and
/// swallowed; the caller still holds the computed value.
pub async fn set_json<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T, ttl_secs: u64) {
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(key = %key, "unserializable cache payload: {}", err);
            return;
        }
    };

    if let Err(err) = store.set_raw(key, &payload, ttl_secs).await {
        tracing::warn!(key = %key, "cache write failed: {:?}", err);
    }
}

/// Cache-aside: return the cached value or compute, store and return a fresh
/// one. No single-flight: redundant concurrent computes are accepted.
pub async fn get_or_compute<T, F, Fut>(
    store: &dyn CacheStore,
    key: &str,
    ttl_secs: u64,
    compute: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(hit) = get_json(store, key).await {
        return Ok(hit);
    }

    let fresh = compute().await?;
    set_json(store, key, &fresh, ttl_secs).await;
    Ok(fresh)
}

/// Payloads that can report whether a refresh produced any usable data.
pub trait Freshness {
    fn has_data(&self) -> bool;
}

/// Refresh a volatile feed, preferring stale data over fresh emptiness.
///
/// The cached value is pre-read unconditionally (not a TTL check). If the
/// recompute fails or comes back with no usable rows while a cached value
/// exists, the cached value is served and the entry is left untouched.
/// With nothing to fall back to, an empty result is persisted as-is and a
/// compute error propagates.
pub async fn refresh_with_fallback<T, F, Fut>(
    store: &dyn CacheStore,
    key: &str,
    ttl_secs: u64,
    compute: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned + Freshness,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let stale: Option<T> = get_json(store, key).await;

    let fresh = match compute().await {
        Ok(fresh) => fresh,
        Err(err) => {
            return match stale {
                Some(stale) => {
                    tracing::warn!(key = %key, "refresh failed, serving stale value: {:?}", err);
                    Ok(stale)
                }
                None => Err(err),
            };
        }
    };

    if !fresh.has_data() {
        if let Some(stale) = stale {
            tracing::warn!(key = %key, "refresh returned no data, keeping cached value");
            return Ok(stale);
        }
    }

    set_json(store, key, &fresh, ttl_secs).await;
    Ok(fresh)
}

/// Key namespaces shared with the background worker and any other reader of
/// the same store. Formats must stay stable across deployments.
pub mod keys {
    use super::{Digest, Sha256};

    pub fn search(query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.to_lowercase().as_bytes());
        format!("search:{:x}", hasher.finalize())
    }

    pub fn stocks(symbols: &[String]) -> String {
        format!("markets:stocks:{}", symbols.join(","))
    }

    pub fn crypto(vs_currency: &str, ids: &[String]) -> String {
        format!("markets:crypto:{}:{}", vs_currency, ids.join(","))
    }

    /// `None` addresses the current brief, `Some(n)` a pinned version.
    pub fn match_brief(match_id: &str, version: Option<u32>) -> String {
        match version {
            Some(version) => format!("match:brief:{}:v{}", match_id, version),
            None => format!("match:brief:{}:current", match_id),
        }
    }

    pub fn match_recap(match_id: &str) -> String {
        format!("match:recap:{}:current", match_id)
    }

    pub fn teer_summary(house: &str, window_days: u32) -> String {
        format!("teer:summary:{}:{}", house, window_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeCache, UnreachableCache};
    use std::sync::atomic::{AtomicUsize, Ordering};

    impl Freshness for Vec<Option<i32>> {
        fn has_data(&self) -> bool {
            self.iter().any(Option::is_some)
        }
    }

    #[tokio::test]
    async fn get_or_compute_computes_at_most_once_within_ttl() {
        let cache = FakeCache::new();
        let calls = AtomicUsize::new(0);
        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Some(7)])
        };

        let first: Vec<Option<i32>> = get_or_compute(&cache, "k", 60, compute).await.unwrap();
        let second: Vec<Option<i32>> = get_or_compute(&cache, "k", 60, compute).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_miss_and_gets_overwritten() {
        let cache = FakeCache::new();
        cache.seed("k", "{not json");

        let value: Vec<Option<i32>> = get_or_compute(&cache, "k", 60, || async {
            Ok(vec![Some(1)])
        })
        .await
        .unwrap();

        assert_eq!(value, vec![Some(1)]);
        assert_eq!(cache.raw("k").unwrap(), "[1]");
    }

    #[tokio::test]
    async fn store_outage_degrades_to_compute() {
        let cache = UnreachableCache;

        let value: Vec<Option<i32>> = get_or_compute(&cache, "k", 60, || async {
            Ok(vec![Some(2)])
        })
        .await
        .unwrap();

        // Read failed -> miss; write failed -> swallowed. The caller still
        // gets the computed value.
        assert_eq!(value, vec![Some(2)]);
    }

    #[tokio::test]
    async fn compute_error_propagates_on_cold_cache() {
        let cache = FakeCache::new();

        let result: Result<Vec<Option<i32>>> =
            get_or_compute(&cache, "k", 60, || async { Err(anyhow::anyhow!("upstream down")) })
                .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn refresh_keeps_stale_value_over_empty_result() {
        let cache = FakeCache::new();
        cache.seed("k", "[3]");

        let value: Vec<Option<i32>> = refresh_with_fallback(&cache, "k", 60, || async {
            Ok(vec![None, None])
        })
        .await
        .unwrap();

        assert_eq!(value, vec![Some(3)]);
        assert_eq!(cache.raw("k").unwrap(), "[3]");
    }

    #[tokio::test]
    async fn refresh_persists_empty_result_when_nothing_cached() {
        let cache = FakeCache::new();

        let value: Vec<Option<i32>> = refresh_with_fallback(&cache, "k", 60, || async {
            Ok(vec![None])
        })
        .await
        .unwrap();

        assert_eq!(value, vec![None]);
        assert_eq!(cache.raw("k").unwrap(), "[null]");
    }

    #[tokio::test]
    async fn refresh_serves_stale_value_when_compute_fails() {
        let cache = FakeCache::new();
        cache.seed("k", "[5]");

        let value: Vec<Option<i32>> = refresh_with_fallback(&cache, "k", 60, || async {
            Err(anyhow::anyhow!("rate limited upstream"))
        })
        .await
        .unwrap();

        assert_eq!(value, vec![Some(5)]);
    }

    #[tokio::test]
    async fn refresh_overwrites_with_fresh_data() {
        let cache = FakeCache::new();
        cache.seed("k", "[1]");

        let value: Vec<Option<i32>> = refresh_with_fallback(&cache, "k", 60, || async {
            Ok(vec![Some(9)])
        })
        .await
        .unwrap();

        assert_eq!(value, vec![Some(9)]);
        assert_eq!(cache.raw("k").unwrap(), "[9]");
    }

    #[test]
    fn search_keys_are_case_insensitive_and_hashed() {
        let a = keys::search("Chennai vs Mumbai head to head");
        let b = keys::search("chennai VS mumbai head to head");

        assert_eq!(a, b);
        assert!(a.starts_with("search:"));
        // sha256 hex digest
        assert_eq!(a.len(), "search:".len() + 64);
    }

    #[test]
    fn market_and_entity_keys_match_shared_namespaces() {
        let symbols = vec!["TCS.BSE".to_string(), "INFY.BSE".to_string()];
        assert_eq!(keys::stocks(&symbols), "markets:stocks:TCS.BSE,INFY.BSE");

        let ids = vec!["bitcoin".to_string(), "solana".to_string()];
        assert_eq!(keys::crypto("inr", &ids), "markets:crypto:inr:bitcoin,solana");

        assert_eq!(keys::match_brief("m-9", None), "match:brief:m-9:current");
        assert_eq!(keys::match_brief("m-9", Some(3)), "match:brief:m-9:v3");
        assert_eq!(keys::match_recap("m-9"), "match:recap:m-9:current");
        assert_eq!(keys::teer_summary("shillong", 30), "teer:summary:shillong:30");
    }
}
