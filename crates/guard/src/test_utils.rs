//! Shared test utilities.
//!
//! Provides a `TestStateBuilder` for constructing `GuardState` instances with
//! only the mocks each test actually needs, plus hand-written cache doubles
//! for exercising the cache-aside helpers end to end.
//!
//! ## Usage
//!
//! ```ignore
//! let mut limiter = MockRateLimiter::new();
//! limiter.expect_consume().returning(|_, _, _, _, _| { ... });
//!
//! let state = TestStateBuilder::new()
//!     .with_rate_limiter(limiter)
//!     .build();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::config::GuardConfig;
use crate::state::GuardState;
use crate::stores::{
    CacheStore, MockCacheStore, MockConversationMemory, MockRateLimiter, MockUsageStore, Stores,
};

/// Creates a test configuration with dummy values.
pub fn test_config() -> GuardConfig {
    GuardConfig {
        redis_url: "redis://test".to_string(),
        rate_limit_tokens_per_minute: 30.0,
        rate_limit_bucket_size: 60.0,
        rate_limit_idle_ttl_secs: 3600,
        admission_fail_open: true,
        usage_utc_offset_secs: 19800,
        usage_counter_ttl_secs: 172_800,
        memory_max_items: 12,
        memory_ttl_secs: 604_800,
        search_cache_ttl_secs: 86_400,
        search_max_snippets: 6,
        search_max_snippet_chars: 360,
        markets_cache_ttl_secs: 60,
        market_stock_symbols: "RELIANCE.BSE,TCS.BSE".to_string(),
        market_crypto_ids: "bitcoin,ethereum".to_string(),
        market_vs_currency: "inr".to_string(),
        serper_api_key: None,
        alpha_vantage_api_key: None,
        store_timeout_ms: 2000,
        upstream_timeout_ms: 4000,
    }
}

/// In-memory CacheStore backed by a HashMap. TTLs are accepted and ignored;
/// expiry-sensitive behavior is driven through the helpers' inputs instead.
#[derive(Default)]
pub struct FakeCache {
    entries: Mutex<HashMap<String, String>>,
}

impl FakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl CacheStore for FakeCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// CacheStore whose every operation fails, for store-outage paths.
pub struct UnreachableCache;

#[async_trait]
impl CacheStore for UnreachableCache {
    async fn get_raw(&self, _key: &str) -> Result<Option<String>> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn set_raw(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

/// Builder for constructing test `GuardState` with custom mocks.
///
/// Uses default (empty) mocks for any store not explicitly set, so tests only
/// configure what they exercise.
pub struct TestStateBuilder {
    rate_limiter: Option<MockRateLimiter>,
    usage: Option<MockUsageStore>,
    cache: Option<MockCacheStore>,
    memory: Option<MockConversationMemory>,
    config: GuardConfig,
}

impl TestStateBuilder {
    pub fn new() -> Self {
        Self {
            rate_limiter: None,
            usage: None,
            cache: None,
            memory: None,
            config: test_config(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: MockRateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    #[allow(dead_code)]
    pub fn with_usage(mut self, usage: MockUsageStore) -> Self {
        self.usage = Some(usage);
        self
    }

    #[allow(dead_code)]
    pub fn with_cache(mut self, cache: MockCacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    #[allow(dead_code)]
    pub fn with_memory(mut self, memory: MockConversationMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the `GuardState` using configured mocks or defaults.
    pub fn build(self) -> GuardState {
        let stores = Stores {
            rate_limiter: Arc::new(self.rate_limiter.unwrap_or_else(MockRateLimiter::new)),
            usage: Arc::new(self.usage.unwrap_or_else(MockUsageStore::new)),
            cache: Arc::new(self.cache.unwrap_or_else(MockCacheStore::new)),
            memory: Arc::new(self.memory.unwrap_or_else(MockConversationMemory::new)),
        };

        GuardState {
            config: self.config,
            stores,
        }
    }
}

impl Default for TestStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
