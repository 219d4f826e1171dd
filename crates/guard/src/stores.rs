//! Ephemeral coordination stores (Redis).
//!
//! Every piece of cross-request state in the protection layer lives in Redis
//! under a TTL; nothing here is a record of truth. Correctness must hold when
//! many request-handling processes read and write the same keys with no
//! in-process locks: the token bucket serializes through a server-side Lua
//! script, the usage counter relies on Redis' atomic increment, and the cache
//! and conversation memory accept last-write-wins.
//!
//! ## Stores
//!
//! - **rate_limit** - token-bucket admission control per identity
//! - **usage** - per-user daily message counters (IST day boundaries)
//! - **cache** - cache-aside payloads with stale-on-failure fallback
//! - **memory** - bounded per-topic conversation context
//!
//! ## Redis Key Patterns
//!
//! ```text
//! rate:{identity}                       → token bucket hash (tokens, last)
//! usage:{user_id}:{YYYYMMDD}            → daily usage hash (count, last)
//! memory:{user_id}:{topic}              → JSON array of recent exchanges
//! search:{sha256(query)}                → JSON array of snippets
//! markets:stocks:{symbols}              → JSON stock snapshot
//! markets:crypto:{vs}:{ids}             → JSON crypto snapshot
//! match:brief:{match_id}:current|v{n}   → JSON match brief (worker-written)
//! match:recap:{match_id}:current        → JSON match recap (worker-written)
//! teer:summary:{house}:{days}           → JSON teer summary (worker-written)
//! ```
//!
//! ## Usage in Handlers
//!
//! Stores are accessed via `state.stores`:
//!
//! ```ignore
//! async fn handler(State(state): State<GuardState>) -> Result<impl IntoResponse, GuardError> {
//!     let usage = state.stores.usage.get(&user_id).await?;
//!     check_daily_quota(&tier.limits(), &usage)?;
//!     // ... perform the metered call ...
//!     state.stores.usage.increment(&user_id).await?;
//! }
//! ```

pub mod cache;
pub mod memory;
pub mod rate_limit;
pub mod usage;

pub use cache::{CacheStore, Freshness, RedisCacheStore};
pub use memory::{ConversationMemory, RedisConversationMemory};
pub use rate_limit::{MemoryRateLimiter, RateLimitDecision, RateLimiter, RedisRateLimiter};
pub use usage::{RedisUsageStore, UsageSnapshot, UsageStore};

#[cfg(test)]
pub use cache::MockCacheStore;
#[cfg(test)]
pub use memory::MockConversationMemory;
#[cfg(test)]
pub use rate_limit::MockRateLimiter;
#[cfg(test)]
pub use usage::MockUsageStore;

use std::sync::Arc;

use anyhow::Result;

use crate::config::GuardConfig;

/// Collection of all ephemeral stores.
#[derive(Clone)]
pub struct Stores {
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub usage: Arc<dyn UsageStore>,
    pub cache: Arc<dyn CacheStore>,
    pub memory: Arc<dyn ConversationMemory>,
}

impl Stores {
    /// Build all Redis-backed stores over one client.
    pub fn connect(config: &GuardConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let timeout = config.store_timeout();

        Ok(Self {
            rate_limiter: Arc::new(RedisRateLimiter::new(client.clone(), timeout)),
            usage: Arc::new(RedisUsageStore::new(
                client.clone(),
                config.usage_utc_offset_secs,
                config.usage_counter_ttl_secs,
                timeout,
            )),
            cache: Arc::new(RedisCacheStore::new(client.clone(), timeout)),
            memory: Arc::new(RedisConversationMemory::new(client, timeout)),
        })
    }
}
