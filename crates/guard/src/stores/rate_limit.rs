//! Token-bucket admission control for Redis.
//!
//! The refill-and-decrement must execute as one atomic unit: two concurrent
//! requests for the same identity must never both decrement from the same
//! pre-update snapshot. The Redis implementation runs the whole step as a
//! server-side Lua script; the in-memory implementation serializes through a
//! mutex and exists for tests and Redis-less development.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole tokens left in the bucket after this call.
    pub remaining: i64,
}

/// Limiter deciding whether one unit of work may proceed right now.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Refill `subject`'s bucket up to `now_epoch_secs`, then try to take one
    /// token. Every call resets the key's idle TTL; a bucket that sees no
    /// traffic for `idle_ttl_secs` expires and returns to full.
    async fn consume(
        &self,
        subject: &str,
        now_epoch_secs: i64,
        refill_rate_per_minute: f64,
        bucket_capacity: f64,
        idle_ttl_secs: u64,
    ) -> Result<RateLimitDecision>;
}

/// Atomic refill-and-decrement. Elapsed time clamps at zero so clock skew
/// never produces negative refill; the stored token count stays fractional,
/// only the reply is floored.
const CONSUME_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local bucket_size = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local data = redis.call('HMGET', key, 'tokens', 'last')
local tokens = tonumber(data[1])
local last = tonumber(data[2])

if tokens == nil then
  tokens = bucket_size
  last = now
else
  local delta = math.max(0, now - last)
  tokens = math.min(bucket_size, tokens + (delta / 60) * refill_rate)
  last = now
end

local allowed = 0
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
end

redis.call('HSET', key, 'tokens', tokens, 'last', last)
redis.call('EXPIRE', key, ttl)
return { allowed, math.floor(tokens) }
"#;

fn rate_key(subject: &str) -> String {
    format!("rate:{}", subject)
}

/// Redis implementation of RateLimiter.
#[derive(Clone)]
pub struct RedisRateLimiter {
    client: redis::Client,
    timeout: Duration,
}

impl RedisRateLimiter {
    pub fn new(client: redis::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn consume(
        &self,
        subject: &str,
        now_epoch_secs: i64,
        refill_rate_per_minute: f64,
        bucket_capacity: f64,
        idle_ttl_secs: u64,
    ) -> Result<RateLimitDecision> {
        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let (allowed, remaining): (i64, i64) = redis::Script::new(CONSUME_SCRIPT)
                .key(rate_key(subject))
                .arg(now_epoch_secs)
                .arg(refill_rate_per_minute)
                .arg(bucket_capacity)
                .arg(idle_ttl_secs)
                .invoke_async(&mut conn)
                .await?;

            anyhow::Ok(RateLimitDecision {
                allowed: allowed == 1,
                remaining,
            })
        };

        tokio::time::timeout(self.timeout, op)
            .await
            .context("rate limit check timed out")?
    }
}

/// In-process implementation of the same algorithm, for tests and for running
/// without Redis. The mutex stands in for the script's atomicity; idle-TTL
/// expiry is evaluated against the caller-supplied clock.
#[derive(Default)]
pub struct MemoryRateLimiter {
    buckets: Mutex<HashMap<String, MemoryBucket>>,
}

struct MemoryBucket {
    tokens: f64,
    last_refill: i64,
    expires_at: i64,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn consume(
        &self,
        subject: &str,
        now_epoch_secs: i64,
        refill_rate_per_minute: f64,
        bucket_capacity: f64,
        idle_ttl_secs: u64,
    ) -> Result<RateLimitDecision> {
        let mut buckets = self.buckets.lock().unwrap();
        let key = rate_key(subject);

        let expired = buckets
            .get(&key)
            .is_none_or(|bucket| now_epoch_secs >= bucket.expires_at);
        if expired {
            buckets.insert(
                key.clone(),
                MemoryBucket {
                    tokens: bucket_capacity,
                    last_refill: now_epoch_secs,
                    expires_at: now_epoch_secs,
                },
            );
        }

        let bucket = buckets.get_mut(&key).expect("bucket just ensured");
        let elapsed = (now_epoch_secs - bucket.last_refill).max(0) as f64;
        bucket.tokens = (bucket.tokens + elapsed / 60.0 * refill_rate_per_minute).min(bucket_capacity);
        bucket.last_refill = now_epoch_secs;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        bucket.expires_at = now_epoch_secs + idle_ttl_secs as i64;

        Ok(RateLimitDecision {
            allowed,
            remaining: bucket.tokens.floor() as i64,
        })
    }
}
