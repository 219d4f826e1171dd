//! Daily usage counters for Redis.
//!
//! One hash per user per calendar day in the configured reference timezone
//! (IST by default, never the host timezone - quota windows must not shift
//! with deployment region). The increment is a single HINCRBY so concurrent
//! handlers never lose counts; day rollover is handled by the key changing,
//! not by deletion. An error from either call fails only the metered
//! operation that asked, nothing else.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

/// Usage recorded for one user on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub message_count: i64,
    /// `YYYYMMDD` in the reference timezone.
    pub date_key: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Today's usage for a user; zero if the user has not messaged today.
    async fn get(&self, user_id: &str) -> Result<UsageSnapshot>;

    /// Record one accepted chat turn. Call only after the metered operation
    /// succeeded; the caller owns not double-counting a single turn.
    async fn increment(&self, user_id: &str) -> Result<UsageSnapshot>;
}

/// Reference-timezone offset from seconds east of UTC.
///
/// Panics when the offset is outside +/-24h; validate configuration at
/// startup, not per request.
pub fn reference_offset(utc_offset_secs: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_secs).expect("UTC offset out of range")
}

/// `YYYYMMDD` for `now` shifted into the reference timezone.
pub fn date_key_for(now: DateTime<Utc>, offset: FixedOffset) -> String {
    now.with_timezone(&offset).format("%Y%m%d").to_string()
}

fn usage_key(user_id: &str, date_key: &str) -> String {
    format!("usage:{}:{}", user_id, date_key)
}

/// Redis implementation of UsageStore.
#[derive(Clone)]
pub struct RedisUsageStore {
    client: redis::Client,
    offset: FixedOffset,
    counter_ttl_secs: u64,
    timeout: Duration,
}

impl RedisUsageStore {
    pub fn new(
        client: redis::Client,
        utc_offset_secs: i32,
        counter_ttl_secs: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            offset: reference_offset(utc_offset_secs),
            counter_ttl_secs,
            timeout,
        }
    }
}

#[async_trait]
impl UsageStore for RedisUsageStore {
    async fn get(&self, user_id: &str) -> Result<UsageSnapshot> {
        let date_key = date_key_for(Utc::now(), self.offset);
        let key = usage_key(user_id, &date_key);

        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let (count, last): (Option<i64>, Option<i64>) = redis::cmd("HMGET")
                .arg(&key)
                .arg("count")
                .arg("last")
                .query_async(&mut conn)
                .await?;

            anyhow::Ok(UsageSnapshot {
                message_count: count.unwrap_or(0),
                date_key: date_key.clone(),
                last_message_at: last.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            })
        };

        tokio::time::timeout(self.timeout, op)
            .await
            .context("usage read timed out")?
    }

    async fn increment(&self, user_id: &str) -> Result<UsageSnapshot> {
        let now = Utc::now();
        let date_key = date_key_for(now, self.offset);
        let key = usage_key(user_id, &date_key);

        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let count: i64 = conn.hincr(&key, "count", 1).await?;
            let _: () = conn.hset(&key, "last", now.timestamp()).await?;
            let _: () = conn.expire(&key, self.counter_ttl_secs as i64).await?;

            anyhow::Ok(UsageSnapshot {
                message_count: count,
                date_key: date_key.clone(),
                last_message_at: Some(now),
            })
        };

        tokio::time::timeout(self.timeout, op)
            .await
            .context("usage increment timed out")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const IST_SECS: i32 = 5 * 3600 + 1800;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn date_key_rolls_over_at_ist_midnight_not_utc() {
        let ist = reference_offset(IST_SECS);

        // 18:20 UTC is 23:50 IST - still the same IST day.
        assert_eq!(date_key_for(at(2026, 6, 1, 18, 20), ist), "20260601");
        // 18:40 UTC is 00:10 IST the next day.
        assert_eq!(date_key_for(at(2026, 6, 1, 18, 40), ist), "20260602");
    }

    #[test]
    fn date_key_pads_month_and_day() {
        let ist = reference_offset(IST_SECS);

        assert_eq!(date_key_for(at(2026, 1, 5, 12, 0), ist), "20260105");
    }

    #[test]
    fn westward_offsets_roll_back_instead() {
        let pacific = reference_offset(-7 * 3600);

        // 03:00 UTC is still the previous day at UTC-7.
        assert_eq!(date_key_for(at(2026, 6, 2, 3, 0), pacific), "20260601");
    }

    #[test]
    fn usage_key_scopes_by_user_and_day() {
        assert_eq!(usage_key("u-1", "20260807"), "usage:u-1:20260807");
    }
}
