//! Bounded conversation memory for Redis.
//!
//! A rolling window of recent exchange summaries per (user, topic), used as
//! an advisory context hint for prompt assembly. Concurrent appends are
//! last-write-wins and a corrupt stored value reads as empty - the
//! authoritative chat log lives in the relational store, not here.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Append entries, keep only the newest `cap`, refresh the TTL.
    async fn append(
        &self,
        user_id: &str,
        topic: &str,
        entries: &[String],
        cap: usize,
        ttl_secs: u64,
    ) -> Result<()>;

    /// Recent entries, oldest first. Empty if absent or unreadable.
    async fn read(&self, user_id: &str, topic: &str) -> Result<Vec<String>>;
}

fn memory_key(user_id: &str, topic: &str) -> String {
    format!("memory:{}:{}", user_id, topic)
}

/// Keep the newest `cap` entries, preserving relative order.
fn merge_entries(existing: Vec<String>, entries: &[String], cap: usize) -> Vec<String> {
    let mut merged = existing;
    merged.extend_from_slice(entries);

    let overflow = merged.len().saturating_sub(cap);
    merged.split_off(overflow)
}

fn parse_entries(raw: Option<String>, key: &str) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(key = %key, "corrupt conversation memory, starting fresh: {}", err);
            Vec::new()
        }
    }
}

/// Redis implementation of ConversationMemory.
#[derive(Clone)]
pub struct RedisConversationMemory {
    client: redis::Client,
    timeout: Duration,
}

impl RedisConversationMemory {
    pub fn new(client: redis::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ConversationMemory for RedisConversationMemory {
    async fn append(
        &self,
        user_id: &str,
        topic: &str,
        entries: &[String],
        cap: usize,
        ttl_secs: u64,
    ) -> Result<()> {
        let key = memory_key(user_id, topic);

        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let raw: Option<String> = conn.get(&key).await?;
            let merged = merge_entries(parse_entries(raw, &key), entries, cap);

            let _: () = conn
                .set_ex(&key, serde_json::to_string(&merged)?, ttl_secs)
                .await?;
            anyhow::Ok(())
        };

        tokio::time::timeout(self.timeout, op)
            .await
            .context("memory append timed out")?
    }

    async fn read(&self, user_id: &str, topic: &str) -> Result<Vec<String>> {
        let key = memory_key(user_id, topic);

        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let raw: Option<String> = conn.get(&key).await?;
            anyhow::Ok(parse_entries(raw, &key))
        };

        tokio::time::timeout(self.timeout, op)
            .await
            .context("memory read timed out")?
    }
}
