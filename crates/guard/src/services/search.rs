//! Web-search snippets behind the cache.
//!
//! Snippets feed prompt context for sports queries; every query is metered
//! upstream, so results are cached under a hash of the query text. A failed
//! or rate-limited search degrades to no snippets, never a failed request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::stores::cache::{self, CacheStore, keys};

/// Provider of short search-result snippets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnippetSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<String>>;
}

/// Serper-backed search.
pub struct SerperSearch {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_snippets: usize,
    max_snippet_chars: usize,
}

impl SerperSearch {
    pub fn new(
        api_key: String,
        max_snippets: usize,
        max_snippet_chars: usize,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: "https://google.serper.dev".to_string(),
            api_key,
            max_snippets,
            max_snippet_chars,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// One line per organic result: "title - snippet - link", skipping absent
/// fields, bounded in count and per-snippet length.
fn shape_snippets(payload: &Value, max_snippets: usize, max_snippet_chars: usize) -> Vec<String> {
    let Some(organic) = payload["organic"].as_array() else {
        return Vec::new();
    };

    organic
        .iter()
        .filter_map(|item| {
            let parts: Vec<&str> = ["title", "snippet", "link"]
                .iter()
                .filter_map(|field| item[*field].as_str())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" - "))
            }
        })
        .map(|snippet| snippet.chars().take(max_snippet_chars).collect())
        .take(max_snippets)
        .collect()
}

#[async_trait]
impl SnippetSearch for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query }))
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "serper returned an error");
            return Ok(Vec::new());
        }

        let payload: Value = response.json().await?;
        Ok(shape_snippets(
            &payload,
            self.max_snippets,
            self.max_snippet_chars,
        ))
    }
}

/// Cache-aside wrapper around any snippet provider.
pub struct CachedSnippetSearch {
    inner: Arc<dyn SnippetSearch>,
    cache: Arc<dyn CacheStore>,
    ttl_secs: u64,
}

impl CachedSnippetSearch {
    pub fn new(inner: Arc<dyn SnippetSearch>, cache: Arc<dyn CacheStore>, ttl_secs: u64) -> Self {
        Self {
            inner,
            cache,
            ttl_secs,
        }
    }
}

#[async_trait]
impl SnippetSearch for CachedSnippetSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>> {
        let key = keys::search(query);
        cache::get_or_compute(self.cache.as_ref(), &key, self.ttl_secs, || async {
            self.inner.search(query).await
        })
        .await
    }
}
