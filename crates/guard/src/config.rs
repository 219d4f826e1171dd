use std::time::Duration;

use serde::{Deserialize, Serialize};

/// All tunables for the protection layer. Loaded once at startup and passed
/// into each component's constructor; nothing reads ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    pub redis_url: String,
    /// Tokens added back to each bucket per minute of elapsed time.
    #[serde(default = "default_refill_rate")]
    pub rate_limit_tokens_per_minute: f64,
    #[serde(default = "default_bucket_size")]
    pub rate_limit_bucket_size: f64,
    /// Idle window after which a dormant bucket expires and resets to full.
    #[serde(default = "default_rate_limit_idle_ttl")]
    pub rate_limit_idle_ttl_secs: u64,
    /// Allow requests (and log) when Redis is unreachable during admission.
    /// Flip off for deployments that prefer strictness over availability.
    #[serde(default = "default_fail_open")]
    pub admission_fail_open: bool,
    /// Offset from UTC for usage day boundaries. Default is IST (+05:30);
    /// never derived from the host timezone.
    #[serde(default = "default_usage_offset")]
    pub usage_utc_offset_secs: i32,
    /// Counters only matter for the day they track; the TTL just drains dead
    /// keys after rollover.
    #[serde(default = "default_usage_counter_ttl")]
    pub usage_counter_ttl_secs: u64,
    #[serde(default = "default_memory_max_items")]
    pub memory_max_items: usize,
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_secs: u64,
    #[serde(default = "default_search_ttl")]
    pub search_cache_ttl_secs: u64,
    #[serde(default = "default_search_max_snippets")]
    pub search_max_snippets: usize,
    #[serde(default = "default_search_max_snippet_chars")]
    pub search_max_snippet_chars: usize,
    #[serde(default = "default_markets_ttl")]
    pub markets_cache_ttl_secs: u64,
    #[serde(default = "default_stock_symbols")]
    pub market_stock_symbols: String,
    #[serde(default = "default_crypto_ids")]
    pub market_crypto_ids: String,
    #[serde(default = "default_vs_currency")]
    pub market_vs_currency: String,
    #[serde(default)]
    pub serper_api_key: Option<String>,
    #[serde(default)]
    pub alpha_vantage_api_key: Option<String>,
    /// Upper bound for any single Redis operation.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Upper bound for any single upstream HTTP call.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
}

impl GuardConfig {
    /// Load from `DOST_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("DOST_").from_env()
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Configured stock symbols, upper-cased.
    pub fn stock_symbols(&self) -> Vec<String> {
        parse_list(&self.market_stock_symbols)
            .into_iter()
            .map(|symbol| symbol.to_uppercase())
            .collect()
    }

    pub fn crypto_ids(&self) -> Vec<String> {
        parse_list(&self.market_crypto_ids)
    }
}

/// Split a comma-separated config value, dropping blanks.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_refill_rate() -> f64 {
    30.0
}

fn default_bucket_size() -> f64 {
    60.0
}

fn default_rate_limit_idle_ttl() -> u64 {
    3600
}

fn default_fail_open() -> bool {
    true
}

fn default_usage_offset() -> i32 {
    5 * 3600 + 1800
}

fn default_usage_counter_ttl() -> u64 {
    60 * 60 * 48
}

fn default_memory_max_items() -> usize {
    12
}

fn default_memory_ttl() -> u64 {
    60 * 60 * 24 * 7
}

fn default_search_ttl() -> u64 {
    86_400
}

fn default_search_max_snippets() -> usize {
    6
}

fn default_search_max_snippet_chars() -> usize {
    360
}

fn default_markets_ttl() -> u64 {
    60
}

fn default_stock_symbols() -> String {
    "RELIANCE.BSE,TCS.BSE,INFY.BSE,HDFCBANK.BSE".to_string()
}

fn default_crypto_ids() -> String {
    "bitcoin,ethereum,solana".to_string()
}

fn default_vs_currency() -> String {
    "inr".to_string()
}

fn default_store_timeout_ms() -> u64 {
    2000
}

fn default_upstream_timeout_ms() -> u64 {
    4000
}
