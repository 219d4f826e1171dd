//! Market snapshots: metered quote feeds behind the cache.
//!
//! Quotes come from CoinGecko (crypto) and Alpha Vantage (stocks). Both
//! intermittently rate-limit or error per symbol, so a batch may come back
//! partially unavailable - a failed row never aborts the others - and the
//! refresh path prefers slightly stale real data over fresh emptiness.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GuardConfig;
use crate::stores::cache::{self, CacheStore, Freshness, keys};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoQuote {
    pub id: String,
    pub price: Option<f64>,
    pub change_24h: Option<f64>,
}

/// Alpha Vantage returns prices as decimal strings; they are passed through
/// untouched rather than re-parsed and re-rounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuote {
    pub symbol: String,
    pub price: Option<String>,
    pub change: Option<String>,
    pub change_percent: Option<String>,
}

impl Freshness for Vec<CryptoQuote> {
    fn has_data(&self) -> bool {
        self.iter().any(|row| row.price.is_some())
    }
}

impl Freshness for Vec<StockQuote> {
    fn has_data(&self) -> bool {
        self.iter().any(|row| row.price.is_some())
    }
}

/// Upstream quote feeds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Spot prices for CoinGecko ids in `vs_currency`. Ids missing from the
    /// response come back as unavailable rows.
    async fn crypto_quotes(&self, ids: &[String], vs_currency: &str) -> Result<Vec<CryptoQuote>>;

    /// One global quote per symbol. A failed symbol yields an unavailable
    /// row without aborting the batch.
    async fn stock_quotes(&self, symbols: &[String]) -> Result<Vec<StockQuote>>;
}

/// HTTP implementation of MarketDataProvider.
pub struct HttpMarketDataProvider {
    http: reqwest::Client,
    coingecko_base: String,
    alpha_vantage_base: String,
    alpha_vantage_api_key: Option<String>,
}

impl HttpMarketDataProvider {
    pub fn new(alpha_vantage_api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            coingecko_base: "https://api.coingecko.com/api/v3".to_string(),
            alpha_vantage_base: "https://www.alphavantage.co".to_string(),
            alpha_vantage_api_key,
        })
    }

    /// Point both upstreams somewhere else (tests, proxies).
    pub fn with_base_urls(
        mut self,
        coingecko_base: impl Into<String>,
        alpha_vantage_base: impl Into<String>,
    ) -> Self {
        self.coingecko_base = coingecko_base.into();
        self.alpha_vantage_base = alpha_vantage_base.into();
        self
    }

    async fn stock_quote(&self, url: &str, api_key: &str, symbol: &str) -> StockQuote {
        let unavailable = StockQuote {
            symbol: symbol.to_string(),
            price: None,
            change: None,
            change_percent: None,
        };

        let response = match self
            .http
            .get(url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", api_key),
            ])
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(symbol = %symbol, status = %response.status(), "alpha vantage returned an error");
                return unavailable;
            }
            Err(err) => {
                tracing::warn!(symbol = %symbol, "alpha vantage request failed: {}", err);
                return unavailable;
            }
        };

        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(symbol = %symbol, "alpha vantage payload unreadable: {}", err);
                return unavailable;
            }
        };

        let quote = &payload["Global Quote"];
        StockQuote {
            symbol: symbol.to_string(),
            price: quote["05. price"].as_str().map(str::to_string),
            change: quote["09. change"].as_str().map(str::to_string),
            change_percent: quote["10. change percent"].as_str().map(str::to_string),
        }
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketDataProvider {
    async fn crypto_quotes(&self, ids: &[String], vs_currency: &str) -> Result<Vec<CryptoQuote>> {
        let response = self
            .http
            .get(format!("{}/simple/price", self.coingecko_base))
            .query(&[
                ("ids", ids.join(",")),
                ("vs_currencies", vs_currency.to_string()),
                ("include_24hr_change", "true".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "coingecko returned an error");
            return Ok(Vec::new());
        }

        let payload: Value = response.json().await?;
        let change_field = format!("{}_24h_change", vs_currency);

        Ok(ids
            .iter()
            .map(|id| {
                let entry = &payload[id.as_str()];
                CryptoQuote {
                    id: id.clone(),
                    price: entry[vs_currency].as_f64(),
                    change_24h: entry[change_field.as_str()].as_f64(),
                }
            })
            .collect())
    }

    async fn stock_quotes(&self, symbols: &[String]) -> Result<Vec<StockQuote>> {
        // Without a key there is nothing to call; the caller sees no rows.
        let Some(api_key) = self.alpha_vantage_api_key.as_deref() else {
            return Ok(Vec::new());
        };

        let url = format!("{}/query", self.alpha_vantage_base);
        let mut results = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            results.push(self.stock_quote(&url, api_key, symbol).await);
        }
        Ok(results)
    }
}

/// Cached snapshot reads plus the worker-style stock refresh.
pub struct MarketSnapshotService {
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<dyn CacheStore>,
    crypto_ids: Vec<String>,
    stock_symbols: Vec<String>,
    vs_currency: String,
    cache_ttl_secs: u64,
}

impl MarketSnapshotService {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        cache: Arc<dyn CacheStore>,
        config: &GuardConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            crypto_ids: config.crypto_ids(),
            stock_symbols: config.stock_symbols(),
            vs_currency: config.market_vs_currency.clone(),
            cache_ttl_secs: config.markets_cache_ttl_secs,
        }
    }

    /// Cache-aside crypto snapshot. An upstream failure degrades to an
    /// empty, uncached batch.
    pub async fn crypto_snapshot(&self) -> Vec<CryptoQuote> {
        let key = keys::crypto(&self.vs_currency, &self.crypto_ids);
        if let Some(cached) = cache::get_json(self.cache.as_ref(), &key).await {
            return cached;
        }

        match self
            .provider
            .crypto_quotes(&self.crypto_ids, &self.vs_currency)
            .await
        {
            Ok(rows) => {
                cache::set_json(self.cache.as_ref(), &key, &rows, self.cache_ttl_secs).await;
                rows
            }
            Err(err) => {
                tracing::warn!("crypto snapshot fetch failed: {:?}", err);
                Vec::new()
            }
        }
    }

    /// Cache-aside stock snapshot.
    pub async fn stock_snapshot(&self) -> Vec<StockQuote> {
        let key = keys::stocks(&self.stock_symbols);
        if let Some(cached) = cache::get_json(self.cache.as_ref(), &key).await {
            return cached;
        }

        match self.provider.stock_quotes(&self.stock_symbols).await {
            Ok(rows) => {
                cache::set_json(self.cache.as_ref(), &key, &rows, self.cache_ttl_secs).await;
                rows
            }
            Err(err) => {
                tracing::warn!("stock snapshot fetch failed: {:?}", err);
                Vec::new()
            }
        }
    }

    /// Refresh path (scheduled caller): recompute stocks but never overwrite
    /// good cached rows with an all-empty batch.
    pub async fn refresh_stock_snapshot(&self) -> Result<Vec<StockQuote>> {
        let key = keys::stocks(&self.stock_symbols);
        cache::refresh_with_fallback(self.cache.as_ref(), &key, self.cache_ttl_secs, || async {
            self.provider.stock_quotes(&self.stock_symbols).await
        })
        .await
    }

    /// Text block for the prompt-assembly layer; empty when neither feed has
    /// rows.
    pub async fn markets_context(&self) -> String {
        let (crypto, stocks) = tokio::join!(self.crypto_snapshot(), self.stock_snapshot());

        let mut lines = Vec::new();
        if !crypto.is_empty() {
            lines.push(format!("Crypto ({}):", self.vs_currency.to_uppercase()));
            for row in &crypto {
                lines.push(format!(
                    "{}: ₹{} ({}% 24h)",
                    row.id.to_uppercase(),
                    row.price.map_or_else(|| "—".to_string(), |p| p.to_string()),
                    row.change_24h.map_or_else(|| "—".to_string(), |c| c.to_string()),
                ));
            }
        }
        if !stocks.is_empty() {
            lines.push("Stocks (India):".to_string());
            for row in &stocks {
                lines.push(format!(
                    "{}: {} ({})",
                    row.symbol,
                    row.price.as_deref().unwrap_or("—"),
                    row.change_percent.as_deref().unwrap_or("—"),
                ));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeCache, test_config};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(
        provider: MockMarketDataProvider,
        cache: Arc<FakeCache>,
    ) -> MarketSnapshotService {
        MarketSnapshotService::new(Arc::new(provider), cache, &test_config())
    }

    fn crypto_row(id: &str, price: Option<f64>) -> CryptoQuote {
        CryptoQuote {
            id: id.to_string(),
            price,
            change_24h: price.map(|_| 1.5),
        }
    }

    #[test]
    fn freshness_requires_at_least_one_priced_row() {
        let empty: Vec<CryptoQuote> = Vec::new();
        assert!(!empty.has_data());
        assert!(!vec![crypto_row("bitcoin", None)].has_data());
        assert!(vec![crypto_row("bitcoin", None), crypto_row("ethereum", Some(1.0))].has_data());
    }

    #[tokio::test]
    async fn crypto_snapshot_serves_cached_rows_without_calling_upstream() {
        let cache = Arc::new(FakeCache::new());
        let rows = vec![crypto_row("bitcoin", Some(5_000_000.0)), crypto_row("ethereum", Some(250_000.0))];
        cache.seed(
            "markets:crypto:inr:bitcoin,ethereum",
            &serde_json::to_string(&rows).unwrap(),
        );

        // No expectations: any provider call panics the test.
        let service = service(MockMarketDataProvider::new(), cache);

        assert_eq!(service.crypto_snapshot().await, rows);
    }

    #[tokio::test]
    async fn crypto_snapshot_caches_computed_rows() {
        let cache = Arc::new(FakeCache::new());
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_crypto_quotes()
            .times(1)
            .returning(|ids, _| Ok(ids.iter().map(|id| crypto_row(id, Some(10.0))).collect()));

        let service = service(provider, cache.clone());

        let rows = service.crypto_snapshot().await;
        assert_eq!(rows.len(), 2);
        assert!(cache.raw("markets:crypto:inr:bitcoin,ethereum").is_some());

        // Second read is a hit; the mock's times(1) would fail otherwise.
        assert_eq!(service.crypto_snapshot().await, rows);
    }

    #[tokio::test]
    async fn provider_error_degrades_to_empty_uncached_batch() {
        let cache = Arc::new(FakeCache::new());
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_stock_quotes()
            .returning(|_| Err(anyhow::anyhow!("dns failure")));

        let service = service(provider, cache.clone());

        assert!(service.stock_snapshot().await.is_empty());
        assert!(cache.raw("markets:stocks:RELIANCE.BSE,TCS.BSE").is_none());
    }

    #[tokio::test]
    async fn refresh_does_not_clobber_cache_with_all_unavailable_rows() {
        let cache = Arc::new(FakeCache::new());
        let good = vec![StockQuote {
            symbol: "TCS.BSE".to_string(),
            price: Some("4100.00".to_string()),
            change: Some("-12.00".to_string()),
            change_percent: Some("-0.29%".to_string()),
        }];
        cache.seed(
            "markets:stocks:RELIANCE.BSE,TCS.BSE",
            &serde_json::to_string(&good).unwrap(),
        );

        let mut provider = MockMarketDataProvider::new();
        provider.expect_stock_quotes().returning(|symbols| {
            Ok(symbols
                .iter()
                .map(|symbol| StockQuote {
                    symbol: symbol.clone(),
                    price: None,
                    change: None,
                    change_percent: None,
                })
                .collect())
        });

        let service = service(provider, cache.clone());

        assert_eq!(service.refresh_stock_snapshot().await.unwrap(), good);
        assert_eq!(
            cache.raw("markets:stocks:RELIANCE.BSE,TCS.BSE").unwrap(),
            serde_json::to_string(&good).unwrap()
        );
    }

    #[tokio::test]
    async fn markets_context_renders_rows_and_placeholders() {
        let cache = Arc::new(FakeCache::new());
        let mut provider = MockMarketDataProvider::new();
        provider.expect_crypto_quotes().returning(|_, _| {
            Ok(vec![
                crypto_row("bitcoin", Some(5_000_000.0)),
                crypto_row("ethereum", None),
            ])
        });
        provider.expect_stock_quotes().returning(|_| {
            Ok(vec![StockQuote {
                symbol: "TCS.BSE".to_string(),
                price: Some("4100.00".to_string()),
                change: None,
                change_percent: None,
            }])
        });

        let context = service(provider, cache).markets_context().await;

        assert!(context.starts_with("Crypto (INR):"));
        assert!(context.contains("BITCOIN: ₹5000000 (1.5% 24h)"));
        assert!(context.contains("ETHEREUM: ₹— (—% 24h)"));
        assert!(context.contains("Stocks (India):"));
        assert!(context.contains("TCS.BSE: 4100.00 (—)"));
    }

    #[tokio::test]
    async fn markets_context_is_empty_when_both_feeds_are_empty() {
        let cache = Arc::new(FakeCache::new());
        let mut provider = MockMarketDataProvider::new();
        provider.expect_crypto_quotes().returning(|_, _| Ok(Vec::new()));
        provider.expect_stock_quotes().returning(|_| Ok(Vec::new()));

        assert_eq!(service(provider, cache).markets_context().await, "");
    }

    #[tokio::test]
    async fn http_crypto_quotes_map_rows_and_missing_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bitcoin": { "inr": 5000000.5, "inr_24h_change": -1.2 }
            })))
            .mount(&server)
            .await;

        let provider = HttpMarketDataProvider::new(None, Duration::from_secs(2))
            .unwrap()
            .with_base_urls(server.uri(), server.uri());

        let rows = provider
            .crypto_quotes(&["bitcoin".to_string(), "ethereum".to_string()], "inr")
            .await
            .unwrap();

        assert_eq!(rows[0].price, Some(5_000_000.5));
        assert_eq!(rows[0].change_24h, Some(-1.2));
        assert_eq!(rows[1], crypto_row("ethereum", None));
    }

    #[tokio::test]
    async fn http_crypto_quotes_treat_upstream_errors_as_no_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = HttpMarketDataProvider::new(None, Duration::from_secs(2))
            .unwrap()
            .with_base_urls(server.uri(), server.uri());

        let rows = provider
            .crypto_quotes(&["bitcoin".to_string()], "inr")
            .await
            .unwrap();

        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn http_stock_quotes_keep_partial_results_on_per_symbol_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("symbol", "TCS.BSE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Global Quote": {
                    "05. price": "4100.0000",
                    "09. change": "-12.0000",
                    "10. change percent": "-0.2917%"
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("symbol", "INFY.BSE"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider =
            HttpMarketDataProvider::new(Some("test-key".to_string()), Duration::from_secs(2))
                .unwrap()
                .with_base_urls(server.uri(), server.uri());

        let rows = provider
            .stock_quotes(&["TCS.BSE".to_string(), "INFY.BSE".to_string()])
            .await
            .unwrap();

        assert_eq!(rows[0].price.as_deref(), Some("4100.0000"));
        assert_eq!(rows[0].change_percent.as_deref(), Some("-0.2917%"));
        assert_eq!(rows[1].price, None);
    }

    #[tokio::test]
    async fn http_stock_quotes_without_api_key_return_no_rows() {
        let provider = HttpMarketDataProvider::new(None, Duration::from_secs(2)).unwrap();

        let rows = provider.stock_quotes(&["TCS.BSE".to_string()]).await.unwrap();

        assert!(rows.is_empty());
    }
}
