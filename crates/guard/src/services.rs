//! Metered upstream services behind the cache.
//!
//! Each upstream provider is abstracted behind a trait so handlers and tests
//! can swap implementations, and every call into one of them is shielded by
//! the cache-aside layer - an upstream that errors or rate-limits degrades
//! the content of a response, never the response itself.
//!
//! ## Services
//!
//! - **markets** - crypto/stock quote feeds with cached snapshots and
//!   stale-on-failure refresh
//! - **search** - web-search snippets for prompt context, cached by query
//!   hash

pub mod markets;
pub mod search;

pub use markets::{
    CryptoQuote, HttpMarketDataProvider, MarketDataProvider, MarketSnapshotService, StockQuote,
};
pub use search::{CachedSnippetSearch, SerperSearch, SnippetSearch};

#[cfg(test)]
pub use markets::MockMarketDataProvider;
#[cfg(test)]
pub use search::MockSnippetSearch;
