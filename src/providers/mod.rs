//! Typed adapters over external collaborators
//!
//! Each HTTP adapter owns a pooled client and its own rate-limit token
//! bucket. In-crate stubs keep the pipeline exercisable without credentials.

pub mod filings;
pub mod market;
pub mod rate_limit;
pub mod search;

pub use filings::{Filing, FilingsProvider, HttpFilings, StubFilings};
pub use market::{HttpMarketData, MarketDataProvider, StatementPeriod, StubMarketData};
pub use rate_limit::TokenBucket;
pub use search::{HttpSearch, SearchHit, StubSearch, WebSearchProvider};
