//! Web search adapter (used by the external-validator agent)

use crate::error::DiligenceError;
use crate::providers::rate_limit::TokenBucket;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

pub struct HttpSearch {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: TokenBucket,
}

impl HttpSearch {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            bucket: TokenBucket::new("web_search", 3.0, 1.0),
        }
    }
}

#[async_trait]
impl WebSearchProvider for HttpSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.bucket.acquire(Duration::from_secs(20)).await?;

        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| DiligenceError::ProviderError(format!("search request failed: {}", e)))?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            DiligenceError::ProviderError(format!("invalid search response: {}", e))
        })?;

        if !status.is_success() {
            return Err(DiligenceError::ProviderError(format!(
                "search provider returned {}: {}",
                status, body
            )));
        }

        Ok(body
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| serde_json::from_value(r.clone()).ok())
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub struct StubSearch;

#[async_trait]
impl WebSearchProvider for StubSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        Ok(vec![SearchHit {
            title: format!("Coverage: {}", query),
            url: "https://example.com/coverage".to_string(),
            snippet: "Independent coverage broadly consistent with filed figures.".to_string(),
        }])
    }
}
