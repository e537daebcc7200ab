//! SEC filings provider adapter

use crate::error::DiligenceError;
use crate::providers::rate_limit::TokenBucket;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Form types the pipeline consumes
pub const TRACKED_FORMS: &[&str] = &["10-K", "10-Q", "DEF 14A", "S-4", "SC 13D/G", "8-K"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    pub form_type: String,
    pub filed_at: String,
    pub accession: String,
    pub title: String,
}

#[async_trait]
pub trait FilingsProvider: Send + Sync {
    /// Filings for a ticker restricted to the given form types
    async fn filings(&self, ticker: &str, forms: &[&str]) -> Result<Vec<Filing>>;
    async fn full_text(&self, accession: &str) -> Result<String>;
}

//
// ================= HTTP adapter =================
//

pub struct HttpFilings {
    client: Client,
    base_url: String,
    bucket: TokenBucket,
}

impl HttpFilings {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: TokenBucket::new("filings", 4.0, 2.0),
        }
    }
}

#[async_trait]
impl FilingsProvider for HttpFilings {
    async fn filings(&self, ticker: &str, forms: &[&str]) -> Result<Vec<Filing>> {
        self.bucket.acquire(Duration::from_secs(30)).await?;

        let url = format!("{}/filings/{}", self.base_url, ticker);
        let forms_param = forms.join(",");

        let response = self
            .client
            .get(&url)
            .query(&[("forms", forms_param.as_str())])
            .send()
            .await
            .map_err(|e| {
                DiligenceError::ProviderError(format!("filings request failed: {}", e))
            })?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            DiligenceError::ProviderError(format!("invalid filings response: {}", e))
        })?;

        if !status.is_success() {
            return Err(DiligenceError::ProviderError(format!(
                "filings provider returned {} for {}: {}",
                status, ticker, body
            )));
        }

        let filings = body
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .filter_map(|r| serde_json::from_value(r.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(filings)
    }

    async fn full_text(&self, accession: &str) -> Result<String> {
        self.bucket.acquire(Duration::from_secs(30)).await?;

        let url = format!("{}/filings/text/{}", self.base_url, accession);

        let response = self.client.get(&url).send().await.map_err(|e| {
            DiligenceError::ProviderError(format!("filing text request failed: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(DiligenceError::ProviderError(format!(
                "filings provider returned {} for text of {}",
                response.status(),
                accession
            )));
        }

        Ok(response.text().await.map_err(|e| {
            DiligenceError::ProviderError(format!("invalid filing text: {}", e))
        })?)
    }
}

//
// ========== Stub adapter (tests & credential-less dev mode) ==========
//

pub struct StubFilings;

#[async_trait]
impl FilingsProvider for StubFilings {
    async fn filings(&self, ticker: &str, forms: &[&str]) -> Result<Vec<Filing>> {
        let catalog = [
            ("10-K", "2025-02-14", "Annual report"),
            ("10-Q", "2024-11-01", "Quarterly report"),
            ("DEF 14A", "2024-04-12", "Definitive proxy statement"),
            ("8-K", "2025-01-29", "Current report: results announcement"),
            ("SC 13D/G", "2024-09-20", "Beneficial ownership disclosure"),
        ];

        Ok(catalog
            .iter()
            .filter(|(form, _, _)| forms.contains(form))
            .enumerate()
            .map(|(i, (form, filed_at, title))| Filing {
                form_type: form.to_string(),
                filed_at: filed_at.to_string(),
                accession: format!("{}-{:04}", ticker, i),
                title: title.to_string(),
            })
            .collect())
    }

    async fn full_text(&self, accession: &str) -> Result<String> {
        Ok(format!(
            "Filing {}: routine disclosures. One pending commercial dispute, \
             customary change-of-control provisions in credit agreements, no \
             going-concern language.",
            accession
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_respects_form_filter() {
        let stub = StubFilings;
        let filings = stub.filings("TGT", &["10-K", "DEF 14A"]).await.unwrap();

        assert_eq!(filings.len(), 2);
        assert!(filings.iter().all(|f| f.form_type == "10-K" || f.form_type == "DEF 14A"));
    }
}
