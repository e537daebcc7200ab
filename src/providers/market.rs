//! Financial-data provider adapter
//!
//! Statements, ratios, estimates, ownership, news, peers, and treasury
//! rates for a ticker. Values cross the boundary as plain JSON records
//! (lists of key→value maps), never provider-native table objects.

use crate::error::DiligenceError;
use crate::providers::rate_limit::TokenBucket;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementPeriod {
    Annual,
    Quarterly,
}

impl StatementPeriod {
    fn as_str(&self) -> &'static str {
        match self {
            StatementPeriod::Annual => "annual",
            StatementPeriod::Quarterly => "quarter",
        }
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn company_profile(&self, ticker: &str) -> Result<Value>;
    async fn income_statements(&self, ticker: &str, period: StatementPeriod)
        -> Result<Vec<Value>>;
    async fn balance_sheets(&self, ticker: &str, period: StatementPeriod) -> Result<Vec<Value>>;
    async fn cash_flows(&self, ticker: &str, period: StatementPeriod) -> Result<Vec<Value>>;
    async fn key_ratios(&self, ticker: &str) -> Result<Vec<Value>>;
    async fn dcf_valuation(&self, ticker: &str) -> Result<Value>;
    async fn analyst_estimates(&self, ticker: &str) -> Result<Vec<Value>>;
    async fn insider_transactions(&self, ticker: &str) -> Result<Vec<Value>>;
    async fn institutional_ownership(&self, ticker: &str) -> Result<Vec<Value>>;
    async fn news(&self, ticker: &str) -> Result<Vec<Value>>;
    async fn earnings_surprises(&self, ticker: &str) -> Result<Vec<Value>>;
    async fn peers(&self, ticker: &str) -> Result<Vec<String>>;
    async fn treasury_rates(&self) -> Result<Value>;
}

//
// ================= HTTP adapter =================
//

pub struct HttpMarketData {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: TokenBucket,
}

impl HttpMarketData {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            bucket: TokenBucket::new("market_data", 5.0, 4.0),
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.bucket.acquire(Duration::from_secs(30)).await?;

        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| {
                DiligenceError::ProviderError(format!(
                    "market data request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            DiligenceError::ProviderError(format!("invalid JSON response for {}: {}", path, e))
        })?;

        if !status.is_success() {
            return Err(DiligenceError::ProviderError(format!(
                "market data provider returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }

    async fn get_records(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<Value>> {
        match self.get_json(path, query).await? {
            Value::Array(records) => Ok(records),
            other => Ok(vec![other]),
        }
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    async fn company_profile(&self, ticker: &str) -> Result<Value> {
        let mut records = self.get_records(&format!("/profile/{}", ticker), &[]).await?;
        records.pop().ok_or_else(|| {
            DiligenceError::ProviderError(format!("no profile returned for {}", ticker))
        })
    }

    async fn income_statements(
        &self,
        ticker: &str,
        period: StatementPeriod,
    ) -> Result<Vec<Value>> {
        self.get_records(
            &format!("/income-statement/{}", ticker),
            &[("period", period.as_str()), ("limit", "10")],
        )
        .await
    }

    async fn balance_sheets(&self, ticker: &str, period: StatementPeriod) -> Result<Vec<Value>> {
        self.get_records(
            &format!("/balance-sheet-statement/{}", ticker),
            &[("period", period.as_str()), ("limit", "10")],
        )
        .await
    }

    async fn cash_flows(&self, ticker: &str, period: StatementPeriod) -> Result<Vec<Value>> {
        self.get_records(
            &format!("/cash-flow-statement/{}", ticker),
            &[("period", period.as_str()), ("limit", "10")],
        )
        .await
    }

    async fn key_ratios(&self, ticker: &str) -> Result<Vec<Value>> {
        self.get_records(&format!("/ratios/{}", ticker), &[("limit", "10")])
            .await
    }

    async fn dcf_valuation(&self, ticker: &str) -> Result<Value> {
        self.get_json(&format!("/discounted-cash-flow/{}", ticker), &[])
            .await
    }

    async fn analyst_estimates(&self, ticker: &str) -> Result<Vec<Value>> {
        self.get_records(&format!("/analyst-estimates/{}", ticker), &[])
            .await
    }

    async fn insider_transactions(&self, ticker: &str) -> Result<Vec<Value>> {
        self.get_records("/insider-trading", &[("symbol", ticker)])
            .await
    }

    async fn institutional_ownership(&self, ticker: &str) -> Result<Vec<Value>> {
        self.get_records(&format!("/institutional-holder/{}", ticker), &[])
            .await
    }

    async fn news(&self, ticker: &str) -> Result<Vec<Value>> {
        self.get_records("/stock_news", &[("tickers", ticker), ("limit", "50")])
            .await
    }

    async fn earnings_surprises(&self, ticker: &str) -> Result<Vec<Value>> {
        self.get_records(&format!("/earnings-surprises/{}", ticker), &[])
            .await
    }

    async fn peers(&self, ticker: &str) -> Result<Vec<String>> {
        let records = self
            .get_records("/stock_peers", &[("symbol", ticker)])
            .await?;

        Ok(records
            .iter()
            .filter_map(|r| r.get("peersList"))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_str)
            .map(|s| s.to_string())
            .collect())
    }

    async fn treasury_rates(&self) -> Result<Value> {
        let mut records = self.get_records("/treasury", &[]).await?;
        Ok(records.pop().unwrap_or_else(|| json!({})))
    }
}

//
// ========== Stub adapter (tests & credential-less dev mode) ==========
//

/// Deterministic seven-year fixture. Year 2020 carries a −106.7% net
/// margin so normalization paths stay exercised end-to-end.
pub struct StubMarketData {
    income_override: Option<Vec<Value>>,
}

impl StubMarketData {
    pub fn new() -> Self {
        Self {
            income_override: None,
        }
    }

    /// Replace the annual income statements (boundary-case tests)
    pub fn with_income_statements(mut self, statements: Vec<Value>) -> Self {
        self.income_override = Some(statements);
        self
    }

    fn annual_income(&self) -> Vec<Value> {
        if let Some(statements) = &self.income_override {
            return statements.clone();
        }

        // Newest first, the way statement feeds arrive.
        let rows = [
            // (year, revenue, operating, net, ebitda, r&d, unusual)
            (2024, 182_000.0, 40_000.0, 31_000.0, 52_000.0, 14_500.0, 0.0),
            (2023, 168_000.0, 36_500.0, 28_200.0, 47_800.0, 13_400.0, 1_200.0),
            (2022, 153_000.0, 32_100.0, 24_600.0, 43_000.0, 12_200.0, 0.0),
            (2021, 139_000.0, 28_400.0, 21_500.0, 38_700.0, 11_100.0, -900.0),
            (2020, 120_000.0, -122_500.0, -128_040.0, -96_000.0, 10_400.0, -118_000.0),
            (2019, 112_000.0, 22_900.0, 16_900.0, 30_600.0, 9_000.0, 0.0),
            (2018, 100_000.0, 20_000.0, 14_800.0, 27_000.0, 8_000.0, 500.0),
        ];

        rows.iter()
            .map(|(year, revenue, operating, net, ebitda, rnd, unusual)| {
                json!({
                    "calendar_year": year,
                    "revenue": revenue,
                    "operating_income": operating,
                    "net_income": net,
                    "ebitda": ebitda,
                    "research_and_development": rnd,
                    "unusual_items": unusual,
                    "shares_outstanding": 1_000.0,
                })
            })
            .collect()
    }
}

impl Default for StubMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for StubMarketData {
    async fn company_profile(&self, ticker: &str) -> Result<Value> {
        Ok(json!({
            "symbol": ticker,
            "company_name": format!("{} Holdings", ticker),
            "sector": "Technology",
            "industry": "Software",
            "beta": 1.1,
            "market_cap": 450_000.0,
            "price": 420.0,
        }))
    }

    async fn income_statements(
        &self,
        _ticker: &str,
        period: StatementPeriod,
    ) -> Result<Vec<Value>> {
        match period {
            StatementPeriod::Annual => Ok(self.annual_income()),
            StatementPeriod::Quarterly => Ok(self
                .annual_income()
                .into_iter()
                .take(1)
                .collect()),
        }
    }

    async fn balance_sheets(&self, _ticker: &str, _period: StatementPeriod) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "calendar_year": 2024,
            "total_assets": 260_000.0,
            "total_equity": 120_000.0,
            "total_debt": 58_000.0,
            "cash_and_equivalents": 34_000.0,
            "receivables": 21_000.0,
            "inventory": 6_500.0,
            "payables": 17_500.0,
        })])
    }

    async fn cash_flows(&self, _ticker: &str, _period: StatementPeriod) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "calendar_year": 2024,
            "operating_cash_flow": 44_000.0,
            "capital_expenditure": -9_500.0,
            "free_cash_flow": 34_500.0,
            "depreciation_and_amortization": 12_000.0,
        })])
    }

    async fn key_ratios(&self, _ticker: &str) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "calendar_year": 2024,
            "current_ratio": 1.8,
            "debt_to_equity": 0.48,
            "return_on_equity": 0.26,
            "gross_margin": 0.64,
        })])
    }

    async fn dcf_valuation(&self, ticker: &str) -> Result<Value> {
        Ok(json!({"symbol": ticker, "dcf": 445.0, "stock_price": 420.0}))
    }

    async fn analyst_estimates(&self, _ticker: &str) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "calendar_year": 2025,
            "estimated_revenue": 196_000.0,
            "estimated_eps": 34.2,
            "analyst_count": 18,
        })])
    }

    async fn insider_transactions(&self, _ticker: &str) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "insider": "CFO",
            "transaction_type": "sale",
            "shares": 1_200,
            "date": "2024-11-04",
        })])
    }

    async fn institutional_ownership(&self, _ticker: &str) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "holder": "Broadline Capital",
            "shares": 94_000,
            "change_pct": 2.4,
        })])
    }

    async fn news(&self, ticker: &str) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "symbol": ticker,
            "title": "Quarterly results ahead of guidance",
            "published_at": "2025-01-28T13:30:00Z",
            "sentiment": "positive",
        })])
    }

    async fn earnings_surprises(&self, _ticker: &str) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "period": "2024-Q4",
            "estimated_eps": 8.1,
            "actual_eps": 8.6,
        })])
    }

    async fn peers(&self, _ticker: &str) -> Result<Vec<String>> {
        Ok(vec![
            "PEERA".to_string(),
            "PEERB".to_string(),
            "PEERC".to_string(),
            "PEERD".to_string(),
        ])
    }

    async fn treasury_rates(&self) -> Result<Value> {
        Ok(json!({"month3": 4.4, "year2": 4.1, "year10": 4.3, "year30": 4.5}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_fixture_contains_loss_year() {
        let stub = StubMarketData::new();
        let statements = stub
            .income_statements("TGT", StatementPeriod::Annual)
            .await
            .unwrap();

        assert_eq!(statements.len(), 7);

        let loss_year = statements
            .iter()
            .find(|s| s["calendar_year"] == 2020)
            .unwrap();
        let margin = loss_year["net_income"].as_f64().unwrap()
            / loss_year["revenue"].as_f64().unwrap();
        assert!((margin - (-1.067)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stub_peers_nonempty() {
        let stub = StubMarketData::new();
        assert!(!stub.peers("TGT").await.unwrap().is_empty());
    }
}
