//! Raw-data ingestion stage
//!
//! Fetches financial, market, and filing data for the target (and acquirer
//! when supplied) in parallel and populates the raw state keys under a
//! single write each. This stage is not an agent: it has no LLM prompt,
//! and its failure fails the job.

use crate::agents::AgentContext;
use crate::error::DiligenceError;
use crate::providers::filings::TRACKED_FORMS;
use crate::providers::{FilingsProvider, MarketDataProvider, StatementPeriod};
use crate::state::{keys, StateHandle};
use crate::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Keys owned by the ingestion stage
pub const RAW_KEYS: &[&str] = &[keys::FINANCIAL_DATA, keys::SEC_FILINGS, keys::PROXY_DATA];

pub const INGESTION: &str = "ingestion";

async fn fetch_company(market: &Arc<dyn MarketDataProvider>, ticker: &str) -> Result<Value> {
    let (profile, income, quarterly_income, balance, cash_flow) = tokio::join!(
        market.company_profile(ticker),
        market.income_statements(ticker, StatementPeriod::Annual),
        market.income_statements(ticker, StatementPeriod::Quarterly),
        market.balance_sheets(ticker, StatementPeriod::Annual),
        market.cash_flows(ticker, StatementPeriod::Annual),
    );

    let (ratios, estimates, peers, news, surprises) = tokio::join!(
        market.key_ratios(ticker),
        market.analyst_estimates(ticker),
        market.peers(ticker),
        market.news(ticker),
        market.earnings_surprises(ticker),
    );

    let (insider, institutional, dcf_reference) = tokio::join!(
        market.insider_transactions(ticker),
        market.institutional_ownership(ticker),
        market.dcf_valuation(ticker),
    );

    Ok(json!({
        "ticker": ticker,
        "profile": profile?,
        "income_statements": income?,
        "quarterly_income_statements": quarterly_income?,
        "balance_sheets": balance?,
        "cash_flows": cash_flow?,
        "key_ratios": ratios?,
        "analyst_estimates": estimates?,
        "peers": peers?,
        "news": news?,
        "earnings_surprises": surprises?,
        "insider_transactions": insider?,
        "institutional_ownership": institutional?,
        "dcf_reference": dcf_reference?,
    }))
}

async fn fetch_filings(filings: &Arc<dyn FilingsProvider>, ticker: &str) -> Result<Value> {
    let listed = filings.filings(ticker, TRACKED_FORMS).await?;
    debug!(ticker, count = listed.len(), "filings listed");
    Ok(serde_json::to_value(listed)?)
}

async fn fetch_proxy(filings: &Arc<dyn FilingsProvider>, ticker: &str) -> Result<Value> {
    let proxies = filings.filings(ticker, &["DEF 14A"]).await?;
    match proxies.first() {
        Some(proxy) => {
            let text = filings.full_text(&proxy.accession).await?;
            Ok(json!({
                "form_type": proxy.form_type,
                "filed_at": proxy.filed_at,
                "accession": proxy.accession,
                "text": text,
            }))
        }
        None => Ok(Value::Null),
    }
}

/// Run ingestion for one job. Writes each raw key exactly once.
pub async fn run(handle: &StateHandle, ctx: &AgentContext) -> Result<()> {
    let target = ctx.request.target.as_str();
    let acquirer = ctx.request.acquirer.as_deref();

    info!(target, ?acquirer, "ingestion started");

    let market = &ctx.market;
    let filings = &ctx.filings;

    let (target_data, target_filings, target_proxy, treasury) = tokio::join!(
        fetch_company(market, target),
        fetch_filings(filings, target),
        fetch_proxy(filings, target),
        market.treasury_rates(),
    );

    let mut financial = Map::new();
    financial.insert("target".to_string(), target_data?);
    financial.insert("treasury_rates".to_string(), treasury?);

    let mut filing_map = Map::new();
    filing_map.insert("target".to_string(), target_filings?);

    let mut proxy_map = Map::new();
    proxy_map.insert("target".to_string(), target_proxy?);

    if let Some(acquirer) = acquirer {
        let (acquirer_data, acquirer_filings, acquirer_proxy) = tokio::join!(
            fetch_company(market, acquirer),
            fetch_filings(filings, acquirer),
            fetch_proxy(filings, acquirer),
        );
        financial.insert("acquirer".to_string(), acquirer_data?);
        filing_map.insert("acquirer".to_string(), acquirer_filings?);
        proxy_map.insert("acquirer".to_string(), acquirer_proxy?);
    }

    handle
        .write(keys::FINANCIAL_DATA, Value::Object(financial))
        .await
        .map_err(|e| DiligenceError::IngestionError(e.to_string()))?;
    handle
        .write(keys::SEC_FILINGS, Value::Object(filing_map))
        .await
        .map_err(|e| DiligenceError::IngestionError(e.to_string()))?;
    handle
        .write(keys::PROXY_DATA, Value::Object(proxy_map))
        .await
        .map_err(|e| DiligenceError::IngestionError(e.to_string()))?;

    info!(target, "ingestion committed raw keys");
    Ok(())
}
