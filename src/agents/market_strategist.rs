//! Market strategist agent
//!
//! Demand signals and market positioning from news flow and profile data.
//! Competitive landscape detail is deferred to the benchmarking agent;
//! synthesis prefers that agent's real output over this placeholder.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct MarketStrategist;

#[async_trait]
impl Agent for MarketStrategist {
    fn name(&self) -> &'static str {
        names::MARKET_STRATEGIST
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::FINANCIAL_DATA]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::MARKET_ANALYSIS]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let financial = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();

        let news = financial["target"]["news"].as_array().cloned().unwrap_or_default();
        let mut positive = 0usize;
        let mut negative = 0usize;
        for item in &news {
            match item["sentiment"].as_str() {
                Some("positive") => positive += 1,
                Some("negative") => negative += 1,
                _ => {}
            }
        }

        let profile = &financial["target"]["profile"];
        let surprises = financial["target"]["earnings_surprises"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let beat_count = surprises
            .iter()
            .filter(|s| {
                s["actual_eps"].as_f64().unwrap_or(0.0)
                    > s["estimated_eps"].as_f64().unwrap_or(0.0)
            })
            .count();

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are a market strategist on a diligence team."),
                    Message::user(format!(
                        "Sector {}, industry {}. News sentiment {}+/{}-. \
                         Earnings beats {}/{}. Three sentences on demand outlook for {}.",
                        profile["sector"], profile["industry"], positive, negative,
                        beat_count, surprises.len(), ctx.request.target,
                    )),
                ],
                &CallContext::new("market analysis / demand outlook"),
            )
            .await?;

        let payload = json!({
            "market_position": {
                "sector": profile["sector"],
                "industry": profile["industry"],
                "market_cap": profile["market_cap"],
            },
            "demand_signals": {
                "news_positive": positive,
                "news_negative": negative,
                "earnings_beats": beat_count,
                "earnings_periods": surprises.len(),
            },
            // Owned by the benchmarking agent; synthesis resolves the overlap.
            "competitive_landscape": "N/A",
            "outlook": commentary,
            "findings": [
                {
                    "category": "market",
                    "subject": format!("{} demand outlook", ctx.request.target),
                    "detail": format!("news sentiment {}+/{}-", positive, negative),
                }
            ],
        });

        state.write(keys::MARKET_ANALYSIS, payload.clone()).await?;

        let mut result = AgentResult::ok(payload);
        if news.is_empty() {
            result = result.warn("no recent news flow for sentiment analysis");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};

    #[tokio::test]
    async fn test_market_analysis_counts_sentiment() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;

        let result = run_agent(&state, &MarketStrategist, &ctx).await;
        assert!(result.errors.is_empty());

        let market = state.read(keys::MARKET_ANALYSIS).await.unwrap();
        assert_eq!(market["demand_signals"]["news_positive"], 1);
        assert_eq!(market["competitive_landscape"], "N/A");
    }
}
