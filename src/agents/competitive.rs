//! Competitive benchmarking agent
//!
//! Positions the target against its peer list on growth and margin.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct CompetitiveBenchmarking;

#[async_trait]
impl Agent for CompetitiveBenchmarking {
    fn name(&self) -> &'static str {
        names::COMPETITIVE_BENCHMARKING
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::FINANCIAL_DATA, keys::NORMALIZED_FINANCIALS]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::COMPETITIVE_BENCHMARKING]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::FINANCIAL_ANALYST]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let financial = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();
        let normalized = state.read(keys::NORMALIZED_FINANCIALS).await.unwrap_or_default();

        let peers: Vec<String> = financial["target"]["peers"]
            .as_array()
            .map(|p| {
                p.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut warnings = Vec::new();
        if peers.is_empty() {
            warnings.push("empty peer list; benchmarking limited to absolute view".to_string());
            state.anomaly("empty_peer_list", "no peers returned for target").await;
        }

        let target_margin = normalized["years"]
            .as_array()
            .and_then(|y| y.last())
            .and_then(|y| y["operating_margin"].as_f64())
            .unwrap_or(0.0);
        let target_growth = normalized["growth"]["weighted_cagr"].as_f64().unwrap_or(0.0);

        // Fetch peer profiles in parallel for relative positioning
        let mut peer_rows = Vec::new();
        let profiles = futures_util::future::join_all(
            peers.iter().map(|p| ctx.market.company_profile(p)),
        )
        .await;
        for (peer, profile) in peers.iter().zip(profiles) {
            match profile {
                Ok(profile) => peer_rows.push(json!({
                    "ticker": peer,
                    "sector": profile["sector"],
                    "market_cap": profile["market_cap"],
                    "beta": profile["beta"],
                })),
                Err(e) => warnings.push(format!("peer {} profile unavailable: {}", peer, e)),
            }
        }

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are a competitive strategy analyst."),
                    Message::user(format!(
                        "Target {} operating margin {:.1}%, weighted revenue CAGR {:.1}%, \
                         {} peer(s) profiled. Two sentences on relative positioning.",
                        ctx.request.target,
                        target_margin * 100.0,
                        target_growth * 100.0,
                        peer_rows.len()
                    )),
                ],
                &CallContext::new("competitive benchmarking / positioning"),
            )
            .await?;

        let payload = json!({
            "peer_group": peer_rows,
            "target_metrics": {
                "operating_margin": target_margin,
                "weighted_revenue_cagr": target_growth,
            },
            "positioning": commentary,
            "findings": [
                {
                    "category": "competitive",
                    "subject": format!("{} peer positioning", ctx.request.target),
                    "detail": format!("{} peers benchmarked on margin and growth", peer_rows.len()),
                }
            ],
        });

        state
            .write(keys::COMPETITIVE_BENCHMARKING, payload.clone())
            .await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = warnings;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::financial_analyst::FinancialAnalyst;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};

    #[tokio::test]
    async fn test_peer_group_is_profiled() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;
        run_agent(&state, &FinancialAnalyst, &ctx).await;

        let result = run_agent(&state, &CompetitiveBenchmarking, &ctx).await;
        assert!(result.errors.is_empty());

        let bench = state.read(keys::COMPETITIVE_BENCHMARKING).await.unwrap();
        assert_eq!(bench["peer_group"].as_array().unwrap().len(), 4);
        assert!(bench["target_metrics"]["operating_margin"].is_number());
    }
}
