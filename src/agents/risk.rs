//! Risk assessment agent
//!
//! Composite risk view over the deep-dive and valuation outputs.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct RiskAssessment;

#[async_trait]
impl Agent for RiskAssessment {
    fn name(&self) -> &'static str {
        names::RISK_ASSESSMENT
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::FINANCIAL_DEEP_DIVE, keys::ADVANCED_VALUATION]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::RISK_ASSESSMENT]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::FINANCIAL_DEEP_DIVE, names::ADVANCED_VALUATION]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let deep = state.read(keys::FINANCIAL_DEEP_DIVE).await.unwrap_or_default();
        let advanced = state.read(keys::ADVANCED_VALUATION).await.unwrap_or_default();

        let fcf_conversion = deep["fcf_conversion"].as_f64().unwrap_or(0.0);

        // Valuation dispersion from the sensitivity grid
        let grid: Vec<f64> = advanced["dcf_analysis"]["sensitivity_grid"]
            .as_array()
            .map(|g| {
                g.iter()
                    .filter_map(|p| p["enterprise_value"].as_f64())
                    .collect()
            })
            .unwrap_or_default();
        let dispersion = match (
            grid.iter().cloned().fold(f64::INFINITY, f64::min),
            grid.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        ) {
            (min, max) if min.is_finite() && max.is_finite() && min > 0.0 => (max - min) / min,
            _ => 0.0,
        };

        // 0 (benign) .. 100 (severe)
        let mut risk_score: f64 = 20.0;
        if fcf_conversion < 0.5 {
            risk_score += 25.0;
        }
        if dispersion > 0.5 {
            risk_score += 25.0;
        } else if dispersion > 0.25 {
            risk_score += 12.0;
        }
        let lbo_irr = advanced["lbo_analysis"]["irr"].as_f64().unwrap_or(0.0);
        if lbo_irr < 0.12 {
            risk_score += 10.0;
        }
        risk_score = risk_score.min(100.0);

        let rating = match risk_score as u32 {
            0..=34 => "low",
            35..=64 => "medium",
            _ => "high",
        };

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are the risk officer on a diligence committee."),
                    Message::user(format!(
                        "FCF conversion {:.2}, valuation dispersion {:.2}, LBO IRR {:.2}. \
                         Composite score {:.0} ({}). Two sentences on key deal risks for {}.",
                        fcf_conversion, dispersion, lbo_irr, risk_score, rating,
                        ctx.request.target,
                    )),
                ],
                &CallContext::new("risk assessment / composite scoring"),
            )
            .await?;

        let payload = json!({
            "risk_score": risk_score,
            "rating": rating,
            "drivers": {
                "fcf_conversion": fcf_conversion,
                "valuation_dispersion": dispersion,
                "lbo_irr": lbo_irr,
            },
            "commentary": commentary,
            "findings": [
                {
                    "category": "risk",
                    "subject": format!("{} composite risk", ctx.request.target),
                    "detail": format!("score {:.0}, rating {}", risk_score, rating),
                }
            ],
        });

        state.write(keys::RISK_ASSESSMENT, payload.clone()).await?;

        let mut result = AgentResult::ok(payload);
        if rating == "high" {
            result = result.recommend("escalate to investment committee before proceeding");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::deep_dive::FinancialDeepDive;
    use crate::agents::financial_analyst::FinancialAnalyst;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};
    use crate::agents::valuation::AdvancedValuation;

    #[tokio::test]
    async fn test_risk_score_in_range() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;
        run_agent(&state, &FinancialAnalyst, &ctx).await;
        run_agent(&state, &FinancialDeepDive, &ctx).await;
        run_agent(&state, &AdvancedValuation, &ctx).await;

        let result = run_agent(&state, &RiskAssessment, &ctx).await;
        assert!(result.errors.is_empty());

        let risk = state.read(keys::RISK_ASSESSMENT).await.unwrap();
        let score = risk["risk_score"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert!(risk["rating"].is_string());
    }
}
