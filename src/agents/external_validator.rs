//! External validator agent
//!
//! Cross-references the committed analytical outputs against each other
//! and, when a search provider is available, against outside coverage.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct ExternalValidator;

#[async_trait]
impl Agent for ExternalValidator {
    fn name(&self) -> &'static str {
        names::EXTERNAL_VALIDATOR
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::VALUATION_MODELS, keys::ADVANCED_VALUATION]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::EXTERNAL_VALIDATION]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[
            names::FINANCIAL_DEEP_DIVE,
            names::COMPETITIVE_BENCHMARKING,
            names::LEGAL_COUNSEL,
            names::MARKET_STRATEGIST,
            names::MACRO_ANALYST,
            names::RISK_ASSESSMENT,
            names::TAX_STRUCTURING,
            names::ACCRETION_DILUTION,
            names::SOURCES_USES,
            names::CONTRIBUTION_ANALYSIS,
            names::EXCHANGE_RATIO,
            names::INTEGRATION_PLANNER,
        ]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let valuation = state.read(keys::VALUATION_MODELS).await.unwrap_or_default();
        let advanced = state.read(keys::ADVANCED_VALUATION).await.unwrap_or_default();
        let ebitda = state.read(keys::EBITDA).await.unwrap_or_default();

        let mut checks = Vec::new();
        let mut discrepancies = Vec::new();

        // The advanced-valuation scenarios must carry the analyst's base case
        let analyst_ev = valuation["dcf"]["scenarios"]["base"]["enterprise_value"]
            .as_f64()
            .unwrap_or(0.0);
        let advanced_ev = advanced["dcf_analysis"]["scenarios"]["base"]["enterprise_value"]
            .as_f64()
            .unwrap_or(0.0);
        let ev_consistent = (analyst_ev - advanced_ev).abs() <= 1e-6 * analyst_ev.abs().max(1.0);
        checks.push(json!({
            "check": "dcf_base_case_consistency",
            "passed": ev_consistent,
            "analyst_ev": analyst_ev,
            "advanced_ev": advanced_ev,
        }));
        if !ev_consistent {
            discrepancies.push("base-case EV diverges between valuation layers".to_string());
        }

        let ebitda_present = ebitda["normalized_ebitda"].as_f64().is_some();
        checks.push(json!({
            "check": "normalized_ebitda_present",
            "passed": ebitda_present,
        }));
        if !ebitda_present {
            discrepancies.push("normalized EBITDA missing".to_string());
        }

        // Outside coverage, when a search provider is configured
        let mut citations: Vec<Value> = Vec::new();
        if let Some(search) = &ctx.search {
            let query = format!("{} valuation consensus", ctx.request.target);
            match search.search(&query).await {
                Ok(hits) => {
                    citations = hits
                        .iter()
                        .map(|h| json!({"title": h.title, "url": h.url}))
                        .collect();
                }
                Err(e) => {
                    state
                        .anomaly("search_unavailable", &format!("web search failed: {}", e))
                        .await;
                }
            }
        }

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are an independent reviewer of a diligence package."),
                    Message::user(format!(
                        "{} cross-check(s), {} discrepancy(ies), {} outside citation(s). \
                         Two sentences on overall consistency for {}.",
                        checks.len(),
                        discrepancies.len(),
                        citations.len(),
                        ctx.request.target,
                    )),
                ],
                &CallContext::new("external validation / cross reference"),
            )
            .await?;

        let payload = json!({
            "checks": checks,
            "discrepancies": discrepancies.clone(),
            "citations": citations,
            "commentary": commentary,
            "findings": [
                {
                    "category": "validation",
                    "subject": format!("{} cross-check", ctx.request.target),
                    "detail": format!("{} discrepancies across analytical outputs",
                        discrepancies.len()),
                }
            ],
        });

        state
            .write(keys::EXTERNAL_VALIDATION, payload.clone())
            .await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = discrepancies;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::financial_analyst::FinancialAnalyst;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};
    use crate::agents::valuation::AdvancedValuation;

    #[tokio::test]
    async fn test_cross_checks_pass_on_consistent_state() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;
        run_agent(&state, &FinancialAnalyst, &ctx).await;
        run_agent(&state, &AdvancedValuation, &ctx).await;

        let result = run_agent(&state, &ExternalValidator, &ctx).await;
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);

        let validation = state.read(keys::EXTERNAL_VALIDATION).await.unwrap();
        assert!(validation["checks"]
            .as_array()
            .unwrap()
            .iter()
            .all(|c| c["passed"] == true));
        assert!(!validation["citations"].as_array().unwrap().is_empty());
    }
}
