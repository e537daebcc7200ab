//! Integration planner agent

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;

const SYNERGY_RATE: f64 = 0.02;

pub struct IntegrationPlanner;

#[async_trait]
impl Agent for IntegrationPlanner {
    fn name(&self) -> &'static str {
        names::INTEGRATION_PLANNER
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::DEAL_STRUCTURE]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::INTEGRATION_BLUEPRINT]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::DEAL_STRUCTURING]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let financial = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();

        let target_revenue = financial["target"]["income_statements"]
            .as_array()
            .and_then(|s| s.first())
            .and_then(|s| s["revenue"].as_f64())
            .unwrap_or(0.0);
        let acquirer_revenue = financial["acquirer"]["income_statements"]
            .as_array()
            .and_then(|s| s.first())
            .and_then(|s| s["revenue"].as_f64())
            .unwrap_or(0.0);

        let combined_revenue = target_revenue + acquirer_revenue;
        let synergy_estimate = SYNERGY_RATE * combined_revenue;

        let workstreams = json!([
            { "name": "day_one_readiness", "horizon_days": 30,
              "focus": "payroll, systems access, customer communications" },
            { "name": "finance_integration", "horizon_days": 100,
              "focus": "chart of accounts, close calendar, reporting" },
            { "name": "commercial_alignment", "horizon_days": 180,
              "focus": "pricing harmonization, channel overlap" },
            { "name": "systems_consolidation", "horizon_days": 365,
              "focus": "ERP migration, data platform" },
        ]);

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are an integration management office lead."),
                    Message::user(format!(
                        "Combined revenue {:.0}, run-rate synergy estimate {:.0}, \
                         four workstreams over 12 months. Two sentences on integration \
                         sequencing for {}.",
                        combined_revenue, synergy_estimate, ctx.request.target,
                    )),
                ],
                &CallContext::new("integration planning / workstreams"),
            )
            .await?;

        let payload = json!({
            "workstreams": workstreams,
            "synergy_estimate": synergy_estimate,
            "synergy_basis": format!("{:.1}% of combined revenue", SYNERGY_RATE * 100.0),
            "commentary": commentary,
            "findings": [
                {
                    "category": "integration",
                    "subject": format!("{} integration plan", ctx.request.target),
                    "detail": format!("synergy run-rate estimate {:.0}", synergy_estimate),
                }
            ],
        });

        state
            .write(keys::INTEGRATION_BLUEPRINT, payload.clone())
            .await?;
        Ok(AgentResult::ok(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::deal_structuring::DealStructuring;
    use crate::agents::financial_analyst::FinancialAnalyst;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};
    use crate::agents::valuation::AdvancedValuation;

    #[tokio::test]
    async fn test_blueprint_has_workstreams() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;
        run_agent(&state, &FinancialAnalyst, &ctx).await;
        run_agent(&state, &AdvancedValuation, &ctx).await;
        run_agent(&state, &DealStructuring, &ctx).await;

        let result = run_agent(&state, &IntegrationPlanner, &ctx).await;
        assert!(result.errors.is_empty());

        let blueprint = state.read(keys::INTEGRATION_BLUEPRINT).await.unwrap();
        assert_eq!(blueprint["workstreams"].as_array().unwrap().len(), 4);
        assert!(blueprint["synergy_estimate"].as_f64().unwrap() > 0.0);
    }
}
