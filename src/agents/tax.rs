//! Tax structuring agent

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;

const STATUTORY_RATE: f64 = 0.21;

pub struct TaxStructuring;

#[async_trait]
impl Agent for TaxStructuring {
    fn name(&self) -> &'static str {
        names::TAX_STRUCTURING
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::ADVANCED_VALUATION]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::TAX_STRUCTURE]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::ADVANCED_VALUATION]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let advanced = state.read(keys::ADVANCED_VALUATION).await.unwrap_or_default();
        let base_ev = advanced["dcf_analysis"]["scenarios"]["base"]["enterprise_value"]
            .as_f64()
            .unwrap_or(0.0);

        // Step-up benefit under an asset-deal election: incremental
        // depreciation shield over a 15-year amortization of the premium.
        let assumed_basis = 0.55 * base_ev;
        let step_up = base_ev - assumed_basis;
        let annual_shield = step_up / 15.0 * STATUTORY_RATE;

        let structures = json!([
            {
                "structure": "stock_purchase",
                "step_up": false,
                "estimated_annual_shield": 0.0,
                "notes": "carryover basis; simplest close",
            },
            {
                "structure": "asset_purchase",
                "step_up": true,
                "estimated_annual_shield": annual_shield,
                "notes": "basis step-up; consent burden on contracts",
            },
            {
                "structure": "338h10_election",
                "step_up": true,
                "estimated_annual_shield": annual_shield * 0.9,
                "notes": "stock mechanics with asset treatment; seller cooperation required",
            },
        ]);

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are a transaction tax advisor."),
                    Message::user(format!(
                        "Base EV {:.0}, estimated step-up {:.0}, annual shield {:.0}. \
                         Recommend a structure for acquiring {} in two sentences.",
                        base_ev, step_up, annual_shield, ctx.request.target,
                    )),
                ],
                &CallContext::new("tax structuring / election analysis"),
            )
            .await?;

        let payload = json!({
            "statutory_rate": STATUTORY_RATE,
            "structures": structures,
            "recommended": "asset_purchase",
            "commentary": commentary,
            "findings": [
                {
                    "category": "tax",
                    "subject": format!("{} structure election", ctx.request.target),
                    "detail": format!("annual shield up to {:.0} from basis step-up", annual_shield),
                }
            ],
        });

        state.write(keys::TAX_STRUCTURE, payload.clone()).await?;
        Ok(AgentResult::ok(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::financial_analyst::FinancialAnalyst;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};
    use crate::agents::valuation::AdvancedValuation;

    #[tokio::test]
    async fn test_three_structures_modeled() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;
        run_agent(&state, &FinancialAnalyst, &ctx).await;
        run_agent(&state, &AdvancedValuation, &ctx).await;

        let result = run_agent(&state, &TaxStructuring, &ctx).await;
        assert!(result.errors.is_empty());

        let tax = state.read(keys::TAX_STRUCTURE).await.unwrap();
        assert_eq!(tax["structures"].as_array().unwrap().len(), 3);
        assert_eq!(tax["statutory_rate"], STATUTORY_RATE);
    }
}
