//! Deal structuring agent
//!
//! Offer price, consideration mix, and financing assumptions consumed by
//! the downstream deal-math agents.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;

const CASH_SHARE: f64 = 0.6;
const CONTROL_PREMIUM: f64 = 0.25;
const NEW_DEBT_RATE: f64 = 0.055;

pub struct DealStructuring;

#[async_trait]
impl Agent for DealStructuring {
    fn name(&self) -> &'static str {
        names::DEAL_STRUCTURING
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::ADVANCED_VALUATION]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::DEAL_STRUCTURE]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::ADVANCED_VALUATION]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let advanced = state.read(keys::ADVANCED_VALUATION).await.unwrap_or_default();
        let financial = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();

        let base_ev = advanced["dcf_analysis"]["scenarios"]["base"]["enterprise_value"]
            .as_f64()
            .unwrap_or(0.0);

        let mut warnings = Vec::new();
        let (offer_value, price_basis) = match ctx.request.deal_value {
            Some(value) => (value, "user_provided"),
            None => (base_ev, "dcf_base_case"),
        };

        let market_cap = financial["target"]["profile"]["market_cap"]
            .as_f64()
            .unwrap_or(0.0);
        let implied_premium = if market_cap > 0.0 {
            offer_value / market_cap - 1.0
        } else {
            warnings.push("no market cap; premium vs market not computable".to_string());
            CONTROL_PREMIUM
        };

        let cash_component = CASH_SHARE * offer_value;
        let stock_component = offer_value - cash_component;

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are an M&A deal structurer."),
                    Message::user(format!(
                        "Offer {:.0} ({}), implied premium {:.1}%, mix {:.0}% cash. \
                         Two sentences on structure rationale for acquiring {}.",
                        offer_value, price_basis, implied_premium * 100.0,
                        CASH_SHARE * 100.0, ctx.request.target,
                    )),
                ],
                &CallContext::new("deal structuring / consideration mix"),
            )
            .await?;

        let payload = json!({
            "offer_value": offer_value,
            "price_basis": price_basis,
            "implied_premium": implied_premium,
            "consideration": {
                "cash": cash_component,
                "stock": stock_component,
                "cash_share": CASH_SHARE,
            },
            "financing": {
                "new_debt": cash_component,
                "debt_rate": NEW_DEBT_RATE,
            },
            "commentary": commentary,
            "findings": [
                {
                    "category": "deal_structure",
                    "subject": format!("{} offer construction", ctx.request.target),
                    "detail": format!("offer {:.0} with {:.0}% cash", offer_value, CASH_SHARE * 100.0),
                }
            ],
        });

        state.write(keys::DEAL_STRUCTURE, payload.clone()).await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = warnings;
        Ok(result)
    }
}
