//! Financial deep-dive agent
//!
//! Works the normalized statements into working-capital, margin-bridge,
//! and cash-conversion views.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct FinancialDeepDive;

fn num(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

#[async_trait]
impl Agent for FinancialDeepDive {
    fn name(&self) -> &'static str {
        names::FINANCIAL_DEEP_DIVE
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::NORMALIZED_FINANCIALS, keys::FINANCIAL_DATA]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::FINANCIAL_DEEP_DIVE]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::FINANCIAL_ANALYST]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let normalized = state.read(keys::NORMALIZED_FINANCIALS).await.unwrap_or_default();
        let financial = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();

        let years = normalized["years"].as_array().cloned().unwrap_or_default();
        let mut warnings = Vec::new();

        // Margin bridge across consecutive normalized years
        let mut margin_bridge = Vec::new();
        for pair in years.windows(2) {
            margin_bridge.push(json!({
                "from_year": pair[0]["year"],
                "to_year": pair[1]["year"],
                "net_margin_delta": num(&pair[1], "net_margin") - num(&pair[0], "net_margin"),
                "operating_margin_delta":
                    num(&pair[1], "operating_margin") - num(&pair[0], "operating_margin"),
            }));
        }

        // Working capital from the latest balance sheet
        let balance = financial["target"]["balance_sheets"]
            .as_array()
            .and_then(|s| s.first())
            .cloned()
            .unwrap_or(Value::Null);
        let working_capital = if balance.is_null() {
            warnings.push("no balance sheet available; working capital omitted".to_string());
            Value::Null
        } else {
            json!({
                "receivables": num(&balance, "receivables"),
                "inventory": num(&balance, "inventory"),
                "payables": num(&balance, "payables"),
                "net_working_capital":
                    num(&balance, "receivables") + num(&balance, "inventory")
                        - num(&balance, "payables"),
            })
        };

        // Cash conversion from the latest cash-flow statement
        let cash_flow = financial["target"]["cash_flows"]
            .as_array()
            .and_then(|s| s.first())
            .cloned()
            .unwrap_or(Value::Null);
        let latest_ebitda = years
            .last()
            .map(|y| num(y, "normalized_ebitda"))
            .unwrap_or(0.0);
        let fcf_conversion = if latest_ebitda > 0.0 {
            num(&cash_flow, "free_cash_flow") / latest_ebitda
        } else {
            0.0
        };

        let summary_prompt = format!(
            "Margin bridge entries: {}. Net working capital view: {}. \
             FCF conversion vs normalized EBITDA: {:.2}. \
             Write two sentences on earnings quality for {}.",
            margin_bridge.len(),
            working_capital,
            fcf_conversion,
            ctx.request.target,
        );
        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are a forensic financial analyst."),
                    Message::user(summary_prompt),
                ],
                &CallContext::new("financial deep dive / earnings quality"),
            )
            .await?;

        let payload = json!({
            "margin_bridge": margin_bridge,
            "working_capital": working_capital,
            "fcf_conversion": fcf_conversion,
            "commentary": commentary,
            "findings": [
                {
                    "category": "earnings_quality",
                    "subject": format!("{} cash conversion", ctx.request.target),
                    "detail": format!("FCF conversion of normalized EBITDA at {:.0}%",
                        fcf_conversion * 100.0),
                }
            ],
        });

        state.write(keys::FINANCIAL_DEEP_DIVE, payload.clone()).await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = warnings;
        if fcf_conversion < 0.5 {
            result = result.warn("cash conversion below 50% of normalized EBITDA");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::financial_analyst::FinancialAnalyst;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};

    #[tokio::test]
    async fn test_deep_dive_builds_margin_bridge() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;
        run_agent(&state, &FinancialAnalyst, &ctx).await;

        let result = run_agent(&state, &FinancialDeepDive, &ctx).await;
        assert!(result.errors.is_empty());

        let deep = state.read(keys::FINANCIAL_DEEP_DIVE).await.unwrap();
        // Six included years → five bridge entries
        assert_eq!(deep["margin_bridge"].as_array().unwrap().len(), 5);
        assert!(deep["fcf_conversion"].as_f64().unwrap() > 0.0);
    }
}
