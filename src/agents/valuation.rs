//! Advanced valuation agent
//!
//! Builds on the analyst's DCF engine output: scenario refinement with a
//! WACC/growth sensitivity grid plus a leveraged-buyout view.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

const LBO_DEBT_SHARE: f64 = 0.6;
const LBO_HOLD_YEARS: f64 = 5.0;
const LBO_RATE: f64 = 0.075;

pub struct AdvancedValuation;

#[async_trait]
impl Agent for AdvancedValuation {
    fn name(&self) -> &'static str {
        names::ADVANCED_VALUATION
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::VALUATION_MODELS, keys::NORMALIZED_FINANCIALS]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::ADVANCED_VALUATION]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::FINANCIAL_ANALYST]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let valuation = state.read(keys::VALUATION_MODELS).await.unwrap_or_default();
        let normalized = state.read(keys::NORMALIZED_FINANCIALS).await.unwrap_or_default();

        let scenarios = valuation["dcf"]["scenarios"].clone();
        let assumptions = &valuation["dcf"]["assumptions"];
        let base_fcf = assumptions["base_fcf"].as_f64().unwrap_or(0.0);
        let wacc = assumptions["wacc"].as_f64().unwrap_or(0.10);
        let growth = assumptions["growth_base"].as_f64().unwrap_or(0.03);
        let terminal = assumptions["terminal_growth"].as_f64().unwrap_or(0.025);
        let net_debt = assumptions["net_debt"].as_f64().unwrap_or(0.0);
        let shares = assumptions["shares_outstanding"].as_f64().unwrap_or(0.0);

        // Sensitivity grid: WACC ±100bps × growth ±100bps around base
        let mut sensitivity = Vec::new();
        for wacc_shift in [-0.01, 0.0, 0.01] {
            for growth_shift in [-0.01, 0.0, 0.01] {
                let outcome = super::financial_analyst::run_dcf(
                    super::financial_analyst::DcfAssumptions {
                        base_fcf,
                        growth: growth + growth_shift,
                        wacc: wacc + wacc_shift,
                        terminal_growth: terminal,
                        net_debt,
                        shares_outstanding: shares,
                    },
                );
                sensitivity.push(json!({
                    "wacc": wacc + wacc_shift,
                    "growth": growth + growth_shift,
                    "enterprise_value": outcome.enterprise_value,
                }));
            }
        }

        // LBO: entry at base EV, levered at the standard share, exit at a
        // constant multiple of grown EBITDA.
        let base_ev = scenarios["base"]["enterprise_value"].as_f64().unwrap_or(0.0);
        let latest_ebitda = normalized["years"]
            .as_array()
            .and_then(|y| y.last())
            .and_then(|y| y["normalized_ebitda"].as_f64())
            .unwrap_or(0.0);

        let mut warnings = Vec::new();
        let lbo = if base_ev > 0.0 && latest_ebitda > 0.0 {
            let entry_multiple = base_ev / latest_ebitda;
            let entry_debt = LBO_DEBT_SHARE * base_ev;
            let entry_equity = base_ev - entry_debt;
            let exit_ebitda = latest_ebitda * (1.0 + growth).powf(LBO_HOLD_YEARS);
            // Straight-line paydown from free cash flow after interest
            let annual_paydown = (base_fcf - entry_debt * LBO_RATE).max(0.0);
            let exit_debt = (entry_debt - annual_paydown * LBO_HOLD_YEARS).max(0.0);
            let exit_equity = entry_multiple * exit_ebitda - exit_debt;
            let irr = if entry_equity > 0.0 && exit_equity > 0.0 {
                (exit_equity / entry_equity).powf(1.0 / LBO_HOLD_YEARS) - 1.0
            } else {
                0.0
            };

            json!({
                "entry_enterprise_value": base_ev,
                "entry_multiple": entry_multiple,
                "entry_debt": entry_debt,
                "entry_equity": entry_equity,
                "exit_ebitda": exit_ebitda,
                "exit_debt": exit_debt,
                "exit_equity": exit_equity,
                "hold_years": LBO_HOLD_YEARS,
                "irr": irr,
            })
        } else {
            warnings.push("insufficient inputs for LBO model".to_string());
            Value::Null
        };

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are a private-equity valuation specialist."),
                    Message::user(format!(
                        "Base EV {:.0}, sensitivity grid of {} points, LBO view: {}. \
                         Two sentences on valuation robustness for {}.",
                        base_ev,
                        sensitivity.len(),
                        lbo,
                        ctx.request.target
                    )),
                ],
                &CallContext::new("advanced valuation / scenario synthesis"),
            )
            .await?;

        let payload = json!({
            "dcf_analysis": {
                "scenarios": scenarios,
                "monte_carlo": valuation["dcf"]["monte_carlo"].clone(),
                "sensitivity_grid": sensitivity,
            },
            "lbo_analysis": lbo,
            "commentary": commentary,
            "findings": [
                {
                    "category": "valuation",
                    "subject": format!("{} enterprise value", ctx.request.target),
                    "detail": format!("Scenario DCF centered on {:.0}", base_ev),
                }
            ],
        });

        state.write(keys::ADVANCED_VALUATION, payload.clone()).await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = warnings;
        Ok(result)
    }
}
