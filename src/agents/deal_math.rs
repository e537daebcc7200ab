//! Deal-math agents downstream of deal structuring
//!
//! Accretion/dilution, sources & uses, contribution analysis, and exchange
//! ratio. Acquirer-dependent views degrade to warnings when no acquirer
//! was submitted; nothing is fabricated.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

const FEE_RATE: f64 = 0.015;

fn latest_income(financial: &Value, side: &str) -> Value {
    financial[side]["income_statements"]
        .as_array()
        .and_then(|s| s.first())
        .cloned()
        .unwrap_or(Value::Null)
}

fn num(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

//
// ================= Accretion / Dilution =================
//

pub struct AccretionDilution;

#[async_trait]
impl Agent for AccretionDilution {
    fn name(&self) -> &'static str {
        names::ACCRETION_DILUTION
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::DEAL_STRUCTURE]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::ACCRETION_DILUTION]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::DEAL_STRUCTURING]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let deal = state.read(keys::DEAL_STRUCTURE).await.unwrap_or_default();
        let financial = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();

        let target_income = latest_income(&financial, "target");
        let acquirer_income = latest_income(&financial, "acquirer");

        let new_debt = deal["financing"]["new_debt"].as_f64().unwrap_or(0.0);
        let debt_rate = deal["financing"]["debt_rate"].as_f64().unwrap_or(0.055);
        let interest_drag = new_debt * debt_rate * (1.0 - 0.21);

        let mut warnings = Vec::new();
        let analysis = if acquirer_income.is_null() {
            warnings.push(
                "no acquirer submitted; accretion modeled against all-cash standalone funding"
                    .to_string(),
            );
            json!({
                "mode": "standalone_cash",
                "target_net_income": num(&target_income, "net_income"),
                "after_tax_interest_drag": interest_drag,
                "net_earnings_impact": num(&target_income, "net_income") - interest_drag,
            })
        } else {
            let acquirer_net = num(&acquirer_income, "net_income");
            let acquirer_shares = num(&acquirer_income, "shares_outstanding");
            let stock_component = deal["consideration"]["stock"].as_f64().unwrap_or(0.0);
            let acquirer_price = financial["acquirer"]["profile"]["price"]
                .as_f64()
                .unwrap_or(0.0);
            let new_shares = if acquirer_price > 0.0 {
                stock_component / acquirer_price
            } else {
                0.0
            };

            let standalone_eps = if acquirer_shares > 0.0 {
                acquirer_net / acquirer_shares
            } else {
                0.0
            };
            let combined_eps = if acquirer_shares + new_shares > 0.0 {
                (acquirer_net + num(&target_income, "net_income") - interest_drag)
                    / (acquirer_shares + new_shares)
            } else {
                0.0
            };
            let accretion_pct = if standalone_eps != 0.0 {
                combined_eps / standalone_eps - 1.0
            } else {
                0.0
            };

            json!({
                "mode": "combined",
                "standalone_eps": standalone_eps,
                "combined_eps": combined_eps,
                "new_shares_issued": new_shares,
                "after_tax_interest_drag": interest_drag,
                "accretion_pct": accretion_pct,
            })
        };

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are a merger-model analyst."),
                    Message::user(format!(
                        "Accretion view: {}. One sentence verdict.",
                        analysis
                    )),
                ],
                &CallContext::new("accretion dilution / eps impact"),
            )
            .await?;

        let payload = json!({
            "analysis": analysis,
            "commentary": commentary,
            "findings": [
                {
                    "category": "deal_structure",
                    "subject": "earnings impact",
                    "detail": "accretion/dilution modeled against financing mix",
                }
            ],
        });

        state.write(keys::ACCRETION_DILUTION, payload.clone()).await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = warnings;
        Ok(result)
    }
}

//
// ================= Sources & Uses =================
//

pub struct SourcesUses;

#[async_trait]
impl Agent for SourcesUses {
    fn name(&self) -> &'static str {
        names::SOURCES_USES
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::DEAL_STRUCTURE]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::SOURCES_USES]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::DEAL_STRUCTURING]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let deal = state.read(keys::DEAL_STRUCTURE).await.unwrap_or_default();

        let offer = deal["offer_value"].as_f64().unwrap_or(0.0);
        let cash = deal["consideration"]["cash"].as_f64().unwrap_or(0.0);
        let stock = deal["consideration"]["stock"].as_f64().unwrap_or(0.0);
        let fees = FEE_RATE * offer;

        let uses_total = offer + fees;
        // Fees funded from incremental debt alongside the cash component
        let sources = json!({
            "new_debt": cash + fees,
            "equity_issued": stock,
        });
        let sources_total = cash + fees + stock;

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are building a sources-and-uses table."),
                    Message::user(format!(
                        "Uses {:.0} (offer {:.0} + fees {:.0}); sources {:.0}. \
                         One sentence on funding balance.",
                        uses_total, offer, fees, sources_total
                    )),
                ],
                &CallContext::new("sources uses / funding table"),
            )
            .await?;

        let payload = json!({
            "uses": { "purchase_price": offer, "advisory_fees": fees, "total": uses_total },
            "sources": sources,
            "sources_total": sources_total,
            "balanced": (sources_total - uses_total).abs() < 1e-6,
            "commentary": commentary,
        });

        state.write(keys::SOURCES_USES, payload.clone()).await?;
        Ok(AgentResult::ok(payload))
    }
}

//
// ================= Contribution Analysis =================
//

pub struct ContributionAnalysis;

#[async_trait]
impl Agent for ContributionAnalysis {
    fn name(&self) -> &'static str {
        names::CONTRIBUTION_ANALYSIS
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::DEAL_STRUCTURE]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::CONTRIBUTION_ANALYSIS]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::DEAL_STRUCTURING]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let financial = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();

        let target_income = latest_income(&financial, "target");
        let acquirer_income = latest_income(&financial, "acquirer");

        let mut warnings = Vec::new();
        let payload = if acquirer_income.is_null() {
            warnings.push("no acquirer submitted; contribution split unavailable".to_string());
            json!({
                "target": {
                    "revenue": num(&target_income, "revenue"),
                    "ebitda": num(&target_income, "ebitda"),
                },
                "acquirer": Value::Null,
                "split": Value::Null,
            })
        } else {
            let t_rev = num(&target_income, "revenue");
            let a_rev = num(&acquirer_income, "revenue");
            let t_ebitda = num(&target_income, "ebitda");
            let a_ebitda = num(&acquirer_income, "ebitda");
            json!({
                "target": { "revenue": t_rev, "ebitda": t_ebitda },
                "acquirer": { "revenue": a_rev, "ebitda": a_ebitda },
                "split": {
                    "revenue_target_pct": t_rev / (t_rev + a_rev).max(1e-9),
                    "ebitda_target_pct": t_ebitda / (t_ebitda + a_ebitda).max(1e-9),
                },
            })
        };

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are preparing a contribution analysis."),
                    Message::user(format!("Contribution view: {}. One sentence.", payload)),
                ],
                &CallContext::new("contribution analysis / relative scale"),
            )
            .await?;

        let payload = json!({
            "contribution": payload,
            "commentary": commentary,
        });

        state
            .write(keys::CONTRIBUTION_ANALYSIS, payload.clone())
            .await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = warnings;
        Ok(result)
    }
}

//
// ================= Exchange Ratio =================
//

pub struct ExchangeRatio;

#[async_trait]
impl Agent for ExchangeRatio {
    fn name(&self) -> &'static str {
        names::EXCHANGE_RATIO
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::DEAL_STRUCTURE]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::EXCHANGE_RATIO]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::DEAL_STRUCTURING]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let deal = state.read(keys::DEAL_STRUCTURE).await.unwrap_or_default();
        let financial = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();

        let target_income = latest_income(&financial, "target");
        let target_shares = num(&target_income, "shares_outstanding");
        let offer = deal["offer_value"].as_f64().unwrap_or(0.0);
        let offer_per_share = if target_shares > 0.0 {
            offer / target_shares
        } else {
            0.0
        };

        let acquirer_price = financial["acquirer"]["profile"]["price"].as_f64();

        let mut warnings = Vec::new();
        let ratio = match acquirer_price {
            Some(price) if price > 0.0 => json!(offer_per_share / price),
            _ => {
                warnings
                    .push("no acquirer share price; exchange ratio not computable".to_string());
                Value::Null
            }
        };

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are computing a stock-for-stock exchange ratio."),
                    Message::user(format!(
                        "Offer per target share {:.2}, acquirer price {:?}, ratio {}. \
                         One sentence.",
                        offer_per_share, acquirer_price, ratio
                    )),
                ],
                &CallContext::new("exchange ratio / share terms"),
            )
            .await?;

        let payload = json!({
            "offer_per_share": offer_per_share,
            "acquirer_price": acquirer_price,
            "exchange_ratio": ratio,
            "commentary": commentary,
        });

        state.write(keys::EXCHANGE_RATIO, payload.clone()).await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = warnings;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::deal_structuring::DealStructuring;
    use crate::agents::financial_analyst::FinancialAnalyst;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};
    use crate::agents::valuation::AdvancedValuation;
    use crate::state::AnalysisState;
    use std::sync::Arc;

    async fn structured_state(
        ctx: &crate::agents::AgentContext,
    ) -> Arc<AnalysisState> {
        let state = ingested_state(ctx).await;
        run_agent(&state, &FinancialAnalyst, ctx).await;
        run_agent(&state, &AdvancedValuation, ctx).await;
        run_agent(&state, &DealStructuring, ctx).await;
        state
    }

    #[tokio::test]
    async fn test_sources_and_uses_balance() {
        let ctx = stub_context();
        let state = structured_state(&ctx).await;

        let result = run_agent(&state, &SourcesUses, &ctx).await;
        assert!(result.errors.is_empty());

        let table = state.read(keys::SOURCES_USES).await.unwrap();
        assert_eq!(table["balanced"], true);
    }

    #[tokio::test]
    async fn test_acquirerless_views_warn_not_fabricate() {
        let ctx = stub_context();
        let state = structured_state(&ctx).await;

        let contribution = run_agent(&state, &ContributionAnalysis, &ctx).await;
        assert!(!contribution.warnings.is_empty());
        let stored = state.read(keys::CONTRIBUTION_ANALYSIS).await.unwrap();
        assert!(stored["contribution"]["split"].is_null());

        let exchange = run_agent(&state, &ExchangeRatio, &ctx).await;
        assert!(!exchange.warnings.is_empty());
        let stored = state.read(keys::EXCHANGE_RATIO).await.unwrap();
        assert!(stored["exchange_ratio"].is_null());
    }

    #[tokio::test]
    async fn test_combined_accretion_with_acquirer() {
        let mut ctx = stub_context();
        ctx.request.acquirer = Some("ACQ".to_string());
        let state = structured_state(&ctx).await;

        let result = run_agent(&state, &AccretionDilution, &ctx).await;
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());

        let stored = state.read(keys::ACCRETION_DILUTION).await.unwrap();
        assert_eq!(stored["analysis"]["mode"], "combined");
        assert!(stored["analysis"]["accretion_pct"].is_number());
    }
}
