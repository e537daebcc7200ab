//! Financial analyst agent
//!
//! Normalizes raw statements, scores data quality, excludes extreme-margin
//! years, computes simple and recency-weighted growth, and runs the
//! multi-scenario DCF with a Monte-Carlo distribution. Base-case outputs
//! are promoted to the root of the payload.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::error::DiligenceError;
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Exponential decay per year back for recency weighting
pub const RECENCY_DECAY: f64 = 0.85;

const EQUITY_RISK_PREMIUM: f64 = 0.055;
const TERMINAL_GROWTH: f64 = 0.025;
const PROJECTION_YEARS: u32 = 5;
const SCENARIO_SPREAD: f64 = 0.02;

//
// ================= Statement rows =================
//

#[derive(Debug, Clone)]
struct YearRow {
    year: i64,
    revenue: f64,
    operating_income: f64,
    net_income: f64,
    ebitda: f64,
    research_and_development: f64,
    unusual_items: f64,
    shares_outstanding: f64,
}

fn field(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn parse_rows(statements: &[Value]) -> (Vec<YearRow>, Vec<String>) {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();

    for statement in statements {
        let year = statement
            .get("calendar_year")
            .and_then(Value::as_i64)
            .or_else(|| {
                statement
                    .get("date")
                    .and_then(Value::as_str)
                    .and_then(|d| d.get(..4))
                    .and_then(|y| y.parse().ok())
            });

        let (Some(year), Some(revenue)) = (year, field(statement, "revenue")) else {
            warnings.push("income statement row missing year or revenue; skipped".to_string());
            continue;
        };

        if revenue == 0.0 {
            warnings.push(format!("year {} has zero revenue; skipped", year));
            continue;
        }

        rows.push(YearRow {
            year,
            revenue,
            operating_income: field(statement, "operating_income").unwrap_or(0.0),
            net_income: field(statement, "net_income").unwrap_or(0.0),
            ebitda: field(statement, "ebitda").unwrap_or(0.0),
            research_and_development: field(statement, "research_and_development")
                .unwrap_or(0.0),
            unusual_items: field(statement, "unusual_items").unwrap_or(0.0),
            shares_outstanding: field(statement, "shares_outstanding").unwrap_or(0.0),
        });
    }

    rows.sort_by_key(|r| r.year);
    (rows, warnings)
}

//
// ================= Growth math =================
//

/// Normalized exponential-decay weights; index 0 is the most recent
/// observation. Sums to 1.
pub fn recency_weights(count: usize, decay: f64) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    let raw: Vec<f64> = (0..count).map(|k| decay.powi(k as i32)).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

pub fn simple_cagr(first: f64, last: f64, periods: f64) -> Option<f64> {
    if first <= 0.0 || last <= 0.0 || periods <= 0.0 {
        return None;
    }
    Some((last / first).powf(1.0 / periods) - 1.0)
}

/// Weighted average of annualized growth observations, most recent first
pub fn weighted_growth(growths_recent_first: &[f64], decay: f64) -> Option<f64> {
    if growths_recent_first.is_empty() {
        return None;
    }
    let weights = recency_weights(growths_recent_first.len(), decay);
    Some(
        growths_recent_first
            .iter()
            .zip(&weights)
            .map(|(g, w)| g * w)
            .sum(),
    )
}

/// Annualized revenue growth between consecutive included years,
/// returned most recent first
fn growth_observations(rows: &[YearRow]) -> Vec<f64> {
    let mut growths = Vec::new();
    for pair in rows.windows(2) {
        let span = (pair[1].year - pair[0].year) as f64;
        if let Some(g) = simple_cagr(pair[0].revenue, pair[1].revenue, span) {
            growths.push(g);
        }
    }
    growths.reverse();
    growths
}

//
// ================= DCF =================

#[derive(Debug, Clone)]
pub struct DcfAssumptions {
    pub base_fcf: f64,
    pub growth: f64,
    pub wacc: f64,
    pub terminal_growth: f64,
    pub net_debt: f64,
    pub shares_outstanding: f64,
}

#[derive(Debug, Clone)]
pub struct DcfOutcome {
    pub enterprise_value: f64,
    pub equity_value: f64,
    pub equity_value_per_share: f64,
    pub wacc: f64,
    pub terminal_growth_rate: f64,
    pub projected_fcf: Vec<f64>,
    pub wacc_corrected: bool,
}

/// Five-year projection with Gordon-growth terminal value. Refuses to
/// discount with WACC at or below terminal growth; corrects to terminal
/// growth + 100bps and reports the correction.
pub fn run_dcf(mut assumptions: DcfAssumptions) -> DcfOutcome {
    let wacc_corrected = assumptions.wacc <= assumptions.terminal_growth;
    if wacc_corrected {
        assumptions.wacc = assumptions.terminal_growth + 0.01;
    }

    let mut enterprise_value = 0.0;
    let mut projected_fcf = Vec::with_capacity(PROJECTION_YEARS as usize);
    let mut fcf = assumptions.base_fcf;

    for year in 1..=PROJECTION_YEARS {
        fcf *= 1.0 + assumptions.growth;
        projected_fcf.push(fcf);
        enterprise_value += fcf / (1.0 + assumptions.wacc).powi(year as i32);
    }

    let terminal = fcf * (1.0 + assumptions.terminal_growth)
        / (assumptions.wacc - assumptions.terminal_growth);
    enterprise_value += terminal / (1.0 + assumptions.wacc).powi(PROJECTION_YEARS as i32);

    let equity_value = enterprise_value - assumptions.net_debt;
    let equity_value_per_share = if assumptions.shares_outstanding > 0.0 {
        equity_value / assumptions.shares_outstanding
    } else {
        0.0
    };

    DcfOutcome {
        enterprise_value,
        equity_value,
        equity_value_per_share,
        wacc: assumptions.wacc,
        terminal_growth_rate: assumptions.terminal_growth,
        projected_fcf,
        wacc_corrected,
    }
}

fn outcome_json(outcome: &DcfOutcome) -> Value {
    json!({
        "enterprise_value": outcome.enterprise_value,
        "equity_value": outcome.equity_value,
        "equity_value_per_share": outcome.equity_value_per_share,
        "wacc": outcome.wacc,
        "terminal_growth_rate": outcome.terminal_growth_rate,
        "projected_fcf": outcome.projected_fcf,
    })
}

/// Standard normal draw via Box-Muller
fn gaussian(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-12);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn monte_carlo(base: &DcfAssumptions, iterations: usize, seed: u64) -> Value {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(iterations);

    for _ in 0..iterations {
        let growth = base.growth + 0.02 * gaussian(&mut rng);
        let wacc =
            (base.wacc + 0.01 * gaussian(&mut rng)).max(base.terminal_growth + 0.0025);
        let outcome = run_dcf(DcfAssumptions {
            growth,
            wacc,
            ..base.clone()
        });
        samples.push(outcome.enterprise_value);
    }

    samples.sort_by(|a, b| a.partial_cmp(b).expect("finite sample"));
    let percentile = |p: f64| -> f64 {
        let idx = ((samples.len() - 1) as f64 * p).round() as usize;
        samples[idx]
    };
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;

    json!({
        "iterations": iterations,
        "seed": seed,
        "mean_enterprise_value": mean,
        "p10": percentile(0.10),
        "p50": percentile(0.50),
        "p90": percentile(0.90),
    })
}

//
// ================= Agent =================
//

pub struct FinancialAnalyst;

#[async_trait]
impl Agent for FinancialAnalyst {
    fn name(&self) -> &'static str {
        names::FINANCIAL_ANALYST
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::FINANCIAL_DATA]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[
            keys::NORMALIZED_FINANCIALS,
            keys::VALUATION_MODELS,
            keys::EBITDA,
            keys::ANOMALY_DETECTION,
        ]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    fn required(&self) -> bool {
        true
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let financial = state.read(keys::FINANCIAL_DATA).await.ok_or_else(|| {
            DiligenceError::AgentError {
                agent: self.name().to_string(),
                message: "financial_data absent".to_string(),
            }
        })?;

        let statements = financial["target"]["income_statements"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let (rows, mut warnings) = parse_rows(&statements);

        if rows.is_empty() {
            return Ok(AgentResult::fatal(
                "no usable income statement years for target",
            ));
        }

        let rd_rate = ctx.settings.rd_capitalization_rate;

        // ---- Normalize and exclude extreme-margin years ----
        let mut included = Vec::new();
        let mut normalized_years = Vec::new();
        let mut exclusions = Vec::new();
        let mut anomaly_flags = Vec::new();

        for row in &rows {
            let net_margin = row.net_income / row.revenue;
            let operating_margin = row.operating_income / row.revenue;

            if net_margin.abs() > 1.0 || operating_margin.abs() > 1.0 {
                let reason = format!(
                    "net margin {:.1}% / operating margin {:.1}% beyond ±100%",
                    net_margin * 100.0,
                    operating_margin * 100.0
                );
                state
                    .anomaly(
                        "extreme_margin_year",
                        &format!("year {} excluded: {}", row.year, reason),
                    )
                    .await;
                anomaly_flags.push(json!({
                    "year": row.year,
                    "kind": "extreme_margin",
                    "detail": reason,
                }));
                exclusions.push(json!({
                    "year": row.year,
                    "reason": reason,
                    "net_margin": net_margin,
                    "operating_margin": operating_margin,
                }));
                continue;
            }

            if row.unusual_items.abs() > 0.1 * row.revenue {
                anomaly_flags.push(json!({
                    "year": row.year,
                    "kind": "large_nonrecurring_item",
                    "detail": format!("unusual items {:.0} vs revenue {:.0}",
                        row.unusual_items, row.revenue),
                }));
            }

            // Remove non-recurring items; capitalize a portion of R&D
            let capitalized_rd = rd_rate * row.research_and_development;
            let adjusted_net = row.net_income - row.unusual_items;
            let adjusted_operating = row.operating_income - row.unusual_items + capitalized_rd;
            let normalized_ebitda = row.ebitda - row.unusual_items;

            normalized_years.push(json!({
                "year": row.year,
                "revenue": row.revenue,
                "reported_net_income": row.net_income,
                "adjusted_net_income": adjusted_net,
                "reported_operating_income": row.operating_income,
                "adjusted_operating_income": adjusted_operating,
                "normalized_ebitda": normalized_ebitda,
                "net_margin": net_margin,
                "operating_margin": operating_margin,
                "capitalized_rd": capitalized_rd,
            }));
            included.push(row.clone());
        }

        if included.len() < 2 {
            return Ok(AgentResult::fatal(format!(
                "only {} usable year(s) after exclusions; cannot model growth",
                included.len()
            )));
        }

        let excluded_years: Vec<i64> = rows
            .iter()
            .filter(|r| !included.iter().any(|i| i.year == r.year))
            .map(|r| r.year)
            .collect();

        if !excluded_years.is_empty() {
            warnings.push(format!(
                "excluded extreme-margin year(s): {:?}",
                excluded_years
            ));
        }

        let quality_score = (100.0
            - 15.0 * excluded_years.len() as f64
            - 5.0 * (statements.len() - rows.len()) as f64)
            .clamp(0.0, 100.0);

        // ---- Growth ----
        let first = included.first().expect("non-empty");
        let last = included.last().expect("non-empty");
        let span = (last.year - first.year) as f64;
        let cagr = simple_cagr(first.revenue, last.revenue, span).unwrap_or(0.0);

        let growths = growth_observations(&included);
        let weights = recency_weights(growths.len(), RECENCY_DECAY);
        let weighted_cagr = weighted_growth(&growths, RECENCY_DECAY).unwrap_or(cagr);

        debug!(
            agent = self.name(),
            simple_cagr = cagr,
            weighted_cagr,
            excluded = excluded_years.len(),
            "growth computed"
        );

        // ---- DCF ----
        let latest_ebitda = normalized_years
            .last()
            .and_then(|y| y["normalized_ebitda"].as_f64())
            .unwrap_or(0.0);

        let base_fcf = financial["target"]["cash_flows"]
            .as_array()
            .and_then(|flows| flows.first())
            .and_then(|f| f.get("free_cash_flow"))
            .and_then(Value::as_f64)
            .unwrap_or_else(|| {
                warnings.push(
                    "no free cash flow statement; approximating from normalized EBITDA"
                        .to_string(),
                );
                latest_ebitda * 0.55
            });

        let balance = financial["target"]["balance_sheets"]
            .as_array()
            .and_then(|sheets| sheets.first())
            .cloned()
            .unwrap_or(Value::Null);
        let net_debt = field(&balance, "total_debt").unwrap_or(0.0)
            - field(&balance, "cash_and_equivalents").unwrap_or(0.0);

        let beta = financial["target"]["profile"]["beta"]
            .as_f64()
            .unwrap_or(1.0);
        let risk_free = financial["treasury_rates"]["year10"]
            .as_f64()
            .map(|r| r / 100.0)
            .unwrap_or(0.04);
        let wacc = risk_free + beta * EQUITY_RISK_PREMIUM;

        let growth_base = weighted_cagr.clamp(-0.05, 0.12);
        let base_assumptions = DcfAssumptions {
            base_fcf,
            growth: growth_base,
            wacc,
            terminal_growth: TERMINAL_GROWTH,
            net_debt,
            shares_outstanding: last.shares_outstanding,
        };

        let base = run_dcf(base_assumptions.clone());
        if base.wacc_corrected {
            warnings.push(format!(
                "WACC {:.2}% did not exceed terminal growth {:.2}%; corrected to terminal + 100bps",
                wacc * 100.0,
                TERMINAL_GROWTH * 100.0
            ));
            state
                .anomaly(
                    "dcf_assumption_correction",
                    "WACC at or below terminal growth; corrected by +100bps",
                )
                .await;
        }

        let optimistic = run_dcf(DcfAssumptions {
            growth: growth_base + SCENARIO_SPREAD,
            ..base_assumptions.clone()
        });
        let pessimistic = run_dcf(DcfAssumptions {
            growth: growth_base - SCENARIO_SPREAD,
            ..base_assumptions.clone()
        });

        let distribution = monte_carlo(
            &DcfAssumptions {
                wacc: base.wacc,
                ..base_assumptions.clone()
            },
            ctx.settings.monte_carlo_iterations,
            ctx.settings.monte_carlo_seed,
        );

        // ---- Narrative ----
        let prompt = format!(
            "Interpret this discounted cash flow result for {}.\n\
             Base enterprise value: {:.0}\nWACC: {:.4}\nTerminal growth: {:.4}\n\
             Recency-weighted revenue CAGR: {:.4}\nData quality score: {:.0}/100.\n\
             Give a short, factual interpretation for a diligence report.",
            ctx.request.target, base.enterprise_value, base.wacc,
            base.terminal_growth_rate, weighted_cagr, quality_score,
        );
        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are a valuation analyst on an M&A diligence team."),
                    Message::user(prompt),
                ],
                &CallContext::new("financial analysis / dcf interpretation"),
            )
            .await?;

        // ---- Commit state ----
        let normalized = json!({
            "years": normalized_years,
            "exclusions": exclusions,
            "metadata": {
                "quality_score": quality_score,
                "extreme_margin_years": excluded_years,
                "rd_capitalization_rate": rd_rate,
                "included_year_count": included.len(),
            },
            "growth": {
                "simple_cagr": cagr,
                "weighted_cagr": weighted_cagr,
                "recency_weights": weights,
                "decay": RECENCY_DECAY,
            },
        });

        let valuation = json!({
            "dcf": {
                "scenarios": {
                    "base": outcome_json(&base),
                    "optimistic": outcome_json(&optimistic),
                    "pessimistic": outcome_json(&pessimistic),
                },
                "monte_carlo": distribution,
                "assumptions": {
                    "base_fcf": base_fcf,
                    "growth_base": growth_base,
                    "wacc": base.wacc,
                    "terminal_growth": TERMINAL_GROWTH,
                    "net_debt": net_debt,
                    "shares_outstanding": last.shares_outstanding,
                },
            },
        });

        state.write(keys::NORMALIZED_FINANCIALS, normalized.clone()).await?;
        state.write(keys::VALUATION_MODELS, valuation.clone()).await?;
        state
            .write(
                keys::EBITDA,
                json!({
                    "normalized_ebitda": latest_ebitda,
                    "by_year": normalized_years
                        .iter()
                        .map(|y| json!({"year": y["year"], "ebitda": y["normalized_ebitda"]}))
                        .collect::<Vec<_>>(),
                }),
            )
            .await?;
        state
            .write(keys::ANOMALY_DETECTION, json!({ "flags": anomaly_flags }))
            .await?;

        if let Some(latest_reported) = rows.last() {
            if excluded_years.contains(&latest_reported.year) {
                warn!(agent = self.name(), "latest reported fiscal year was excluded");
            }
        }

        // Base-case DCF outputs promoted to the payload root
        let mut result = AgentResult::ok(json!({
            "enterprise_value": base.enterprise_value,
            "equity_value": base.equity_value,
            "equity_value_per_share": base.equity_value_per_share,
            "wacc": base.wacc,
            "terminal_growth_rate": base.terminal_growth_rate,
            "normalized_ebitda": latest_ebitda,
            "quality_score": quality_score,
            "dcf_outputs": valuation["dcf"].clone(),
            "normalized_financials": normalized,
            "commentary": commentary,
            "findings": [
                {
                    "category": "valuation",
                    "subject": format!("{} enterprise value", ctx.request.target),
                    "detail": format!("Base-case DCF enterprise value {:.0}", base.enterprise_value),
                }
            ],
        }));
        result.warnings = warnings;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};
    use crate::state::keys;

    #[test]
    fn test_recency_weights_normalize() {
        for count in [1, 3, 6, 12] {
            let weights = recency_weights(count, RECENCY_DECAY);
            let sum: f64 = weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "count {}: sum {}", count, sum);
        }
        // Most recent observation dominates
        let weights = recency_weights(4, RECENCY_DECAY);
        assert!(weights[0] > weights[1] && weights[1] > weights[2]);
    }

    #[test]
    fn test_weighted_growth_formula() {
        let growths = [0.10, 0.05, 0.20];
        let weights = recency_weights(3, RECENCY_DECAY);
        let expected: f64 = growths.iter().zip(&weights).map(|(g, w)| g * w).sum();

        let actual = weighted_growth(&growths, RECENCY_DECAY).unwrap();
        assert!((actual - expected).abs() < 1e-12);

        // And it differs from the unweighted mean
        let unweighted = growths.iter().sum::<f64>() / 3.0;
        assert!((actual - unweighted).abs() > 1e-6);
    }

    #[test]
    fn test_simple_cagr() {
        let cagr = simple_cagr(100.0, 200.0, 2.0).unwrap();
        assert!((cagr - (2.0f64.sqrt() - 1.0)).abs() < 1e-12);
        assert!(simple_cagr(0.0, 200.0, 2.0).is_none());
    }

    #[test]
    fn test_dcf_refuses_wacc_at_terminal_growth() {
        let outcome = run_dcf(DcfAssumptions {
            base_fcf: 1_000.0,
            growth: 0.05,
            wacc: 0.025,
            terminal_growth: 0.025,
            net_debt: 0.0,
            shares_outstanding: 100.0,
        });

        assert!(outcome.wacc_corrected);
        assert!((outcome.wacc - 0.035).abs() < 1e-12);
        assert!(outcome.enterprise_value.is_finite());
        assert!(outcome.enterprise_value > 0.0);
    }

    #[test]
    fn test_monte_carlo_is_seed_deterministic() {
        let assumptions = DcfAssumptions {
            base_fcf: 1_000.0,
            growth: 0.06,
            wacc: 0.10,
            terminal_growth: 0.025,
            net_debt: 100.0,
            shares_outstanding: 100.0,
        };

        let a = monte_carlo(&assumptions, 200, 42);
        let b = monte_carlo(&assumptions, 200, 42);
        assert_eq!(a, b);

        let c = monte_carlo(&assumptions, 200, 43);
        assert_ne!(a["mean_enterprise_value"], c["mean_enterprise_value"]);
    }

    #[tokio::test]
    async fn test_extreme_margin_year_is_excluded() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;

        let result = run_agent(&state, &FinancialAnalyst, &ctx).await;
        assert!(result.errors.is_empty(), "errors: {:?}", result.errors);

        let normalized = state.read(keys::NORMALIZED_FINANCIALS).await.unwrap();
        let exclusions = normalized["exclusions"].as_array().unwrap();
        assert_eq!(exclusions.len(), 1);
        assert_eq!(exclusions[0]["year"], 2020);
        let net_margin = exclusions[0]["net_margin"].as_f64().unwrap();
        assert!((net_margin - (-1.067)).abs() < 1e-9);

        // Flagged in metadata and kept out of the modeled years
        assert_eq!(normalized["metadata"]["extreme_margin_years"][0], 2020);
        assert!(normalized["years"]
            .as_array()
            .unwrap()
            .iter()
            .all(|y| y["year"] != 2020));
    }

    #[tokio::test]
    async fn test_base_case_promoted_to_payload_root() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;

        let result = run_agent(&state, &FinancialAnalyst, &ctx).await;

        let ev = result.payload["enterprise_value"].as_f64().unwrap();
        assert!(ev > 0.0);
        assert_eq!(
            result.payload["dcf_outputs"]["scenarios"]["base"]["enterprise_value"]
                .as_f64()
                .unwrap(),
            ev
        );
        assert!(result.payload["wacc"].as_f64().unwrap() > 0.0);
        assert!(result.payload["normalized_ebitda"].as_f64().unwrap() > 0.0);

        // Scenario ordering holds
        let optimistic = result.payload["dcf_outputs"]["scenarios"]["optimistic"]
            ["enterprise_value"]
            .as_f64()
            .unwrap();
        let pessimistic = result.payload["dcf_outputs"]["scenarios"]["pessimistic"]
            ["enterprise_value"]
            .as_f64()
            .unwrap();
        assert!(optimistic > ev && ev > pessimistic);
    }

    #[tokio::test]
    async fn test_too_few_usable_years_is_fatal() {
        use crate::agents::testutil::stub_context_with_market;
        use crate::providers::StubMarketData;
        use serde_json::json;

        // Every year but one breaches the ±100% margin bound
        let statements = vec![
            json!({"calendar_year": 2024, "revenue": 100.0, "operating_income": 20.0,
                   "net_income": 15.0, "ebitda": 30.0, "shares_outstanding": 10.0}),
            json!({"calendar_year": 2023, "revenue": 100.0, "operating_income": -150.0,
                   "net_income": -160.0, "ebitda": -120.0, "shares_outstanding": 10.0}),
            json!({"calendar_year": 2022, "revenue": 100.0, "operating_income": -130.0,
                   "net_income": -145.0, "ebitda": -110.0, "shares_outstanding": 10.0}),
        ];
        let ctx =
            stub_context_with_market(StubMarketData::new().with_income_statements(statements));
        let state = ingested_state(&ctx).await;

        let result = run_agent(&state, &FinancialAnalyst, &ctx).await;
        assert!(!result.errors.is_empty());
        assert!(result.errors[0].contains("usable year"));
        assert!(state.read(keys::NORMALIZED_FINANCIALS).await.is_none());
    }

    #[tokio::test]
    async fn test_weights_in_state_sum_to_one() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;
        run_agent(&state, &FinancialAnalyst, &ctx).await;

        let normalized = state.read(keys::NORMALIZED_FINANCIALS).await.unwrap();
        let weights: Vec<f64> = normalized["growth"]["recency_weights"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
