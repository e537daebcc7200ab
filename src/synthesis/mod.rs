//! Synthesis agent
//!
//! Consolidates every committed agent output into `synthesized_data`, the
//! single source of truth for rendering. Collect → serialize tables →
//! deduplicate findings → extract fixed-schema sections → annotate deal
//! value → stamp version metadata → commit exactly once.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::models::AgentRecord;
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Schema version of the consolidated document. The dual dcf_outputs shape
/// (nested scenarios plus root promotion) is the stable contract; schema
/// migrations bump this and keep both shapes until consumers move.
pub const DATA_VERSION: &str = "2.1";

/// Declared synthesis sources; the coverage denominator
pub const SYNTHESIS_SOURCES: &[&str] = &[
    names::FINANCIAL_ANALYST,
    names::FINANCIAL_DEEP_DIVE,
    names::ADVANCED_VALUATION,
    names::COMPETITIVE_BENCHMARKING,
    names::LEGAL_COUNSEL,
    names::MARKET_STRATEGIST,
    names::MACRO_ANALYST,
    names::RISK_ASSESSMENT,
    names::TAX_STRUCTURING,
    names::DEAL_STRUCTURING,
    names::ACCRETION_DILUTION,
    names::INTEGRATION_PLANNER,
    names::EXTERNAL_VALIDATOR,
];

//
// ================= Table serialization =================
//

/// True for a columnar mapping: every value is an array and all arrays
/// share one non-zero length.
fn is_columnar(map: &Map<String, Value>) -> bool {
    if map.len() < 2 {
        return false;
    }
    let mut len = None;
    for value in map.values() {
        match value {
            Value::Array(column) if !column.is_empty() => match len {
                None => len = Some(column.len()),
                Some(l) if l == column.len() => {}
                _ => return false,
            },
            _ => return false,
        }
    }
    true
}

/// Recursively convert tabular (columnar) values into ordered lists of
/// records so the document round-trips through JSON deterministically.
pub fn normalize_tables(value: &Value) -> Value {
    match value {
        Value::Object(map) if is_columnar(map) => {
            let columns: BTreeMap<&String, &Vec<Value>> = map
                .iter()
                .map(|(k, v)| (k, v.as_array().expect("columnar")))
                .collect();
            let rows = columns.values().next().map(|c| c.len()).unwrap_or(0);

            let records = (0..rows)
                .map(|i| {
                    let mut record = Map::new();
                    for (key, column) in &columns {
                        record.insert((*key).clone(), normalize_tables(&column[i]));
                    }
                    Value::Object(record)
                })
                .collect();
            Value::Array(records)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_tables(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize_tables).collect()),
        other => other.clone(),
    }
}

//
// ================= Finding deduplication =================
//

/// Canonical subject: lowercased, alphanumeric words, single spaces.
/// Documented so deduplication stays reproducible.
pub fn canonical_subject(subject: &str) -> String {
    subject
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Merge semantically equal findings (same category + canonical subject),
/// attributing each merged finding to all contributing agents.
pub fn dedupe_findings(records: &[AgentRecord]) -> (Vec<Value>, usize) {
    let mut merged: BTreeMap<(String, String), (Value, Vec<String>)> = BTreeMap::new();
    let mut total = 0usize;

    for record in records {
        let Some(findings) = record.payload.get("findings").and_then(Value::as_array) else {
            continue;
        };
        for finding in findings {
            let category = finding["category"].as_str().unwrap_or("general").to_string();
            let subject = finding["subject"].as_str().unwrap_or_default();
            total += 1;

            let key = (category, canonical_subject(subject));
            merged
                .entry(key)
                .and_modify(|(_, agents)| agents.push(record.agent.clone()))
                .or_insert_with(|| (finding.clone(), vec![record.agent.clone()]));
        }
    }

    let findings = merged
        .into_values()
        .map(|(finding, agents)| {
            let mut out = finding.as_object().cloned().unwrap_or_default();
            out.insert("attributed_to".to_string(), json!(agents));
            Value::Object(out)
        })
        .collect::<Vec<_>>();

    let merged_away = total - findings.len();
    (findings, merged_away)
}

//
// ================= Section helpers =================
//

fn is_placeholder(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a")
        }
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn document_hash(doc: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(doc).unwrap_or_default());
    hex::encode(hasher.finalize())
}

//
// ================= Agent =================
//

pub struct SynthesisAgent;

#[async_trait]
impl Agent for SynthesisAgent {
    fn name(&self) -> &'static str {
        names::SYNTHESIS
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::NORMALIZED_FINANCIALS]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::SYNTHESIZED_DATA]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[names::EXTERNAL_VALIDATOR]
    }

    fn required(&self) -> bool {
        true
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        // ---- Collect ----
        let mut warnings = Vec::new();
        let mut records: Vec<AgentRecord> = Vec::new();
        let mut missing: Vec<&str> = Vec::new();

        for name in SYNTHESIS_SOURCES.iter().copied() {
            match state.record_for(name).await {
                Some(record) => records.push(record),
                None => {
                    missing.push(name);
                    warnings.push(format!(
                        "agent '{}' produced no record; its sections stay unpopulated",
                        name
                    ));
                }
            }
        }

        let normalized_financials = state.read(keys::NORMALIZED_FINANCIALS).await;

        let analyst = records
            .iter()
            .find(|r| r.agent == names::FINANCIAL_ANALYST)
            .cloned();

        // A missing required input section is fatal; no partial document.
        let (Some(analyst), Some(normalized_financials)) = (analyst, normalized_financials)
        else {
            return Ok(AgentResult::fatal(
                "financial analyst output missing; cannot consolidate without valuation",
            ));
        };

        // ---- Serialize ----
        for record in &mut records {
            record.payload = normalize_tables(&record.payload);
        }
        let analyst_payload = normalize_tables(&analyst.payload);

        // ---- Deduplicate ----
        let (findings, merged_count) = dedupe_findings(&records);

        let payload_of = |name: &str| -> Value {
            records
                .iter()
                .find(|r| r.agent == name)
                .map(|r| r.payload.clone())
                .unwrap_or(Value::Null)
        };

        // ---- detailed_financials: dual-shape dcf_outputs ----
        let scenarios = analyst_payload["dcf_outputs"]["scenarios"].clone();
        let base = &scenarios["base"];
        let mut dcf_outputs = Map::new();
        dcf_outputs.insert("scenarios".to_string(), scenarios.clone());
        dcf_outputs.insert(
            "monte_carlo".to_string(),
            analyst_payload["dcf_outputs"]["monte_carlo"].clone(),
        );
        for field in [
            "enterprise_value",
            "equity_value",
            "equity_value_per_share",
            "wacc",
            "terminal_growth_rate",
        ] {
            dcf_outputs.insert(field.to_string(), base[field].clone());
        }

        // normalized_ebitda must be a number; fall back to the raw latest
        // income statement, then to 0 with a warning.
        let financial_data = state.read(keys::FINANCIAL_DATA).await.unwrap_or_default();
        let normalized_ebitda = state
            .read(keys::EBITDA)
            .await
            .and_then(|e| e["normalized_ebitda"].as_f64())
            .or_else(|| {
                financial_data["target"]["income_statements"]
                    .as_array()
                    .and_then(|s| s.first())
                    .and_then(|s| s["ebitda"].as_f64())
            })
            .unwrap_or_else(|| {
                warnings.push(
                    "normalized EBITDA unavailable from any source; reporting 0".to_string(),
                );
                0.0
            });

        let detailed_financials = json!({
            "dcf_outputs": Value::Object(dcf_outputs),
            "normalized_ebitda": normalized_ebitda,
            "normalized_financials": normalize_tables(&normalized_financials),
            "quality_score": analyst_payload["quality_score"],
            "deep_dive": payload_of(names::FINANCIAL_DEEP_DIVE),
            "advanced_valuation": payload_of(names::ADVANCED_VALUATION),
        });

        // ---- market_analysis: prefer real agent data over placeholders ----
        let mut market = payload_of(names::MARKET_STRATEGIST);
        let competitive = payload_of(names::COMPETITIVE_BENCHMARKING);
        if is_placeholder(&market["competitive_landscape"]) && !is_placeholder(&competitive) {
            if let Some(map) = market.as_object_mut() {
                map.insert("competitive_landscape".to_string(), competitive.clone());
            } else {
                market = json!({ "competitive_landscape": competitive });
            }
        }

        // ---- risk_macro: surface emptiness, never fabricate ----
        let macro_payload = payload_of(names::MACRO_ANALYST);
        let risk_macro = json!({
            "risk_assessment": payload_of(names::RISK_ASSESSMENT),
            "scenario_models": macro_payload.get("scenario_models").cloned()
                .unwrap_or(Value::Null),
            "correlation_analysis": macro_payload.get("correlation_analysis").cloned()
                .unwrap_or(Value::Null),
            "sensitivity_analysis": macro_payload.get("sensitivity_analysis").cloned()
                .unwrap_or(Value::Null),
        });
        if macro_payload.is_null() {
            warnings.push("macro analysis unavailable; risk_macro extractions empty".to_string());
        }

        // ---- Deal value annotation ----
        let dcf_base_ev = base["enterprise_value"].as_f64().unwrap_or(0.0);
        let deal_value = match ctx.request.deal_value {
            Some(value) => {
                let variance_pct = if dcf_base_ev != 0.0 {
                    (value - dcf_base_ev) / dcf_base_ev * 100.0
                } else {
                    0.0
                };
                json!({
                    "value": value,
                    "source": "user_provided",
                    "variance_vs_dcf_pct": variance_pct,
                })
            }
            None => json!({
                "value": dcf_base_ev,
                "source": "auto_calculated",
                "scenario_range": {
                    "pessimistic": scenarios["pessimistic"]["enterprise_value"],
                    "base": scenarios["base"]["enterprise_value"],
                    "optimistic": scenarios["optimistic"]["enterprise_value"],
                },
            }),
        };

        // ---- Executive summary ----
        let highlights: Vec<Value> = records
            .iter()
            .filter_map(|r| {
                r.payload
                    .get("commentary")
                    .and_then(Value::as_str)
                    .map(|c| json!({"agent": r.agent, "comment": c}))
            })
            .collect();
        let executive_summary = json!({
            "target": ctx.request.target,
            "acquirer": ctx.request.acquirer,
            "thesis": ctx.request.thesis,
            "highlights": highlights,
            "findings": findings,
        });

        // ---- Stamp and commit ----
        let contributing: Vec<&str> = SYNTHESIS_SOURCES
            .iter()
            .filter(|n| !missing.contains(n))
            .copied()
            .collect();

        let mut doc = json!({
            "data_version": DATA_VERSION,
            "consolidated_timestamp": Utc::now().to_rfc3339(),
            "metadata": {
                "agent_coverage": contributing.len(),
                "declared_agents": SYNTHESIS_SOURCES.len(),
                "data_version": DATA_VERSION,
                "deal_value": deal_value,
                "synthesis_metadata": {
                    "contributing_agents": contributing,
                    "missing_agents": missing.clone(),
                    "deduplicated_findings": findings.len(),
                    "merged_findings": merged_count,
                },
            },
            "executive_summary": executive_summary,
            "detailed_financials": detailed_financials,
            "legal_diligence": payload_of(names::LEGAL_COUNSEL),
            "market_analysis": market,
            "risk_macro": risk_macro,
            "validation_summary": payload_of(names::EXTERNAL_VALIDATOR),
            "integration_blueprint": payload_of(names::INTEGRATION_PLANNER),
            "tax_structure": payload_of(names::TAX_STRUCTURING),
        });

        let hash = document_hash(&doc);
        doc["metadata"]["document_hash"] = json!(hash);

        state.write(keys::SYNTHESIZED_DATA, doc.clone()).await?;

        info!(
            coverage = doc["metadata"]["agent_coverage"].as_u64(),
            merged = merged_count,
            "synthesized document committed"
        );
        if !missing.is_empty() {
            warn!(?missing, "synthesis ran with missing agent records");
        }

        let mut result = AgentResult::ok(doc);
        result.warnings = warnings;
        Ok(result)
    }
}

/// Re-derive the integrity hash of a committed document; the stored hash
/// covers the document without the hash field itself.
pub fn verify_document_hash(doc: &Value) -> bool {
    let Some(stored) = doc["metadata"]["document_hash"].as_str() else {
        return false;
    };
    let mut stripped = doc.clone();
    if let Some(metadata) = stripped["metadata"].as_object_mut() {
        metadata.remove("document_hash");
    }
    document_hash(&stripped) == stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};
    use crate::agents::{create_default_registry, AgentContext};
    use crate::models::AgentOutcome;
    use crate::state::AnalysisState;
    use std::sync::Arc;

    async fn full_state(ctx: &AgentContext) -> Arc<AnalysisState> {
        let state = ingested_state(ctx).await;
        let registry = create_default_registry();
        for wave in registry.waves().unwrap() {
            for agent in wave {
                run_agent(&state, agent.as_ref(), ctx).await;
            }
        }
        state
    }

    #[test]
    fn test_normalize_tables_converts_columnar() {
        let table = json!({
            "year": [2022, 2023],
            "revenue": [10.0, 12.0],
        });

        let normalized = normalize_tables(&table);
        assert_eq!(
            normalized,
            json!([
                {"revenue": 10.0, "year": 2022},
                {"revenue": 12.0, "year": 2023},
            ])
        );

        // Deterministic and round-trippable
        let text = serde_json::to_string(&normalized).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, normalized);
        assert_eq!(normalize_tables(&normalized), normalized);
    }

    #[test]
    fn test_normalize_tables_leaves_plain_objects() {
        let value = json!({"a": 1, "b": [1, 2], "nested": {"x": [1], "y": [2]}});
        let normalized = normalize_tables(&value);
        assert_eq!(normalized["a"], 1);
        assert_eq!(normalized["b"], json!([1, 2]));
    }

    #[test]
    fn test_canonical_subject() {
        assert_eq!(
            canonical_subject("  TGT — Enterprise   Value!"),
            "tgt enterprise value"
        );
        assert_eq!(
            canonical_subject("TGT enterprise value"),
            canonical_subject("tgt Enterprise VALUE")
        );
    }

    #[test]
    fn test_dedupe_attributes_all_contributors() {
        let record = |agent: &str, subject: &str| AgentRecord {
            agent: agent.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            status: AgentOutcome::Ok,
            payload: json!({"findings": [
                {"category": "valuation", "subject": subject, "detail": "d"}
            ]}),
            warnings: vec![],
            errors: vec![],
            recommendations: vec![],
        };

        let records = vec![
            record("financial-analyst", "TGT enterprise value"),
            record("advanced-valuation", "tgt Enterprise Value"),
            record("risk-assessment", "composite risk"),
        ];

        let (findings, merged) = dedupe_findings(&records);
        assert_eq!(findings.len(), 2);
        assert_eq!(merged, 1);

        let valuation = findings
            .iter()
            .find(|f| f["category"] == "valuation")
            .unwrap();
        let attributed = valuation["attributed_to"].as_array().unwrap();
        assert_eq!(attributed.len(), 2);
    }

    #[tokio::test]
    async fn test_synthesis_commits_dual_shape() {
        let ctx = stub_context();
        let state = full_state(&ctx).await;

        let synthesis = SynthesisAgent;
        let handle = state.handle(synthesis.name(), synthesis.produced_outputs());
        let result = synthesis.execute(&handle, &ctx).await.unwrap();
        assert_eq!(result.outcome(), AgentOutcome::Ok);

        let doc = state.synthesized().await.unwrap();
        let dcf = &doc["detailed_financials"]["dcf_outputs"];

        // Root promotion and nested scenarios agree
        let root_ev = dcf["enterprise_value"].as_f64().unwrap();
        let nested_ev = dcf["scenarios"]["base"]["enterprise_value"].as_f64().unwrap();
        assert_eq!(root_ev, nested_ev);
        assert!(dcf["wacc"].as_f64().unwrap() > 0.0);

        assert!(doc["detailed_financials"]["normalized_ebitda"].is_number());
        assert_eq!(doc["data_version"], DATA_VERSION);
        assert_eq!(doc["metadata"]["agent_coverage"], 13);
        assert!(verify_document_hash(&doc));
    }

    #[tokio::test]
    async fn test_synthesis_round_trips_through_json() {
        let ctx = stub_context();
        let state = full_state(&ctx).await;

        let synthesis = SynthesisAgent;
        let handle = state.handle(synthesis.name(), synthesis.produced_outputs());
        synthesis.execute(&handle, &ctx).await.unwrap();

        let doc = state.synthesized().await.unwrap();
        let text = serde_json::to_string(&doc).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, doc);
    }

    #[tokio::test]
    async fn test_competitive_fallback_prefers_real_agent_data() {
        let ctx = stub_context();
        let state = full_state(&ctx).await;

        let synthesis = SynthesisAgent;
        let handle = state.handle(synthesis.name(), synthesis.produced_outputs());
        synthesis.execute(&handle, &ctx).await.unwrap();

        let doc = state.synthesized().await.unwrap();
        // The strategist wrote "N/A"; synthesis swapped in the benchmarking record
        let landscape = &doc["market_analysis"]["competitive_landscape"];
        assert!(landscape.is_object());
        assert!(landscape["peer_group"].is_array());
    }

    #[tokio::test]
    async fn test_missing_analyst_is_fatal_without_commit() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;
        // No agents ran; normalized_financials absent

        let synthesis = SynthesisAgent;
        let handle = state.handle(synthesis.name(), synthesis.produced_outputs());
        let result = synthesis.execute(&handle, &ctx).await.unwrap();

        assert_eq!(result.outcome(), AgentOutcome::Error);
        assert!(state.synthesized().await.is_err());
    }

    #[tokio::test]
    async fn test_deal_value_auto_calculated() {
        let ctx = stub_context();
        let state = full_state(&ctx).await;

        let synthesis = SynthesisAgent;
        let handle = state.handle(synthesis.name(), synthesis.produced_outputs());
        synthesis.execute(&handle, &ctx).await.unwrap();

        let doc = state.synthesized().await.unwrap();
        let deal = &doc["metadata"]["deal_value"];
        assert_eq!(deal["source"], "auto_calculated");
        assert_eq!(
            deal["value"],
            doc["detailed_financials"]["dcf_outputs"]["enterprise_value"]
        );
        assert!(deal["scenario_range"]["optimistic"].is_number());
    }

    #[tokio::test]
    async fn test_deal_value_user_provided_with_variance() {
        let mut ctx = stub_context();
        ctx.request.deal_value = Some(1_000_000.0);
        let state = full_state(&ctx).await;

        let synthesis = SynthesisAgent;
        let handle = state.handle(synthesis.name(), synthesis.produced_outputs());
        synthesis.execute(&handle, &ctx).await.unwrap();

        let doc = state.synthesized().await.unwrap();
        let deal = &doc["metadata"]["deal_value"];
        assert_eq!(deal["source"], "user_provided");
        assert_eq!(deal["value"], 1_000_000.0);
        assert!(deal["variance_vs_dcf_pct"].is_number());
    }
}
