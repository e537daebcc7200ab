//! Pre-report consistency validator
//!
//! Guards the boundary between synthesis and any downstream consumer.
//! Rules-based and deterministic: the same document yields the same issue
//! list. A single critical blocker fails the job.

use crate::models::{Severity, ValidationIssue, ValidationReport};
use crate::synthesis::SYNTHESIS_SOURCES;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub coverage_floor: usize,
    pub declared_agents: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            coverage_floor: 10,
            declared_agents: SYNTHESIS_SOURCES.len(),
        }
    }
}

/// One consistency rule over the synthesized document
pub trait ConsistencyCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issues found; empty means the check passed
    fn check(&self, doc: &Value, config: &ValidatorConfig) -> Vec<ValidationIssue>;
}

fn issue(severity: Severity, description: impl Into<String>, remediation: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        severity,
        description: description.into(),
        remediation: remediation.into(),
    }
}

//
// ================= Checks =================
//

/// synthesized_data must exist at all
pub struct SynthesizedPresent;

impl ConsistencyCheck for SynthesizedPresent {
    fn name(&self) -> &'static str {
        "synthesized_data_present"
    }

    fn check(&self, doc: &Value, _config: &ValidatorConfig) -> Vec<ValidationIssue> {
        if doc.is_null() {
            vec![issue(
                Severity::CriticalBlocker,
                "synthesized_data is absent",
                "synthesis must commit before validation; rerun the pipeline",
            )]
        } else {
            Vec::new()
        }
    }
}

const REQUIRED_SECTIONS: &[&str] = &[
    "executive_summary",
    "detailed_financials",
    "legal_diligence",
    "market_analysis",
    "risk_macro",
    "validation_summary",
    "integration_blueprint",
    "tax_structure",
];

/// Every top-level section present; a missing detailed_financials blocks
pub struct RequiredSections;

impl ConsistencyCheck for RequiredSections {
    fn name(&self) -> &'static str {
        "required_sections"
    }

    fn check(&self, doc: &Value, _config: &ValidatorConfig) -> Vec<ValidationIssue> {
        if doc.is_null() {
            return Vec::new();
        }

        REQUIRED_SECTIONS
            .iter()
            .filter(|section| doc.get(**section).map(Value::is_null).unwrap_or(true))
            .map(|section| {
                let severity = if *section == "detailed_financials" {
                    Severity::CriticalBlocker
                } else {
                    Severity::High
                };
                issue(
                    severity,
                    format!("required section '{}' is missing", section),
                    format!("rerun the agent(s) feeding '{}'", section),
                )
            })
            .collect()
    }
}

/// The dual DCF shape: positive enterprise value promoted to the root of
/// dcf_outputs, alongside the nested scenarios
pub struct DcfShape;

impl ConsistencyCheck for DcfShape {
    fn name(&self) -> &'static str {
        "dcf_shape"
    }

    fn check(&self, doc: &Value, _config: &ValidatorConfig) -> Vec<ValidationIssue> {
        if doc.is_null() || doc.get("detailed_financials").map(Value::is_null).unwrap_or(true) {
            return Vec::new();
        }

        let dcf = &doc["detailed_financials"]["dcf_outputs"];
        if dcf.is_null() {
            return vec![issue(
                Severity::CriticalBlocker,
                "DCF valuation missing from detailed_financials",
                "financial analyst must complete valuation before synthesis",
            )];
        }

        let mut issues = Vec::new();

        match dcf["enterprise_value"].as_f64() {
            None => {
                let description = if dcf["scenarios"].is_object() {
                    "dcf_outputs has nested scenarios but no root-promoted enterprise_value"
                } else {
                    "dcf_outputs.enterprise_value is missing"
                };
                issues.push(issue(
                    Severity::CriticalBlocker,
                    description,
                    "synthesis must promote the base case to the root of dcf_outputs",
                ));
            }
            Some(ev) if ev <= 0.0 => {
                issues.push(issue(
                    Severity::CriticalBlocker,
                    format!("dcf_outputs.enterprise_value must be positive, got {}", ev),
                    "review DCF inputs; a non-positive enterprise value is not renderable",
                ));
            }
            Some(_) => {}
        }

        issues
    }
}

/// normalized_ebitda must be numeric; zero passes with a warning
pub struct EbitdaNumeric;

impl ConsistencyCheck for EbitdaNumeric {
    fn name(&self) -> &'static str {
        "normalized_ebitda_numeric"
    }

    fn check(&self, doc: &Value, _config: &ValidatorConfig) -> Vec<ValidationIssue> {
        if doc.is_null() || doc.get("detailed_financials").map(Value::is_null).unwrap_or(true) {
            return Vec::new();
        }

        match doc["detailed_financials"]["normalized_ebitda"].as_f64() {
            None => vec![issue(
                Severity::High,
                "detailed_financials.normalized_ebitda is not a number",
                "synthesis must apply the EBITDA fallback chain (normalized → raw → 0)",
            )],
            Some(v) if v == 0.0 => vec![issue(
                Severity::Medium,
                "normalized EBITDA is 0; no normalization source was available",
                "verify income statement ingestion for the target",
            )],
            Some(_) => Vec::new(),
        }
    }
}

/// Coverage against the declared agent list; below the configured floor
/// blocks, below full coverage is surfaced as high severity
pub struct AgentCoverage;

impl ConsistencyCheck for AgentCoverage {
    fn name(&self) -> &'static str {
        "agent_coverage"
    }

    fn check(&self, doc: &Value, config: &ValidatorConfig) -> Vec<ValidationIssue> {
        if doc.is_null() {
            return Vec::new();
        }

        let coverage = doc["metadata"]["agent_coverage"].as_u64().unwrap_or(0) as usize;

        if coverage < config.coverage_floor {
            vec![issue(
                Severity::CriticalBlocker,
                format!(
                    "agent coverage {} below the configured floor {}",
                    coverage, config.coverage_floor
                ),
                "investigate failed agents before rendering",
            )]
        } else if coverage < config.declared_agents {
            vec![issue(
                Severity::High,
                format!(
                    "agent coverage {} of {} declared agents",
                    coverage, config.declared_agents
                ),
                "review the missing agents' records for failures",
            )]
        } else {
            Vec::new()
        }
    }
}

/// data_version and consolidated_timestamp must be non-empty
pub struct VersionMetadata;

impl ConsistencyCheck for VersionMetadata {
    fn name(&self) -> &'static str {
        "version_metadata"
    }

    fn check(&self, doc: &Value, _config: &ValidatorConfig) -> Vec<ValidationIssue> {
        if doc.is_null() {
            return Vec::new();
        }

        let mut issues = Vec::new();
        for field in ["data_version", "consolidated_timestamp"] {
            let empty = doc[field].as_str().map(str::is_empty).unwrap_or(true);
            if empty {
                issues.push(issue(
                    Severity::High,
                    format!("'{}' is missing or empty", field),
                    "synthesis must stamp version metadata before committing",
                ));
            }
        }
        issues
    }
}

//
// ================= Engine =================
//

pub struct ConsistencyValidator {
    config: ValidatorConfig,
    checks: Vec<Box<dyn ConsistencyCheck>>,
}

impl ConsistencyValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            checks: Vec::new(),
        }
    }

    pub fn add_check(&mut self, check: Box<dyn ConsistencyCheck>) {
        self.checks.push(check);
    }

    /// Validate a synthesized document (pass `Value::Null` when absent)
    pub fn validate(&self, doc: &Value) -> ValidationReport {
        let mut issues = Vec::new();
        for check in &self.checks {
            issues.extend(check.check(doc, &self.config));
        }

        let valid = !issues
            .iter()
            .any(|i| i.severity == Severity::CriticalBlocker);

        info!(
            check_count = self.checks.len(),
            issue_count = issues.len(),
            valid,
            "consistency validation completed"
        );

        ValidationReport { valid, issues }
    }
}

/// Standard validator with the full check suite registered
pub fn create_default_validator(config: ValidatorConfig) -> ConsistencyValidator {
    let mut validator = ConsistencyValidator::new(config);
    validator.add_check(Box::new(SynthesizedPresent));
    validator.add_check(Box::new(RequiredSections));
    validator.add_check(Box::new(DcfShape));
    validator.add_check(Box::new(EbitdaNumeric));
    validator.add_check(Box::new(AgentCoverage));
    validator.add_check(Box::new(VersionMetadata));
    validator
}

//
// ================= Cross-format consistency =================
//

/// Metrics observed in one rendered artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedMetrics {
    pub format: String,
    pub enterprise_value: f64,
    pub ebitda: f64,
    pub agent_count: u64,
}

/// Post-render alert: rendered metrics must match the document bit for bit
/// across formats. Non-blocking, but treated as a critical alert.
pub fn validate_render_consistency(doc: &Value, rendered: &[RenderedMetrics]) -> Vec<ValidationIssue> {
    let ev = doc["detailed_financials"]["dcf_outputs"]["enterprise_value"]
        .as_f64()
        .unwrap_or(f64::NAN);
    let ebitda = doc["detailed_financials"]["normalized_ebitda"]
        .as_f64()
        .unwrap_or(f64::NAN);
    let agents = doc["metadata"]["agent_coverage"].as_u64().unwrap_or(0);

    let mut issues = Vec::new();
    for metrics in rendered {
        let mut mismatches = Vec::new();
        if metrics.enterprise_value.to_bits() != ev.to_bits() {
            mismatches.push("enterprise_value");
        }
        if metrics.ebitda.to_bits() != ebitda.to_bits() {
            mismatches.push("ebitda");
        }
        if metrics.agent_count != agents {
            mismatches.push("agent_count");
        }

        if !mismatches.is_empty() {
            issues.push(issue(
                Severity::High,
                format!(
                    "critical post-generation alert: format '{}' diverges on {}",
                    metrics.format,
                    mismatches.join(", ")
                ),
                "regenerate the artifact from synthesized_data; renderers must not recompute",
            ));
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_valid_doc() -> Value {
        json!({
            "data_version": "2.1",
            "consolidated_timestamp": "2025-06-01T00:00:00Z",
            "metadata": { "agent_coverage": 13 },
            "executive_summary": {"target": "TGT"},
            "detailed_financials": {
                "dcf_outputs": {
                    "scenarios": {"base": {"enterprise_value": 100.0}},
                    "enterprise_value": 100.0,
                    "equity_value": 80.0,
                    "wacc": 0.1,
                    "terminal_growth_rate": 0.025,
                },
                "normalized_ebitda": 42.0,
            },
            "legal_diligence": {"summary": "clean"},
            "market_analysis": {"outlook": "stable"},
            "risk_macro": {"scenario_models": []},
            "validation_summary": {"checks": []},
            "integration_blueprint": {"workstreams": []},
            "tax_structure": {"structures": []},
        })
    }

    #[test]
    fn test_valid_document_passes() {
        let validator = create_default_validator(ValidatorConfig::default());
        let report = validator.validate(&minimal_valid_doc());
        assert!(report.valid, "issues: {:?}", report.issues);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_absent_document_blocks() {
        let validator = create_default_validator(ValidatorConfig::default());
        let report = validator.validate(&Value::Null);
        assert!(!report.valid);
        assert!(report.has_blocker());
    }

    #[test]
    fn test_missing_dcf_blocks() {
        let validator = create_default_validator(ValidatorConfig::default());
        let mut doc = minimal_valid_doc();
        doc["detailed_financials"]
            .as_object_mut()
            .unwrap()
            .remove("dcf_outputs");

        let report = validator.validate(&doc);
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.description.contains("DCF valuation missing")));
    }

    #[test]
    fn test_nested_without_root_promotion_blocks() {
        let validator = create_default_validator(ValidatorConfig::default());
        let mut doc = minimal_valid_doc();
        doc["detailed_financials"]["dcf_outputs"]
            .as_object_mut()
            .unwrap()
            .remove("enterprise_value");

        let report = validator.validate(&doc);
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.description.contains("no root-promoted enterprise_value")));
    }

    #[test]
    fn test_nonpositive_enterprise_value_blocks() {
        let validator = create_default_validator(ValidatorConfig::default());
        let mut doc = minimal_valid_doc();
        doc["detailed_financials"]["dcf_outputs"]["enterprise_value"] = json!(-5.0);

        let report = validator.validate(&doc);
        assert!(!report.valid);
    }

    #[test]
    fn test_coverage_floor_behavior() {
        // Floor 10, coverage 9: the coverage shortfall itself blocks
        let validator = create_default_validator(ValidatorConfig::default());
        let mut doc = minimal_valid_doc();
        doc["metadata"]["agent_coverage"] = json!(9);
        let report = validator.validate(&doc);
        assert!(!report.valid);
        assert!(report.has_blocker());

        // Floor 8, coverage 9: high-severity issue, does not block
        let validator = create_default_validator(ValidatorConfig {
            coverage_floor: 8,
            declared_agents: 13,
        });
        let report = validator.validate(&doc);
        assert!(report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == Severity::High && i.description.contains("agent coverage")));
    }

    #[test]
    fn test_zero_ebitda_warns_without_blocking() {
        let validator = create_default_validator(ValidatorConfig::default());
        let mut doc = minimal_valid_doc();
        doc["detailed_financials"]["normalized_ebitda"] = json!(0.0);

        let report = validator.validate(&doc);
        assert!(report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == Severity::Medium));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let validator = create_default_validator(ValidatorConfig::default());
        let mut doc = minimal_valid_doc();
        doc["metadata"]["agent_coverage"] = json!(11);
        doc["detailed_financials"]["normalized_ebitda"] = json!(0.0);

        let first = validator.validate(&doc);
        let second = validator.validate(&doc);
        assert_eq!(
            serde_json::to_value(&first.issues).unwrap(),
            serde_json::to_value(&second.issues).unwrap()
        );
        assert_eq!(first.valid, second.valid);
    }

    #[test]
    fn test_render_consistency_alerts_on_mismatch() {
        let doc = minimal_valid_doc();
        let matching = RenderedMetrics {
            format: "spreadsheet".to_string(),
            enterprise_value: 100.0,
            ebitda: 42.0,
            agent_count: 13,
        };
        assert!(validate_render_consistency(&doc, &[matching.clone()]).is_empty());

        let diverging = RenderedMetrics {
            enterprise_value: 100.000001,
            ..matching
        };
        let issues = validate_render_consistency(&doc, &[diverging]);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].description.contains("critical post-generation alert"));
    }
}
