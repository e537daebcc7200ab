//! Legal counsel agent
//!
//! Reviews the filing inventory and proxy text for diligence-relevant
//! disclosures.

use crate::agents::{names, Agent, AgentContext, AgentResult};
use crate::llm::{CallContext, Message};
use crate::state::{keys, StateHandle};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Disclosure phrases worth surfacing in a diligence report
const DISCLOSURE_FLAGS: &[(&str, &str)] = &[
    ("litigation", "pending or threatened litigation"),
    ("dispute", "commercial dispute disclosure"),
    ("change-of-control", "change-of-control provisions"),
    ("going-concern", "going-concern language"),
    ("material weakness", "internal-control material weakness"),
];

pub struct LegalCounsel;

#[async_trait]
impl Agent for LegalCounsel {
    fn name(&self) -> &'static str {
        names::LEGAL_COUNSEL
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[keys::SEC_FILINGS]
    }

    fn produced_outputs(&self) -> &'static [&'static str] {
        &[keys::LEGAL_DILIGENCE]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult> {
        let filings = state.read(keys::SEC_FILINGS).await.unwrap_or_default();
        let proxy = state.read(keys::PROXY_DATA).await.unwrap_or_default();

        let target_filings = filings["target"].as_array().cloned().unwrap_or_default();

        let mut by_form: std::collections::BTreeMap<String, usize> = Default::default();
        for filing in &target_filings {
            if let Some(form) = filing["form_type"].as_str() {
                *by_form.entry(form.to_string()).or_default() += 1;
            }
        }

        let mut warnings = Vec::new();
        if !by_form.contains_key("10-K") {
            warnings.push("no annual report (10-K) in filing inventory".to_string());
        }

        let proxy_text = proxy["target"]["text"].as_str().unwrap_or("").to_lowercase();
        let flagged: Vec<Value> = DISCLOSURE_FLAGS
            .iter()
            .filter(|(needle, _)| proxy_text.contains(needle))
            .map(|(needle, label)| json!({"keyword": needle, "disclosure": label}))
            .collect();

        let commentary = ctx
            .llm
            .call(
                &[
                    Message::system("You are M&A legal counsel reviewing public filings."),
                    Message::user(format!(
                        "Filing inventory by form: {:?}. Flagged disclosures: {}. \
                         Summarize legal diligence posture for {} in three sentences.",
                        by_form,
                        flagged.len(),
                        ctx.request.target
                    )),
                ],
                &CallContext::new("legal diligence / filings review"),
            )
            .await?;

        let payload = json!({
            "filing_inventory": by_form,
            "flagged_disclosures": flagged,
            "proxy_reviewed": !proxy_text.is_empty(),
            "summary": commentary,
            "findings": [
                {
                    "category": "legal",
                    "subject": format!("{} disclosure review", ctx.request.target),
                    "detail": format!("{} flagged disclosure(s) across {} filing(s)",
                        flagged.len(), target_filings.len()),
                }
            ],
        });

        state.write(keys::LEGAL_DILIGENCE, payload.clone()).await?;

        let mut result = AgentResult::ok(payload);
        result.warnings = warnings;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testutil::{ingested_state, run_agent, stub_context};

    #[tokio::test]
    async fn test_legal_review_flags_proxy_disclosures() {
        let ctx = stub_context();
        let state = ingested_state(&ctx).await;

        let result = run_agent(&state, &LegalCounsel, &ctx).await;
        assert!(result.errors.is_empty());

        let legal = state.read(keys::LEGAL_DILIGENCE).await.unwrap();
        assert!(legal["proxy_reviewed"].as_bool().unwrap());
        // Stub proxy text mentions a dispute and change-of-control terms
        let flagged = legal["flagged_disclosures"].as_array().unwrap();
        assert!(flagged.iter().any(|f| f["keyword"] == "dispute"));
        assert!(flagged.iter().any(|f| f["keyword"] == "change-of-control"));
    }
}
