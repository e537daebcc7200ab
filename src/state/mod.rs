//! Shared analysis state for one job
//!
//! A mapping from well-known keys to structured values plus append-only
//! agent records and anomaly entries. Each top-level key has exactly one
//! owning agent; agents receive a narrow handle that rejects writes to keys
//! outside their declared output set, which makes the single-writer rule
//! hold by construction.

use crate::models::{AgentRecord, AnomalyEntry};
use crate::error::DiligenceError;
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Well-known state keys
pub mod keys {
    pub const FINANCIAL_DATA: &str = "financial_data";
    pub const SEC_FILINGS: &str = "sec_filings";
    pub const PROXY_DATA: &str = "proxy_data";

    pub const NORMALIZED_FINANCIALS: &str = "normalized_financials";
    pub const VALUATION_MODELS: &str = "valuation_models";
    pub const EBITDA: &str = "ebitda";
    pub const ANOMALY_DETECTION: &str = "anomaly_detection";

    pub const FINANCIAL_DEEP_DIVE: &str = "financial_deep_dive";
    pub const ADVANCED_VALUATION: &str = "advanced_valuation";
    pub const COMPETITIVE_BENCHMARKING: &str = "competitive_benchmarking";
    pub const LEGAL_DILIGENCE: &str = "legal_diligence";
    pub const MARKET_ANALYSIS: &str = "market_analysis";
    pub const MACRO_ANALYSIS: &str = "macro_analysis";
    pub const RISK_ASSESSMENT: &str = "risk_assessment";
    pub const TAX_STRUCTURE: &str = "tax_structure";
    pub const DEAL_STRUCTURE: &str = "deal_structure";
    pub const ACCRETION_DILUTION: &str = "accretion_dilution";
    pub const SOURCES_USES: &str = "sources_uses";
    pub const CONTRIBUTION_ANALYSIS: &str = "contribution_analysis";
    pub const EXCHANGE_RATIO: &str = "exchange_ratio";
    pub const INTEGRATION_BLUEPRINT: &str = "integration_blueprint";
    pub const EXTERNAL_VALIDATION: &str = "external_validation";

    pub const SYNTHESIZED_DATA: &str = "synthesized_data";
}

/// In-memory analysis state; one instance per job
pub struct AnalysisState {
    values: RwLock<BTreeMap<String, Value>>,
    /// key → writer agent; the write-audit log behind the single-writer rule
    write_log: RwLock<HashMap<String, String>>,
    records: RwLock<Vec<AgentRecord>>,
    anomalies: RwLock<Vec<AnomalyEntry>>,
}

impl AnalysisState {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            write_log: RwLock::new(HashMap::new()),
            records: RwLock::new(Vec::new()),
            anomalies: RwLock::new(Vec::new()),
        }
    }

    /// Build a write handle for one agent, restricted to its declared outputs
    pub fn handle(self: &Arc<Self>, agent: &str, allowed: &[&str]) -> StateHandle {
        StateHandle {
            state: Arc::clone(self),
            agent: agent.to_string(),
            allowed: allowed.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub async fn read(&self, key: &str) -> Option<Value> {
        let values = self.values.read().await;
        values.get(key).cloned()
    }

    /// Present and non-empty (not null, "", [], or {})
    pub async fn has_nonempty(&self, key: &str) -> bool {
        let values = self.values.read().await;
        match values.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        }
    }

    /// Fail-fast accessor for the canonical consolidated document.
    /// Downstream consumers must go through this helper.
    pub async fn synthesized(&self) -> Result<Value> {
        self.read(keys::SYNTHESIZED_DATA).await.ok_or_else(|| {
            DiligenceError::StateError(
                "synthesized_data is absent; synthesis has not committed".to_string(),
            )
        })
    }

    pub async fn writer_of(&self, key: &str) -> Option<String> {
        let log = self.write_log.read().await;
        log.get(key).cloned()
    }

    pub async fn write_audit(&self) -> HashMap<String, String> {
        self.write_log.read().await.clone()
    }

    pub async fn append_record(&self, record: AgentRecord) {
        let mut records = self.records.write().await;
        records.push(record);
    }

    pub async fn records(&self) -> Vec<AgentRecord> {
        self.records.read().await.clone()
    }

    pub async fn record_for(&self, agent: &str) -> Option<AgentRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.agent == agent).cloned()
    }

    pub async fn anomalies(&self) -> Vec<AnomalyEntry> {
        self.anomalies.read().await.clone()
    }

    async fn write_owned(&self, agent: &str, key: &str, value: Value) -> Result<()> {
        let mut log = self.write_log.write().await;
        if let Some(previous) = log.get(key) {
            return Err(DiligenceError::StateError(format!(
                "key '{}' already written by '{}'; keys are write-once",
                key, previous
            )));
        }
        log.insert(key.to_string(), agent.to_string());
        drop(log);

        let mut values = self.values.write().await;
        values.insert(key.to_string(), value);
        Ok(())
    }

    async fn append_anomaly_entry(&self, agent: &str, category: &str, message: &str) {
        let entry = AnomalyEntry {
            agent: agent.to_string(),
            category: category.to_string(),
            message: message.to_string(),
            recorded_at: Utc::now(),
        };
        let mut anomalies = self.anomalies.write().await;
        anomalies.push(entry);
    }
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self::new()
    }
}

/// Narrow per-agent view of the state.
/// Writes are restricted to the agent's declared output keys; the anomaly
/// log is the only shared sink and is append-only.
#[derive(Clone)]
pub struct StateHandle {
    state: Arc<AnalysisState>,
    agent: String,
    allowed: HashSet<String>,
}

impl StateHandle {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub async fn read(&self, key: &str) -> Option<Value> {
        self.state.read(key).await
    }

    pub async fn has_nonempty(&self, key: &str) -> bool {
        self.state.has_nonempty(key).await
    }

    pub async fn write(&self, key: &str, value: Value) -> Result<()> {
        if !self.allowed.contains(key) {
            return Err(DiligenceError::OwnershipViolation {
                agent: self.agent.clone(),
                key: key.to_string(),
            });
        }
        self.state.write_owned(&self.agent, key, value).await
    }

    pub async fn record_for(&self, agent: &str) -> Option<AgentRecord> {
        self.state.record_for(agent).await
    }

    pub async fn records(&self) -> Vec<AgentRecord> {
        self.state.records().await
    }

    pub async fn anomaly(&self, category: &str, message: &str) {
        self.state
            .append_anomaly_entry(&self.agent, category, message)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_handle_rejects_unowned_key() {
        let state = Arc::new(AnalysisState::new());
        let handle = state.handle("legal-counsel", &[keys::LEGAL_DILIGENCE]);

        let err = handle
            .write(keys::NORMALIZED_FINANCIALS, json!({"x": 1}))
            .await
            .unwrap_err();

        assert!(matches!(err, DiligenceError::OwnershipViolation { .. }));
        assert!(state.read(keys::NORMALIZED_FINANCIALS).await.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_write_once() {
        let state = Arc::new(AnalysisState::new());
        let handle = state.handle("synthesis", &[keys::SYNTHESIZED_DATA]);

        handle
            .write(keys::SYNTHESIZED_DATA, json!({"v": 1}))
            .await
            .unwrap();

        let err = handle
            .write(keys::SYNTHESIZED_DATA, json!({"v": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, DiligenceError::StateError(_)));

        // First write survives
        let doc = state.synthesized().await.unwrap();
        assert_eq!(doc["v"], 1);
    }

    #[tokio::test]
    async fn test_write_audit_names_single_writer() {
        let state = Arc::new(AnalysisState::new());
        let analyst = state.handle("financial-analyst", &[keys::NORMALIZED_FINANCIALS]);
        analyst
            .write(keys::NORMALIZED_FINANCIALS, json!({"ok": true}))
            .await
            .unwrap();

        let audit = state.write_audit().await;
        assert_eq!(
            audit.get(keys::NORMALIZED_FINANCIALS).map(String::as_str),
            Some("financial-analyst")
        );
    }

    #[tokio::test]
    async fn test_synthesized_fails_fast_when_absent() {
        let state = AnalysisState::new();
        assert!(state.synthesized().await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_anomaly_appends() {
        let state = Arc::new(AnalysisState::new());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let handle = state.handle(&format!("agent-{}", i), &[]);
            tasks.push(tokio::spawn(async move {
                handle.anomaly("data_quality", "suspicious margin").await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let anomalies = state.anomalies().await;
        assert_eq!(anomalies.len(), 8);
        // Entries carry the appending agent's identity
        let agents: HashSet<_> = anomalies.iter().map(|a| a.agent.clone()).collect();
        assert_eq!(agents.len(), 8);
    }

    #[tokio::test]
    async fn test_has_nonempty() {
        let state = Arc::new(AnalysisState::new());
        let handle = state.handle("ingestion", &[keys::FINANCIAL_DATA, keys::PROXY_DATA]);

        handle.write(keys::PROXY_DATA, json!([])).await.unwrap();
        handle
            .write(keys::FINANCIAL_DATA, json!({"income": [1]}))
            .await
            .unwrap();

        assert!(!state.has_nonempty(keys::PROXY_DATA).await);
        assert!(state.has_nonempty(keys::FINANCIAL_DATA).await);
        assert!(!state.has_nonempty(keys::SEC_FILINGS).await);
    }
}
