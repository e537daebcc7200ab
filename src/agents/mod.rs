//! Agent contract, registry, and dependency graph
//!
//! Every agent satisfies the same contract: a stable name, declared input
//! and output state keys, and an execute that reads inputs from state and
//! writes outputs through its narrow handle. The registry rejects agent
//! sets with overlapping declared outputs, which is what makes intra-wave
//! concurrency safe.

use crate::config::Settings;
use crate::error::DiligenceError;
use crate::llm::LlmRouter;
use crate::models::{AgentOutcome, AnalysisRequest};
use crate::providers::{FilingsProvider, MarketDataProvider, WebSearchProvider};
use crate::state::StateHandle;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub mod competitive;
pub mod deal_math;
pub mod deal_structuring;
pub mod deep_dive;
pub mod external_validator;
pub mod financial_analyst;
pub mod integration;
pub mod legal;
pub mod macro_analyst;
pub mod market_strategist;
pub mod risk;
pub mod tax;
pub mod valuation;

/// Stable agent identifiers
pub mod names {
    pub const FINANCIAL_ANALYST: &str = "financial-analyst";
    pub const FINANCIAL_DEEP_DIVE: &str = "financial-deep-dive";
    pub const ADVANCED_VALUATION: &str = "advanced-valuation";
    pub const COMPETITIVE_BENCHMARKING: &str = "competitive-benchmarking";
    pub const LEGAL_COUNSEL: &str = "legal-counsel";
    pub const MARKET_STRATEGIST: &str = "market-strategist";
    pub const MACRO_ANALYST: &str = "macroeconomic-analyst";
    pub const RISK_ASSESSMENT: &str = "risk-assessment";
    pub const TAX_STRUCTURING: &str = "tax-structuring";
    pub const DEAL_STRUCTURING: &str = "deal-structuring";
    pub const ACCRETION_DILUTION: &str = "accretion-dilution";
    pub const SOURCES_USES: &str = "sources-uses";
    pub const CONTRIBUTION_ANALYSIS: &str = "contribution-analysis";
    pub const EXCHANGE_RATIO: &str = "exchange-ratio";
    pub const INTEGRATION_PLANNER: &str = "integration-planner";
    pub const EXTERNAL_VALIDATOR: &str = "external-validator";
    pub const SYNTHESIS: &str = "synthesis";
    pub const CONSISTENCY_VALIDATOR: &str = "consistency-validator";
}

//
// ================= Agent Result =================
//

#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub payload: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub recommendations: Vec<String>,
}

impl AgentResult {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            payload: Value::Null,
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    pub fn outcome(&self) -> AgentOutcome {
        if !self.errors.is_empty() {
            AgentOutcome::Error
        } else if !self.warnings.is_empty() {
            AgentOutcome::Warning
        } else {
            AgentOutcome::Ok
        }
    }
}

//
// ================= Agent Context =================
//

/// Shared collaborators handed to every agent
#[derive(Clone)]
pub struct AgentContext {
    pub request: AnalysisRequest,
    pub llm: Arc<LlmRouter>,
    pub market: Arc<dyn MarketDataProvider>,
    pub filings: Arc<dyn FilingsProvider>,
    pub search: Option<Arc<dyn WebSearchProvider>>,
    pub settings: Settings,
}

//
// ================= Agent Contract =================
//

#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier used in logs, events, and state records
    fn name(&self) -> &'static str;

    /// State keys that must be present and non-empty before the agent runs
    fn required_inputs(&self) -> &'static [&'static str];

    /// State keys this agent is the sole writer of
    fn produced_outputs(&self) -> &'static [&'static str];

    /// Agents that must complete before this one starts
    fn dependencies(&self) -> &'static [&'static str];

    /// Required agents fail the whole job on error
    fn required(&self) -> bool {
        false
    }

    async fn execute(&self, state: &StateHandle, ctx: &AgentContext) -> Result<AgentResult>;
}

//
// ================= Registry =================
//

pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.push(agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.name() == name).cloned()
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Reject overlapping declared outputs and unknown dependencies
    pub fn validate(&self) -> Result<()> {
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for agent in &self.agents {
            for key in agent.produced_outputs() {
                if let Some(previous) = owners.insert(key, agent.name()) {
                    return Err(DiligenceError::StateError(format!(
                        "state key '{}' declared by both '{}' and '{}'",
                        key,
                        previous,
                        agent.name()
                    )));
                }
            }
        }

        let known: HashSet<&str> = self.agents.iter().map(|a| a.name()).collect();
        for agent in &self.agents {
            for dep in agent.dependencies() {
                if !known.contains(dep) {
                    return Err(DiligenceError::StateError(format!(
                        "agent '{}' depends on unknown agent '{}'",
                        agent.name(),
                        dep
                    )));
                }
            }
        }

        Ok(())
    }

    /// Topological traversal grouped into waves; agents within one wave
    /// have no mutual dependency and may run concurrently.
    pub fn waves(&self) -> Result<Vec<Vec<Arc<dyn Agent>>>> {
        self.validate()?;

        let mut remaining: Vec<Arc<dyn Agent>> = self.agents.clone();
        let mut finished: HashSet<&str> = HashSet::new();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|a| a.dependencies().iter().all(|d| finished.contains(d)));

            if ready.is_empty() {
                let stuck: Vec<&str> = blocked.iter().map(|a| a.name()).collect();
                return Err(DiligenceError::StateError(format!(
                    "dependency cycle among agents: {}",
                    stuck.join(", ")
                )));
            }

            for agent in &ready {
                finished.insert(agent.name());
            }
            waves.push(ready);
            remaining = blocked;
        }

        Ok(waves)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The full analytical fleet, wired with the declared dependency graph
pub fn create_default_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();

    registry.register(Arc::new(financial_analyst::FinancialAnalyst));
    registry.register(Arc::new(deep_dive::FinancialDeepDive));
    registry.register(Arc::new(valuation::AdvancedValuation));
    registry.register(Arc::new(competitive::CompetitiveBenchmarking));
    registry.register(Arc::new(legal::LegalCounsel));
    registry.register(Arc::new(market_strategist::MarketStrategist));
    registry.register(Arc::new(macro_analyst::MacroAnalyst));
    registry.register(Arc::new(risk::RiskAssessment));
    registry.register(Arc::new(tax::TaxStructuring));
    registry.register(Arc::new(deal_structuring::DealStructuring));
    registry.register(Arc::new(deal_math::AccretionDilution));
    registry.register(Arc::new(deal_math::SourcesUses));
    registry.register(Arc::new(deal_math::ContributionAnalysis));
    registry.register(Arc::new(deal_math::ExchangeRatio));
    registry.register(Arc::new(integration::IntegrationPlanner));
    registry.register(Arc::new(external_validator::ExternalValidator));

    registry
}

/// Strip a markdown code fence around an LLM reply, if present
pub fn strip_code_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::keys;

    #[test]
    fn test_default_registry_validates() {
        let registry = create_default_registry();
        assert_eq!(registry.len(), 16);
        registry.validate().unwrap();
    }

    #[test]
    fn test_waves_respect_dependencies() {
        let registry = create_default_registry();
        let waves = registry.waves().unwrap();

        let wave_of = |name: &str| -> usize {
            waves
                .iter()
                .position(|w| w.iter().any(|a| a.name() == name))
                .unwrap()
        };

        // First wave is the ingestion-only dependents
        assert_eq!(wave_of(names::FINANCIAL_ANALYST), 0);
        assert_eq!(wave_of(names::LEGAL_COUNSEL), 0);
        assert_eq!(wave_of(names::MARKET_STRATEGIST), 0);
        assert_eq!(wave_of(names::MACRO_ANALYST), 0);

        assert!(wave_of(names::ADVANCED_VALUATION) > wave_of(names::FINANCIAL_ANALYST));
        assert!(wave_of(names::RISK_ASSESSMENT) > wave_of(names::ADVANCED_VALUATION));
        assert!(wave_of(names::RISK_ASSESSMENT) > wave_of(names::FINANCIAL_DEEP_DIVE));
        assert!(wave_of(names::ACCRETION_DILUTION) > wave_of(names::DEAL_STRUCTURING));
        // External validator runs after every analytical agent
        let last_analytical = [
            names::RISK_ASSESSMENT,
            names::ACCRETION_DILUTION,
            names::INTEGRATION_PLANNER,
        ]
        .iter()
        .map(|n| wave_of(n))
        .max()
        .unwrap();
        assert!(wave_of(names::EXTERNAL_VALIDATOR) > last_analytical);
    }

    #[test]
    fn test_overlapping_outputs_rejected() {
        struct Dup;

        #[async_trait]
        impl Agent for Dup {
            fn name(&self) -> &'static str {
                "dup-analyst"
            }
            fn required_inputs(&self) -> &'static [&'static str] {
                &[]
            }
            fn produced_outputs(&self) -> &'static [&'static str] {
                &[keys::NORMALIZED_FINANCIALS]
            }
            fn dependencies(&self) -> &'static [&'static str] {
                &[]
            }
            async fn execute(
                &self,
                _state: &StateHandle,
                _ctx: &AgentContext,
            ) -> Result<AgentResult> {
                Ok(AgentResult::ok(Value::Null))
            }
        }

        let mut registry = create_default_registry();
        registry.register(Arc::new(Dup));
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("plain text"), "plain text");
    }
}
