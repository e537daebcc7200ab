//! Orchestrator / scheduler
//!
//! Drives one job from queued to terminal: ingestion, dependency-ordered
//! agent waves, synthesis, validation, and the rendering handoff. Agents
//! within one wave run concurrently against the shared state; the
//! single-writer-per-key rule makes that safe without locking in agent
//! code. Status and phase transitions are emitted only from the
//! scheduler's lifecycle hooks.

use crate::agents::{names, Agent, AgentContext, AgentRegistry, AgentResult};
use crate::config::Settings;
use crate::error::DiligenceError;
use crate::events::ProgressChannel;
use crate::ingestion;
use crate::jobs::JobManager;
use crate::llm::LlmRouter;
use crate::models::{AgentOutcome, AgentPhase, AnalysisRequest, Event, JobStatus};
use crate::providers::{FilingsProvider, MarketDataProvider, WebSearchProvider};
use crate::render::{JsonArtifactWriter, Renderer};
use crate::state::{keys, AnalysisState};
use crate::synthesis::SynthesisAgent;
use crate::validator::{create_default_validator, ConsistencyValidator, ValidatorConfig};
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// External collaborators shared by every job
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<LlmRouter>,
    pub market: Arc<dyn MarketDataProvider>,
    pub filings: Arc<dyn FilingsProvider>,
    pub search: Option<Arc<dyn WebSearchProvider>>,
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    collaborators: Collaborators,
    jobs: Arc<JobManager>,
    events: Arc<ProgressChannel>,
    renderers: Vec<Arc<dyn Renderer>>,
    validator: ConsistencyValidator,
    settings: Settings,
    cancel_flags: RwLock<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl Orchestrator {
    pub fn new(
        registry: AgentRegistry,
        collaborators: Collaborators,
        jobs: Arc<JobManager>,
        events: Arc<ProgressChannel>,
        settings: Settings,
    ) -> Self {
        let validator = create_default_validator(ValidatorConfig {
            coverage_floor: settings.coverage_floor,
            ..ValidatorConfig::default()
        });
        let renderers: Vec<Arc<dyn Renderer>> =
            vec![Arc::new(JsonArtifactWriter::new(settings.artifact_dir.clone()))];

        Self {
            registry: Arc::new(registry),
            collaborators,
            jobs,
            events,
            renderers,
            validator,
            settings,
            cancel_flags: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_renderers(mut self, renderers: Vec<Arc<dyn Renderer>>) -> Self {
        self.renderers = renderers;
        self
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    pub fn events(&self) -> &Arc<ProgressChannel> {
        &self.events
    }

    fn agent_context(&self, request: AnalysisRequest) -> AgentContext {
        AgentContext {
            request,
            llm: self.collaborators.llm.clone(),
            market: self.collaborators.market.clone(),
            filings: self.collaborators.filings.clone(),
            search: self.collaborators.search.clone(),
            settings: self.settings.clone(),
        }
    }

    //
    // ================= Public operations =================
    //

    /// Validate minimal parameters and enqueue a job at 0% progress
    pub async fn submit(&self, request: AnalysisRequest) -> Result<Uuid> {
        if request.target.trim().is_empty() {
            return Err(DiligenceError::InvalidSubmission(
                "target identifier must be non-empty".to_string(),
            ));
        }

        let job = self.jobs.create(request).await?;
        self.events.register(job.job_id).await;
        {
            let mut flags = self.cancel_flags.write().await;
            flags.insert(job.job_id, Arc::new(AtomicBool::new(false)));
        }

        self.events
            .publish(Event::JobProgress {
                job_id: job.job_id,
                percent: 0.0,
                current_agent: None,
            })
            .await;

        info!(job_id = %job.job_id, target = %job.request.target, "job submitted");
        Ok(job.job_id)
    }

    /// Cooperative cancellation; honored at the next agent boundary
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(DiligenceError::JobNotFound(job_id))?;

        if !job.status.is_terminal() {
            let flags = self.cancel_flags.read().await;
            if let Some(flag) = flags.get(&job_id) {
                flag.store(true, Ordering::SeqCst);
                info!(job_id = %job_id, "cancellation requested");
            }
        }
        Ok(())
    }

    /// Latest status snapshot plus a live receiver of subsequent events
    pub async fn subscribe(
        &self,
        job_id: Uuid,
    ) -> Option<(Option<Event>, broadcast::Receiver<Event>)> {
        self.events.subscribe(job_id).await
    }

    /// Execute the pipeline to completion; idempotent for terminal jobs
    pub async fn run(&self, job_id: Uuid) -> Result<()> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(DiligenceError::JobNotFound(job_id))?;

        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "run skipped: job already terminal");
            return Ok(());
        }

        let request = job.request.clone();
        match tokio::time::timeout(
            self.settings.job_hard_timeout,
            self.run_pipeline(job_id, request),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(job_id = %job_id, error = %e, "pipeline error");
                self.fail_job(job_id, "pipeline", &e.to_string()).await;
                Ok(())
            }
            Err(_) => {
                self.fail_job(
                    job_id,
                    "job_timeout",
                    &format!(
                        "job exceeded hard timeout of {}s",
                        self.settings.job_hard_timeout.as_secs()
                    ),
                )
                .await;
                Ok(())
            }
        }
    }

    //
    // ================= Pipeline =================
    //

    async fn run_pipeline(&self, job_id: Uuid, request: AnalysisRequest) -> Result<()> {
        let state = self
            .jobs
            .state_of(job_id)
            .await
            .ok_or_else(|| DiligenceError::StateError("no analysis state for job".to_string()))?;
        let ctx = self.agent_context(request);

        self.jobs
            .update(job_id, |j| j.status = JobStatus::Running)
            .await?;

        // ---- Stage 1: ingestion (not an agent, required) ----
        self.emit_agent_phase(job_id, ingestion::INGESTION, AgentPhase::Running, "fetching raw data", vec![])
            .await;
        let handle = state.handle(ingestion::INGESTION, ingestion::RAW_KEYS);
        if let Err(e) = ingestion::run(&handle, &ctx).await {
            self.emit_agent_phase(job_id, ingestion::INGESTION, AgentPhase::Error, &e.to_string(), vec![])
                .await;
            self.fail_job(job_id, "ingestion", &e.to_string()).await;
            return Ok(());
        }
        self.emit_agent_phase(job_id, ingestion::INGESTION, AgentPhase::Ok, "raw data committed", vec![])
            .await;

        // ---- Stage 2: dependency-ordered agent waves ----
        let waves = self.registry.waves()?;
        let total = self.registry.len() + 1; // + synthesis
        let progress = Arc::new(Mutex::new(0usize));

        for wave in waves {
            if self.is_cancelled(job_id).await {
                self.finalize_cancelled(job_id).await;
                return Ok(());
            }

            let mut tasks = Vec::with_capacity(wave.len());
            for agent in wave {
                tasks.push(tokio::spawn(run_one_agent(
                    self.jobs.clone(),
                    self.events.clone(),
                    state.clone(),
                    ctx.clone(),
                    agent,
                    job_id,
                    progress.clone(),
                    total,
                    self.settings.agent_soft_timeout,
                )));
            }

            // The whole wave settles before any failure decision
            let mut wave_results = Vec::with_capacity(tasks.len());
            for task in tasks {
                wave_results.push(task.await.map_err(|e| {
                    DiligenceError::StateError(format!("agent task panicked: {}", e))
                })?);
            }

            for (agent_name, outcome, required) in wave_results {
                if outcome == AgentOutcome::Error && required {
                    self.fail_job(
                        job_id,
                        "agent",
                        &format!("required agent '{}' failed", agent_name),
                    )
                    .await;
                    return Ok(());
                }
            }
        }

        // ---- Stage 3: synthesis ----
        if self.is_cancelled(job_id).await {
            self.finalize_cancelled(job_id).await;
            return Ok(());
        }
        self.jobs
            .update(job_id, |j| j.status = JobStatus::Synthesizing)
            .await?;

        let (_, outcome, _) = run_one_agent(
            self.jobs.clone(),
            self.events.clone(),
            state.clone(),
            ctx.clone(),
            Arc::new(SynthesisAgent),
            job_id,
            progress.clone(),
            total,
            self.settings.agent_soft_timeout,
        )
        .await;

        if outcome == AgentOutcome::Error {
            self.fail_job(job_id, "synthesis", "synthesis did not commit a document")
                .await;
            return Ok(());
        }

        // ---- Stage 4: validation ----
        self.jobs
            .update(job_id, |j| j.status = JobStatus::Validating)
            .await?;
        self.emit_agent_phase(
            job_id,
            names::CONSISTENCY_VALIDATOR,
            AgentPhase::Running,
            "checking consolidated document",
            vec![],
        )
        .await;

        let doc = state
            .read(keys::SYNTHESIZED_DATA)
            .await
            .unwrap_or(Value::Null);
        let report = self.validator.validate(&doc);

        if !report.valid {
            let blockers: Vec<String> = report
                .blockers()
                .map(|i| i.description.clone())
                .collect();
            let message = blockers.join("; ");
            self.emit_agent_phase(
                job_id,
                names::CONSISTENCY_VALIDATOR,
                AgentPhase::Error,
                &message,
                blockers,
            )
            .await;
            self.fail_job(job_id, "validation", &message).await;
            return Ok(());
        }

        let issue_lines: Vec<String> = report
            .issues
            .iter()
            .map(|i| format!("{:?}: {}", i.severity, i.description))
            .collect();
        if !issue_lines.is_empty() {
            warn!(job_id = %job_id, issues = ?issue_lines, "validation passed with issues");
        }
        self.emit_agent_phase(
            job_id,
            names::CONSISTENCY_VALIDATOR,
            if issue_lines.is_empty() {
                AgentPhase::Ok
            } else {
                AgentPhase::Warn
            },
            "document consistent",
            issue_lines,
        )
        .await;

        // ---- Stage 5: rendering handoff ----
        self.jobs.persist_document(job_id, &doc).await?;

        let mut artifacts = Vec::with_capacity(self.renderers.len());
        for renderer in &self.renderers {
            match renderer.render(job_id, &doc).await {
                Ok(path) => artifacts.push(path),
                Err(e) => {
                    self.fail_job(
                        job_id,
                        "render",
                        &format!("{} renderer failed: {}", renderer.format(), e),
                    )
                    .await;
                    return Ok(());
                }
            }
        }

        self.jobs
            .update(job_id, |j| {
                j.status = JobStatus::Completed;
                j.completed_at = Some(Utc::now());
                j.progress_percent = 100.0;
                j.current_agent = None;
                j.artifacts = artifacts.clone();
            })
            .await?;

        self.events
            .publish(Event::JobProgress {
                job_id,
                percent: 100.0,
                current_agent: None,
            })
            .await;
        self.events
            .publish(Event::JobComplete {
                job_id,
                outcome: "completed".to_string(),
                artifacts,
            })
            .await;

        info!(job_id = %job_id, "job completed");
        Ok(())
    }

    //
    // ================= Terminal transitions =================
    //

    async fn is_cancelled(&self, job_id: Uuid) -> bool {
        let flags = self.cancel_flags.read().await;
        flags
            .get(&job_id)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn finalize_cancelled(&self, job_id: Uuid) {
        let _ = self
            .jobs
            .update(job_id, |j| {
                j.status = JobStatus::Cancelled;
                j.completed_at = Some(Utc::now());
                j.current_agent = None;
            })
            .await;

        self.events
            .publish(Event::JobError {
                job_id,
                kind: "cancelled".to_string(),
                message: "job cancelled at agent boundary".to_string(),
            })
            .await;

        info!(job_id = %job_id, "job cancelled");
    }

    async fn fail_job(&self, job_id: Uuid, kind: &str, message: &str) {
        // A terminal job stays terminal
        if let Ok(Some(job)) = self.jobs.get(job_id).await {
            if job.status.is_terminal() {
                return;
            }
        }

        let _ = self
            .jobs
            .update(job_id, |j| {
                j.status = JobStatus::Failed;
                j.completed_at = Some(Utc::now());
                j.error = Some(format!("{}: {}", kind, message));
            })
            .await;

        self.events
            .publish(Event::JobError {
                job_id,
                kind: kind.to_string(),
                message: message.to_string(),
            })
            .await;

        error!(job_id = %job_id, kind, message, "job failed");
    }

    async fn emit_agent_phase(
        &self,
        job_id: Uuid,
        agent: &str,
        phase: AgentPhase,
        message: &str,
        details: Vec<String>,
    ) {
        self.events
            .publish(Event::AgentStatus {
                job_id,
                agent: agent.to_string(),
                phase,
                message: message.to_string(),
                details,
            })
            .await;
    }
}

//
// ================= Per-agent execution =================
//

#[allow(clippy::too_many_arguments)]
async fn run_one_agent(
    jobs: Arc<JobManager>,
    events: Arc<ProgressChannel>,
    state: Arc<AnalysisState>,
    ctx: AgentContext,
    agent: Arc<dyn Agent>,
    job_id: Uuid,
    progress: Arc<Mutex<usize>>,
    total: usize,
    soft_timeout: std::time::Duration,
) -> (String, AgentOutcome, bool) {
    let name = agent.name().to_string();
    let started_at = Utc::now();

    events
        .publish(Event::AgentStatus {
            job_id,
            agent: name.clone(),
            phase: AgentPhase::Running,
            message: "started".to_string(),
            details: vec![],
        })
        .await;
    let _ = jobs
        .update(job_id, |j| j.current_agent = Some(name.clone()))
        .await;

    // Gate on declared inputs: present and non-empty
    let mut missing = Vec::new();
    for key in agent.required_inputs() {
        if !state.has_nonempty(key).await {
            missing.push(*key);
        }
    }

    let result = if missing.is_empty() {
        let handle = state.handle(agent.name(), agent.produced_outputs());
        let exec = agent.execute(&handle, &ctx);
        tokio::pin!(exec);

        // Soft timeout warns but never kills the agent
        let outcome = tokio::select! {
            res = &mut exec => res,
            _ = tokio::time::sleep(soft_timeout) => {
                warn!(
                    agent = %name,
                    timeout_secs = soft_timeout.as_secs(),
                    "agent exceeded soft timeout; still waiting"
                );
                exec.await
            }
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(agent = %name, error = %e, "agent raised; recorded as error");
                AgentResult::fatal(e.to_string())
            }
        }
    } else {
        AgentResult::fatal(format!("missing required input(s): {}", missing.join(", ")))
    };

    let outcome = result.outcome();
    let finished_at = Utc::now();

    state
        .append_record(crate::models::AgentRecord {
            agent: name.clone(),
            started_at,
            finished_at,
            status: outcome,
            payload: result.payload.clone(),
            warnings: result.warnings.clone(),
            errors: result.errors.clone(),
            recommendations: result.recommendations.clone(),
        })
        .await;

    let (phase, message) = match outcome {
        AgentOutcome::Ok => (AgentPhase::Ok, "completed".to_string()),
        AgentOutcome::Warning => (
            AgentPhase::Warn,
            format!("completed with {} warning(s)", result.warnings.len()),
        ),
        AgentOutcome::Error => (
            AgentPhase::Error,
            result
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| "failed".to_string()),
        ),
    };
    let mut details = result.warnings.clone();
    details.extend(result.errors.clone());
    events
        .publish(Event::AgentStatus {
            job_id,
            agent: name.clone(),
            phase,
            message,
            details,
        })
        .await;

    // Progress counts agents finished ok or warn; serialized so the
    // emitted percents are monotonic.
    if outcome != AgentOutcome::Error {
        let mut completed = progress.lock().await;
        *completed += 1;
        let percent = (*completed as f64 / total as f64) * 100.0;
        let _ = jobs
            .update(job_id, |j| j.progress_percent = percent)
            .await;
        events
            .publish(Event::JobProgress {
                job_id,
                percent,
                current_agent: Some(name.clone()),
            })
            .await;
    }

    (name, outcome, agent.required())
}

//
// ================= Convenience constructors =================
//

/// Wire an orchestrator over the in-crate stubs (tests and dev mode)
pub fn stub_orchestrator(settings: Settings) -> Orchestrator {
    use crate::llm::StubLlm;
    use crate::providers::{StubFilings, StubMarketData, StubSearch};

    let llm = LlmRouter::new(Arc::new(StubLlm::succeeding(
        "stub-primary",
        "Stubbed diligence narrative.",
    )));

    let collaborators = Collaborators {
        llm: Arc::new(llm),
        market: Arc::new(StubMarketData::new()),
        filings: Arc::new(StubFilings),
        search: Some(Arc::new(StubSearch)),
    };

    Orchestrator::new(
        crate::agents::create_default_registry(),
        collaborators,
        Arc::new(JobManager::in_memory()),
        Arc::new(ProgressChannel::new()),
        settings,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::names;
    use crate::llm::{StubBehavior, StubLlm};
    use crate::models::AgentRecord;
    use crate::providers::{StubFilings, StubMarketData, StubSearch};
    use std::time::Duration;

    fn test_settings(dir: &tempfile::TempDir) -> Settings {
        Settings {
            artifact_dir: dir.path().to_str().unwrap().to_string(),
            agent_soft_timeout: Duration::from_secs(5),
            job_hard_timeout: Duration::from_secs(30),
            monte_carlo_iterations: 100,
            ..Settings::default()
        }
    }

    fn orchestrator_with_llm(
        settings: Settings,
        primary: Arc<StubLlm>,
    ) -> Orchestrator {
        let llm = LlmRouter::new(primary)
            .with_backoff_base(Duration::from_millis(1))
            .with_fallback_timeout(Duration::from_millis(100));

        let collaborators = Collaborators {
            llm: Arc::new(llm),
            market: Arc::new(StubMarketData::new()),
            filings: Arc::new(StubFilings),
            search: Some(Arc::new(StubSearch)),
        };

        Orchestrator::new(
            crate::agents::create_default_registry(),
            collaborators,
            Arc::new(JobManager::in_memory()),
            Arc::new(ProgressChannel::new()),
            settings,
        )
    }

    fn submit_request(target: &str) -> AnalysisRequest {
        AnalysisRequest {
            target: target.to_string(),
            acquirer: None,
            deal_value: None,
            thesis: None,
        }
    }

    fn record_of<'a>(records: &'a [AgentRecord], name: &str) -> Option<&'a AgentRecord> {
        records.iter().find(|r| r.agent == name)
    }

    #[tokio::test]
    async fn test_happy_path_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = stub_orchestrator(test_settings(&dir));

        let job_id = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        orchestrator.run(job_id).await.unwrap();

        let job = orchestrator.jobs().get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
        assert_eq!(job.progress_percent, 100.0);
        assert!(!job.artifacts.is_empty());

        // The result document carries the analyst's base-case EV
        let state = orchestrator.jobs().state_of(job_id).await.unwrap();
        let doc = state.synthesized().await.unwrap();
        let doc_ev = doc["detailed_financials"]["dcf_outputs"]["enterprise_value"]
            .as_f64()
            .unwrap();
        let analyst = state.record_for(names::FINANCIAL_ANALYST).await.unwrap();
        assert_eq!(doc_ev, analyst.payload["enterprise_value"].as_f64().unwrap());
        assert!(doc_ev > 0.0);

        // JobComplete fired with the artifact paths
        let history = orchestrator.events().history(job_id).await;
        let complete = history.iter().find_map(|e| match e {
            Event::JobComplete { artifacts, .. } => Some(artifacts.clone()),
            _ => None,
        });
        assert_eq!(complete.unwrap(), job.artifacts);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = stub_orchestrator(test_settings(&dir));

        let job_id = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        orchestrator.run(job_id).await.unwrap();

        let history = orchestrator.events().history(job_id).await;
        let percents: Vec<f64> = history
            .iter()
            .filter_map(|e| match e {
                Event::JobProgress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();

        assert!(percents.len() > 2);
        for pair in percents.windows(2) {
            assert!(pair[1] >= pair[0], "progress regressed: {:?}", percents);
        }
    }

    #[tokio::test]
    async fn test_dependency_order_and_wave_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(&dir);
        // Enough latency that concurrent wave members demonstrably overlap
        let primary = Arc::new(
            StubLlm::succeeding("primary", "narrative").with_latency(Duration::from_millis(40)),
        );
        let orchestrator = orchestrator_with_llm(settings, primary);

        let job_id = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        orchestrator.run(job_id).await.unwrap();

        let state = orchestrator.jobs().state_of(job_id).await.unwrap();
        let records = state.records().await;

        // Dependency respect: producer finishes before consumer starts
        for (producer, consumer) in [
            (names::FINANCIAL_ANALYST, names::ADVANCED_VALUATION),
            (names::FINANCIAL_ANALYST, names::FINANCIAL_DEEP_DIVE),
            (names::ADVANCED_VALUATION, names::RISK_ASSESSMENT),
            (names::DEAL_STRUCTURING, names::ACCRETION_DILUTION),
            (names::EXTERNAL_VALIDATOR, names::SYNTHESIS),
        ] {
            let a = record_of(&records, producer).unwrap();
            let b = record_of(&records, consumer).unwrap();
            assert!(
                a.finished_at <= b.started_at,
                "{} finished {} after {} started {}",
                producer, a.finished_at, consumer, b.started_at
            );
        }

        // Ingestion-only dependents ran concurrently
        let wave0: Vec<&AgentRecord> = [
            names::LEGAL_COUNSEL,
            names::MARKET_STRATEGIST,
            names::MACRO_ANALYST,
        ]
        .iter()
        .map(|n| record_of(&records, n).unwrap())
        .collect();
        let latest_start = wave0.iter().map(|r| r.started_at).max().unwrap();
        let earliest_finish = wave0.iter().map(|r| r.finished_at).min().unwrap();
        assert!(
            latest_start < earliest_finish,
            "wave-0 agent intervals do not overlap"
        );

        // All wave-0 outputs were present before risk assessment started
        let risk = record_of(&records, names::RISK_ASSESSMENT).unwrap();
        for record in &wave0 {
            assert!(record.finished_at <= risk.started_at);
        }
    }

    #[tokio::test]
    async fn test_synthesized_once_with_later_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = stub_orchestrator(test_settings(&dir));

        let job_id = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        orchestrator.run(job_id).await.unwrap();

        let state = orchestrator.jobs().state_of(job_id).await.unwrap();
        assert_eq!(
            state.writer_of(keys::SYNTHESIZED_DATA).await.as_deref(),
            Some(names::SYNTHESIS)
        );

        let doc = state.synthesized().await.unwrap();
        let stamped: chrono::DateTime<Utc> = doc["consolidated_timestamp"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        for record in state.records().await {
            if record.agent != names::SYNTHESIS {
                assert!(stamped >= record.finished_at);
            }
        }

        // Single writer per key throughout
        let audit = state.write_audit().await;
        assert_eq!(
            audit.get(keys::NORMALIZED_FINANCIALS).map(String::as_str),
            Some(names::FINANCIAL_ANALYST)
        );
    }

    #[tokio::test]
    async fn test_rerun_of_terminal_job_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = stub_orchestrator(test_settings(&dir));

        let job_id = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        orchestrator.run(job_id).await.unwrap();

        let state = orchestrator.jobs().state_of(job_id).await.unwrap();
        let record_count = state.records().await.len();

        orchestrator.run(job_id).await.unwrap();
        assert_eq!(state.records().await.len(), record_count);
    }

    #[tokio::test]
    async fn test_identical_submissions_yield_identical_dcf() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = stub_orchestrator(test_settings(&dir));

        let first = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        let second = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        assert_ne!(first, second);

        orchestrator.run(first).await.unwrap();
        orchestrator.run(second).await.unwrap();

        let first_state = orchestrator.jobs().state_of(first).await.unwrap();
        let second_state = orchestrator.jobs().state_of(second).await.unwrap();
        let first_doc = first_state.synthesized().await.unwrap();
        let second_doc = second_state.synthesized().await.unwrap();
        assert_eq!(
            first_doc["detailed_financials"]["dcf_outputs"],
            second_doc["detailed_financials"]["dcf_outputs"]
        );
    }

    #[tokio::test]
    async fn test_empty_target_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = stub_orchestrator(test_settings(&dir));

        let err = orchestrator.submit(submit_request("  ")).await.unwrap_err();
        assert!(matches!(err, DiligenceError::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn test_required_agent_failure_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        // Every LLM call fails → the required financial analyst errors out
        let primary = Arc::new(StubLlm::new("primary", StubBehavior::Fail, ""));
        let orchestrator = orchestrator_with_llm(test_settings(&dir), primary);

        let job_id = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        orchestrator.run(job_id).await.unwrap();

        let job = orchestrator.jobs().get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("financial-analyst"));

        // No synthesis, no artifacts, no JobComplete
        let state = orchestrator.jobs().state_of(job_id).await.unwrap();
        assert!(state.record_for(names::SYNTHESIS).await.is_none());
        assert!(job.artifacts.is_empty());
        let history = orchestrator.events().history(job_id).await;
        assert!(!history
            .iter()
            .any(|e| matches!(e, Event::JobComplete { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_at_agent_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(
            StubLlm::succeeding("primary", "narrative").with_latency(Duration::from_millis(150)),
        );
        let orchestrator = Arc::new(orchestrator_with_llm(test_settings(&dir), primary));

        let job_id = orchestrator.submit(submit_request("AAPL")).await.unwrap();

        let runner = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(job_id).await })
        };

        // Let wave 0 (financial analyst among others) get underway
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.cancel(job_id).await.unwrap();
        runner.await.unwrap().unwrap();

        let job = orchestrator.jobs().get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        // The in-flight agent ran to completion and committed its record
        let state = orchestrator.jobs().state_of(job_id).await.unwrap();
        let analyst = state.record_for(names::FINANCIAL_ANALYST).await.unwrap();
        assert_eq!(analyst.status, AgentOutcome::Ok);

        // No later-wave agents started
        assert!(state.record_for(names::ADVANCED_VALUATION).await.is_none());
        assert!(state.record_for(names::RISK_ASSESSMENT).await.is_none());
        assert!(state.record_for(names::SYNTHESIS).await.is_none());
    }

    #[tokio::test]
    async fn test_job_hard_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            job_hard_timeout: Duration::from_millis(100),
            ..test_settings(&dir)
        };
        let primary = Arc::new(
            StubLlm::succeeding("primary", "narrative").with_latency(Duration::from_secs(60)),
        );
        let orchestrator = orchestrator_with_llm(settings, primary);

        let job_id = orchestrator.submit(submit_request("AAPL")).await.unwrap();
        orchestrator.run(job_id).await.unwrap();

        let job = orchestrator.jobs().get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("job_timeout"));
    }
}
