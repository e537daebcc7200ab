//! Core data models for the due-diligence engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

//
// ================= Job Lifecycle =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Synthesizing,
    Validating,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Synthesizing => "synthesizing",
            JobStatus::Validating => "validating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Parameters submitted for one analysis job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub target: String,
    #[serde(default)]
    pub acquirer: Option<String>,
    #[serde(default)]
    pub deal_value: Option<f64>,
    #[serde(default)]
    pub thesis: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub request: AnalysisRequest,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal error, when the job failed
    pub error: Option<String>,
    pub progress_percent: f64,
    pub current_agent: Option<String>,
    pub artifacts: Vec<String>,
}

impl Job {
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            request,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            progress_percent: 0.0,
            current_agent: None,
            artifacts: Vec::new(),
        }
    }
}

//
// ================= Agent Records =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentOutcome {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentOutcome::Ok => "ok",
            AgentOutcome::Warning => "warning",
            AgentOutcome::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Immutable record of one agent run, appended on completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: AgentOutcome,
    pub payload: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Append-only anomaly sink entry; any agent may append
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEntry {
    pub agent: String,
    pub category: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

//
// ================= Progress Events =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    Pending,
    Running,
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    AgentStatus {
        job_id: Uuid,
        agent: String,
        phase: AgentPhase,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        details: Vec<String>,
    },
    JobProgress {
        job_id: Uuid,
        percent: f64,
        current_agent: Option<String>,
    },
    JobComplete {
        job_id: Uuid,
        outcome: String,
        artifacts: Vec<String>,
    },
    JobError {
        job_id: Uuid,
        kind: String,
        message: String,
    },
}

impl Event {
    pub fn job_id(&self) -> Uuid {
        match self {
            Event::AgentStatus { job_id, .. }
            | Event::JobProgress { job_id, .. }
            | Event::JobComplete { job_id, .. }
            | Event::JobError { job_id, .. } => *job_id,
        }
    }
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    CriticalBlocker,
}

impl Severity {
    fn rank(&self) -> u8 {
        match self {
            Severity::Medium => 0,
            Severity::High => 1,
            Severity::CriticalBlocker => 2,
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub description: String,
    pub remediation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn blockers(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::CriticalBlocker)
    }

    pub fn has_blocker(&self) -> bool {
        self.blockers().next().is_some()
    }
}
