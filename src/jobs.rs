//! Job manager
//!
//! Creates, looks up, and persists jobs. The canonical copy lives in
//! memory (the analysis state is process-local); a Postgres backend, when
//! configured, is written through so status endpoints survive restart.
//! Falls back to in-memory when the database is unreachable.

use crate::error::DiligenceError;
use crate::models::{AnalysisRequest, Job, JobStatus};
use crate::state::AnalysisState;
use crate::Result;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

enum JobBackend {
    InMemory,
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

pub struct JobManager {
    backend: JobBackend,
    jobs: RwLock<HashMap<Uuid, Job>>,
    states: RwLock<HashMap<Uuid, Arc<AnalysisState>>>,
}

impl JobManager {
    pub fn in_memory() -> Self {
        Self {
            backend: JobBackend::InMemory,
            jobs: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Postgres-backed when a URL is supplied and connectable, otherwise
    /// in-memory
    pub fn from_database_url(database_url: Option<&str>) -> Self {
        if let Some(url) = database_url {
            match PgPoolOptions::new().max_connections(5).connect_lazy(url) {
                Ok(pool) => {
                    info!("job store backend: postgres");
                    return Self {
                        backend: JobBackend::Postgres {
                            pool,
                            schema_ready: Arc::new(OnceCell::new()),
                        },
                        jobs: RwLock::new(HashMap::new()),
                        states: RwLock::new(HashMap::new()),
                    };
                }
                Err(error) => {
                    warn!(
                        "failed to initialize postgres job store, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("job store backend: in-memory");
        Self::in_memory()
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let JobBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS diligence_jobs (
                      job_id UUID PRIMARY KEY,
                      target TEXT NOT NULL,
                      acquirer TEXT,
                      deal_value DOUBLE PRECISION,
                      thesis TEXT,
                      status TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL,
                      completed_at TIMESTAMPTZ,
                      error TEXT,
                      progress_percent DOUBLE PRECISION NOT NULL DEFAULT 0,
                      current_agent TEXT,
                      artifacts JSONB NOT NULL DEFAULT '[]'::jsonb,
                      synthesized JSONB
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                DiligenceError::DatabaseError(format!(
                    "failed to initialize job store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn status_to_db(status: JobStatus) -> String {
        status.to_string()
    }

    fn status_from_db(status: &str) -> JobStatus {
        match status {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "synthesizing" => JobStatus::Synthesizing,
            "validating" => JobStatus::Validating,
            "completed" => JobStatus::Completed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    async fn persist(&self, job: &Job) -> Result<()> {
        let JobBackend::Postgres { pool, .. } = &self.backend else {
            return Ok(());
        };
        self.ensure_schema_if_needed().await?;

        sqlx::query(
            r#"
            INSERT INTO diligence_jobs
              (job_id, target, acquirer, deal_value, thesis, status, created_at,
               completed_at, error, progress_percent, current_agent, artifacts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (job_id) DO UPDATE SET
              status = EXCLUDED.status,
              completed_at = EXCLUDED.completed_at,
              error = EXCLUDED.error,
              progress_percent = EXCLUDED.progress_percent,
              current_agent = EXCLUDED.current_agent,
              artifacts = EXCLUDED.artifacts
            "#,
        )
        .bind(job.job_id)
        .bind(&job.request.target)
        .bind(&job.request.acquirer)
        .bind(job.request.deal_value)
        .bind(&job.request.thesis)
        .bind(Self::status_to_db(job.status))
        .bind(job.created_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .bind(job.progress_percent)
        .bind(&job.current_agent)
        .bind(serde_json::to_value(&job.artifacts)?)
        .execute(pool)
        .await
        .map_err(|e| DiligenceError::DatabaseError(format!("failed to persist job: {}", e)))?;

        Ok(())
    }

    /// The synthesized document, once written, is immutable: the column is
    /// only ever set from NULL.
    pub async fn persist_document(&self, job_id: Uuid, doc: &Value) -> Result<()> {
        let JobBackend::Postgres { pool, .. } = &self.backend else {
            return Ok(());
        };
        self.ensure_schema_if_needed().await?;

        sqlx::query(
            "UPDATE diligence_jobs SET synthesized = $2 \
             WHERE job_id = $1 AND synthesized IS NULL",
        )
        .bind(job_id)
        .bind(doc)
        .execute(pool)
        .await
        .map_err(|e| {
            DiligenceError::DatabaseError(format!("failed to persist synthesized doc: {}", e))
        })?;

        Ok(())
    }

    pub async fn create(&self, request: AnalysisRequest) -> Result<Job> {
        let job = Job::new(request);

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job.job_id, job.clone());
        }
        {
            let mut states = self.states.write().await;
            states.insert(job.job_id, Arc::new(AnalysisState::new()));
        }
        self.persist(&job).await?;

        Ok(job)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        {
            let jobs = self.jobs.read().await;
            if let Some(job) = jobs.get(&job_id) {
                return Ok(Some(job.clone()));
            }
        }

        // Miss: a Postgres backend may still know the job (prior process)
        let JobBackend::Postgres { pool, .. } = &self.backend else {
            return Ok(None);
        };
        self.ensure_schema_if_needed().await?;

        let row = sqlx::query(
            "SELECT job_id, target, acquirer, deal_value, thesis, status, created_at, \
             completed_at, error, progress_percent, current_agent, artifacts \
             FROM diligence_jobs WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| DiligenceError::DatabaseError(format!("failed to load job: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status").unwrap_or_else(|_| "failed".into());
        let artifacts: Value = row.try_get("artifacts").unwrap_or(Value::Null);

        Ok(Some(Job {
            job_id,
            request: AnalysisRequest {
                target: row.try_get("target").unwrap_or_default(),
                acquirer: row.try_get("acquirer").ok().flatten(),
                deal_value: row.try_get("deal_value").ok().flatten(),
                thesis: row.try_get("thesis").ok().flatten(),
            },
            status: Self::status_from_db(&status),
            created_at: row
                .try_get("created_at")
                .unwrap_or_else(|_| chrono::Utc::now()),
            completed_at: row.try_get("completed_at").ok().flatten(),
            error: row.try_get("error").ok().flatten(),
            progress_percent: row.try_get("progress_percent").unwrap_or(0.0),
            current_agent: row.try_get("current_agent").ok().flatten(),
            artifacts: serde_json::from_value(artifacts).unwrap_or_default(),
        }))
    }

    /// Apply a mutation to the in-memory copy and write it through
    pub async fn update<F>(&self, job_id: Uuid, mutate: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let updated = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or(DiligenceError::JobNotFound(job_id))?;
            mutate(job);
            job.clone()
        };

        self.persist(&updated).await?;
        Ok(updated)
    }

    pub async fn state_of(&self, job_id: Uuid) -> Option<Arc<AnalysisState>> {
        let states = self.states.read().await;
        states.get(&job_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            target: "TGT".to_string(),
            acquirer: None,
            deal_value: None,
            thesis: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let manager = JobManager::in_memory();
        let job = manager.create(request()).await.unwrap();

        let fetched = manager.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.request.target, "TGT");
        assert!(manager.state_of(job.job_id).await.is_some());
    }

    #[tokio::test]
    async fn test_update_mutates_and_returns() {
        let manager = JobManager::in_memory();
        let job = manager.create(request()).await.unwrap();

        let updated = manager
            .update(job.job_id, |j| {
                j.status = JobStatus::Running;
                j.progress_percent = 12.5;
            })
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Running);

        let fetched = manager.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.progress_percent, 12.5);
    }

    #[tokio::test]
    async fn test_unknown_job_errors_on_update() {
        let manager = JobManager::in_memory();
        let err = manager.update(Uuid::new_v4(), |_| {}).await.unwrap_err();
        assert!(matches!(err, DiligenceError::JobNotFound(_)));
    }
}
