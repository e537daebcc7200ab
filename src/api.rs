//! REST + SSE surface for the due-diligence engine
//!
//! Submission is asynchronous: POST /analysis answers 202 with a job id
//! and the pipeline runs in the background. Progress streams over
//! server-sent events; results are available once the job completes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::DiligenceError;
use crate::models::{AgentPhase, AnalysisRequest, Event, JobStatus};
use crate::scheduler::Orchestrator;

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn submit_analysis(
    State(state): State<ApiState>,
    Json(request): Json<AnalysisRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(target = %request.target, "received analysis submission");

    match state.orchestrator.submit(request).await {
        Ok(job_id) => {
            // The pipeline runs detached; progress flows over the event stream
            let orchestrator = state.orchestrator.clone();
            tokio::spawn(async move {
                let _ = orchestrator.run(job_id).await;
            });

            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::success(serde_json::json!({ "job_id": job_id }))),
            )
        }
        Err(e @ DiligenceError::InvalidSubmission(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(e.to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    let job = match state.orchestrator.jobs().get(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error(format!("job {} not found", job_id))),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    };

    // Accumulated errors: agent-level failures plus the terminal error
    let mut errors: Vec<String> = state
        .orchestrator
        .events()
        .history(job_id)
        .await
        .iter()
        .filter_map(|event| match event {
            Event::AgentStatus {
                agent,
                phase: AgentPhase::Error,
                message,
                ..
            } => Some(format!("{}: {}", agent, message)),
            _ => None,
        })
        .collect();
    if let Some(terminal) = &job.error {
        errors.push(terminal.clone());
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "job_id": job.job_id,
            "status": job.status,
            "progress": job.progress_percent,
            "current_agent": job.current_agent,
            "errors": errors,
        }))),
    )
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::AgentStatus { .. } => "agent_status",
        Event::JobProgress { .. } => "job_progress",
        Event::JobComplete { .. } => "job_complete",
        Event::JobError { .. } => "job_error",
    }
}

fn to_sse_event(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event_name(event))
        .json_data(event)
        .unwrap_or_default()
}

async fn job_events(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, StatusCode> {
    let (snapshot, receiver) = state
        .orchestrator
        .subscribe(job_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    // Latest status snapshot first, then the live feed
    let sse_stream = stream::iter(snapshot)
        .chain(BroadcastStream::new(receiver).filter_map(|result| async move { result.ok() }))
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

async fn job_result(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    let job = match state.orchestrator.jobs().get(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error(format!("job {} not found", job_id))),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    };

    if job.status != JobStatus::Completed {
        return (
            StatusCode::CONFLICT,
            Json(ApiResponse::error(format!(
                "job is {}; results are available only when completed",
                job.status
            ))),
        );
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "job_id": job.job_id,
            "artifacts": job.artifacts,
            "completed_at": job.completed_at,
        }))),
    )
}

async fn cancel_job(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.cancel(job_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(serde_json::json!({
                "job_id": job_id,
                "cancellation": "requested",
            }))),
        ),
        Err(DiligenceError::JobNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("job {} not found", job_id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/analysis", post(submit_analysis))
        .route("/analysis/:job_id", get(job_status))
        .route("/analysis/:job_id/events", get(job_events))
        .route("/analysis/:job_id/result", get(job_result))
        .route("/analysis/:job_id/cancel", post(cancel_job))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_match_wire_tags() {
        let job_id = Uuid::new_v4();
        let event = Event::JobComplete {
            job_id,
            outcome: "completed".to_string(),
            artifacts: vec![],
        };
        assert_eq!(event_name(&event), "job_complete");

        let event = Event::AgentStatus {
            job_id,
            agent: "legal-counsel".to_string(),
            phase: AgentPhase::Running,
            message: "started".to_string(),
            details: vec![],
        };
        assert_eq!(event_name(&event), "agent_status");
    }

    #[test]
    fn test_api_response_shapes() {
        let ok = ApiResponse::success(serde_json::json!({"job_id": "x"}));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let err = ApiResponse::error("boom".to_string());
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }
}
