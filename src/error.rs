//! Error types for the due-diligence engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, DiligenceError>;

#[derive(Error, Debug)]
pub enum DiligenceError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("Ingestion error: {0}")]
    IngestionError(String),

    #[error("Agent '{agent}' failed: {message}")]
    AgentError { agent: String, message: String },

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    #[error("Validation blocked: {0}")]
    ValidationBlocked(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Ownership violation: agent '{agent}' may not write key '{key}'")]
    OwnershipViolation { agent: String, key: String },

    #[error("Job timed out after {0} seconds")]
    JobTimeout(u64),

    #[error("Job cancelled")]
    Cancelled,

    // =============================
    // External Services
    // =============================

    #[error("LLM call '{label}' exhausted all providers: {attempts}")]
    LlmExhausted { label: String, attempts: String },

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Rate limit wait exceeded for {0}")]
    RateLimited(String),

    #[error("Render error: {0}")]
    RenderError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
