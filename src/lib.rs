//! M&A Due-Diligence Orchestration Engine
//!
//! A multi-agent analysis pipeline that:
//! - Ingests financial, market, and filing data for a target company
//! - Runs a fleet of specialist agents in dependency-ordered waves
//! - Consolidates their outputs into one canonical synthesized document
//! - Validates that document before any report is rendered
//! - Streams typed progress events to subscribers over the job lifetime
//!
//! PIPELINE:
//! SUBMIT → INGEST → AGENT WAVES → SYNTHESIZE → VALIDATE → RENDER

pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod ingestion;
pub mod jobs;
pub mod llm;
pub mod models;
pub mod providers;
pub mod render;
pub mod scheduler;
pub mod state;
pub mod synthesis;
pub mod validator;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use scheduler::{Collaborators, Orchestrator};
