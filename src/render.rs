//! Renderer handoff
//!
//! Renderers are external collaborators; they receive the synthesized
//! document and nothing else. The JSON writer is the in-crate default so
//! every completed job yields at least one artifact.

use crate::error::DiligenceError;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use uuid::Uuid;

#[async_trait]
pub trait Renderer: Send + Sync {
    fn format(&self) -> &'static str;

    /// Produce one artifact from the synthesized document; returns its path
    async fn render(&self, job_id: Uuid, doc: &Value) -> Result<String>;
}

pub struct JsonArtifactWriter {
    dir: PathBuf,
}

impl JsonArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Renderer for JsonArtifactWriter {
    fn format(&self) -> &'static str {
        "json"
    }

    async fn render(&self, job_id: Uuid, doc: &Value) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(format!("{}.json", job_id));
        let body = serde_json::to_vec_pretty(doc)?;
        tokio::fs::write(&path, body).await?;

        path.to_str()
            .map(String::from)
            .ok_or_else(|| DiligenceError::RenderError("artifact path is not UTF-8".to_string()))
    }
}
