//! LLM invocation pipeline
//!
//! All agent LLM traffic goes through [`LlmRouter::call`]: retry the primary
//! provider with exponential backoff, then fall back to the secondary
//! provider with an extended per-attempt timeout. Exhausting the chain is a
//! structured error naming every attempt; there is no placeholder text.

use crate::error::DiligenceError;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod gemini;
pub mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// One prompt message in a call's prompt sequence
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Provider-agnostic chat completion client
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &'static str;
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// Per-call settings: human label, retry budget, timeouts, fallback flag
#[derive(Debug, Clone)]
pub struct CallContext {
    pub label: String,
    pub max_retries: u32,
    pub timeout: Duration,
    pub fallback_enabled: bool,
}

impl CallContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            max_retries: 3,
            timeout: Duration::from_secs(90),
            fallback_enabled: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback_enabled = false;
        self
    }
}

/// Delay before the next attempt: 1s, 2s, 4s for the default base
pub fn backoff_delay(base: Duration, failed_attempts: u32) -> Duration {
    base * 2u32.saturating_pow(failed_attempts.saturating_sub(1))
}

/// Routes calls across a primary provider, an optional fallback provider,
/// and an optional reasoning-specialized provider.
pub struct LlmRouter {
    primary: Arc<dyn LlmClient>,
    secondary: Option<Arc<dyn LlmClient>>,
    reasoning: Option<Arc<dyn LlmClient>>,
    fallback_timeout: Duration,
    reasoning_timeout: Duration,
    backoff_base: Duration,
}

impl LlmRouter {
    pub fn new(primary: Arc<dyn LlmClient>) -> Self {
        Self {
            primary,
            secondary: None,
            reasoning: None,
            fallback_timeout: Duration::from_secs(120),
            reasoning_timeout: Duration::from_secs(180),
            backoff_base: Duration::from_secs(1),
        }
    }

    pub fn with_fallback(mut self, secondary: Arc<dyn LlmClient>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_reasoning(mut self, reasoning: Arc<dyn LlmClient>) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    /// Shrink the backoff base (test configurations)
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn attempt_provider(
        &self,
        client: &Arc<dyn LlmClient>,
        messages: &[Message],
        ctx: &CallContext,
        timeout: Duration,
        attempts: &mut Vec<String>,
    ) -> Option<String> {
        for attempt in 1..=ctx.max_retries {
            match tokio::time::timeout(timeout, client.complete(messages)).await {
                Ok(Ok(text)) => {
                    info!(
                        provider = client.provider(),
                        label = %ctx.label,
                        attempt,
                        "LLM call succeeded"
                    );
                    return Some(text);
                }
                Ok(Err(e)) => {
                    warn!(
                        provider = client.provider(),
                        label = %ctx.label,
                        attempt,
                        error = %e,
                        "LLM attempt failed"
                    );
                    attempts.push(format!(
                        "{} attempt {}: {}",
                        client.provider(),
                        attempt,
                        e
                    ));
                }
                Err(_) => {
                    warn!(
                        provider = client.provider(),
                        label = %ctx.label,
                        attempt,
                        timeout_secs = timeout.as_secs(),
                        "LLM attempt timed out"
                    );
                    attempts.push(format!(
                        "{} attempt {}: timed out after {:?}",
                        client.provider(),
                        attempt,
                        timeout
                    ));
                }
            }

            tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
        }
        None
    }

    /// Invoke the chain for one labeled call
    pub async fn call(&self, messages: &[Message], ctx: &CallContext) -> Result<String> {
        let mut attempts = Vec::new();

        if let Some(text) = self
            .attempt_provider(&self.primary, messages, ctx, ctx.timeout, &mut attempts)
            .await
        {
            return Ok(text);
        }

        if ctx.fallback_enabled {
            if let Some(secondary) = &self.secondary {
                info!(
                    label = %ctx.label,
                    provider = secondary.provider(),
                    "primary exhausted, switching to fallback provider"
                );
                if let Some(text) = self
                    .attempt_provider(secondary, messages, ctx, self.fallback_timeout, &mut attempts)
                    .await
                {
                    return Ok(text);
                }
            }
        }

        Err(DiligenceError::LlmExhausted {
            label: ctx.label.clone(),
            attempts: attempts.join("; "),
        })
    }

    /// Multi-step reasoning against the dedicated provider.
    /// Outside the fallback chain; one attempt bounded by its own timeout.
    pub async fn reason(&self, messages: &[Message], label: &str) -> Result<String> {
        let client = self.reasoning.as_ref().ok_or_else(|| {
            DiligenceError::LlmError("no reasoning provider configured".to_string())
        })?;

        match tokio::time::timeout(self.reasoning_timeout, client.complete(messages)).await {
            Ok(result) => result,
            Err(_) => Err(DiligenceError::LlmError(format!(
                "reasoning call '{}' timed out after {:?}",
                label, self.reasoning_timeout
            ))),
        }
    }
}

//
// ========== Stub client (tests & credential-less dev mode) ==========
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Return the canned response on every call
    Succeed,
    /// Error on every call
    Fail,
    /// Never complete (exercises the per-attempt timeout)
    Hang,
}

/// Deterministic in-crate client; keeps the pipeline exercisable
/// without network access.
pub struct StubLlm {
    name: &'static str,
    behavior: StubBehavior,
    response: String,
    latency: Duration,
    calls: AtomicUsize,
}

impl StubLlm {
    pub fn new(name: &'static str, behavior: StubBehavior, response: impl Into<String>) -> Self {
        Self {
            name,
            behavior,
            response: response.into(),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulated per-call latency (concurrency and cancellation tests)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn succeeding(name: &'static str, response: impl Into<String>) -> Self {
        Self::new(name, StubBehavior::Succeed, response)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for StubLlm {
    fn provider(&self) -> &'static str {
        self.name
    }

    async fn complete(&self, _messages: &[Message]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.behavior {
            StubBehavior::Succeed => Ok(self.response.clone()),
            StubBehavior::Fail => Err(DiligenceError::LlmError(format!(
                "{}: stubbed provider failure",
                self.name
            ))),
            StubBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(self.response.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_router(primary: Arc<dyn LlmClient>, secondary: Arc<dyn LlmClient>) -> LlmRouter {
        LlmRouter::new(primary)
            .with_fallback(secondary)
            .with_fallback_timeout(Duration::from_millis(200))
            .with_backoff_base(Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_sequence() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = Arc::new(StubLlm::succeeding("primary", "answer"));
        let secondary = Arc::new(StubLlm::succeeding("secondary", "unused"));
        let router = fast_router(primary.clone(), secondary.clone());

        let ctx = CallContext::new("unit / primary");
        let text = router.call(&[Message::user("q")], &ctx).await.unwrap();

        assert_eq!(text, "answer");
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_chain_after_primary_timeouts() {
        // Primary hangs on every call; secondary answers first try.
        let primary = Arc::new(StubLlm::new("primary", StubBehavior::Hang, ""));
        let secondary = Arc::new(StubLlm::succeeding("secondary", "fallback answer"));
        let router = fast_router(primary.clone(), secondary.clone());

        let ctx =
            CallContext::new("unit / fallback").with_timeout(Duration::from_millis(20));
        let text = router.call(&[Message::user("q")], &ctx).await.unwrap();

        assert_eq!(text, "fallback answer");
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_names_all_attempts() {
        let primary = Arc::new(StubLlm::new("primary", StubBehavior::Fail, ""));
        let secondary = Arc::new(StubLlm::new("secondary", StubBehavior::Fail, ""));
        let router = fast_router(primary.clone(), secondary.clone());

        let ctx = CallContext::new("unit / exhaustion");
        let err = router.call(&[Message::user("q")], &ctx).await.unwrap_err();

        match err {
            DiligenceError::LlmExhausted { label, attempts } => {
                assert_eq!(label, "unit / exhaustion");
                assert_eq!(attempts.matches("primary attempt").count(), 3);
                assert_eq!(attempts.matches("secondary attempt").count(), 3);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 3);
    }

    #[tokio::test]
    async fn test_fallback_disabled_stops_at_primary() {
        let primary = Arc::new(StubLlm::new("primary", StubBehavior::Fail, ""));
        let secondary = Arc::new(StubLlm::succeeding("secondary", "unused"));
        let router = fast_router(primary.clone(), secondary.clone());

        let ctx = CallContext::new("unit / no fallback").without_fallback();
        let err = router.call(&[Message::user("q")], &ctx).await.unwrap_err();

        assert!(matches!(err, DiligenceError::LlmExhausted { .. }));
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_reasoning_channel_has_no_fallback() {
        let primary = Arc::new(StubLlm::succeeding("primary", "unused"));
        let router = LlmRouter::new(primary);

        let err = router
            .reason(&[Message::user("deep question")], "sensitivity reasoning")
            .await
            .unwrap_err();
        assert!(matches!(err, DiligenceError::LlmError(_)));
    }
}
