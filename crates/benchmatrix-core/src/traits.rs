//! Core trait definitions for backends, scorers and companion servers.
//!
//! These async traits are implemented by the `benchmatrix-backends` and
//! `benchmatrix-scoring` crates respectively.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::model::BackendId;
use crate::results::{ScoringResult, TokenCounts};

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Uniform capability surface over a code-generation transport.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which backend this is.
    fn id(&self) -> BackendId;

    /// Whether the backend can currently be used. Never errors.
    async fn is_available(&self) -> bool;

    /// Models the inference server knows, in server order.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;

    /// Size metadata for one model.
    ///
    /// Best effort: unparsable metadata falls back to
    /// [`ModelMetadata::fallback`] instead of failing.
    async fn model_info(&self, model: &str) -> ModelMetadata;

    /// Generate code for a prompt within the request's deadline.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError>;
}

/// Request to generate code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier as known to the inference server.
    pub model: String,
    /// The full prompt text.
    pub prompt: String,
    /// Wall-clock budget for the whole call.
    pub deadline: Duration,
    /// Ask the inference server to unload the model afterwards.
    #[serde(default)]
    pub release_after: bool,
}

/// Successful generation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Raw text as the backend returned it.
    pub output: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub tokens: Option<TokenCounts>,
}

/// Default parameter count assumed when metadata cannot be parsed.
pub const DEFAULT_PARAMETERS_B: f64 = 7.0;

/// Size information about a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// On-disk size, 0 when unknown.
    pub size_bytes: u64,
    /// Parameter count in billions.
    pub parameters_b: f64,
}

impl ModelMetadata {
    pub fn fallback() -> Self {
        Self {
            size_bytes: 0,
            parameters_b: DEFAULT_PARAMETERS_B,
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer trait
// ---------------------------------------------------------------------------

/// Scores raw generated output against a task's scoring spec.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score `raw_output` for `task`.
    ///
    /// Engine-level failures are reported inside the result, never as an
    /// error, so one bad item cannot abort a run.
    async fn score(&self, task: &str, raw_output: &str) -> ScoringResult;
}

// ---------------------------------------------------------------------------
// Companion server trait
// ---------------------------------------------------------------------------

/// Lifecycle handle of a long-lived server some backends attach to.
#[async_trait]
pub trait CompanionService: Send + Sync {
    /// Make sure a healthy server is listening and return its base URL.
    async fn ensure_running(&self) -> Result<String, BackendError>;

    /// Stop the server this handle started, if any. Idempotent.
    async fn stop(&self);
}

// ---------------------------------------------------------------------------
// Default system prompt
// ---------------------------------------------------------------------------

/// System prompt for backends that take one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a code generation assistant. Respond with a single module, in the language the task asks for, inside one fenced code block. Export every function and class the task asks for. Do not run tools, read files or ask questions.";
