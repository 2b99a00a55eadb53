//! Result types produced by the execution engine.
//!
//! These are the engine's output contract: the artifact writer, index
//! builder and comparison tooling only ever see these shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{GenerationFailureKind, ScoringFailureKind};
use crate::extract::ExtractionMethod;
use crate::model::BackendId;
use crate::value::Value;

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenCounts {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// What the generation stage produced for one item.
///
/// `output` is present iff `success`; `error` and `failure_kind` are present
/// iff not. Use the constructors to keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<GenerationFailureKind>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenCounts>,
}

impl GenerationOutcome {
    pub fn succeeded(output: String, duration_ms: u64, tokens: Option<TokenCounts>) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            failure_kind: None,
            duration_ms,
            tokens,
        }
    }

    pub fn failed(error: String, kind: GenerationFailureKind, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            failure_kind: Some(kind),
            duration_ms,
            tokens: None,
        }
    }
}

/// What a single scoring check looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Export,
    TestCase,
}

/// Verdict of one scoring check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDetail {
    pub kind: CheckKind,
    /// Export name or call target.
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of scoring one item's generated code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub details: Vec<CaseDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    /// Engine-level error that stopped scoring early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<ScoringFailureKind>,
}

impl ScoringResult {
    /// A result for an engine failure before any check ran.
    pub fn aborted(
        kind: ScoringFailureKind,
        error: String,
        total: u32,
        extraction_method: Option<ExtractionMethod>,
    ) -> Self {
        Self {
            passed: 0,
            failed: total,
            total,
            details: Vec::new(),
            extraction_method,
            error: Some(error),
            failure_kind: Some(kind),
        }
    }

    /// Fraction of checks passed, 0.0 when there were none.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

/// Lifecycle status of a matrix item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Structured generation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub kind: GenerationFailureKind,
    pub message: String,
}

/// Structured scoring failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringFailure {
    pub kind: ScoringFailureKind,
    pub message: String,
}

/// Everything recorded about one executed matrix item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: String,
    pub model: String,
    pub backend: BackendId,
    pub task: String,
    pub prompt_variant: String,
    pub status: ItemStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Deadline the generation ran under.
    pub timeout_ms: u64,
    pub generation: GenerationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_failure: Option<GenerationFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoringResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_failure: Option<ScoringFailure>,
}
