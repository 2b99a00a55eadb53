//! Failure classification.
//!
//! Maps free-text error messages onto two closed taxonomies, one for the
//! generation stage and one for scoring. The underlying CLIs expose no
//! structured error codes, so this is ordered, case-insensitive substring
//! matching: first rule wins, anything unmatched is `unknown`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why generation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationFailureKind {
    Timeout,
    ApiError,
    HarnessError,
    PromptNotFound,
    Unknown,
}

/// Why scoring failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFailureKind {
    NoSpec,
    Extraction,
    SpecLoad,
    Import,
    ExportValidation,
    TestExecution,
    Unknown,
}

impl fmt::Display for GenerationFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenerationFailureKind::Timeout => "timeout",
            GenerationFailureKind::ApiError => "api_error",
            GenerationFailureKind::HarnessError => "harness_error",
            GenerationFailureKind::PromptNotFound => "prompt_not_found",
            GenerationFailureKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ScoringFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScoringFailureKind::NoSpec => "no_spec",
            ScoringFailureKind::Extraction => "extraction",
            ScoringFailureKind::SpecLoad => "spec_load",
            ScoringFailureKind::Import => "import",
            ScoringFailureKind::ExportValidation => "export_validation",
            ScoringFailureKind::TestExecution => "test_execution",
            ScoringFailureKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

const GENERATION_RULES: &[(GenerationFailureKind, &[&str])] = &[
    (
        GenerationFailureKind::Timeout,
        &["timed out", "timeout", "deadline", "aborterror", "operation was aborted"],
    ),
    (
        GenerationFailureKind::PromptNotFound,
        &["prompt not found", "no prompt"],
    ),
    (
        GenerationFailureKind::HarnessError,
        &[
            "harness",
            "did not recognize model",
            "empty output",
            "exited with",
            "spawn",
            "companion",
            "command not found",
            "enoent",
        ],
    ),
    (
        GenerationFailureKind::ApiError,
        &[
            "api error",
            "http",
            "status code",
            "unreachable",
            "not reachable",
            "connection refused",
            "econnrefused",
            "network",
            "model not found",
            "malformed",
        ],
    ),
];

const SCORING_RULES: &[(ScoringFailureKind, &[&str])] = &[
    (
        ScoringFailureKind::NoSpec,
        &["no scoring spec", "no spec"],
    ),
    (
        ScoringFailureKind::SpecLoad,
        &["failed to load spec", "invalid spec", "spec parse"],
    ),
    (
        ScoringFailureKind::Extraction,
        &["extraction", "no code"],
    ),
    (
        ScoringFailureKind::ExportValidation,
        &["missing export", "export validation", "wrong export kind"],
    ),
    (
        ScoringFailureKind::Import,
        &[
            "import",
            "module load",
            "failed to load module",
            "syntaxerror",
            "cannot find module",
            "module runtime",
        ],
    ),
    (
        ScoringFailureKind::TestExecution,
        &["test case", "test execution", "instance", "call", "typeerror", "referenceerror"],
    ),
];

/// Classify a generation-stage error message. Never panics.
pub fn classify_generation_failure(message: &str) -> GenerationFailureKind {
    classify(message, GENERATION_RULES, GenerationFailureKind::Unknown, "generation")
}

/// Classify a scoring-stage error message. Never panics.
pub fn classify_scoring_failure(message: &str) -> ScoringFailureKind {
    classify(message, SCORING_RULES, ScoringFailureKind::Unknown, "scoring")
}

fn classify<K: Copy>(message: &str, rules: &[(K, &[&str])], unknown: K, stage: &str) -> K {
    let lower = message.to_lowercase();
    for (kind, patterns) in rules {
        if patterns.iter().any(|p| lower.contains(p)) {
            return *kind;
        }
    }
    // Surface unrecognized text so a rule can be added for it
    tracing::warn!(stage, message, "unrecognized failure text, classified as unknown");
    unknown
}
