//! Core data model types for benchmatrix.
//!
//! These are the fundamental types that describe one benchmark matrix:
//! which backends exist, which language the generated code is in, and the
//! individual (model × backend × task × variant) items that get executed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a code-generation backend.
///
/// The set is closed: adding a backend means adding a variant here, and the
/// compiler then points at every `match` that needs to learn about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// Direct HTTP transport to a local Ollama server.
    Ollama,
    /// Command-line agent spawned fresh for every call.
    Goose,
    /// Command-line agent attached to a long-lived companion server.
    Opencode,
}

impl BackendId {
    /// All known backends, in display order.
    pub const ALL: [BackendId; 3] = [BackendId::Ollama, BackendId::Goose, BackendId::Opencode];

    /// Whether this backend needs a companion server before it can generate.
    pub fn requires_companion(self) -> bool {
        match self {
            BackendId::Ollama | BackendId::Goose => false,
            BackendId::Opencode => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::Ollama => "ollama",
            BackendId::Goose => "goose",
            BackendId::Opencode => "opencode",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(BackendId::Ollama),
            "goose" => Ok(BackendId::Goose),
            "opencode" => Ok(BackendId::Opencode),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Language of the generated code module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    TypeScript,
    JavaScript,
}

impl Language {
    /// Fence tags that name this language directly.
    pub fn fence_tags(self) -> &'static [&'static str] {
        match self {
            Language::TypeScript => &["typescript", "ts", "tsx", "mts"],
            Language::JavaScript => &["javascript", "js", "jsx", "mjs"],
        }
    }

    /// Fence tags of the closest sibling language.
    pub fn sibling_fence_tags(self) -> &'static [&'static str] {
        Language::sibling(self).fence_tags()
    }

    fn sibling(self) -> Language {
        match self {
            Language::TypeScript => Language::JavaScript,
            Language::JavaScript => Language::TypeScript,
        }
    }

    /// File extension used when the module is written to disk.
    ///
    /// Both extensions force ES module semantics regardless of any
    /// surrounding `package.json`.
    pub fn module_extension(self) -> &'static str {
        match self {
            Language::TypeScript => "mts",
            Language::JavaScript => "mjs",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::TypeScript => write!(f, "typescript"),
            Language::JavaScript => write!(f, "javascript"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "typescript" | "ts" => Ok(Language::TypeScript),
            "javascript" | "js" => Ok(Language::JavaScript),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

/// One execution unit of the benchmark matrix.
///
/// Created once by [`expand_matrix`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixItem {
    /// Stable identifier derived from the other four fields.
    pub id: String,
    /// Model name as understood by the inference server.
    pub model: String,
    /// Backend that performs the generation.
    pub backend: BackendId,
    /// Task slug; selects both the prompt directory and the scoring spec.
    pub task: String,
    /// Prompt variant within the task.
    pub prompt_variant: String,
}

impl MatrixItem {
    pub fn new(model: &str, backend: BackendId, task: &str, prompt_variant: &str) -> Self {
        let id = [model, backend.as_str(), task, prompt_variant]
            .iter()
            .map(|part| sanitize_id_part(part))
            .collect::<Vec<_>>()
            .join("__");
        Self {
            id,
            model: model.to_string(),
            backend,
            task: task.to_string(),
            prompt_variant: prompt_variant.to_string(),
        }
    }
}

fn sanitize_id_part(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Expand the cartesian product models × backends × tasks × variants.
///
/// Nesting order is model-major so that consecutive items share a model,
/// which keeps the local inference server from swapping models needlessly.
pub fn expand_matrix(
    models: &[String],
    backends: &[BackendId],
    tasks: &[String],
    variants: &[String],
) -> Vec<MatrixItem> {
    let mut items = Vec::with_capacity(models.len() * backends.len() * tasks.len() * variants.len());
    for model in models {
        for &backend in backends {
            for task in tasks {
                for variant in variants {
                    items.push(MatrixItem::new(model, backend, task, variant));
                }
            }
        }
    }
    items
}
