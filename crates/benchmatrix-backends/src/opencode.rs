//! OpenCode CLI backend, attached to a long-lived companion server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::instrument;

use benchmatrix_core::error::BackendError;
use benchmatrix_core::model::BackendId;
use benchmatrix_core::traits::{
    Backend, CompanionService, GenerateRequest, GenerateResponse, ModelMetadata,
};

use crate::agent::{evaluate_output, program_available, run_agent, AgentCommand, MIN_OUTPUT_CHARS};
use crate::companion::CompanionServer;
use crate::ollama::OllamaBackend;

pub const DEFAULT_PROGRAM: &str = "opencode";

/// An empty answer faster than this means the server rejected the model.
pub const NOT_RECOGNIZED_WINDOW: Duration = Duration::from_secs(2);

/// Provider prefix OpenCode expects in front of Ollama model names.
const MODEL_PREFIX: &str = "ollama/";

pub struct OpencodeBackend {
    ollama: Arc<OllamaBackend>,
    companion: Arc<CompanionServer>,
    program: String,
    args: Vec<String>,
    min_output_chars: usize,
}

impl OpencodeBackend {
    pub fn new(ollama: Arc<OllamaBackend>, companion: Arc<CompanionServer>) -> Self {
        Self {
            ollama,
            companion,
            program: DEFAULT_PROGRAM.to_string(),
            args: vec!["run".into()],
            min_output_chars: MIN_OUTPUT_CHARS,
        }
    }

    /// Override the program and the arguments placed before
    /// `--attach <url> --model <model> <prompt>`.
    pub fn with_command(mut self, program: &str, args: Vec<String>) -> Self {
        self.program = program.to_string();
        self.args = args;
        self
    }

    pub fn with_min_output_chars(mut self, min: usize) -> Self {
        self.min_output_chars = min;
        self
    }

    fn command(&self, url: &str, request: &GenerateRequest) -> AgentCommand {
        let mut args = self.args.clone();
        args.extend([
            "--attach".to_string(),
            url.to_string(),
            "--model".to_string(),
            format!("{MODEL_PREFIX}{}", request.model),
            request.prompt.clone(),
        ]);
        AgentCommand {
            program: self.program.clone(),
            args,
            env: Vec::new(),
            stdin: None,
        }
    }
}

#[async_trait]
impl Backend for OpencodeBackend {
    fn id(&self) -> BackendId {
        BackendId::Opencode
    }

    async fn is_available(&self) -> bool {
        program_available(&self.program).await && self.ollama.is_available().await
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        self.ollama.list_models().await
    }

    async fn model_info(&self, model: &str) -> ModelMetadata {
        self.ollama.model_info(model).await
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        let start = Instant::now();
        let url = self.companion.ensure_running().await?;
        let remaining = request.deadline.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(BackendError::Timeout {
                after_ms: request.deadline.as_millis() as u64,
            });
        }

        let output = run_agent(&self.command(&url, request), remaining).await?;
        let text = match evaluate_output(&self.program, &output, self.min_output_chars) {
            Ok(text) => text,
            Err(BackendError::EmptyOutput { .. }) if output.elapsed < NOT_RECOGNIZED_WINDOW => {
                return Err(BackendError::ModelNotRecognized {
                    model: request.model.clone(),
                    elapsed_ms: output.elapsed.as_millis() as u64,
                });
            }
            Err(e) => return Err(e),
        };

        Ok(GenerateResponse {
            output: text,
            duration_ms: start.elapsed().as_millis() as u64,
            tokens: None,
        })
    }
}
