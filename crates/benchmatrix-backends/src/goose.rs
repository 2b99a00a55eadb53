//! Goose CLI backend: a fresh, stateless agent process per call.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use benchmatrix_core::error::BackendError;
use benchmatrix_core::model::BackendId;
use benchmatrix_core::traits::{Backend, GenerateRequest, GenerateResponse, ModelMetadata};

use crate::agent::{evaluate_output, program_available, run_agent, AgentCommand, MIN_OUTPUT_CHARS};
use crate::ollama::OllamaBackend;

pub const DEFAULT_PROGRAM: &str = "goose";

/// One turn, no session file, instructions read from stdin.
pub fn default_args() -> Vec<String> {
    ["run", "--no-session", "--quiet", "--max-turns", "1", "--instructions", "-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub struct GooseBackend {
    ollama: Arc<OllamaBackend>,
    program: String,
    args: Vec<String>,
    min_output_chars: usize,
}

impl GooseBackend {
    pub fn new(ollama: Arc<OllamaBackend>) -> Self {
        Self {
            ollama,
            program: DEFAULT_PROGRAM.to_string(),
            args: default_args(),
            min_output_chars: MIN_OUTPUT_CHARS,
        }
    }

    pub fn with_command(mut self, program: &str, args: Vec<String>) -> Self {
        self.program = program.to_string();
        self.args = args;
        self
    }

    pub fn with_min_output_chars(mut self, min: usize) -> Self {
        self.min_output_chars = min;
        self
    }

    fn command(&self, request: &GenerateRequest) -> AgentCommand {
        AgentCommand {
            program: self.program.clone(),
            args: self.args.clone(),
            env: vec![
                ("GOOSE_PROVIDER".into(), "ollama".into()),
                ("GOOSE_MODEL".into(), request.model.clone()),
                ("OLLAMA_HOST".into(), self.ollama.base_url().to_string()),
            ],
            stdin: Some(request.prompt.clone()),
        }
    }
}

#[async_trait]
impl Backend for GooseBackend {
    fn id(&self) -> BackendId {
        BackendId::Goose
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
        let output = run_agent(&self.command(request), request.deadline).await?;
        let text = evaluate_output(&self.program, &output, self.min_output_chars)?;
        tracing::debug!(
            elapsed_ms = output.elapsed.as_millis() as u64,
            chars = text.len(),
            "goose finished"
        );
        Ok(GenerateResponse {
            output: text,
            duration_ms: output.elapsed.as_millis() as u64,
            tokens: None,
        })
    }
}
