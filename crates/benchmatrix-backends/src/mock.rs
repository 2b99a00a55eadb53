//! Mock backend for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use benchmatrix_core::error::BackendError;
use benchmatrix_core::model::BackendId;
use benchmatrix_core::results::TokenCounts;
use benchmatrix_core::traits::{Backend, GenerateRequest, GenerateResponse, ModelMetadata};

/// How a mock answers `generate`.
#[derive(Debug, Clone)]
enum Behavior {
    Respond,
    TimeOut,
    Unreachable,
}

/// A mock backend for testing the engine without a real inference server.
///
/// Returns configurable responses based on prompt content matching.
pub struct MockBackend {
    id: BackendId,
    /// Map of prompt substring → raw output.
    responses: HashMap<String, String>,
    /// Output if no prompt matches.
    default_response: String,
    behavior: Behavior,
    available: bool,
    metadata: ModelMetadata,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockBackend {
    /// Create a mock with the given prompt→output mappings.
    pub fn new(responses: HashMap<String, String>) -> Self {
        Self {
            id: BackendId::Ollama,
            responses,
            default_response: "export function placeholder() {}".to_string(),
            behavior: Behavior::Respond,
            available: true,
            metadata: ModelMetadata::fallback(),
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Create a mock that always returns the same output.
    pub fn with_fixed_response(response: &str) -> Self {
        let mut mock = Self::new(HashMap::new());
        mock.default_response = response.to_string();
        mock
    }

    /// A mock whose generations always hit the deadline.
    pub fn timing_out() -> Self {
        let mut mock = Self::new(HashMap::new());
        mock.behavior = Behavior::TimeOut;
        mock
    }

    /// A mock whose server cannot be reached.
    pub fn unreachable() -> Self {
        let mut mock = Self::new(HashMap::new());
        mock.behavior = Behavior::Unreachable;
        mock.available = false;
        mock
    }

    /// Report as a different backend.
    pub fn as_backend(mut self, id: BackendId) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Get the number of `generate` calls made.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Get the last request made to this backend.
    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        match self.behavior {
            Behavior::Unreachable => Err(BackendError::Unreachable("mock is offline".into())),
            _ => Ok(vec!["mock-model".into()]),
        }
    }

    async fn model_info(&self, _model: &str) -> ModelMetadata {
        self.metadata
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request.clone());

        match self.behavior {
            Behavior::TimeOut => {
                return Err(BackendError::Timeout {
                    after_ms: request.deadline.as_millis() as u64,
                })
            }
            Behavior::Unreachable => {
                return Err(BackendError::Unreachable("mock is offline".into()))
            }
            Behavior::Respond => {}
        }

        let output = self
            .responses
            .iter()
            .find(|(key, _)| request.prompt.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_response.clone());

        // Rough estimate
        let completion_tokens = (output.len() / 4) as u32;
        Ok(GenerateResponse {
            output,
            duration_ms: 1,
            tokens: Some(TokenCounts {
                prompt_tokens: (request.prompt.len() / 4) as u32,
                completion_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(prompt: &str) -> GenerateRequest {
        GenerateRequest {
            model: "mock".into(),
            prompt: prompt.into(),
            deadline: Duration::from_secs(60),
            release_after: false,
        }
    }

    #[tokio::test]
    async fn fixed_response() {
        let backend = MockBackend::with_fixed_response("export const x = 1;");
        let response = backend.generate(&request("anything")).await.unwrap();
        assert_eq!(response.output, "export const x = 1;");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.last_request().unwrap().prompt, "anything");
    }

    #[tokio::test]
    async fn prompt_matching() {
        let mut responses = HashMap::new();
        responses.insert("fibonacci".to_string(), "export function fibonacci() {}".to_string());
        responses.insert("add".to_string(), "export function add() {}".to_string());
        let backend = MockBackend::new(responses);

        let resp = backend.generate(&request("Write a fibonacci function")).await.unwrap();
        assert!(resp.output.contains("fibonacci"));

        let resp = backend.generate(&request("Write an add function")).await.unwrap();
        assert!(resp.output.contains("add"));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn failure_modes() {
        let slow = MockBackend::timing_out();
        assert!(slow.generate(&request("x")).await.unwrap_err().is_timeout());

        let offline = MockBackend::unreachable().as_backend(BackendId::Goose);
        assert_eq!(offline.id(), BackendId::Goose);
        assert!(!offline.is_available().await);
        assert!(offline.list_models().await.is_err());
    }
}
