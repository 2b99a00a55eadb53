//! Ollama (local inference server) backend: the direct HTTP transport.
//!
//! The other two backends run models through this same server, so model
//! listing and metadata for every backend come from here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use benchmatrix_core::error::BackendError;
use benchmatrix_core::model::BackendId;
use benchmatrix_core::results::TokenCounts;
use benchmatrix_core::traits::{
    Backend, GenerateRequest, GenerateResponse, ModelMetadata, DEFAULT_SYSTEM_PROMPT,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Ollama backend.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: &str) -> Self {
        let base = if base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url
        };

        Self {
            base_url: base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn unreachable(&self, e: &reqwest::Error) -> BackendError {
        if e.is_connect() {
            BackendError::Unreachable(format!(
                "Ollama not reachable at {}. Is it running? Start with: ollama serve",
                self.base_url
            ))
        } else {
            BackendError::Unreachable(e.to_string())
        }
    }

    async fn tags(&self) -> Result<Vec<TagEntry>, BackendError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(format!("failed to parse tags response: {e}")))?;
        Ok(tags.models)
    }

    async fn show(&self, model: &str) -> Result<ShowResponse, BackendError> {
        let response = self
            .client
            .post(format!("{}/api/show", self.base_url))
            .json(&serde_json::json!({ "model": model }))
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(BackendError::ModelNotFound(model.to_string()));
        }
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(format!("failed to parse show response: {e}")))
    }

    /// Send the chat request and assemble the streamed reply.
    async fn chat(&self, request: &GenerateRequest) -> Result<(String, Option<TokenCounts>), BackendError> {
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: DEFAULT_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            stream: true,
            keep_alive: request.release_after.then_some(0),
            options: ChatOptions { temperature: 0.0 },
        };

        let mut response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(BackendError::ModelNotFound(format!(
                "'{}' is not available locally. Pull it with: ollama pull {}",
                request.model, request.model
            )));
        }
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }

        let mut stream = ChatStream::default();
        let mut pending: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BackendError::Unreachable(format!("response stream interrupted: {e}")))?
        {
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                stream.push_line(&line, status)?;
            }
        }
        if !pending.is_empty() {
            stream.push_line(&pending, status)?;
        }
        stream.finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u32>,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Accumulates NDJSON chat chunks.
#[derive(Default)]
struct ChatStream {
    content: String,
    done: bool,
    tokens: Option<TokenCounts>,
}

impl ChatStream {
    fn push_line(&mut self, line: &[u8], status: u16) -> Result<(), BackendError> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let chunk: ChatChunk = serde_json::from_str(text)
            .map_err(|e| BackendError::Malformed(format!("bad stream chunk: {e}")))?;
        if let Some(message) = chunk.error {
            return Err(BackendError::Api { status, message });
        }
        if let Some(message) = chunk.message {
            self.content.push_str(&message.content);
        }
        if chunk.done {
            self.done = true;
            if chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some() {
                self.tokens = Some(TokenCounts {
                    prompt_tokens: chunk.prompt_eval_count.unwrap_or(0),
                    completion_tokens: chunk.eval_count.unwrap_or(0),
                });
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<(String, Option<TokenCounts>), BackendError> {
        if !self.done {
            return Err(BackendError::Malformed(
                "stream ended without a final chunk".into(),
            ));
        }
        Ok((self.content, self.tokens))
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct ShowResponse {
    #[serde(default)]
    model_info: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    details: Option<ShowDetails>,
}

#[derive(Deserialize)]
struct ShowDetails {
    #[serde(default)]
    parameter_size: Option<String>,
}

#[async_trait]
impl Backend for OllamaBackend {
    fn id(&self) -> BackendId {
        BackendId::Ollama
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %self.base_url, "ollama probe failed: {e}");
                false
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.tags().await?.into_iter().map(|m| m.name).collect())
    }

    async fn model_info(&self, model: &str) -> ModelMetadata {
        let size_bytes = match self.tags().await {
            Ok(tags) => tags
                .iter()
                .find(|t| same_model(&t.name, model))
                .map(|t| t.size)
                .unwrap_or(0),
            Err(e) => {
                tracing::debug!(%model, "could not list models for size: {e}");
                0
            }
        };

        let from_show = match self.show(model).await {
            Ok(show) => parameters_from_show(&show),
            Err(e) => {
                tracing::debug!(%model, "model show failed: {e}");
                None
            }
        };

        let parameters_b = from_show.or_else(|| parameters_from_tag(model)).unwrap_or_else(|| {
            tracing::warn!(
                %model,
                "could not determine parameter count; assuming {}B",
                ModelMetadata::fallback().parameters_b
            );
            ModelMetadata::fallback().parameters_b
        });

        ModelMetadata {
            size_bytes,
            parameters_b,
        }
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        let start = Instant::now();
        let (output, tokens) = tokio::time::timeout(request.deadline, self.chat(request))
            .await
            .map_err(|_| BackendError::Timeout {
                after_ms: request.deadline.as_millis() as u64,
            })??;

        Ok(GenerateResponse {
            output,
            duration_ms: start.elapsed().as_millis() as u64,
            tokens,
        })
    }
}

/// `qwen2.5-coder` and `qwen2.5-coder:latest` name the same model.
fn same_model(listed: &str, requested: &str) -> bool {
    listed == requested
        || (!requested.contains(':') && listed.strip_suffix(":latest") == Some(requested))
}

fn parameters_from_show(show: &ShowResponse) -> Option<f64> {
    let from_info = show
        .model_info
        .as_ref()
        .and_then(|info| info.get("general.parameter_count"))
        .and_then(|v| v.as_f64())
        .filter(|n| *n > 0.0)
        .map(|n| n / 1e9);

    from_info.or_else(|| {
        show.details
            .as_ref()
            .and_then(|d| d.parameter_size.as_deref())
            .and_then(parse_parameter_size)
    })
}

/// Parse a human parameter size like `7.6B`, `494M` or `1.2T` into billions.
pub fn parse_parameter_size(text: &str) -> Option<f64> {
    let text = text.trim();
    let unit = text.chars().last()?;
    let number = &text[..text.len() - unit.len_utf8()];
    let scale = match unit.to_ascii_uppercase() {
        'B' => 1.0,
        'M' => 1e-3,
        'T' => 1e3,
        'K' => 1e-6,
        _ => return None,
    };
    let value: f64 = number.trim().parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value * scale)
}

/// Guess the parameter count from a tag like `qwen2.5-coder:14b`.
pub fn parameters_from_tag(model: &str) -> Option<f64> {
    let (name, tag) = model.split_once(':').unwrap_or((model, ""));
    tag.split(['-', '_'])
        .chain(name.split(['-', '_']))
        .find_map(|segment| {
            // Only size-like segments: digits with a unit suffix
            let first = segment.chars().next()?;
            if !first.is_ascii_digit() {
                return None;
            }
            parse_parameter_size(segment)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(model: &str) -> GenerateRequest {
        GenerateRequest {
            model: model.into(),
            prompt: "Write an add function".into(),
            deadline: Duration::from_secs(5),
            release_after: false,
        }
    }

    fn ndjson(lines: &[serde_json::Value]) -> String {
        lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn assembles_streamed_reply() {
        let server = MockServer::start().await;
        let body = ndjson(&[
            serde_json::json!({"message": {"role": "assistant", "content": "```ts\nexport const "}, "done": false}),
            serde_json::json!({"message": {"role": "assistant", "content": "x = 1;\n```"}, "done": false}),
            serde_json::json!({"message": {"role": "assistant", "content": ""}, "done": true, "prompt_eval_count": 30, "eval_count": 15}),
        ]);

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        let response = backend.generate(&request("qwen2.5-coder:7b")).await.unwrap();
        assert_eq!(response.output, "```ts\nexport const x = 1;\n```");
        let tokens = response.tokens.unwrap();
        assert_eq!(tokens.prompt_tokens, 30);
        assert_eq!(tokens.total(), 45);
    }

    #[tokio::test]
    async fn release_after_sets_keep_alive_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"keep_alive": 0})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"message":{"content":"ok"},"done":true}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        let mut req = request("m");
        req.release_after = true;
        backend.generate(&req).await.unwrap();
    }

    #[tokio::test]
    async fn deadline_becomes_actionable_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"message":{"content":"late"},"done":true}"#)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        let mut req = request("m");
        req.deadline = Duration::from_millis(200);
        let err = backend.generate(&req).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("increase the timeout"));
    }

    #[tokio::test]
    async fn model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        let err = backend.generate(&request("nonexistent")).await.unwrap_err();
        assert!(matches!(err, BackendError::ModelNotFound(_)));
        assert!(err.to_string().contains("ollama pull nonexistent"));
    }

    #[tokio::test]
    async fn in_stream_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"error":"out of memory"}"#),
            )
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        let err = backend.generate(&request("m")).await.unwrap_err();
        assert!(err.to_string().contains("out of memory"));
    }

    #[tokio::test]
    async fn truncated_stream_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"message":{"content":"half"},"done":false}"#),
            )
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        let err = backend.generate(&request("m")).await.unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[tokio::test]
    async fn unreachable_server() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let backend = OllamaBackend::new(&format!("http://127.0.0.1:{port}"));
        assert!(!backend.is_available().await);
        let err = backend.list_models().await.unwrap_err();
        assert!(matches!(err, BackendError::Unreachable(_)));
    }

    #[tokio::test]
    async fn lists_models_in_server_order() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "models": [
                {"name": "qwen2.5-coder:32b", "size": 19851349856_u64},
                {"name": "llama3.2:latest", "size": 2019393189_u64}
            ]
        });
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        assert!(backend.is_available().await);
        let models = backend.list_models().await.unwrap();
        assert_eq!(models, vec!["qwen2.5-coder:32b", "llama3.2:latest"]);
    }

    #[tokio::test]
    async fn model_info_prefers_exact_parameter_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3.2:latest", "size": 2019393189_u64}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/show"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model_info": {"general.parameter_count": 3212749888_u64},
                "details": {"parameter_size": "3.2B"}
            })))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        let meta = backend.model_info("llama3.2").await;
        assert_eq!(meta.size_bytes, 2019393189);
        assert!((meta.parameters_b - 3.212749888).abs() < 1e-9);
    }

    #[tokio::test]
    async fn model_info_falls_back_to_details_then_tag_then_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/show"))
            .and(body_partial_json(serde_json::json!({"model": "tiny:latest"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "details": {"parameter_size": "494M"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/show"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri());
        let tiny = backend.model_info("tiny:latest").await;
        assert!((tiny.parameters_b - 0.494).abs() < 1e-9);
        assert_eq!(tiny.size_bytes, 0);

        let tagged = backend.model_info("qwen2.5-coder:14b").await;
        assert_eq!(tagged.parameters_b, 14.0);

        let unknown = backend.model_info("mystery").await;
        assert_eq!(unknown, ModelMetadata::fallback());
    }

    #[test]
    fn parameter_size_units() {
        assert_eq!(parse_parameter_size("7.6B"), Some(7.6));
        assert!((parse_parameter_size("494M").unwrap() - 0.494).abs() < 1e-12);
        assert!((parse_parameter_size("1.2T").unwrap() - 1200.0).abs() < 1e-9);
        assert_eq!(parse_parameter_size("14b"), Some(14.0));
        assert_eq!(parse_parameter_size(""), None);
        assert_eq!(parse_parameter_size("B"), None);
        assert_eq!(parse_parameter_size("latest"), None);
        assert_eq!(parse_parameter_size("-3B"), None);
    }

    #[test]
    fn parameters_from_model_tag() {
        assert_eq!(parameters_from_tag("qwen2.5-coder:14b"), Some(14.0));
        assert_eq!(parameters_from_tag("llama3.3:70b-instruct-q8_0"), Some(70.0));
        assert_eq!(parameters_from_tag("qwen2.5-coder:0.5b"), Some(0.5));
        assert_eq!(parameters_from_tag("deepseek-coder-6.7b"), Some(6.7));
        assert_eq!(parameters_from_tag("qwen2.5-coder:latest"), None);
        assert_eq!(parameters_from_tag("mystery"), None);
    }

    #[test]
    fn latest_alias_matches() {
        assert!(same_model("llama3.2:latest", "llama3.2"));
        assert!(same_model("llama3.2:1b", "llama3.2:1b"));
        assert!(!same_model("llama3.2:1b", "llama3.2"));
    }
}
