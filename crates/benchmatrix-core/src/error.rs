//! Backend error types.
//!
//! These error types represent failures when talking to a code-generation
//! backend. They live in `benchmatrix-core` so the executor can record them
//! without knowing which adapter produced them. Every message is worded so
//! that [`crate::classify::classify_generation_failure`] maps it to the
//! intended failure kind; the CLIs underneath give us nothing better than
//! text to go on.

use thiserror::Error;

/// Errors that can occur when invoking a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The transport could not reach the backend at all.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The per-item deadline elapsed before generation finished.
    #[error(
        "generation timed out after {after_ms}ms; increase the timeout \
         (--timeout-base-ms) if this model needs longer to load or generate"
    )]
    Timeout { after_ms: u64 },

    /// The backend answered with an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The requested model is not installed on the inference server.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The backend answered, but the payload could not be understood.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// A harness process finished but produced too little output to be real.
    #[error("harness produced empty output ({chars} chars, minimum {min})")]
    EmptyOutput { chars: usize, min: usize },

    /// The attached server rejected the model without saying so.
    #[error(
        "harness returned empty output after {elapsed_ms}ms; \
         backend did not recognize model '{model}'"
    )]
    ModelNotRecognized { model: String, elapsed_ms: u64 },

    /// A harness process exited unsuccessfully.
    #[error("harness process `{program}` exited with {status}: {stderr}")]
    ProcessFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// A harness process could not be started.
    #[error("failed to spawn harness `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The companion server never became healthy.
    #[error("companion server failed to start: {0}")]
    CompanionStartup(String),
}

impl BackendError {
    /// Returns `true` if this error was caused by the deadline elapsing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout { .. })
    }
}
