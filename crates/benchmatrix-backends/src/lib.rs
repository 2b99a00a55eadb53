//! benchmatrix-backends — Code-generation backend adapters.
//!
//! Implements the `Backend` trait for a direct Ollama HTTP transport and for
//! two CLI agents (Goose, OpenCode), plus the companion server that OpenCode
//! attaches to.

pub mod agent;
pub mod companion;
pub mod config;
pub mod goose;
pub mod mock;
pub mod ollama;
pub mod opencode;

pub use benchmatrix_core::error::BackendError;
pub use companion::CompanionServer;
pub use config::{create_backends, load_config, load_config_from, BackendSet, BenchmatrixConfig};
