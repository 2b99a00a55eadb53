//! Benchmatrix configuration and backend factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use benchmatrix_core::model::{BackendId, Language};
use benchmatrix_core::traits::Backend;

use crate::agent::MIN_OUTPUT_CHARS;
use crate::companion::{default_serve_args, CompanionServer, DEFAULT_PORT};
use crate::goose::GooseBackend;
use crate::ollama::{OllamaBackend, DEFAULT_BASE_URL};
use crate::opencode::OpencodeBackend;

/// `[ollama]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
        }
    }
}

/// `[goose]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GooseConfig {
    #[serde(default = "default_goose_program")]
    pub program: String,
    #[serde(default = "crate::goose::default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_min_output_chars")]
    pub min_output_chars: usize,
}

impl Default for GooseConfig {
    fn default() -> Self {
        Self {
            program: default_goose_program(),
            args: crate::goose::default_args(),
            min_output_chars: MIN_OUTPUT_CHARS,
        }
    }
}

/// `[opencode]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpencodeConfig {
    #[serde(default = "default_opencode_program")]
    pub program: String,
    /// Arguments before `--attach <url> --model <model> <prompt>`.
    #[serde(default = "default_opencode_args")]
    pub args: Vec<String>,
    /// Arguments for the companion server; `{port}` is substituted.
    #[serde(default = "default_serve_args")]
    pub serve_args: Vec<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_min_output_chars")]
    pub min_output_chars: usize,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

impl Default for OpencodeConfig {
    fn default() -> Self {
        Self {
            program: default_opencode_program(),
            args: default_opencode_args(),
            serve_args: default_serve_args(),
            port: DEFAULT_PORT,
            min_output_chars: MIN_OUTPUT_CHARS,
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

/// `[runtime]` section: the JavaScript runtime that hosts generated code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_node")]
    pub program: String,
    #[serde(default = "default_typescript_args")]
    pub typescript_args: Vec<String>,
    #[serde(default = "default_javascript_args")]
    pub javascript_args: Vec<String>,
    #[serde(default = "default_budget_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_budget_ms")]
    pub call_timeout_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            program: default_node(),
            typescript_args: default_typescript_args(),
            javascript_args: default_javascript_args(),
            load_timeout_ms: default_budget_ms(),
            call_timeout_ms: default_budget_ms(),
        }
    }
}

/// Top-level benchmatrix configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmatrixConfig {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub goose: GooseConfig,
    #[serde(default)]
    pub opencode: OpencodeConfig,
    #[serde(default)]
    pub runtime: RuntimeSection,
    /// Root of `<task>/<variant>.md` prompt files.
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    /// Root of `<task>.toml` scoring specs.
    #[serde(default = "default_specs_dir")]
    pub specs_dir: PathBuf,
    /// Override of the timeout policy's base allowance.
    #[serde(default)]
    pub timeout_base_ms: Option<u64>,
    /// Language generated code is expected in.
    #[serde(default)]
    pub language: Language,
}

fn default_ollama_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_goose_program() -> String {
    crate::goose::DEFAULT_PROGRAM.to_string()
}
fn default_opencode_program() -> String {
    crate::opencode::DEFAULT_PROGRAM.to_string()
}
fn default_opencode_args() -> Vec<String> {
    vec!["run".to_string()]
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_min_output_chars() -> usize {
    MIN_OUTPUT_CHARS
}
fn default_startup_timeout_ms() -> u64 {
    30_000
}
fn default_node() -> String {
    "node".to_string()
}
fn default_typescript_args() -> Vec<String> {
    vec!["--experimental-strip-types".into(), "--no-warnings".into()]
}
fn default_javascript_args() -> Vec<String> {
    vec!["--no-warnings".into()]
}
fn default_budget_ms() -> u64 {
    5_000
}
fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}
fn default_specs_dir() -> PathBuf {
    PathBuf::from("specs")
}

impl Default for BenchmatrixConfig {
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            goose: GooseConfig::default(),
            opencode: OpencodeConfig::default(),
            runtime: RuntimeSection::default(),
            prompts_dir: default_prompts_dir(),
            specs_dir: default_specs_dir(),
            timeout_base_ms: None,
            language: Language::default(),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut from = 0;
    while let Some(offset) = result[from..].find("${") {
        let start = from + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        // Don't rescan substituted text
        from = start + value.len();
    }
    result
}

fn resolve_path(path: &Path) -> PathBuf {
    PathBuf::from(resolve_env_vars(&path.to_string_lossy()))
}

impl BenchmatrixConfig {
    fn resolve_env(&mut self) {
        self.ollama.base_url = resolve_env_vars(&self.ollama.base_url);
        self.goose.program = resolve_env_vars(&self.goose.program);
        self.opencode.program = resolve_env_vars(&self.opencode.program);
        self.runtime.program = resolve_env_vars(&self.runtime.program);
        self.prompts_dir = resolve_path(&self.prompts_dir);
        self.specs_dir = resolve_path(&self.specs_dir);
    }

    /// Companion server for the server-attached backend. Nothing is
    /// spawned until it is first needed.
    pub fn companion(&self) -> CompanionServer {
        CompanionServer::new(
            &self.opencode.program,
            self.opencode.serve_args.clone(),
            self.opencode.port,
        )
        .with_startup_timeout(Duration::from_millis(self.opencode.startup_timeout_ms))
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `benchmatrix.toml` in the current directory
/// 2. `~/.config/benchmatrix/config.toml`
///
/// Environment variable overrides: `BENCHMATRIX_OLLAMA_URL`, `BENCHMATRIX_NODE`.
pub fn load_config() -> Result<BenchmatrixConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<BenchmatrixConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("benchmatrix.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config");
            toml::from_str::<BenchmatrixConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => BenchmatrixConfig::default(),
    };

    if let Ok(url) = std::env::var("BENCHMATRIX_OLLAMA_URL") {
        config.ollama.base_url = url;
    }
    if let Ok(node) = std::env::var("BENCHMATRIX_NODE") {
        config.runtime.program = node;
    }

    config.resolve_env();
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("benchmatrix"))
}

/// Backends built from one configuration, sharing one Ollama client and
/// one companion server.
pub struct BackendSet {
    pub backends: HashMap<BackendId, Arc<dyn Backend>>,
    pub ollama: Arc<OllamaBackend>,
    pub companion: Arc<CompanionServer>,
}

/// Create a backend instance from its configuration.
pub fn create_backend(
    id: BackendId,
    config: &BenchmatrixConfig,
    ollama: &Arc<OllamaBackend>,
    companion: &Arc<CompanionServer>,
) -> Arc<dyn Backend> {
    match id {
        BackendId::Ollama => Arc::clone(ollama) as Arc<dyn Backend>,
        BackendId::Goose => Arc::new(
            GooseBackend::new(Arc::clone(ollama))
                .with_command(&config.goose.program, config.goose.args.clone())
                .with_min_output_chars(config.goose.min_output_chars),
        ),
        BackendId::Opencode => Arc::new(
            OpencodeBackend::new(Arc::clone(ollama), Arc::clone(companion))
                .with_command(&config.opencode.program, config.opencode.args.clone())
                .with_min_output_chars(config.opencode.min_output_chars),
        ),
    }
}

/// Create the requested backends.
pub fn create_backends(config: &BenchmatrixConfig, ids: &[BackendId]) -> BackendSet {
    let ollama = Arc::new(OllamaBackend::new(&config.ollama.base_url));
    let companion = Arc::new(config.companion());
    let backends = ids
        .iter()
        .map(|&id| (id, create_backend(id, config, &ollama, &companion)))
        .collect();
    BackendSet {
        backends,
        ollama,
        companion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_BENCHMATRIX_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_BENCHMATRIX_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_BENCHMATRIX_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${_BENCHMATRIX_UNSET_VAR}x"), "x");
        assert_eq!(resolve_env_vars("open ${brace"), "open ${brace");
        std::env::remove_var("_BENCHMATRIX_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = BenchmatrixConfig::default();
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.opencode.port, 4096);
        assert_eq!(config.goose.min_output_chars, 20);
        assert_eq!(config.runtime.load_timeout_ms, 5_000);
        assert_eq!(config.language, Language::TypeScript);
        assert!(config.timeout_base_ms.is_none());
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
prompts_dir = "bench/prompts"
timeout_base_ms = 90000
language = "javascript"

[ollama]
base_url = "http://gpu-box:11434"

[opencode]
port = 5000

[runtime]
program = "/opt/node/bin/node"
"#;
        let config: BenchmatrixConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.prompts_dir, PathBuf::from("bench/prompts"));
        assert_eq!(config.specs_dir, PathBuf::from("specs"));
        assert_eq!(config.timeout_base_ms, Some(90_000));
        assert_eq!(config.language, Language::JavaScript);
        assert_eq!(config.ollama.base_url, "http://gpu-box:11434");
        assert_eq!(config.opencode.port, 5000);
        assert_eq!(config.opencode.serve_args, default_serve_args());
        assert_eq!(config.goose.program, "goose");
        assert_eq!(config.runtime.program, "/opt/node/bin/node");
        assert_eq!(config.runtime.typescript_args, default_typescript_args());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/nonexistent/benchmatrix.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn loads_explicit_file_and_resolves_vars() {
        std::env::set_var("_BENCHMATRIX_SPECS_ROOT", "/data/specs");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("benchmatrix.toml");
        std::fs::write(&path, "specs_dir = \"${_BENCHMATRIX_SPECS_ROOT}/ts\"\n").unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.specs_dir, PathBuf::from("/data/specs/ts"));
        std::env::remove_var("_BENCHMATRIX_SPECS_ROOT");
    }

    #[test]
    fn factory_builds_every_backend() {
        let config = BenchmatrixConfig::default();
        let set = create_backends(&config, &BackendId::ALL);
        assert_eq!(set.backends.len(), 3);
        for id in BackendId::ALL {
            assert_eq!(set.backends[&id].id(), id);
        }
        assert_eq!(set.companion.base_url(), "http://127.0.0.1:4096");
    }
}
