//! Per-item scratch directory for loading generated code.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use benchmatrix_core::model::Language;

/// Host script run by the JavaScript runtime.
pub const HOST_SCRIPT: &str = include_str!("host.mjs");

const HOST_FILE: &str = "host.mjs";
const MODULE_STEM: &str = "module";

/// A temporary directory holding the host script and one generated module.
///
/// On drop, the temporary directory is automatically cleaned up.
pub struct Sandbox {
    work_dir: TempDir,
    language: Language,
}

impl Sandbox {
    /// Create a new sandbox with the host script in place.
    pub fn new(language: Language) -> Result<Self> {
        let work_dir = tempfile::Builder::new()
            .prefix("benchmatrix-score-")
            .tempdir()
            .context("failed to create temp directory")?;

        std::fs::write(work_dir.path().join(HOST_FILE), HOST_SCRIPT)
            .context("failed to write host script")?;

        Ok(Self { work_dir, language })
    }

    /// Get the path to the sandbox working directory.
    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn host_path(&self) -> PathBuf {
        self.work_dir.path().join(HOST_FILE)
    }

    /// `module.mts` or `module.mjs`, both forced to ES module semantics.
    pub fn module_path(&self) -> PathBuf {
        self.work_dir
            .path()
            .join(format!("{MODULE_STEM}.{}", self.language.module_extension()))
    }

    /// Write the generated code to the sandbox.
    pub fn write_module(&self, code: &str) -> Result<PathBuf> {
        let path = self.module_path();
        std::fs::write(&path, code)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Build environment variables for the runtime process.
    ///
    /// Blanks credentials and anything that would change how the runtime
    /// itself starts.
    pub fn build_env(&self) -> Vec<(String, String)> {
        let mut env = vec![("NO_COLOR".to_string(), "1".to_string())];

        for var in &[
            "SSH_AUTH_SOCK",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "AWS_SESSION_TOKEN",
            "GITHUB_TOKEN",
            "GH_TOKEN",
            "ANTHROPIC_API_KEY",
            "OPENAI_API_KEY",
            "DOCKER_HOST",
            "DOCKER_CONFIG",
            "KUBECONFIG",
            "DATABASE_URL",
            "NPM_TOKEN",
            "NODE_OPTIONS",
            "NODE_PATH",
        ] {
            env.push((var.to_string(), String::new()));
        }

        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_contains_host_script() {
        let sandbox = Sandbox::new(Language::TypeScript).unwrap();
        let host = std::fs::read_to_string(sandbox.host_path()).unwrap();
        assert!(host.contains("benchmatrix"));
        assert!(sandbox.work_dir().exists());
    }

    #[test]
    fn module_extension_follows_language() {
        let ts = Sandbox::new(Language::TypeScript).unwrap();
        assert!(ts.module_path().ends_with("module.mts"));
        let js = Sandbox::new(Language::JavaScript).unwrap();
        assert!(js.module_path().ends_with("module.mjs"));
    }

    #[test]
    fn write_module() {
        let sandbox = Sandbox::new(Language::JavaScript).unwrap();
        let path = sandbox.write_module("export const x = 1;").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "export const x = 1;");
    }

    #[test]
    fn cleaned_up_on_drop() {
        let sandbox = Sandbox::new(Language::TypeScript).unwrap();
        let dir = sandbox.work_dir().to_path_buf();
        drop(sandbox);
        assert!(!dir.exists());
    }

    #[test]
    fn env_blanks_credentials() {
        let sandbox = Sandbox::new(Language::TypeScript).unwrap();
        let env = sandbox.build_env();
        assert!(env.iter().any(|(k, v)| k == "NODE_OPTIONS" && v.is_empty()));
        assert!(env.iter().any(|(k, v)| k == "OPENAI_API_KEY" && v.is_empty()));
    }
}
