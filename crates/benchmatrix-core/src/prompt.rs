//! Prompt loading.

use std::path::{Path, PathBuf};

/// Prompts on disk, laid out as `<root>/<task>/<variant>.md`.
///
/// A `.txt` file is accepted when no `.md` file exists.
#[derive(Debug, Clone)]
pub struct PromptStore {
    root: PathBuf,
}

impl PromptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the prompt for one task variant.
    ///
    /// The error message always starts with `prompt not found` so that it
    /// classifies as such.
    pub fn load(&self, task: &str, variant: &str) -> Result<String, String> {
        let dir = self.root.join(task);
        for ext in ["md", "txt"] {
            let path = dir.join(format!("{variant}.{ext}"));
            if let Ok(content) = std::fs::read_to_string(&path) {
                if content.trim().is_empty() {
                    return Err(format!("prompt not found: {} is empty", path.display()));
                }
                return Ok(content);
            }
        }
        Err(format!(
            "prompt not found: no {variant}.md or {variant}.txt in {}",
            dir.display()
        ))
    }
}
