//! Scoring specification loader.
//!
//! One TOML file per task under the specs directory:
//!
//! ```toml
//! task = "calculator-basic"
//! factory = "createCalculator"      # optional
//! fresh_instance_per_test = false   # optional
//!
//! [[exports]]
//! name = "add"
//! kind = "function"                 # optional
//!
//! [[cases]]
//! target = "add"
//! args = [1, 2]
//! expected = 3                      # omit: passes iff the call does not throw
//! tolerance = 0.0001                # optional
//! description = "adds two numbers"  # optional
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Kind an exported binding must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Function,
    Class,
    Object,
    Number,
    String,
    Boolean,
}

impl ExportKind {
    /// Whether an export the runtime reports as `actual` satisfies this kind.
    ///
    /// Classes are callable, so a `function` expectation accepts them.
    pub fn accepts(self, actual: &str) -> bool {
        match self {
            ExportKind::Function => actual == "function" || actual == "class",
            ExportKind::Class => actual == "class",
            ExportKind::Object => actual == "object",
            ExportKind::Number => actual == "number",
            ExportKind::String => actual == "string",
            ExportKind::Boolean => actual == "boolean",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportKind::Function => "function",
            ExportKind::Class => "class",
            ExportKind::Object => "object",
            ExportKind::Number => "number",
            ExportKind::String => "string",
            ExportKind::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

/// An export the generated module must provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedExport {
    pub name: String,
    #[serde(default)]
    pub kind: Option<ExportKind>,
}

/// One call against the generated module and its expected outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    /// Export (or instance method) to call.
    pub target: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Expected return value; `None` means "must not throw".
    pub expected: Option<Value>,
    /// Absolute numeric tolerance.
    pub tolerance: Option<f64>,
    pub description: Option<String>,
}

/// Declarative test definition for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringSpecification {
    pub task: String,
    pub exports: Vec<ExpectedExport>,
    /// Export that builds the stateful instance test cases run against.
    pub factory: Option<String>,
    /// Build a new instance before every case instead of sharing one.
    pub fresh_instance_per_test: bool,
    pub cases: Vec<TestCase>,
}

impl ScoringSpecification {
    /// Number of checks a full scoring run performs: one per export plus
    /// one per test case.
    pub fn total_checks(&self) -> u32 {
        (self.exports.len() + self.cases.len()) as u32
    }
}

/// Intermediate TOML structure for parsing spec files.
#[derive(Debug, Deserialize)]
struct TomlSpecFile {
    task: String,
    #[serde(default)]
    exports: Vec<ExpectedExport>,
    #[serde(default)]
    factory: Option<String>,
    #[serde(default)]
    fresh_instance_per_test: bool,
    #[serde(default)]
    cases: Vec<TomlTestCase>,
}

#[derive(Debug, Deserialize)]
struct TomlTestCase {
    target: String,
    #[serde(default)]
    args: Vec<toml::Value>,
    #[serde(default)]
    expected: Option<toml::Value>,
    #[serde(default)]
    tolerance: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

/// Parse a TOML string into a `ScoringSpecification` (useful for testing).
pub fn parse_spec_str(content: &str, source_path: &Path) -> Result<ScoringSpecification> {
    let parsed: TomlSpecFile = toml::from_str(content)
        .with_context(|| format!("invalid spec TOML: {}", source_path.display()))?;

    let cases = parsed
        .cases
        .into_iter()
        .map(|c| TestCase {
            target: c.target,
            args: c.args.into_iter().map(Value::from_toml).collect(),
            expected: c.expected.map(Value::from_toml),
            tolerance: c.tolerance,
            description: c.description,
        })
        .collect();

    Ok(ScoringSpecification {
        task: parsed.task,
        exports: parsed.exports,
        factory: parsed.factory,
        fresh_instance_per_test: parsed.fresh_instance_per_test,
        cases,
    })
}

/// Parse a single spec file.
pub fn parse_spec(path: &Path) -> Result<ScoringSpecification> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to load spec file: {}", path.display()))?;
    parse_spec_str(&content, path)
}

/// Per-process cache of scoring specs, keyed by task slug.
///
/// Specs are read synchronously the first time a task asks for them and
/// then served from memory until [`SpecCatalog::clear_cache`] is called.
pub struct SpecCatalog {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<ScoringSpecification>>>,
}

impl SpecCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the spec for `task` is expected at.
    pub fn spec_path(&self, task: &str) -> PathBuf {
        self.root.join(format!("{task}.toml"))
    }

    /// Load the spec for `task`.
    ///
    /// Returns `Ok(None)` when no spec file exists, and an error when one
    /// exists but cannot be read or parsed.
    pub fn load(&self, task: &str) -> Result<Option<Arc<ScoringSpecification>>> {
        if let Some(spec) = self.lock().get(task) {
            return Ok(Some(Arc::clone(spec)));
        }

        let path = self.spec_path(task);
        if !path.exists() {
            return Ok(None);
        }

        let spec = Arc::new(
            parse_spec(&path).with_context(|| format!("failed to load spec for task '{task}'"))?,
        );
        if spec.task != task {
            tracing::warn!(
                file = %path.display(),
                declared = %spec.task,
                "spec declares a different task slug than its file name"
            );
        }
        self.lock().insert(task.to_string(), Arc::clone(&spec));
        Ok(Some(spec))
    }

    /// Drop every cached spec so the next load rereads the file.
    pub fn clear_cache(&self) {
        self.lock().clear();
    }

    /// Number of cached specs.
    pub fn cached(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ScoringSpecification>>> {
        // A panic while holding the lock cannot leave the map half-written
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Load every `*.toml` spec in a directory, skipping unparsable files.
pub fn load_spec_directory(dir: &Path) -> Result<Vec<ScoringSpecification>> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut specs = Vec::new();
    for path in paths {
        match parse_spec(&path) {
            Ok(spec) => specs.push(spec),
            Err(e) => tracing::warn!("skipping {}: {e:#}", path.display()),
        }
    }
    Ok(specs)
}

/// A warning from spec validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// Index of the offending test case, if the warning is about one.
    pub case_index: Option<usize>,
    pub message: String,
}

/// Validate a spec for common authoring mistakes.
pub fn validate_spec(spec: &ScoringSpecification) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let mut seen = HashSet::new();
    for export in &spec.exports {
        if !seen.insert(export.name.as_str()) {
            warnings.push(ValidationWarning {
                case_index: None,
                message: format!("duplicate export: {}", export.name),
            });
        }
    }

    if let Some(factory) = &spec.factory {
        if !spec.exports.is_empty() && !seen.contains(factory.as_str()) {
            warnings.push(ValidationWarning {
                case_index: None,
                message: format!("factory '{factory}' is not listed in exports"),
            });
        }
    }

    if spec.cases.is_empty() {
        warnings.push(ValidationWarning {
            case_index: None,
            message: "spec has no test cases".into(),
        });
    }

    for (i, case) in spec.cases.iter().enumerate() {
        // Without a factory, targets can only be module exports
        if spec.factory.is_none()
            && !spec.exports.is_empty()
            && !seen.contains(case.target.as_str())
        {
            warnings.push(ValidationWarning {
                case_index: Some(i),
                message: format!("target '{}' is not a declared export", case.target),
            });
        }
        if case.tolerance.is_some_and(|t| t.is_nan() || t < 0.0) {
            warnings.push(ValidationWarning {
                case_index: Some(i),
                message: "tolerance must be a non-negative number".into(),
            });
        }
        if case.tolerance.is_some() && case.expected.as_ref().and_then(Value::as_f64).is_none() {
            let nested = matches!(case.expected, Some(Value::Array(_)) | Some(Value::Object(_)));
            if !nested {
                warnings.push(ValidationWarning {
                    case_index: Some(i),
                    message: "tolerance given but expected value is not numeric".into(),
                });
            }
        }
    }

    warnings
}
