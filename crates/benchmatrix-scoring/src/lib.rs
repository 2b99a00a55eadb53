//! benchmatrix-scoring — Dynamic scoring of generated code.
//!
//! Extracts a module from raw backend output, loads it in an out-of-process
//! JavaScript runtime, checks its exports and runs the task's test cases
//! against it. Each item moves through fixed stages and stops at the first
//! one that cannot continue:
//!
//! spec → extract → load module → validate exports → build instance → run cases
//!
//! A stop records the stage's failure kind and counts every check that did
//! not get to run as failed.

pub mod host;
pub mod sandbox;

use std::time::Duration;

use async_trait::async_trait;

use benchmatrix_core::classify::ScoringFailureKind;
use benchmatrix_core::compare::values_match;
use benchmatrix_core::extract::{extract_code, ExtractedCode, ExtractionMethod};
use benchmatrix_core::model::Language;
use benchmatrix_core::results::{CaseDetail, CheckKind, ScoringResult};
use benchmatrix_core::spec::{ScoringSpecification, SpecCatalog, TestCase};
use benchmatrix_core::traits::Scorer;

use crate::host::{HostError, ModuleHost};
use crate::sandbox::Sandbox;

/// How to start the JavaScript runtime that hosts generated code.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub program: String,
    pub typescript_args: Vec<String>,
    pub javascript_args: Vec<String>,
    /// Budget for importing the module, top-level side effects included.
    pub load_timeout: Duration,
    /// Budget for each instance construction and each test case call.
    pub call_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: "node".into(),
            typescript_args: vec!["--experimental-strip-types".into(), "--no-warnings".into()],
            javascript_args: vec!["--no-warnings".into()],
            load_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl RuntimeConfig {
    pub fn args_for(&self, language: Language) -> &[String] {
        match language {
            Language::TypeScript => &self.typescript_args,
            Language::JavaScript => &self.javascript_args,
        }
    }
}

/// Scores generated code against per-task scoring specs.
pub struct ScoringEngine {
    specs: SpecCatalog,
    language: Language,
    runtime: RuntimeConfig,
}

impl ScoringEngine {
    pub fn new(specs: SpecCatalog, language: Language, runtime: RuntimeConfig) -> Self {
        Self {
            specs,
            language,
            runtime,
        }
    }

    pub fn specs(&self) -> &SpecCatalog {
        &self.specs
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Score already-extracted code against a loaded spec.
    pub async fn score_extracted(&self, spec: &ScoringSpecification, extracted: &ExtractedCode) -> ScoringResult {
        let mut tally = Tally::new(spec.total_checks(), extracted.method);

        if extracted.code.trim().is_empty() {
            return tally.stop(ScoringFailureKind::Extraction, "extraction produced no code".into());
        }

        let sandbox = match Sandbox::new(self.language) {
            Ok(sandbox) => sandbox,
            Err(e) => return tally.stop(ScoringFailureKind::Unknown, format!("{e:#}")),
        };
        let module_path = match sandbox.write_module(&extracted.code) {
            Ok(path) => path,
            Err(e) => return tally.stop(ScoringFailureKind::Unknown, format!("{e:#}")),
        };

        let mut host = match ModuleHost::spawn(
            &self.runtime.program,
            self.runtime.args_for(self.language),
            &sandbox.host_path(),
            sandbox.work_dir(),
            &sandbox.build_env(),
        )
        .await
        {
            Ok(host) => host,
            Err(e) => return tally.stop(ScoringFailureKind::Import, format!("module load failed: {e}")),
        };

        let result = self.run_stages(spec, &mut host, &module_path, tally).await;
        host.shutdown().await;
        result
    }

    async fn run_stages(
        &self,
        spec: &ScoringSpecification,
        host: &mut ModuleHost,
        module_path: &std::path::Path,
        mut tally: Tally,
    ) -> ScoringResult {
        let exports = match host.load(module_path, self.runtime.load_timeout).await {
            Ok(exports) => exports,
            Err(e) => return tally.stop(ScoringFailureKind::Import, format!("module load failed: {e}")),
        };
        tracing::debug!(task = %spec.task, exports = exports.len(), "module loaded");

        let mut missing = Vec::new();
        for expected in &spec.exports {
            let error = match (exports.get(&expected.name), expected.kind) {
                (None, _) => Some("missing export".to_string()),
                (Some(actual), Some(kind)) if !kind.accepts(actual) => {
                    Some(format!("wrong export kind: expected {kind}, found {actual}"))
                }
                _ => None,
            };
            if error.is_some() {
                missing.push(expected.name.clone());
            }
            tally.record(CaseDetail {
                kind: CheckKind::Export,
                name: expected.name.clone(),
                passed: error.is_none(),
                description: None,
                expected: None,
                actual: None,
                error,
            });
        }
        if !missing.is_empty() {
            return tally.stop(
                ScoringFailureKind::ExportValidation,
                format!("export validation failed for: {}", missing.join(", ")),
            );
        }

        let factory = spec.factory.as_deref();
        if let (Some(factory), false) = (factory, spec.fresh_instance_per_test) {
            if let Err(e) = host.instantiate(factory, self.runtime.call_timeout).await {
                return tally.stop(
                    ScoringFailureKind::TestExecution,
                    format!("instance construction via `{factory}` failed: {e}"),
                );
            }
        }

        for case in &spec.cases {
            if let (Some(factory), true) = (factory, spec.fresh_instance_per_test) {
                if let Err(e) = host.instantiate(factory, self.runtime.call_timeout).await {
                    return tally.stop(
                        ScoringFailureKind::TestExecution,
                        format!("instance construction via `{factory}` failed: {e}"),
                    );
                }
            }

            match host.call(&case.target, &case.args, self.runtime.call_timeout).await {
                Ok(actual) => tally.record(judge(case, actual)),
                Err(e) if e.host_survives() => tally.record(case_error(case, e.to_string())),
                Err(e) => {
                    let message = e.to_string();
                    tally.record(case_error(case, message.clone()));
                    return tally.stop(
                        ScoringFailureKind::TestExecution,
                        format!("test case `{}` aborted scoring: {message}", case.target),
                    );
                }
            }
        }

        tally.finish()
    }
}

#[async_trait]
impl Scorer for ScoringEngine {
    async fn score(&self, task: &str, raw_output: &str) -> ScoringResult {
        let spec = match self.specs.load(task) {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                return ScoringResult::aborted(
                    ScoringFailureKind::NoSpec,
                    format!("no scoring spec for task '{task}'"),
                    0,
                    None,
                )
            }
            Err(e) => {
                return ScoringResult::aborted(ScoringFailureKind::SpecLoad, format!("{e:#}"), 0, None)
            }
        };

        let extracted = extract_code(raw_output, self.language);
        tracing::debug!(%task, method = %extracted.method, chars = extracted.code.len(), "code extracted");

        let result = self.score_extracted(&spec, &extracted).await;
        match (&result.failure_kind, &result.error) {
            (Some(kind), Some(error)) => {
                tracing::info!(%task, %kind, passed = result.passed, total = result.total, "scoring stopped: {error}")
            }
            _ => tracing::info!(%task, passed = result.passed, total = result.total, "scored"),
        }
        result
    }
}

fn judge(case: &TestCase, actual: benchmatrix_core::value::Value) -> CaseDetail {
    let passed = match &case.expected {
        None => true,
        Some(expected) => values_match(&actual, expected, case.tolerance),
    };
    CaseDetail {
        kind: CheckKind::TestCase,
        name: case.target.clone(),
        passed,
        description: case.description.clone(),
        expected: case.expected.clone(),
        actual: Some(actual),
        error: None,
    }
}

fn case_error(case: &TestCase, error: String) -> CaseDetail {
    CaseDetail {
        kind: CheckKind::TestCase,
        name: case.target.clone(),
        passed: false,
        description: case.description.clone(),
        expected: case.expected.clone(),
        actual: None,
        error: Some(error),
    }
}

/// Running pass/fail counts for one item.
struct Tally {
    total: u32,
    passed: u32,
    details: Vec<CaseDetail>,
    method: ExtractionMethod,
}

impl Tally {
    fn new(total: u32, method: ExtractionMethod) -> Self {
        Self {
            total,
            passed: 0,
            details: Vec::new(),
            method,
        }
    }

    fn record(&mut self, detail: CaseDetail) {
        if detail.passed {
            self.passed += 1;
        }
        self.details.push(detail);
    }

    /// Stop here; everything not yet passed counts as failed.
    fn stop(self, kind: ScoringFailureKind, error: String) -> ScoringResult {
        ScoringResult {
            passed: self.passed,
            failed: self.total.saturating_sub(self.passed),
            total: self.total,
            details: self.details,
            extraction_method: Some(self.method),
            error: Some(error),
            failure_kind: Some(kind),
        }
    }

    fn finish(self) -> ScoringResult {
        ScoringResult {
            passed: self.passed,
            failed: self.total.saturating_sub(self.passed),
            total: self.total,
            details: self.details,
            extraction_method: Some(self.method),
            error: None,
            failure_kind: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchmatrix_core::classify::classify_scoring_failure;

    fn engine_with_specs(files: &[(&str, &str)]) -> (tempfile::TempDir, ScoringEngine) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(format!("{name}.toml")), content).unwrap();
        }
        let engine = ScoringEngine::new(
            SpecCatalog::new(dir.path()),
            Language::JavaScript,
            RuntimeConfig {
                program: "benchmatrix-definitely-not-installed".into(),
                ..Default::default()
            },
        );
        (dir, engine)
    }

    const SPEC: &str = r#"
task = "t"
exports = [{ name = "add", kind = "function" }]

[[cases]]
target = "add"
args = [1, 2]
expected = 3
"#;

    #[tokio::test]
    async fn missing_spec_is_no_spec() {
        let (_dir, engine) = engine_with_specs(&[]);
        let result = engine.score("unknown-task", "```js\nexport const x = 1;\n```").await;
        assert_eq!(result.failure_kind, Some(ScoringFailureKind::NoSpec));
        assert_eq!(result.total, 0);
        assert_eq!(
            classify_scoring_failure(result.error.as_deref().unwrap()),
            ScoringFailureKind::NoSpec
        );
    }

    #[tokio::test]
    async fn invalid_spec_is_spec_load() {
        let (_dir, engine) = engine_with_specs(&[("broken", "task = [unclosed")]);
        let result = engine.score("broken", "export const x = 1;").await;
        assert_eq!(result.failure_kind, Some(ScoringFailureKind::SpecLoad));
        assert_eq!(
            classify_scoring_failure(result.error.as_deref().unwrap()),
            ScoringFailureKind::SpecLoad
        );
    }

    #[tokio::test]
    async fn empty_output_is_extraction_failure() {
        let (_dir, engine) = engine_with_specs(&[("t", SPEC)]);
        let result = engine.score("t", "   \n").await;
        assert_eq!(result.failure_kind, Some(ScoringFailureKind::Extraction));
        assert_eq!((result.passed, result.failed, result.total), (0, 2, 2));
        assert_eq!(
            classify_scoring_failure(result.error.as_deref().unwrap()),
            ScoringFailureKind::Extraction
        );
    }

    #[tokio::test]
    async fn missing_runtime_is_import_failure() {
        let (_dir, engine) = engine_with_specs(&[("t", SPEC)]);
        let result = engine.score("t", "```js\nexport function add(a, b) { return a + b; }\n```").await;
        assert_eq!(result.failure_kind, Some(ScoringFailureKind::Import));
        assert_eq!(result.extraction_method, Some(ExtractionMethod::LanguageTaggedBlock));
        assert_eq!(result.failed, 2);
        assert_eq!(
            classify_scoring_failure(result.error.as_deref().unwrap()),
            ScoringFailureKind::Import
        );
    }

    #[test]
    fn tally_counts_unrun_checks_as_failed() {
        let mut tally = Tally::new(5, ExtractionMethod::AnyBlock);
        tally.record(CaseDetail {
            kind: CheckKind::Export,
            name: "add".into(),
            passed: true,
            description: None,
            expected: None,
            actual: None,
            error: None,
        });
        let result = tally.stop(ScoringFailureKind::TestExecution, "test case boom".into());
        assert_eq!((result.passed, result.failed, result.total), (1, 4, 5));
        assert_eq!(result.details.len(), 1);
    }

    #[test]
    fn runtime_args_by_language() {
        let runtime = RuntimeConfig::default();
        assert!(runtime
            .args_for(Language::TypeScript)
            .contains(&"--experimental-strip-types".to_string()));
        assert!(!runtime
            .args_for(Language::JavaScript)
            .contains(&"--experimental-strip-types".to_string()));
    }
}
