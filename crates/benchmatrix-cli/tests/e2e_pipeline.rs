//! End-to-end pipeline tests: orchestrator → mock backend → real scoring engine.
//!
//! These tests verify that a matrix run records generation, scoring and
//! failures on the right items. Tests that score code need `node` on PATH
//! and skip themselves when it is missing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use benchmatrix_backends::mock::MockBackend;
use benchmatrix_core::classify::{GenerationFailureKind, ScoringFailureKind};
use benchmatrix_core::engine::{EngineConfig, ItemExecutor, NoopReporter, RunOrchestrator};
use benchmatrix_core::model::{expand_matrix, BackendId, Language};
use benchmatrix_core::prompt::PromptStore;
use benchmatrix_core::results::ItemStatus;
use benchmatrix_core::spec::SpecCatalog;
use benchmatrix_core::traits::Backend;
use benchmatrix_scoring::{RuntimeConfig, ScoringEngine};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn node_available() -> bool {
    let available = std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !available {
        eprintln!("skipping: node not found on PATH");
    }
    available
}

fn orchestrator(mock: Arc<MockBackend>, prompts: &Path) -> RunOrchestrator {
    let mut backends: HashMap<BackendId, Arc<dyn Backend>> = HashMap::new();
    backends.insert(BackendId::Ollama, mock);
    let scorer = Arc::new(ScoringEngine::new(
        SpecCatalog::new(fixtures().join("specs")),
        Language::JavaScript,
        RuntimeConfig::default(),
    ));
    let executor = ItemExecutor::new(
        backends,
        PromptStore::new(prompts),
        scorer,
        EngineConfig::default(),
    );
    RunOrchestrator::new(executor, None)
}

fn tasks(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

const BASIC_OUTPUT: &str = r#"Sure! Here is the calculator:

```js
export function add(a, b) { return a + b; }
export function subtract(a, b) { return a - b; }
export function multiply(a, b) { return a * b; }
export function divide(a, b) { return a / b; }
```
"#;

const STATEFUL_OUTPUT: &str = r#"```javascript
export function createCalculator() {
  let current = 0;
  return {
    add(n) { return (current += n); },
    subtract(n) { return (current -= n); },
    multiply(n) { return (current *= n); },
    value() { return current; },
    reset() { current = 0; },
  };
}
```"#;

#[tokio::test]
async fn e2e_correct_code_scores_fully() {
    if !node_available() {
        return;
    }
    let mock = Arc::new(MockBackend::new(HashMap::from([
        ("exports four functions".to_string(), BASIC_OUTPUT.to_string()),
        ("createCalculator".to_string(), STATEFUL_OUTPUT.to_string()),
    ])));
    let run = orchestrator(Arc::clone(&mock), &fixtures().join("prompts"));
    let items = expand_matrix(
        &tasks(&["mock-model"]),
        &[BackendId::Ollama],
        &tasks(&["calculator-basic", "calculator-stateful"]),
        &tasks(&["base"]),
    );

    let report = run.run(&items, &NoopReporter).await.unwrap();

    assert_eq!(mock.call_count(), 2);
    assert_eq!(report.items.len(), 2);

    let basic = report.item("mock-model__ollama__calculator-basic__base").unwrap();
    assert_eq!(basic.status, ItemStatus::Completed);
    let score = basic.score.as_ref().unwrap();
    assert_eq!((score.passed, score.total), (19, 19));
    assert!(basic.scoring_failure.is_none());
    assert!(basic.scoring_duration_ms.is_some());

    let stateful = report.item("mock-model__ollama__calculator-stateful__base").unwrap();
    let score = stateful.score.as_ref().unwrap();
    assert_eq!((score.passed, score.total), (7, 7));

    assert_eq!(report.stats.fully_passing, 2);
    let per_model = &report.stats.per_model["mock-model"];
    assert_eq!(per_model.checks_passed, 26);
    assert!((per_model.pass_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn e2e_broken_code_records_scoring_failure() {
    if !node_available() {
        return;
    }
    let mock = Arc::new(MockBackend::with_fixed_response(
        "```js\nexport function add(a, b) { return a +; }\n```",
    ));
    let run = orchestrator(mock, &fixtures().join("prompts"));
    let items = expand_matrix(
        &tasks(&["mock-model"]),
        &[BackendId::Ollama],
        &tasks(&["calculator-basic"]),
        &tasks(&["base"]),
    );

    let report = run.run(&items, &NoopReporter).await.unwrap();
    let item = &report.items[0];

    // Generation worked; the failure belongs to scoring
    assert_eq!(item.status, ItemStatus::Completed);
    assert!(item.generation_failure.is_none());
    let failure = item.scoring_failure.as_ref().unwrap();
    assert_eq!(failure.kind, ScoringFailureKind::Import);
    assert_eq!(item.score.as_ref().unwrap().failed, 19);
    assert_eq!(report.stats.scoring_failures[&ScoringFailureKind::Import], 1);
}

#[tokio::test]
async fn e2e_generation_timeout_skips_scoring() {
    let mock = Arc::new(MockBackend::timing_out());
    let run = orchestrator(mock, &fixtures().join("prompts"));
    let items = expand_matrix(
        &tasks(&["mock-model"]),
        &[BackendId::Ollama],
        &tasks(&["calculator-basic"]),
        &tasks(&["base"]),
    );

    let report = run.run(&items, &NoopReporter).await.unwrap();
    let item = &report.items[0];

    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.score.is_none());
    let failure = item.generation_failure.as_ref().unwrap();
    assert_eq!(failure.kind, GenerationFailureKind::Timeout);
    assert!(failure.message.contains("increase the timeout"));
    assert_eq!(report.stats.generation_failures[&GenerationFailureKind::Timeout], 1);
}

#[tokio::test]
async fn e2e_missing_prompt_never_reaches_backend() {
    let mock = Arc::new(MockBackend::with_fixed_response(BASIC_OUTPUT));
    let run = orchestrator(Arc::clone(&mock), &fixtures().join("prompts"));
    let items = expand_matrix(
        &tasks(&["mock-model"]),
        &[BackendId::Ollama],
        &tasks(&["calculator-basic"]),
        &tasks(&["no-such-variant"]),
    );

    let report = run.run(&items, &NoopReporter).await.unwrap();
    let item = &report.items[0];

    assert_eq!(mock.call_count(), 0);
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(
        item.generation_failure.as_ref().unwrap().kind,
        GenerationFailureKind::PromptNotFound
    );
}

#[tokio::test]
async fn e2e_task_without_spec_is_no_spec() {
    let prompts = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(prompts.path().join("uncharted")).unwrap();
    std::fs::write(prompts.path().join("uncharted/base.md"), "Write something.").unwrap();

    let mock = Arc::new(MockBackend::with_fixed_response(BASIC_OUTPUT));
    let run = orchestrator(mock, prompts.path());
    let items = expand_matrix(
        &tasks(&["mock-model"]),
        &[BackendId::Ollama],
        &tasks(&["uncharted"]),
        &tasks(&["base"]),
    );

    let report = run.run(&items, &NoopReporter).await.unwrap();
    let item = &report.items[0];

    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.score.as_ref().unwrap().total, 0);
    assert_eq!(item.scoring_failure.as_ref().unwrap().kind, ScoringFailureKind::NoSpec);
}

#[tokio::test]
async fn e2e_unreachable_backend_aborts_run() {
    let mock = Arc::new(MockBackend::unreachable());
    let run = orchestrator(Arc::clone(&mock), &fixtures().join("prompts"));
    let items = expand_matrix(
        &tasks(&["mock-model"]),
        &[BackendId::Ollama],
        &tasks(&["calculator-basic"]),
        &tasks(&["base"]),
    );

    let err = run.run(&items, &NoopReporter).await.unwrap_err();

    assert!(err.to_string().contains("no backend reachable"));
    assert_eq!(mock.call_count(), 0);
}
