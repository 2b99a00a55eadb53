//! The `benchmatrix run` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use benchmatrix_backends::{create_backends, load_config_from, BackendSet};
use benchmatrix_core::engine::{EngineConfig, ItemExecutor, ProgressReporter, RunOrchestrator};
use benchmatrix_core::model::{expand_matrix, BackendId, MatrixItem};
use benchmatrix_core::prompt::PromptStore;
use benchmatrix_core::report::RunReport;
use benchmatrix_core::results::{ItemResult, ItemStatus};
use benchmatrix_core::traits::CompanionService;

use super::{parse_list, scoring_engine, split_list};

/// Flags of the `run` subcommand.
pub struct RunArgs {
    pub models: String,
    pub backends: String,
    pub tasks: Option<String>,
    pub variants: String,
    pub timeout_base_ms: Option<u64>,
    pub release_after_each: bool,
    pub output: PathBuf,
    pub config: Option<PathBuf>,
}

/// Console progress reporter.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_item_start(&self, item: &MatrixItem, index: usize, total: usize, timeout_ms: u64) {
        eprintln!(
            "  [{}/{total}] {} :: {} :: {}/{} (timeout {}s)",
            index + 1,
            item.model,
            item.backend,
            item.task,
            item.prompt_variant,
            timeout_ms / 1000,
        );
    }

    fn on_item_complete(&self, result: &ItemResult) {
        let verdict = match (&result.status, &result.score, &result.generation_failure) {
            (ItemStatus::Failed, _, Some(failure)) => format!("FAIL {}: {}", failure.kind, failure.message),
            (_, Some(score), _) => match &score.failure_kind {
                Some(kind) => format!("score {}/{} ({kind})", score.passed, score.total),
                None => format!("score {}/{}", score.passed, score.total),
            },
            (status, None, _) => format!("{status:?}"),
        };
        eprintln!(
            "        {verdict} [gen {}ms{}]",
            result.generation.duration_ms,
            result
                .scoring_duration_ms
                .map(|ms| format!(", score {ms}ms"))
                .unwrap_or_default(),
        );
    }

    fn on_run_complete(&self, report: &RunReport) {
        eprintln!(
            "\nComplete: {}/{} items generated, {} failed, {} fully passing ({:.1}s)",
            report.stats.completed,
            report.stats.total_items,
            report.stats.failed,
            report.stats.fully_passing,
            report.duration_ms as f64 / 1000.0,
        );
    }
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let config = load_config_from(args.config.as_deref())?;

    let models = split_list(&args.models);
    anyhow::ensure!(!models.is_empty(), "at least one model is required");
    let backend_ids: Vec<BackendId> = parse_list(&args.backends)?;
    anyhow::ensure!(!backend_ids.is_empty(), "at least one backend is required");
    let variants = split_list(&args.variants);
    anyhow::ensure!(!variants.is_empty(), "at least one prompt variant is required");
    let tasks = match &args.tasks {
        Some(list) => split_list(list),
        None => discover_tasks(&config.specs_dir)?,
    };
    anyhow::ensure!(
        !tasks.is_empty(),
        "no tasks to run: pass --tasks or add specs to {}",
        config.specs_dir.display()
    );

    let items = expand_matrix(&models, &backend_ids, &tasks, &variants);

    let BackendSet {
        backends,
        companion,
        ..
    } = create_backends(&config, &backend_ids);
    let scorer = Arc::new(scoring_engine(&config, config.specs_dir.clone(), config.language));
    let engine_config = EngineConfig {
        timeout_base_ms: args.timeout_base_ms.or(config.timeout_base_ms),
        release_after_each: args.release_after_each,
    };
    let executor = ItemExecutor::new(
        backends,
        PromptStore::new(&config.prompts_dir),
        scorer,
        engine_config,
    );
    let service: Arc<dyn CompanionService> = companion.clone();
    let orchestrator = RunOrchestrator::new(executor, Some(service));

    eprintln!(
        "benchmatrix v{}: {} models x {} backends x {} tasks x {} variants = {} items",
        env!("CARGO_PKG_VERSION"),
        models.len(),
        backend_ids.len(),
        tasks.len(),
        variants.len(),
        items.len(),
    );
    eprintln!();

    let reporter = ConsoleReporter;
    let report = tokio::select! {
        report = orchestrator.run(&items, &reporter) => report?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; stopping companion server");
            companion.stop().await;
            anyhow::bail!("interrupted");
        }
    };

    print_summary(&report);

    let timestamp = report.started_at.format("%Y-%m-%dT%H%M%S");
    let path = args.output.join(format!("run-{timestamp}.json"));
    report.save_json(&path)?;
    eprintln!("Results saved to: {}", path.display());

    Ok(())
}

/// Every task with a spec file, in name order.
fn discover_tasks(specs_dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(specs_dir)
        .with_context(|| format!("failed to read specs directory: {}", specs_dir.display()))?;
    let mut tasks: Vec<String> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    tasks.sort();
    Ok(tasks)
}

fn print_summary(report: &RunReport) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec![
        "Model",
        "Params",
        "Items",
        "Scored",
        "Checks",
        "Pass %",
        "Avg Gen",
    ]);

    for (model, stats) in &report.stats.per_model {
        let params = report
            .model_metadata
            .get(model)
            .map(|m| format!("{:.1}B", m.parameters_b))
            .unwrap_or_else(|| "?".into());
        table.add_row(vec![
            Cell::new(model),
            Cell::new(params),
            Cell::new(stats.items),
            Cell::new(stats.scored),
            Cell::new(format!("{}/{}", stats.checks_passed, stats.checks_total)),
            Cell::new(format!("{:.1}%", stats.pass_rate * 100.0)),
            Cell::new(format!("{}ms", stats.avg_generation_ms)),
        ]);
    }
    eprintln!("\n{table}");

    if !report.stats.per_backend.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Backend", "Items", "Checks", "Pass %", "Avg Gen"]);
        for (backend, stats) in &report.stats.per_backend {
            table.add_row(vec![
                Cell::new(backend),
                Cell::new(stats.items),
                Cell::new(format!("{}/{}", stats.checks_passed, stats.checks_total)),
                Cell::new(format!("{:.1}%", stats.pass_rate * 100.0)),
                Cell::new(format!("{}ms", stats.avg_generation_ms)),
            ]);
        }
        eprintln!("{table}");
    }

    let failures: Vec<String> = report
        .stats
        .generation_failures
        .iter()
        .map(|(kind, n)| format!("generation/{kind}: {n}"))
        .chain(
            report
                .stats
                .scoring_failures
                .iter()
                .map(|(kind, n)| format!("scoring/{kind}: {n}")),
        )
        .collect();
    if !failures.is_empty() {
        eprintln!("Failures: {}", failures.join(", "));
    }
}
