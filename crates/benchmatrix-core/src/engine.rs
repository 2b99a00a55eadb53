//! Matrix execution: the per-item executor and the run orchestrator.
//!
//! Items run strictly one at a time. The backends share one local inference
//! server, and overlapping generations would confound the latency numbers
//! this tool exists to produce. The only concurrency is the up-front model
//! metadata fan-out and the companion server warming up in the background.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::classify::classify_generation_failure;
use crate::error::BackendError;
use crate::model::{BackendId, MatrixItem};
use crate::prompt::PromptStore;
use crate::report::RunReport;
use crate::results::{
    GenerationFailure, GenerationOutcome, ItemResult, ItemStatus, ScoringFailure,
};
use crate::statistics::compute_run_stats;
use crate::timeout::timeout_ms;
use crate::traits::{Backend, CompanionService, GenerateRequest, ModelMetadata, Scorer};

/// Configuration for the execution engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Override of the timeout policy's base allowance.
    pub timeout_base_ms: Option<u64>,
    /// Ask the inference server to unload each model after its item.
    pub release_after_each: bool,
}

impl EngineConfig {
    /// Reject configurations that cannot produce a usable deadline.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_base_ms == Some(0) {
            anyhow::bail!("invalid deadline configuration: timeout base must be positive");
        }
        Ok(())
    }
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_item_start(&self, item: &MatrixItem, index: usize, total: usize, timeout_ms: u64);
    fn on_item_complete(&self, result: &ItemResult);
    fn on_run_complete(&self, report: &RunReport);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_item_start(&self, _: &MatrixItem, _: usize, _: usize, _: u64) {}
    fn on_item_complete(&self, _: &ItemResult) {}
    fn on_run_complete(&self, _: &RunReport) {}
}

/// Runs one matrix item end to end: prompt → generation → scoring.
pub struct ItemExecutor {
    backends: HashMap<BackendId, Arc<dyn Backend>>,
    prompts: PromptStore,
    scorer: Arc<dyn Scorer>,
    config: EngineConfig,
}

impl ItemExecutor {
    pub fn new(
        backends: HashMap<BackendId, Arc<dyn Backend>>,
        prompts: PromptStore,
        scorer: Arc<dyn Scorer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            backends,
            prompts,
            scorer,
            config,
        }
    }

    pub fn backend(&self, id: BackendId) -> Option<&Arc<dyn Backend>> {
        self.backends.get(&id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one item under the given generation deadline.
    ///
    /// Never fails: every problem is recorded on the returned result.
    pub async fn execute(&self, item: &MatrixItem, timeout_ms: u64) -> ItemResult {
        let started_at = chrono::Utc::now();
        let generation = self.generate(item, timeout_ms).await;

        let mut result = ItemResult {
            id: item.id.clone(),
            model: item.model.clone(),
            backend: item.backend,
            task: item.task.clone(),
            prompt_variant: item.prompt_variant.clone(),
            status: ItemStatus::Running,
            started_at,
            finished_at: None,
            timeout_ms,
            generation_failure: None,
            generation,
            score: None,
            scoring_duration_ms: None,
            scoring_failure: None,
        };

        match (&result.generation.output, result.generation.success) {
            (Some(output), true) => {
                let scoring_start = Instant::now();
                let score = self.scorer.score(&item.task, output).await;
                result.scoring_duration_ms = Some(scoring_start.elapsed().as_millis() as u64);
                if let (Some(kind), Some(message)) = (score.failure_kind, &score.error) {
                    tracing::info!(item = %item.id, %kind, "scoring stopped early: {message}");
                    result.scoring_failure = Some(ScoringFailure {
                        kind,
                        message: message.clone(),
                    });
                }
                result.score = Some(score);
                result.status = ItemStatus::Completed;
            }
            _ => {
                let message = result.generation.error.clone().unwrap_or_default();
                let kind = result
                    .generation
                    .failure_kind
                    .unwrap_or_else(|| classify_generation_failure(&message));
                tracing::warn!(item = %item.id, %kind, "generation failed: {message}");
                result.generation_failure = Some(GenerationFailure { kind, message });
                result.status = ItemStatus::Failed;
            }
        }

        result.finished_at = Some(chrono::Utc::now());
        result
    }

    async fn generate(&self, item: &MatrixItem, timeout_ms: u64) -> GenerationOutcome {
        let prompt = match self.prompts.load(&item.task, &item.prompt_variant) {
            Ok(prompt) => prompt,
            Err(message) => {
                let kind = classify_generation_failure(&message);
                return GenerationOutcome::failed(message, kind, 0);
            }
        };

        let Some(backend) = self.backends.get(&item.backend) else {
            let message = format!("harness not configured for backend '{}'", item.backend);
            let kind = classify_generation_failure(&message);
            return GenerationOutcome::failed(message, kind, 0);
        };

        let request = GenerateRequest {
            model: item.model.clone(),
            prompt,
            deadline: Duration::from_millis(timeout_ms),
            release_after: self.config.release_after_each,
        };

        let start = Instant::now();
        match backend.generate(&request).await {
            Ok(response) => {
                GenerationOutcome::succeeded(response.output, response.duration_ms, response.tokens)
            }
            Err(e) => {
                let message = e.to_string();
                let kind = classify_generation_failure(&message);
                GenerationOutcome::failed(message, kind, start.elapsed().as_millis() as u64)
            }
        }
    }
}

/// Iterates the whole matrix and assembles the run report.
pub struct RunOrchestrator {
    executor: ItemExecutor,
    companion: Option<Arc<dyn CompanionService>>,
}

impl RunOrchestrator {
    pub fn new(executor: ItemExecutor, companion: Option<Arc<dyn CompanionService>>) -> Self {
        Self {
            executor,
            companion,
        }
    }

    /// Run every item in order.
    ///
    /// Item-level failures end up on the item results. Setup failures (bad
    /// deadline configuration, no reachable backend, a companion server that
    /// never starts) abort the run with an error.
    pub async fn run(&self, items: &[MatrixItem], progress: &dyn ProgressReporter) -> Result<RunReport> {
        let start = Instant::now();
        let started_at = chrono::Utc::now();
        let run_id = Uuid::new_v4();

        self.executor.config().validate()?;

        let backends = self.backends_in_use(items)?;
        self.check_reachable(&backends).await?;

        let mut warmup = self.start_companion(items)?;
        let model_metadata = self.fetch_model_metadata(items).await;

        let mut results = Vec::with_capacity(items.len());
        let outcome = self
            .execute_items(items, &model_metadata, &mut warmup, &mut results, progress)
            .await;

        // Teardown happens whether or not the loop finished
        if let Some(handle) = warmup.take() {
            handle.abort();
        }
        if self.companion_needed(items) {
            if let Some(companion) = &self.companion {
                companion.stop().await;
            }
        }
        outcome?;

        let stats = compute_run_stats(&results);
        let report = RunReport {
            id: run_id,
            started_at,
            finished_at: chrono::Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            model_metadata,
            items: results,
            stats,
        };
        progress.on_run_complete(&report);
        Ok(report)
    }

    /// Deadline each item will run under, in item order.
    pub fn plan_timeouts(
        &self,
        items: &[MatrixItem],
        metadata: &BTreeMap<String, ModelMetadata>,
    ) -> Vec<u64> {
        let base = self.executor.config().timeout_base_ms;
        items
            .iter()
            .map(|item| {
                let params = metadata
                    .get(&item.model)
                    .map(|m| m.parameters_b)
                    .unwrap_or_else(|| ModelMetadata::fallback().parameters_b);
                timeout_ms(params, item.backend, base, Some(&item.model))
            })
            .collect()
    }

    async fn execute_items(
        &self,
        items: &[MatrixItem],
        metadata: &BTreeMap<String, ModelMetadata>,
        warmup: &mut Option<JoinHandle<Result<String, BackendError>>>,
        results: &mut Vec<ItemResult>,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let timeouts = self.plan_timeouts(items, metadata);
        let total = items.len();

        for (index, (item, timeout)) in items.iter().zip(timeouts).enumerate() {
            if item.backend.requires_companion() {
                if let Some(handle) = warmup.take() {
                    let url = handle
                        .await
                        .context("companion warm-up task panicked")?
                        .context("companion server failed to start")?;
                    tracing::info!(%url, "companion server ready");
                }
            }

            progress.on_item_start(item, index, total, timeout);
            tracing::info!(item = %item.id, timeout_ms = timeout, "[{}/{}] running", index + 1, total);
            let result = self.executor.execute(item, timeout).await;
            progress.on_item_complete(&result);
            results.push(result);
        }
        Ok(())
    }

    fn backends_in_use(&self, items: &[MatrixItem]) -> Result<Vec<BackendId>> {
        let mut seen = HashSet::new();
        let mut backends = Vec::new();
        for item in items {
            if seen.insert(item.backend) {
                if self.executor.backend(item.backend).is_none() {
                    anyhow::bail!("backend '{}' is not configured", item.backend);
                }
                backends.push(item.backend);
            }
        }
        Ok(backends)
    }

    async fn check_reachable(&self, backends: &[BackendId]) -> Result<()> {
        if backends.is_empty() {
            return Ok(());
        }
        let checks = backends.iter().filter_map(|id| {
            let backend = self.executor.backend(*id)?;
            Some(async move { (*id, backend.is_available().await) })
        });
        let availability = join_all(checks).await;

        let mut reachable = 0;
        for (id, available) in &availability {
            if *available {
                reachable += 1;
            } else {
                tracing::warn!(backend = %id, "backend unavailable; its items will fail");
            }
        }
        if reachable == 0 {
            let names: Vec<String> = backends.iter().map(|b| b.to_string()).collect();
            anyhow::bail!("no backend reachable (checked: {})", names.join(", "));
        }
        Ok(())
    }

    fn companion_needed(&self, items: &[MatrixItem]) -> bool {
        items.iter().any(|i| i.backend.requires_companion())
    }

    /// Start the companion server in the background if any item needs it.
    fn start_companion(
        &self,
        items: &[MatrixItem],
    ) -> Result<Option<JoinHandle<Result<String, BackendError>>>> {
        if !self.companion_needed(items) {
            return Ok(None);
        }
        let Some(companion) = &self.companion else {
            anyhow::bail!("items need a companion server but none is configured");
        };
        let companion = Arc::clone(companion);
        tracing::debug!("pre-warming companion server");
        Ok(Some(tokio::spawn(async move { companion.ensure_running().await })))
    }

    /// Fetch metadata once per unique model, concurrently.
    async fn fetch_model_metadata(&self, items: &[MatrixItem]) -> BTreeMap<String, ModelMetadata> {
        let mut seen = HashSet::new();
        let lookups = items
            .iter()
            .filter(|item| seen.insert(item.model.as_str()))
            .filter_map(|item| {
                let backend = self.executor.backend(item.backend)?;
                let model = item.model.clone();
                Some(async move {
                    let meta = backend.model_info(&model).await;
                    (model, meta)
                })
            });
        let metadata: BTreeMap<String, ModelMetadata> = join_all(lookups).await.into_iter().collect();
        for (model, meta) in &metadata {
            tracing::debug!(%model, params_b = meta.parameters_b, size_bytes = meta.size_bytes, "model metadata");
        }
        metadata
    }
}
