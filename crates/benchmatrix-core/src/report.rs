//! Run report: the orchestrator's return value.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::results::ItemResult;
use crate::statistics::RunStats;
use crate::traits::ModelMetadata;

/// Complete record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Metadata fetched once per unique model before execution.
    pub model_metadata: BTreeMap<String, ModelMetadata>,
    /// Item results in execution order.
    pub items: Vec<ItemResult>,
    pub stats: RunStats,
}

impl RunReport {
    /// Look up one item's result by id.
    pub fn item(&self, id: &str) -> Option<&ItemResult> {
        self.items.iter().find(|r| r.id == id)
    }

    /// Save the report as pretty-printed JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        serde_json::from_str(&content).context("failed to parse report JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::GenerationFailureKind;
    use crate::model::BackendId;
    use crate::results::{GenerationFailure, GenerationOutcome, ItemStatus};
    use crate::statistics::compute_run_stats;

    fn make_report() -> RunReport {
        let now = Utc::now();
        let item = ItemResult {
            id: "m__ollama__calc__base".into(),
            model: "m".into(),
            backend: BackendId::Ollama,
            task: "calc".into(),
            prompt_variant: "base".into(),
            status: ItemStatus::Failed,
            started_at: now,
            finished_at: Some(now),
            timeout_ms: 120_000,
            generation: GenerationOutcome::failed(
                "Request timed out after 120000ms".into(),
                GenerationFailureKind::Timeout,
                120_000,
            ),
            generation_failure: Some(GenerationFailure {
                kind: GenerationFailureKind::Timeout,
                message: "Request timed out after 120000ms".into(),
            }),
            score: None,
            scoring_duration_ms: None,
            scoring_failure: None,
        };
        let items = vec![item];
        RunReport {
            id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            duration_ms: 1,
            model_metadata: BTreeMap::from([("m".to_string(), ModelMetadata::fallback())]),
            stats: compute_run_stats(&items),
            items,
        }
    }

    #[test]
    fn save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.json");
        let report = make_report();

        report.save_json(&path).unwrap();
        let loaded = RunReport::load_json(&path).unwrap();

        assert_eq!(loaded.id, report.id);
        assert_eq!(loaded.items, report.items);
        assert_eq!(loaded.stats, report.stats);
    }

    #[test]
    fn item_lookup_by_id() {
        let report = make_report();
        assert!(report.item("m__ollama__calc__base").is_some());
        assert!(report.item("missing").is_none());
    }
}
