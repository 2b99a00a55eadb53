//! Run-level aggregate statistics.
//!
//! Everything here is derived from the item results alone, so a summary can
//! be recomputed from stored results without rerunning anything.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classify::{GenerationFailureKind, ScoringFailureKind};
use crate::results::{ItemResult, ItemStatus};

/// Aggregate statistics across all items of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_items: usize,
    pub completed: usize,
    pub failed: usize,
    /// Items whose generated code passed every scoring check.
    pub fully_passing: usize,
    pub generation_failures: BTreeMap<GenerationFailureKind, usize>,
    pub scoring_failures: BTreeMap<ScoringFailureKind, usize>,
    pub per_model: BTreeMap<String, GroupStats>,
    pub per_backend: BTreeMap<String, GroupStats>,
}

/// Statistics for one model or one backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub items: usize,
    /// Items that reached scoring and produced counts.
    pub scored: usize,
    pub checks_passed: u64,
    pub checks_total: u64,
    /// `checks_passed / checks_total`, 0.0 when nothing was checked.
    pub pass_rate: f64,
    /// Mean generation latency over successful generations.
    pub avg_generation_ms: u64,
}

#[derive(Default)]
struct Accumulator {
    items: usize,
    scored: usize,
    checks_passed: u64,
    checks_total: u64,
    generation_ms: u64,
    generations: u64,
}

impl Accumulator {
    fn add(&mut self, item: &ItemResult) {
        self.items += 1;
        if item.generation.success {
            self.generations += 1;
            self.generation_ms += item.generation.duration_ms;
        }
        if let Some(score) = &item.score {
            if score.total > 0 {
                self.scored += 1;
            }
            self.checks_passed += score.passed as u64;
            self.checks_total += score.total as u64;
        }
    }

    fn finish(self) -> GroupStats {
        GroupStats {
            items: self.items,
            scored: self.scored,
            checks_passed: self.checks_passed,
            checks_total: self.checks_total,
            pass_rate: if self.checks_total > 0 {
                self.checks_passed as f64 / self.checks_total as f64
            } else {
                0.0
            },
            avg_generation_ms: if self.generations > 0 {
                self.generation_ms / self.generations
            } else {
                0
            },
        }
    }
}

/// Compute aggregate statistics for a set of item results.
pub fn compute_run_stats(items: &[ItemResult]) -> RunStats {
    let mut stats = RunStats {
        total_items: items.len(),
        ..Default::default()
    };
    let mut per_model: BTreeMap<String, Accumulator> = BTreeMap::new();
    let mut per_backend: BTreeMap<String, Accumulator> = BTreeMap::new();

    for item in items {
        match item.status {
            ItemStatus::Completed => stats.completed += 1,
            ItemStatus::Failed => stats.failed += 1,
            ItemStatus::Pending | ItemStatus::Running => {}
        }
        if let Some(failure) = &item.generation_failure {
            *stats.generation_failures.entry(failure.kind).or_default() += 1;
        }
        if let Some(failure) = &item.scoring_failure {
            *stats.scoring_failures.entry(failure.kind).or_default() += 1;
        }
        if item.score.as_ref().is_some_and(|s| s.all_passed()) {
            stats.fully_passing += 1;
        }

        per_model.entry(item.model.clone()).or_default().add(item);
        per_backend
            .entry(item.backend.to_string())
            .or_default()
            .add(item);
    }

    stats.per_model = per_model.into_iter().map(|(k, v)| (k, v.finish())).collect();
    stats.per_backend = per_backend
        .into_iter()
        .map(|(k, v)| (k, v.finish()))
        .collect();
    stats
}
