pub mod list_models;
pub mod run;
pub mod score;
pub mod validate;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use benchmatrix_backends::BenchmatrixConfig;
use benchmatrix_core::model::Language;
use benchmatrix_core::spec::SpecCatalog;
use benchmatrix_scoring::{RuntimeConfig, ScoringEngine};

/// Split a comma-separated flag into trimmed, non-empty parts.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Parse a comma-separated flag into typed values.
pub fn parse_list<T>(s: &str) -> anyhow::Result<Vec<T>>
where
    T: FromStr<Err = String>,
{
    split_list(s)
        .iter()
        .map(|p| p.parse::<T>().map_err(anyhow::Error::msg))
        .collect()
}

/// Scoring engine wired from the `[runtime]` config section.
pub fn scoring_engine(config: &BenchmatrixConfig, specs_dir: PathBuf, language: Language) -> ScoringEngine {
    let runtime = RuntimeConfig {
        program: config.runtime.program.clone(),
        typescript_args: config.runtime.typescript_args.clone(),
        javascript_args: config.runtime.javascript_args.clone(),
        load_timeout: Duration::from_millis(config.runtime.load_timeout_ms),
        call_timeout: Duration::from_millis(config.runtime.call_timeout_ms),
    };
    ScoringEngine::new(SpecCatalog::new(specs_dir), language, runtime)
}
