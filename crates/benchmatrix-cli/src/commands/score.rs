//! The `benchmatrix score` command: score a saved raw output offline.

use std::path::PathBuf;

use anyhow::{Context, Result};

use benchmatrix_backends::load_config_from;
use benchmatrix_core::model::Language;
use benchmatrix_core::traits::Scorer;

use super::scoring_engine;

pub async fn execute(
    task: String,
    input: PathBuf,
    specs: Option<PathBuf>,
    language: Option<String>,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let language = match language {
        Some(l) => l.parse::<Language>().map_err(anyhow::Error::msg)?,
        None => config.language,
    };
    let raw = std::fs::read_to_string(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    let specs_dir = specs.unwrap_or_else(|| config.specs_dir.clone());
    let engine = scoring_engine(&config, specs_dir, language);
    let result = engine.score(&task, &raw).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if let Some(method) = result.extraction_method {
        println!("Extraction: {method}");
    }
    for detail in &result.details {
        let verdict = if detail.passed { "PASS" } else { "FAIL" };
        let label = detail.description.as_deref().unwrap_or(&detail.name);
        match (&detail.error, &detail.expected, &detail.actual) {
            (Some(error), _, _) => println!("  {verdict} {label}: {error}"),
            (None, Some(expected), Some(actual)) if !detail.passed => {
                println!("  {verdict} {label}: expected {expected}, got {actual}")
            }
            _ => println!("  {verdict} {label}"),
        }
    }
    if let (Some(kind), Some(error)) = (&result.failure_kind, &result.error) {
        println!("Stopped ({kind}): {error}");
    }
    println!("Score: {}/{} ({:.1}%)", result.passed, result.total, result.pass_rate() * 100.0);

    Ok(())
}
