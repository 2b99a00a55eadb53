//! The `benchmatrix list-models` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use benchmatrix_backends::load_config_from;
use benchmatrix_backends::ollama::OllamaBackend;
use benchmatrix_core::timeout::is_high_precision;
use benchmatrix_core::traits::Backend;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let ollama = OllamaBackend::new(&config.ollama.base_url);

    let models = ollama
        .list_models()
        .await
        .with_context(|| format!("could not list models from {}", ollama.base_url()))?;

    if models.is_empty() {
        println!("No models pulled on {}. Try `ollama pull <model>`.", ollama.base_url());
        return Ok(());
    }

    println!("Models on {}:", ollama.base_url());
    for model in &models {
        let info = ollama.model_info(model).await;
        let precision = if is_high_precision(model) { ", high precision" } else { "" };
        println!(
            "  {model} ({:.1}B params, {:.1} GB{precision})",
            info.parameters_b,
            info.size_bytes as f64 / 1e9,
        );
    }

    Ok(())
}
