//! The `benchmatrix validate` command.

use std::path::PathBuf;

use anyhow::Result;

use benchmatrix_core::spec::{load_spec_directory, parse_spec, validate_spec};

pub fn execute(specs_path: PathBuf) -> Result<()> {
    let specs = if specs_path.is_dir() {
        load_spec_directory(&specs_path)?
    } else {
        vec![parse_spec(&specs_path)?]
    };

    let mut total_warnings = 0;

    for spec in &specs {
        let factory = spec
            .factory
            .as_deref()
            .map(|f| format!(", factory {f}"))
            .unwrap_or_default();
        println!(
            "Spec: {} ({} exports, {} cases{factory})",
            spec.task,
            spec.exports.len(),
            spec.cases.len()
        );

        let warnings = validate_spec(spec);
        for w in &warnings {
            let prefix = w
                .case_index
                .map(|i| format!("  [case {}]", i + 1))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All specs valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
