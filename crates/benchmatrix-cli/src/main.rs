//! benchmatrix CLI — run the matrix, score saved outputs, validate specs.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "benchmatrix",
    version,
    about = "Local code-generation benchmark matrix"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark matrix
    Run {
        /// Models to run (comma-separated, e.g. "qwen2.5-coder:7b,llama3.2:3b")
        #[arg(long)]
        models: String,

        /// Backends to run through (comma-separated: ollama, goose, opencode)
        #[arg(long, default_value = "ollama")]
        backends: String,

        /// Tasks to run (comma-separated; default: every spec in the specs directory)
        #[arg(long)]
        tasks: Option<String>,

        /// Prompt variants (comma-separated)
        #[arg(long, default_value = "base")]
        variants: String,

        /// Override the base generation timeout, in milliseconds
        #[arg(long)]
        timeout_base_ms: Option<u64>,

        /// Ask the inference server to unload the model after each item
        #[arg(long)]
        release_after_each: bool,

        /// Output directory for the run report
        #[arg(long, default_value = "./benchmatrix-results")]
        output: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List models the inference server has pulled
    ListModels {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate scoring spec TOML files
    Validate {
        /// Path to a spec file or a directory of specs
        #[arg(long)]
        specs: PathBuf,
    },

    /// Score a saved raw model output against a task's spec
    Score {
        /// Task slug
        #[arg(long)]
        task: String,

        /// File holding the raw backend output
        #[arg(long)]
        input: PathBuf,

        /// Specs directory (default: from config)
        #[arg(long)]
        specs: Option<PathBuf>,

        /// Language of the generated code: typescript or javascript
        #[arg(long)]
        language: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let filter = match "benchmatrix=info".parse::<tracing_subscriber::filter::Directive>() {
        Ok(directive) => tracing_subscriber::EnvFilter::from_default_env().add_directive(directive),
        Err(_) => tracing_subscriber::EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            models,
            backends,
            tasks,
            variants,
            timeout_base_ms,
            release_after_each,
            output,
            config,
        } => {
            commands::run::execute(commands::run::RunArgs {
                models,
                backends,
                tasks,
                variants,
                timeout_base_ms,
                release_after_each,
                output,
                config,
            })
            .await
        }
        Commands::ListModels { config } => commands::list_models::execute(config).await,
        Commands::Validate { specs } => commands::validate::execute(specs),
        Commands::Score {
            task,
            input,
            specs,
            language,
            json,
            config,
        } => commands::score::execute(task, input, specs, language, json, config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
