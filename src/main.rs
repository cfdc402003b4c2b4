//! repairbench command-line interface.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use repairbench::config::{Config, SandboxLifetime};
use repairbench::dataset;
use repairbench::llm;
use repairbench::runner::Runner;

#[derive(Parser)]
#[command(name = "repairbench", version, about = "Evaluate LLM code-repair agents on bug benchmarks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a batch of benchmark entries and write a predictions document.
    Run {
        /// Path to the benchmark dataset (JSON array of entries).
        #[arg(long)]
        dataset: PathBuf,

        /// Where to write the predictions document.
        #[arg(long, default_value = "predictions.json")]
        output: PathBuf,

        /// Process only the first N entries.
        #[arg(long)]
        limit: Option<usize>,

        /// Leave sandboxes alive after each entry instead of removing them.
        #[arg(long)]
        keep_sandbox: bool,
    },

    /// Bring up the sandbox environment for one entry and leave it alive.
    Setup {
        /// Path to the benchmark dataset (JSON array of entries).
        #[arg(long)]
        dataset: PathBuf,

        /// Index of the entry to set up.
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("loading configuration")?;

    match cli.command {
        Command::Run {
            dataset: dataset_path,
            output,
            limit,
            keep_sandbox,
        } => {
            if keep_sandbox {
                config.sandbox.lifetime = SandboxLifetime::Persistent;
            }

            let entries = dataset::load_entries(&dataset_path);
            if entries.is_empty() {
                anyhow::bail!("no benchmark entries loaded from {}", dataset_path.display());
            }
            let entries = match limit {
                Some(limit) => &entries[..entries.len().min(limit)],
                None => &entries[..],
            };

            let provider = llm::create_provider(&config.llm).context("creating model provider")?;
            let runner = Runner::new(config, provider);
            runner
                .run_batch(entries, &output)
                .await
                .context("running batch")?;

            tracing::info!(output = %output.display(), "batch complete");
        }

        Command::Setup {
            dataset: dataset_path,
            index,
        } => {
            let entries = dataset::load_entries(&dataset_path);
            let entry = entries
                .get(index)
                .with_context(|| format!("no entry at index {index}"))?;

            let provider = llm::create_provider(&config.llm).context("creating model provider")?;
            let runner = Runner::new(config, provider);
            runner.setup_entry(entry).await.context("setting up entry")?;
        }
    }

    Ok(())
}
