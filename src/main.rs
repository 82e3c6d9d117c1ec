mod demo;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cairn_orchestrator::Orchestrator;
use cairn_pipeline::PipelineSpec;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Cairn - a configuration-driven pipeline orchestrator with memoized artifacts
#[derive(Parser)]
#[command(name = "cairn")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Project directory (default: current directory)
  #[arg(long, global = true)]
  root: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Create a new project
  Init,

  /// Write a config file for a new run, with defaults filled in
  Config { run_key: String },

  /// Validate a run's config and record it
  Prepare { run_key: String },

  /// Execute a prepared run, skipping already completed work
  Engage { run_key: String },

  /// Show the completion state of a run's artifacts
  Status { run_key: String },

  /// List prepared runs
  Runs,

  /// Forget a run and delete artifacts no other run uses
  Remove { run_key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let root = match cli.root {
    Some(root) => root,
    None => std::env::current_dir().context("could not determine current directory")?,
  };

  let Some(command) = cli.command else {
    println!("cairn - use --help to see available commands");
    return Ok(());
  };

  let spec = demo::pipeline().context("failed to build pipeline")?;

  match command {
    Commands::Init => {
      Orchestrator::init(&root, spec)
        .await
        .with_context(|| format!("failed to initialize project at {}", root.display()))?;
      eprintln!("Initialized project at {}", root.display());
    }
    Commands::Config { run_key } => {
      let orchestrator = open(&root, spec).await?;
      let path = orchestrator.write_config(&run_key).await?;
      eprintln!("Wrote {}", path.display());
    }
    Commands::Prepare { run_key } => {
      let orchestrator = open(&root, spec).await?;
      let prepared = orchestrator
        .prepare(&run_key)
        .await
        .with_context(|| format!("failed to prepare run '{}'", run_key))?;
      match prepared.existing_run_key {
        Some(existing) if existing != run_key => {
          eprintln!(
            "Run '{}' has the same configuration as '{}'; use that run instead",
            run_key, existing
          );
        }
        _ => eprintln!("Prepared run '{}' (id {})", run_key, prepared.run_id),
      }
    }
    Commands::Engage { run_key } => {
      let orchestrator = open(&root, spec).await?;
      let report = orchestrator
        .engage(&run_key)
        .await
        .with_context(|| format!("failed to engage run '{}'", run_key))?;
      eprintln!(
        "Executed {} node(s), skipped {}",
        report.executed.len(),
        report.skipped.len()
      );
      for path in report.exported {
        println!("{}", path.display());
      }
    }
    Commands::Status { run_key } => {
      let orchestrator = open(&root, spec).await?;
      for status in orchestrator.status(&run_key).await? {
        println!(
          "{}\t{}\t{}{}",
          status.variable,
          status.producer,
          if status.complete { "complete" } else { "pending" },
          if status.final_output { "\tfinal" } else { "" }
        );
      }
    }
    Commands::Runs => {
      let orchestrator = open(&root, spec).await?;
      for run_key in orchestrator.runs().await? {
        println!("{}", run_key);
      }
    }
    Commands::Remove { run_key } => {
      let orchestrator = open(&root, spec).await?;
      orchestrator
        .remove(&run_key)
        .await
        .with_context(|| format!("failed to remove run '{}'", run_key))?;
      eprintln!("Removed run '{}'", run_key);
    }
  }

  Ok(())
}

async fn open(root: &Path, spec: PipelineSpec) -> Result<Orchestrator> {
  Orchestrator::open(root, spec)
    .await
    .with_context(|| format!("failed to open project at {}", root.display()))
}
