//! Command-line inspection of graphs and checkpoints.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dagpipe::checkpoint::{
    CheckpointBackend, CheckpointStore, FileCheckpointStore, DEFAULT_CHECKPOINT_DIR,
};
use dagpipe::config::PipelineConfig;
use dagpipe::graph::Graph;
use dagpipe::observability::{init_tracing, LogFormat};
use dagpipe::router::Tier;

#[derive(Debug, Parser)]
#[command(name = "dagpipe", version, about = "Inspect DagPipe graphs and checkpoints")]
struct Cli {
    /// Pipeline configuration file (YAML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log format: text or json.
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a graph and print its execution order
    Plan(PlanArgs),
    /// Manage stored checkpoints
    Checkpoints(CheckpointArgs),
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// Graph definition file.
    #[arg(value_name = "GRAPH")]
    graph: PathBuf,
    /// Print the plan as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckpointArgs {
    /// Checkpoint directory; overrides configuration.
    #[arg(long)]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    action: CheckpointAction,
}

#[derive(Debug, Subcommand)]
enum CheckpointAction {
    /// List checkpointed node ids
    List,
    /// Print the stored output of a node
    Show {
        /// Node id.
        id: String,
    },
    /// Delete every checkpoint
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    }
    .apply_env()?;

    match cli.command {
        Command::Plan(args) => plan(&args, &config),
        Command::Checkpoints(args) => {
            let store = FileCheckpointStore::new(checkpoint_dir(args.dir, &config));
            checkpoints(&store, args.action).await
        }
    }
}

fn plan(args: &PlanArgs, config: &PipelineConfig) -> anyhow::Result<()> {
    let graph = Graph::load(&args.graph)
        .with_context(|| format!("invalid graph {}", args.graph.display()))?;
    let threshold = config.router.complexity_threshold;

    let rows: Vec<serde_json::Value> = graph
        .iter()
        .enumerate()
        .map(|(step, node)| {
            let tier = if node.is_deterministic {
                None
            } else if node.complexity >= threshold {
                Some(Tier::High)
            } else {
                Some(Tier::Low)
            };
            serde_json::json!({
                "step": step + 1,
                "id": node.id,
                "fn": node.function,
                "depends_on": node.depends_on,
                "complexity": node.complexity,
                "tier": tier.map(|t| t.to_string()),
                "output_schema": node.output_schema,
            })
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{} nodes, threshold {threshold}", graph.len());
    for row in &rows {
        let deps = row["depends_on"]
            .as_array()
            .map(|d| {
                d.iter()
                    .filter_map(serde_json::Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        println!(
            "{:>3}. {:<24} fn={:<20} tier={:<8} after=[{deps}]",
            row["step"],
            row["id"].as_str().unwrap_or_default(),
            row["fn"].as_str().unwrap_or_default(),
            row["tier"].as_str().unwrap_or("none"),
        );
    }
    Ok(())
}

async fn checkpoints(store: &FileCheckpointStore, action: CheckpointAction) -> anyhow::Result<()> {
    match action {
        CheckpointAction::List => {
            let ids = store.list().await?;
            if ids.is_empty() {
                println!("no checkpoints in {}", store.root().display());
            }
            for id in ids {
                println!("{id}");
            }
        }
        CheckpointAction::Show { id } => {
            let output = store
                .load(&id)
                .await
                .with_context(|| format!("no checkpoint for node '{id}'"))?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        CheckpointAction::Clear => {
            store.clear().await?;
            println!("cleared {}", store.root().display());
        }
    }
    Ok(())
}

fn checkpoint_dir(explicit: Option<PathBuf>, config: &PipelineConfig) -> PathBuf {
    explicit.unwrap_or_else(|| match &config.checkpoint {
        CheckpointBackend::File { dir } => dir.clone(),
        CheckpointBackend::Memory => PathBuf::from(DEFAULT_CHECKPOINT_DIR),
    })
}
