//! Parabuild CLI - sweep a build-and-run pipeline over parameter values.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use parabuild_core::{Collect, Sum, Task};
use parabuild_engine::{remove_workspace_root, Engine, EngineConfig, DEFAULT_WORKSPACE_ROOT};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod sweep;

use sweep::{sweep_args, CommandLine, LineEdit, SweepPlan, ValueRange, VALUE_ARG};

/// Parabuild - run one build-and-execute pipeline per value, in parallel
#[derive(Parser)]
#[command(name = "parabuild")]
#[command(about = "Parallel parameter sweeps over isolated project copies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once per value
    Sweep(SweepArgs),

    /// Remove the workspace root
    Clean {
        /// Directory holding the worker workspaces
        #[arg(long, default_value = DEFAULT_WORKSPACE_ROOT)]
        workspace_root: PathBuf,
    },
}

#[derive(clap::Args)]
struct SweepArgs {
    /// Source project copied into every workspace
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// Integer values to sweep, as START..END (END excluded)
    #[arg(long, conflicts_with = "value", required_unless_present = "value")]
    values: Option<ValueRange>,

    /// A single value to sweep (repeatable)
    #[arg(long)]
    value: Vec<String>,

    /// Replace a line before the steps run: FILE:LINE={value} template, LINE 1-based
    #[arg(long = "set")]
    edits: Vec<LineEdit>,

    /// Command run for every value; stdout of the last one is the output
    #[arg(long = "step")]
    steps: Vec<CommandLine>,

    /// Command run once in every fresh workspace
    #[arg(long = "init")]
    init: Vec<CommandLine>,

    /// Glob of project entries not copied into workspaces
    #[arg(long)]
    exclude: Vec<String>,

    /// Directory holding the worker workspaces
    #[arg(long, default_value = DEFAULT_WORKSPACE_ROOT)]
    workspace_root: PathBuf,

    /// Number of workers (defaults to the CPU count)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Remove the workspace root before provisioning
    #[arg(long)]
    clean: bool,

    /// Do not render progress
    #[arg(long)]
    no_progress: bool,

    /// How outputs are combined
    #[arg(long, value_enum, default_value_t = ReduceMode::Collect)]
    reduce: ReduceMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReduceMode {
    /// Print every output, grouped per worker
    Collect,
    /// Parse outputs as integers and add them up
    Sum,
}

impl SweepArgs {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(&self.project)
            .with_workspace_root(&self.workspace_root)
            .with_progress(!self.no_progress)
            .with_clean(self.clean);
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        for init in &self.init {
            config = config.with_init_command(init.0.iter().cloned());
        }
        for pattern in &self.exclude {
            config = config.with_exclude(pattern.as_str());
        }
        config
    }

    fn plan(&self) -> SweepPlan {
        SweepPlan {
            edits: self.edits.clone(),
            steps: self.steps.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; stdout is reserved for results
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Sweep(args) => match args.reduce {
            ReduceMode::Collect => sweep_collect(args).await?,
            ReduceMode::Sum => sweep_sum(args).await?,
        },
        Commands::Clean { workspace_root } => {
            clean(workspace_root).await?;
        }
    }

    Ok(())
}

async fn sweep_collect(args: SweepArgs) -> Result<(), Box<dyn std::error::Error>> {
    let plan = args.plan();
    let task = move |task: &Task| -> anyhow::Result<(String, String)> {
        let output = plan.run(task)?;
        Ok((task.arg(VALUE_ARG)?, output.trim_end().to_string()))
    };

    let mut engine =
        Engine::start(args.engine_config(), task, Collect::<(String, String)>::default).await?;
    for task_args in sweep_args(args.values.as_ref(), &args.value) {
        engine.submit(task_args)?;
    }
    let per_worker = engine.join(None).await?;

    for (worker, outputs) in per_worker.into_iter().enumerate() {
        let outputs: Map<String, Value> = outputs
            .into_iter()
            .map(|(value, output)| (value, Value::String(output)))
            .collect();
        println!(
            "{}",
            serde_json::json!({ "worker": worker, "outputs": outputs })
        );
    }

    Ok(())
}

async fn sweep_sum(args: SweepArgs) -> Result<(), Box<dyn std::error::Error>> {
    let plan = args.plan();
    let task = move |task: &Task| -> anyhow::Result<i64> {
        let output = plan.run(task)?;
        let trimmed = output.trim();
        trimmed
            .parse()
            .map_err(|e| anyhow::anyhow!("output '{trimmed}' is not an integer: {e}"))
    };

    let mut engine = Engine::start(args.engine_config(), task, Sum::<i64>::default).await?;
    for task_args in sweep_args(args.values.as_ref(), &args.value) {
        engine.submit(task_args)?;
    }
    let partials = engine.join(None).await?;

    for (worker, partial) in partials.iter().enumerate() {
        println!("worker {worker}: {partial}");
    }
    println!("total: {}", partials.iter().sum::<i64>());

    Ok(())
}

async fn clean(workspace_root: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!(root = %workspace_root.display(), "Cleaning workspace root");
    remove_workspace_root(&workspace_root).await?;
    Ok(())
}
