//! CLI command definitions for pipeforge.
//!
//! `run` drives a search over a YAML catalogue using the synthetic worker,
//! `history` summarizes the result logs of an earlier run.

use crate::config::SchedulerConfig;
use crate::metrics::init_metrics;
use crate::model::Dataset;
use crate::proposer::{Catalogue, RandomSearchProposer};
use crate::sampler::{ConfigCache, ConfigSampler};
use crate::scheduler::{
    Collaborators, Scheduler, SearchOutcome, SelectionPolicy, Termination, WorkerPool,
    WorkerPoolConfig,
};
use crate::storage::{Incumbent, JsonResultLogger, RunHistory, RunMetadata};
use crate::worker::SyntheticWorker;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Adaptive search scheduler for candidate ML pipelines.
#[derive(Parser)]
#[command(name = "pipeforge")]
#[command(about = "Search pipeline structures and their configurations under a wall-clock budget")]
#[command(version)]
#[command(
    long_about = "pipeforge alternates between proposing pipeline structures from a template catalogue and sampling configurations for them, dispatching every evaluation to a worker pool until the wall-clock limit is reached.\n\nExample usage:\n  pipeforge run --catalogue demos/catalogue.yaml --wallclock-limit 30 --workers 4 --output ./runs/iris"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a search against the synthetic evaluator.
    Run(RunArgs),

    /// Summarize the result logs of a previous run.
    History(HistoryArgs),
}

/// Arguments for `pipeforge run`.
///
/// Unset scheduler options fall back to the `PIPEFORGE_*` environment.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// YAML catalogue of pipeline templates.
    #[arg(short = 'c', long)]
    pub catalogue: PathBuf,

    /// Wall-clock limit of the whole run in seconds.
    #[arg(short = 'w', long)]
    pub wallclock_limit: Option<u64>,

    /// Per-job cutoff in seconds.
    #[arg(long)]
    pub cutoff: Option<u64>,

    /// Number of concurrent workers.
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,

    /// Let workers sample configurations instead of the scheduler.
    #[arg(long)]
    pub lazy: bool,

    /// Configurations to evaluate per structure.
    #[arg(short = 'b', long, default_value = "5")]
    pub budget: u32,

    /// Structures the proposer issues per iteration.
    #[arg(long, default_value = "4")]
    pub structures_per_iteration: u32,

    /// Proposer iterations per repetition.
    #[arg(long, default_value = "1")]
    pub iterations: u32,

    /// Seed for structure proposal, configuration sampling and selection.
    #[arg(long)]
    pub seed: Option<u64>,

    /// How the next incomplete structure is picked (random, round-robin, oldest-first).
    #[arg(long)]
    pub selection_policy: Option<SelectionPolicy>,

    /// Directory for the result logs (default: the configured working directory).
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Append to existing result logs instead of truncating them.
    #[arg(long)]
    pub append: bool,

    /// Simulated latency of every synthetic job in milliseconds.
    #[arg(long, default_value = "0")]
    pub latency_ms: u64,

    /// Name of the dataset being searched.
    #[arg(long, default_value = "synthetic")]
    pub dataset: String,

    /// Metric the loss is derived from.
    #[arg(long, default_value = "accuracy")]
    pub metric: String,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `pipeforge history`.
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Directory holding `results.json` and `structures.json`.
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments without executing.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_search_command(args).await,
        Commands::History(args) => run_history_command(args),
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

fn scheduler_config(args: &RunArgs) -> anyhow::Result<SchedulerConfig> {
    let mut config = SchedulerConfig::from_env()?;
    if let Some(secs) = args.wallclock_limit {
        config = config.with_wallclock_limit(Duration::from_secs(secs));
    }
    if let Some(secs) = args.cutoff {
        config = config.with_cutoff(Duration::from_secs(secs));
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if args.lazy {
        config = config.with_pre_sample(false);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(policy) = args.selection_policy {
        config = config.with_selection_policy(policy);
    }
    if let Some(ref output) = args.output {
        config = config.with_working_directory(output.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn run_search_command(args: RunArgs) -> anyhow::Result<()> {
    let config = scheduler_config(&args)?;
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics unavailable");
    }

    let catalogue = Arc::new(Catalogue::load(&args.catalogue)?);
    let sampler: Arc<dyn ConfigSampler> = Arc::new(ConfigCache::new(config.seed));
    let proposer = Arc::new(
        RandomSearchProposer::new(Arc::clone(&catalogue), args.structures_per_iteration, args.budget)
            .with_iterations(args.iterations)
            .with_seed(config.seed),
    );
    let worker = Arc::new(
        SyntheticWorker::new(Arc::clone(&catalogue), Arc::clone(&sampler))
            .with_latency(Duration::from_millis(args.latency_ms)),
    );
    let pool = Arc::new(WorkerPool::new(
        WorkerPoolConfig::new(config.n_workers).with_shutdown_timeout(config.shutdown_timeout),
        worker,
    ));
    pool.start()?;

    let logger = Arc::new(JsonResultLogger::new(&config.working_directory, !args.append)?);
    let dataset = Arc::new(Dataset::new(args.dataset.clone(), args.metric.clone()));
    let scheduler = Scheduler::new(
        config,
        dataset,
        Collaborators {
            proposer,
            sampler,
            dispatcher: pool.clone(),
            logger: logger.clone(),
        },
    )?;

    let interrupt = scheduler.interrupt_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, interrupting search");
            interrupt.cancel();
        }
    });

    let outcome = scheduler.run().await?;
    let stats = pool.stats();
    info!(
        processed = stats.total_processed(),
        failed = stats.jobs_failed,
        timed_out = stats.jobs_timed_out,
        success_rate = stats.success_rate(),
        output = %logger.directory().display(),
        "Search finished"
    );

    print_run_summary(&outcome, args.json)
}

#[derive(Serialize)]
struct RunSummary<'a> {
    termination: &'a Termination,
    structures: usize,
    evaluations: usize,
    successful: usize,
    incumbent: Option<&'a Incumbent>,
    meta: Option<&'a RunMetadata>,
}

fn summarize<'a>(
    history: &'a RunHistory,
    termination: &'a Termination,
    incumbent: Option<&'a Incumbent>,
) -> RunSummary<'a> {
    RunSummary {
        termination,
        structures: history.structures.len(),
        evaluations: history.evaluations.len(),
        successful: history.successful(),
        incumbent,
        meta: history.meta.as_ref(),
    }
}

fn print_run_summary(outcome: &SearchOutcome, json: bool) -> anyhow::Result<()> {
    let summary = summarize(&outcome.history, &outcome.termination, outcome.incumbent.as_ref());
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    print_summary_text(&summary)
}

fn print_summary_text(summary: &RunSummary<'_>) -> anyhow::Result<()> {
    println!("Termination:  {}", summary.termination);
    println!("Structures:   {}", summary.structures);
    println!(
        "Evaluations:  {} ({} successful)",
        summary.evaluations, summary.successful
    );
    if let Some(meta) = summary.meta {
        println!("Repetitions:  {}", meta.repetitions);
        if let Some(elapsed) = meta.elapsed_secs() {
            println!("Elapsed:      {:.1}s", elapsed);
        }
    }
    match summary.incumbent {
        Some(incumbent) => {
            println!("Incumbent:    {} (loss {:.4})", incumbent.cid, incumbent.loss);
            println!("Config:       {}", serde_json::to_string(&incumbent.config)?);
        }
        None => println!("Incumbent:    none"),
    }
    Ok(())
}

// ============================================================================
// History Command Implementation
// ============================================================================

fn run_history_command(args: HistoryArgs) -> anyhow::Result<()> {
    if !args.output.is_dir() {
        anyhow::bail!("No result logs found at {}", args.output.display());
    }
    let history = JsonResultLogger::read(&args.output)?;
    let incumbent = history.incumbent();
    let termination = history
        .meta
        .as_ref()
        .and_then(|meta| meta.termination.clone())
        .unwrap_or(Termination::Interrupted);

    let summary = summarize(&history, &termination, incumbent.as_ref());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    print_summary_text(&summary)
}
