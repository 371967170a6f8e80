//! mlci - run the heart-disease training pipeline locally or on a schedule.
//!
//! ## Commands
//!
//! - `test`, `test-cov`, `lint`, `format-check`, `train`, `all`, `ci`: run a
//!   pipeline target
//! - `format`: reformat sources with black
//! - `clean`, `clean-models`: remove caches or trained models
//! - `run`: run the graph for a trigger
//! - `schedule`: fire the scheduled graph on the configured calendar
//! - `plan`, `history`, `prune`: inspect and maintain the workspace

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info, warn};

use mlci_core::pipeline::render_plan;
use mlci_core::retention::prune_expired;
use mlci_core::steps::quality_gate::format_sources;
use mlci_core::{
    abort_pair, clean, graph_for_trigger, telemetry, AbortHandle, BuiltinExecutor, FsRunLedger,
    Orchestrator, PipelineConfig, PipelineGraph, RunLedger, RunReport, Scheduler, Target,
    ToolchainPreflight, Trigger, Workspace,
};

#[derive(Parser)]
#[command(name = "mlci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CI/CD pipeline for the heart-disease training project", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Report format on stdout
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Project directory
    #[arg(long, global = true, env = "MLCI_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Config file (default: mlci.toml in the workspace, if present)
    #[arg(long, global = true, env = "MLCI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run unit tests
    Test,

    /// Run unit tests with coverage
    TestCov,

    /// Run flake8 and pylint
    Lint,

    /// Reformat sources with black
    Format,

    /// Check formatting with black, failing on any difference
    FormatCheck,

    /// Train the model
    Train {
        /// Pass --verbose to the training entry point
        #[arg(long)]
        verbose: bool,
    },

    /// Lint, test with coverage, then train
    All,

    /// Full push pipeline, including integration validation and summary
    Ci,

    /// Remove Python caches and coverage output
    Clean,

    /// Remove trained models
    CleanModels,

    /// Run the pipeline graph for a trigger
    Run {
        /// push, manual or schedule
        #[arg(long, default_value = "manual")]
        trigger: Trigger,
    },

    /// Run the scheduled graph on the configured calendar
    Schedule {
        /// Exit after the first scheduled run
        #[arg(long)]
        once: bool,
    },

    /// Print the job order for a target or trigger
    Plan {
        /// Target to plan (default: ci)
        target: Option<Target>,

        /// Plan the graph for a trigger instead of a target
        #[arg(long, conflicts_with = "target")]
        trigger: Option<Trigger>,
    },

    /// List recorded runs, newest first
    History {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Delete artifact directories past their retention
    Prune,
}

/// Everything a command needs about the project.
struct Project {
    config: PipelineConfig,
    ws: Workspace,
}

impl Project {
    fn load(workspace: &Path, config: Option<&Path>) -> Result<Self> {
        let config = PipelineConfig::load(workspace, config)
            .with_context(|| format!("Failed to load config for {}", workspace.display()))?;
        let ws = Workspace::open(workspace, &config)
            .with_context(|| format!("Failed to open workspace {}", workspace.display()))?;
        Ok(Self { config, ws })
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        let executor = BuiltinExecutor::new(self.config.clone())
            .context("Failed to set up step executor")?;
        let ledger = FsRunLedger::new(self.ws.state_dir()).with_context(|| {
            format!(
                "Failed to open run ledger at {}",
                self.ws.state_dir().display()
            )
        })?;
        Ok(Orchestrator::new(
            Arc::new(executor),
            Arc::new(ToolchainPreflight::new(self.config.clone())),
            Arc::new(ledger),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.json, telemetry::level_for(cli.verbose));

    let code = dispatch(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Run the selected command and return the process exit code.
async fn dispatch(cli: Cli) -> Result<i32> {
    let project = Project::load(&cli.workspace, cli.config.as_deref())?;
    let output = cli.output;

    match cli.command {
        Commands::Test => cmd_target(&project, Target::Test, output).await,
        Commands::TestCov => cmd_target(&project, Target::TestCov, output).await,
        Commands::Lint => cmd_target(&project, Target::Lint, output).await,
        Commands::FormatCheck => cmd_target(&project, Target::FormatCheck, output).await,
        Commands::Train { verbose } => {
            cmd_target(&project, Target::Train { verbose }, output).await
        }
        Commands::All => cmd_target(&project, Target::All, output).await,
        Commands::Ci => cmd_target(&project, Target::Ci, output).await,
        Commands::Format => cmd_format(&project).await,
        Commands::Clean => cmd_clean(&project),
        Commands::CleanModels => cmd_clean_models(&project),
        Commands::Run { trigger } => {
            let graph = graph_for_trigger(trigger, &project.config)
                .context("Failed to build pipeline graph")?;
            execute(&project, &graph, trigger, output).await
        }
        Commands::Schedule { once } => cmd_schedule(&project, once, output).await,
        Commands::Plan { target, trigger } => {
            print!("{}", cmd_plan(&project.config, target, trigger)?);
            Ok(0)
        }
        Commands::History { limit } => cmd_history(&project, limit, output).await,
        Commands::Prune => cmd_prune(&project, output),
    }
}

/// Abort the returned handle's runs on Ctrl-C.
fn abort_on_ctrl_c() -> AbortHandle {
    let (handle, _signal) = abort_pair();
    let on_signal = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting run");
            on_signal.abort();
        }
    });
    handle
}

fn print_report(report: &RunReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to encode run report")?
        ),
    }
    Ok(())
}

async fn execute(
    project: &Project,
    graph: &PipelineGraph,
    trigger: Trigger,
    output: OutputFormat,
) -> Result<i32> {
    let orchestrator = project.orchestrator()?;
    let abort = abort_on_ctrl_c();
    let report = orchestrator
        .run(graph, trigger, &project.ws, abort.signal())
        .await
        .with_context(|| format!("Pipeline '{}' failed to run", graph.name()))?;
    print_report(&report, output)?;
    Ok(report.exit_code())
}

async fn cmd_target(project: &Project, target: Target, output: OutputFormat) -> Result<i32> {
    let graph = target
        .graph(&project.config)
        .with_context(|| format!("Failed to build graph for target '{target}'"))?;
    execute(project, &graph, Trigger::Manual, output).await
}

async fn cmd_format(project: &Project) -> Result<i32> {
    let out = format_sources(&project.config, &project.ws)
        .await
        .context("Failed to run black")?;
    print!("{}", out.combined());
    if out.timed_out {
        error!("black timed out");
    }
    Ok(out.code())
}

fn print_removed(removed: &[PathBuf], root: &Path) {
    if removed.is_empty() {
        println!("Nothing to remove");
        return;
    }
    for path in removed {
        let shown = path.strip_prefix(root).unwrap_or(path);
        println!("removed {}", shown.display());
    }
}

fn cmd_clean(project: &Project) -> Result<i32> {
    let removed = clean::clean_workspace(&project.ws).context("Failed to clean workspace")?;
    print_removed(&removed, project.ws.root());
    Ok(0)
}

fn cmd_clean_models(project: &Project) -> Result<i32> {
    let removed =
        clean::clean_models(&project.ws, &project.config).context("Failed to remove models")?;
    print_removed(&removed, project.ws.root());
    Ok(0)
}

async fn cmd_schedule(project: &Project, once: bool, output: OutputFormat) -> Result<i32> {
    let schedule = project
        .config
        .cron_schedule()
        .context("Invalid schedule in config")?;
    let graph = graph_for_trigger(Trigger::Schedule, &project.config)
        .context("Failed to build scheduled graph")?;
    let orchestrator = project.orchestrator()?;
    let shutdown = abort_on_ctrl_c();
    let last_exit = AtomicI32::new(0);

    info!(schedule = %schedule, once, "Scheduler started");
    let (orchestrator, graph, ws, shutdown_ref, last_exit_ref) =
        (&orchestrator, &graph, &project.ws, &shutdown, &last_exit);
    let fired = Scheduler::new(schedule)
        .run(shutdown.signal(), move |fired_at| {
            let (shutdown, last_exit) = (shutdown_ref, last_exit_ref);
            async move {
                info!(fired_at = %fired_at, "Scheduled run starting");
                match orchestrator
                    .run(graph, Trigger::Schedule, ws, shutdown.signal())
                    .await
                {
                    Ok(report) => {
                        last_exit.store(report.exit_code(), Ordering::SeqCst);
                        if let Err(e) = print_report(&report, output) {
                            error!("Failed to print report: {e:#}");
                        }
                    }
                    Err(e) => {
                        last_exit.store(1, Ordering::SeqCst);
                        error!("Scheduled run failed: {e}");
                    }
                }
                if once {
                    shutdown.abort();
                }
            }
        })
        .await;

    info!(fired, "Scheduler stopped");
    Ok(last_exit.load(Ordering::SeqCst))
}

fn cmd_plan(
    config: &PipelineConfig,
    target: Option<Target>,
    trigger: Option<Trigger>,
) -> Result<String> {
    let graph = match trigger {
        Some(trigger) => graph_for_trigger(trigger, config),
        None => target.unwrap_or(Target::Ci).graph(config),
    }
    .context("Failed to build pipeline graph")?;
    render_plan(&graph).context("Failed to order pipeline graph")
}

#[derive(Serialize)]
struct HistoryRow {
    run_id: String,
    graph: String,
    trigger: Trigger,
    created_at: chrono::DateTime<chrono::Utc>,
    status: String,
    exit_code: Option<i32>,
}

async fn cmd_history(project: &Project, limit: usize, output: OutputFormat) -> Result<i32> {
    let ledger = FsRunLedger::new(project.ws.state_dir()).context("Failed to open run ledger")?;
    let rows: Vec<HistoryRow> = ledger
        .list_runs()
        .await
        .context("Failed to list runs")?
        .into_iter()
        .take(limit)
        .map(|record| HistoryRow {
            status: match &record.report {
                Some(report) => format!("{:?}/{:?}", report.status, report.verdict).to_lowercase(),
                None => "unfinished".to_string(),
            },
            exit_code: record.report.as_ref().map(RunReport::exit_code),
            run_id: record.run_id,
            graph: record.graph,
            trigger: record.trigger,
            created_at: record.created_at,
        })
        .collect();

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text if rows.is_empty() => println!("No runs recorded"),
        OutputFormat::Text => {
            for row in &rows {
                println!(
                    "{}  {}  {:<9} {:<9} {}{}",
                    row.run_id,
                    row.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    row.trigger,
                    row.graph,
                    row.status,
                    row.exit_code
                        .map(|c| format!(" (exit {c})"))
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(0)
}

fn cmd_prune(project: &Project, output: OutputFormat) -> Result<i32> {
    let result = prune_expired(project.ws.artifacts_root(), chrono::Utc::now())
        .context("Failed to prune artifacts")?;
    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "removed": result.removed,
                "kept": result.kept,
            })
        ),
        OutputFormat::Text => {
            print_removed(&result.removed, project.ws.root());
            println!("{} removed, {} kept", result.removed_count(), result.kept.len());
        }
    }
    Ok(0)
}
