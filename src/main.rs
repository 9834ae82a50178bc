use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use opgraph::client::InMemoryClient;
use opgraph::config::Config;
use opgraph::core::{OperationKind, TaskGraph, TaskOutcome};
use opgraph::orchestration::{RunReport, Scheduler, SchedulerEvent};
use opgraph::workflow::vision_workflow;
use opgraph::Result;

/// opgraph - run dependency-ordered resource lifecycle workflows
#[derive(Parser, Debug)]
#[command(name = "opgraph")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    OPGRAPH_DEBUG=1               Enable debug logging (alternative to --debug)\n    GCP_VISION_LOCATION           Override the target location\n    GCP_VISION_PRODUCT_SET_ID     Override the pinned product set id\n    GCP_VISION_PRODUCT_ID         Override the pinned product id")]
pub struct Cli {
    /// Enable debug logging (written to stderr)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (defaults to ~/.opgraph/opgraph.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the tasks of the example workflow in execution order
    Plan {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run the example workflow against the in-memory client
    Run {
        /// Maximum number of tasks in flight (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Make every KIND call on RESOURCE fail, e.g. `get:products`
        #[arg(long = "fail", value_name = "KIND:RESOURCE", value_parser = parse_failure)]
        failures: Vec<(OperationKind, String)>,

        /// Artificial latency per client call, in milliseconds
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
    },
}

fn parse_failure(value: &str) -> std::result::Result<(OperationKind, String), String> {
    let (kind, resource) = value
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:RESOURCE, got {value:?}"))?;
    let kind = kind.parse::<OperationKind>().map_err(|e| e.to_string())?;
    if resource.is_empty() {
        return Err("resource must not be empty".to_string());
    }
    Ok((kind, resource.to_string()))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    opgraph::log::init_with_debug(cli.debug)?;
    tracing::debug!(?cli, "opgraph starting");

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Plan { json } => run_plan(&config, json),
        Command::Run {
            concurrency,
            json,
            failures,
            latency_ms,
        } => run_workflow(&config, concurrency, json, failures, latency_ms),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load_from(path)?.with_overrides(|key| std::env::var(key).ok())),
        None => Config::load(),
    }
}

/// Print the execution order of the example workflow.
fn run_plan(config: &Config, json: bool) -> Result<ExitCode> {
    let graph = vision_workflow(config)?;
    let order = graph.topological_order()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&order)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<4} {:<36} {:<8} {:<14} {}", "#", "TASK", "KIND", "RESOURCE", "ID");
    for (i, task) in order.iter().enumerate() {
        println!(
            "{:<4} {:<36} {:<8} {:<14} {}",
            i + 1,
            task.name,
            task.kind.to_string(),
            task.resource,
            task.resource_id
        );
    }
    print_dependencies(&graph);
    Ok(ExitCode::SUCCESS)
}

fn print_dependencies(graph: &TaskGraph) {
    println!();
    for task in graph.tasks() {
        let upstream: Vec<_> = graph
            .upstream(&task.name)
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        if !upstream.is_empty() {
            println!("  {} <- {}", task.name, upstream.join(", "));
        }
    }
}

/// Run the example workflow and report every task's outcome.
fn run_workflow(
    config: &Config,
    concurrency: Option<usize>,
    json: bool,
    failures: Vec<(OperationKind, String)>,
    latency_ms: u64,
) -> Result<ExitCode> {
    let graph = vision_workflow(config)?;

    let mut client = InMemoryClient::new();
    for (kind, resource) in &failures {
        client = client.with_failure(*kind, resource);
    }
    if latency_ms > 0 {
        client = client.with_latency(Duration::from_millis(latency_ms));
    }

    let max_concurrent = concurrency.unwrap_or(config.max_concurrent);
    let rt = tokio::runtime::Runtime::new()?;

    let report = rt.block_on(async {
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let scheduler =
            Scheduler::new(graph, Arc::new(client), max_concurrent).with_events(event_tx);

        let cancel = CancellationToken::new();
        let ctrl_c = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, letting running tasks finish");
                    cancel.cancel();
                }
            })
        };

        let progress = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if !json {
                    print_event(&event);
                }
            }
        });

        let report = scheduler.run(cancel).await;
        drop(scheduler);
        ctrl_c.abort();
        if let Err(e) = progress.await {
            tracing::warn!(error = %e, "progress printer stopped");
        }
        report
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::TaskStarted { task } => println!("  started    {}", task),
        SchedulerEvent::TaskSucceeded { task } => println!("  succeeded  {}", task),
        SchedulerEvent::TaskFailed { task, error } => println!("  failed     {}: {}", task, error),
        SchedulerEvent::TaskSkipped { task, upstream } => {
            println!("  skipped    {} ({} failed)", task, upstream)
        }
        SchedulerEvent::RunFinished { .. } => {}
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("  Run ID:    {}", report.run_id.short());
    println!(
        "  Tasks:     {} succeeded, {} failed, {} skipped",
        report.succeeded().len(),
        report.failed().len(),
        report.skipped().len()
    );
    if report.cancelled {
        println!("  Status:    {}", format_outcome(&TaskOutcome::Cancelled));
    }
    for (name, outcome) in &report.outcomes {
        if !outcome.is_succeeded() {
            println!("    {:<36} {}", name, format_outcome(outcome));
        }
    }
}

/// Format an outcome with color codes for terminal.
fn format_outcome(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Succeeded { .. } => format!("\x1b[32m{}\x1b[0m", outcome), // Green
        TaskOutcome::Failed { .. } => format!("\x1b[31m{}\x1b[0m", outcome),    // Red
        TaskOutcome::Skipped { .. } => format!("\x1b[33m{}\x1b[0m", outcome),   // Yellow
        TaskOutcome::Cancelled => format!("\x1b[90m{}\x1b[0m", outcome),        // Gray
    }
}
