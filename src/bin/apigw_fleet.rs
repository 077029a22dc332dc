//! apigw-fleet: bulk API Gateway REST API management across accounts and regions
//!
//! Usage:
//!   apigw-fleet create --count <N> [--parallel]     Create N APIs spread over all targets
//!   apigw-fleet delete [--all | --prefix <P>]       Delete fleet APIs from all targets
//!   apigw-fleet list [--json]                       List APIs on all targets
//!
//! This binary never contacts AWS. Every gateway call goes to an in-process
//! sandbox whose state is persisted between runs in the file given by `--state`.

use anyhow::{Context, Result};
use apigw_fleet::config::FleetConfig;
use apigw_fleet::credentials::SimulatedCredentials;
use apigw_fleet::gateway::SimulatedGateway;
use apigw_fleet::resilience::{AdaptiveRateLimiter, BulkProgress, RetryEvent, RetryOverrides};
use apigw_fleet::workflow::{DeleteSelection, ExecutionMode, Fleet, ListOutcome};
use apigw_fleet::WorkflowReport;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "apigw-fleet", version)]
#[command(
    about = "Bulk create, list and delete API Gateway REST APIs across accounts and regions (sandbox only)",
    long_about = "Bulk create, list and delete API Gateway REST APIs across accounts and regions.\n\n\
                  Runs against a local sandbox gateway, not real AWS. Sandbox state lives in the \
                  --state file between runs; --throttle makes the sandbox answer a share of calls with 429."
)]
struct Cli {
    /// Fleet config file (YAML)
    #[arg(short, long, global = true, env = "APIGW_FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Sandbox state file
    #[arg(long, global = true, env = "APIGW_FLEET_SANDBOX_STATE", default_value = ".apigw-fleet-sandbox.json")]
    state: PathBuf,

    /// Share of sandbox calls answered with 429 (0.0 - 1.0)
    #[arg(long, global = true, env = "APIGW_FLEET_SIM_THROTTLE", default_value_t = 0.0)]
    throttle: f64,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create REST APIs, distributed evenly over every account/region
    Create {
        /// Total number of APIs to create
        #[arg(short = 'n', long)]
        count: usize,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Delete REST APIs from every account/region
    Delete {
        /// Delete every API, not only those carrying the fleet prefix
        #[arg(long, conflicts_with = "prefix")]
        all: bool,

        /// Delete APIs whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Retry budget per delete (default 10)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Backoff ceiling per delete in milliseconds (default 120000)
        #[arg(long)]
        max_delay_ms: Option<u64>,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// List REST APIs on every account/region
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ExecArgs {
    /// Run operations in concurrent batches
    #[arg(long)]
    parallel: bool,

    /// Batch size in parallel mode (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,
}

impl ExecArgs {
    fn mode(&self) -> ExecutionMode {
        if self.parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = FleetConfig::load(cli.config.as_deref()).context("loading fleet config")?;
    if let Commands::Create { exec, .. } | Commands::Delete { exec, .. } = &cli.command {
        if let Some(n) = exec.concurrency {
            config.concurrency = n;
        }
    }

    let gateway = Arc::new(
        SimulatedGateway::open(&cli.state)
            .with_context(|| format!("opening sandbox state {}", cli.state.display()))?
            .with_throttling(cli.throttle, 1),
    );
    let limiter = Arc::new(AdaptiveRateLimiter::new());

    let (retry_tx, retry_rx) = mpsc::unbounded_channel();
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let reporters = tokio::spawn(report_events(retry_rx, progress_rx));

    let mut fleet = Fleet::new(
        config,
        gateway.clone(),
        Arc::new(SimulatedCredentials::new()),
        limiter.clone(),
    )
    .with_retry_events(retry_tx)
    .with_progress(progress_tx);

    let ok = match &cli.command {
        Commands::Create { count, exec } => {
            let report = fleet.create_apis(*count, exec.mode()).await?;
            print_report(&report);
            report.is_success()
        }
        Commands::Delete {
            all,
            prefix,
            max_retries,
            max_delay_ms,
            exec,
        } => {
            let selection = match (all, prefix) {
                (true, _) => DeleteSelection::All,
                (false, Some(p)) => DeleteSelection::Prefix(p.clone()),
                (false, None) => DeleteSelection::ConfiguredPrefix,
            };
            fleet = fleet.with_delete_overrides(RetryOverrides {
                max_retries: *max_retries,
                base_delay: None,
                max_delay: max_delay_ms.map(Duration::from_millis),
            });
            let report = fleet.delete_apis(&selection, exec.mode()).await?;
            print_report(&report);
            report.is_success()
        }
        Commands::List { json } => {
            let outcome = fleet.list_apis().await?;
            print_listing(&outcome, *json)?;
            outcome.report.is_success()
        }
    };

    let stats = limiter.stats();
    if stats.total_rate_limits > 0 {
        eprintln!(
            "rate limited on {} key(s), average suggested delay {}ms",
            stats.total_rate_limits,
            stats.average_delay.as_millis()
        );
    }

    // Dropping the fleet closes both channels so the reporter task can finish.
    drop(fleet);
    if let Err(e) = reporters.await {
        tracing::warn!(error = %e, "event reporter task failed");
    }
    gateway.save().context("saving sandbox state")?;

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn report_events(
    mut retries: mpsc::UnboundedReceiver<RetryEvent>,
    mut progress: mpsc::UnboundedReceiver<BulkProgress>,
) {
    let (mut retries_open, mut progress_open) = (true, true);
    while retries_open || progress_open {
        tokio::select! {
            ev = retries.recv(), if retries_open => match ev {
                Some(ev) => eprintln!(
                    "  retry #{} in {}ms ({:?}{})",
                    ev.attempt,
                    ev.delay.as_millis(),
                    ev.reason,
                    ev.status.map(|s| format!(", HTTP {}", s)).unwrap_or_default()
                ),
                None => retries_open = false,
            },
            p = progress.recv(), if progress_open => match p {
                Some(p) => eprintln!(
                    "  [{}/{}] {}",
                    p.completed,
                    p.total,
                    if p.succeeded { "ok" } else { "failed" }
                ),
                None => progress_open = false,
            },
        }
    }
}

fn print_report(report: &WorkflowReport) {
    println!(
        "{}: {} succeeded, {} failed ({} attempts, {}ms spent waiting)",
        report.kind,
        report.succeeded,
        report.failed.len(),
        report.attempts,
        report.total_delay_ms
    );
    for f in &report.failed {
        println!("  FAILED {} {}: {}", f.target, f.name, f.message);
    }
}

fn print_listing(outcome: &ListOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.listings)?);
        return Ok(());
    }
    for listing in &outcome.listings {
        println!("{} ({} APIs)", listing.target, listing.apis.len());
        for api in &listing.apis {
            println!("  {}  {}", api.id, api.name);
        }
    }
    println!("total: {}", outcome.api_count());
    for f in &outcome.report.failed {
        println!("  FAILED {}: {}", f.target, f.message);
    }
    Ok(())
}
