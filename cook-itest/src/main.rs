//! Cook integration test harness CLI
//!
//! Waits for a scheduler, prints what it knows about the cluster, runs
//! scenarios, and issues the occasional manual kill or retry.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cook_common::client::{self, RetryAmount, RetryMethod, RetryRequest};
use cook_common::poller::{PollBudget, wait_for_scheduler};
use cook_common::{ClusterInfo, HarnessConfig, LogConfig, Transport, init_logging};
use cook_itest::scenarios::{self, ScenarioOutcome};
use cook_itest::{ScenarioContext, run_scenarios};
use tracing::info;

#[derive(Parser)]
#[command(name = "cook-itest")]
#[command(author, version, about = "Cook scheduler integration test harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Scheduler base URL (overrides COOK_SCHEDULER_URL)
    #[arg(long, global = true, env = "COOK_SCHEDULER_URL")]
    url: Option<String>,

    /// Default wait budget, e.g. "2m" or "90s"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Spacing between poll attempts, e.g. "500ms"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait until the scheduler accepts connections
    Wait,

    /// Print cluster information as JSON
    Info,

    /// Run integration scenarios
    Run {
        /// Scenario to run; repeat for several. All scenarios when omitted.
        #[arg(short, long = "scenario")]
        scenarios: Vec<String>,

        /// List scenario names and exit
        #[arg(long)]
        list: bool,
    },

    /// Kill jobs (sent in chunks)
    Kill {
        #[arg(long = "job", required = true)]
        jobs: Vec<String>,
    },

    /// Retry jobs
    Retry {
        #[arg(long = "job", required = true)]
        jobs: Vec<String>,

        /// Set the total retry budget
        #[arg(long, conflicts_with = "increment", required_unless_present = "increment")]
        retries: Option<u32>,

        /// Add to the current retry budget
        #[arg(long)]
        increment: Option<u32>,

        /// Only retry jobs whose last instance failed
        #[arg(long)]
        failed_only: bool,
    },
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load().context("invalid harness configuration")?;
    if let Some(url) = &cli.url {
        config = config.with_scheduler_url(url.as_str());
    }
    if let Some(timeout) = cli.timeout {
        config.default_timeout = timeout;
    }
    if let Some(interval) = cli.interval {
        config.wait_interval = interval;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Wait => {
            let transport = Transport::from_config(&config);
            wait_for_scheduler(&transport, PollBudget::connectivity(&config))?;
            println!("{} is up", config.scheduler_url);
        }

        Commands::Info => {
            let transport = Transport::from_config(&config);
            wait_for_scheduler(&transport, PollBudget::connectivity(&config))?;
            let cluster = ClusterInfo::fetch(&transport)?;
            println!("{}", serde_json::to_string_pretty(&cluster)?);
        }

        Commands::Run { scenarios, list } => {
            if list {
                for name in scenarios::names() {
                    println!("{name}");
                }
                return Ok(());
            }

            let reports = run_scenarios(&config, &scenarios)?;
            let mut failed = 0;
            for report in &reports {
                let secs = report.elapsed.as_secs_f64();
                match &report.outcome {
                    ScenarioOutcome::Passed => println!("PASS {} ({secs:.1}s)", report.name),
                    ScenarioOutcome::Skipped(reason) => println!("SKIP {}: {reason}", report.name),
                    ScenarioOutcome::Failed(reason) => {
                        failed += 1;
                        println!("FAIL {} ({secs:.1}s): {reason}", report.name);
                    }
                }
            }
            info!(total = reports.len(), failed, "Scenario run finished");
            if failed > 0 {
                bail!("{failed} of {} scenarios failed", reports.len());
            }
        }

        Commands::Kill { jobs } => {
            let ctx = ScenarioContext::connect(config, "cli")?;
            let outcome = client::kill_jobs(&ctx.transport, &jobs, true)?;
            println!("killed {} jobs in {} requests", jobs.len(), outcome.responses.len());
        }

        Commands::Retry {
            jobs,
            retries,
            increment,
            failed_only,
        } => {
            let amount = match (retries, increment) {
                (Some(retries), _) => RetryAmount::Retries(retries),
                (None, Some(increment)) => RetryAmount::Increment(increment),
                (None, None) => bail!("one of --retries or --increment is required"),
            };
            let ctx = ScenarioContext::connect(config, "cli")?;
            let request = RetryRequest::jobs(&jobs, amount).failed_only(failed_only);
            let outcome = client::retry_jobs(&ctx.transport, &request, RetryMethod::Put, true)?;
            println!("retried {} jobs", outcome.retried.unwrap_or_default());
        }
    }

    Ok(())
}
