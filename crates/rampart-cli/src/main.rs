//! rampart CLI
//!
//! Inspect policy configuration files and try them against a simulated
//! flaky operation.
//!
//! ```text
//! rampart check policy.yaml
//! rampart schedule policy.yaml --attempts 6
//! rampart simulate policy.yaml --fail-first 4 --calls 10 --no-wait
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rampart_core::{
    Backoff, BackoffKind, CircuitBreakerStats, CircuitState, Classification, PolicyConfig,
    PolicyError,
};
use rampart_runtime::{CompositePolicy, InstantSleeper, Pipeline, TokioSleeper};

#[derive(Parser)]
#[command(name = "rampart")]
#[command(about = "Inspect and simulate retry and circuit-breaker policies")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a policy configuration file
    Check {
        /// Path to a .yaml, .yml or .json policy file
        config: PathBuf,
    },

    /// Print the backoff delays the retry section would produce
    Schedule {
        /// Path to a .yaml, .yml or .json policy file
        config: PathBuf,

        /// Attempts to plan for (defaults to the configured max_attempts)
        #[arg(short, long)]
        attempts: Option<u32>,
    },

    /// Run a simulated flaky operation through the configured pipeline
    Simulate {
        /// Path to a .yaml, .yml or .json policy file
        config: PathBuf,

        /// Number of invocations that fail before the operation recovers
        #[arg(long, default_value = "0")]
        fail_first: u32,

        /// Classify simulated failures as permanent instead of transient
        #[arg(long)]
        permanent: bool,

        /// Number of calls to make through the pipeline
        #[arg(long, default_value = "1")]
        calls: u32,

        /// Skip backoff waits
        #[arg(long)]
        no_wait: bool,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

/// Failure produced by the simulated operation.
#[derive(Debug, Error)]
#[error("simulated failure on invocation {invocation}")]
struct SimulatedFailure {
    invocation: u32,
}

#[derive(Serialize)]
struct CallReport {
    call: u32,
    ok: bool,
    invocations: u32,
    outcome: String,
}

#[derive(Serialize)]
struct BreakerReport {
    state: CircuitState,
    consecutive_failures: u32,
    rejected_calls: u64,
    times_opened: u64,
}

impl From<CircuitBreakerStats> for BreakerReport {
    fn from(stats: CircuitBreakerStats) -> Self {
        Self {
            state: stats.state,
            consecutive_failures: stats.consecutive_failures,
            rejected_calls: stats.rejected_calls,
            times_opened: stats.times_opened,
        }
    }
}

#[derive(Serialize)]
struct SimulationReport {
    calls: Vec<CallReport>,
    total_invocations: u32,
    breaker: Option<BreakerReport>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check { config } => check(&config),
        Commands::Schedule { config, attempts } => schedule(&config, attempts),
        Commands::Simulate {
            config,
            fail_first,
            permanent,
            calls,
            no_wait,
            json,
        } => {
            let options = SimulateOptions {
                fail_first,
                permanent,
                calls,
                no_wait,
                json,
            };
            simulate(&config, options).await
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load(path: &Path) -> Result<PolicyConfig> {
    PolicyConfig::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn check(path: &Path) -> Result<()> {
    let config = load(path)?;
    let order = config.resolved_order();

    println!("{}: ok", path.display());
    if order.is_empty() {
        println!("  no policies configured");
        return Ok(());
    }

    for (depth, kind) in order.iter().enumerate() {
        println!("  {}. {kind}", depth + 1);
    }

    if let Some(retry) = &config.retry {
        let backoff = &retry.backoff;
        println!(
            "retry: {} attempts, {} backoff from {}{}",
            retry.max_attempts,
            backoff.kind,
            humantime::format_duration(backoff.base_delay),
            backoff
                .max_delay
                .map(|max| format!(" capped at {}", humantime::format_duration(max)))
                .unwrap_or_default()
        );
    }
    if let Some(breaker) = &config.circuit_breaker {
        println!(
            "circuit_breaker: open after {} consecutive failures for {}",
            breaker.failure_threshold,
            humantime::format_duration(breaker.break_duration)
        );
    }
    if let Some(timeout) = &config.timeout {
        println!(
            "timeout: {} per execution",
            humantime::format_duration(timeout.duration)
        );
    }

    Ok(())
}

fn schedule(path: &Path, attempts: Option<u32>) -> Result<()> {
    let config = load(path)?;
    let Some(retry) = config.retry else {
        bail!("{} has no retry section", path.display());
    };

    let attempts = attempts.unwrap_or(retry.max_attempts);
    let delays = planned_waits(&retry.backoff, attempts)?;
    if retry.backoff.kind == BackoffKind::ExponentialJitter {
        println!("(jittered: showing one random draw per wait)");
    }

    let mut total = Duration::ZERO;
    for (index, delay) in delays.iter().enumerate() {
        total = total.saturating_add(*delay);
        println!(
            "after attempt {}: wait {}",
            index + 1,
            humantime::format_duration(*delay)
        );
    }
    println!("total wait: {}", humantime::format_duration(total));

    Ok(())
}

/// Waits a retry section would insert across `attempts` attempts.
fn planned_waits(backoff: &Backoff, attempts: u32) -> Result<Vec<Duration>> {
    if attempts == 0 {
        bail!("--attempts must be at least 1");
    }
    // Waits happen between attempts, so there is one fewer than attempts.
    Ok(backoff.schedule(attempts - 1))
}

struct SimulateOptions {
    fail_first: u32,
    permanent: bool,
    calls: u32,
    no_wait: bool,
    json: bool,
}

async fn simulate(path: &Path, options: SimulateOptions) -> Result<()> {
    let config = load(path)?;
    tracing::debug!(config = %path.display(), "Loaded simulation config");
    let summary = run_simulation(&config, &options).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for report in &summary.calls {
        println!(
            "call {}: {} ({} invocation{})",
            report.call,
            report.outcome,
            report.invocations,
            if report.invocations == 1 { "" } else { "s" }
        );
    }
    println!("total invocations: {}", summary.total_invocations);
    if let Some(breaker) = &summary.breaker {
        println!(
            "breaker: {} ({} consecutive failures, {} rejected, opened {} times)",
            breaker.state, breaker.consecutive_failures, breaker.rejected_calls, breaker.times_opened
        );
    }

    Ok(())
}

async fn run_simulation(config: &PolicyConfig, options: &SimulateOptions) -> Result<SimulationReport> {
    let composite = if options.no_wait {
        CompositePolicy::<SimulatedFailure>::from_config_with_sleeper(config, InstantSleeper)
    } else {
        CompositePolicy::<SimulatedFailure>::from_config_with_sleeper(config, TokioSleeper)
    }
    .context("Failed to build policies")?;
    tracing::debug!(policies = composite.len(), "Built simulation pipeline");

    let breaker = composite.circuit_breaker().cloned();
    let classification = if options.permanent {
        Classification::Permanent
    } else {
        Classification::Transient
    };
    let pipeline = Pipeline::new(composite).with_classifier(move |_: &SimulatedFailure| classification);

    let invocations = &AtomicU32::new(0);
    let fail_first = options.fail_first;
    let mut reports = Vec::with_capacity(options.calls as usize);

    for call in 1..=options.calls {
        let before = invocations.load(Ordering::SeqCst);
        let result = pipeline
            .execute(|| async move {
                let invocation = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                if invocation <= fail_first {
                    Err(SimulatedFailure { invocation })
                } else {
                    Ok(invocation)
                }
            })
            .await;

        reports.push(CallReport {
            call,
            ok: result.is_ok(),
            invocations: invocations.load(Ordering::SeqCst) - before,
            outcome: describe(&result),
        });
    }

    Ok(SimulationReport {
        calls: reports,
        total_invocations: invocations.load(Ordering::SeqCst),
        breaker: breaker.map(|breaker| breaker.stats().into()),
    })
}

fn describe(result: &Result<u32, PolicyError<SimulatedFailure>>) -> String {
    match result {
        Ok(invocation) => format!("succeeded on invocation {invocation}"),
        Err(err) => format!("failed: {err}"),
    }
}
