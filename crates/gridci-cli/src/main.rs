//! gridci - Matrix CI Orchestrator CLI
//!
//! The `gridci` command expands a job matrix, resolves content-addressed
//! execution environments, runs the jobs, and reports one verdict.
//!
//! ## Commands
//!
//! - `run`: execute a full run over a matrix definition
//! - `expand`: print the expanded job list without running anything
//! - `fingerprint`: print the digest for an ordered input list
//! - `refresh`: rebuild and republish every environment in a matrix

mod config;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use config::MatrixConfig;
use gridci_core::{expand, fingerprint, EnvironmentInputs, RunReport, Verdict};
use gridci_env::{
    CacheMode, CommandImageBuilder, CredentialProvider, EnvCredentials, EnvironmentCache,
    HttpImageRegistry,
};
use gridci_exec::{JobRunner, Orchestrator, PlatformArtifactGenerator, RunMode, RunRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "gridci")]
#[command(author = "Gridci Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Matrix CI orchestrator with content-addressed environment caching", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Reuse published environments wherever possible
    Incremental,
    /// Rebuild and republish every environment
    Refresh,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Incremental => RunMode::Incremental,
            ModeArg::Refresh => RunMode::ScheduledRefresh,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a run over a matrix definition
    Run {
        /// Path to the matrix definition file (TOML)
        #[arg(short, long)]
        matrix: PathBuf,

        /// Run mode
        #[arg(long, value_enum, default_value_t = ModeArg::Incremental)]
        mode: ModeArg,

        /// Override the configured job parallelism
        #[arg(long)]
        parallelism: Option<usize>,

        /// Override the configured default per-job timeout
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the report as JSON instead of the human summary
        #[arg(long)]
        json: bool,
    },

    /// Print the expanded job list without running anything
    Expand {
        /// Path to the matrix definition file (TOML)
        #[arg(short, long)]
        matrix: PathBuf,

        /// Print the specs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the environment fingerprint for an ordered input list
    Fingerprint {
        /// Inputs, in order (repeatable)
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<String>,
    },

    /// Rebuild and republish every environment in a matrix
    Refresh {
        /// Path to the matrix definition file (TOML)
        #[arg(short, long)]
        matrix: PathBuf,
    },
}

fn init_tracing(verbose: bool, json_logs: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Wire the orchestrator from a loaded matrix config.
fn build_orchestrator(config: &MatrixConfig) -> Result<Orchestrator> {
    let credentials: Arc<dyn CredentialProvider> = Arc::new(EnvCredentials);
    let cache = Arc::new(EnvironmentCache::new(
        Arc::new(HttpImageRegistry::new(config.registry.clone())?),
        Arc::new(CommandImageBuilder::new(config.builder.clone())),
        Arc::clone(&credentials),
    ));
    let runner = Arc::new(JobRunner::new(config.runner.clone(), credentials));
    let generator = Arc::new(PlatformArtifactGenerator::new(config.runner.clone()));
    Ok(Orchestrator::new(cache, runner, generator))
}

/// Cancellation token wired to Ctrl-C.
fn cancellation_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            trigger.cancel();
        }
    });
    cancel
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("run {} finished: {}", report.run_id, report.verdict);
    for job in &report.jobs {
        println!("  {:<56} {:>8}ms  {}", job.job_id, job.duration_ms, job.outcome);
    }
    println!(
        "{} succeeded, {} failed, {} skipped, {} cancelled ({}ms total)",
        report.success_count(),
        report.failure_count(),
        report.skipped_count(),
        report.cancelled_count(),
        report.duration_ms,
    );
    Ok(())
}

fn exit_code(verdict: Verdict) -> i32 {
    match verdict {
        Verdict::Success => 0,
        Verdict::Failure => 1,
        Verdict::Cancelled => 130,
    }
}

async fn cmd_run(
    matrix_path: &Path,
    mode: ModeArg,
    parallelism: Option<usize>,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<i32> {
    let config = MatrixConfig::load(matrix_path)?;
    let orchestrator = build_orchestrator(&config)?;

    let mut request = RunRequest::new(
        config.matrix.clone(),
        EnvironmentInputs::new(config.base_inputs.clone()),
    )
    .with_mode(mode.into())
    .with_parallelism(parallelism.unwrap_or(config.run.parallelism))
    .with_default_timeout_secs(timeout_secs.unwrap_or(config.run.default_timeout_secs));

    if request.parallelism == 0 {
        request.parallelism = 1;
    }

    let report = orchestrator.execute(request, cancellation_token()).await?;
    print_report(&report, json)?;
    Ok(exit_code(report.verdict))
}

fn cmd_expand(matrix_path: &Path, json: bool) -> Result<i32> {
    let config = MatrixConfig::load(matrix_path)?;
    let specs = expand(
        &config.matrix,
        &EnvironmentInputs::new(config.base_inputs.clone()),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
    } else {
        for spec in &specs {
            println!("{}  env={}", spec.id, spec.fingerprint.short());
        }
        println!("{} job(s)", specs.len());
    }
    Ok(0)
}

fn cmd_fingerprint(inputs: Vec<String>) -> Result<i32> {
    let digest = fingerprint(&EnvironmentInputs::new(inputs))?;
    println!("{digest}");
    Ok(0)
}

async fn cmd_refresh(matrix_path: &Path) -> Result<i32> {
    let config = MatrixConfig::load(matrix_path)?;

    let credentials: Arc<dyn CredentialProvider> = Arc::new(EnvCredentials);
    let cache = Arc::new(EnvironmentCache::new(
        Arc::new(HttpImageRegistry::new(config.registry.clone())?),
        Arc::new(CommandImageBuilder::new(config.builder.clone())),
        credentials,
    ));

    let specs = expand(
        &config.matrix,
        &EnvironmentInputs::new(config.base_inputs.clone()),
    )?;

    let mut distinct = std::collections::HashMap::new();
    for spec in specs {
        distinct.entry(spec.fingerprint).or_insert(spec.env_inputs);
    }
    info!(environments = distinct.len(), "refreshing environments");

    let mut tasks = JoinSet::new();
    for (fp, inputs) in distinct {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move {
            let result = cache.resolve(&fp, &inputs, CacheMode::ForceBuild).await;
            (fp, result)
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((fp, Ok(_))) => println!("rebuilt {fp}"),
            Ok((fp, Err(err))) => {
                failed += 1;
                eprintln!("failed to rebuild {fp}: {err}");
            }
            Err(err) => {
                failed += 1;
                eprintln!("refresh task failed: {err}");
            }
        }
    }

    Ok(if failed == 0 { 0 } else { 1 })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs)?;

    let code = match cli.command {
        Commands::Run {
            matrix,
            mode,
            parallelism,
            timeout_secs,
            json,
        } => cmd_run(&matrix, mode, parallelism, timeout_secs, json).await?,
        Commands::Expand { matrix, json } => cmd_expand(&matrix, json)?,
        Commands::Fingerprint { input } => cmd_fingerprint(input)?,
        Commands::Refresh { matrix } => cmd_refresh(&matrix).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
