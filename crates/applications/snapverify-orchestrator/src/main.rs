//! snapverify - snapshot backup restore verification
//!
//! Scheduled on every node of the cluster (cron/systemd timer); only the
//! elected master does any work.
//!
//! ## Usage
//!
//! ```bash
//! # Full run: probe, snapshot, restore, verify, prune
//! snapverify --config /etc/s3_backup.yml
//!
//! # Validate and print the resolved configuration
//! snapverify check-config
//!
//! # Retention only
//! snapverify prune
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning                                   |
//! |------|-------------------------------------------|
//! | 0    | verified, pruned, or not the master       |
//! | 1    | verification failed (after notification)  |
//! | 2    | configuration or startup error            |
//! | 130  | interrupted                               |

use anyhow::Context;
use clap::{Parser, Subcommand};
use snapverify_orchestrator::{
    BackupConfig, FailureNotifier, HttpClusterGateway, HttpNotifier, Orchestrator, RunContext,
    RunMode, RunOutcome, DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// snapverify: prove snapshot backups restore correctly
#[derive(Parser)]
#[command(name = "snapverify")]
#[command(about = "Verify search-cluster snapshot backups by restoring probe data", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "SNAPVERIFY_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write probes, snapshot, restore, verify, prune (default)
    Run,

    /// Load and validate the configuration, then print it
    CheckConfig,

    /// Delete expired snapshot repositories only
    Prune,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match BackupConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("snapverify: {}", e);
            return ExitCode::from(2);
        }
    };

    let _log_guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("snapverify: {:#}", e);
            return ExitCode::from(2);
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => check_config(&config),
        command => match run(config, command).await {
            Ok(code) => code,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Startup failed");
                ExitCode::from(2)
            }
        },
    }
}

/// Initialize tracing, to the configured log file or stderr
fn init_logging(config: &BackupConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "snapverify=info,snapverify_orchestrator=info,warn".into());

    match config.log {
        Some(ref path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log path {} has no file name", path.display()))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .try_init()
                .context("failed to initialize logging")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .context("failed to initialize logging")?;
            Ok(None)
        }
    }
}

fn check_config(config: &BackupConfig) -> ExitCode {
    match serde_yaml::to_string(&config.redacted()) {
        Ok(yaml) => {
            println!("{}", yaml);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("snapverify: {}", e);
            ExitCode::from(2)
        }
    }
}

/// Build the pipeline and race it against operator interrupts
async fn run(config: BackupConfig, command: Commands) -> anyhow::Result<ExitCode> {
    let ctx = RunContext::now();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        node = %config.node_name,
        cluster = %config.cluster_name,
        env = %config.env,
        probe_index = %ctx.probe_index(),
        snapshot = %ctx.snapshot_path(),
        "snapverify starting"
    );

    let gateway = HttpClusterGateway::new(&config.elasticsearch, config.timeouts.http_timeout())
        .context("failed to create cluster client")?;
    let notifier: Arc<dyn FailureNotifier> = Arc::new(
        HttpNotifier::new(
            config.pagerduty_api_key.clone(),
            config.error_tracking_url.clone(),
            config.timeouts.http_timeout(),
        )
        .context("failed to create notifier")?,
    );

    let orchestrator = Orchestrator::new(config, ctx, Arc::new(gateway), notifier);

    let mode = match command {
        Commands::Prune => RunMode::RetentionOnly,
        _ => RunMode::Verify,
    };

    let outcome = match orchestrator.run_until(mode, shutdown_signal()).await {
        Ok(outcome) => outcome,
        // Already logged and notified by the orchestrator
        Err(_) => return Ok(ExitCode::FAILURE),
    };

    match outcome {
        RunOutcome::Verified(ref report) => info!(
            documents = report.documents,
            repository_created = report.repository_created,
            stale_removed = report.stale_removed.len(),
            pruned = ?report.pruned,
            "Backup verified"
        ),
        RunOutcome::Pruned(ref pruned) => info!(pruned = ?pruned, "Retention finished"),
        RunOutcome::NotMaster | RunOutcome::Interrupted => {}
    }

    Ok(ExitCode::from(outcome.exit_code()))
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl+C will interrupt");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
