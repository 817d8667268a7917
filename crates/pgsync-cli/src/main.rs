//! pgsync CLI - mirror SQLite query results into PostgreSQL tables.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pgsync::{Config, SyncEngine, SyncError, SyncRequest};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pgsync")]
#[command(about = "Mirror SQLite query results into PostgreSQL tables with an atomic swap")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync one table, or every job in the configuration
    Run {
        /// Destination table (overrides the configured jobs)
        #[arg(long, requires = "query")]
        table: Option<String>,

        /// Source query for --table
        #[arg(long, requires = "table")]
        query: Option<String>,

        /// Dry run: run the source query and print the DDL and swap without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            table,
            query,
            dry_run,
        } => {
            let requests = match (table, query) {
                (Some(table), Some(query)) => vec![SyncRequest::new(table, query)],
                _ => config.jobs.clone(),
            };
            if requests.is_empty() {
                return Err(SyncError::Config(
                    "no jobs configured; add jobs to the configuration or pass --table and --query"
                        .to_string(),
                ));
            }

            let cancel = setup_signal_handler();
            let engine = SyncEngine::connect(&config).await?;
            let outcome = if dry_run {
                dry_run_jobs(&engine, &cancel, &requests, cli.output_json).await
            } else {
                run_jobs(&engine, &cancel, &requests, cli.output_json).await
            };
            engine.close().await;
            outcome?;
        }

        Commands::HealthCheck => {
            let engine = SyncEngine::connect(&config).await?;
            let result = engine.health_check().await;
            engine.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (SQLite): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(SyncError::pool("health check failed", "checking connections"));
            }
        }
    }

    Ok(())
}

async fn run_jobs(
    engine: &SyncEngine,
    cancel: &CancellationToken,
    requests: &[SyncRequest],
    output_json: bool,
) -> Result<(), SyncError> {
    let results = engine.run_jobs(cancel, requests).await?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("\nSync completed!");
        for result in &results {
            println!(
                "  {}: {} rows, {} columns ({:.2}s, run {})",
                result.table,
                result.rows_loaded,
                result.columns.len(),
                result.duration_seconds,
                result.run_id
            );
        }
    }
    Ok(())
}

async fn dry_run_jobs(
    engine: &SyncEngine,
    cancel: &CancellationToken,
    requests: &[SyncRequest],
    output_json: bool,
) -> Result<(), SyncError> {
    let mut plans = Vec::with_capacity(requests.len());
    for request in requests {
        plans.push(engine.plan(cancel, request).await?);
    }

    if output_json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
    } else {
        for plan in &plans {
            println!("-- {} ({} columns)", plan.table, plan.columns.len());
            println!("{};", plan.create_staging);
            println!("{}\n", plan.swap);
        }
        println!("Dry run completed!");
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// An in-flight sync observes the token and rolls back.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Rolling back the current sync...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Rolling back the current sync...");
            token.cancel();
        }
    });

    cancel_token
}
