//! robotscrape CLI - command line interface for robotscrape

use anyhow::Result;
use clap::{Parser, Subcommand};
use robotscrape_core::{resolve_config, RobotScrape};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_WORKER_POLL_MS: u64 = 1000;
const DEFAULT_SCHEDULER_TICK_SECS: u64 = 30;
const DEFAULT_SCHEDULER_BATCH_SIZE: i64 = 50;
const DEFAULT_SCHEDULE_CREDIT_COST: i64 = 1;
const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 3600;
const DEFAULT_LOG_RETENTION_DAYS: i64 = 30;

#[derive(Parser)]
#[command(name = "robotscrape")]
#[command(about = "AI-assisted web-extraction service")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve,

    /// Run the queue-consuming worker loop
    Worker {
        /// Milliseconds to sleep between polls when a batch comes back empty
        #[arg(long, default_value_t = DEFAULT_WORKER_POLL_MS)]
        poll_interval_ms: u64,
    },

    /// Run the cron scheduler loop, dispatching due schedules as jobs
    Scheduler {
        /// Seconds between scheduler ticks
        #[arg(long, default_value_t = DEFAULT_SCHEDULER_TICK_SECS)]
        tick_interval_secs: u64,

        /// Maximum due schedules dispatched per tick
        #[arg(long, default_value_t = DEFAULT_SCHEDULER_BATCH_SIZE)]
        batch_size: i64,

        /// Credits consumed per scheduled job
        #[arg(long, default_value_t = DEFAULT_SCHEDULE_CREDIT_COST)]
        credit_cost: i64,

        /// Also run retention cleanup on this interval (0 disables it)
        #[arg(long, default_value_t = DEFAULT_JANITOR_INTERVAL_SECS)]
        janitor_interval_secs: u64,

        /// Days of scrape/event logs and expired entries to retain
        #[arg(long, default_value_t = DEFAULT_LOG_RETENTION_DAYS)]
        log_retention_days: i64,
    },

    /// Apply pending store migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => cmd_serve(cli.config.as_deref()).await,
        Commands::Worker { poll_interval_ms } => cmd_worker(cli.config.as_deref(), poll_interval_ms).await,
        Commands::Scheduler {
            tick_interval_secs,
            batch_size,
            credit_cost,
            janitor_interval_secs,
            log_retention_days,
        } => {
            cmd_scheduler(
                cli.config.as_deref(),
                tick_interval_secs,
                batch_size,
                credit_cost,
                janitor_interval_secs,
                log_retention_days,
            )
            .await
        }
        Commands::Migrate => cmd_migrate(cli.config.as_deref()).await,
    }
}

async fn cmd_serve(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let robot = RobotScrape::from_config(config).await?;
    robotscrape_api::serve(robot).await?;
    Ok(())
}

/// Poll the queue forever, sleeping between empty batches so an idle worker
/// doesn't spin. A batch that processed anything is followed immediately by
/// another dequeue attempt, since more work likely queued behind it.
async fn cmd_worker(config_path: Option<&std::path::Path>, poll_interval_ms: u64) -> Result<()> {
    let config = resolve_config(config_path)?;
    let robot = RobotScrape::from_config(config).await?;
    let worker = robot.worker();

    tracing::info!("worker started, polling every {poll_interval_ms}ms when idle");
    loop {
        match worker.run_once().await {
            Ok(0) => tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await,
            Ok(n) => tracing::debug!(processed = n, "worker batch processed"),
            Err(e) => {
                tracing::error!(error = %e, "worker batch failed");
                tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
            }
        }
    }
}

/// Tick the cron scheduler on a fixed interval, dispatching due schedules as
/// jobs, and optionally run retention cleanup on its own slower interval.
async fn cmd_scheduler(
    config_path: Option<&std::path::Path>,
    tick_interval_secs: u64,
    batch_size: i64,
    credit_cost: i64,
    janitor_interval_secs: u64,
    log_retention_days: i64,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let robot = RobotScrape::from_config(config).await?;
    let janitor = robot.janitor(log_retention_days);

    tracing::info!("scheduler started, ticking every {tick_interval_secs}s");
    let mut tick_interval = tokio::time::interval(Duration::from_secs(tick_interval_secs));
    let mut janitor_interval = tokio::time::interval(Duration::from_secs(janitor_interval_secs.max(1)));
    // The first tick of an interval fires immediately; skip it for the
    // janitor so retention cleanup doesn't race schedule creation at boot.
    janitor_interval.tick().await;

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                match robotscrape_core::schedule::tick(robot.store(), robot.queue().as_ref(), batch_size, credit_cost).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(dispatched = n, "scheduler tick dispatched jobs"),
                    Err(e) => tracing::error!(error = %e, "scheduler tick failed"),
                }
            }
            _ = janitor_interval.tick(), if janitor_interval_secs > 0 => {
                match janitor.run_once().await {
                    Ok(report) => tracing::info!(?report, "retention cleanup complete"),
                    Err(e) => tracing::error!(error = %e, "retention cleanup failed"),
                }
            }
        }
    }
}

async fn cmd_migrate(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    // Migrations run as part of connecting; constructing the facade is enough.
    RobotScrape::from_config(config).await?;
    println!("migrations applied");
    Ok(())
}
