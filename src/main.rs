use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use muse_queue::analytics::HttpAnalyticsClient;
use muse_queue::config::{self, Config};
use muse_queue::db;
use muse_queue::dispatch::{self, DispatchSettings};
use muse_queue::event::LogSink;
use muse_queue::reaper;
use muse_queue::reconcile;
use muse_queue::worker::HttpWorkerInvoker;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the dispatch and stale-lock loops (default)
    Serve,
    /// Print a queue item as JSON
    Get { id: i64 },
    /// Mark an item completed with its matched record count
    Complete { id: i64, matched_count: i64 },
    /// Clear an item's lock
    Release { id: i64 },
    /// Force-release every lock older than the configured timeout
    ClearStaleLocks,
    /// Claim the next item for a named worker and invoke it
    InvokeWorker { name: String },
    /// Load expected counts for a batch from the analytics warehouse
    Reconcile { batch_id: i64 },
    /// Insert a demo batch, items, and workers
    Seed,
}

fn dispatch_settings(cfg: &Config) -> DispatchSettings {
    DispatchSettings {
        worker_concurrency: cfg.dispatch.worker_concurrency,
        queue_url: cfg.dispatch.queue_url.clone(),
        report_no_free_workers: cfg.dispatch.report_no_free_workers,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/musequeue.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let events = Arc::new(LogSink);
    let invoker =
        HttpWorkerInvoker::new(Duration::from_secs(cfg.dispatch.invoke_timeout_seconds));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // Dispatcher loop: one tick at a time, never concurrent with itself.
            let dispatch_pool = pool.clone();
            let dispatch_invoker = invoker.clone();
            let dispatch_events = events.clone();
            let settings = dispatch_settings(&cfg);
            let dispatch_sleep = Duration::from_secs(cfg.dispatch.interval_seconds);
            tokio::spawn(async move {
                loop {
                    if let Err(err) = dispatch::dispatch_next_item(
                        &dispatch_pool,
                        &dispatch_invoker,
                        dispatch_events.as_ref(),
                        &settings,
                    )
                    .await
                    {
                        error!(?err, "dispatch tick failed");
                    }
                    tokio::time::sleep(dispatch_sleep).await;
                }
            });

            // Reaper loop.
            let reaper_pool = pool.clone();
            let reaper_events = events.clone();
            let timeout_minutes = cfg.reaper.lock_timeout_minutes;
            let reaper_sleep = Duration::from_secs(cfg.reaper.interval_seconds);
            tokio::spawn(async move {
                loop {
                    if let Err(err) =
                        reaper::reap_stale_locks(&reaper_pool, reaper_events.as_ref(), timeout_minutes)
                            .await
                    {
                        error!(?err, "reaper tick failed");
                    }
                    tokio::time::sleep(reaper_sleep).await;
                }
            });

            info!("queue server running; ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
        }
        Command::Get { id } => {
            let item = db::get_item(&pool, id).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Complete { id, matched_count } => {
            let item = db::complete_item(&pool, id, matched_count).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Release { id } => {
            let item = db::release_item(&pool, id).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::ClearStaleLocks => {
            let cleared =
                reaper::reap_stale_locks(&pool, events.as_ref(), cfg.reaper.lock_timeout_minutes)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&cleared)?);
        }
        Command::InvokeWorker { name } => {
            let settings = dispatch_settings(&cfg);
            let outcome = dispatch::invoke_worker_on_next(
                &pool,
                &invoker,
                events.as_ref(),
                &settings,
                &name,
            )
            .await?;
            info!(?outcome, "manual invocation finished");
        }
        Command::Reconcile { batch_id } => {
            let analytics = HttpAnalyticsClient::from_config(&cfg.analytics);
            let items =
                reconcile::load_batch_expected(&pool, &analytics, &cfg.analytics.tables, batch_id)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        Command::Seed => {
            let batch_id = db::insert_batch(&pool, Some("Test export.")).await?;
            db::insert_item(&pool, batch_id, "12345678", 5).await?;
            db::insert_item(&pool, batch_id, "22222222", 5).await?;
            db::insert_worker(&pool, "WORKER1", "http://localhost:7071/api/worker1", true).await?;
            db::insert_worker(&pool, "WORKER2", "http://localhost:7071/api/worker2", true).await?;
            info!(batch_id, "seeded demo batch and workers");
        }
    }

    pool.close().await;
    Ok(())
}
