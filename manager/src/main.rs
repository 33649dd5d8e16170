// SPDX-License-Identifier: Apache-2.0

//! Manager process: accepts task submissions, schedules them onto workers,
//! and supervises their health.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use common::scheduler::{Epvm, RoundRobin, Scheduler};
use common::settings::{self, SchedulerKind, Settings, StoreBackend};
use common::store::{MemoryStore, RocksStore, Store};
use common::task::{Task, TaskEvent};
use manager::error::{Error, Result as ManagerResult};
use manager::Manager;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "orch-manager")]
#[command(about = "Accepts tasks, schedules them onto workers, and supervises their health")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated list of worker addresses (host:port)
    #[arg(long)]
    workers: Option<String>,

    /// HTTP server bind address
    #[arg(long)]
    bind_address: Option<String>,

    /// HTTP server bind port
    #[arg(long)]
    bind_port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Rejects configurations the manager cannot usefully run with, rather than
/// starting up and silently dropping every dispatch to `NoCandidates`.
fn validate_workers(workers: &[String]) -> ManagerResult<()> {
    if workers.is_empty() {
        return Err(Error::Config(
            "no workers configured; pass --workers or set `workers` in settings".to_string(),
        ));
    }
    Ok(())
}

fn build_stores(settings: &Settings) -> ManagerResult<(Arc<dyn Store<Task>>, Arc<dyn Store<TaskEvent>>)> {
    match settings.store_backend {
        StoreBackend::Memory => Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))),
        StoreBackend::Rocks => {
            let tasks_path = format!("{}/tasks.db", settings.store_path);
            let events_path = format!("{}/events.db", settings.store_path);
            let task_db = RocksStore::open(&tasks_path)?;
            let event_db = RocksStore::open(&events_path)?;
            Ok((Arc::new(task_db), Arc::new(event_db)))
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("manager={level},warn")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config_path = args.config.as_ref().map(|p| p.to_string_lossy().to_string());
    let settings = settings::init(config_path.as_deref());

    let workers: Vec<String> = args
        .workers
        .clone()
        .unwrap_or_else(|| settings.workers.join(","))
        .split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();

    validate_workers(&workers)?;

    let bind_address = args.bind_address.clone().unwrap_or_else(|| settings.bind_address.clone());
    let bind_port = args.bind_port.unwrap_or(settings.bind_port);

    info!("starting manager on {bind_address}:{bind_port} with {} worker(s)", workers.len());

    let scheduler: Box<dyn Scheduler> = match settings.scheduler {
        SchedulerKind::Roundrobin => Box::new(RoundRobin::new()),
        SchedulerKind::Epvm => Box::new(Epvm::new()),
    };

    let (task_db, event_db) = build_stores(settings)?;

    let manager = Arc::new(Manager::new(
        workers,
        scheduler,
        task_db,
        event_db,
        settings.worker_memory,
        settings.worker_disk,
    ));
    let cancel = CancellationToken::new();

    let process_tasks_handle = tokio::spawn(Arc::clone(&manager).process_tasks_loop(cancel.clone()));
    let update_tasks_handle = tokio::spawn(Arc::clone(&manager).update_tasks_loop(cancel.clone()));
    let health_checks_handle = tokio::spawn(Arc::clone(&manager).do_health_checks_loop(cancel.clone()));

    let app = manager::routes::router(Arc::clone(&manager));
    let addr = format!("{bind_address}:{bind_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("manager http api listening on {addr}");

    let server_cancel = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("manager http server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    server_cancel.cancel();

    let _ = tokio::join!(process_tasks_handle, update_tasks_handle, health_checks_handle);
    info!("manager stopped");
    Ok(())
}
