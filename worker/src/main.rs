// SPDX-License-Identifier: Apache-2.0

//! Worker process: runs the tasks a manager assigns to it against a local
//! container daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use common::settings::{self, Settings, StoreBackend};
use common::store::{MemoryStore, RocksStore, Store};
use common::task::Task;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use worker::error::{Error, Result as WorkerResult};
use worker::runtime::DaemonRuntime;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "orch-worker")]
#[command(about = "Executes tasks assigned by a manager against a local container daemon")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker name, used to label per-worker state and to address this
    /// worker from the manager's worker list
    #[arg(long, default_value = "worker-1")]
    name: String,

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

fn validate_args(name: &str) -> WorkerResult<()> {
    if name.trim().is_empty() {
        return Err(Error::Config("worker name must not be empty".to_string()));
    }
    Ok(())
}

async fn ensure_daemon_reachable(socket_path: &str) -> WorkerResult<()> {
    DaemonRuntime::ping(socket_path).await?;
    Ok(())
}

fn build_task_store(settings: &Settings, name: &str) -> WorkerResult<Arc<dyn Store<Task>>> {
    match settings.store_backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Rocks => {
            let path = format!("{}/{name}_tasks.db", settings.store_path);
            let store = RocksStore::open(&path)?;
            Ok(Arc::new(store))
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("worker={level},warn")));
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

    validate_args(&args.name)?;

    let config_path = args.config.as_ref().map(|p| p.to_string_lossy().to_string());
    let settings = settings::init(config_path.as_deref());

    let bind_address = args.bind_address.clone().unwrap_or_else(|| settings.bind_address.clone());
    let bind_port = args.bind_port.unwrap_or(settings.bind_port);

    info!("starting worker '{}' on {}:{}", args.name, bind_address, bind_port);

    if let Err(e) = ensure_daemon_reachable(&settings.daemon_socket_path).await {
        error!("container daemon unreachable at {}: {e}", settings.daemon_socket_path);
        std::process::exit(1);
    }
    info!("container daemon is reachable at {}", settings.daemon_socket_path);

    let tasks = build_task_store(settings, &args.name).unwrap_or_else(|e| {
        error!("unable to open task store: {e}");
        std::process::exit(1);
    });

    let worker = Arc::new(Worker::new(args.name, settings.daemon_socket_path.clone(), tasks));
    let cancel = CancellationToken::new();

    let run_tasks_handle = tokio::spawn(Arc::clone(&worker).run_tasks_loop(cancel.clone()));
    let update_tasks_handle = tokio::spawn(Arc::clone(&worker).update_tasks_loop(cancel.clone()));

    let app = worker::routes::router(Arc::clone(&worker));
    let addr = format!("{bind_address}:{bind_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("worker http api listening on {addr}");

    let server_cancel = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("worker http server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    server_cancel.cancel();

    let _ = tokio::join!(run_tasks_handle, update_tasks_handle);
    info!("worker stopped");
    Ok(())
}
