// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! crucibled: the Crucible execution broker daemon.

use crucible_broker::pool::{PoolConfig, WorkerPool};
use crucible_broker::{http, Config, ExecutionService};
use crucible_core::SystemClock;
use crucible_orchestrator::KubeOrchestrator;
use crucible_store::FileStore;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = init_tracing();
    let config = Config::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %config.kube_namespace,
        image = %config.executor_image,
        pool_target = config.pool_target,
        "starting crucibled"
    );

    let clock = SystemClock;
    let store = Arc::new(FileStore::open(&config.file_storage_path, clock.clone())?);
    let orch = Arc::new(
        KubeOrchestrator::connect(config.kube_namespace.clone(), config.app_label()).await?,
    );

    let pool_config = PoolConfig {
        target: config.pool_target,
        name_prefix: config.worker_name_prefix.clone(),
        stuck_timeout: config.worker_stuck_timeout,
        call_deadline: config.orchestrator_deadline,
        ..PoolConfig::default()
    };
    let pool =
        WorkerPool::spawn(orch.clone(), clock.clone(), pool_config, config.worker_pod_spec())
            .await?;

    spawn_reclaimer(store.clone(), config.reclaim_interval, config.reclaim_grace);

    let listen_addr = config.http_listen_addr;
    let service = Arc::new(ExecutionService::new(pool, orch, store, clock, config));

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "http listener up");
    axum::serve(listener, http::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("crucibled stopped");
    Ok(())
}

fn spawn_reclaimer(
    store: Arc<FileStore<SystemClock>>,
    interval: std::time::Duration,
    grace: std::time::Duration,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(e) = store.reclaim(grace).await {
                warn!(error = %e, "store reclamation failed");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "shutdown signal handler failed");
    }
    info!("shutdown requested");
}

/// stdout logging by default; a rolling file under `APP_LOG_DIR` when
/// set. The guard must outlive main for the file writer to flush.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match std::env::var("APP_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "crucibled.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
