//! `jobwatch-worker` -- node presence and job log housekeeping daemon.
//!
//! Registers this process in the coordination store, mirrors its identity
//! into the document store, purges expired job execution records on a
//! timer and logs cluster membership changes until stopped.
//!
//! See [`WorkerConfig::from_env`] for the environment variables.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jobwatch_coordination::{CoordinationClient, PgCoordination};
use jobwatch_core::host;
use jobwatch_core::process::{current_pid, SignalProbe};
use jobwatch_db::models::node::NodeIdentity;
use jobwatch_db::repositories::JobLogStore;
use jobwatch_db::{DocumentStore, PgDocumentStore};
use jobwatch_worker::background::log_retention::RetentionScheduler;
use jobwatch_worker::background::membership;
use jobwatch_worker::config::WorkerConfig;
use jobwatch_worker::registry::{NodeRegistry, Presence};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for each background task.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobwatch_worker=info,jobwatch_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        node_id = %config.node_id,
        node_ip = %config.node_ip,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = jobwatch_db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    jobwatch_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    jobwatch_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Stores ---
    let docs: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool.clone()));
    let coord: Arc<dyn CoordinationClient> = Arc::new(PgCoordination::new(pool));
    let job_logs = JobLogStore::new(docs.clone());
    job_logs.ensure_indexes().await;

    let registry = NodeRegistry::new(coord, docs, config.keys.clone(), Arc::new(SignalProbe));

    // --- Registration ---
    let mut node = NodeIdentity::new(
        config.node_id.clone(),
        current_pid(),
        config.node_ip.clone(),
        host::hostname().unwrap_or_default(),
    );

    if let Presence::HeldBy(pid) = registry.register(&node).await? {
        tracing::error!(%node, holder_pid = pid, "Node is already running");
        std::process::exit(1);
    }

    // Identities used to be keyed by IP address.
    if node.id != node.ip {
        if let Err(e) = registry.remove_stale_identity(&node.ip).await {
            tracing::warn!(error = %e, ip = %node.ip, "Failed to remove IP-keyed identity");
        }
    }

    registry.claim(&node).await.context("Failed to claim presence key")?;
    registry.mark_started(&mut node).await;
    tracing::info!(%node, version = %node.version, "Node registered");

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    match config.log_clean_period {
        Some(period) => {
            let scheduler = RetentionScheduler::new(job_logs, period, config.log_expiration);
            let token = cancel.clone();
            handles.push(tokio::spawn(async move { scheduler.run(token).await }));
        }
        None => tracing::info!("Log retention disabled"),
    }

    match registry.watch().await {
        Ok(stream) => {
            handles.push(tokio::spawn(membership::run(
                stream,
                config.keys.node_prefix.clone(),
                cancel.clone(),
            )));
        }
        Err(e) => tracing::warn!(error = %e, "Node membership watch unavailable"),
    }

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    for handle in handles {
        let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await;
    }

    if let Err(e) = registry.release(&node).await {
        tracing::error!(error = %e, %node, "Failed to release presence key");
    }
    registry.mark_stopped(&mut node).await;

    tracing::info!(%node, "Node stopped");
    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
