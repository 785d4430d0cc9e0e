//! berth scheduler
//!
//! Runs placement (on the leader) or container reconciliation (on workers)
//! for the local machine. This binary runs against an in-memory database
//! and mock collaborators for development.

use std::sync::Arc;

use anyhow::Result;
use berth_db::{DbError, Leadership, Minion, Role, Table};
use berth_scheduler::config::Config;
use berth_scheduler::dataplane::RecordingDataplane;
use berth_scheduler::runtime::MockRuntime;
use berth_scheduler::secrets::{MemorySecretStore, SecretCache};
use berth_scheduler::worker::{WorkerConfig, WorkerReconciler};
use berth_scheduler::{SchedulerLoop, SchedulerLoopConfig};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        role = %config.role,
        private_ip = %config.private_ip,
        tick_interval_secs = config.tick_interval_secs,
        concurrency_limit = config.concurrency_limit,
        "Starting berth scheduler"
    );

    let db = berth_db::Database::new();
    register_self(&db, &config)?;

    let worker = WorkerReconciler::new(
        db.clone(),
        Arc::new(MockRuntime::new()),
        Arc::new(MemorySecretStore::new()),
        Arc::new(RecordingDataplane::new()),
        WorkerConfig {
            concurrency_limit: config.concurrency_limit,
        },
    );
    let scheduler = SchedulerLoop::new(
        db,
        worker,
        SecretCache::new(config.secret_cache_ttl()),
        SchedulerLoopConfig {
            tick_interval: config.tick_interval(),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        error!(error = %e, "Scheduler loop task panicked");
    }

    info!("Scheduler shutdown complete");
    Ok(())
}

/// Seed this machine's minion row, and leadership when running as master.
fn register_self(db: &berth_db::Database, config: &Config) -> Result<(), DbError> {
    db.txn(&[Table::Minion, Table::Leadership]).run(|view| {
        let mut me = view.insert::<Minion>()?;
        me.role = config.role;
        me.private_ip = config.private_ip.clone();
        me.is_self = true;
        view.commit(me)?;

        if config.role == Role::Master {
            let mut leadership = view.insert::<Leadership>()?;
            leadership.leader = true;
            leadership.leader_ip = Some(config.private_ip.clone());
            view.commit(leadership)?;
        }
        Ok(())
    })
}
