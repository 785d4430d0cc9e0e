//! Scheduler control loop.
//!
//! Ticks on every database change and on a fallback interval, and runs the
//! placement or worker reconciler depending on this machine's role.

use std::time::Duration;

use berth_db::{Database, DbError, Role, Table};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SchedulerResult;
use crate::placement::{MasterScheduler, PlacementStats};
use crate::secrets::SecretCache;
use crate::worker::{WorkerReconciler, WorkerStats};

/// Scheduler loop configuration.
#[derive(Debug, Clone)]
pub struct SchedulerLoopConfig {
    /// Interval between ticks when nothing changes.
    pub tick_interval: Duration,
}

impl Default for SchedulerLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No self minion, or a minion with no role yet.
    Skipped,
    Master(PlacementStats),
    Worker(WorkerStats),
}

/// Runs scheduling for this machine until shutdown.
pub struct SchedulerLoop {
    db: Database,
    master: MasterScheduler,
    worker: WorkerReconciler,
    cache: SecretCache,
    config: SchedulerLoopConfig,
}

impl SchedulerLoop {
    pub fn new(
        db: Database,
        worker: WorkerReconciler,
        cache: SecretCache,
        config: SchedulerLoopConfig,
    ) -> Self {
        Self {
            master: MasterScheduler::new(db.clone()),
            db,
            worker,
            cache,
            config,
        }
    }

    /// Run the loop until `shutdown` becomes true or its sender is dropped.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.tick_period();
        info!(interval_secs = period.as_secs(), "Starting scheduler loop");

        let mut trigger = self.db.trigger(&Table::ALL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = trigger.changed() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Scheduler tick failed");
            }
        }

        info!("Scheduler loop shutting down");
    }

    /// The fallback tick period. A zero interval is replaced by the default.
    fn tick_period(&self) -> Duration {
        if self.config.tick_interval.is_zero() {
            let fallback = SchedulerLoopConfig::default().tick_interval;
            warn!(
                fallback_secs = fallback.as_secs(),
                "Zero tick interval configured, using the default"
            );
            return fallback;
        }
        self.config.tick_interval
    }

    /// Run one tick for this machine's current role.
    pub async fn tick(&self) -> SchedulerResult<TickOutcome> {
        let me = match self.db.minion_self() {
            Ok(me) => me,
            Err(DbError::NoSelf) => {
                debug!("Waiting for self minion");
                return Ok(TickOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        match me.role {
            Role::Master => Ok(TickOutcome::Master(self.master.reconcile()?)),
            Role::Worker => Ok(TickOutcome::Worker(
                self.worker.reconcile(&self.cache).await?,
            )),
            Role::None => {
                debug!("Self minion has no role yet");
                Ok(TickOutcome::Skipped)
            }
        }
    }
}
