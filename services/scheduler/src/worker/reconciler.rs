//! Worker-side reconciler.
//!
//! Converges the containers running on this machine toward the containers
//! the leader assigned to it:
//! 1. Resolve the secrets the assigned containers reference
//! 2. Evaluate containers; those blocked on secrets only get a status
//! 3. Match ready containers against the runtime's managed containers
//! 4. Boot the unmatched desired ones and kill the unmatched running ones
//! 5. Repeat once if anything was booted or killed
//! 6. Refresh the dataplane

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use berth_db::{Container, Database, DbError, Table, View};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::evaluate::{evaluate, referenced_secrets, waiting_status, EvaluatedContainer};
use super::sync::{clear_runtime_fields, sync_worker, SyncPlan};
use crate::dataplane::Dataplane;
use crate::error::SchedulerResult;
use crate::runtime::{ActualContainer, ContainerRuntime, MANAGED_LABEL};
use crate::secrets::{SecretCache, SecretStore};

/// Sync/execute passes per invocation.
const MAX_PASSES: usize = 2;

/// Worker reconciler configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum boots, and separately kills, in flight at once.
    pub concurrency_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 32,
        }
    }
}

/// Statistics from a worker reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub booted: usize,
    pub killed: usize,
    pub boot_failures: usize,
    pub kill_failures: usize,
    /// Containers blocked on secrets in the last pass.
    pub waiting_for_secrets: usize,
    pub passes: usize,
}

/// Drives the local container runtime toward this worker's assignment.
pub struct WorkerReconciler {
    db: Database,
    runtime: Arc<dyn ContainerRuntime>,
    secrets: Arc<dyn SecretStore>,
    dataplane: Arc<dyn Dataplane>,
    config: WorkerConfig,
}

impl WorkerReconciler {
    pub fn new(
        db: Database,
        runtime: Arc<dyn ContainerRuntime>,
        secrets: Arc<dyn SecretStore>,
        dataplane: Arc<dyn Dataplane>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            runtime,
            secrets,
            dataplane,
            config,
        }
    }

    /// Run one reconciliation.
    #[instrument(skip(self, cache))]
    pub async fn reconcile(&self, cache: &SecretCache) -> SchedulerResult<WorkerStats> {
        let mut stats = WorkerStats::default();

        let Ok(me) = self.db.minion_self() else {
            debug!("No self minion yet, skipping worker reconciliation");
            return Ok(stats);
        };
        if me.private_ip.is_empty() {
            debug!("Self minion has no private IP yet");
            return Ok(stats);
        }
        let me = me.private_ip;

        for _ in 0..MAX_PASSES {
            stats.passes += 1;
            let plan = self.sync_pass(&me, cache, &mut stats).await?;
            if plan.to_boot.is_empty() && plan.to_kill.is_empty() {
                break;
            }
            self.execute(plan, &mut stats).await;
        }

        self.refresh_dataplane(&me).await;

        if stats.booted + stats.killed + stats.boot_failures + stats.kill_failures > 0 {
            info!(
                booted = stats.booted,
                killed = stats.killed,
                boot_failures = stats.boot_failures,
                kill_failures = stats.kill_failures,
                waiting_for_secrets = stats.waiting_for_secrets,
                passes = stats.passes,
                "Worker reconciliation complete"
            );
        }

        Ok(stats)
    }

    async fn sync_pass(
        &self,
        me: &str,
        cache: &SecretCache,
        stats: &mut WorkerStats,
    ) -> SchedulerResult<SyncPlan> {
        let assigned = self
            .db
            .select::<Container, _>(|c| c.minion.as_deref() == Some(me));
        let names = referenced_secrets(&assigned);
        let resolved = cache.resolve(self.secrets.as_ref(), &names).await;

        let filter = BTreeMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]);
        let actual = self.runtime.list(&filter).await?;

        let (plan, waiting) = self.db.txn(&[Table::Container]).run(|view| {
            let containers = view.select::<Container, _>(|c| c.minion.as_deref() == Some(me))?;
            let (ready, waiting) = evaluate_assigned(view, containers, &resolved)?;

            let plan = sync_worker(ready, actual);
            for dbc in &plan.changed {
                view.commit(dbc.clone())?;
            }
            Ok::<_, DbError>((plan, waiting))
        })?;

        stats.waiting_for_secrets = waiting;
        debug!(
            to_boot = plan.to_boot.len(),
            to_kill = plan.to_kill.len(),
            changed = plan.changed.len(),
            waiting_for_secrets = waiting,
            "Computed sync plan"
        );
        Ok(plan)
    }

    async fn execute(&self, plan: SyncPlan, stats: &mut WorkerStats) {
        let SyncPlan {
            to_boot, to_kill, ..
        } = plan;
        let limit = self.config.concurrency_limit.max(1);

        let runtime = Arc::clone(&self.runtime);
        let boots = run_bounded(limit, to_boot, move |evaluated: EvaluatedContainer| {
            let runtime = Arc::clone(&runtime);
            async move {
                let hostname = evaluated.container.hostname.clone();
                match runtime.run(evaluated.run_options()).await {
                    Ok(id) => {
                        info!(hostname = %hostname, id = %id, "Booted container");
                        true
                    }
                    Err(e) => {
                        warn!(hostname = %hostname, error = %e, "Failed to boot container");
                        false
                    }
                }
            }
        });

        let runtime = Arc::clone(&self.runtime);
        let kills = run_bounded(limit, to_kill, move |actual: ActualContainer| {
            let runtime = Arc::clone(&runtime);
            async move {
                match runtime.remove(&actual.id).await {
                    Ok(()) => {
                        info!(id = %actual.id, name = %actual.name, "Killed container");
                        true
                    }
                    Err(e) => {
                        warn!(id = %actual.id, error = %e, "Failed to kill container");
                        false
                    }
                }
            }
        });

        let ((booted, boot_failures), (killed, kill_failures)) = tokio::join!(boots, kills);
        stats.booted += booted;
        stats.boot_failures += boot_failures;
        stats.killed += killed;
        stats.kill_failures += kill_failures;
    }

    async fn refresh_dataplane(&self, me: &str) {
        let running = self.db.select::<Container, _>(|c| {
            c.minion.as_deref() == Some(me) && c.docker_id.is_some()
        });
        if let Err(e) = self.dataplane.replace_flows(&running).await {
            warn!(error = %e, "Failed to refresh dataplane");
        }
    }
}

/// Evaluate assigned containers, recording a status on those blocked on
/// secrets. Containers without an overlay IP are skipped. Neither kind can
/// pair with a runtime container, so both lose their runtime fields.
fn evaluate_assigned(
    view: &mut View<'_>,
    containers: Vec<Container>,
    resolved: &BTreeMap<String, String>,
) -> Result<(Vec<EvaluatedContainer>, usize), DbError> {
    let mut ready = Vec::new();
    let mut waiting = 0;

    for mut dbc in containers {
        if dbc.ip.as_deref().unwrap_or_default().is_empty() {
            debug!(hostname = %dbc.hostname, "Container has no IP yet");
            if clear_runtime_fields(&mut dbc) {
                view.commit(dbc)?;
            }
            continue;
        }

        match evaluate(&dbc, resolved) {
            Ok(evaluated) => ready.push(evaluated),
            Err(missing) => {
                waiting += 1;
                let before = dbc.clone();
                clear_runtime_fields(&mut dbc);
                dbc.status = waiting_status(&missing);
                if dbc != before {
                    debug!(hostname = %dbc.hostname, missing = ?missing, "Container waiting for secrets");
                    view.commit(dbc)?;
                }
            }
        }
    }

    Ok((ready, waiting))
}

/// Run `action` on every item with at most `limit` in flight. Returns
/// `(succeeded, failed)`.
async fn run_bounded<T, F, Fut>(limit: usize, items: Vec<T>, action: F) -> (usize, usize)
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();

    for item in items {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let fut = action(item);
        tasks.spawn(async move {
            let ok = fut.await;
            drop(permit);
            ok
        });
    }

    let (mut succeeded, mut failed) = (0, 0);
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(true) => succeeded += 1,
            Ok(false) => failed += 1,
            Err(e) => {
                warn!(error = %e, "Runtime action task failed");
                failed += 1;
            }
        }
    }
    (succeeded, failed)
}
