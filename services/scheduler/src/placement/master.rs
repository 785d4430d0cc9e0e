//! Leader-side container placement.
//!
//! Each pass runs inside one transaction over every table it reads or
//! writes:
//! 1. Build a [`PlacementContext`] from the current rows
//! 2. Evict containers whose placement is no longer valid
//! 3. Place unassigned containers on the least loaded valid worker
//! 4. Commit every changed container row

use berth_db::{Container, Database, DbError, Image, Minion, Placement, Table, View};
use tracing::{debug, info, instrument, warn};

use super::constraint::valid_placement;
use super::context::PlacementContext;
use super::heap::LoadHeap;
use crate::error::SchedulerResult;

/// Statistics from a placement pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlacementStats {
    /// Containers unassigned because their placement became invalid.
    pub evicted: usize,
    /// Containers assigned to a worker.
    pub placed: usize,
    /// Containers no worker would accept.
    pub unschedulable: usize,
}

/// Assigns containers to workers. Only acts while this process is leader.
#[derive(Clone)]
pub struct MasterScheduler {
    db: Database,
}

impl MasterScheduler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Run one placement pass.
    #[instrument(skip(self))]
    pub fn reconcile(&self) -> SchedulerResult<PlacementStats> {
        let stats = self.db.txn(&Table::ALL).run(|view| {
            if !view.is_leader()? {
                debug!("Not the leader, skipping placement");
                return Ok::<_, DbError>(PlacementStats::default());
            }
            place_containers(view)
        })?;

        if stats != PlacementStats::default() {
            info!(
                evicted = stats.evicted,
                placed = stats.placed,
                unschedulable = stats.unschedulable,
                "Placement pass complete"
            );
        }

        Ok(stats)
    }
}

fn place_containers(view: &mut View<'_>) -> Result<PlacementStats, DbError> {
    let minions = view.select_all::<Minion>()?;
    let containers = view.select_all::<Container>()?;
    let constraints = view.select_all::<Placement>()?;
    let images = view.select_all::<Image>()?;

    for constraint in &constraints {
        if constraint.other_container.is_some() && !constraint.exclusive {
            warn!(
                target_container = %constraint.target_container,
                other_container = ?constraint.other_container,
                "Inclusive container placement rules are not enforced"
            );
        }
    }

    let mut ctx = PlacementContext::build(minions, containers, constraints, &images);
    let mut stats = PlacementStats {
        evicted: evict_invalid(&mut ctx),
        ..Default::default()
    };
    let (placed, unschedulable) = place_unassigned(&mut ctx);
    stats.placed = placed;
    stats.unschedulable = unschedulable;

    for dbc in ctx.into_changes() {
        view.commit(dbc)?;
    }

    Ok(stats)
}

/// Unassign containers that no longer validate against their worker.
///
/// Each worker's containers are checked against the peer set as it stood
/// before any eviction on that worker. Returns the number evicted.
fn evict_invalid(ctx: &mut PlacementContext) -> usize {
    let mut evicted = 0;

    for w in 0..ctx.workers.len() {
        let invalid: Vec<usize> = {
            let worker = &ctx.workers[w];
            let peers = ctx.peers(worker);
            worker
                .containers
                .iter()
                .copied()
                .filter(|&i| {
                    !valid_placement(&ctx.constraints, &worker.minion, &peers, &ctx.containers[i])
                })
                .collect()
        };

        for &i in &invalid {
            let dbc = &mut ctx.containers[i];
            debug!(
                hostname = %dbc.hostname,
                minion = ?dbc.minion,
                "Evicting container with invalid placement"
            );
            dbc.minion = None;
            ctx.changed.insert(i);
            ctx.unassigned.push(i);
        }
        ctx.workers[w]
            .containers
            .retain(|i| !invalid.contains(i));
        evicted += invalid.len();
    }

    evicted
}

/// Assign each unassigned container to the first valid worker in heap
/// order. Returns `(placed, unschedulable)`.
fn place_unassigned(ctx: &mut PlacementContext) -> (usize, usize) {
    let loads = ctx.workers.iter().map(|w| w.containers.len()).collect();
    let mut heap = LoadHeap::new(loads);
    let mut placed = 0;
    let mut still_unassigned = Vec::new();

    for i in std::mem::take(&mut ctx.unassigned) {
        let found = heap.order().iter().enumerate().find_map(|(pos, &w)| {
            let worker = &ctx.workers[w];
            let peers = ctx.peers(worker);
            valid_placement(&ctx.constraints, &worker.minion, &peers, &ctx.containers[i])
                .then_some((pos, w))
        });

        let Some((pos, w)) = found else {
            warn!(
                hostname = %ctx.containers[i].hostname,
                image = %ctx.containers[i].image,
                "Failed to place container"
            );
            still_unassigned.push(i);
            continue;
        };

        let ip = ctx.workers[w].minion.private_ip.clone();
        debug!(hostname = %ctx.containers[i].hostname, minion = %ip, "Placed container");
        ctx.containers[i].minion = Some(ip);
        ctx.changed.insert(i);
        ctx.workers[w].containers.push(i);
        heap.increment(pos);
        placed += 1;
    }

    let unschedulable = still_unassigned.len();
    ctx.unassigned = still_unassigned;
    (placed, unschedulable)
}
