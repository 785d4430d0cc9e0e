use std::sync::Arc;
use std::time::Duration;

use berth_db::{Database, Minion, Role};
use berth_scheduler::dataplane::RecordingDataplane;
use berth_scheduler::runtime::MockRuntime;
use berth_scheduler::secrets::{MemorySecretStore, SecretCache};
use berth_scheduler::worker::{WorkerConfig, WorkerReconciler};
use berth_scheduler::{SchedulerLoop, SchedulerLoopConfig, TickOutcome};
use berth_testing::{assigned, commit_all, container, leader, local, master, worker};
use tokio::sync::watch;

fn scheduler(db: &Database, runtime: Arc<MockRuntime>, tick_interval: Duration) -> SchedulerLoop {
    let worker = WorkerReconciler::new(
        db.clone(),
        runtime,
        Arc::new(MemorySecretStore::new()),
        Arc::new(RecordingDataplane::new()),
        WorkerConfig::default(),
    );
    SchedulerLoop::new(
        db.clone(),
        worker,
        SecretCache::default(),
        SchedulerLoopConfig { tick_interval },
    )
}

#[tokio::test]
async fn test_tick_skips_without_self_minion() {
    let db = Database::new();
    let s = scheduler(&db, Arc::new(MockRuntime::new()), Duration::from_secs(60));

    assert_eq!(s.tick().await.unwrap(), TickOutcome::Skipped);
}

#[tokio::test]
async fn test_tick_skips_without_role() {
    let db = Database::new();
    commit_all(
        &db,
        [local(Minion {
            role: Role::None,
            ..worker("10.0.0.1")
        })],
    )
    .unwrap();
    let s = scheduler(&db, Arc::new(MockRuntime::new()), Duration::from_secs(60));

    assert_eq!(s.tick().await.unwrap(), TickOutcome::Skipped);
}

#[tokio::test]
async fn test_tick_runs_placement_on_master() {
    let db = Database::new();
    commit_all(&db, [local(master("10.0.0.100")), worker("10.0.0.1")]).unwrap();
    commit_all(&db, [leader()]).unwrap();
    commit_all(&db, [container("web", "nginx")]).unwrap();
    let s = scheduler(&db, Arc::new(MockRuntime::new()), Duration::from_secs(60));

    match s.tick().await.unwrap() {
        TickOutcome::Master(stats) => assert_eq!(stats.placed, 1),
        other => panic!("expected placement, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tick_runs_worker_reconciliation_on_worker() {
    let db = Database::new();
    commit_all(&db, [local(worker("10.0.0.1"))]).unwrap();
    commit_all(&db, [assigned("web", "nginx", "10.0.0.1", "10.1.0.1")]).unwrap();
    let runtime = Arc::new(MockRuntime::new());
    let s = scheduler(&db, runtime.clone(), Duration::from_secs(60));

    match s.tick().await.unwrap() {
        TickOutcome::Worker(stats) => assert_eq!(stats.booted, 1),
        other => panic!("expected worker reconciliation, got {other:?}"),
    }
    assert_eq!(runtime.containers().await.len(), 1);
}

#[tokio::test]
async fn test_loop_reacts_to_changes_and_shuts_down() {
    let db = Database::new();
    commit_all(&db, [local(worker("10.0.0.1"))]).unwrap();
    let runtime = Arc::new(MockRuntime::new());
    // Long interval: only the first tick and change triggers drive it.
    let s = scheduler(&db, runtime.clone(), Duration::from_secs(3600));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { s.run(shutdown_rx).await });

    commit_all(&db, [assigned("web", "nginx", "10.0.0.1", "10.1.0.1")]).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while runtime.containers().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("container should be booted after the change");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_loop_stops_when_shutdown_sender_dropped() {
    let db = Database::new();
    let s = scheduler(&db, Arc::new(MockRuntime::new()), Duration::from_secs(3600));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { s.run(shutdown_rx).await });
    drop(shutdown_tx);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop when the sender is dropped")
        .unwrap();
}

#[tokio::test]
async fn test_loop_survives_zero_tick_interval() {
    let db = Database::new();
    commit_all(&db, [local(worker("10.0.0.1"))]).unwrap();
    let runtime = Arc::new(MockRuntime::new());
    let s = scheduler(&db, runtime.clone(), Duration::ZERO);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { s.run(shutdown_rx).await });

    commit_all(&db, [assigned("web", "nginx", "10.0.0.1", "10.1.0.1")]).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while runtime.containers().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("loop should keep running with a zero interval");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop on shutdown")
        .expect("loop task must not panic");
}
