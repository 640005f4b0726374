// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

use super::*;
use crate::testing::FakeOrchestrator;
use crucible_core::SystemClock;

fn config(target: usize) -> PoolConfig {
    PoolConfig {
        target,
        name_prefix: "cx-exec-".to_string(),
        stuck_timeout: Duration::from_secs(300),
        call_deadline: Duration::from_secs(5),
        tick_interval: Duration::from_millis(100),
    }
}

fn pod_spec() -> WorkerPodSpec {
    WorkerPodSpec {
        image: "crucible-executor:latest".to_string(),
        app_label: "cx-exec".to_string(),
        container_resources: None,
        pod_spec_extra: None,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

async fn spawn_pool(
    orch: &Arc<FakeOrchestrator>,
    target: usize,
) -> WorkerPool {
    WorkerPool::spawn(orch.clone(), SystemClock, config(target), pod_spec()).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn pool_fills_to_target() {
    let orch = FakeOrchestrator::new(true);
    let pool = spawn_pool(&orch, 2).await;
    settle().await;

    let snapshot = pool.inspect().await;
    assert_eq!(snapshot.ready.len(), 2);
    assert_eq!(orch.created().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn acquire_pops_fifo_and_replenishes() {
    let orch = FakeOrchestrator::new(true);
    let pool = spawn_pool(&orch, 2).await;
    settle().await;

    let first_ready = pool.inspect().await.ready[0].clone();
    let chat = ChatId::new("s1");
    let worker = pool.acquire(&chat, Duration::from_secs(5)).await.unwrap();
    assert_eq!(worker.as_str(), first_ready);

    settle().await;
    let snapshot = pool.inspect().await;
    // The assigned worker no longer counts as supply, so a replacement
    // is already provisioning or ready.
    assert_eq!(snapshot.assigned, vec![worker.as_str().to_string()]);
    assert_eq!(snapshot.ready.len() + snapshot.provisioning, 2);
}

#[tokio::test(start_paused = true)]
async fn waiters_are_served_in_request_order() {
    let orch = FakeOrchestrator::new(false);
    let pool = spawn_pool(&orch, 0).await;
    settle().await;

    let pool_a = pool.clone();
    let first = tokio::spawn(async move {
        pool_a.acquire(&ChatId::new("first"), Duration::from_secs(60)).await
    });
    settle().await;
    let pool_b = pool.clone();
    let second = tokio::spawn(async move {
        pool_b.acquire(&ChatId::new("second"), Duration::from_secs(60)).await
    });
    settle().await;
    assert_eq!(pool.inspect().await.waiters, 2);

    let w1 = WorkerName::new("cx-exec-manual1");
    let w2 = WorkerName::new("cx-exec-manual2");
    orch.set_worker(&w1, WorkerPhase::Running, true);
    settle().await;
    orch.set_worker(&w2, WorkerPhase::Running, true);
    settle().await;

    assert_eq!(first.await.unwrap().unwrap(), w1);
    assert_eq!(second.await.unwrap().unwrap(), w2);
}

#[tokio::test(start_paused = true)]
async fn acquire_times_out_and_removes_its_waiter() {
    let orch = FakeOrchestrator::new(false);
    let pool = spawn_pool(&orch, 0).await;
    settle().await;

    let err = pool.acquire(&ChatId::new("s1"), Duration::from_millis(200)).await.unwrap_err();
    assert_eq!(err.kind(), crucible_core::ErrorKind::Unavailable);
    assert_eq!(pool.inspect().await.waiters, 0);
}

#[tokio::test(start_paused = true)]
async fn release_destroys_the_worker() {
    let orch = FakeOrchestrator::new(true);
    let pool = spawn_pool(&orch, 1).await;
    settle().await;

    let worker = pool.acquire(&ChatId::new("s1"), Duration::from_secs(5)).await.unwrap();
    pool.release(worker.clone()).await;
    settle().await;

    assert!(orch.deleted().contains(&worker.as_str().to_string()));
    let snapshot = pool.inspect().await;
    assert!(!snapshot.ready.contains(&worker.as_str().to_string()));
    assert!(snapshot.assigned.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_worker_leaves_the_ready_queue() {
    let orch = FakeOrchestrator::new(true);
    let pool = spawn_pool(&orch, 1).await;
    settle().await;

    let name = WorkerName::new(pool.inspect().await.ready[0].clone());
    orch.set_worker(&name, WorkerPhase::Failed, false);
    settle().await;

    let snapshot = pool.inspect().await;
    assert!(!snapshot.ready.contains(&name.as_str().to_string()));
    // Replenishment kicked in with a fresh name.
    assert_eq!(snapshot.ready.len() + snapshot.provisioning, 1);
    assert!(orch.created().len() >= 2);
}

#[tokio::test(start_paused = true)]
async fn name_conflict_regenerates() {
    let orch = FakeOrchestrator::new(true);
    orch.fail_next_create(OrchestratorError::AlreadyExists("taken".into()));
    let pool = spawn_pool(&orch, 1).await;
    settle().await;

    assert_eq!(pool.inspect().await.ready.len(), 1);
    // First generated name hit the conflict; a second was generated.
    assert_eq!(orch.created().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn preexisting_workers_are_adopted() {
    let orch = FakeOrchestrator::new(false);
    let name = WorkerName::new("cx-exec-leftover1");
    orch.set_worker(&name, WorkerPhase::Running, true);

    let pool = spawn_pool(&orch, 1).await;
    settle().await;

    let snapshot = pool.inspect().await;
    assert_eq!(snapshot.ready, vec!["cx-exec-leftover1".to_string()]);
    // Adopted supply covers the target; nothing new was created.
    assert!(orch.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn foreign_pods_are_ignored() {
    let orch = FakeOrchestrator::new(false);
    orch.set_worker(&WorkerName::new("unrelated-pod"), WorkerPhase::Running, true);
    let pool = spawn_pool(&orch, 0).await;
    settle().await;

    let snapshot = pool.inspect().await;
    assert!(snapshot.ready.is_empty());
    assert_eq!(snapshot.provisioning, 0);
}

#[tokio::test(start_paused = true)]
async fn watch_reconnect_relists_and_serves_waiters() {
    let orch = FakeOrchestrator::new(false);
    let pool = spawn_pool(&orch, 0).await;
    settle().await;

    let pool_w = pool.clone();
    let waiter = tokio::spawn(async move {
        pool_w.acquire(&ChatId::new("s1"), Duration::from_secs(120)).await
    });
    settle().await;

    // A worker becomes ready while the watch is down: the event is
    // lost, but the re-list snapshot after reconnect must recover it.
    orch.kill_watch();
    settle().await;
    let name = WorkerName::new("cx-exec-prewarm1");
    orch.set_worker(&name, WorkerPhase::Running, true);
    settle().await;

    assert!(orch.watch_count() >= 2, "watch was not restarted");
    assert_eq!(waiter.await.unwrap().unwrap(), name);
}

#[tokio::test(start_paused = true)]
async fn relist_forgets_workers_that_vanished_in_the_gap() {
    let orch = FakeOrchestrator::new(true);
    let pool = spawn_pool(&orch, 1).await;
    settle().await;
    let name = WorkerName::new(pool.inspect().await.ready[0].clone());

    orch.kill_watch();
    orch.remove_worker(&name);
    settle().await;

    let snapshot = pool.inspect().await;
    assert!(!snapshot.ready.contains(&name.as_str().to_string()));
    assert_eq!(snapshot.ready.len() + snapshot.provisioning, 1);
}

#[tokio::test(start_paused = true)]
async fn ordinary_release_of_a_long_warm_worker_is_deleted_once() {
    let orch = FakeOrchestrator::new(true);
    let clock = crucible_core::FakeClock::new();
    let mut cfg = config(1);
    cfg.stuck_timeout = Duration::from_secs(10);
    let pool =
        WorkerPool::spawn(orch.clone(), clock.clone(), cfg, pod_spec()).await.unwrap();
    settle().await;

    // The worker sits warm in the pool far past the stuck bound, then
    // serves a request. Delete confirmation never arrives, so it stays
    // Terminating across many ticks.
    clock.advance(Duration::from_secs(60));
    let worker = pool.acquire(&ChatId::new("s1"), Duration::from_secs(5)).await.unwrap();
    orch.hold_deletes();
    pool.release(worker.clone()).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let deletes = |orch: &FakeOrchestrator| {
        orch.deleted().iter().filter(|n| n.as_str() == worker.as_str()).count()
    };
    // Time in Terminating is still under the bound: one delete only,
    // regardless of how long the worker was warm beforehand.
    assert_eq!(deletes(&orch), 1);

    // Once it has genuinely been Terminating past the bound, the
    // reaper re-issues the delete (once per bound, not per tick).
    clock.advance(Duration::from_secs(11));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(deletes(&orch), 2);
}

#[tokio::test(start_paused = true)]
async fn stuck_provisioning_worker_is_force_deleted() {
    let orch = FakeOrchestrator::new(false);
    let clock = crucible_core::FakeClock::new();
    let mut cfg = config(1);
    cfg.stuck_timeout = Duration::from_secs(10);
    let pool =
        WorkerPool::spawn(orch.clone(), clock.clone(), cfg, pod_spec()).await.unwrap();
    settle().await;
    assert_eq!(pool.inspect().await.provisioning, 1);

    // Never becomes ready; the tick reaper fires once its age passes
    // the bound.
    clock.advance(Duration::from_secs(15));
    settle().await;
    assert!(!orch.deleted().is_empty());
}
