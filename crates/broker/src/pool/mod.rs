// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Executor pool manager — a warm pool of single-use sandbox workers.
//!
//! All pool state is owned by one task; [`WorkerPool`] handles post
//! messages to it and await oneshot replies. The task consumes the
//! orchestrator watch stream, serves `acquire` waiters strictly FIFO,
//! replenishes toward the target after every state change, and
//! force-deletes workers stuck in `Provisioning` or `Terminating`.
//!
//! Workers are never recycled: `release` always destroys. That is what
//! makes the per-session isolation contract trivial to honor.

use crucible_core::{
    ChatId, Clock, Error, WorkerName, WorkerPhase, WorkerRecord, WorkerState,
};
use crucible_orchestrator::{
    retry_transient, Orchestrator, OrchestratorError, WorkerEvent, WorkerObservation,
    WorkerPodSpec,
};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Warm pool target length.
    pub target: usize,
    /// Worker name prefix.
    pub name_prefix: String,
    /// Bound on `Provisioning`/`Terminating` before force delete.
    pub stuck_timeout: Duration,
    /// Per-call deadline for retried create/delete calls.
    pub call_deadline: Duration,
    /// Cadence of the maintenance tick.
    pub tick_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target: 2,
            name_prefix: "cx-exec-".to_string(),
            stuck_timeout: Duration::from_secs(300),
            call_deadline: Duration::from_secs(30),
            tick_interval: Duration::from_secs(5),
        }
    }
}

enum PoolMsg {
    Acquire { waiter_id: u64, chat_id: ChatId, reply: oneshot::Sender<WorkerName> },
    CancelAcquire { waiter_id: u64 },
    Release { name: WorkerName },
    CreateFailed { name: WorkerName },
    #[cfg(test)]
    Inspect { reply: oneshot::Sender<PoolSnapshot> },
}

/// Counters and queues exposed to tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct PoolSnapshot {
    pub ready: Vec<String>,
    pub provisioning: usize,
    pub assigned: Vec<String>,
    pub terminating: usize,
    pub waiters: usize,
}

/// Handle to the pool task. Cheap to clone.
#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::Sender<PoolMsg>,
    waiter_seq: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Start the pool task against an orchestrator. Fails if the watch
    /// stream cannot be established at all.
    pub async fn spawn<O: Orchestrator, C: Clock>(
        orch: Arc<O>,
        clock: C,
        config: PoolConfig,
        pod_spec: WorkerPodSpec,
    ) -> Result<Self, Error> {
        let watch = orch
            .watch_workers()
            .await
            .map_err(|e| Error::internal(format!("cannot watch workers: {}", e)))?;
        let (tx, rx) = mpsc::channel(64);
        let task = PoolTask {
            orch,
            clock,
            config,
            pod_spec,
            tx: tx.downgrade(),
            workers: HashMap::new(),
            ready: VecDeque::new(),
            waiters: VecDeque::new(),
        };
        tokio::spawn(task.run(rx, watch));
        Ok(Self { tx, waiter_seq: Arc::new(AtomicU64::new(0)) })
    }

    /// Acquire a ready worker for `chat_id`, waiting at most `deadline`.
    /// Waiters are served strictly in call order.
    pub async fn acquire(&self, chat_id: &ChatId, deadline: Duration) -> Result<WorkerName, Error> {
        let waiter_id = self.waiter_seq.fetch_add(1, Ordering::Relaxed);
        let (reply, mut rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::Acquire { waiter_id, chat_id: chat_id.clone(), reply })
            .await
            .map_err(|_| Error::internal("worker pool is not running"))?;
        tokio::select! {
            result = &mut rx => match result {
                Ok(name) => Ok(name),
                Err(_) => Err(Error::internal("worker pool dropped the request")),
            },
            _ = tokio::time::sleep(deadline) => {
                // Close first so a hand-off racing the deadline either
                // lands in the channel (released below) or fails on the
                // pool side, which re-queues the worker. Either way no
                // worker leaks in `Assigned`.
                rx.close();
                if let Ok(name) = rx.try_recv() {
                    let _ = self.tx.send(PoolMsg::Release { name }).await;
                }
                let _ = self.tx.send(PoolMsg::CancelAcquire { waiter_id }).await;
                Err(Error::unavailable("no worker became ready before the deadline"))
            }
        }
    }

    /// Return a worker. Always destroys it; workers are single-use.
    pub async fn release(&self, name: WorkerName) {
        let _ = self.tx.send(PoolMsg::Release { name }).await;
    }

    #[cfg(test)]
    pub(crate) async fn inspect(&self) -> PoolSnapshot {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(PoolMsg::Inspect { reply }).await.is_err() {
            return PoolSnapshot::default();
        }
        rx.await.unwrap_or_default()
    }
}

struct PoolTask<O: Orchestrator, C: Clock> {
    orch: Arc<O>,
    clock: C,
    config: PoolConfig,
    pod_spec: WorkerPodSpec,
    /// For spawned create tasks to report back. Weak so the task's own
    /// channel does not keep itself alive after every handle is gone.
    tx: mpsc::WeakSender<PoolMsg>,
    workers: HashMap<String, WorkerRecord>,
    ready: VecDeque<WorkerName>,
    waiters: VecDeque<Waiter>,
}

struct Waiter {
    id: u64,
    chat_id: ChatId,
    reply: oneshot::Sender<WorkerName>,
}

impl<O: Orchestrator, C: Clock> PoolTask<O, C> {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<PoolMsg>,
        mut watch: BoxStream<'static, WorkerEvent>,
    ) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut watch_down = false;
        self.replenish();

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_msg(msg),
                    // Every handle dropped: the broker is shutting down.
                    None => break,
                },
                event = watch.next() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::warn!("worker watch stream ended");
                        watch = futures_util::stream::pending().boxed();
                        watch_down = true;
                    }
                },
                _ = tick.tick() => {
                    if watch_down {
                        match self.orch.watch_workers().await {
                            Ok(stream) => {
                                tracing::info!("worker watch stream restarted");
                                watch = stream;
                                watch_down = false;
                            }
                            Err(e) => tracing::warn!(error = %e, "watch restart failed"),
                        }
                    }
                    self.handle_tick();
                }
            }
        }
        tracing::info!("worker pool task stopped");
    }

    fn handle_msg(&mut self, msg: PoolMsg) {
        match msg {
            PoolMsg::Acquire { waiter_id, chat_id, reply } => {
                self.waiters.push_back(Waiter { id: waiter_id, chat_id, reply });
                self.serve_waiters();
            }
            PoolMsg::CancelAcquire { waiter_id } => {
                self.waiters.retain(|w| w.id != waiter_id);
            }
            PoolMsg::Release { name } => {
                let now = self.clock.now();
                if let Some(record) = self.workers.get_mut(name.as_str()) {
                    if record.transition(WorkerState::Terminating, now) {
                        self.spawn_delete(name);
                    }
                } else {
                    // A canceled acquire can release a worker we already
                    // forgot; the delete is idempotent anyway.
                    self.spawn_delete(name);
                }
                self.replenish();
            }
            PoolMsg::CreateFailed { name } => {
                self.worker_gone(&name);
            }
            #[cfg(test)]
            PoolMsg::Inspect { reply } => {
                let mut snapshot = PoolSnapshot {
                    ready: self.ready.iter().map(|n| n.as_str().to_string()).collect(),
                    waiters: self.waiters.len(),
                    ..PoolSnapshot::default()
                };
                for record in self.workers.values() {
                    match record.state {
                        WorkerState::Provisioning => snapshot.provisioning += 1,
                        WorkerState::Assigned => {
                            snapshot.assigned.push(record.name.as_str().to_string())
                        }
                        WorkerState::Terminating => snapshot.terminating += 1,
                        _ => {}
                    }
                }
                let _ = reply.send(snapshot);
            }
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Snapshot(observations) => {
                // Re-list: anything tracked but absent from the snapshot
                // disappeared while the watch was down. Provisioning
                // workers are exempt — their create may still be in
                // flight and not listed yet; the stuck timer reaps them
                // if they never materialize.
                let seen: std::collections::HashSet<&str> =
                    observations.iter().map(|o| o.name.as_str()).collect();
                let lost: Vec<WorkerName> = self
                    .workers
                    .values()
                    .filter(|r| {
                        r.state != WorkerState::Provisioning && !seen.contains(r.name.as_str())
                    })
                    .map(|r| r.name.clone())
                    .collect();
                for name in lost {
                    tracing::info!(worker = %name, "worker vanished during watch gap");
                    self.worker_gone(&name);
                }
                for obs in observations {
                    self.apply_observation(obs);
                }
            }
            WorkerEvent::Applied(obs) => self.apply_observation(obs),
            WorkerEvent::Deleted(name) => self.worker_gone(&name),
        }
        self.replenish();
    }

    fn apply_observation(&mut self, obs: WorkerObservation) {
        if !obs.name.has_prefix(&self.config.name_prefix) {
            return;
        }
        let now = self.clock.now();
        let record = self
            .workers
            .entry(obs.name.as_str().to_string())
            .or_insert_with(|| {
                tracing::info!(worker = %obs.name, "adopting untracked worker");
                WorkerRecord::new(obs.name.clone(), now)
            });
        record.last_phase = Some(obs.phase);

        if obs.phase.is_terminal() {
            let name = obs.name.clone();
            self.worker_gone(&name);
            return;
        }
        if obs.phase == WorkerPhase::Running
            && obs.ready
            && record.state == WorkerState::Provisioning
        {
            record.transition(WorkerState::Ready, now);
            tracing::info!(worker = %obs.name, "worker ready");
            self.ready.push_back(obs.name);
            self.serve_waiters();
        }
    }

    /// Forget a worker entirely, cleaning the ready queue. The tracker
    /// entry is dropped; `Gone` is terminal.
    fn worker_gone(&mut self, name: &WorkerName) {
        if let Some(mut record) = self.workers.remove(name.as_str()) {
            let was = record.state;
            record.transition(WorkerState::Gone, self.clock.now());
            self.ready.retain(|n| n != name);
            tracing::info!(worker = %name, from = ?was, "worker gone");
        }
        self.replenish();
    }

    /// Hand ready workers to waiters, FIFO on both sides. A waiter
    /// whose receiver is already dropped (deadline raced the hand-off)
    /// is skipped; the worker stays at the front of the queue.
    fn serve_waiters(&mut self) {
        let now = self.clock.now();
        while !self.waiters.is_empty() && !self.ready.is_empty() {
            let Some(name) = self.ready.pop_front() else { return };
            loop {
                let Some(waiter) = self.waiters.pop_front() else {
                    self.ready.push_front(name);
                    return;
                };
                let chat_id = waiter.chat_id.clone();
                if waiter.reply.send(name.clone()).is_ok() {
                    if let Some(record) = self.workers.get_mut(name.as_str()) {
                        record.transition(WorkerState::Assigned, now);
                        record.chat_id = Some(chat_id);
                    }
                    break;
                }
            }
        }
    }

    /// Create workers until `Provisioning + Ready` meets the target.
    /// `Assigned` workers are single-use and never come back, so they
    /// do not count as supply.
    fn replenish(&mut self) {
        let supply = self
            .workers
            .values()
            .filter(|r| {
                matches!(r.state, WorkerState::Provisioning | WorkerState::Ready)
            })
            .count();
        let deficit = self.config.target.saturating_sub(supply);
        for _ in 0..deficit {
            let name = WorkerName::generate(&self.config.name_prefix);
            self.workers.insert(
                name.as_str().to_string(),
                WorkerRecord::new(name.clone(), self.clock.now()),
            );
            self.spawn_create(name);
        }
    }

    fn spawn_create(&self, name: WorkerName) {
        let orch = self.orch.clone();
        let spec = self.pod_spec.clone();
        let deadline = self.config.call_deadline;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result =
                retry_transient(deadline, || orch.create_worker(&name, &spec)).await;
            match result {
                Ok(()) => {}
                Err(e) => {
                    if matches!(e, OrchestratorError::AlreadyExists(_)) {
                        // Fatal for this attempt; replenishment
                        // regenerates a fresh name.
                        tracing::warn!(worker = %name, "worker name conflict, regenerating");
                    } else {
                        tracing::error!(worker = %name, error = %e, "worker creation failed");
                    }
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(PoolMsg::CreateFailed { name }).await;
                    }
                }
            }
        });
    }

    fn spawn_delete(&self, name: WorkerName) {
        let orch = self.orch.clone();
        let deadline = self.config.call_deadline;
        tokio::spawn(async move {
            if let Err(e) = retry_transient(deadline, || orch.delete_worker(&name)).await {
                // The stuck-state tick will retry.
                tracing::warn!(worker = %name, error = %e, "worker delete failed");
            }
        });
    }

    /// Periodic maintenance: force-delete stuck workers, retry deletes,
    /// top up the pool after failed creations. Stuckness is measured
    /// from when the state was entered, so an ordinary release of a
    /// long-warm worker is never flagged.
    fn handle_tick(&mut self) {
        let now = self.clock.now();
        let stuck: Vec<WorkerName> = self
            .workers
            .values()
            .filter(|r| {
                matches!(r.state, WorkerState::Provisioning | WorkerState::Terminating)
                    && r.in_state_for(now) > self.config.stuck_timeout
            })
            .map(|r| r.name.clone())
            .collect();
        for name in stuck {
            if let Some(record) = self.workers.get_mut(name.as_str()) {
                tracing::warn!(worker = %name, state = ?record.state, "force-deleting stuck worker");
                if !record.transition(WorkerState::Terminating, now) {
                    // Already Terminating: re-arm the timer so the
                    // delete retries once per bound, not every tick.
                    record.state_entered_at = now;
                }
                self.spawn_delete(name);
            }
        }
        self.replenish();
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
