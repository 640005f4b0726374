// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Worker state machine data.
//!
//! ```text
//! Provisioning --ready-->  Ready --acquire--> Assigned --release--> Terminating --gone--> Gone
//!      \                     \                    \
//!       ---------failure-----------------failure--------> Gone
//! ```
//!
//! Transitions are monotonic toward `Gone`; the pool task is the only
//! mutator. A worker is single-use: once `Assigned` it never returns to
//! `Ready`.

use crate::ident::{ChatId, WorkerName};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Last phase observed from the orchestrator for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerPhase {
    /// Scheduled but not all containers running yet.
    Pending,
    /// All containers running.
    Running,
    /// Exited cleanly.
    Succeeded,
    /// Exited with failure or was evicted.
    Failed,
    /// Phase could not be determined.
    Unknown,
}

impl WorkerPhase {
    /// Whether this phase means the worker can never serve a request.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerPhase::Succeeded | WorkerPhase::Failed)
    }
}

/// Lifecycle state of a tracked worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created in the orchestrator, not yet running.
    Provisioning,
    /// Running and idle in the warm pool.
    Ready,
    /// Bound to exactly one in-flight request.
    Assigned,
    /// Delete issued, waiting for the orchestrator to confirm.
    Terminating,
    /// Fully gone; the tracker entry can be dropped.
    Gone,
}

impl WorkerState {
    fn rank(self) -> u8 {
        match self {
            WorkerState::Provisioning => 0,
            WorkerState::Ready => 1,
            WorkerState::Assigned => 2,
            WorkerState::Terminating => 3,
            WorkerState::Gone => 4,
        }
    }
}

/// A tracked worker. In-memory only; rebuilt from the watch stream after
/// a broker restart (restart adoption).
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub name: WorkerName,
    pub state: WorkerState,
    pub created_at: Instant,
    /// When the current state was entered. Stuck detection compares
    /// against this, not `created_at`, so a long warm pool stay never
    /// counts against a later state.
    pub state_entered_at: Instant,
    /// Last phase reported by the orchestrator, if any.
    pub last_phase: Option<WorkerPhase>,
    /// Session binding, set when `Assigned`.
    pub chat_id: Option<ChatId>,
}

impl WorkerRecord {
    pub fn new(name: WorkerName, created_at: Instant) -> Self {
        Self {
            name,
            state: WorkerState::Provisioning,
            created_at,
            state_entered_at: created_at,
            last_phase: None,
            chat_id: None,
        }
    }

    /// Apply a transition if it moves forward; returns false for
    /// backward or same-state transitions, which callers treat as stale
    /// events and drop. A successful transition restarts the state
    /// timer.
    pub fn transition(&mut self, to: WorkerState, now: Instant) -> bool {
        if to.rank() <= self.state.rank() {
            return false;
        }
        self.state = to;
        self.state_entered_at = now;
        if to == WorkerState::Gone {
            self.chat_id = None;
        }
        true
    }

    /// How long the worker has been in its current state.
    pub fn in_state_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.state_entered_at)
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
