// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! The orchestrator capability trait and its error taxonomy.

use crate::pod::WorkerPodSpec;
use async_trait::async_trait;
use crucible_core::{WorkerName, WorkerPhase};
use futures_util::stream::BoxStream;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// One observed worker: name plus last known phase and readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerObservation {
    pub name: WorkerName,
    pub phase: WorkerPhase,
    pub ready: bool,
}

/// An event on the worker watch stream.
///
/// After every (re)connect the stream emits a `Snapshot` of all
/// prefix-matching workers before any live event, so a consumer that
/// diffs snapshots against its tracked state never loses a transition
/// across a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Snapshot(Vec<WorkerObservation>),
    Applied(WorkerObservation),
    Deleted(WorkerName),
}

/// Collected output of a remote process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Errors from the orchestrator, tagged by kind so callers can decide
/// between retry (transient), regenerate-name (conflict) and fail.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("worker not found: {0}")]
    NotFound(String),
    #[error("worker name conflict: {0}")]
    AlreadyExists(String),
    #[error("transient orchestrator error: {0}")]
    Transient(String),
    #[error("exec transport error: {0}")]
    Exec(String),
    #[error("orchestrator error: {0}")]
    Fatal(String),
}

impl OrchestratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::Transient(_))
    }
}

/// Thin capability over the container orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    /// Submit a worker manifest. Non-blocking: the worker comes up later
    /// on the watch stream. A name conflict is fatal for this attempt;
    /// the caller regenerates the name.
    async fn create_worker(
        &self,
        name: &WorkerName,
        spec: &WorkerPodSpec,
    ) -> Result<(), OrchestratorError>;

    /// Infinite lazy stream of worker state transitions with re-list
    /// semantics (see [`WorkerEvent`]).
    async fn watch_workers(&self) -> Result<BoxStream<'static, WorkerEvent>, OrchestratorError>;

    /// Run `argv` inside the worker, streaming `stdin` in and collecting
    /// stdout/stderr until the remote process exits.
    async fn exec(
        &self,
        name: &WorkerName,
        argv: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, OrchestratorError>;

    /// Best-effort, idempotent delete. A missing worker is success.
    async fn delete_worker(&self, name: &WorkerName) -> Result<(), OrchestratorError>;
}

/// Retry `op` on transient errors with exponential backoff, bounded by
/// `deadline` measured from the first attempt.
pub async fn retry_transient<T, F, Fut>(deadline: Duration, mut op: F) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let started = Instant::now();
    let mut backoff = Duration::from_millis(100);
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && started.elapsed() + backoff < deadline => {
                tracing::debug!(error = %e, backoff_ms = backoff.as_millis() as u64, "retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
