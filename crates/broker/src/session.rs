// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Session workspace manager.
//!
//! Projects a declared `{path → hash}` file set into a worker's
//! `/workspace` as a set-diff against what is already there, and
//! extracts the post-execution workspace back into the file store.
//! Projection reads never consume download quota; extraction hashes
//! every streamed file itself so returned hashes are always the SHA-256
//! of the bytes.

use crucible_core::{Clock, ContentHash, Error, FileMetadata, TenantId, WorkerName};
use crucible_orchestrator::{fsio, retry_transient, ExecOutput, Orchestrator};
use crucible_store::{FileStore, PutOptions};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Result of workspace extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractResult {
    /// Every file in the post-execution workspace, absolute path → hash.
    pub files: BTreeMap<String, ContentHash>,
    /// Store metadata for files extraction actually persisted.
    pub files_metadata: BTreeMap<String, FileMetadata>,
}

/// Policy applied to files persisted during extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractPolicy {
    pub put: PutOptions,
    /// Cumulative byte limit on extracted output.
    pub size_limit: u64,
}

pub struct WorkspaceManager<O: Orchestrator, C: Clock> {
    orch: Arc<O>,
    store: Arc<FileStore<C>>,
    /// Deadline for each retried exec against the worker.
    call_deadline: Duration,
}

impl<O: Orchestrator, C: Clock> WorkspaceManager<O, C> {
    pub fn new(orch: Arc<O>, store: Arc<FileStore<C>>, call_deadline: Duration) -> Self {
        Self { orch, store, call_deadline }
    }

    /// One workspace I/O exec, retried on transient orchestrator errors
    /// within the call deadline. Safe to repeat: every fsio command is
    /// idempotent.
    async fn exec(
        &self,
        worker: &WorkerName,
        argv: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, crucible_orchestrator::OrchestratorError> {
        retry_transient(self.call_deadline, || self.orch.exec(worker, argv, stdin)).await
    }

    /// Make `worker:/workspace` contain exactly `requested` (by
    /// content). With `persistent` set, paths outside the requested set
    /// are left in place instead of removed.
    ///
    /// Keys of `requested` are workspace-relative. The caller destroys
    /// the worker if this fails partway; no cleanup happens here.
    pub async fn project(
        &self,
        worker: &WorkerName,
        tenant: &TenantId,
        requested: &BTreeMap<String, ContentHash>,
        persistent: bool,
    ) -> Result<(), Error> {
        for path in requested.keys() {
            fsio::validate_rel_path(path)?;
        }
        let current = self
            .list(worker)
            .await
            .map_err(|e| Error::projection(format!("workspace listing failed: {}", e)))?;

        if !persistent {
            for path in current.keys().filter(|p| !requested.contains_key(*p)) {
                let out = self
                    .exec(worker, &fsio::remove_cmd(path), None)
                    .await
                    .map_err(|e| Error::projection(format!("remove {}: {}", path, e)))?;
                if !out.success() {
                    return Err(Error::projection(format!(
                        "remove {}: {}",
                        path,
                        out.stderr_lossy()
                    )));
                }
            }
        }

        for (path, hash) in requested {
            if current.get(path) == Some(hash) {
                // Content-addressed: identical hash means identical
                // bytes, nothing to transfer.
                continue;
            }
            let (bytes, _) = self
                .store
                .get(tenant, path, hash, false)
                .await
                .map_err(|e| Error::projection(format!("fetch {}: {}", path, e)))?;
            let out = self
                .exec(worker, &fsio::write_cmd(path), Some(&bytes))
                .await
                .map_err(|e| Error::projection(format!("write {}: {}", path, e)))?;
            if !out.success() {
                return Err(Error::projection(format!("write {}: {}", path, out.stderr_lossy())));
            }
        }
        tracing::debug!(worker = %worker, files = requested.len(), "workspace projected");
        Ok(())
    }

    /// Upload the post-execution workspace. Files whose hash matches
    /// the projected set are listed but not re-stored; everything else
    /// is streamed out, hashed and put under the request's policy.
    pub async fn extract(
        &self,
        worker: &WorkerName,
        tenant: &TenantId,
        requested: &BTreeMap<String, ContentHash>,
        policy: ExtractPolicy,
    ) -> Result<ExtractResult, Error> {
        let listing = self
            .list(worker)
            .await
            .map_err(|e| Error::execution(format!("workspace listing failed: {}", e)))?;

        let mut result = ExtractResult::default();
        let mut extracted_bytes: u64 = 0;
        for (path, listed_hash) in listing {
            if requested.get(&path) == Some(&listed_hash) {
                result.files.insert(fsio::to_absolute(&path), listed_hash);
                continue;
            }
            let out = self
                .exec(worker, &fsio::read_cmd(&path), None)
                .await
                .map_err(|e| Error::execution(format!("read {}: {}", path, e)))?;
            if !out.success() {
                return Err(Error::execution(format!("read {}: {}", path, out.stderr_lossy())));
            }
            extracted_bytes += out.stdout.len() as u64;
            if policy.size_limit > 0 && extracted_bytes > policy.size_limit {
                return Err(Error::execution(format!(
                    "workspace output exceeds the {} byte limit",
                    policy.size_limit
                )));
            }
            let (hash, metadata) =
                self.store.put(tenant, &path, &out.stdout[..], policy.put).await?;
            let abs = fsio::to_absolute(&path);
            result.files.insert(abs.clone(), hash);
            result.files_metadata.insert(abs, metadata);
        }
        tracing::debug!(
            worker = %worker,
            files = result.files.len(),
            stored = result.files_metadata.len(),
            "workspace extracted"
        );
        Ok(result)
    }

    async fn list(&self, worker: &WorkerName) -> Result<BTreeMap<String, ContentHash>, Error> {
        let out = self
            .exec(worker, &fsio::list_cmd(), None)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;
        if !out.success() {
            return Err(Error::internal(out.stderr_lossy()));
        }
        fsio::parse_listing(&String::from_utf8_lossy(&out.stdout))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
