// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Background reclamation: dead metadata first, then orphaned blobs.

use crate::meta::{lock_key, SidecarDoc};
use crate::store::FileStore;
use crucible_core::{Clock, ContentHash, Error, TenantId};
use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Counters from one reclamation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    pub metadata_removed: usize,
    pub blobs_removed: usize,
    pub tmp_removed: usize,
}

impl<C: Clock> FileStore<C> {
    /// Sweep the store. `grace` protects files younger than the window
    /// from deletion: a blob published by an in-flight `put` whose
    /// sidecar is not yet on disk looks orphaned, and tmp files may
    /// still be receiving bytes.
    pub async fn reclaim(&self, grace: Duration) -> Result<ReclaimStats, Error> {
        let mut stats = ReclaimStats::default();
        let now = self.clock.now_utc();

        // Phase 1: drop dead metadata, collecting the live hash set.
        let mut live: HashSet<String> = HashSet::new();
        let meta_root = self.root.join("meta");
        let mut tenants = tokio::fs::read_dir(&meta_root).await?;
        while let Some(tenant_dir) = tenants.next_entry().await? {
            let mut entries = tokio::fs::read_dir(tenant_dir.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let doc = match self.read_sidecar(&path).await {
                    Ok(Some(doc)) => doc,
                    Ok(None) => continue,
                    Err(e) => {
                        // Unreadable sidecar: keep it and its blob, let an
                        // operator look.
                        tracing::warn!(path = %path.display(), error = %e, "skipping sidecar");
                        continue;
                    }
                };
                if doc.metadata.is_dead(now) {
                    if self.remove_if_still_dead(&path, &doc).await? {
                        stats.metadata_removed += 1;
                        continue;
                    }
                }
                live.insert(doc.content_hash.as_str().to_string());
            }
        }

        // Phase 2: drop blobs no live sidecar references, sparing young
        // ones that may belong to an in-flight put.
        let blob_root = self.root.join("blobs");
        let mut shards = tokio::fs::read_dir(&blob_root).await?;
        while let Some(shard) = shards.next_entry().await? {
            let mut entries = tokio::fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if live.contains(&name) || is_younger_than(&entry.path(), grace) {
                    continue;
                }
                if ContentHash::parse(&name).is_err() {
                    tracing::warn!(blob = %name, "foreign file in blob directory");
                    continue;
                }
                tokio::fs::remove_file(entry.path()).await?;
                stats.blobs_removed += 1;
            }
        }

        // Phase 3: stale tmp files from aborted uploads.
        let mut entries = tokio::fs::read_dir(self.root.join("tmp")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !is_younger_than(&entry.path(), grace) {
                tokio::fs::remove_file(entry.path()).await?;
                stats.tmp_removed += 1;
            }
        }

        if stats != ReclaimStats::default() {
            tracing::info!(
                metadata = stats.metadata_removed,
                blobs = stats.blobs_removed,
                tmp = stats.tmp_removed,
                "reclaimed store garbage"
            );
        }
        Ok(stats)
    }

    /// Re-check deadness under the identity lock before removing, so a
    /// concurrent put that just revived the identity is not clobbered.
    async fn remove_if_still_dead(&self, path: &Path, doc: &SidecarDoc) -> Result<bool, Error> {
        let tenant = TenantId::new(doc.tenant_id.clone());
        let guard = self.lock_for(lock_key(&tenant, &doc.filename, &doc.content_hash));
        let _held = guard.lock().await;
        match self.read_sidecar(path).await? {
            Some(current) if current.metadata.is_dead(self.clock.now_utc()) => {
                tokio::fs::remove_file(path).await?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }

    /// Sanity check that a blob path still resolves for a live doc.
    #[cfg(test)]
    pub(crate) fn blob_exists(&self, hash: &ContentHash) -> bool {
        crate::meta::blob_path(&self.root, hash).exists()
    }
}

fn is_younger_than(path: &Path, grace: Duration) -> bool {
    if grace.is_zero() {
        return false;
    }
    let Ok(meta) = std::fs::metadata(path) else {
        return true;
    };
    let Ok(modified) = meta.modified() else {
        return true;
    };
    SystemTime::now().duration_since(modified).map(|age| age < grace).unwrap_or(true)
}

#[cfg(test)]
#[path = "reclaim_tests.rs"]
mod tests;
