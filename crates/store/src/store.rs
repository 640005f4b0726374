// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! The file object store: atomic put, quota-decrementing get, expire.

use crate::meta::{
    blob_path, lock_key, sidecar_path, validate_filename, validate_tenant, SidecarDoc,
};
use crucible_core::{Clock, ContentHash, Error, FileMetadata, TenantId};
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Quota and expiry policy for a `put`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    pub remaining_downloads: Option<u32>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Content-addressed blob + metadata store rooted at one directory.
///
/// All metadata mutations run under a per-identity async lock; blob
/// publication relies on same-filesystem atomic rename. The root is
/// guarded by an advisory file lock so two broker processes never share
/// a store.
pub struct FileStore<C: Clock> {
    pub(crate) root: PathBuf,
    pub(crate) clock: C,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    // Held for the lifetime of the store; dropping releases the lock.
    _root_lock: std::fs::File,
}

impl<C: Clock> FileStore<C> {
    /// Open (creating if needed) a store at `root`.
    pub fn open(root: impl Into<PathBuf>, clock: C) -> Result<Self, Error> {
        let root = root.into();
        for sub in ["blobs", "meta", "tmp"] {
            std::fs::create_dir_all(root.join(sub))?;
        }
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(".lock"))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::internal(format!("file store at {} is locked by another process", root.display()))
        })?;
        Ok(Self { root, clock, locks: Mutex::new(HashMap::new()), _root_lock: lock_file })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn lock_for(&self, key: String) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(key).or_default().clone()
    }

    /// Store a blob, streaming it to a temp file while hashing, then
    /// publish by atomic rename and write/merge the metadata sidecar.
    /// Idempotent on the blob; re-puts of the same identity only ever
    /// tighten quota and expiry.
    pub async fn put(
        &self,
        tenant: &TenantId,
        filename: &str,
        mut reader: impl AsyncRead + Unpin + Send,
        opts: PutOptions,
    ) -> Result<(ContentHash, FileMetadata), Error> {
        validate_tenant(tenant)?;
        validate_filename(filename)?;

        let tmp = self.root.join("tmp").join(format!("put-{}", nanoid::nanoid!(12)));
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        let written = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e),
            };
            hasher.update(&buf[..n]);
            size += n as u64;
            if let Err(e) = file.write_all(&buf[..n]).await {
                break Err(e);
            }
        };
        if let Err(e) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::internal(format!("upload stream aborted: {}", e)));
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let hash = ContentHash::from_digest(hasher.finalize());
        let blob = blob_path(&self.root, &hash);
        if blob.exists() {
            // Identical bytes already published.
            let _ = tokio::fs::remove_file(&tmp).await;
        } else {
            if let Some(parent) = blob.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&tmp, &blob).await?;
        }

        let incoming = FileMetadata::new(
            size,
            self.clock.now_utc(),
            opts.remaining_downloads,
            opts.expires_at,
        );
        let guard = self.lock_for(lock_key(tenant, filename, &hash));
        let _held = guard.lock().await;
        let path = sidecar_path(&self.root, tenant, filename, &hash);
        let metadata = match self.read_sidecar(&path).await? {
            Some(mut doc) => {
                doc.metadata.merge_strict(&incoming);
                self.write_sidecar(&path, &doc).await?;
                doc.metadata
            }
            None => {
                let doc = SidecarDoc {
                    tenant_id: tenant.as_str().to_string(),
                    filename: filename.to_string(),
                    content_hash: hash.clone(),
                    metadata: incoming.clone(),
                };
                self.write_sidecar(&path, &doc).await?;
                incoming
            }
        };
        tracing::debug!(tenant = %tenant, filename, hash = %hash, size, "stored file object");
        Ok((hash, metadata))
    }

    /// Read a blob after checking expiry and quota. With
    /// `decrement_quota` the remaining-downloads counter is consumed
    /// once the read has completed.
    pub async fn get(
        &self,
        tenant: &TenantId,
        filename: &str,
        hash: &ContentHash,
        decrement_quota: bool,
    ) -> Result<(Vec<u8>, FileMetadata), Error> {
        validate_tenant(tenant)?;
        validate_filename(filename)?;

        let guard = self.lock_for(lock_key(tenant, filename, hash));
        let _held = guard.lock().await;
        let path = sidecar_path(&self.root, tenant, filename, hash);
        let mut doc = self
            .read_sidecar(&path)
            .await?
            .ok_or_else(|| Error::not_found(format!("no such file: {}", filename)))?;
        doc.metadata.check_available(self.clock.now_utc())?;

        let bytes = match tokio::fs::read(blob_path(&self.root, hash)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("missing blob for {}", hash)));
            }
            Err(e) => return Err(e.into()),
        };
        if ContentHash::of_bytes(&bytes) != *hash {
            return Err(Error::internal(format!("blob corruption detected for {}", hash)));
        }

        if decrement_quota && doc.metadata.remaining_downloads.is_some() {
            doc.metadata.decrement();
            self.write_sidecar(&path, &doc).await?;
        }
        Ok((bytes, doc.metadata))
    }

    /// Fetch metadata without touching the quota.
    pub async fn metadata(
        &self,
        tenant: &TenantId,
        filename: &str,
        hash: &ContentHash,
    ) -> Result<FileMetadata, Error> {
        let guard = self.lock_for(lock_key(tenant, filename, hash));
        let _held = guard.lock().await;
        let path = sidecar_path(&self.root, tenant, filename, hash);
        self.read_sidecar(&path)
            .await?
            .map(|doc| doc.metadata)
            .ok_or_else(|| Error::not_found(format!("no such file: {}", filename)))
    }

    /// Kill an entry: zero quota, immediate expiry. Idempotent, also
    /// for entries that never existed.
    pub async fn expire(
        &self,
        tenant: &TenantId,
        filename: &str,
        hash: &ContentHash,
    ) -> Result<(), Error> {
        validate_tenant(tenant)?;
        validate_filename(filename)?;

        let guard = self.lock_for(lock_key(tenant, filename, hash));
        let _held = guard.lock().await;
        let path = sidecar_path(&self.root, tenant, filename, hash);
        if let Some(mut doc) = self.read_sidecar(&path).await? {
            doc.metadata.expire_now(self.clock.now_utc());
            self.write_sidecar(&path, &doc).await?;
        }
        Ok(())
    }

    pub(crate) async fn read_sidecar(&self, path: &Path) -> Result<Option<SidecarDoc>, Error> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::internal(format!("corrupt sidecar {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn write_sidecar(&self, path: &Path, doc: &SidecarDoc) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.root.join("tmp").join(format!("meta-{}", nanoid::nanoid!(12)));
        let bytes = serde_json::to_vec(doc)
            .map_err(|e| Error::internal(format!("sidecar serialization: {}", e)))?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
