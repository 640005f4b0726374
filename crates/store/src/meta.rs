// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Metadata sidecar documents and their on-disk naming.

use crucible_core::{ContentHash, Error, FileMetadata, TenantId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One metadata sidecar: full identity plus the quota/expiry state.
///
/// The identity is duplicated inside the document so the reclaimer never
/// has to decode sidecar file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarDoc {
    pub tenant_id: String,
    pub filename: String,
    pub content_hash: ContentHash,
    #[serde(flatten)]
    pub metadata: FileMetadata,
}

/// Validate a client-supplied filename for use as a store key.
///
/// Workspace-produced artifacts keep their relative path as the
/// filename, so `/` is allowed; it is encoded away on disk.
pub fn validate_filename(filename: &str) -> Result<(), Error> {
    if filename.is_empty() || filename.len() > 512 {
        return Err(Error::invalid_argument(format!("bad filename: {:?}", filename)));
    }
    if filename.bytes().any(|b| b == 0 || b == b'\n' || b == b'\r') {
        return Err(Error::invalid_argument("filename contains control bytes"));
    }
    if filename.starts_with('/') || filename.split('/').any(|seg| seg.is_empty() || seg == "..") {
        return Err(Error::invalid_argument(format!("bad filename: {:?}", filename)));
    }
    Ok(())
}

/// Validate a tenant id before it becomes a directory name.
pub fn validate_tenant(tenant: &TenantId) -> Result<(), Error> {
    let s = tenant.as_str();
    if s.is_empty()
        || s.len() > 256
        || !s.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        || s == "."
        || s == ".."
    {
        return Err(Error::invalid_argument(format!("bad chat id: {:?}", s)));
    }
    Ok(())
}

/// Percent-encode a filename into a single path component.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02x}", b));
        }
    }
    out
}

/// In-process lock key for a metadata identity.
pub(crate) fn lock_key(tenant: &TenantId, filename: &str, hash: &ContentHash) -> String {
    format!("{}/{}__{}", tenant.as_str(), hash.as_str(), filename)
}

/// Sidecar path: `meta/<tenant>/<hash>__<encoded filename>.json`.
pub(crate) fn sidecar_path(
    root: &Path,
    tenant: &TenantId,
    filename: &str,
    hash: &ContentHash,
) -> PathBuf {
    root.join("meta")
        .join(tenant.as_str())
        .join(format!("{}__{}.json", hash.as_str(), encode_component(filename)))
}

/// Blob path: `blobs/<first two hex>/<hash>`.
pub(crate) fn blob_path(root: &Path, hash: &ContentHash) -> PathBuf {
    root.join("blobs").join(hash.shard()).join(hash.as_str())
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod tests;
