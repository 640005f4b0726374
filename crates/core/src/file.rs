// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! File-object model: content hashes and quota/expiry metadata.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encode the SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 hex digest of a blob's bytes; the primary key in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentHash::parse(&s).map_err(|e| serde::de::Error::custom(e.message().to_string()))
    }
}

impl ContentHash {
    /// Parse a client-supplied hash. Rejects anything that is not 64
    /// lowercase hex characters so hashes are safe to embed in paths
    /// and shell lines.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::invalid_argument(format!("invalid content hash: {:?}", s)))
        }
    }

    /// Hash a byte slice.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(sha256_hex(bytes))
    }

    /// Wrap an already-hex digest produced by our own hasher.
    pub fn from_digest(digest: sha2::digest::Output<Sha256>) -> Self {
        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First two hex characters, used to shard the blob directory.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-(tenant, filename, hash) metadata.
///
/// `remaining_downloads` is monotonically non-increasing; `None` means
/// unlimited. `expires_at = None` means never. Merging never extends
/// either policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub remaining_downloads: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl FileMetadata {
    pub fn new(
        size: u64,
        created_at: DateTime<Utc>,
        remaining_downloads: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self { size, created_at, remaining_downloads, expires_at }
    }

    /// Merge a re-upload of the same identity: minimum quota, earlier
    /// expiry. The original creation timestamp is kept.
    pub fn merge_strict(&mut self, incoming: &FileMetadata) {
        self.remaining_downloads = match (self.remaining_downloads, incoming.remaining_downloads) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        self.expires_at = match (self.expires_at, incoming.expires_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
    }

    /// Check that a read is currently allowed.
    pub fn check_available(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return Err(Error::expired(format!("expired at {}", expires_at)));
            }
        }
        if self.remaining_downloads == Some(0) {
            return Err(Error::quota_exhausted("remaining downloads is zero"));
        }
        Ok(())
    }

    /// Consume one download. Unlimited quota is untouched.
    pub fn decrement(&mut self) {
        if let Some(n) = self.remaining_downloads {
            self.remaining_downloads = Some(n.saturating_sub(1));
        }
    }

    /// Kill the entry: zero quota, expire immediately.
    pub fn expire_now(&mut self, now: DateTime<Utc>) {
        self.remaining_downloads = Some(0);
        self.expires_at = Some(now);
    }

    /// Whether the reclaimer may remove this entry.
    pub fn is_dead(&self, now: DateTime<Utc>) -> bool {
        self.remaining_downloads == Some(0)
            || self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
