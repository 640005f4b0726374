// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! crucible-store: content-addressed file object store.
//!
//! Blobs live under `blobs/<shard>/<hash>`, published by atomic rename;
//! per-(tenant, filename, hash) metadata sidecars live under
//! `meta/<tenant>/`. Blob bytes are immutable; metadata carries the
//! download quota and expiry and only ever tightens on merge.

pub mod meta;
pub mod reclaim;
pub mod store;

pub use meta::SidecarDoc;
pub use reclaim::ReclaimStats;
pub use store::{FileStore, PutOptions};
