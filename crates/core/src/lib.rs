// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! crucible-core: shared vocabulary for the Crucible execution broker
//!
//! Identifiers, the clock abstraction, the user-visible error taxonomy,
//! the worker state machine, and the file-object metadata model. Every
//! other crate in the workspace depends on this one and nothing here
//! touches the network or the filesystem.

pub mod clock;
pub mod error;
pub mod file;
pub mod ident;
pub mod worker;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{Error, ErrorKind};
pub use file::{sha256_hex, ContentHash, FileMetadata};
pub use ident::{ChatId, TenantId, WorkerName};
pub use worker::{WorkerPhase, WorkerRecord, WorkerState};
