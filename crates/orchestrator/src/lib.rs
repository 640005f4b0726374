// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! crucible-orchestrator: thin capability over the container orchestrator.
//!
//! The [`Orchestrator`] trait covers the four verbs the broker needs
//! (create, watch, exec-in, delete) plus the shell-level workspace file
//! protocol built on exec. The Kubernetes implementation lives in
//! [`kube`]; the pool and session managers only ever see the trait.

pub mod client;
pub mod fsio;
pub mod kube;
pub mod pod;

pub use client::{
    retry_transient, ExecOutput, Orchestrator, OrchestratorError, WorkerEvent, WorkerObservation,
};
pub use kube::KubeOrchestrator;
pub use pod::WorkerPodSpec;
