// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! User-visible error taxonomy.
//!
//! Every fallible public operation in the broker resolves to one of these
//! kinds. Internal error chains (orchestrator, store, exec plumbing) are
//! flattened into a kind + message at the service boundary; a user
//! program's nonzero exit code is NOT an error and never appears here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a broker error, stable across surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed request: bad hash, missing chat_id, invalid schema.
    InvalidArgument,
    /// The pool could not produce a worker before the deadline.
    Unavailable,
    /// Requested files could not be materialized in the worker.
    WorkspaceProjectionFailed,
    /// Internal failure while running code (not the code's own exit).
    ExecutionFailed,
    /// Unknown blob or metadata entry.
    NotFound,
    /// Metadata indicates the entry expired.
    Expired,
    /// remaining_downloads reached zero.
    QuotaExhausted,
    /// Custom tool source failed to parse.
    InvalidTool,
    /// Custom tool return value failed to serialize.
    InvalidToolOutput,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::WorkspaceProjectionFailed => "workspace_projection_failed",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Expired => "expired",
            ErrorKind::QuotaExhausted => "quota_exhausted",
            ErrorKind::InvalidTool => "invalid_tool",
            ErrorKind::InvalidToolOutput => "invalid_tool_output",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A kind-tagged broker error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn projection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkspaceProjectionFailed, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Expired, message)
    }

    pub fn quota_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExhausted, message)
    }

    pub fn invalid_tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTool, message)
    }

    pub fn invalid_tool_output(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidToolOutput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
