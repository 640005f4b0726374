// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Workspace file I/O protocol: shell command construction and output
//! parsing for exec-based file transfer.
//!
//! Everything here is pure. The session manager pairs these commands
//! with [`Orchestrator::exec`](crate::Orchestrator::exec); stdin/stdout
//! of the remote shell carry the raw bytes, so transfers are binary-safe
//! without base64.

use crucible_core::{ContentHash, Error};
use std::collections::BTreeMap;

/// Root of the per-session filesystem inside a worker.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Validate a workspace-relative path before it is embedded in a shell
/// line or returned to a client. Rejects absolute paths, `..` segments,
/// and bytes that would break line-oriented parsing.
pub fn validate_rel_path(path: &str) -> Result<(), Error> {
    if path.is_empty() || path.len() > 1024 {
        return Err(Error::invalid_argument(format!("bad workspace path: {:?}", path)));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(Error::invalid_argument(format!("path must be relative: {:?}", path)));
    }
    if path.bytes().any(|b| b == 0 || b == b'\n' || b == b'\r') {
        return Err(Error::invalid_argument("path contains control bytes"));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(Error::invalid_argument(format!("path escapes workspace: {:?}", path)));
    }
    Ok(())
}

/// Strip the workspace prefix from a client-facing absolute path.
pub fn to_relative(path: &str) -> Result<String, Error> {
    let rel = path.strip_prefix("/workspace/").unwrap_or(path);
    validate_rel_path(rel)?;
    Ok(rel.to_string())
}

/// Client-facing absolute form of a workspace-relative path.
pub fn to_absolute(rel: &str) -> String {
    format!("{}/{}", WORKSPACE_DIR, rel)
}

/// Single-quote `s` for POSIX sh.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

fn sh(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

/// Hash every regular file under the workspace, one `hash  ./path` line
/// per file. An absent workspace lists as empty rather than failing.
pub fn list_cmd() -> Vec<String> {
    sh(format!(
        "cd {dir} 2>/dev/null || exit 0; find . -type f -exec sha256sum {{}} +",
        dir = WORKSPACE_DIR
    ))
}

/// Write stdin to a workspace file, creating parent directories.
pub fn write_cmd(rel: &str) -> Vec<String> {
    let target = quote(&to_absolute(rel));
    sh(format!("mkdir -p -- \"$(dirname {target})\" && cat > {target}", target = target))
}

/// Stream a workspace file to stdout.
pub fn read_cmd(rel: &str) -> Vec<String> {
    sh(format!("cat -- {}", quote(&to_absolute(rel))))
}

/// Remove a workspace file.
pub fn remove_cmd(rel: &str) -> Vec<String> {
    sh(format!("rm -f -- {}", quote(&to_absolute(rel))))
}

/// Parse `sha256sum` listing output into `{relative path → hash}`.
///
/// `sha256sum` separates hash and path with two spaces (or space-star
/// for binary mode); paths come back `./`-prefixed from `find`.
pub fn parse_listing(stdout: &str) -> Result<BTreeMap<String, ContentHash>, Error> {
    let mut files = BTreeMap::new();
    for line in stdout.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (hash_part, path_part) = line
            .split_once("  ")
            .or_else(|| line.split_once(" *"))
            .ok_or_else(|| Error::internal(format!("unparseable listing line: {:?}", line)))?;
        let rel = path_part.strip_prefix("./").unwrap_or(path_part);
        validate_rel_path(rel)
            .map_err(|_| Error::internal(format!("listing produced bad path: {:?}", rel)))?;
        files.insert(rel.to_string(), ContentHash::parse(hash_part)?);
    }
    Ok(files)
}

#[cfg(test)]
#[path = "fsio_tests.rs"]
mod tests;
