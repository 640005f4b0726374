// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Code execution service: orchestrates pool, workspace manager, store
//! and the custom-tool pipeline to satisfy one request.
//!
//! The user program's exit code is data, not an error: a request that
//! ran code to completion is a success whatever the code returned.

use crate::config::Config;
use crate::pool::WorkerPool;
use crate::session::{ExtractPolicy, WorkspaceManager};
use crate::tool::{self, EnumRegistry};
use crucible_core::{
    ChatId, Clock, ContentHash, Error, FileMetadata, TenantId, WorkerName,
};
use crucible_orchestrator::{fsio, retry_transient, ExecOutput, Orchestrator};
use crucible_store::{FileStore, PutOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Appended to stdout/stderr cut off at the configured byte limit.
pub const TRUNCATION_SENTINEL: &str = "\n[output truncated]";

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub source_code: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub persistent_workspace: bool,
    #[serde(default)]
    pub max_downloads: Option<u32>,
    #[serde(default)]
    pub expires_days: Option<u64>,
    #[serde(default)]
    pub expires_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub files: BTreeMap<String, String>,
    pub files_metadata: BTreeMap<String, FileMetadata>,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub file_hash: String,
    pub filename: String,
    pub chat_id: String,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParseToolResponse {
    pub tool_name: String,
    pub tool_input_schema_json: String,
    pub tool_description: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolOutputResponse {
    pub tool_output_json: String,
}

pub struct ExecutionService<O: Orchestrator, C: Clock> {
    pool: WorkerPool,
    workspace: WorkspaceManager<O, C>,
    orch: Arc<O>,
    store: Arc<FileStore<C>>,
    clock: C,
    config: Config,
    enums: EnumRegistry,
}

impl<O: Orchestrator, C: Clock> ExecutionService<O, C> {
    pub fn new(
        pool: WorkerPool,
        orch: Arc<O>,
        store: Arc<FileStore<C>>,
        clock: C,
        config: Config,
    ) -> Self {
        Self {
            workspace: WorkspaceManager::new(
                orch.clone(),
                store.clone(),
                config.orchestrator_deadline,
            ),
            pool,
            orch,
            store,
            clock,
            config,
            enums: EnumRegistry::default(),
        }
    }

    pub fn store(&self) -> &Arc<FileStore<C>> {
        &self.store
    }

    /// Run one execute request end to end.
    pub async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteResponse, Error> {
        let chat = self.resolve_chat(req.chat_id.as_deref())?;
        let tenant = TenantId::from(&chat);
        let requested = parse_file_map(&req.files)?;
        let env = validated_env(&req.env)?;
        let policy = ExtractPolicy {
            put: self.put_options(req.max_downloads, req.expires_days, req.expires_seconds),
            size_limit: self.config.workspace_size_limit,
        };

        let worker = self.pool.acquire(&chat, self.config.acquire_deadline).await?;
        tracing::info!(chat = %chat, worker = %worker, "executing request");
        let result = self
            .run_in_worker(&worker, &tenant, &req, &requested, &env, policy)
            .await;
        self.pool.release(worker).await;

        let (output, extract) = result?;
        Ok(ExecuteResponse {
            stdout: self.bounded(&output.stdout),
            stderr: self.bounded(&output.stderr),
            exit_code: output.exit_code,
            files: extract.files.iter().map(|(p, h)| (p.clone(), h.to_string())).collect(),
            files_metadata: extract.files_metadata,
            chat_id: chat.as_str().to_string(),
        })
    }

    async fn run_in_worker(
        &self,
        worker: &WorkerName,
        tenant: &TenantId,
        req: &ExecuteRequest,
        requested: &BTreeMap<String, ContentHash>,
        env: &[(String, String)],
        policy: ExtractPolicy,
    ) -> Result<(ExecOutput, crate::session::ExtractResult), Error> {
        self.workspace
            .project(worker, tenant, requested, req.persistent_workspace)
            .await?;
        let output = self.run_python(worker, &req.source_code, env).await?;
        let extract = self.workspace.extract(worker, tenant, requested, policy).await?;
        Ok((output, extract))
    }

    /// Feed a program to the worker's interpreter on stdin with the
    /// request environment merged in. The worker is destroyed by the
    /// caller on timeout, which tears the exec stream down with it.
    async fn run_python(
        &self,
        worker: &WorkerName,
        code: &str,
        env: &[(String, String)],
    ) -> Result<ExecOutput, Error> {
        let mut argv = Vec::with_capacity(env.len() + 3);
        if !env.is_empty() {
            argv.push("env".to_string());
            argv.extend(env.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        argv.push("python3".to_string());
        argv.push("-".to_string());

        // Transient connect failures are retried within the call; a
        // failure mid-stream is not, since the code may already have run.
        let exec = retry_transient(self.config.orchestrator_deadline, || {
            self.orch.exec(worker, &argv, Some(code.as_bytes()))
        });
        match tokio::time::timeout(self.config.exec_timeout, exec).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::execution(format!("exec failed: {}", e))),
            Err(_) => Err(Error::execution(format!(
                "execution exceeded {}s",
                self.config.exec_timeout.as_secs()
            ))),
        }
    }

    /// Store an uploaded file under the session tenant.
    pub async fn upload(
        &self,
        chat_id: Option<&str>,
        filename: &str,
        bytes: &[u8],
        max_downloads: Option<u32>,
        expires_days: Option<u64>,
        expires_seconds: Option<u64>,
    ) -> Result<UploadResponse, Error> {
        let chat = self.resolve_chat(chat_id)?;
        let tenant = TenantId::from(&chat);
        let opts = self.put_options(max_downloads, expires_days, expires_seconds);
        let (hash, metadata) = self.store.put(&tenant, filename, bytes, opts).await?;
        Ok(UploadResponse {
            file_hash: hash.to_string(),
            filename: filename.to_string(),
            chat_id: chat.as_str().to_string(),
            metadata,
        })
    }

    /// Quota-consuming download.
    pub async fn download(
        &self,
        chat_id: &str,
        filename: &str,
        file_hash: &str,
    ) -> Result<(Vec<u8>, FileMetadata), Error> {
        let tenant = TenantId::new(chat_id);
        let hash = ContentHash::parse(file_hash)?;
        self.store.get(&tenant, filename, &hash, true).await
    }

    /// Kill a stored file immediately.
    pub async fn expire(&self, chat_id: &str, filename: &str, file_hash: &str) -> Result<(), Error> {
        let tenant = TenantId::new(chat_id);
        let hash = ContentHash::parse(file_hash)?;
        self.store.expire(&tenant, filename, &hash).await
    }

    /// Parse a custom tool source into its schema.
    pub fn parse_custom_tool(&self, source: &str) -> Result<ParseToolResponse, Error> {
        let spec = tool::parse_tool(source, &self.enums)?;
        let tool_input_schema_json = serde_json::to_string(&spec.input_schema)
            .map_err(|e| Error::internal(format!("schema serialization: {}", e)))?;
        Ok(ParseToolResponse {
            tool_name: spec.tool_name,
            tool_input_schema_json,
            tool_description: spec.tool_description,
        })
    }

    /// Validate tool input against the extracted schema, then run the
    /// tool in a fresh worker and collect its JSON return value.
    pub async fn execute_custom_tool(
        &self,
        source: &str,
        tool_input_json: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<ToolOutputResponse, Error> {
        let spec = tool::parse_tool(source, &self.enums)?;
        let input: serde_json::Value = serde_json::from_str(tool_input_json)
            .map_err(|e| Error::invalid_argument(format!("tool input is not JSON: {}", e)))?;
        tool::validate_input(&spec.input_schema, &input)?;
        let env = validated_env(env)?;

        // Custom tools are stateless: a throwaway session key scopes
        // the worker, nothing is persisted under it.
        let chat = ChatId::generate();
        let worker = self.pool.acquire(&chat, self.config.acquire_deadline).await?;
        tracing::info!(worker = %worker, tool = %spec.tool_name, "executing custom tool");
        let result = self.run_tool(&worker, source, &spec.tool_name, &input, &env).await;
        self.pool.release(worker).await;
        result
    }

    async fn run_tool(
        &self,
        worker: &WorkerName,
        source: &str,
        tool_name: &str,
        input: &serde_json::Value,
        env: &[(String, String)],
    ) -> Result<ToolOutputResponse, Error> {
        let args = serde_json::to_vec(input)
            .map_err(|e| Error::internal(format!("argument serialization: {}", e)))?;
        let write_args = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > {}", tool::DRIVER_ARGS_PATH),
        ];
        let out = retry_transient(self.config.orchestrator_deadline, || {
            self.orch.exec(worker, &write_args, Some(&args))
        })
        .await
        .map_err(|e| Error::execution(format!("argument transfer: {}", e)))?;
        if !out.success() {
            return Err(Error::execution(format!("argument transfer: {}", out.stderr_lossy())));
        }

        let driver = tool::driver_program(source, tool_name);
        let output = self.run_python(worker, &driver, env).await?;
        if output.exit_code == tool::DRIVER_SERIALIZE_EXIT {
            return Err(Error::invalid_tool_output(format!(
                "tool return value is not JSON-serializable: {}",
                output.stderr_lossy().trim()
            )));
        }
        if !output.success() {
            return Err(Error::execution(format!(
                "tool raised: {}",
                self.bounded(&output.stderr).trim()
            )));
        }

        let read_out = vec!["cat".to_string(), tool::DRIVER_OUT_PATH.to_string()];
        let out = retry_transient(self.config.orchestrator_deadline, || {
            self.orch.exec(worker, &read_out, None)
        })
        .await
        .map_err(|e| Error::execution(format!("result transfer: {}", e)))?;
        if !out.success() {
            return Err(Error::execution(format!("result transfer: {}", out.stderr_lossy())));
        }
        Ok(ToolOutputResponse {
            tool_output_json: String::from_utf8_lossy(&out.stdout).into_owned(),
        })
    }

    fn resolve_chat(&self, chat_id: Option<&str>) -> Result<ChatId, Error> {
        match chat_id {
            Some(id) if !id.is_empty() => Ok(ChatId::new(id)),
            _ if self.config.require_chat_id => {
                Err(Error::invalid_argument("chat_id is required"))
            }
            _ => Ok(ChatId::generate()),
        }
    }

    /// Combine the request's quota/expiry with the configured caps:
    /// quota is clamped by the global maximum, and when both expiry
    /// fields are set the earlier instant wins.
    fn put_options(
        &self,
        max_downloads: Option<u32>,
        expires_days: Option<u64>,
        expires_seconds: Option<u64>,
    ) -> PutOptions {
        let remaining_downloads = match (max_downloads, self.config.global_max_downloads) {
            (Some(req), Some(cap)) => Some(req.min(cap)),
            (Some(req), None) => Some(req),
            (None, cap) => cap,
        };
        let now = self.clock.now_utc();
        let expiries = [
            expires_days.map(|d| now + chrono::Duration::days(d as i64)),
            expires_seconds.map(|s| now + chrono::Duration::seconds(s as i64)),
        ];
        let expires_at = expiries.into_iter().flatten().min();
        PutOptions { remaining_downloads, expires_at }
    }

    fn bounded(&self, bytes: &[u8]) -> String {
        let limit = self.config.output_byte_limit;
        if bytes.len() <= limit {
            String::from_utf8_lossy(bytes).into_owned()
        } else {
            let mut out = String::from_utf8_lossy(&bytes[..limit]).into_owned();
            out.push_str(TRUNCATION_SENTINEL);
            out
        }
    }
}

/// `{absolute or relative path → hex hash}` from the wire into the
/// session manager's shape.
fn parse_file_map(files: &BTreeMap<String, String>) -> Result<BTreeMap<String, ContentHash>, Error> {
    let mut parsed = BTreeMap::new();
    for (path, hash) in files {
        parsed.insert(fsio::to_relative(path)?, ContentHash::parse(hash)?);
    }
    Ok(parsed)
}

/// Environment pairs safe to splice into an `env` argv.
fn validated_env(env: &BTreeMap<String, String>) -> Result<Vec<(String, String)>, Error> {
    let mut out = Vec::with_capacity(env.len());
    for (key, value) in env {
        if key.is_empty() || key.contains('=') || key.bytes().any(|b| b == 0) {
            return Err(Error::invalid_argument(format!("invalid env name: {:?}", key)));
        }
        if value.bytes().any(|b| b == 0) {
            return Err(Error::invalid_argument(format!("invalid env value for {}", key)));
        }
        out.push((key.clone(), value.clone()));
    }
    Ok(out)
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
