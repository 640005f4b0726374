// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Centralized configuration, read once at startup from `APP_`-prefixed
//! environment variables.

use crucible_core::Error;
use crucible_orchestrator::WorkerPodSpec;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (`APP_HTTP_LISTEN_ADDR`).
    pub http_listen_addr: SocketAddr,
    /// Kubernetes namespace for worker pods (`APP_K8S_NAMESPACE`).
    pub kube_namespace: String,
    /// Executor container image (`APP_EXECUTOR_IMAGE`).
    pub executor_image: String,
    /// File store root (`APP_FILE_STORAGE_PATH`).
    pub file_storage_path: PathBuf,
    /// Warm pool target length (`APP_POOL_TARGET_LENGTH`).
    pub pool_target: usize,
    /// Worker name prefix (`APP_WORKER_NAME_PREFIX`); also the watch
    /// selector label value, minus any trailing dash.
    pub worker_name_prefix: String,
    /// Reject requests without a chat id (`APP_REQUIRE_CHAT_ID`).
    pub require_chat_id: bool,
    /// Cap applied to every stored file's download quota
    /// (`APP_GLOBAL_MAX_DOWNLOADS`).
    pub global_max_downloads: Option<u32>,
    /// Post-execution workspace byte limit
    /// (`APP_WORKSPACE_SIZE_LIMIT_BYTES`).
    pub workspace_size_limit: u64,
    /// stdout/stderr cap per stream before truncation
    /// (`APP_OUTPUT_BYTE_LIMIT`).
    pub output_byte_limit: usize,
    /// Executor container resources, raw JSON
    /// (`APP_EXECUTOR_CONTAINER_RESOURCES`).
    pub executor_resources: Option<serde_json::Value>,
    /// Extra pod spec fields, raw JSON (`APP_POD_SPEC_EXTRA`).
    pub pod_spec_extra: Option<serde_json::Value>,
    /// How long `acquire` waits for a ready worker
    /// (`APP_ACQUIRE_DEADLINE_MS`).
    pub acquire_deadline: Duration,
    /// Bound on `Provisioning`/`Terminating` before force delete
    /// (`APP_WORKER_STUCK_TIMEOUT_MS`).
    pub worker_stuck_timeout: Duration,
    /// Per-call deadline for retried orchestrator calls
    /// (`APP_ORCHESTRATOR_DEADLINE_MS`).
    pub orchestrator_deadline: Duration,
    /// Wall-clock bound for one user code execution
    /// (`APP_EXEC_TIMEOUT_MS`).
    pub exec_timeout: Duration,
    /// Store reclamation cadence (`APP_RECLAIM_INTERVAL_SECS`).
    pub reclaim_interval: Duration,
    /// Age below which reclaim spares blobs/tmp files
    /// (`APP_RECLAIM_GRACE_SECS`).
    pub reclaim_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_listen_addr: SocketAddr::from(([0, 0, 0, 0], 50081)),
            kube_namespace: "default".to_string(),
            executor_image: "crucible-executor:latest".to_string(),
            file_storage_path: PathBuf::from("/var/lib/crucible/files"),
            pool_target: 2,
            worker_name_prefix: "cx-exec-".to_string(),
            require_chat_id: false,
            global_max_downloads: None,
            workspace_size_limit: 100 * 1024 * 1024,
            output_byte_limit: 1024 * 1024,
            executor_resources: None,
            pod_spec_extra: None,
            acquire_deadline: Duration::from_secs(60),
            worker_stuck_timeout: Duration::from_secs(300),
            orchestrator_deadline: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(120),
            reclaim_interval: Duration::from_secs(600),
            reclaim_grace: Duration::from_secs(900),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Result<Self, Error> {
        let defaults = Config::default();
        Ok(Self {
            http_listen_addr: env_parse("APP_HTTP_LISTEN_ADDR", defaults.http_listen_addr)?,
            kube_namespace: env_str("APP_K8S_NAMESPACE", defaults.kube_namespace),
            executor_image: env_str("APP_EXECUTOR_IMAGE", defaults.executor_image),
            file_storage_path: PathBuf::from(env_str(
                "APP_FILE_STORAGE_PATH",
                defaults.file_storage_path.to_string_lossy().into_owned(),
            )),
            pool_target: env_parse("APP_POOL_TARGET_LENGTH", defaults.pool_target)?,
            worker_name_prefix: env_str("APP_WORKER_NAME_PREFIX", defaults.worker_name_prefix),
            require_chat_id: env_parse("APP_REQUIRE_CHAT_ID", defaults.require_chat_id)?,
            global_max_downloads: env_opt_parse("APP_GLOBAL_MAX_DOWNLOADS")?,
            workspace_size_limit: env_parse(
                "APP_WORKSPACE_SIZE_LIMIT_BYTES",
                defaults.workspace_size_limit,
            )?,
            output_byte_limit: env_parse("APP_OUTPUT_BYTE_LIMIT", defaults.output_byte_limit)?,
            executor_resources: env_json("APP_EXECUTOR_CONTAINER_RESOURCES")?,
            pod_spec_extra: env_json("APP_POD_SPEC_EXTRA")?,
            acquire_deadline: env_ms("APP_ACQUIRE_DEADLINE_MS", defaults.acquire_deadline)?,
            worker_stuck_timeout: env_ms(
                "APP_WORKER_STUCK_TIMEOUT_MS",
                defaults.worker_stuck_timeout,
            )?,
            orchestrator_deadline: env_ms(
                "APP_ORCHESTRATOR_DEADLINE_MS",
                defaults.orchestrator_deadline,
            )?,
            exec_timeout: env_ms("APP_EXEC_TIMEOUT_MS", defaults.exec_timeout)?,
            reclaim_interval: env_secs("APP_RECLAIM_INTERVAL_SECS", defaults.reclaim_interval)?,
            reclaim_grace: env_secs("APP_RECLAIM_GRACE_SECS", defaults.reclaim_grace)?,
        })
    }

    /// The `app` label shared by all worker pods.
    pub fn app_label(&self) -> String {
        self.worker_name_prefix.trim_end_matches('-').to_string()
    }

    /// Pod template handed to the orchestrator on every create.
    pub fn worker_pod_spec(&self) -> WorkerPodSpec {
        WorkerPodSpec {
            image: self.executor_image.clone(),
            app_label: self.app_label(),
            container_resources: self.executor_resources.clone(),
            pod_spec_extra: self.pod_spec_extra.clone(),
        }
    }
}

fn env_str(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|s| !s.is_empty()).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Error> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| Error::invalid_argument(format!("unparseable {}: {:?}", key, raw))),
        _ => Ok(default),
    }
}

fn env_opt_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, Error> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_argument(format!("unparseable {}: {:?}", key, raw))),
        _ => Ok(None),
    }
}

fn env_json(key: &str) -> Result<Option<serde_json::Value>, Error> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| Error::invalid_argument(format!("invalid JSON in {}: {}", key, e))),
        _ => Ok(None),
    }
}

fn env_ms(key: &str, default: Duration) -> Result<Duration, Error> {
    Ok(env_opt_parse::<u64>(key)?.map(Duration::from_millis).unwrap_or(default))
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, Error> {
    Ok(env_opt_parse::<u64>(key)?.map(Duration::from_secs).unwrap_or(default))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
