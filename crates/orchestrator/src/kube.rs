// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Kubernetes orchestrator — workers are pods, exec rides the attach API.

use crate::client::{ExecOutput, Orchestrator, OrchestratorError, WorkerEvent, WorkerObservation};
use crate::pod::{build_pod, WorkerPodSpec};
use async_trait::async_trait;
use crucible_core::{WorkerName, WorkerPhase};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Orchestrator backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    namespace: String,
    app_label: String,
}

impl KubeOrchestrator {
    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn connect(namespace: String, app_label: String) -> Result<Self, OrchestratorError> {
        let client = Client::try_default().await.map_err(|e| {
            OrchestratorError::Fatal(format!("failed to create kube client: {}", e))
        })?;
        Ok(Self { client, namespace, app_label })
    }

    pub fn new(client: Client, namespace: String, app_label: String) -> Self {
        Self { client, namespace, app_label }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn create_worker(
        &self,
        name: &WorkerName,
        spec: &WorkerPodSpec,
    ) -> Result<(), OrchestratorError> {
        let pod = build_pod(name, spec)?;
        tracing::info!(worker = %name, image = %spec.image, "creating worker pod");
        self.pods().create(&PostParams::default(), &pod).await.map(|_| ()).map_err(classify)
    }

    async fn watch_workers(&self) -> Result<BoxStream<'static, WorkerEvent>, OrchestratorError> {
        let config = watcher::Config::default().labels(&format!("app={}", self.app_label));
        let stream = watcher(self.pods(), config).default_backoff().boxed();

        // Fold the raw Init/InitApply/InitDone cycle into one Snapshot
        // event per (re)connect so the consumer sees re-list semantics.
        let events = futures_util::stream::unfold(
            (stream, Vec::new()),
            |(mut stream, mut pending)| async move {
                loop {
                    match stream.next().await {
                        Some(Ok(watcher::Event::Init)) => pending.clear(),
                        Some(Ok(watcher::Event::InitApply(pod))) => {
                            if let Some(obs) = observe(&pod) {
                                pending.push(obs);
                            }
                        }
                        Some(Ok(watcher::Event::InitDone)) => {
                            let snapshot = std::mem::take(&mut pending);
                            return Some((WorkerEvent::Snapshot(snapshot), (stream, pending)));
                        }
                        Some(Ok(watcher::Event::Apply(pod))) => {
                            if let Some(obs) = observe(&pod) {
                                return Some((WorkerEvent::Applied(obs), (stream, pending)));
                            }
                        }
                        Some(Ok(watcher::Event::Delete(pod))) => {
                            if let Some(name) = pod.metadata.name {
                                return Some((
                                    WorkerEvent::Deleted(WorkerName::new(name)),
                                    (stream, pending),
                                ));
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "worker watch error, will re-list");
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(events.boxed())
    }

    async fn exec(
        &self,
        name: &WorkerName,
        argv: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, OrchestratorError> {
        let params = kube::api::AttachParams::default()
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);
        let mut attached =
            self.pods().exec(name.as_str(), argv.to_vec(), &params).await.map_err(classify)?;

        let writer = attached.stdin();
        let mut stdout_reader = attached.stdout();
        let mut stderr_reader = attached.stderr();
        let status_fut = attached.take_status();

        let input = stdin.map(|b| b.to_vec());
        let write_stdin = async move {
            if let (Some(mut writer), Some(bytes)) = (writer, input) {
                writer.write_all(&bytes).await?;
                writer.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stdout = async {
            let mut buf = Vec::new();
            if let Some(reader) = stdout_reader.as_mut() {
                reader.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Some(reader) = stderr_reader.as_mut() {
                reader.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };

        let (wrote, stdout, stderr) = tokio::join!(write_stdin, read_stdout, read_stderr);
        wrote.map_err(|e| OrchestratorError::Exec(format!("stdin stream: {}", e)))?;
        let stdout = stdout.map_err(|e| OrchestratorError::Exec(format!("stdout stream: {}", e)))?;
        let stderr = stderr.map_err(|e| OrchestratorError::Exec(format!("stderr stream: {}", e)))?;

        let status = match status_fut {
            Some(fut) => fut.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| OrchestratorError::Exec(format!("exec channel: {}", e)))?;

        let exit_code = exit_code_of(status.as_ref())?;
        Ok(ExecOutput { stdout, stderr, exit_code })
    }

    async fn delete_worker(&self, name: &WorkerName) -> Result<(), OrchestratorError> {
        tracing::info!(worker = %name, "deleting worker pod");
        match self.pods().delete(name.as_str(), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match classify(e) {
                OrchestratorError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}

/// Map an exec channel `Status` to the remote process exit code.
fn exit_code_of(status: Option<&Status>) -> Result<i32, OrchestratorError> {
    let status =
        status.ok_or_else(|| OrchestratorError::Exec("exec finished without status".into()))?;
    if status.status.as_deref() == Some("Success") {
        return Ok(0);
    }
    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .and_then(|causes| causes.iter().find(|c| c.reason.as_deref() == Some("ExitCode")))
            .and_then(|c| c.message.as_deref())
            .and_then(|m| m.parse::<i32>().ok());
        if let Some(code) = code {
            return Ok(code);
        }
    }
    Err(OrchestratorError::Exec(
        status.message.clone().unwrap_or_else(|| "exec failed without exit code".to_string()),
    ))
}

fn observe(pod: &Pod) -> Option<WorkerObservation> {
    let name = pod.metadata.name.clone()?;
    let status = pod.status.as_ref();
    let phase = if pod.metadata.deletion_timestamp.is_some() {
        // A pod being torn down must never be promoted or adopted.
        WorkerPhase::Failed
    } else {
        match status.and_then(|s| s.phase.as_deref()) {
            Some("Pending") => WorkerPhase::Pending,
            Some("Running") => WorkerPhase::Running,
            Some("Succeeded") => WorkerPhase::Succeeded,
            Some("Failed") => WorkerPhase::Failed,
            _ => WorkerPhase::Unknown,
        }
    };
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds.iter().any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);
    Some(WorkerObservation { name: WorkerName::new(name), phase, ready })
}

fn classify(e: kube::Error) -> OrchestratorError {
    match e {
        kube::Error::Api(er) if er.code == 404 => OrchestratorError::NotFound(er.message),
        kube::Error::Api(er) if er.code == 409 => OrchestratorError::AlreadyExists(er.message),
        kube::Error::Api(er) if er.code == 429 || er.code >= 500 => {
            OrchestratorError::Transient(er.message)
        }
        kube::Error::Api(er) => OrchestratorError::Fatal(er.message),
        // Connection-level failures (reset, timeout, DNS) are retryable.
        other => OrchestratorError::Transient(other.to_string()),
    }
}

#[cfg(test)]
#[path = "kube_tests.rs"]
mod tests;
