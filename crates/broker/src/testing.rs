// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Shared test double: an in-memory orchestrator whose exec understands
//! the workspace shell protocol, with scripted worker lifecycles.

use async_trait::async_trait;
use crucible_core::{sha256_hex, WorkerName, WorkerPhase};
use crucible_orchestrator::{
    ExecOutput, Orchestrator, OrchestratorError, WorkerEvent, WorkerObservation, WorkerPodSpec,
};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Absolute path → bytes for one fake worker.
pub type FakeFs = BTreeMap<String, Vec<u8>>;

/// Handler invoked when the fake sees a python execution.
pub type PyHandler =
    Box<dyn Fn(&str, &[(String, String)], &mut FakeFs) -> ExecOutput + Send + Sync>;

#[derive(Default)]
struct FakeState {
    /// Known workers and their observed (phase, ready).
    workers: HashMap<String, (WorkerPhase, bool)>,
    filesystems: HashMap<String, FakeFs>,
    created: Vec<String>,
    deleted: Vec<String>,
    /// Errors to inject into upcoming create calls.
    create_failures: VecDeque<OrchestratorError>,
    /// Errors to inject into upcoming exec calls.
    exec_failures: VecDeque<OrchestratorError>,
    /// When set, deletes are accepted but never confirmed: the worker
    /// lingers and no Deleted event fires.
    hold_deletes: bool,
    /// Live watch subscribers.
    watchers: Vec<mpsc::UnboundedSender<WorkerEvent>>,
    watch_count: usize,
}

pub struct FakeOrchestrator {
    state: Mutex<FakeState>,
    /// When set, created workers immediately become Running+ready.
    auto_ready: bool,
    py: Mutex<Option<PyHandler>>,
}

impl FakeOrchestrator {
    pub fn new(auto_ready: bool) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(FakeState::default()), auto_ready, py: Mutex::new(None) })
    }

    pub fn on_python(
        &self,
        handler: impl Fn(&str, &[(String, String)], &mut FakeFs) -> ExecOutput
            + Send
            + Sync
            + 'static,
    ) {
        *self.py.lock() = Some(Box::new(handler));
    }

    pub fn fail_next_create(&self, error: OrchestratorError) {
        self.state.lock().create_failures.push_back(error);
    }

    pub fn fail_next_exec(&self, error: OrchestratorError) {
        self.state.lock().exec_failures.push_back(error);
    }

    pub fn hold_deletes(&self) {
        self.state.lock().hold_deletes = true;
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn watch_count(&self) -> usize {
        self.state.lock().watch_count
    }

    /// Seed a file into a worker's filesystem.
    pub fn seed_file(&self, worker: &WorkerName, abs_path: &str, bytes: &[u8]) {
        self.state
            .lock()
            .filesystems
            .entry(worker.as_str().to_string())
            .or_default()
            .insert(abs_path.to_string(), bytes.to_vec());
    }

    pub fn file(&self, worker: &WorkerName, abs_path: &str) -> Option<Vec<u8>> {
        self.state.lock().filesystems.get(worker.as_str())?.get(abs_path).cloned()
    }

    /// Script a phase transition and broadcast it to watchers.
    pub fn set_worker(&self, name: &WorkerName, phase: WorkerPhase, ready: bool) {
        let mut state = self.state.lock();
        state.workers.insert(name.as_str().to_string(), (phase, ready));
        state.filesystems.entry(name.as_str().to_string()).or_default();
        let event = WorkerEvent::Applied(WorkerObservation { name: name.clone(), phase, ready });
        state.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Script a deletion event.
    pub fn remove_worker(&self, name: &WorkerName) {
        let mut state = self.state.lock();
        state.workers.remove(name.as_str());
        state.filesystems.remove(name.as_str());
        let event = WorkerEvent::Deleted(name.clone());
        state.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drop all live watch streams, as if the connection died.
    pub fn kill_watch(&self) {
        self.state.lock().watchers.clear();
    }

    fn snapshot(state: &FakeState) -> WorkerEvent {
        WorkerEvent::Snapshot(
            state
                .workers
                .iter()
                .map(|(name, (phase, ready))| WorkerObservation {
                    name: WorkerName::new(name.clone()),
                    phase: *phase,
                    ready: *ready,
                })
                .collect(),
        )
    }
}

/// Invert the shell single-quoting used by the fsio command builders.
fn unquote(s: &str) -> String {
    s.trim().trim_start_matches('\'').trim_end_matches('\'').replace("'\\''", "'")
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn create_worker(
        &self,
        name: &WorkerName,
        _spec: &WorkerPodSpec,
    ) -> Result<(), OrchestratorError> {
        let auto_ready = self.auto_ready;
        {
            let mut state = self.state.lock();
            if let Some(err) = state.create_failures.pop_front() {
                return Err(err);
            }
            if state.workers.contains_key(name.as_str()) {
                return Err(OrchestratorError::AlreadyExists(name.as_str().to_string()));
            }
            state.created.push(name.as_str().to_string());
            state.workers.insert(name.as_str().to_string(), (WorkerPhase::Pending, false));
            state.filesystems.entry(name.as_str().to_string()).or_default();
        }
        if auto_ready {
            self.set_worker(name, WorkerPhase::Running, true);
        }
        Ok(())
    }

    async fn watch_workers(&self) -> Result<BoxStream<'static, WorkerEvent>, OrchestratorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.watch_count += 1;
        let _ = tx.send(Self::snapshot(&state));
        state.watchers.push(tx);
        drop(state);
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn exec(
        &self,
        name: &WorkerName,
        argv: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, OrchestratorError> {
        let mut state = self.state.lock();
        if let Some(err) = state.exec_failures.pop_front() {
            return Err(err);
        }
        if !state.workers.contains_key(name.as_str()) {
            return Err(OrchestratorError::NotFound(name.as_str().to_string()));
        }
        let fs = state.filesystems.entry(name.as_str().to_string()).or_default();

        // `cat <abs>` — used for the tool driver output.
        if argv.len() == 2 && argv[0] == "cat" {
            return Ok(match fs.get(&argv[1]) {
                Some(bytes) => ExecOutput { stdout: bytes.clone(), ..Default::default() },
                None => ExecOutput {
                    stderr: format!("cat: {}: No such file or directory", argv[1]).into_bytes(),
                    exit_code: 1,
                    ..Default::default()
                },
            });
        }

        // python under `env` wrapping, or bare.
        if argv.iter().any(|a| a == "python3") {
            let code = String::from_utf8_lossy(stdin.unwrap_or_default()).into_owned();
            let env: Vec<(String, String)> = argv
                .iter()
                .skip(1)
                .take_while(|a| a.as_str() != "python3")
                .filter_map(|pair| {
                    pair.split_once('=').map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect();
            let py = self.py.lock();
            return Ok(match py.as_ref() {
                Some(handler) => handler(&code, &env, fs),
                None => ExecOutput::default(),
            });
        }

        if argv.len() == 3 && argv[0] == "sh" && argv[1] == "-c" {
            let script = argv[2].as_str();
            if script.starts_with("cd /workspace") {
                let mut out = String::new();
                for (path, bytes) in fs.iter() {
                    if let Some(rel) = path.strip_prefix("/workspace/") {
                        out.push_str(&format!("{}  ./{}\n", sha256_hex(bytes), rel));
                    }
                }
                return Ok(ExecOutput { stdout: out.into_bytes(), ..Default::default() });
            }
            if let Some(target) = script.split("cat > ").nth(1) {
                fs.insert(unquote(target), stdin.unwrap_or_default().to_vec());
                return Ok(ExecOutput::default());
            }
            if let Some(target) = script.strip_prefix("cat -- ") {
                let path = unquote(target);
                return Ok(match fs.get(&path) {
                    Some(bytes) => ExecOutput { stdout: bytes.clone(), ..Default::default() },
                    None => ExecOutput {
                        stderr: format!("cat: {}: No such file or directory", path).into_bytes(),
                        exit_code: 1,
                        ..Default::default()
                    },
                });
            }
            if let Some(target) = script.strip_prefix("rm -f -- ") {
                fs.remove(&unquote(target));
                return Ok(ExecOutput::default());
            }
        }

        Err(OrchestratorError::Exec(format!("fake cannot interpret argv: {:?}", argv)))
    }

    async fn delete_worker(&self, name: &WorkerName) -> Result<(), OrchestratorError> {
        {
            let mut state = self.state.lock();
            state.deleted.push(name.as_str().to_string());
            if state.hold_deletes {
                return Ok(());
            }
            if state.workers.remove(name.as_str()).is_none() {
                return Ok(());
            }
            state.filesystems.remove(name.as_str());
        }
        self.remove_worker(name);
        Ok(())
    }
}
