// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

use super::*;
use crate::testing::FakeOrchestrator;
use crucible_core::{ErrorKind, FakeClock, WorkerPhase};
use crucible_orchestrator::OrchestratorError;

struct Rig {
    orch: Arc<FakeOrchestrator>,
    store: Arc<FileStore<FakeClock>>,
    clock: FakeClock,
    worker: WorkerName,
    _dir: tempfile::TempDir,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let store = Arc::new(FileStore::open(dir.path(), clock.clone()).unwrap());
    let orch = FakeOrchestrator::new(false);
    let worker = WorkerName::new("cx-exec-sess1");
    orch.set_worker(&worker, WorkerPhase::Running, true);
    Rig { orch, store, clock, worker, _dir: dir }
}

fn tenant() -> TenantId {
    TenantId::new("s1")
}

impl Rig {
    fn manager(&self) -> WorkspaceManager<FakeOrchestrator, FakeClock> {
        WorkspaceManager::new(self.orch.clone(), self.store.clone(), Duration::from_secs(5))
    }

    async fn stored(&self, path: &str, bytes: &[u8]) -> ContentHash {
        let (hash, _) =
            self.store.put(&tenant(), path, bytes, PutOptions::default()).await.unwrap();
        hash
    }
}

#[tokio::test]
async fn projection_materializes_requested_files() {
    let rig = rig();
    let h1 = rig.stored("data.csv", b"a,b\n1,2\n").await;
    let h2 = rig.stored("plots/spec.json", b"{}").await;
    let requested =
        BTreeMap::from([("data.csv".to_string(), h1), ("plots/spec.json".to_string(), h2)]);

    rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap();

    assert_eq!(rig.orch.file(&rig.worker, "/workspace/data.csv").unwrap(), b"a,b\n1,2\n");
    assert_eq!(rig.orch.file(&rig.worker, "/workspace/plots/spec.json").unwrap(), b"{}");
}

#[tokio::test]
async fn projection_removes_residue_by_default() {
    let rig = rig();
    rig.orch.seed_file(&rig.worker, "/workspace/stale.txt", b"old");
    let h = rig.stored("keep.txt", b"keep").await;

    let requested = BTreeMap::from([("keep.txt".to_string(), h)]);
    rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap();

    assert!(rig.orch.file(&rig.worker, "/workspace/stale.txt").is_none());
    assert!(rig.orch.file(&rig.worker, "/workspace/keep.txt").is_some());
}

#[tokio::test]
async fn persistent_workspace_keeps_undeclared_paths() {
    let rig = rig();
    rig.orch.seed_file(&rig.worker, "/workspace/notes.md", b"mine");

    rig.manager().project(&rig.worker, &tenant(), &BTreeMap::new(), true).await.unwrap();

    assert_eq!(rig.orch.file(&rig.worker, "/workspace/notes.md").unwrap(), b"mine");
}

#[tokio::test]
async fn empty_projection_empties_the_workspace() {
    let rig = rig();
    rig.orch.seed_file(&rig.worker, "/workspace/residue.bin", b"x");

    rig.manager().project(&rig.worker, &tenant(), &BTreeMap::new(), false).await.unwrap();

    assert!(rig.orch.file(&rig.worker, "/workspace/residue.bin").is_none());
}

#[tokio::test]
async fn matching_hashes_skip_the_transfer() {
    let rig = rig();
    // The worker already holds identical content and the store has no
    // blob at all: projection only succeeds if the diff skips it.
    rig.orch.seed_file(&rig.worker, "/workspace/cached.bin", b"warm");
    let requested =
        BTreeMap::from([("cached.bin".to_string(), ContentHash::of_bytes(b"warm"))]);

    rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap();
    assert_eq!(rig.orch.file(&rig.worker, "/workspace/cached.bin").unwrap(), b"warm");
}

#[tokio::test]
async fn changed_content_is_rewritten() {
    let rig = rig();
    rig.orch.seed_file(&rig.worker, "/workspace/data.csv", b"stale");
    let h = rig.stored("data.csv", b"fresh").await;

    let requested = BTreeMap::from([("data.csv".to_string(), h)]);
    rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap();

    assert_eq!(rig.orch.file(&rig.worker, "/workspace/data.csv").unwrap(), b"fresh");
}

#[tokio::test]
async fn missing_blob_fails_projection() {
    let rig = rig();
    let requested =
        BTreeMap::from([("ghost.bin".to_string(), ContentHash::of_bytes(b"ghost"))]);

    let err =
        rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkspaceProjectionFailed);
}

#[tokio::test]
async fn expired_file_fails_projection() {
    let rig = rig();
    let opts = PutOptions {
        remaining_downloads: None,
        expires_at: Some(rig.clock.now_utc() + chrono::Duration::seconds(5)),
    };
    let (hash, _) =
        rig.store.put(&tenant(), "late.txt", &b"late"[..], opts).await.unwrap();
    rig.clock.advance(std::time::Duration::from_secs(6));

    let requested = BTreeMap::from([("late.txt".to_string(), hash)]);
    let err =
        rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkspaceProjectionFailed);
}

#[tokio::test]
async fn projection_does_not_consume_quota() {
    let rig = rig();
    let opts = PutOptions { remaining_downloads: Some(1), expires_at: None };
    let (hash, _) = rig.store.put(&tenant(), "in.txt", &b"x"[..], opts).await.unwrap();

    let requested = BTreeMap::from([("in.txt".to_string(), hash.clone())]);
    rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap();

    let meta = rig.store.metadata(&tenant(), "in.txt", &hash).await.unwrap();
    assert_eq!(meta.remaining_downloads, Some(1));
}

#[tokio::test]
async fn extraction_persists_new_files() {
    let rig = rig();
    rig.orch.seed_file(&rig.worker, "/workspace/out.txt", b"x");

    let result = rig
        .manager()
        .extract(&rig.worker, &tenant(), &BTreeMap::new(), ExtractPolicy::default())
        .await
        .unwrap();

    let hash = ContentHash::of_bytes(b"x");
    assert_eq!(result.files, BTreeMap::from([("/workspace/out.txt".to_string(), hash.clone())]));
    assert!(result.files_metadata.contains_key("/workspace/out.txt"));

    let (bytes, _) = rig.store.get(&tenant(), "out.txt", &hash, true).await.unwrap();
    assert_eq!(bytes, b"x");
}

#[tokio::test]
async fn unchanged_inputs_are_listed_but_not_restored() {
    let rig = rig();
    let h = rig.stored("in.csv", b"1,2\n").await;
    let requested = BTreeMap::from([("in.csv".to_string(), h.clone())]);
    rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap();
    rig.orch.seed_file(&rig.worker, "/workspace/out.csv", b"3,4\n");

    let result = rig
        .manager()
        .extract(&rig.worker, &tenant(), &requested, ExtractPolicy::default())
        .await
        .unwrap();

    assert_eq!(result.files.len(), 2);
    assert_eq!(result.files["/workspace/in.csv"], h);
    assert!(result.files_metadata.contains_key("/workspace/out.csv"));
    assert!(!result.files_metadata.contains_key("/workspace/in.csv"));
}

#[tokio::test]
async fn modified_inputs_are_restored_under_their_new_hash() {
    let rig = rig();
    let h = rig.stored("data.txt", b"before").await;
    let requested = BTreeMap::from([("data.txt".to_string(), h.clone())]);
    rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap();
    rig.orch.seed_file(&rig.worker, "/workspace/data.txt", b"after");

    let result = rig
        .manager()
        .extract(&rig.worker, &tenant(), &requested, ExtractPolicy::default())
        .await
        .unwrap();

    let new_hash = ContentHash::of_bytes(b"after");
    assert_eq!(result.files["/workspace/data.txt"], new_hash);
    let (bytes, _) = rig.store.get(&tenant(), "data.txt", &new_hash, false).await.unwrap();
    assert_eq!(bytes, b"after");
}

#[tokio::test]
async fn extraction_enforces_the_size_limit() {
    let rig = rig();
    rig.orch.seed_file(&rig.worker, "/workspace/big.bin", &[0u8; 64]);

    let policy = ExtractPolicy { put: PutOptions::default(), size_limit: 16 };
    let err = rig
        .manager()
        .extract(&rig.worker, &tenant(), &BTreeMap::new(), policy)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
}

#[tokio::test]
async fn extraction_applies_the_request_policy() {
    let rig = rig();
    rig.orch.seed_file(&rig.worker, "/workspace/out.txt", b"q");
    let expires = rig.clock.now_utc() + chrono::Duration::hours(1);
    let policy = ExtractPolicy {
        put: PutOptions { remaining_downloads: Some(2), expires_at: Some(expires) },
        size_limit: 0,
    };

    let result = rig
        .manager()
        .extract(&rig.worker, &tenant(), &BTreeMap::new(), policy)
        .await
        .unwrap();
    let meta = &result.files_metadata["/workspace/out.txt"];
    assert_eq!(meta.remaining_downloads, Some(2));
    assert_eq!(meta.expires_at, Some(expires));
}

#[tokio::test]
async fn transient_exec_errors_are_retried_within_the_call() {
    let rig = rig();
    let h = rig.stored("data.csv", b"fresh").await;
    rig.orch.fail_next_exec(OrchestratorError::Transient("connection reset".into()));

    let requested = BTreeMap::from([("data.csv".to_string(), h)]);
    rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap();
    assert_eq!(rig.orch.file(&rig.worker, "/workspace/data.csv").unwrap(), b"fresh");
}

#[tokio::test]
async fn fatal_exec_errors_are_not_retried() {
    let rig = rig();
    rig.orch.fail_next_exec(OrchestratorError::Exec("stream torn down".into()));

    let err = rig
        .manager()
        .project(&rig.worker, &tenant(), &BTreeMap::new(), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkspaceProjectionFailed);
}

#[tokio::test]
async fn bad_requested_path_is_invalid_argument() {
    let rig = rig();
    let requested =
        BTreeMap::from([("../escape".to_string(), ContentHash::of_bytes(b"x"))]);
    let err =
        rig.manager().project(&rig.worker, &tenant(), &requested, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
