// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

use super::*;
use crate::store::PutOptions;
use crucible_core::FakeClock;

fn tenant() -> TenantId {
    TenantId::new("s1")
}

async fn seeded_store(dir: &Path) -> (FileStore<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    let store = FileStore::open(dir, clock.clone()).unwrap();
    (store, clock)
}

#[tokio::test]
async fn live_entries_survive_a_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = seeded_store(dir.path()).await;
    let (hash, _) =
        store.put(&tenant(), "keep.txt", &b"keep"[..], PutOptions::default()).await.unwrap();

    let stats = store.reclaim(Duration::ZERO).await.unwrap();
    assert_eq!(stats, ReclaimStats::default());
    assert!(store.blob_exists(&hash));
    assert!(store.get(&tenant(), "keep.txt", &hash, false).await.is_ok());
}

#[tokio::test]
async fn expired_metadata_and_its_blob_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = seeded_store(dir.path()).await;
    let opts = PutOptions {
        remaining_downloads: None,
        expires_at: Some(clock.now_utc() + chrono::Duration::seconds(10)),
    };
    let (hash, _) = store.put(&tenant(), "gone.txt", &b"gone"[..], opts).await.unwrap();

    clock.advance(Duration::from_secs(11));
    let stats = store.reclaim(Duration::ZERO).await.unwrap();
    assert_eq!(stats.metadata_removed, 1);
    assert_eq!(stats.blobs_removed, 1);
    assert!(!store.blob_exists(&hash));
}

#[tokio::test]
async fn exhausted_quota_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = seeded_store(dir.path()).await;
    let opts = PutOptions { remaining_downloads: Some(1), expires_at: None };
    let (hash, _) = store.put(&tenant(), "once.txt", &b"x"[..], opts).await.unwrap();
    store.get(&tenant(), "once.txt", &hash, true).await.unwrap();

    let stats = store.reclaim(Duration::ZERO).await.unwrap();
    assert_eq!(stats.metadata_removed, 1);
    assert_eq!(stats.blobs_removed, 1);
}

#[tokio::test]
async fn shared_blob_survives_while_one_reference_lives() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = seeded_store(dir.path()).await;
    let opts = PutOptions {
        remaining_downloads: None,
        expires_at: Some(clock.now_utc() + chrono::Duration::seconds(10)),
    };
    let (hash, _) = store.put(&tenant(), "short.txt", &b"shared"[..], opts).await.unwrap();
    store.put(&tenant(), "long.txt", &b"shared"[..], PutOptions::default()).await.unwrap();

    clock.advance(Duration::from_secs(11));
    let stats = store.reclaim(Duration::ZERO).await.unwrap();
    assert_eq!(stats.metadata_removed, 1);
    assert_eq!(stats.blobs_removed, 0);
    assert!(store.blob_exists(&hash));
}

#[tokio::test]
async fn young_orphan_blobs_are_spared_by_grace() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = seeded_store(dir.path()).await;
    let opts = PutOptions {
        remaining_downloads: None,
        expires_at: Some(clock.now_utc() + chrono::Duration::seconds(1)),
    };
    let (hash, _) = store.put(&tenant(), "fresh.txt", &b"fresh"[..], opts).await.unwrap();
    clock.advance(Duration::from_secs(2));

    // The blob was just written, so a real grace window keeps it even
    // though its only sidecar died.
    let stats = store.reclaim(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(stats.metadata_removed, 1);
    assert_eq!(stats.blobs_removed, 0);
    assert!(store.blob_exists(&hash));
}

#[tokio::test]
async fn stale_tmp_files_are_cleaned() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = seeded_store(dir.path()).await;
    std::fs::write(store.root().join("tmp").join("put-abandoned"), b"partial").unwrap();

    let stats = store.reclaim(Duration::ZERO).await.unwrap();
    assert_eq!(stats.tmp_removed, 1);
    assert!(!store.root().join("tmp").join("put-abandoned").exists());
}

#[tokio::test]
async fn expired_then_reclaimed_entry_reads_as_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = seeded_store(dir.path()).await;
    let (hash, _) =
        store.put(&tenant(), "dead.txt", &b"d"[..], PutOptions::default()).await.unwrap();
    store.expire(&tenant(), "dead.txt", &hash).await.unwrap();

    store.reclaim(Duration::ZERO).await.unwrap();
    let err = store.get(&tenant(), "dead.txt", &hash, false).await.unwrap_err();
    assert_eq!(err.kind(), crucible_core::ErrorKind::NotFound);
}
