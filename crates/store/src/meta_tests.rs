// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

use super::*;
use chrono::TimeZone;

#[yare::parameterized(
    simple  = { "data.csv" },
    nested  = { "plots/run 1/out.png" },
    unicode = { "résumé.pdf" },
)]
fn good_filenames(name: &str) {
    assert!(validate_filename(name).is_ok());
}

#[yare::parameterized(
    empty     = { "" },
    absolute  = { "/etc/passwd" },
    traversal = { "../sibling" },
    newline   = { "a\nb" },
    empty_seg = { "a//b" },
)]
fn bad_filenames(name: &str) {
    assert!(validate_filename(name).is_err());
}

#[test]
fn tenant_validation_blocks_path_tricks() {
    assert!(validate_tenant(&TenantId::new("chat-abc_1.2")).is_ok());
    assert!(validate_tenant(&TenantId::new("..")).is_err());
    assert!(validate_tenant(&TenantId::new("a/b")).is_err());
    assert!(validate_tenant(&TenantId::new("")).is_err());
}

#[test]
fn sidecar_path_encodes_filename() {
    let hash = ContentHash::of_bytes(b"x");
    let path = sidecar_path(Path::new("/srv/files"), &TenantId::new("s1"), "a b/c.txt", &hash);
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(name, format!("{}__a%20b%2fc.txt.json", hash.as_str()));
    assert_eq!(path.parent().unwrap(), Path::new("/srv/files/meta/s1"));
}

#[test]
fn blob_path_is_sharded() {
    let hash = ContentHash::of_bytes(b"x");
    let path = blob_path(Path::new("/srv/files"), &hash);
    assert_eq!(path, Path::new("/srv/files/blobs/2d").join(hash.as_str()));
}

#[test]
fn sidecar_doc_round_trips_flattened() {
    let hash = ContentHash::of_bytes(b"x");
    let doc = SidecarDoc {
        tenant_id: "s1".to_string(),
        filename: "data.csv".to_string(),
        content_hash: hash,
        metadata: FileMetadata::new(
            8,
            chrono::Utc.timestamp_opt(1_000, 0).single().unwrap(),
            Some(2),
            None,
        ),
    };
    let json = serde_json::to_string(&doc).unwrap();
    assert!(json.contains("\"remaining_downloads\":2"));
    let back: SidecarDoc = serde_json::from_str(&json).unwrap();
    assert_eq!(back, doc);
}
