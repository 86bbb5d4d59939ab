mod common;

use bytes::Bytes;
use common::Harness;
use keel_core::{Metadata, Sha256Digest, Store, TargetMismatch};
use keel_trust::{TrustError, verify_role};
use serde_json::json;

#[tokio::test]
async fn add_then_verify() {
    let harness = Harness::initialized().await;
    let manager = &harness.manager;
    let entry = manager
        .add_target("app/image.tar", Bytes::from_static(b"hello"), None)
        .await
        .unwrap();
    assert_eq!(entry.length, 5);
    assert_eq!(entry.hashes.sha256, Sha256Digest::new(b"hello"));

    manager
        .verify_target("app/image.tar", b"hello")
        .await
        .unwrap();

    let err = manager
        .verify_target("app/image.tar", b"world")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TrustError::Integrity {
            mismatch: TargetMismatch::Hash { .. },
            ..
        }
    ));

    let err = manager
        .verify_target("app/image.tar", b"hello world")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TrustError::Integrity {
            mismatch: TargetMismatch::Length {
                expected: 5,
                actual: 11
            },
            ..
        }
    ));

    assert!(
        manager
            .verify_target("unknown", b"hello")
            .await
            .unwrap_err()
            .is_not_found()
    );

    let blob = harness.store.read_bytes("targets/app/image.tar").await.unwrap();
    assert_eq!(blob, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn remove_missing_target_changes_nothing() {
    let harness = Harness::initialized().await;
    let writes = harness.store.write_count();
    let err = harness.manager.remove_target("missing").await.unwrap_err();
    assert!(matches!(err, TrustError::NotFound { kind: "target", .. }));
    assert_eq!(harness.targets().await.signed.version, 1);
    assert_eq!(harness.store.write_count(), writes);
}

#[tokio::test]
async fn remove_target_drops_entry_and_blob() {
    let harness = Harness::initialized().await;
    let manager = &harness.manager;
    manager
        .add_target("a.bin", Bytes::from_static(b"a"), None)
        .await
        .unwrap();
    manager.remove_target("a.bin").await.unwrap();

    assert!(manager.get_target("a.bin").await.unwrap_err().is_not_found());
    assert!(!harness.store.exists("targets/a.bin").await.unwrap());
    assert_eq!(harness.targets().await.signed.version, 3);
}

#[tokio::test]
async fn versions_only_increase() {
    let harness = Harness::initialized().await;
    let manager = &harness.manager;
    let mut last = (1, 1, 1);
    for (i, name) in ["a", "b", "a"].into_iter().enumerate() {
        manager
            .add_target(name, Bytes::from(vec![i as u8; i + 1]), None)
            .await
            .unwrap();
        let now = (
            harness.targets().await.signed.version,
            harness.snapshot().await.signed.version,
            harness.timestamp().await.signed.version,
        );
        assert_eq!(now.0, last.0 + 1);
        assert_eq!(now.1, last.1 + 1);
        assert_eq!(now.2, last.2 + 1);
        last = now;
    }
    // the root never moved
    assert_eq!(harness.root().await.signed.version, 1);
    assert_eq!(manager.list_targets().await.unwrap().len(), 2);
}

#[tokio::test]
async fn cascade_pins_current_documents() {
    let harness = Harness::initialized().await;
    harness
        .manager
        .add_target(
            "app/image.tar",
            Bytes::from_static(b"hello"),
            Some(json!({"arch": "amd64"})),
        )
        .await
        .unwrap();

    let root = harness.root().await;
    let targets = harness.targets().await;
    let snapshot = harness.snapshot().await;
    let timestamp = harness.timestamp().await;

    let targets_bytes = targets.signed.canonical_bytes().unwrap();
    let pinned = snapshot.signed.targets_meta().unwrap();
    assert_eq!(pinned.version, targets.signed.version);
    assert_eq!(pinned.length, targets_bytes.len() as u64);
    assert_eq!(pinned.hashes.sha256, Sha256Digest::new(&targets_bytes));

    let snapshot_bytes = snapshot.signed.canonical_bytes().unwrap();
    let pinned = timestamp.signed.snapshot_meta().unwrap();
    assert_eq!(pinned.version, snapshot.signed.version);
    assert_eq!(pinned.length, snapshot_bytes.len() as u64);
    assert_eq!(pinned.hashes.sha256, Sha256Digest::new(&snapshot_bytes));

    verify_role(&root.signed, &targets).unwrap();
    verify_role(&root.signed, &snapshot).unwrap();
    verify_role(&root.signed, &timestamp).unwrap();

    let entry = &targets.signed.targets["app/image.tar"];
    assert_eq!(entry.custom, Some(json!({"arch": "amd64"})));
}

#[tokio::test]
async fn persisted_state_matches_memory() {
    let harness = Harness::initialized().await;
    harness
        .manager
        .add_target("a", Bytes::from_static(b"a"), None)
        .await
        .unwrap();
    harness
        .manager
        .add_target("b", Bytes::from_static(b"bb"), None)
        .await
        .unwrap();

    let reopened = harness.reopen().await;
    assert_eq!(
        reopened.list_targets().await.unwrap(),
        harness.manager.list_targets().await.unwrap()
    );
    assert_eq!(
        reopened.export_public_keys().await.unwrap(),
        harness.manager.export_public_keys().await.unwrap()
    );
}

#[tokio::test]
async fn rejects_unsafe_names() {
    let harness = Harness::initialized().await;
    for name in ["", "../escape", "/abs", "a//b"] {
        let err = harness
            .manager
            .add_target(name, Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::InvalidInput(_)), "{name:?}");
    }
}

#[tokio::test]
async fn missing_signing_key_fails_before_any_write() {
    let harness = Harness::initialized().await;
    std::fs::remove_file(harness.config.keys_path.join("targets.key")).unwrap();
    harness.manager.reload().await.unwrap();

    let writes = harness.store.write_count();
    let err = harness
        .manager
        .add_target("a", Bytes::from_static(b"a"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TrustError::ThresholdNotMet {
            valid: 0,
            threshold: 1,
            ..
        }
    ));
    assert_eq!(harness.store.write_count(), writes);
    assert!(harness.manager.list_targets().await.unwrap().is_empty());
}

#[tokio::test]
async fn file_and_directory_names_cannot_overlap() {
    let harness = Harness::initialized().await;
    let manager = &harness.manager;
    manager
        .add_target("app", Bytes::from_static(b"file"), None)
        .await
        .unwrap();
    let writes = harness.store.write_count();

    let err = manager
        .add_target("app/image.tar", Bytes::from_static(b"nested"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TrustError::InvalidInput(_)), "{err}");
    assert_eq!(harness.store.write_count(), writes);
    assert_eq!(harness.targets().await.signed.version, 2);

    // replacing the same name is still an update
    manager
        .add_target("app", Bytes::from_static(b"file v2"), None)
        .await
        .unwrap();
    manager
        .verify_target("app", b"file v2")
        .await
        .unwrap();
}
