mod common;

use bytes::Bytes;
use chrono::Duration;
use common::Harness;
use keel_core::Role;
use keel_trust::verify_role;

#[tokio::test]
async fn rotating_targets_replaces_role_keys() {
    let harness = Harness::initialized().await;
    let before = harness.root().await;
    let old_ids = before.signed.role_keys(Role::Targets).unwrap().keyids.clone();

    let new_ids = harness.manager.rotate_key(Role::Targets).await.unwrap();
    assert_eq!(new_ids.len(), 1);

    let root = harness.root().await;
    assert_eq!(root.signed.version, before.signed.version + 1);
    let listed = &root.signed.role_keys(Role::Targets).unwrap().keyids;
    assert_eq!(listed, &new_ids);
    assert!(!listed.contains(&old_ids[0]));
    // still listed as a key during the grace period
    assert!(root.signed.keys.contains_key(&old_ids[0]));

    // targets re-signed at the same version by old and new keys
    let targets = harness.targets().await;
    assert_eq!(targets.signed.version, 1);
    let signers: Vec<_> = targets.signatures.iter().map(|s| s.keyid.clone()).collect();
    assert!(signers.contains(&old_ids[0]));
    assert!(signers.contains(&new_ids[0]));
    verify_role(&root.signed, &targets).unwrap();

    assert_eq!(harness.manager.status().await.retired_key_count, 1);
    let retired_file = harness
        .config
        .keys_path
        .join("retired")
        .join(format!("{}.key", old_ids[0]));
    assert!(retired_file.exists());
    assert_eq!(
        harness.manager.keystore().load_key("targets").await.unwrap().id(),
        new_ids[0]
    );
}

#[tokio::test]
async fn rotated_root_is_cross_signed() {
    let harness = Harness::initialized().await;
    let before = harness.root().await;
    let old_id = before.signed.role_keys(Role::Root).unwrap().keyids[0].clone();

    let new_ids = harness.manager.rotate_key(Role::Root).await.unwrap();
    let root = harness.root().await;
    assert_eq!(root.signed.version, 2);

    // satisfies both the previous root and itself
    verify_role(&before.signed, &root).unwrap();
    verify_role(&root.signed, &root).unwrap();
    let signers: Vec<_> = root.signatures.iter().map(|s| s.keyid.clone()).collect();
    assert!(signers.contains(&old_id));
    assert!(signers.contains(&new_ids[0]));

    use keel_core::Store;
    assert!(harness.store.exists("2.root.json").await.unwrap());
}

#[tokio::test]
async fn retired_keys_are_pruned_after_grace_period() {
    let harness = Harness::initialized().await;
    let old_id = harness
        .root()
        .await
        .signed
        .role_keys(Role::Snapshot)
        .unwrap()
        .keyids[0]
        .clone();
    harness.manager.rotate_key(Role::Snapshot).await.unwrap();

    // still inside the grace period: nothing to prune
    harness.clock.advance(Duration::hours(1));
    let report = harness.manager.auto_refresh().await.unwrap();
    assert!(report.is_noop());
    assert!(harness.root().await.signed.keys.contains_key(&old_id));

    // the timestamp that was current at rotation time has expired
    harness.clock.advance(Duration::hours(24));
    let report = harness.manager.auto_refresh().await.unwrap();
    assert_eq!(report.pruned_keys, vec![old_id.clone()]);
    assert!(report.timestamp_refreshed);

    let root = harness.root().await;
    assert_eq!(root.signed.version, 3);
    assert!(!root.signed.keys.contains_key(&old_id));
    verify_role(&root.signed, &root).unwrap();
    assert_eq!(harness.manager.status().await.retired_key_count, 0);
    assert!(
        !harness
            .config
            .keys_path
            .join("retired")
            .join(format!("{old_id}.key"))
            .exists()
    );
    assert!(
        harness
            .manager
            .keystore()
            .load_retired_schedule()
            .await
            .unwrap()
            .is_empty()
    );

    // a fresh snapshot is no longer signed by the pruned key
    harness
        .manager
        .add_target("a", Bytes::from_static(b"a"), None)
        .await
        .unwrap();
    let snapshot = harness.snapshot().await;
    assert!(snapshot.signatures.iter().all(|s| s.keyid != old_id));
    verify_role(&root.signed, &snapshot).unwrap();
}

#[tokio::test]
async fn grace_period_survives_reload() {
    let harness = Harness::initialized().await;
    let old_id = harness
        .root()
        .await
        .signed
        .role_keys(Role::Targets)
        .unwrap()
        .keyids[0]
        .clone();
    harness.manager.rotate_key(Role::Targets).await.unwrap();

    let reopened = harness.reopen().await;
    assert_eq!(reopened.status().await.retired_key_count, 1);
    reopened
        .add_target("a", Bytes::from_static(b"a"), None)
        .await
        .unwrap();
    let targets = harness.targets().await;
    assert!(targets.signatures.iter().any(|s| s.keyid == old_id));
    verify_role(&harness.root().await.signed, &targets).unwrap();
}
