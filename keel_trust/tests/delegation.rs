mod common;

use common::Harness;
use keel_trust::{NewDelegation, TrustError, verify_role};

#[tokio::test]
async fn add_list_remove() {
    let harness = Harness::initialized().await;
    let manager = &harness.manager;

    let role = manager
        .add_delegation(NewDelegation::new("team-a", ["team-a/*"], 1))
        .await
        .unwrap();
    assert_eq!(role.keyids.len(), 1);
    assert!(!role.terminating);

    let listed = manager.list_delegations().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "team-a");
    assert_eq!(listed[0].paths, vec!["team-a/*".to_owned()]);

    let targets = harness.targets().await;
    assert_eq!(targets.signed.version, 2);
    let delegations = targets.signed.delegations.as_ref().unwrap();
    assert!(delegations.keys.contains_key(&role.keyids[0]));
    assert_eq!(harness.snapshot().await.signed.version, 2);
    assert!(harness.config.keys_path.join("team-a.key").exists());

    manager.remove_delegation("team-a").await.unwrap();
    assert!(manager.list_delegations().await.unwrap().is_empty());
    let targets = harness.targets().await;
    assert_eq!(targets.signed.version, 3);
    assert!(targets.signed.delegations.is_none());
    assert!(!harness.config.keys_path.join("team-a.key").exists());
    verify_role(&harness.root().await.signed, &targets).unwrap();
}

#[tokio::test]
async fn remove_keeps_keys_of_other_delegations() {
    let harness = Harness::initialized().await;
    let manager = &harness.manager;
    let a = manager
        .add_delegation(NewDelegation::new("team-a", ["team-a/*"], 1))
        .await
        .unwrap();
    let b = manager
        .add_delegation(NewDelegation::new("team-b", ["team-b/*"], 2).terminating(true))
        .await
        .unwrap();
    assert_eq!(b.keyids.len(), 2);
    assert!(harness.config.keys_path.join("team-b.1.key").exists());

    manager.remove_delegation("team-a").await.unwrap();
    let targets = harness.targets().await;
    let delegations = targets.signed.delegations.unwrap();
    assert!(!delegations.keys.contains_key(&a.keyids[0]));
    for id in &b.keyids {
        assert!(delegations.keys.contains_key(id));
    }
    assert_eq!(delegations.roles.len(), 1);
    assert!(delegations.roles[0].terminating);
}

#[tokio::test]
async fn rejects_bad_delegations() {
    let harness = Harness::initialized().await;
    let manager = &harness.manager;
    manager
        .add_delegation(NewDelegation::new("team-a", ["team-a/*"], 1))
        .await
        .unwrap();
    let writes = harness.store.write_count();

    for delegation in [
        NewDelegation::new("team-a", ["other/*"], 1),
        NewDelegation::new("snapshot", ["x/*"], 1),
        NewDelegation::new("bad name", ["x/*"], 1),
        NewDelegation::new("team-c", Vec::<String>::new(), 1),
        NewDelegation::new("team-c", ["x/*"], 0),
    ] {
        let err = manager.add_delegation(delegation).await.unwrap_err();
        assert!(matches!(err, TrustError::InvalidInput(_)), "{err}");
    }
    assert_eq!(harness.store.write_count(), writes);
    assert_eq!(manager.list_delegations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn remove_unknown_is_not_found() {
    let harness = Harness::initialized().await;
    let err = harness.manager.remove_delegation("ghost").await.unwrap_err();
    assert!(matches!(
        err,
        TrustError::NotFound {
            kind: "delegation",
            ..
        }
    ));
    assert_eq!(harness.targets().await.signed.version, 1);
}

#[tokio::test]
async fn delegation_keys_survive_reload() {
    let harness = Harness::initialized().await;
    let role = harness
        .manager
        .add_delegation(NewDelegation::new("team-a", ["team-a/*"], 1))
        .await
        .unwrap();

    let reopened = harness.reopen().await;
    let status = reopened.status().await;
    assert_eq!(status.delegation_count, 1);
    let key = status
        .keys
        .iter()
        .find(|k| k.id == role.keyids[0])
        .expect("delegation key loaded");
    assert_eq!(key.roles, vec!["team-a".to_owned()]);
    assert!(key.has_private);
    assert!(
        reopened
            .export_public_keys()
            .await
            .unwrap()
            .contains_key(&role.keyids[0])
    );
}
