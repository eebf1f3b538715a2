// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use serde_json::json;
use test_utils::{key_server, synced_repo};
use tuf_keyserver::Error;
use tuf_schema::RoleType;

#[tokio::test]
async fn oracle_signs_with_the_declared_role_key() {
    let server = key_server();
    let (repo_id, root) = synced_repo(&server).await;

    let payload = json!({"campaign": "beta", "serial": 7});
    let signed = server
        .sign_payload(repo_id, RoleType::Targets, payload.clone())
        .await
        .unwrap();
    assert_eq!(signed.signed, payload);
    assert_eq!(signed.signatures.len(), 1);

    let canonical = tuf_schema::canonical_bytes(&payload, "payload").unwrap();
    let signature = &signed.signatures[0];
    let targets_keyid = &root.signed.roles[&RoleType::Targets].keyids[0];
    assert_eq!(&signature.keyid, targets_keyid);
    let key = &root.signed.keys[targets_keyid];
    assert!(key.verify(&canonical, &signature.sig));
}

#[tokio::test]
async fn offline_role_yields_role_key_not_found() {
    let server = key_server();
    let (repo_id, root) = synced_repo(&server).await;
    let targets_keyid = root.signed.roles[&RoleType::Targets].keyids[0].clone();

    server
        .delete_private_key(repo_id, &targets_keyid)
        .await
        .unwrap();
    assert!(!server
        .has_online_key(repo_id, RoleType::Targets)
        .await
        .unwrap());

    match server
        .sign_payload(repo_id, RoleType::Targets, json!({}))
        .await
    {
        Err(Error::RoleKeyNotFound {
            role: RoleType::Targets,
        }) => {}
        other => panic!("expected RoleKeyNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn deleting_an_unknown_key_is_an_error() {
    let server = key_server();
    let (repo_id, _) = synced_repo(&server).await;
    let bogus = tuf_schema::sha256(b"never generated");
    assert!(matches!(
        server.delete_private_key(repo_id, &bogus).await,
        Err(Error::MissingEntity { .. })
    ));
}

#[tokio::test]
async fn role_slots_are_added_idempotently() {
    let server = key_server();
    let (repo_id, root) = synced_repo(&server).await;
    assert!(!root
        .signed
        .roles
        .contains_key(&RoleType::OfflineUpdates));

    let extended = server
        .add_roles(
            repo_id,
            &[RoleType::OfflineUpdates, RoleType::RemoteSessions],
        )
        .await
        .unwrap();
    assert_eq!(extended.signed.version.get(), 2);
    assert!(extended.signed.roles.contains_key(&RoleType::OfflineUpdates));
    assert!(extended.signed.roles.contains_key(&RoleType::RemoteSessions));

    // A second call adds nothing and produces no new version.
    let again = server
        .add_roles(repo_id, &[RoleType::OfflineUpdates])
        .await
        .unwrap();
    assert_eq!(again.signed.version.get(), 2);

    // The new role's key can sign immediately.
    let signed = server
        .sign_payload(repo_id, RoleType::OfflineUpdates, json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(signed.signatures.len(), 1);
}
