// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use test_utils::{assert_root_signed_under, key_server, synced_repo};
use tuf_keyserver::Error;
use tuf_schema::{RepoId, RoleType};

#[tokio::test]
async fn rotation_cross_signs_and_takes_old_key_offline() {
    let server = key_server();
    let (repo_id, old_root) = synced_repo(&server).await;
    let old_keyid = old_root.signed.roles[&RoleType::Root].keyids[0].clone();
    let old_targets_keys = old_root.signed.roles[&RoleType::Targets].clone();

    let new_root = server.rotate_root(repo_id).await.unwrap();
    assert_eq!(
        new_root.signed.version.get(),
        old_root.signed.version.get() + 1
    );

    // The root role now lists only the new key.
    let new_role_keys = &new_root.signed.roles[&RoleType::Root];
    assert_eq!(new_role_keys.keyids.len(), 1);
    let new_keyid = new_role_keys.keyids[0].clone();
    assert_ne!(new_keyid, old_keyid);

    // Other role assignments are preserved.
    assert_eq!(
        new_root.signed.roles[&RoleType::Targets].keyids,
        old_targets_keys.keyids
    );

    // Cross-signed: valid under the old root's key set and under its own.
    assert_root_signed_under(&new_root, &old_root.signed);
    assert_root_signed_under(&new_root, &new_root.signed);
    let signing_keyids: Vec<_> = new_root
        .signatures
        .iter()
        .map(|signature| signature.keyid.clone())
        .collect();
    assert!(signing_keyids.contains(&old_keyid));
    assert!(signing_keyids.contains(&new_keyid));

    // The old private key is gone; deleting it again is a no-op.
    server
        .delete_private_key(repo_id, &old_keyid)
        .await
        .unwrap();
    server
        .delete_private_key(repo_id, &old_keyid)
        .await
        .unwrap();

    // The new key still signs.
    assert!(server
        .has_online_key(repo_id, RoleType::Root)
        .await
        .unwrap());
}

#[tokio::test]
async fn rotation_requires_an_existing_root() {
    let server = key_server();
    let result = server.rotate_root(RepoId::generate()).await;
    assert!(matches!(result, Err(Error::MissingEntity { .. })));
}

#[tokio::test]
async fn double_rotation_walks_the_version_chain() {
    let server = key_server();
    let (repo_id, first) = synced_repo(&server).await;
    let second = server.rotate_root(repo_id).await.unwrap();
    let third = server.rotate_root(repo_id).await.unwrap();

    assert_eq!(second.signed.version.get(), 2);
    assert_eq!(third.signed.version.get(), 3);
    assert_root_signed_under(&third, &second.signed);
    assert_ne!(
        first.signed.roles[&RoleType::Root].keyids,
        third.signed.roles[&RoleType::Root].keyids
    );
}
