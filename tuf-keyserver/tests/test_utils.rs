// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use std::num::NonZeroU64;
use std::sync::Arc;
use tuf_keyserver::config::KeyServerConfig;
use tuf_keyserver::memory::{MemoryKeyGenRequestStore, MemoryKeyStore, MemoryRootRoleStore};
use tuf_keyserver::secret::MemorySecretStore;
use tuf_keyserver::KeyServer;
use tuf_schema::key::KeyType;
use tuf_schema::messages::CreateRootRequest;
use tuf_schema::{RepoId, Root, Signed};

/// A key server over fresh in-memory stores.
pub fn key_server() -> KeyServer {
    KeyServer::new(
        Arc::new(MemoryKeyGenRequestStore::default()),
        Arc::new(MemoryKeyStore::default()),
        Arc::new(MemorySecretStore::default()),
        Arc::new(MemoryRootRoleStore::default()),
        KeyServerConfig::default(),
    )
}

/// Creates a repo with synchronously generated Ed25519 keys and returns its
/// initial root.
pub async fn synced_repo(server: &KeyServer) -> (RepoId, Signed<Root>) {
    let repo_id = RepoId::generate();
    server
        .create_root(
            repo_id,
            CreateRootRequest {
                threshold: NonZeroU64::new(1).unwrap(),
                key_type: KeyType::Ed25519,
                force_sync: true,
            },
        )
        .await
        .unwrap();
    let root = server.find_root(repo_id).await.unwrap();
    (repo_id, root)
}

/// Verifies a signed root against a key set/threshold declared in `trusted`.
pub fn assert_root_signed_under(payload: &Signed<Root>, trusted: &Root) {
    let canonical = tuf_schema::canonical_bytes(&payload.signed, "root role").unwrap();
    let role_keys = trusted.roles.get(&tuf_schema::RoleType::Root).unwrap();
    let relevant: Vec<tuf_schema::Signature> = payload
        .signatures
        .iter()
        .filter(|signature| role_keys.keyids.contains(&signature.keyid))
        .cloned()
        .collect();
    tuf_schema::verify_signatures(&trusted.keys, role_keys, "root", &canonical, &relevant)
        .unwrap();
}
