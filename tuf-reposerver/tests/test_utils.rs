// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::num::NonZeroU64;
use std::sync::Arc;
use tempfile::TempDir;
use tuf_keyserver::config::KeyServerConfig;
use tuf_keyserver::memory::{MemoryKeyGenRequestStore, MemoryKeyStore, MemoryRootRoleStore};
use tuf_keyserver::secret::MemorySecretStore;
use tuf_keyserver::KeyServer;
use tuf_reposerver::blob::FsBlobStore;
use tuf_reposerver::keyclient::{KeyClient, KeyClientError, KeyClientResult};
use tuf_reposerver::memory::{
    MemoryDelegationStore, MemoryRepoStore, MemorySignedRoleStore, MemoryTargetItemStore,
};
use tuf_reposerver::targets::CreateTargetItem;
use tuf_reposerver::{RepoServer, RepoServerConfig};
use tuf_schema::key::KeyType;
use tuf_schema::messages::CreateRootRequest;
use tuf_schema::{RepoId, RoleType, Root, Signed};

/// Adapts an in-process [`KeyServer`] to the repo server's [`KeyClient`]
/// seam, the way the HTTP client does in a deployment.
pub struct DirectKeyClient {
    pub inner: KeyServer,
}

fn convert(err: &tuf_keyserver::Error) -> KeyClientError {
    KeyClientError {
        code: err.code().to_string(),
        description: err.to_string(),
    }
}

#[async_trait]
impl KeyClient for DirectKeyClient {
    async fn create_root(
        &self,
        repo_id: RepoId,
        request: CreateRootRequest,
    ) -> KeyClientResult<()> {
        self.inner
            .create_root(repo_id, request)
            .await
            .map(|_| ())
            .map_err(|err| convert(&err))
    }

    async fn fetch_root(
        &self,
        repo_id: RepoId,
        expire_not_before: Option<DateTime<Utc>>,
    ) -> KeyClientResult<Signed<Root>> {
        self.inner
            .root_for(repo_id, expire_not_before)
            .await
            .map_err(|err| convert(&err))
    }

    async fn fetch_root_version(
        &self,
        repo_id: RepoId,
        version: NonZeroU64,
    ) -> KeyClientResult<Signed<Root>> {
        self.inner
            .find_root_version(repo_id, version)
            .await
            .map_err(|err| convert(&err))
    }

    async fn sign(
        &self,
        repo_id: RepoId,
        role_type: RoleType,
        payload: Value,
    ) -> KeyClientResult<Signed<Value>> {
        self.inner
            .sign_payload(repo_id, role_type, payload)
            .await
            .map_err(|err| convert(&err))
    }

    async fn rotate_root(&self, repo_id: RepoId) -> KeyClientResult<()> {
        self.inner
            .rotate_root(repo_id)
            .await
            .map(|_| ())
            .map_err(|err| convert(&err))
    }

    async fn has_online_key(&self, repo_id: RepoId, role_type: RoleType) -> KeyClientResult<bool> {
        self.inner
            .has_online_key(repo_id, role_type)
            .await
            .map_err(|err| convert(&err))
    }
}

/// A repo server with in-memory stores, a filesystem blob store, and a
/// direct key server, plus one freshly created repository.
pub struct TestContext {
    pub server: RepoServer,
    pub keyserver: KeyServer,
    pub repo_id: RepoId,
    // Held so the blob directory outlives the test body.
    pub blob_dir: TempDir,
}

pub async fn new_repo() -> TestContext {
    new_repo_with_config(RepoServerConfig::default()).await
}

pub async fn new_repo_with_config(config: RepoServerConfig) -> TestContext {
    let keyserver = KeyServer::new(
        Arc::new(MemoryKeyGenRequestStore::default()),
        Arc::new(MemoryKeyStore::default()),
        Arc::new(MemorySecretStore::default()),
        Arc::new(MemoryRootRoleStore::default()),
        KeyServerConfig::default(),
    );
    let blob_dir = tempfile::tempdir().unwrap();
    let server = RepoServer::new(
        Arc::new(MemoryRepoStore::default()),
        Arc::new(MemoryTargetItemStore::default()),
        Arc::new(MemorySignedRoleStore::default()),
        Arc::new(MemoryDelegationStore::default()),
        Arc::new(FsBlobStore::new(blob_dir.path())),
        Arc::new(DirectKeyClient {
            inner: keyserver.clone(),
        }),
        config,
    );
    let repo_id = RepoId::generate();
    server
        .create_repository(repo_id, KeyType::Ed25519)
        .await
        .unwrap();
    TestContext {
        server,
        keyserver,
        repo_id,
        blob_dir,
    }
}

/// A minimal create-target request for content with the given digest.
pub fn create_item(length: u64, sha256: &str) -> CreateTargetItem {
    CreateTargetItem {
        length,
        sha256: sha256.parse().unwrap(),
        name: None,
        version: None,
        hardware_ids: Vec::new(),
        target_format: None,
        uri: None,
        proprietary: None,
    }
}
