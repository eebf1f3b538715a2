// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory reference implementations of the persistence seams, used by
//! tests and local development. Version-bump checks happen under a single
//! write lock so concurrent writers serialize the same way a relational
//! backend's transactions would.

use crate::error::{self, Result};
use crate::store::{
    KeyGenId, KeyGenRequest, KeyGenRequestStore, KeyGenStatus, KeyRecord, KeyStore, RootRoleStore,
    SignedRootRow,
};
use async_trait::async_trait;
use snafu::ensure;
use std::collections::HashMap;
use std::num::NonZeroU64;
use tokio::sync::RwLock;
use tuf_schema::decoded::{Decoded, Hex};
use tuf_schema::{RepoId, RoleType};

/// In-memory [`KeyGenRequestStore`].
#[derive(Debug, Default)]
pub struct MemoryKeyGenRequestStore {
    inner: RwLock<HashMap<KeyGenId, KeyGenRequest>>,
}

#[async_trait]
impl KeyGenRequestStore for MemoryKeyGenRequestStore {
    async fn persist(&self, request: &KeyGenRequest) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(request.id, request.clone());
        Ok(())
    }

    async fn find_by_repo(&self, repo_id: RepoId) -> Result<Vec<KeyGenRequest>> {
        let mut requests: Vec<KeyGenRequest> = self
            .inner
            .read()
            .await
            .values()
            .filter(|request| request.repo_id == repo_id)
            .cloned()
            .collect();
        requests.sort_by_key(|request| request.id);
        Ok(requests)
    }

    async fn fetch_requested(&self, limit: usize) -> Result<Vec<KeyGenRequest>> {
        let mut requests: Vec<KeyGenRequest> = self
            .inner
            .read()
            .await
            .values()
            .filter(|request| request.status == KeyGenStatus::Requested)
            .cloned()
            .collect();
        requests.sort_by_key(|request| request.id);
        requests.truncate(limit);
        Ok(requests)
    }

    async fn set_status(
        &self,
        id: KeyGenId,
        status: KeyGenStatus,
        description: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let request = inner.get_mut(&id).ok_or_else(|| {
            error::MissingEntitySnafu {
                what: format!("key generation request {id}"),
            }
            .build()
        })?;
        request.status = status;
        if description.is_some() {
            request.description = description;
        }
        Ok(())
    }
}

/// In-memory [`KeyStore`].
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    inner: RwLock<HashMap<Decoded<Hex>, KeyRecord>>,
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn persist(&self, record: &KeyRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        ensure!(
            !inner.contains_key(&record.key_id),
            error::EntityAlreadyExistsSnafu {
                what: format!("key {}", record.key_id),
            }
        );
        inner.insert(record.key_id.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, repo_id: RepoId, key_id: &Decoded<Hex>) -> Result<Option<KeyRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .get(key_id)
            .filter(|record| record.repo_id == repo_id)
            .cloned())
    }

    async fn for_role(&self, repo_id: RepoId, role_type: RoleType) -> Result<Vec<KeyRecord>> {
        let mut records: Vec<KeyRecord> = self
            .inner
            .read()
            .await
            .values()
            .filter(|record| record.repo_id == repo_id && record.role_type == role_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        Ok(records)
    }
}

/// In-memory [`RootRoleStore`].
#[derive(Debug, Default)]
pub struct MemoryRootRoleStore {
    inner: RwLock<HashMap<RepoId, Vec<SignedRootRow>>>,
}

#[async_trait]
impl RootRoleStore for MemoryRootRoleStore {
    async fn persist(&self, row: &SignedRootRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rows = inner.entry(row.repo_id).or_default();
        let expected = rows.len() as u64 + 1;
        ensure!(
            row.version.get() == expected,
            error::InvalidVersionBumpSnafu {
                repo_id: row.repo_id.to_string(),
                expected,
                given: row.version.get(),
            }
        );
        rows.push(row.clone());
        Ok(())
    }

    async fn latest(&self, repo_id: RepoId) -> Result<Option<SignedRootRow>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&repo_id)
            .and_then(|rows| rows.last())
            .cloned())
    }

    async fn find_version(
        &self,
        repo_id: RepoId,
        version: NonZeroU64,
    ) -> Result<Option<SignedRootRow>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&repo_id)
            .and_then(|rows| rows.get(version.get() as usize - 1))
            .cloned())
    }
}
