// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory reference implementations of the persistence seams, used by
//! tests and local development. Version-bump checks happen under a single
//! write lock so concurrent cascades serialize the same way a relational
//! backend's transactions would.

use crate::error::{self, Result};
use crate::store::{
    DelegationRow, DelegationStore, RepoRecord, RepoStore, SignedRoleRow, SignedRoleStore,
    TargetItemStore,
};
use crate::targets::{Paginated, TargetItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::ensure;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tuf_schema::{RepoId, RoleType, TargetFilename};

/// In-memory [`RepoStore`].
#[derive(Debug, Default)]
pub struct MemoryRepoStore {
    inner: RwLock<HashMap<RepoId, RepoRecord>>,
}

#[async_trait]
impl RepoStore for MemoryRepoStore {
    async fn create(&self, record: &RepoRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        ensure!(
            !inner.contains_key(&record.repo_id),
            error::EntityAlreadyExistsSnafu {
                what: format!("repo {}", record.repo_id),
            }
        );
        inner.insert(record.repo_id, record.clone());
        Ok(())
    }

    async fn find(&self, repo_id: RepoId) -> Result<Option<RepoRecord>> {
        Ok(self.inner.read().await.get(&repo_id).cloned())
    }

    async fn set_targets_expire_not_before(
        &self,
        repo_id: RepoId,
        instant: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner.get_mut(&repo_id).ok_or_else(|| {
            error::MissingEntitySnafu {
                what: format!("repo {repo_id}"),
            }
            .build()
        })?;
        record.targets_expire_not_before = instant;
        Ok(())
    }
}

/// In-memory [`TargetItemStore`].
#[derive(Debug, Default)]
pub struct MemoryTargetItemStore {
    inner: RwLock<HashMap<RepoId, BTreeMap<TargetFilename, TargetItem>>>,
}

#[async_trait]
impl TargetItemStore for MemoryTargetItemStore {
    async fn persist(&self, repo_id: RepoId, item: &TargetItem) -> Result<()> {
        self.inner
            .write()
            .await
            .entry(repo_id)
            .or_default()
            .insert(item.filename.clone(), item.clone());
        Ok(())
    }

    async fn find(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<Option<TargetItem>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&repo_id)
            .and_then(|items| items.get(filename))
            .cloned())
    }

    async fn delete(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<()> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .get_mut(&repo_id)
            .and_then(|items| items.remove(filename));
        ensure!(
            removed.is_some(),
            error::MissingEntitySnafu {
                what: format!("target {filename} in repo {repo_id}"),
            }
        );
        Ok(())
    }

    async fn all(&self, repo_id: RepoId) -> Result<Vec<TargetItem>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&repo_id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list(
        &self,
        repo_id: RepoId,
        name_contains: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<Paginated<TargetItem>> {
        let inner = self.inner.read().await;
        let matching: Vec<&TargetItem> = inner
            .get(&repo_id)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|item| {
                name_contains.map_or(true, |needle| item.filename.as_str().contains(needle))
            })
            .collect();
        let total = matching.len() as u64;
        let values = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(Paginated {
            total,
            offset,
            limit,
            values,
        })
    }
}

/// In-memory [`SignedRoleStore`].
#[derive(Debug, Default)]
pub struct MemorySignedRoleStore {
    inner: RwLock<HashMap<RepoId, HashMap<RoleType, SignedRoleRow>>>,
}

#[async_trait]
impl SignedRoleStore for MemorySignedRoleStore {
    async fn find(&self, repo_id: RepoId, role_type: RoleType) -> Result<Option<SignedRoleRow>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&repo_id)
            .and_then(|roles| roles.get(&role_type))
            .cloned())
    }

    async fn persist_all(&self, repo_id: RepoId, rows: &[SignedRoleRow]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let roles = inner.entry(repo_id).or_default();
        // Validate every row before changing anything, so a failed bump
        // leaves the set of roles untouched.
        for row in rows {
            if let Some(current) = roles.get(&row.role_type) {
                let expected = current.version.get() + 1;
                ensure!(
                    row.version.get() == expected,
                    error::InvalidVersionBumpSnafu {
                        role: row.role_type.to_string(),
                        expected,
                        given: row.version.get(),
                    }
                );
            }
        }
        for row in rows {
            roles.insert(row.role_type, row.clone());
        }
        Ok(())
    }
}

/// In-memory [`DelegationStore`].
#[derive(Debug, Default)]
pub struct MemoryDelegationStore {
    inner: RwLock<HashMap<(RepoId, String), DelegationRow>>,
}

#[async_trait]
impl DelegationStore for MemoryDelegationStore {
    async fn persist(&self, row: &DelegationRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (row.repo_id, row.name.clone());
        if let Some(current) = inner.get(&key) {
            ensure!(
                row.version > current.version,
                error::InvalidVersionBumpSnafu {
                    role: row.name.clone(),
                    expected: current.version.get() + 1,
                    given: row.version.get(),
                }
            );
        }
        inner.insert(key, row.clone());
        Ok(())
    }

    async fn find(&self, repo_id: RepoId, name: &str) -> Result<Option<DelegationRow>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(repo_id, name.to_string()))
            .cloned())
    }
}
