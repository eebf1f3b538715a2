// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence seams for the repo server: repositories, the target catalog,
//! the current signed roles, and stored delegated targets. Relational
//! backends implement these traits; in-memory reference implementations live
//! in [`crate::memory`].

use crate::error::{self, Result};
use crate::targets::{Paginated, TargetItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::num::NonZeroU64;
use tuf_schema::decoded::{Decoded, Hex};
use tuf_schema::{sha256, RepoId, RoleType, Signed, TargetFilename};

/// A repository and its per-repository settings.
#[derive(Debug, Clone)]
pub struct RepoRecord {
    /// The repository identifier.
    pub repo_id: RepoId,
    /// When the repository was created.
    pub created_at: DateTime<Utc>,
    /// Roles whose expiry falls before this instant are refreshed on read.
    pub targets_expire_not_before: Option<DateTime<Utc>>,
}

/// The current persisted version of one non-root role.
#[derive(Debug, Clone)]
pub struct SignedRoleRow {
    /// The repository this role belongs to.
    pub repo_id: RepoId,
    /// The role type; one current row exists per `(repo_id, role_type)`.
    pub role_type: RoleType,
    /// The role version; replaced in place but strictly increasing.
    pub version: NonZeroU64,
    /// When this role expires.
    pub expires: DateTime<Utc>,
    /// SHA-256 over `canonical_bytes`.
    pub checksum: Decoded<Hex>,
    /// Length of `canonical_bytes`.
    pub length: u64,
    /// Canonical JSON of the complete signed payload; these exact bytes are
    /// served to clients and referenced by meta entries.
    pub canonical_bytes: Vec<u8>,
}

impl SignedRoleRow {
    /// Builds a row from a payload's canonical bytes, computing the checksum
    /// and length.
    pub fn new(
        repo_id: RepoId,
        role_type: RoleType,
        version: NonZeroU64,
        expires: DateTime<Utc>,
        canonical_bytes: Vec<u8>,
    ) -> Self {
        let checksum = sha256(&canonical_bytes);
        let length = canonical_bytes.len() as u64;
        Self {
            repo_id,
            role_type,
            version,
            expires,
            checksum,
            length,
            canonical_bytes,
        }
    }

    /// Parses the stored payload.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<Signed<T>> {
        serde_json::from_slice(&self.canonical_bytes).context(error::JsonSnafu {
            doing: format!("parsing stored {} role", self.role_type),
        })
    }
}

/// One stored delegated targets document.
#[derive(Debug, Clone)]
pub struct DelegationRow {
    /// The repository this delegation belongs to.
    pub repo_id: RepoId,
    /// The delegation name from the delegating targets document.
    pub name: String,
    /// The document version; strictly increasing per name.
    pub version: NonZeroU64,
    /// Canonical JSON of the complete signed payload.
    pub canonical_bytes: Vec<u8>,
}

/// Persistence for repositories.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Creates a repository; fails with `EntityAlreadyExists` when the
    /// identifier is taken.
    async fn create(&self, record: &RepoRecord) -> Result<()>;

    /// Looks up a repository.
    async fn find(&self, repo_id: RepoId) -> Result<Option<RepoRecord>>;

    /// Replaces the repository's expire-not-before instant.
    async fn set_targets_expire_not_before(
        &self,
        repo_id: RepoId,
        instant: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Persistence for the target catalog.
#[async_trait]
pub trait TargetItemStore: Send + Sync {
    /// Inserts or replaces an item, keyed by `(repo_id, filename)`.
    async fn persist(&self, repo_id: RepoId, item: &TargetItem) -> Result<()>;

    /// Looks up one item.
    async fn find(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<Option<TargetItem>>;

    /// Removes one item; fails with `MissingEntity` when absent.
    async fn delete(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<()>;

    /// Every item of the repository, ordered by filename.
    async fn all(&self, repo_id: RepoId) -> Result<Vec<TargetItem>>;

    /// One page of items, ordered by filename, optionally filtered by a
    /// filename substring.
    async fn list(
        &self,
        repo_id: RepoId,
        name_contains: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<Paginated<TargetItem>>;
}

/// Persistence for the current signed roles.
#[async_trait]
pub trait SignedRoleStore: Send + Sync {
    /// The current row for a role.
    async fn find(&self, repo_id: RepoId, role_type: RoleType) -> Result<Option<SignedRoleRow>>;

    /// Atomically replaces the given roles. For a role that already has a
    /// row, the new version must be exactly one greater than the stored
    /// version, otherwise the whole write fails with `InvalidVersionBump`
    /// and nothing is changed.
    async fn persist_all(&self, repo_id: RepoId, rows: &[SignedRoleRow]) -> Result<()>;
}

/// Persistence for delegated targets documents.
#[async_trait]
pub trait DelegationStore: Send + Sync {
    /// Inserts or replaces a delegation; the version must be strictly
    /// greater than the stored version for the same name.
    async fn persist(&self, row: &DelegationRow) -> Result<()>;

    /// Looks up a stored delegation by name.
    async fn find(&self, repo_id: RepoId, name: &str) -> Result<Option<DelegationRow>>;
}
