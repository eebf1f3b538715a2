// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence seams for the key server: key generation requests, public
//! keys, and signed root roles. Relational backends implement these traits;
//! in-memory reference implementations live in [`crate::memory`].

use crate::error::{self, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use tuf_schema::decoded::{Decoded, Hex};
use tuf_schema::key::{Key, KeyType};
use tuf_schema::{RepoId, RoleType, Root, Signature, Signed};
use uuid::Uuid;

/// Identifier of a key generation request.
#[derive(
    Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct KeyGenId(Uuid);

impl KeyGenId {
    /// Creates a fresh random identifier.
    pub fn generate() -> Self {
        KeyGenId(Uuid::new_v4())
    }
}

impl fmt::Display for KeyGenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for KeyGenId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(KeyGenId(s.parse()?))
    }
}

/// The lifecycle state of a key generation request. Requests move from
/// `Requested` to exactly one of the terminal states; `Error` moves back to
/// `Requested` only through an explicit retry.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyGenStatus {
    /// Waiting for the key generation engine.
    Requested,
    /// The keypair exists and is persisted.
    Generated,
    /// Generation failed; `description` carries the truncated cause.
    Error,
}

/// The unit of work for the key generation engine.
#[derive(Debug, Clone)]
pub struct KeyGenRequest {
    /// Identifier of this request.
    pub id: KeyGenId,
    /// The repository the key belongs to.
    pub repo_id: RepoId,
    /// The role the key will sign for.
    pub role_type: RoleType,
    /// The kind of key to generate.
    pub key_type: KeyType,
    /// Key size in bits, for key types that have one.
    pub key_size: Option<u32>,
    /// The signature threshold of the role this key is generated for.
    pub threshold: NonZeroU64,
    /// Lifecycle state.
    pub status: KeyGenStatus,
    /// Failure cause or operator note.
    pub description: Option<String>,
}

/// The persisted public half of a repository key.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    /// Content-addressed key ID.
    pub key_id: Decoded<Hex>,
    /// The repository the key belongs to.
    pub repo_id: RepoId,
    /// The role the key signs for.
    pub role_type: RoleType,
    /// The public key as it appears in metadata.
    pub public: Key,
}

/// One immutable signed root role version.
#[derive(Debug, Clone)]
pub struct SignedRootRow {
    /// The repository this root belongs to.
    pub repo_id: RepoId,
    /// The root version; versions form a dense sequence starting at 1.
    pub version: NonZeroU64,
    /// When this root expires.
    pub expires: DateTime<Utc>,
    /// Canonical JSON of the unsigned root document.
    pub canonical_bytes: Vec<u8>,
    /// Signatures over `canonical_bytes`.
    pub signatures: Vec<Signature>,
}

impl SignedRootRow {
    /// Parses the stored root document.
    pub fn root(&self) -> Result<Root> {
        serde_json::from_slice(&self.canonical_bytes).context(error::JsonSnafu {
            doing: "parsing stored root role",
        })
    }

    /// Reassembles the signed payload served to clients.
    pub fn payload(&self) -> Result<Signed<Root>> {
        Ok(Signed {
            signed: self.root()?,
            signatures: self.signatures.clone(),
        })
    }
}

/// Persistence for key generation requests.
#[async_trait]
pub trait KeyGenRequestStore: Send + Sync {
    /// Inserts or replaces a request.
    async fn persist(&self, request: &KeyGenRequest) -> Result<()>;

    /// All requests for a repository.
    async fn find_by_repo(&self, repo_id: RepoId) -> Result<Vec<KeyGenRequest>>;

    /// Up to `limit` requests in the `Requested` state, across all
    /// repositories.
    async fn fetch_requested(&self, limit: usize) -> Result<Vec<KeyGenRequest>>;

    /// Updates the state of one request.
    async fn set_status(
        &self,
        id: KeyGenId,
        status: KeyGenStatus,
        description: Option<String>,
    ) -> Result<()>;
}

/// Persistence for public keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Inserts a key; key IDs are globally unique, so persisting a key that
    /// already exists fails with `EntityAlreadyExists`.
    async fn persist(&self, record: &KeyRecord) -> Result<()>;

    /// Looks up a key by ID within a repository.
    async fn find(&self, repo_id: RepoId, key_id: &Decoded<Hex>) -> Result<Option<KeyRecord>>;

    /// All keys generated for a role within a repository.
    async fn for_role(&self, repo_id: RepoId, role_type: RoleType) -> Result<Vec<KeyRecord>>;
}

/// Persistence for signed root roles. Rows are immutable once written.
#[async_trait]
pub trait RootRoleStore: Send + Sync {
    /// Appends a new root version; the version must be exactly one greater
    /// than the latest persisted version (or 1 for the first).
    async fn persist(&self, row: &SignedRootRow) -> Result<()>;

    /// The latest persisted root for a repository.
    async fn latest(&self, repo_id: RepoId) -> Result<Option<SignedRootRow>>;

    /// A specific root version.
    async fn find_version(
        &self,
        repo_id: RepoId,
        version: NonZeroU64,
    ) -> Result<Option<SignedRootRow>>;
}
