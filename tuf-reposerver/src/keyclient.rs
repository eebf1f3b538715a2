// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The repo server's view of the key server. The two components share no
//! state; this trait is the service boundary between them, and an HTTP
//! implementation of it lives with the transport layer.

use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::num::NonZeroU64;
use tuf_schema::messages::{code, CreateRootRequest};
use tuf_schema::{RepoId, RoleType, Root, Signed};

/// Alias for results of key server calls.
pub type KeyClientResult<T> = std::result::Result<T, KeyClientError>;

/// An error response from the key server.
#[derive(Debug, Clone)]
pub struct KeyClientError {
    /// The stable error code from the response body.
    pub code: String,
    /// The human-readable description from the response body.
    pub description: String,
}

impl fmt::Display for KeyClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.description)
    }
}

impl std::error::Error for KeyClientError {}

impl From<KeyClientError> for Error {
    fn from(err: KeyClientError) -> Self {
        match err.code.as_str() {
            code::KEYS_NOT_READY => Error::KeysNotReady {
                description: err.description,
            },
            code::ROLE_KEY_NOT_FOUND => Error::RoleKeyNotFound {
                description: err.description,
            },
            code::MISSING_ENTITY => Error::MissingEntity {
                what: err.description,
            },
            code::ENTITY_ALREADY_EXISTS => Error::EntityAlreadyExists {
                what: err.description,
            },
            _ => Error::KeyServer {
                code: err.code,
                description: err.description,
            },
        }
    }
}

/// Calls into the key server.
#[async_trait]
pub trait KeyClient: Send + Sync {
    /// Requests creation of a repository's root role and keys.
    async fn create_root(&self, repo_id: RepoId, request: CreateRootRequest)
        -> KeyClientResult<()>;

    /// The current signed root, refreshed when it expires before
    /// `expire_not_before`.
    async fn fetch_root(
        &self,
        repo_id: RepoId,
        expire_not_before: Option<DateTime<Utc>>,
    ) -> KeyClientResult<Signed<Root>>;

    /// A specific historical root version.
    async fn fetch_root_version(
        &self,
        repo_id: RepoId,
        version: NonZeroU64,
    ) -> KeyClientResult<Signed<Root>>;

    /// Signs `payload` with every online key of the role.
    async fn sign(
        &self,
        repo_id: RepoId,
        role_type: RoleType,
        payload: Value,
    ) -> KeyClientResult<Signed<Value>>;

    /// Rotates the repository's root key.
    async fn rotate_root(&self, repo_id: RepoId) -> KeyClientResult<()>;

    /// Whether the role has at least one online private key.
    async fn has_online_key(&self, repo_id: RepoId, role_type: RoleType) -> KeyClientResult<bool>;
}
