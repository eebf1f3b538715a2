// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tuf-reposerver` is the repo server core of a multi-tenant TUF repository
//! service. It owns the per-repository target catalog and the derived role
//! documents (`targets`, `snapshot`, `timestamp`), enforcing their
//! consistency: versions strictly increase, `snapshot` references the current
//! `targets`, `timestamp` references the current `snapshot`, hashes and
//! lengths are computed over canonical JSON, and expiry is refreshed on read
//! when stale.
//!
//! Three publishing modes are supported: online (server-signed through the
//! key server's signing oracle), offline (client-signed targets pushed with
//! an optimistic checksum), and delegated targets.
//!
//! Persistence, blob storage, and the key server connection are seams: see
//! [`store`], [`blob`], and [`keyclient`], with reference implementations in
//! [`memory`] and [`blob::FsBlobStore`].

#![forbid(missing_debug_implementations)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::used_underscore_binding
)]

pub mod blob;
pub mod config;
mod delegations;
pub mod error;
pub mod keyclient;
pub mod memory;
mod offline;
mod rolegen;
pub mod store;
pub mod targets;

pub use crate::config::RepoServerConfig;
pub use crate::error::{Error, Result};

use crate::blob::BlobStore;
use crate::keyclient::KeyClient;
use crate::store::{
    DelegationStore, RepoRecord, RepoStore, SignedRoleRow, SignedRoleStore, TargetItemStore,
};
use crate::targets::{
    Checksum, CreateTargetItem, EditTargetItem, Paginated, TargetContent, TargetCustom,
    TargetItem, TargetListQuery, UploadParams,
};
use bytes::Bytes;
use chrono::{DateTime, Timelike, Utc};
use log::{info, warn};
use snafu::{ensure, OptionExt};
use std::num::NonZeroU64;
use std::sync::Arc;
use tuf_schema::key::KeyType;
use tuf_schema::messages::CreateRootRequest;
use tuf_schema::{sha256, RepoId, RoleType, Root, Signed, TargetFilename};

/// The repo server core. All operations are scoped to a repository; writes
/// coordinate through the stores' version checks rather than process-local
/// locks, so concurrent writers serialize or fail with `InvalidVersionBump`.
#[derive(Clone)]
pub struct RepoServer {
    repos: Arc<dyn RepoStore>,
    targets: Arc<dyn TargetItemStore>,
    roles: Arc<dyn SignedRoleStore>,
    delegations: Arc<dyn DelegationStore>,
    blobs: Arc<dyn BlobStore>,
    keyserver: Arc<dyn KeyClient>,
    config: RepoServerConfig,
}

impl std::fmt::Debug for RepoServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RepoServer {
    /// Creates a repo server core over the given seams.
    pub fn new(
        repos: Arc<dyn RepoStore>,
        targets: Arc<dyn TargetItemStore>,
        roles: Arc<dyn SignedRoleStore>,
        delegations: Arc<dyn DelegationStore>,
        blobs: Arc<dyn BlobStore>,
        keyserver: Arc<dyn KeyClient>,
        config: RepoServerConfig,
    ) -> Self {
        Self {
            repos,
            targets,
            roles,
            delegations,
            blobs,
            keyserver,
            config,
        }
    }

    /// Creates a repository: persists the repo record, asks the key server
    /// to generate its keys and root synchronously, and produces the initial
    /// role documents over an empty catalog.
    pub async fn create_repository(&self, repo_id: RepoId, key_type: KeyType) -> Result<()> {
        let record = RepoRecord {
            repo_id,
            created_at: Utc::now(),
            targets_expire_not_before: None,
        };
        self.repos.create(&record).await?;
        self.keyserver
            .create_root(
                repo_id,
                CreateRootRequest {
                    threshold: NonZeroU64::new(1).expect("1 is non-zero"),
                    key_type,
                    force_sync: true,
                },
            )
            .await?;
        match self.regenerate_all(repo_id).await {
            Ok(_) => {}
            Err(Error::KeysNotReady { .. }) => {
                info!("repo {repo_id} created; roles will be generated once keys are ready");
            }
            Err(err) => return Err(err),
        }
        info!("created repo {repo_id}");
        Ok(())
    }

    /// The current row for a role, refreshed on read per the role's rules:
    ///
    /// * `root` is delegated to the key server (refreshed there if expired),
    /// * `timestamp` is re-signed when it is within an hour of expiring,
    /// * `snapshot` and `targets` trigger a full cascade regeneration when
    ///   expired, except that stale `targets` are still served when the
    ///   targets key is offline (client-managed).
    ///
    /// All roles also refresh when they expire before the repository's
    /// configured expire-not-before instant.
    pub async fn signed_role(&self, repo_id: RepoId, role_type: RoleType) -> Result<SignedRoleRow> {
        let repo = self.repo(repo_id).await?;
        let not_before = repo.targets_expire_not_before;

        match role_type {
            RoleType::Root => {
                let payload = self.keyserver.fetch_root(repo_id, not_before).await?;
                signed_root_row(repo_id, &payload)
            }
            RoleType::Timestamp => {
                let row = self.find_or_generate(repo_id, role_type).await?;
                let refresh_at = Utc::now() + self.config.timestamp_refresh_window;
                if row.expires < refresh_at || expires_before(&row, not_before) {
                    self.bump_timestamp(repo_id, &row).await
                } else {
                    Ok(row)
                }
            }
            RoleType::Snapshot => {
                let row = self.find_or_generate(repo_id, role_type).await?;
                if row.expires < Utc::now() || expires_before(&row, not_before) {
                    self.regenerate_all(repo_id).await?;
                    self.current_role(repo_id, role_type).await
                } else {
                    Ok(row)
                }
            }
            RoleType::Targets => {
                let row = self.find_or_generate(repo_id, role_type).await?;
                if row.expires < Utc::now() || expires_before(&row, not_before) {
                    if self.keyserver.has_online_key(repo_id, RoleType::Targets).await? {
                        self.regenerate_all(repo_id).await
                    } else {
                        // The targets key has been taken offline; the stored
                        // document is all there is to serve, expired or not.
                        warn!("serving stale targets for repo {repo_id}: targets key is offline");
                        Ok(row)
                    }
                } else {
                    Ok(row)
                }
            }
            other => error::MissingEntitySnafu {
                what: format!("role {other} for repo {repo_id}"),
            }
            .fail(),
        }
    }

    /// A specific historical root version.
    pub async fn root_version(&self, repo_id: RepoId, version: NonZeroU64) -> Result<SignedRoleRow> {
        self.repo(repo_id).await?;
        let payload = self.keyserver.fetch_root_version(repo_id, version).await?;
        signed_root_row(repo_id, &payload)
    }

    /// Appends (or replaces) a target in the catalog and regenerates the
    /// derived roles, returning the new signed targets row.
    pub async fn add_target(
        &self,
        repo_id: RepoId,
        filename: TargetFilename,
        request: CreateTargetItem,
    ) -> Result<SignedRoleRow> {
        self.repo(repo_id).await?;
        let existing = self.targets.find(repo_id, &filename).await?;
        let now = Utc::now();
        let mut custom = TargetCustom {
            name: request.name.unwrap_or_else(|| filename.to_string()),
            version: request.version.unwrap_or_default(),
            hardware_ids: request.hardware_ids,
            target_format: request.target_format.unwrap_or_default(),
            uri: request.uri,
            cli_uploaded: existing.as_ref().and_then(|item| item.custom.cli_uploaded),
            created_at: existing.as_ref().map_or(now, |item| item.custom.created_at),
            updated_at: now,
            proprietary: request.proprietary.unwrap_or_default(),
        };
        custom.strip_reserved();
        let item = TargetItem {
            filename,
            length: request.length,
            checksum: Checksum::sha256(request.sha256),
            custom,
        };
        self.targets.persist(repo_id, &item).await?;
        self.regenerate_all(repo_id).await
    }

    /// Uploads target content (or registers an unmanaged URI when
    /// `params.file_uri` is set) and adds the catalog entry.
    pub async fn upload_target(
        &self,
        repo_id: RepoId,
        filename: TargetFilename,
        content: Bytes,
        params: UploadParams,
    ) -> Result<TargetItem> {
        self.repo(repo_id).await?;
        ensure!(
            self.targets.find(repo_id, &filename).await?.is_none(),
            error::EntityAlreadyExistsSnafu {
                what: format!("target {filename} in repo {repo_id}"),
            }
        );
        ensure!(
            content.len() as u64 <= self.config.max_target_bytes,
            error::PayloadTooLargeSnafu {
                size: content.len() as u64,
                max: self.config.max_target_bytes,
            }
        );

        let managed = params.file_uri.is_none();
        if managed {
            self.blobs.put(repo_id, &filename, &content).await?;
        }
        let now = Utc::now();
        let item = TargetItem {
            filename: filename.clone(),
            length: content.len() as u64,
            checksum: Checksum::sha256(sha256(&content)),
            custom: TargetCustom {
                name: params.name.unwrap_or_else(|| filename.to_string()),
                version: params.version.unwrap_or_default(),
                hardware_ids: params.hardware_ids,
                target_format: params.target_format.unwrap_or_default(),
                uri: params.file_uri,
                cli_uploaded: managed.then_some(true),
                created_at: now,
                updated_at: now,
                proprietary: serde_json::Map::new(),
            },
        };
        self.targets.persist(repo_id, &item).await?;
        self.regenerate_all(repo_id).await?;
        Ok(item)
    }

    /// The content of a target: the stored blob, or a redirect to the
    /// unmanaged URI.
    pub async fn download_target(
        &self,
        repo_id: RepoId,
        filename: &TargetFilename,
    ) -> Result<TargetContent> {
        let item = self.target_item(repo_id, filename).await?;
        if let Some(content) = self.blobs.fetch(repo_id, filename).await? {
            return Ok(TargetContent::Bytes(content));
        }
        item.custom
            .uri
            .map(TargetContent::Redirect)
            .context(error::NoUriForUnmanagedTargetSnafu {
                filename: filename.to_string(),
            })
    }

    /// Removes a target from the catalog, deletes its blob, and regenerates
    /// the derived roles. Refused while the targets role is offline.
    pub async fn delete_target(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<()> {
        self.target_item(repo_id, filename).await?;
        ensure!(
            self.keyserver
                .has_online_key(repo_id, RoleType::Targets)
                .await?,
            error::PreconditionFailedSnafu {
                description: "the targets role is offline and cannot be re-signed",
            }
        );
        self.targets.delete(repo_id, filename).await?;
        self.blobs.delete(repo_id, filename).await?;
        self.regenerate_all(repo_id).await?;
        info!("deleted target {filename} from repo {repo_id}");
        Ok(())
    }

    /// Edits a target item; absent fields are unchanged.
    pub async fn edit_target(
        &self,
        repo_id: RepoId,
        filename: &TargetFilename,
        edit: EditTargetItem,
    ) -> Result<TargetItem> {
        let mut item = self.target_item(repo_id, filename).await?;
        if let Some(uri) = edit.uri {
            item.custom.uri = Some(uri);
        }
        if let Some(hardware_ids) = edit.hardware_ids {
            item.custom.hardware_ids = hardware_ids;
        }
        if let Some(patch) = edit.proprietary_custom {
            for (key, value) in patch {
                item.custom.proprietary.insert(key, value);
            }
        }
        item.custom.strip_reserved();
        item.custom.updated_at = Utc::now();
        self.targets.persist(repo_id, &item).await?;
        self.regenerate_all(repo_id).await?;
        Ok(item)
    }

    /// Shallow-merges `patch` into the target's proprietary custom object:
    /// top-level keys in the patch overwrite, nothing deeper is merged, and
    /// the non-proprietary custom fields are never touched. An empty patch
    /// changes nothing.
    pub async fn patch_proprietary_custom(
        &self,
        repo_id: RepoId,
        filename: &TargetFilename,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<TargetItem> {
        let mut item = self.target_item(repo_id, filename).await?;
        if patch.is_empty() {
            return Ok(item);
        }
        for (key, value) in patch {
            item.custom.proprietary.insert(key, value);
        }
        item.custom.strip_reserved();
        item.custom.updated_at = Utc::now();
        self.targets.persist(repo_id, &item).await?;
        self.regenerate_all(repo_id).await?;
        Ok(item)
    }

    /// One page of the target catalog with stable filename ordering.
    pub async fn list_targets(
        &self,
        repo_id: RepoId,
        query: TargetListQuery,
    ) -> Result<Paginated<TargetItem>> {
        self.repo(repo_id).await?;
        let offset = query.offset.unwrap_or(0);
        let limit = query
            .limit
            .unwrap_or(self.config.default_page_limit)
            .min(self.config.max_page_limit);
        self.targets
            .list(repo_id, query.name_contains.as_deref(), offset, limit)
            .await
    }

    /// Sets the repository's expire-not-before instant and regenerates the
    /// role documents once, so `targets.expires` is at least that instant.
    pub async fn set_targets_expire_not_before(
        &self,
        repo_id: RepoId,
        instant: DateTime<Utc>,
    ) -> Result<()> {
        self.repo(repo_id).await?;
        // Stored rounded to whole seconds, like every other metadata
        // timestamp, so the freshness comparison on read is exact.
        self.repos
            .set_targets_expire_not_before(repo_id, Some(round_time(instant)))
            .await?;
        self.regenerate_all(repo_id).await?;
        info!("set expire-not-before for repo {repo_id} to {instant}");
        Ok(())
    }

    /// Rotates the repository's root key through the key server, then
    /// regenerates the derived roles so `snapshot` references the new root.
    pub async fn rotate_root(&self, repo_id: RepoId) -> Result<()> {
        self.repo(repo_id).await?;
        self.keyserver.rotate_root(repo_id).await?;
        self.regenerate_all(repo_id).await?;
        Ok(())
    }

    /// The repository record, or `MissingEntity`.
    pub(crate) async fn repo(&self, repo_id: RepoId) -> Result<RepoRecord> {
        self.repos
            .find(repo_id)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("repo {repo_id}"),
            })
    }

    /// A catalog item, or `MissingEntity`.
    async fn target_item(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<TargetItem> {
        self.repo(repo_id).await?;
        self.targets
            .find(repo_id, filename)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("target {filename} in repo {repo_id}"),
            })
    }

    /// The current row for a role, generating the initial documents when the
    /// repository has none yet.
    async fn find_or_generate(&self, repo_id: RepoId, role_type: RoleType) -> Result<SignedRoleRow> {
        if let Some(row) = self.roles.find(repo_id, role_type).await? {
            return Ok(row);
        }
        self.regenerate_all(repo_id).await?;
        self.current_role(repo_id, role_type).await
    }

    /// The current row for a role that is known to exist.
    pub(crate) async fn current_role(
        &self,
        repo_id: RepoId,
        role_type: RoleType,
    ) -> Result<SignedRoleRow> {
        self.roles
            .find(repo_id, role_type)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("role {role_type} for repo {repo_id}"),
            })
    }
}

/// A transient row for the root role, which the key server owns; checksum
/// and length are computed over the canonical payload like any other role.
fn signed_root_row(repo_id: RepoId, payload: &Signed<Root>) -> Result<SignedRoleRow> {
    let canonical = payload
        .canonical_form()
        .map_err(|source| Error::Schema {
            doing: "serializing root payload".to_string(),
            source,
        })?;
    Ok(SignedRoleRow::new(
        repo_id,
        RoleType::Root,
        payload.signed.version,
        payload.signed.expires,
        canonical,
    ))
}

/// Whether the row expires before the configured not-before instant.
fn expires_before(row: &SignedRoleRow, not_before: Option<DateTime<Utc>>) -> bool {
    not_before.is_some_and(|instant| row.expires < instant)
}

/// Metadata timestamps are rounded to whole seconds.
pub(crate) fn round_time(time: DateTime<Utc>) -> DateTime<Utc> {
    // `Timelike::with_nanosecond` returns None only for values >= 2_000_000_000.
    time.with_nanosecond(0).expect("zero nanoseconds is valid")
}
