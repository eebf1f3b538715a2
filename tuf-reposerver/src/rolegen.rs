// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The role generation engine: builds `targets` from the catalog, then
//! `snapshot` and `timestamp` referencing it, obtains signatures from the key
//! server's signing oracle, and persists the whole cascade atomically.

use crate::error::{self, Result};
use crate::store::SignedRoleRow;
use crate::{round_time, RepoServer};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Serialize;
use snafu::ResultExt;
use std::collections::HashMap;
use std::num::NonZeroU64;
use tuf_schema::{
    next_version, Hashes, RepoId, RoleType, Snapshot, SnapshotMeta, Targets, Timestamp,
    TimestampMeta,
};

impl RepoServer {
    /// Regenerates `targets` from the catalog and cascades into `snapshot`
    /// and `timestamp`, persisting all three in one atomic write. Returns
    /// the new targets row.
    pub(crate) async fn regenerate_all(&self, repo_id: RepoId) -> Result<SignedRoleRow> {
        let repo = self.repo(repo_id).await?;
        let not_before = repo.targets_expire_not_before;
        let root_payload = self.keyserver.fetch_root(repo_id, not_before).await?;
        let root_bytes = root_payload
            .canonical_form()
            .context(error::SchemaSnafu {
                doing: "serializing root payload",
            })?;

        let current_targets = self.roles.find(repo_id, RoleType::Targets).await?;
        let version = bump_or_initial(current_targets.as_ref().map(|row| row.version))?;
        let expires = role_expiry(self.config.targets_expiry, not_before);
        // Delegations declared through an earlier offline push survive
        // server-side regeneration.
        let delegations = current_targets
            .as_ref()
            .and_then(|row| row.parse::<Targets>().ok())
            .and_then(|payload| payload.signed.delegations);

        let mut doc = Targets::new(version, expires);
        doc.delegations = delegations;
        for item in self.targets.all(repo_id).await? {
            doc.targets.insert(item.filename.clone(), item.to_target()?);
        }

        let targets_row = self
            .sign_role_row(repo_id, RoleType::Targets, version, expires, &doc)
            .await?;
        let (snapshot_row, timestamp_row) = self
            .build_snapshot_and_timestamp(
                repo_id,
                &root_bytes,
                root_payload.signed.version,
                &targets_row,
                not_before,
            )
            .await?;
        self.roles
            .persist_all(
                repo_id,
                &[targets_row.clone(), snapshot_row, timestamp_row],
            )
            .await?;
        info!("regenerated role documents for repo {repo_id}, targets version {version}");
        Ok(targets_row)
    }

    /// Builds and signs `snapshot` (referencing the given root and targets)
    /// and `timestamp` (referencing that snapshot). The caller persists the
    /// rows.
    pub(crate) async fn build_snapshot_and_timestamp(
        &self,
        repo_id: RepoId,
        root_bytes: &[u8],
        root_version: NonZeroU64,
        targets_row: &SignedRoleRow,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<(SignedRoleRow, SignedRoleRow)> {
        let snapshot_version =
            bump_or_initial(self.roles.find(repo_id, RoleType::Snapshot).await?.map(|row| row.version))?;
        let snapshot_expires = role_expiry(self.config.snapshot_expiry, not_before);
        let mut snapshot = Snapshot::new(snapshot_version, snapshot_expires);
        snapshot.meta.insert(
            RoleType::Root.metadata_path(),
            SnapshotMeta {
                length: Some(root_bytes.len() as u64),
                hashes: Some(Hashes {
                    sha256: tuf_schema::sha256(root_bytes),
                    _extra: HashMap::new(),
                }),
                version: root_version,
                _extra: HashMap::new(),
            },
        );
        snapshot.meta.insert(
            RoleType::Targets.metadata_path(),
            SnapshotMeta {
                length: Some(targets_row.length),
                hashes: Some(Hashes {
                    sha256: targets_row.checksum.clone(),
                    _extra: HashMap::new(),
                }),
                version: targets_row.version,
                _extra: HashMap::new(),
            },
        );
        let snapshot_row = self
            .sign_role_row(
                repo_id,
                RoleType::Snapshot,
                snapshot_version,
                snapshot_expires,
                &snapshot,
            )
            .await?;

        let timestamp_version =
            bump_or_initial(self.roles.find(repo_id, RoleType::Timestamp).await?.map(|row| row.version))?;
        let timestamp_expires = role_expiry(self.config.timestamp_expiry, not_before);
        let timestamp = timestamp_from(timestamp_version, timestamp_expires, &snapshot_row);
        let timestamp_row = self
            .sign_role_row(
                repo_id,
                RoleType::Timestamp,
                timestamp_version,
                timestamp_expires,
                &timestamp,
            )
            .await?;
        Ok((snapshot_row, timestamp_row))
    }

    /// Re-signs only the timestamp, pushing its expiry out by the configured
    /// extension. The current snapshot reference is unchanged.
    pub(crate) async fn bump_timestamp(
        &self,
        repo_id: RepoId,
        current: &SignedRoleRow,
    ) -> Result<SignedRoleRow> {
        let repo = self.repo(repo_id).await?;
        let snapshot_row = self.current_role(repo_id, RoleType::Snapshot).await?;
        let version = next_version(current.version).context(error::SchemaSnafu {
            doing: "bumping timestamp version",
        })?;
        let mut expires =
            round_time(current.expires.max(Utc::now()) + self.config.timestamp_extension);
        if let Some(instant) = repo.targets_expire_not_before {
            expires = expires.max(round_time(instant));
        }
        let timestamp = timestamp_from(version, expires, &snapshot_row);
        let row = self
            .sign_role_row(repo_id, RoleType::Timestamp, version, expires, &timestamp)
            .await?;
        self.roles
            .persist_all(repo_id, std::slice::from_ref(&row))
            .await?;
        debug!("re-signed timestamp for repo {repo_id} at version {version}");
        Ok(row)
    }

    /// Signs a role document through the oracle and wraps it in a row.
    async fn sign_role_row<T: Serialize>(
        &self,
        repo_id: RepoId,
        role_type: RoleType,
        version: NonZeroU64,
        expires: DateTime<Utc>,
        doc: &T,
    ) -> Result<SignedRoleRow> {
        let value = serde_json::to_value(doc).context(error::JsonSnafu {
            doing: format!("serializing {role_type} role"),
        })?;
        let signed = self.keyserver.sign(repo_id, role_type, value).await?;
        let bytes = signed.canonical_form().context(error::SchemaSnafu {
            doing: format!("serializing signed {role_type} payload"),
        })?;
        Ok(SignedRoleRow::new(
            repo_id, role_type, version, expires, bytes,
        ))
    }
}

fn timestamp_from(
    version: NonZeroU64,
    expires: DateTime<Utc>,
    snapshot_row: &SignedRoleRow,
) -> Timestamp {
    let mut timestamp = Timestamp::new(version, expires);
    timestamp.meta.insert(
        RoleType::Snapshot.metadata_path(),
        TimestampMeta {
            length: snapshot_row.length,
            hashes: Hashes {
                sha256: snapshot_row.checksum.clone(),
                _extra: HashMap::new(),
            },
            version: snapshot_row.version,
            _extra: HashMap::new(),
        },
    );
    timestamp
}

fn bump_or_initial(current: Option<NonZeroU64>) -> Result<NonZeroU64> {
    match current {
        Some(version) => next_version(version).context(error::SchemaSnafu {
            doing: "bumping role version",
        }),
        None => Ok(NonZeroU64::new(1).expect("1 is non-zero")),
    }
}

/// New roles expire after their configured lifetime, or at the repository's
/// expire-not-before instant when that is later.
fn role_expiry(lifetime: Duration, not_before: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let mut expires = round_time(Utc::now() + lifetime);
    if let Some(instant) = not_before {
        expires = expires.max(round_time(instant));
    }
    expires
}
