// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Intake of client-signed (offline) targets documents: optimistic checksum,
//! well-formedness, signature threshold, delegation consistency, then
//! persistence with regeneration of `snapshot` and `timestamp` only.

use crate::error::{self, Error, Result};
use crate::store::SignedRoleRow;
use crate::targets::{Checksum, TargetCustom, TargetItem};
use crate::RepoServer;
use chrono::Utc;
use log::info;
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use tuf_schema::decoded::{Decoded, Hex};
use tuf_schema::{verify_signatures, RepoId, RoleType, Signed, Targets};

impl RepoServer {
    /// Accepts a full client-signed targets payload. The pre-conditions are
    /// evaluated in order and the first failure wins: optimistic checksum,
    /// well-formedness, signature threshold against the current root's
    /// targets keys, delegation consistency. On success the payload is
    /// persisted as-is (it is already signed) and only `snapshot` and
    /// `timestamp` are regenerated. Re-pushing the identical payload at the
    /// current version is a no-op.
    pub async fn put_offline_targets(
        &self,
        repo_id: RepoId,
        payload: Signed<Targets>,
        checksum: Option<Decoded<Hex>>,
    ) -> Result<()> {
        let repo = self.repo(repo_id).await?;
        let current = self.roles.find(repo_id, RoleType::Targets).await?;

        if let Some(current_row) = &current {
            match &checksum {
                None => {
                    return error::PreconditionRequiredSnafu {
                        description: format!(
                            "a checksum of the current targets (version {}) must accompany the push",
                            current_row.version
                        ),
                    }
                    .fail()
                }
                Some(given) if *given != current_row.checksum => {
                    return error::PreconditionFailedSnafu {
                        description: "the provided checksum does not match the current targets",
                    }
                    .fail()
                }
                Some(_) => {}
            }
        }

        let previous: Option<Signed<Targets>> = match &current {
            Some(row) => Some(row.parse()?),
            None => None,
        };

        let mut causes = Vec::new();
        for (filename, target) in &payload.signed.targets {
            if target.length == 0 {
                causes.push(format!("target {filename} must have a positive length"));
            }
            if target.hashes.sha256.is_empty() {
                causes.push(format!("target {filename} must carry a sha256 hash"));
            }
            let is_new = previous
                .as_ref()
                .map_or(true, |prev| !prev.signed.targets.contains_key(filename));
            if is_new {
                if target.custom.is_empty() {
                    causes.push(format!("new target {filename} must carry custom metadata"));
                } else if let Err(err) = parse_custom(&target.custom) {
                    causes.push(format!(
                        "new target {filename} has invalid custom metadata: {err}"
                    ));
                }
            }
        }
        ensure!(causes.is_empty(), error::MalformedPayloadSnafu { causes });

        let root_payload = self
            .keyserver
            .fetch_root(repo_id, repo.targets_expire_not_before)
            .await?;
        let root = &root_payload.signed;
        let role_keys =
            root.roles
                .get(&RoleType::Targets)
                .context(error::MissingEntitySnafu {
                    what: format!("targets role keys in the root of repo {repo_id}"),
                })?;
        let canonical = tuf_schema::canonical_bytes(&payload.signed, "targets role").context(
            error::SchemaSnafu {
                doing: "serializing pushed targets",
            },
        )?;
        verify_signatures(
            &root.keys,
            role_keys,
            "targets",
            &canonical,
            &payload.signatures,
        )
        .map_err(|err| Error::PayloadSignatureInvalid {
            cause: err.to_string(),
        })?;

        let mut delegation_causes = Vec::new();
        if let Some(delegations) = &payload.signed.delegations {
            for role in &delegations.roles {
                for keyid in &role.keyids {
                    if !delegations.keys.contains_key(keyid) {
                        delegation_causes.push(format!(
                            "delegation {} references undeclared key {keyid}",
                            role.name
                        ));
                    }
                }
            }
            if let Err(err) = delegations.verify_patterns() {
                delegation_causes.push(err.to_string());
            }
        }
        ensure!(
            delegation_causes.is_empty(),
            error::MalformedPayloadSnafu {
                causes: delegation_causes,
            }
        );

        let full_bytes = payload.canonical_form().context(error::SchemaSnafu {
            doing: "serializing pushed targets payload",
        })?;
        if let Some(current_row) = &current {
            if payload.signed.version == current_row.version {
                if full_bytes == current_row.canonical_bytes {
                    info!("identical targets push for repo {repo_id} is a no-op");
                    return Ok(());
                }
                return error::InvalidVersionBumpSnafu {
                    role: "targets",
                    expected: current_row.version.get() + 1,
                    given: payload.signed.version.get(),
                }
                .fail();
            }
        }

        let targets_row = SignedRoleRow::new(
            repo_id,
            RoleType::Targets,
            payload.signed.version,
            payload.signed.expires,
            full_bytes,
        );
        let root_bytes = root_payload.canonical_form().context(error::SchemaSnafu {
            doing: "serializing root payload",
        })?;
        let (snapshot_row, timestamp_row) = self
            .build_snapshot_and_timestamp(
                repo_id,
                &root_bytes,
                root.version,
                &targets_row,
                repo.targets_expire_not_before,
            )
            .await?;
        self.roles
            .persist_all(repo_id, &[targets_row, snapshot_row, timestamp_row])
            .await?;

        self.sync_catalog(repo_id, previous.as_ref(), &payload).await?;
        info!(
            "accepted offline-signed targets version {} for repo {repo_id}",
            payload.signed.version
        );
        Ok(())
    }

    /// Mirrors an accepted offline push into the catalog: items dropped by
    /// the push lose their catalog entries and blobs, items in the push are
    /// upserted with their pushed custom metadata.
    async fn sync_catalog(
        &self,
        repo_id: RepoId,
        previous: Option<&Signed<Targets>>,
        payload: &Signed<Targets>,
    ) -> Result<()> {
        if let Some(previous) = previous {
            for filename in previous.signed.targets.keys() {
                if payload.signed.targets.contains_key(filename) {
                    continue;
                }
                if self.blobs.exists(repo_id, filename).await? {
                    self.blobs.delete(repo_id, filename).await?;
                    info!("deleted blob of removed target {filename} in repo {repo_id}");
                }
                if self.targets.find(repo_id, filename).await?.is_some() {
                    self.targets.delete(repo_id, filename).await?;
                }
            }
        }

        let now = Utc::now();
        for (filename, target) in &payload.signed.targets {
            let existing = self.targets.find(repo_id, filename).await?;
            let mut custom = match parse_custom(&target.custom) {
                Ok(custom) => custom,
                Err(_) => existing.as_ref().map_or_else(
                    || TargetCustom {
                        name: filename.to_string(),
                        version: String::new(),
                        hardware_ids: Vec::new(),
                        target_format: Default::default(),
                        uri: None,
                        cli_uploaded: None,
                        created_at: now,
                        updated_at: now,
                        proprietary: serde_json::Map::new(),
                    },
                    |item| item.custom.clone(),
                ),
            };
            if let Some(existing) = &existing {
                custom.created_at = existing.custom.created_at;
            }
            custom.updated_at = now;
            custom.strip_reserved();
            let item = TargetItem {
                filename: filename.clone(),
                length: target.length,
                checksum: Checksum::sha256(target.hashes.sha256.clone()),
                custom,
            };
            self.targets.persist(repo_id, &item).await?;
        }
        Ok(())
    }
}

fn parse_custom(custom: &HashMap<String, Value>) -> serde_json::Result<TargetCustom> {
    let value = Value::Object(custom.clone().into_iter().collect());
    serde_json::from_value(value)
}
