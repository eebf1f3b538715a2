// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verification and storage of pushed delegated targets documents, checked
//! against the delegation declared in the current targets role.

use crate::error::{self, Error, Result};
use crate::store::DelegationRow;
use crate::RepoServer;
use log::info;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use tuf_schema::{verify_signatures, RepoId, RoleKeys, RoleType, Signed, Targets};

impl RepoServer {
    /// Accepts a delegated targets document pushed for the delegation
    /// `name`. The delegation must be declared in the current targets role,
    /// the signatures must meet that delegation's threshold, and the version
    /// must be strictly greater than any previously stored version for the
    /// same name.
    pub async fn put_delegation(
        &self,
        repo_id: RepoId,
        name: &str,
        payload: Signed<Targets>,
    ) -> Result<()> {
        self.repo(repo_id).await?;
        validate_name(name)?;

        let targets_row = self
            .roles
            .find(repo_id, RoleType::Targets)
            .await?
            .context(error::DelegationNotDefinedSnafu { name })?;
        let current: Signed<Targets> = targets_row.parse()?;
        let delegations = current
            .signed
            .delegations
            .context(error::DelegationNotDefinedSnafu { name })?;
        let role = delegations
            .role(name)
            .context(error::DelegationNotDefinedSnafu { name })?;

        let role_keys = RoleKeys {
            keyids: role.keyids.clone(),
            threshold: role.threshold,
            _extra: HashMap::new(),
        };
        let canonical = tuf_schema::canonical_bytes(&payload.signed, "delegated targets").context(
            error::SchemaSnafu {
                doing: "serializing pushed delegated targets",
            },
        )?;
        verify_signatures(
            &delegations.keys,
            &role_keys,
            name,
            &canonical,
            &payload.signatures,
        )
        .map_err(|err| Error::PayloadSignatureInvalid {
            cause: err.to_string(),
        })?;

        if let Some(prior) = self.delegations.find(repo_id, name).await? {
            ensure!(
                payload.signed.version > prior.version,
                error::InvalidVersionBumpSnafu {
                    role: name,
                    expected: prior.version.get() + 1,
                    given: payload.signed.version.get(),
                }
            );
        } else {
            // A delegation name's history starts at 1.
            ensure!(
                payload.signed.version.get() == 1,
                error::InvalidVersionBumpSnafu {
                    role: name,
                    expected: 1u64,
                    given: payload.signed.version.get(),
                }
            );
        }

        let row = DelegationRow {
            repo_id,
            name: name.to_string(),
            version: payload.signed.version,
            canonical_bytes: payload.canonical_form().context(error::SchemaSnafu {
                doing: "serializing pushed delegated targets payload",
            })?,
        };
        self.delegations.persist(&row).await?;
        info!(
            "stored delegated targets {name} version {} for repo {repo_id}",
            payload.signed.version
        );
        Ok(())
    }

    /// The stored delegated targets document for `name`.
    pub async fn delegation(&self, repo_id: RepoId, name: &str) -> Result<DelegationRow> {
        self.repo(repo_id).await?;
        self.delegations
            .find(repo_id, name)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("delegation {name} for repo {repo_id}"),
            })
    }
}

/// Delegation names become path segments, so they obey the same traversal
/// rules as target filenames and must be a single segment.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty() && !name.contains('/') && name != ".." && name.len() <= 254;
    ensure!(
        valid,
        error::MalformedPayloadSnafu {
            causes: vec![format!("invalid delegation name {name:?}")],
        }
    );
    Ok(())
}
