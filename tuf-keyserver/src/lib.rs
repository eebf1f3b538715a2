// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tuf-keyserver` is the key server core of a multi-tenant TUF repository
//! service. It owns per-repository key material and asynchronous key
//! generation, produces the authoritative signed `root` role, applies root
//! rotations, validates externally signed root updates, and acts as a signing
//! oracle for the other roles.
//!
//! Persistence and private-key storage are seams: see [`store`] for the
//! relational traits and [`secret::SecretStore`] for the secret store, with
//! in-memory reference implementations in [`memory`]. The repo server reaches
//! this component only over its service interface; the two share no state.

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

pub mod config;
pub mod error;
mod keygen;
pub mod memory;
pub mod secret;
pub mod store;

pub use crate::config::KeyServerConfig;
pub use crate::error::{Error, Result};
pub use crate::keygen::KeyGenEngine;

use crate::secret::SecretStore;
use crate::store::{
    KeyGenId, KeyGenRequest, KeyGenRequestStore, KeyGenStatus, KeyStore, RootRoleStore,
    SignedRootRow,
};
use aws_lc_rs::rand::SystemRandom;
use chrono::{DateTime, Timelike, Utc};
use log::{info, warn};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::sync::Arc;
use tuf_schema::decoded::{Decoded, Hex};
use tuf_schema::key::{Key, KeyType};
use tuf_schema::messages::CreateRootRequest;
use tuf_schema::sign::{parse_keypair, Sign, SignKeyPair};
use tuf_schema::{
    canonical_bytes, next_version, verify_signatures, RepoId, Role, RoleKeys, RoleType, Root,
    Signature, Signed,
};

/// The key server core. All operations are scoped to a repository and safe to
/// run concurrently; cross-request coordination happens through the stores.
#[derive(Clone)]
pub struct KeyServer {
    requests: Arc<dyn KeyGenRequestStore>,
    keys: Arc<dyn KeyStore>,
    secrets: Arc<dyn SecretStore>,
    roots: Arc<dyn RootRoleStore>,
    config: KeyServerConfig,
}

impl std::fmt::Debug for KeyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KeyServer {
    /// Creates a key server core over the given stores.
    pub fn new(
        requests: Arc<dyn KeyGenRequestStore>,
        keys: Arc<dyn KeyStore>,
        secrets: Arc<dyn SecretStore>,
        roots: Arc<dyn RootRoleStore>,
        config: KeyServerConfig,
    ) -> Self {
        Self {
            requests,
            keys,
            secrets,
            roots,
            config,
        }
    }

    /// A key generation engine sharing this core's stores.
    pub fn engine(&self) -> KeyGenEngine {
        KeyGenEngine::new(
            Arc::clone(&self.requests),
            Arc::clone(&self.keys),
            Arc::clone(&self.secrets),
            self.config.clone(),
        )
    }

    /// Creates the key generation requests for a new repository: `threshold`
    /// keys per top-level role. With `force_sync` the keys are generated
    /// inline (the requests are seeded in the `Error` state so the background
    /// loop ignores them) and the root role is built before returning.
    pub async fn create_root(
        &self,
        repo_id: RepoId,
        request: CreateRootRequest,
    ) -> Result<Vec<KeyGenId>> {
        ensure!(
            self.roots.latest(repo_id).await?.is_none(),
            error::EntityAlreadyExistsSnafu {
                what: format!("root role for repo {repo_id}"),
            }
        );
        ensure!(
            self.requests.find_by_repo(repo_id).await?.is_empty(),
            error::EntityAlreadyExistsSnafu {
                what: format!("key generation requests for repo {repo_id}"),
            }
        );

        let status = if request.force_sync {
            KeyGenStatus::Error
        } else {
            KeyGenStatus::Requested
        };
        let mut created = Vec::new();
        for role_type in RoleType::TOP_LEVEL {
            for _ in 0..request.threshold.get() {
                let keygen_request = KeyGenRequest {
                    id: KeyGenId::generate(),
                    repo_id,
                    role_type,
                    key_type: request.key_type,
                    key_size: None,
                    threshold: request.threshold,
                    status,
                    description: None,
                };
                self.requests.persist(&keygen_request).await?;
                created.push(keygen_request);
            }
        }
        info!(
            "created {} key generation requests for repo {repo_id}",
            created.len()
        );

        if request.force_sync {
            for keygen_request in &created {
                keygen::generate_and_store(
                    self.requests.as_ref(),
                    self.keys.as_ref(),
                    self.secrets.as_ref(),
                    keygen_request,
                )
                .await?;
            }
            self.find_root(repo_id).await?;
        }

        Ok(created.into_iter().map(|request| request.id).collect())
    }

    /// The current signed root for a repository, built on first read once all
    /// keys are generated, and refreshed when expired.
    pub async fn find_root(&self, repo_id: RepoId) -> Result<Signed<Root>> {
        self.root_for(repo_id, None).await
    }

    /// Like [`Self::find_root`], but also refreshes the root when it expires
    /// before `expire_not_before`.
    pub async fn root_for(
        &self,
        repo_id: RepoId,
        expire_not_before: Option<DateTime<Utc>>,
    ) -> Result<Signed<Root>> {
        match self.roots.latest(repo_id).await? {
            None => self.build_initial_root(repo_id).await,
            Some(row) => {
                let mut threshold_instant = Utc::now();
                if let Some(not_before) = expire_not_before {
                    threshold_instant = threshold_instant.max(not_before);
                }
                if row.expires >= threshold_instant {
                    return row.payload();
                }
                match self.refresh_root(&row).await {
                    Ok(payload) => Ok(payload),
                    Err(Error::RoleKeyNotFound { .. }) => {
                        // Root keys are client-managed; the stored document is
                        // all we can serve.
                        warn!("serving stale root for repo {repo_id}: root keys are offline");
                        row.payload()
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// A specific historical root version.
    pub async fn find_root_version(
        &self,
        repo_id: RepoId,
        version: NonZeroU64,
    ) -> Result<Signed<Root>> {
        self.roots
            .find_version(repo_id, version)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("root role version {version} for repo {repo_id}"),
            })?
            .payload()
    }

    /// Moves every errored key generation request for the repository back to
    /// `Requested`, returning how many were retried.
    pub async fn retry_key_generation(&self, repo_id: RepoId) -> Result<usize> {
        let mut retried = 0;
        for request in self.requests.find_by_repo(repo_id).await? {
            if request.status == KeyGenStatus::Error {
                self.requests
                    .set_status(request.id, KeyGenStatus::Requested, None)
                    .await?;
                retried += 1;
            }
        }
        info!("retrying {retried} key generation requests for repo {repo_id}");
        Ok(retried)
    }

    /// Rotates the repository's root key: publishes a new root whose root
    /// role lists only a fresh key, cross-signed by the old online root keys
    /// and the new one, then takes the old private root keys offline.
    pub async fn rotate_root(&self, repo_id: RepoId) -> Result<Signed<Root>> {
        let row = self
            .roots
            .latest(repo_id)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("root role for repo {repo_id}"),
            })?;
        let mut root = row.root()?;
        let old_role_keys = root
            .roles
            .get(&RoleType::Root)
            .cloned()
            .context(error::MissingEntitySnafu {
                what: format!("root role keys for repo {repo_id}"),
            })?;

        let record = self
            .generate_inline(repo_id, RoleType::Root, self.repo_key_type(&root), "root rotation")
            .await?;

        // Old root keys drop out of the document unless another role still
        // references them; verification of the cross-signature happens
        // against the previous root's key set.
        let referenced: HashSet<Decoded<Hex>> = root
            .roles
            .iter()
            .filter(|(role_type, _)| **role_type != RoleType::Root)
            .flat_map(|(_, role_keys)| role_keys.keyids.iter().cloned())
            .collect();
        for keyid in &old_role_keys.keyids {
            if !referenced.contains(keyid) {
                root.keys.remove(keyid);
            }
        }

        root.keys
            .insert(record.key_id.clone(), record.public.clone());
        root.roles.insert(
            RoleType::Root,
            RoleKeys {
                keyids: vec![record.key_id.clone()],
                threshold: NonZeroU64::new(1).expect("1 is non-zero"),
                _extra: HashMap::new(),
            },
        );
        root.version = next_version(root.version).context(error::SchemaSnafu {
            doing: "bumping root version",
        })?;
        root.expires = round_time(Utc::now() + self.config.root_expiry);

        let payload = self.sign_and_persist_root(repo_id, root).await?;

        for keyid in &old_role_keys.keyids {
            self.secrets.delete(repo_id, keyid).await?;
        }
        info!(
            "rotated root for repo {repo_id} to version {} with key {}",
            payload.signed.version, record.key_id
        );
        Ok(payload)
    }

    /// The next root document for offline signing: the current content with
    /// a bumped version, a fresh expiry, and no signatures.
    pub async fn next_unsigned_root(&self, repo_id: RepoId) -> Result<Root> {
        let row = self
            .roots
            .latest(repo_id)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("root role for repo {repo_id}"),
            })?;
        let mut root = row.root()?;
        root.version = next_version(root.version).context(error::SchemaSnafu {
            doing: "bumping root version",
        })?;
        root.expires = round_time(Utc::now() + self.config.root_expiry);
        Ok(root)
    }

    /// Validates and persists a client-signed root role. All violated checks
    /// are collected into the `InvalidRootRole` cause list.
    pub async fn put_client_root(&self, repo_id: RepoId, payload: Signed<Root>) -> Result<()> {
        let previous_row =
            self.roots
                .latest(repo_id)
                .await?
                .context(error::MissingEntitySnafu {
                    what: format!("root role for repo {repo_id}"),
                })?;
        let previous = previous_row.root()?;
        let new = &payload.signed;
        let mut causes = Vec::new();

        let expected = next_version(previous.version).context(error::SchemaSnafu {
            doing: "bumping root version",
        })?;
        if new.version != expected {
            causes.push(format!(
                "version must be exactly {expected}, got {}",
                new.version
            ));
        }

        for (keyid, key) in &new.keys {
            match key.key_id() {
                Ok(calculated) if calculated == *keyid => {}
                Ok(calculated) => causes.push(format!(
                    "key ID {keyid} does not match its contents (calculated {calculated})"
                )),
                Err(err) => causes.push(format!("key ID {keyid} is not checkable: {err}")),
            }
        }

        for role_type in RoleType::TOP_LEVEL {
            if !new.roles.contains_key(&role_type) {
                causes.push(format!("missing role entry for {role_type}"));
            }
        }
        for (role_type, role_keys) in &new.roles {
            if role_keys.keyids.is_empty() {
                causes.push(format!("role {role_type} lists no key IDs"));
            }
            for keyid in &role_keys.keyids {
                if !new.keys.contains_key(keyid) {
                    causes.push(format!(
                        "role {role_type} references key {keyid} that is not in the key list"
                    ));
                }
            }
        }

        match canonical_bytes(&payload.signed, "root role") {
            Ok(canonical) => {
                if let Some(previous_role_keys) = previous.roles.get(&RoleType::Root) {
                    if let Err(err) = verify_cross_signature(
                        &previous.keys,
                        previous_role_keys,
                        &canonical,
                        &payload.signatures,
                    ) {
                        causes.push(format!("not signed under the previous root keys: {err}"));
                    }
                }
                if let Some(new_role_keys) = new.roles.get(&RoleType::Root) {
                    if let Err(err) = verify_cross_signature(
                        &new.keys,
                        new_role_keys,
                        &canonical,
                        &payload.signatures,
                    ) {
                        causes.push(format!("not signed under the new root keys: {err}"));
                    }
                } else {
                    causes.push("missing root role entry to verify against".to_string());
                }

                ensure!(causes.is_empty(), error::InvalidRootRoleSnafu { causes });

                let row = SignedRootRow {
                    repo_id,
                    version: new.version,
                    expires: new.expires,
                    canonical_bytes: canonical,
                    signatures: payload.signatures.clone(),
                };
                self.roots.persist(&row).await?;
                info!(
                    "accepted client-signed root version {} for repo {repo_id}",
                    new.version
                );
                Ok(())
            }
            Err(source) => {
                causes.push(format!("unserializable root document: {source}"));
                error::InvalidRootRoleSnafu { causes }.fail()
            }
        }
    }

    /// Deletes the private half of a key, taking it offline. Idempotent for
    /// keys that are already offline; unknown keys fail with `MissingEntity`.
    pub async fn delete_private_key(&self, repo_id: RepoId, key_id: &Decoded<Hex>) -> Result<()> {
        self.keys
            .find(repo_id, key_id)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("key {key_id} for repo {repo_id}"),
            })?;
        self.secrets.delete(repo_id, key_id).await?;
        info!("took key {key_id} of repo {repo_id} offline");
        Ok(())
    }

    /// Adds role slots (with freshly generated keys) to the repository's
    /// root. Roles that already exist are skipped; when nothing is missing
    /// the current root is returned unchanged.
    pub async fn add_roles(&self, repo_id: RepoId, role_types: &[RoleType]) -> Result<Signed<Root>> {
        let row = self
            .roots
            .latest(repo_id)
            .await?
            .context(error::MissingEntitySnafu {
                what: format!("root role for repo {repo_id}"),
            })?;
        let mut root = row.root()?;
        let key_type = self.repo_key_type(&root);

        let mut added = false;
        for role_type in role_types {
            if root.roles.contains_key(role_type) {
                continue;
            }
            let record = self
                .generate_inline(repo_id, *role_type, key_type, "role addition")
                .await?;
            root.keys
                .insert(record.key_id.clone(), record.public.clone());
            root.roles.insert(
                *role_type,
                RoleKeys {
                    keyids: vec![record.key_id],
                    threshold: NonZeroU64::new(1).expect("1 is non-zero"),
                    _extra: HashMap::new(),
                },
            );
            added = true;
        }

        if !added {
            return row.payload();
        }
        root.version = next_version(root.version).context(error::SchemaSnafu {
            doing: "bumping root version",
        })?;
        root.expires = round_time(Utc::now() + self.config.root_expiry);
        self.sign_and_persist_root(repo_id, root).await
    }

    /// The signing oracle: signs `value` with every currently online private
    /// key of the role. Fails with `RoleKeyNotFound` when none is online.
    pub async fn sign_payload(
        &self,
        repo_id: RepoId,
        role_type: RoleType,
        value: serde_json::Value,
    ) -> Result<Signed<serde_json::Value>> {
        let signers = self.signing_keys(repo_id, role_type).await?;
        let canonical = canonical_bytes(&value, "payload to sign").context(error::SchemaSnafu {
            doing: "serializing payload to sign",
        })?;
        let signatures = sign_with(&signers, &canonical).await?;
        Ok(Signed {
            signed: value,
            signatures,
        })
    }

    /// Whether the role has at least one online private key.
    pub async fn has_online_key(&self, repo_id: RepoId, role_type: RoleType) -> Result<bool> {
        for record in self.keys.for_role(repo_id, role_type).await? {
            if self.secrets.get(repo_id, &record.key_id).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Builds root version 1 once every key generation request has completed.
    async fn build_initial_root(&self, repo_id: RepoId) -> Result<Signed<Root>> {
        let requests = self.requests.find_by_repo(repo_id).await?;
        ensure!(
            !requests.is_empty(),
            error::MissingEntitySnafu {
                what: format!("key generation requests for repo {repo_id}"),
            }
        );
        let pending = requests
            .iter()
            .filter(|request| request.status != KeyGenStatus::Generated)
            .count();
        ensure!(pending == 0, error::KeysNotReadySnafu { pending });

        let mut keys = HashMap::new();
        let mut roles = HashMap::new();
        for role_type in RoleType::TOP_LEVEL {
            let records = self.keys.for_role(repo_id, role_type).await?;
            let threshold = requests
                .iter()
                .find(|request| request.role_type == role_type)
                .map_or_else(|| NonZeroU64::new(1).expect("1 is non-zero"), |r| r.threshold);
            ensure!(
                records.len() as u64 >= threshold.get(),
                error::KeysNotReadySnafu {
                    pending: records.len(),
                }
            );
            roles.insert(
                role_type,
                RoleKeys {
                    keyids: records.iter().map(|record| record.key_id.clone()).collect(),
                    threshold,
                    _extra: HashMap::new(),
                },
            );
            for record in records {
                keys.insert(record.key_id, record.public);
            }
        }

        let root = Root {
            spec_version: tuf_schema::SPEC_VERSION.to_string(),
            version: NonZeroU64::new(1).expect("1 is non-zero"),
            expires: round_time(Utc::now() + self.config.root_expiry),
            keys,
            roles,
            _extra: HashMap::new(),
        };
        let payload = self.sign_and_persist_root(repo_id, root).await?;
        info!("built initial root for repo {repo_id}");
        Ok(payload)
    }

    /// Produces the next root version with the same key set and a fresh
    /// expiry.
    async fn refresh_root(&self, row: &SignedRootRow) -> Result<Signed<Root>> {
        let mut root = row.root()?;
        root.version = next_version(root.version).context(error::SchemaSnafu {
            doing: "bumping root version",
        })?;
        root.expires = round_time(Utc::now() + self.config.root_expiry);
        let payload = self.sign_and_persist_root(row.repo_id, root).await?;
        info!(
            "refreshed root for repo {} to version {}",
            row.repo_id, payload.signed.version
        );
        Ok(payload)
    }

    /// Signs `root` with every online root key and persists the new version.
    async fn sign_and_persist_root(&self, repo_id: RepoId, root: Root) -> Result<Signed<Root>> {
        let signers = self.signing_keys(repo_id, RoleType::Root).await?;
        let canonical = root.canonical_form().context(error::SchemaSnafu {
            doing: "serializing root role",
        })?;
        let signatures = sign_with(&signers, &canonical).await?;
        let row = SignedRootRow {
            repo_id,
            version: root.version,
            expires: root.expires,
            canonical_bytes: canonical,
            signatures: signatures.clone(),
        };
        self.roots.persist(&row).await?;
        Ok(Signed {
            signed: root,
            signatures,
        })
    }

    /// Every online signing key for the role, with its key ID.
    async fn signing_keys(
        &self,
        repo_id: RepoId,
        role_type: RoleType,
    ) -> Result<Vec<(Decoded<Hex>, SignKeyPair)>> {
        let mut signers = Vec::new();
        for record in self.keys.for_role(repo_id, role_type).await? {
            if let Some(private_pem) = self.secrets.get(repo_id, &record.key_id).await? {
                let pair =
                    parse_keypair(private_pem.as_bytes()).context(error::SchemaSnafu {
                        doing: "parsing stored private key",
                    })?;
                signers.push((record.key_id, pair));
            }
        }
        ensure!(
            !signers.is_empty(),
            error::RoleKeyNotFoundSnafu { role: role_type }
        );
        Ok(signers)
    }

    /// Generates a key inline, mirroring the forced-sync path: the request is
    /// seeded in the `Error` state so the background loop never races it.
    async fn generate_inline(
        &self,
        repo_id: RepoId,
        role_type: RoleType,
        key_type: KeyType,
        description: &str,
    ) -> Result<store::KeyRecord> {
        let request = KeyGenRequest {
            id: KeyGenId::generate(),
            repo_id,
            role_type,
            key_type,
            key_size: None,
            threshold: NonZeroU64::new(1).expect("1 is non-zero"),
            status: KeyGenStatus::Error,
            description: Some(description.to_string()),
        };
        self.requests.persist(&request).await?;
        keygen::generate_and_store(
            self.requests.as_ref(),
            self.keys.as_ref(),
            self.secrets.as_ref(),
            &request,
        )
        .await
    }

    /// The key type the repository's current root key uses, defaulting to
    /// Ed25519 when it cannot be determined.
    fn repo_key_type(&self, root: &Root) -> KeyType {
        root.roles
            .get(&RoleType::Root)
            .and_then(|role_keys| role_keys.keyids.first())
            .and_then(|keyid| root.keys.get(keyid))
            .map_or(KeyType::Ed25519, Key::key_type)
    }
}

/// Signs `canonical` with each signer in turn.
async fn sign_with(
    signers: &[(Decoded<Hex>, SignKeyPair)],
    canonical: &[u8],
) -> Result<Vec<Signature>> {
    let rng = SystemRandom::new();
    let mut signatures = Vec::with_capacity(signers.len());
    for (keyid, pair) in signers {
        let sig = pair
            .sign(canonical, &rng)
            .await
            .context(error::SchemaSnafu {
                doing: "signing canonical bytes",
            })?;
        signatures.push(Signature {
            keyid: keyid.clone(),
            sig: sig.into(),
        });
    }
    Ok(signatures)
}

/// Verifies a cross-signed document against one side's key set: signatures
/// by keys outside that set are ignored rather than rejected, since the other
/// side's keys legitimately appear in the same signature list.
fn verify_cross_signature(
    keys: &HashMap<Decoded<Hex>, Key>,
    role_keys: &RoleKeys,
    canonical: &[u8],
    signatures: &[Signature],
) -> tuf_schema::Result<()> {
    let relevant: Vec<Signature> = signatures
        .iter()
        .filter(|signature| role_keys.keyids.contains(&signature.keyid))
        .cloned()
        .collect();
    verify_signatures(keys, role_keys, "root", canonical, &relevant)
}

/// Metadata timestamps are rounded to whole seconds.
fn round_time(time: DateTime<Utc>) -> DateTime<Utc> {
    // `Timelike::with_nanosecond` returns None only for values >= 2_000_000_000.
    time.with_nanosecond(0).expect("zero nanoseconds is valid")
}
