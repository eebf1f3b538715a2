// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tuf-schema` provides the signed metadata objects for a multi-tenant TUF
//! repository service: the four canonical role documents (`root`, `targets`,
//! `snapshot`, `timestamp`, plus optional extension roles), the key and
//! signature types they embed, and the signing and verification primitives
//! that operate on their canonical JSON form.
//!
//! Everything that is hashed or signed goes through the canonical form:
//! [`canonical_bytes`] serializes with [`canonical_json::CanonicalFormatter`],
//! and digests are SHA-256 over those bytes.

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::used_underscore_binding
)]

mod de;
pub mod decoded;
pub mod error;
pub mod key;
pub mod keygen;
pub mod messages;
pub mod sign;
mod spki;
mod verify;

pub use crate::error::{Error, Result};
pub use crate::verify::verify_signatures;

use crate::decoded::{Decoded, Hex};
use crate::key::Key;
use canonical_json::CanonicalFormatter;
use chrono::{DateTime, Utc};
use globset::Glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use uuid::Uuid;

/// The version of the metadata format emitted by this library.
pub const SPEC_VERSION: &str = "1.0.0";

/// Opaque 128-bit identifier of a repository. Every other entity in the
/// system is partitioned by it.
#[derive(
    Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct RepoId(Uuid);

impl RepoId {
    /// Creates a fresh random identifier.
    pub fn generate() -> Self {
        RepoId(Uuid::new_v4())
    }
}

impl From<Uuid> for RepoId {
    fn from(uuid: Uuid) -> Self {
        RepoId(uuid)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RepoId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(RepoId(s.parse()?))
    }
}

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys trusted for all other
    /// roles used in the system.
    Root,
    /// The snapshot role signs a metadata file that provides information
    /// about the latest version of the targets metadata on the repository.
    Snapshot,
    /// The targets role's signature indicates which target files are trusted
    /// by clients.
    Targets,
    /// The timestamp role is used to prevent an adversary from replaying an
    /// out-of-date signed metadata file whose signature has not yet expired.
    Timestamp,
    /// Extension role for offline update campaigns.
    OfflineUpdates,
    /// Extension role for snapshots of offline update campaigns.
    OfflineSnapshot,
    /// Extension role authorizing remote session payloads.
    RemoteSessions,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

impl RoleType {
    /// The four roles every repository starts with.
    pub const TOP_LEVEL: [RoleType; 4] = [
        RoleType::Root,
        RoleType::Targets,
        RoleType::Snapshot,
        RoleType::Timestamp,
    ];

    /// The path under which this role's metadata is served, e.g.
    /// `targets.json`.
    pub fn metadata_path(self) -> String {
        format!("{self}.json")
    }
}

/// Serializes `value` into canonical JSON bytes, the form over which all
/// hashes and signatures are computed.
pub fn canonical_bytes<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    value
        .serialize(&mut ser)
        .context(error::JsonSerializationSnafu { what })?;
    Ok(data)
}

/// SHA-256 over `bytes`, as the hex-decoded wrapper used throughout metadata.
pub fn sha256(bytes: &[u8]) -> Decoded<Hex> {
    Decoded::from(
        aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, bytes)
            .as_ref()
            .to_vec(),
    )
}

/// The next version number, guarding against overflow.
pub fn next_version(version: NonZeroU64) -> Result<NonZeroU64> {
    NonZeroU64::new(
        version
            .get()
            .checked_add(1)
            .context(error::VersionOverflowSnafu)?,
    )
    .context(error::VersionOverflowSnafu)
}

/// Common trait implemented by all roles.
pub trait Role: Serialize {
    /// The type of role this object represents.
    const TYPE: RoleType;

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    fn expires(&self) -> DateTime<Utc>;

    /// An integer greater than 0; versions per role strictly increase.
    fn version(&self) -> NonZeroU64;

    /// The deterministic JSON serialization used when hashing or signing this
    /// role.
    fn canonical_form(&self) -> Result<Vec<u8>>
    where
        Self: Sized,
    {
        canonical_bytes(self, "role")
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures and their key IDs.
    pub signatures: Vec<Signature>,
}

impl<T: Serialize> Signed<T> {
    /// The canonical bytes of the whole payload, signatures included. This is
    /// the form that is persisted, served, and referenced by snapshot and
    /// timestamp meta entries.
    pub fn canonical_form(&self) -> Result<Vec<u8>> {
        canonical_bytes(self, "signed payload")
    }
}

/// A signature and the key ID that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Signature {
    /// The key ID (listed in root.json) that made this signature.
    pub keyid: Decoded<Hex>,
    /// A hex-encoded signature of the canonical JSON form of a role.
    pub sig: Decoded<Hex>,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root role indicates which keys are authorized for all roles, including
/// the root role itself. Revocation and replacement of keys is done by
/// changing the keys listed here.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// The version of the metadata format this document follows.
    pub spec_version: String,

    /// An integer greater than 0; versions per repository form a dense
    /// sequence starting at 1.
    pub version: NonZeroU64,

    /// Determines when this document should be considered expired.
    pub expires: DateTime<Utc>,

    /// All keys referenced by `roles`, indexed by key ID. Key IDs are
    /// verified against the key contents during deserialization.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The key IDs associated with each role, and the threshold of
    /// signatures required to validate the role.
    pub roles: HashMap<RoleType, RoleKeys>,

    /// Extra arguments found during deserialization.
    ///
    /// These are preserved so signatures over this object remain verifiable.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// The key IDs used for a role and the threshold of signatures required to
/// validate it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// An iterator over the keys for a given role.
    pub fn role_keys(&self, role: RoleType) -> impl Iterator<Item = &Key> {
        self.roles
            .get(&role)
            .into_iter()
            .flat_map(|role_keys| role_keys.keyids.iter())
            .filter_map(move |keyid| self.keys.get(keyid))
    }

    /// Given a public key, return the corresponding key ID from this root if
    /// the key is listed.
    pub fn key_id(&self, key: &Key) -> Option<Decoded<Hex>> {
        self.keys
            .iter()
            .find(|(_, candidate)| *candidate == key)
            .map(|(keyid, _)| keyid.clone())
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The snapshot role lists the version, length, and hashes of the current
/// root and targets metadata.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// The version of the metadata format this document follows.
    pub spec_version: String,

    /// An integer greater than 0; versions per role strictly increase.
    pub version: NonZeroU64,

    /// Determines when this document should be considered expired.
    pub expires: DateTime<Utc>,

    /// Meta entries for referenced metadata files, keyed by their path, e.g.
    /// `targets.json`.
    pub meta: HashMap<String, SnapshotMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// A meta entry describing one referenced metadata file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SnapshotMeta {
    /// The length in bytes of the referenced file's canonical form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Hashes of the referenced file's canonical form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Hashes>,

    /// The version of the referenced metadata.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The hash dictionary used by meta entries and targets.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    /// The SHA-256 digest.
    pub sha256: Decoded<Hex>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Snapshot {
    /// Create a new `Snapshot` with no meta entries.
    pub fn new(version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Snapshot {
            spec_version: SPEC_VERSION.to_string(),
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A target path. Constrained so it stays within the repository: non-empty,
/// at most 254 bytes, no leading `/`, and no `..` component.
#[derive(
    Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(try_from = "String", into = "String")]
pub struct TargetFilename(String);

impl TargetFilename {
    const MAX_LENGTH: usize = 254;

    /// The filename as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetFilename {
    type Error = Error;

    fn try_from(filename: String) -> Result<Self> {
        let fail = |reason| {
            error::InvalidTargetFilenameSnafu {
                filename: filename.clone(),
                reason,
            }
            .fail()
        };
        if filename.is_empty() {
            return fail("must not be empty");
        }
        if filename.len() > Self::MAX_LENGTH {
            return fail("must not exceed 254 bytes");
        }
        if filename.starts_with('/') {
            return fail("must not start with '/'");
        }
        if filename.split('/').any(|component| component == "..") {
            return fail("must not contain a '..' component");
        }
        Ok(TargetFilename(filename))
    }
}

impl FromStr for TargetFilename {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s.to_string())
    }
}

impl From<TargetFilename> for String {
    fn from(filename: TargetFilename) -> String {
        filename.0
    }
}

impl fmt::Display for TargetFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetFilename {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The targets role lists the repository's trusted target files.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// The version of the metadata format this document follows.
    pub spec_version: String,

    /// An integer greater than 0; versions per role strictly increase.
    pub version: NonZeroU64,

    /// Determines when this document should be considered expired.
    pub expires: DateTime<Utc>,

    /// The trusted target files, keyed by target path.
    pub targets: HashMap<TargetFilename, Target>,

    /// Subsets of the targets for which responsibility is delegated to
    /// other keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// A single target file entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// The length in bytes of the target file.
    pub length: u64,

    /// Hashes of the target file's content.
    pub hashes: Hashes,

    /// Application-defined metadata for this target; opaque to verification.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Targets {
    /// Create a new `Targets` with an empty target list and no delegations.
    pub fn new(version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Targets {
            spec_version: SPEC_VERSION.to_string(),
            version,
            expires,
            targets: HashMap::new(),
            delegations: None,
            _extra: HashMap::new(),
        }
    }
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// Delegations of target paths to other keys, found in a targets document.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Delegations {
    /// The public keys delegated roles may sign with, indexed by key ID.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The list of delegated roles.
    pub roles: Vec<DelegatedRole>,
}

/// One delegated role: a named sub-authority allowed to sign for a set of
/// path patterns.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The name of the delegated role, e.g. "projects".
    pub name: String,

    /// The key IDs used by this role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Shell-style path patterns this role is trusted to provide.
    pub paths: Vec<String>,
}

impl Delegations {
    /// The delegated role named `name`, if declared.
    pub fn role(&self, name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|role| role.name == name)
    }

    /// Checks that every declared path pattern is well-formed.
    pub fn verify_patterns(&self) -> Result<()> {
        for role in &self.roles {
            for pattern in &role.paths {
                validate_path_pattern(pattern)?;
            }
        }
        Ok(())
    }
}

impl DelegatedRole {
    /// Whether `target` falls under one of this role's path patterns.
    pub fn matches_path(&self, target: &str) -> bool {
        self.paths.iter().any(|pattern| {
            Glob::new(pattern)
                .map(|glob| glob.compile_matcher().is_match(target))
                .unwrap_or(false)
        })
    }
}

/// Checks a delegation path pattern: it must parse as a glob and obey the
/// same traversal rules as target filenames.
pub fn validate_path_pattern(pattern: &str) -> Result<()> {
    ensure!(
        !pattern.starts_with('/'),
        error::InvalidPathPatternSnafu {
            pattern,
            reason: "must not start with '/'",
        }
    );
    ensure!(
        !pattern.split('/').any(|component| component == ".."),
        error::InvalidPathPatternSnafu {
            pattern,
            reason: "must not contain a '..' component",
        }
    );
    Glob::new(pattern)
        .map(|_| ())
        .map_err(|err| {
            error::InvalidPathPatternSnafu {
                pattern,
                reason: err.to_string(),
            }
            .build()
        })
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The timestamp role indicates the latest version of the snapshot metadata
/// and is frequently re-signed to limit how long a client can be kept unaware
/// of interference with obtaining updates.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// The version of the metadata format this document follows.
    pub spec_version: String,

    /// An integer greater than 0; versions per role strictly increase.
    pub version: NonZeroU64,

    /// Determines when this document should be considered expired.
    pub expires: DateTime<Utc>,

    /// Meta entries; only a description of `snapshot.json`.
    pub meta: HashMap<String, TimestampMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// The meta entry describing `snapshot.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimestampMeta {
    /// The length in bytes of the snapshot's canonical form.
    pub length: u64,

    /// Hashes of the snapshot's canonical form.
    pub hashes: Hashes,

    /// The version of the referenced snapshot.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Timestamp {
    /// Create a new `Timestamp` with no meta entries.
    pub fn new(version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Timestamp {
            spec_version: SPEC_VERSION.to_string(),
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}
