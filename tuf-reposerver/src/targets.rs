// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The target catalog's domain types: items, their custom metadata, and the
//! request/response shapes of the catalog operations.

use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::ResultExt;
use std::collections::HashMap;
use tuf_schema::decoded::{Decoded, Hex};
use tuf_schema::{Hashes, Target, TargetFilename};
use url::Url;

/// The format of a target's content.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetFormat {
    /// An opaque binary blob.
    #[default]
    Binary,
    /// An OSTree commit.
    Ostree,
}

forward_display_to_serde!(TargetFormat);
forward_from_str_to_serde!(TargetFormat);

/// A checksum method. Only SHA-256 is currently produced or accepted.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecksumMethod {
    /// SHA-256.
    Sha256,
}

/// A content checksum.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Checksum {
    /// The digest method.
    pub method: ChecksumMethod,
    /// The hex digest.
    pub hash: Decoded<Hex>,
}

impl Checksum {
    /// A SHA-256 checksum.
    pub fn sha256(hash: Decoded<Hex>) -> Self {
        Self {
            method: ChecksumMethod::Sha256,
            hash,
        }
    }
}

/// A target's custom metadata. The named fields are managed by the server;
/// everything else lives in the free-form `proprietary` object, which is
/// flattened around them on the wire. Proprietary keys never shadow the named
/// fields (they are stripped on every write).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetCustom {
    /// Human-meaningful name of the software this target carries.
    pub name: String,

    /// Version of the software this target carries.
    pub version: String,

    /// Hardware identifiers the target applies to.
    #[serde(default)]
    pub hardware_ids: Vec<String>,

    /// The format of the target's content.
    #[serde(default)]
    pub target_format: TargetFormat,

    /// Where unmanaged target content can be fetched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<Url>,

    /// Set when the content was uploaded through the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_uploaded: Option<bool>,

    /// When the item was first added.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the item was last changed. Never earlier than `created_at`.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Free-form application metadata.
    #[serde(flatten)]
    pub proprietary: Map<String, Value>,
}

impl TargetCustom {
    /// The wire names of the fields managed by the server.
    pub const RESERVED_FIELDS: [&'static str; 8] = [
        "name",
        "version",
        "hardwareIds",
        "targetFormat",
        "uri",
        "cliUploaded",
        "createdAt",
        "updatedAt",
    ];

    /// Removes reserved field names from the proprietary object so the
    /// flattened serialization never emits a duplicate key.
    pub fn strip_reserved(&mut self) {
        for field in Self::RESERVED_FIELDS {
            self.proprietary.remove(field);
        }
    }
}

/// One item of the per-repository target catalog.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetItem {
    /// The target path.
    pub filename: TargetFilename,
    /// The length in bytes of the target content.
    pub length: u64,
    /// The checksum of the target content.
    pub checksum: Checksum,
    /// Custom metadata.
    pub custom: TargetCustom,
}

impl TargetItem {
    /// The targets-role entry for this item.
    pub fn to_target(&self) -> Result<Target> {
        let custom_value = serde_json::to_value(&self.custom).context(error::JsonSnafu {
            doing: "serializing target custom metadata",
        })?;
        let custom = match custom_value {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Ok(Target {
            length: self.length,
            hashes: Hashes {
                sha256: self.checksum.hash.clone(),
                _extra: HashMap::new(),
            },
            custom,
            _extra: HashMap::new(),
        })
    }
}

/// Request body for registering a target by metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetItem {
    /// The length in bytes of the target content.
    pub length: u64,
    /// The SHA-256 digest of the target content.
    pub sha256: Decoded<Hex>,
    /// Defaults to the filename.
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to the empty string.
    #[serde(default)]
    pub version: Option<String>,
    /// Hardware identifiers the target applies to.
    #[serde(default)]
    pub hardware_ids: Vec<String>,
    /// Defaults to `BINARY`.
    #[serde(default)]
    pub target_format: Option<TargetFormat>,
    /// Where unmanaged target content can be fetched from.
    #[serde(default)]
    pub uri: Option<Url>,
    /// Free-form application metadata.
    #[serde(default)]
    pub proprietary: Option<Map<String, Value>>,
}

/// Request body for editing a target item. Absent fields are unchanged.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditTargetItem {
    /// Replaces the target's URI.
    #[serde(default)]
    pub uri: Option<Url>,
    /// Replaces the target's hardware identifiers.
    #[serde(default)]
    pub hardware_ids: Option<Vec<String>>,
    /// Shallow-merged into the proprietary object.
    #[serde(default)]
    pub proprietary_custom: Option<Map<String, Value>>,
}

/// Query parameters for listing target items.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetListQuery {
    /// Substring filter on the target filename.
    #[serde(default)]
    pub name_contains: Option<String>,
    /// Defaults to 0.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Defaults to the configured page size; capped.
    #[serde(default)]
    pub limit: Option<u64>,
}

/// One page of results with the total count.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Paginated<T> {
    /// Total matching entries, across all pages.
    pub total: u64,
    /// Offset of this page.
    pub offset: u64,
    /// The limit this page was produced with.
    pub limit: u64,
    /// The entries of this page.
    pub values: Vec<T>,
}

/// Parameters accompanying a target content upload.
#[derive(Debug, Clone, Default)]
pub struct UploadParams {
    /// Defaults to the filename.
    pub name: Option<String>,
    /// Defaults to the empty string.
    pub version: Option<String>,
    /// Hardware identifiers the target applies to.
    pub hardware_ids: Vec<String>,
    /// Defaults to `BINARY`.
    pub target_format: Option<TargetFormat>,
    /// When set, the target is registered as unmanaged with this URI and the
    /// content is not kept in blob storage.
    pub file_uri: Option<Url>,
}

/// The result of fetching a target's content.
#[derive(Debug, Clone)]
pub enum TargetContent {
    /// The content itself, from blob storage.
    Bytes(bytes::Bytes),
    /// The content is unmanaged; fetch it from this URI.
    Redirect(Url),
}

#[cfg(test)]
mod tests {
    use super::{Checksum, TargetCustom, TargetFormat, TargetItem};
    use chrono::Utc;
    use serde_json::{json, Map};
    use tuf_schema::decoded::Decoded;

    fn custom() -> TargetCustom {
        TargetCustom {
            name: "ota-demo".to_string(),
            version: "1.2.3".to_string(),
            hardware_ids: vec!["rpi4".to_string()],
            target_format: TargetFormat::Binary,
            uri: None,
            cli_uploaded: Some(true),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            proprietary: Map::new(),
        }
    }

    #[test]
    fn proprietary_flattens_around_reserved_fields() {
        let mut custom = custom();
        custom
            .proprietary
            .insert("fleet".to_string(), json!("canary"));
        let value = serde_json::to_value(&custom).unwrap();
        assert_eq!(value["name"], "ota-demo");
        assert_eq!(value["fleet"], "canary");
        assert_eq!(value["targetFormat"], "BINARY");
    }

    #[test]
    fn strip_reserved_drops_shadowing_keys() {
        let mut custom = custom();
        custom.proprietary.insert("name".to_string(), json!("evil"));
        custom
            .proprietary
            .insert("fleet".to_string(), json!("canary"));
        custom.strip_reserved();
        assert!(!custom.proprietary.contains_key("name"));
        assert!(custom.proprietary.contains_key("fleet"));
    }

    #[test]
    fn target_entry_carries_custom() {
        let item = TargetItem {
            filename: "demo.bin".parse().unwrap(),
            length: 4,
            checksum: Checksum::sha256(Decoded::from(vec![0xaa; 32])),
            custom: custom(),
        };
        let target = item.to_target().unwrap();
        assert_eq!(target.length, 4);
        assert_eq!(target.hashes.sha256, Decoded::from(vec![0xaa; 32]));
        assert_eq!(target.custom["name"], serde_json::json!("ota-demo"));
    }
}
