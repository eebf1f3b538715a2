// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire messages shared between the key server and the repo server, plus the
//! error body every 4xx/5xx response carries.

use crate::key::KeyType;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use uuid::Uuid;

/// Request body for creating a repository.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRepositoryRequest {
    /// The key type for all of the repository's roles.
    pub key_type: KeyType,
}

/// Request body for creating a repository's root role and keys.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRootRequest {
    /// Number of keys, and required signatures, per top-level role.
    pub threshold: NonZeroU64,
    /// The key type for all generated keys.
    pub key_type: KeyType,
    /// Generate keys inline on the request instead of in the background.
    #[serde(default)]
    pub force_sync: bool,
}

/// Error codes carried in [`ErrorResponse::code`].
#[allow(missing_docs)]
pub mod code {
    pub const MISSING_ENTITY: &str = "missing_entity";
    pub const ENTITY_ALREADY_EXISTS: &str = "entity_already_exists";
    pub const KEYS_NOT_READY: &str = "keys_not_ready";
    pub const ROLE_KEY_NOT_FOUND: &str = "role_key_not_found";
    pub const INVALID_VERSION_BUMP: &str = "invalid_version_bump";
    pub const INVALID_ROOT_ROLE: &str = "invalid_root_role";
    pub const PAYLOAD_SIGNATURE_INVALID: &str = "payload_signature_invalid";
    pub const DELEGATION_NOT_DEFINED: &str = "delegation_not_defined";
    pub const PRECONDITION_REQUIRED: &str = "precondition_required";
    pub const PRECONDITION_FAILED: &str = "precondition_failed";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const NO_URI_FOR_UNMANAGED_TARGET: &str = "no_uri_for_unmanaged_target";
    pub const MALFORMED_PAYLOAD: &str = "malformed_payload";
    pub const KEY_GENERATION_FAILED: &str = "key_generation_failed";
    pub const BACKEND_ERROR: &str = "backend_error";
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
}

/// The body returned with every 4xx/5xx response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// A stable, machine-readable error code.
    pub code: String,
    /// A human-readable description of the failure.
    pub description: String,
    /// Optional detail, such as the list of failed root-role checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Correlates the response with server logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<Uuid>,
}

impl ErrorResponse {
    /// A response with the given code and description and a fresh error ID.
    pub fn new(code: &str, description: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            description: description.into(),
            cause: None,
            error_id: Some(Uuid::new_v4()),
        }
    }

    /// Attaches detail to the response.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}
