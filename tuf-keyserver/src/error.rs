// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for the key server core.

use snafu::Snafu;
use tuf_schema::messages::{code, ErrorResponse};
use tuf_schema::RoleType;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for the key server core.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Storage backend error: {}", source))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[snafu(display("Invalid value for {}: {}", variable, source))]
    Config {
        variable: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("{} already exists", what))]
    EntityAlreadyExists { what: String },

    #[snafu(display("Client-signed root role rejected: {}", causes.join("; ")))]
    InvalidRootRole { causes: Vec<String> },

    #[snafu(display(
        "Root role version for repo {} must be exactly {}, got {}",
        repo_id,
        expected,
        given
    ))]
    InvalidVersionBump {
        repo_id: String,
        expected: u64,
        given: u64,
    },

    #[snafu(display("Key generation failed: {}", cause))]
    KeyGenerationFailed { cause: String },

    #[snafu(display("Keys are not ready: {} requests not yet generated", pending))]
    KeysNotReady { pending: usize },

    #[snafu(display("JSON error while {}: {}", doing, source))]
    Json {
        doing: String,
        source: serde_json::Error,
    },

    #[snafu(display("{} not found", what))]
    MissingEntity { what: String },

    #[snafu(display("No online signing key for role {}", role))]
    RoleKeyNotFound { role: RoleType },

    #[snafu(display("Metadata error while {}: {}", doing, source))]
    Schema {
        doing: String,
        source: tuf_schema::Error,
    },
}

impl Error {
    /// Wraps an error from a storage or secret-store backend.
    pub fn backend(source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Error::Backend {
            source: source.into(),
        }
    }

    /// The stable error code used in responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Backend { .. } => code::BACKEND_ERROR,
            Error::Config { .. } => code::CONFIGURATION_ERROR,
            Error::EntityAlreadyExists { .. } => code::ENTITY_ALREADY_EXISTS,
            Error::InvalidRootRole { .. } => code::INVALID_ROOT_ROLE,
            Error::InvalidVersionBump { .. } => code::INVALID_VERSION_BUMP,
            Error::KeyGenerationFailed { .. } => code::KEY_GENERATION_FAILED,
            Error::Json { .. } => code::BACKEND_ERROR,
            Error::KeysNotReady { .. } => code::KEYS_NOT_READY,
            Error::MissingEntity { .. } => code::MISSING_ENTITY,
            Error::RoleKeyNotFound { .. } => code::ROLE_KEY_NOT_FOUND,
            Error::Schema { .. } => code::BACKEND_ERROR,
        }
    }

    /// The HTTP status an out-of-scope transport layer should map this error
    /// to.
    pub fn status_hint(&self) -> u16 {
        match self {
            Error::Backend { .. } | Error::Schema { .. } | Error::Config { .. } => 500,
            Error::EntityAlreadyExists { .. } | Error::InvalidVersionBump { .. } => 409,
            Error::InvalidRootRole { .. } => 400,
            Error::Json { .. } => 500,
            Error::KeyGenerationFailed { .. } => 500,
            Error::KeysNotReady { .. } => 424,
            Error::MissingEntity { .. } => 404,
            Error::RoleKeyNotFound { .. } => 412,
        }
    }

    /// The response body for this error.
    pub fn to_response(&self) -> ErrorResponse {
        let response = ErrorResponse::new(self.code(), self.to_string());
        match self {
            Error::InvalidRootRole { causes } => response.with_cause(causes.join("; ")),
            _ => response,
        }
    }
}
