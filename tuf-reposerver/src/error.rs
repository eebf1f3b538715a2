// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for the repo server core.

use snafu::Snafu;
use std::path::PathBuf;
use tuf_schema::messages::{code, ErrorResponse};

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for the repo server core.
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

    #[snafu(display("Delegation {} is not defined in the current targets", name))]
    DelegationNotDefined { name: String },

    #[snafu(display("{} already exists", what))]
    EntityAlreadyExists { what: String },

    #[snafu(display(
        "Version of {} must be exactly {}, got {}",
        role,
        expected,
        given
    ))]
    InvalidVersionBump {
        role: String,
        expected: u64,
        given: u64,
    },

    #[snafu(display("I/O error on {}: {}", path.display(), source))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("JSON error while {}: {}", doing, source))]
    Json {
        doing: String,
        source: serde_json::Error,
    },

    #[snafu(display("Key server error {}: {}", code, description))]
    KeyServer { code: String, description: String },

    #[snafu(display("Keys are not ready: {}", description))]
    KeysNotReady { description: String },

    #[snafu(display("Malformed payload: {}", causes.join("; ")))]
    MalformedPayload { causes: Vec<String> },

    #[snafu(display("{} not found", what))]
    MissingEntity { what: String },

    #[snafu(display("Target {} is unmanaged and its custom metadata has no URI", filename))]
    NoUriForUnmanagedTarget { filename: String },

    #[snafu(display("Payload signature rejected: {}", cause))]
    PayloadSignatureInvalid { cause: String },

    #[snafu(display("Payload of {} bytes exceeds the limit of {} bytes", size, max))]
    PayloadTooLarge { size: u64, max: u64 },

    #[snafu(display("Precondition failed: {}", description))]
    PreconditionFailed { description: String },

    #[snafu(display("Precondition required: {}", description))]
    PreconditionRequired { description: String },

    #[snafu(display("No online signing key: {}", description))]
    RoleKeyNotFound { description: String },

    #[snafu(display("Metadata error while {}: {}", doing, source))]
    Schema {
        doing: String,
        source: tuf_schema::Error,
    },
}

impl Error {
    /// Wraps an error from a storage backend.
    pub fn backend(source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Error::Backend {
            source: source.into(),
        }
    }

    /// The stable error code used in responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Backend { .. } | Error::Io { .. } | Error::Json { .. } => code::BACKEND_ERROR,
            Error::Config { .. } => code::CONFIGURATION_ERROR,
            Error::DelegationNotDefined { .. } => code::DELEGATION_NOT_DEFINED,
            Error::EntityAlreadyExists { .. } => code::ENTITY_ALREADY_EXISTS,
            Error::InvalidVersionBump { .. } => code::INVALID_VERSION_BUMP,
            Error::KeyServer { .. } => code::BACKEND_ERROR,
            Error::KeysNotReady { .. } => code::KEYS_NOT_READY,
            Error::MalformedPayload { .. } => code::MALFORMED_PAYLOAD,
            Error::MissingEntity { .. } => code::MISSING_ENTITY,
            Error::NoUriForUnmanagedTarget { .. } => code::NO_URI_FOR_UNMANAGED_TARGET,
            Error::PayloadSignatureInvalid { .. } => code::PAYLOAD_SIGNATURE_INVALID,
            Error::PayloadTooLarge { .. } => code::PAYLOAD_TOO_LARGE,
            Error::PreconditionFailed { .. } => code::PRECONDITION_FAILED,
            Error::PreconditionRequired { .. } => code::PRECONDITION_REQUIRED,
            Error::RoleKeyNotFound { .. } => code::ROLE_KEY_NOT_FOUND,
            Error::Schema { .. } => code::BACKEND_ERROR,
        }
    }

    /// The HTTP status an out-of-scope transport layer should map this error
    /// to.
    pub fn status_hint(&self) -> u16 {
        match self {
            Error::Backend { .. }
            | Error::Io { .. }
            | Error::Json { .. }
            | Error::Config { .. }
            | Error::KeyServer { .. }
            | Error::Schema { .. } => 500,
            Error::DelegationNotDefined { .. }
            | Error::MalformedPayload { .. }
            | Error::PayloadSignatureInvalid { .. } => 400,
            Error::EntityAlreadyExists { .. } | Error::InvalidVersionBump { .. } => 409,
            Error::KeysNotReady { .. } => 424,
            Error::MissingEntity { .. } => 404,
            Error::NoUriForUnmanagedTarget { .. } => 406,
            Error::PayloadTooLarge { .. } => 413,
            Error::PreconditionFailed { .. } | Error::RoleKeyNotFound { .. } => 412,
            Error::PreconditionRequired { .. } => 428,
        }
    }

    /// The response body for this error.
    pub fn to_response(&self) -> ErrorResponse {
        let response = ErrorResponse::new(self.code(), self.to_string());
        match self {
            Error::MalformedPayload { causes } => response.with_cause(causes.join("; ")),
            _ => response,
        }
    }
}
