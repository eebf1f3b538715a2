// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for this library.

use snafu::Snafu;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Failed to run {}: {}", command, source))]
    CommandExec {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("Command {} failed with {}", command, status))]
    CommandStatus {
        command: String,
        status: std::process::ExitStatus,
    },

    #[snafu(display("Command {} output is not valid UTF-8: {}", command, source))]
    CommandUtf8 {
        command: String,
        source: std::string::FromUtf8Error,
    },

    #[snafu(display("Duplicate key ID {}", keyid))]
    DuplicateKeyId { keyid: String },

    #[snafu(display("Duplicate signature by key ID {}", keyid))]
    DuplicateSignature { keyid: String },

    #[snafu(display("Invalid hex string: {}", source))]
    HexDecode { source: hex::FromHexError },

    #[snafu(display(
        "Invalid delegation path pattern {:?}: {}",
        pattern,
        reason
    ))]
    InvalidPathPattern { pattern: String, reason: String },

    #[snafu(display("Invalid key ID {}, calculated {}", keyid, calculated))]
    InvalidKeyId { keyid: String, calculated: String },

    #[snafu(display("Invalid target filename {:?}: {}", filename, reason))]
    InvalidTargetFilename {
        filename: String,
        reason: &'static str,
    },

    #[snafu(display("Failed to parse {} from JSON: {}", what, source))]
    JsonParse {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to serialize {} to JSON: {}", what, source))]
    JsonSerialization {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Keypair generation failed"))]
    KeyGeneration {
        source: aws_lc_rs::error::Unspecified,
    },

    #[snafu(display("Key ID {} is not authorized to sign for role {}", keyid, role))]
    KeyNotAuthorized { keyid: String, role: String },

    #[snafu(display("Private key rejected: {}", source))]
    KeyRejected {
        source: aws_lc_rs::error::KeyRejected,
    },

    #[snafu(display("Unrecognized or unsupported private key"))]
    KeyUnrecognized,

    #[snafu(display("Invalid PEM document: {}", source))]
    PemDecode { source: pem::PemError },

    #[snafu(display("RSA keys must be at least {} bits, requested {}", minimum, bits))]
    RsaKeyTooSmall { bits: u32, minimum: u32 },

    #[snafu(display("Failed to sign message: {}", source))]
    Sign {
        source: aws_lc_rs::error::Unspecified,
    },

    #[snafu(display(
        "Signature threshold not met for role {}: {} valid of {} required",
        role,
        valid,
        threshold
    ))]
    SignatureThreshold {
        role: String,
        valid: u64,
        threshold: u64,
    },

    #[snafu(display("Malformed SubjectPublicKeyInfo document: {}", reason))]
    SpkiMalformed { reason: String },

    #[snafu(display("Signature references unknown key ID {}", keyid))]
    UnknownKeyId { keyid: String },

    #[snafu(display("Version number overflow"))]
    VersionOverflow,
}
