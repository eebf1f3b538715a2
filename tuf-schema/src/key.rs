// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public keys as they appear in signed metadata, along with key-ID
//! computation and signature verification.

use crate::decoded::{Decoded, Hex};
use crate::error::{self, Result};
use crate::spki;
use aws_lc_rs::signature;
use canonical_json::CanonicalFormatter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::ResultExt;
use std::collections::HashMap;

/// The kind of key to generate. Determines the signature scheme and, for RSA,
/// constrains the modulus size.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// Ed25519, signing with the `ed25519` scheme.
    Ed25519,
    /// ECDSA over NIST P-256, signing with `ecdsa-sha2-nistp256`.
    EcPrime256,
    /// RSA with a modulus of at least 2048 bits, signing with
    /// `rsassa-pss-sha256`.
    Rsa,
}

forward_display_to_serde!(KeyType);
forward_from_str_to_serde!(KeyType);

/// A public key and its signature scheme.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "keytype")]
pub enum Key {
    /// An Ed25519 key.
    #[serde(rename = "ed25519")]
    Ed25519 {
        /// The Ed25519 key value.
        keyval: Ed25519Key,
        /// Denotes the key's signature scheme.
        scheme: Ed25519Scheme,
        /// Extra arguments found during deserialization; preserved so that
        /// key IDs computed by other parties remain stable.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An ECDSA key on the P-256 curve.
    #[serde(rename = "ecdsa-sha2-nistp256")]
    Ecdsa {
        /// The ECDSA key value.
        keyval: EcdsaKey,
        /// Denotes the key's signature scheme.
        scheme: EcdsaScheme,
        /// Extra arguments found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An RSA key.
    #[serde(rename = "rsa")]
    Rsa {
        /// The RSA key value.
        keyval: RsaKey,
        /// Denotes the key's signature scheme.
        scheme: RsaScheme,
        /// Extra arguments found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

/// An Ed25519 public key, hex-encoded.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Ed25519Key {
    /// The raw 32-byte public key.
    pub public: Decoded<Hex>,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// An ECDSA public key as a PEM `SubjectPublicKeyInfo`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EcdsaKey {
    /// The PEM-encoded public key.
    pub public: String,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// An RSA public key as a PEM `SubjectPublicKeyInfo`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RsaKey {
    /// The PEM-encoded public key.
    pub public: String,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The Ed25519 signature scheme.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Ed25519Scheme {
    #[serde(rename = "ed25519")]
    #[allow(missing_docs)]
    Ed25519,
}

/// The `ecdsa-sha2-nistp256` signature scheme.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum EcdsaScheme {
    #[serde(rename = "ecdsa-sha2-nistp256")]
    #[allow(missing_docs)]
    EcdsaSha2Nistp256,
}

/// The `rsassa-pss-sha256` signature scheme.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum RsaScheme {
    #[serde(rename = "rsassa-pss-sha256")]
    #[allow(missing_docs)]
    RsassaPssSha256,
}

impl Key {
    /// Calculates the key's ID: the lowercase hex SHA-256 digest of the key's
    /// canonical JSON form.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "key" })?;
        Ok(Decoded::from(
            aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, &buf)
                .as_ref()
                .to_vec(),
        ))
    }

    /// The `KeyType` this key was generated as.
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Ed25519 { .. } => KeyType::Ed25519,
            Key::Ecdsa { .. } => KeyType::EcPrime256,
            Key::Rsa { .. } => KeyType::Rsa,
        }
    }

    /// Verifies `signature` over `msg` with this key. Returns `false` for
    /// invalid signatures and for keys whose public material cannot be
    /// decoded.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let (alg, public): (&'static dyn signature::VerificationAlgorithm, Vec<u8>) = match self {
            Key::Ed25519 { keyval, .. } => (&signature::ED25519, keyval.public.to_vec()),
            Key::Ecdsa { keyval, .. } => match spki::ec_point_from_pem(&keyval.public) {
                Ok(point) => (&signature::ECDSA_P256_SHA256_ASN1, point),
                Err(err) => {
                    log::warn!("undecodable ECDSA public key: {err}");
                    return false;
                }
            },
            Key::Rsa { keyval, .. } => match spki::rsa_der_from_pem(&keyval.public) {
                Ok(der) => (&signature::RSA_PSS_2048_8192_SHA256, der),
                Err(err) => {
                    log::warn!("undecodable RSA public key: {err}");
                    return false;
                }
            },
        };
        signature::UnparsedPublicKey::new(alg, &public)
            .verify(msg, sig)
            .is_ok()
    }
}
