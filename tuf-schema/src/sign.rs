// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides the `Sign` trait which abstracts over the method of signing with
//! different key types.

use crate::error::{self, Result};
use crate::key::{Ed25519Key, Ed25519Scheme, EcdsaKey, EcdsaScheme, Key, RsaKey, RsaScheme};
use crate::spki;
use async_trait::async_trait;
use aws_lc_rs::rand::SecureRandom;
use aws_lc_rs::signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair};
use snafu::ResultExt;
use std::collections::HashMap;

/// This trait must be implemented for each type of key with which things will
/// be signed.
#[async_trait]
pub trait Sign: Sync + Send {
    /// Returns the public half of the keypair as it appears in metadata.
    fn metadata_key(&self) -> Key;

    /// Signs the supplied message.
    async fn sign(&self, msg: &[u8], rng: &(dyn SecureRandom + Sync)) -> Result<Vec<u8>>;
}

#[async_trait]
impl Sign for Ed25519KeyPair {
    fn metadata_key(&self) -> Key {
        Key::Ed25519 {
            keyval: Ed25519Key {
                public: self.public_key().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        }
    }

    async fn sign(&self, msg: &[u8], _rng: &(dyn SecureRandom + Sync)) -> Result<Vec<u8>> {
        let signature = self.sign(msg);
        Ok(signature.as_ref().to_vec())
    }
}

#[async_trait]
impl Sign for EcdsaKeyPair {
    fn metadata_key(&self) -> Key {
        Key::Ecdsa {
            keyval: EcdsaKey {
                public: spki::ec_point_to_pem(self.public_key().as_ref()),
                _extra: HashMap::new(),
            },
            scheme: EcdsaScheme::EcdsaSha2Nistp256,
            _extra: HashMap::new(),
        }
    }

    async fn sign(&self, msg: &[u8], rng: &(dyn SecureRandom + Sync)) -> Result<Vec<u8>> {
        let signature = self.sign(rng, msg).context(error::SignSnafu)?;
        Ok(signature.as_ref().to_vec())
    }
}

#[async_trait]
impl Sign for RsaKeyPair {
    fn metadata_key(&self) -> Key {
        Key::Rsa {
            keyval: RsaKey {
                public: spki::rsa_der_to_pem(self.public_key().as_ref()),
                _extra: HashMap::new(),
            },
            scheme: RsaScheme::RsassaPssSha256,
            _extra: HashMap::new(),
        }
    }

    async fn sign(&self, msg: &[u8], rng: &(dyn SecureRandom + Sync)) -> Result<Vec<u8>> {
        let mut signature = vec![0; self.public_modulus_len()];
        self.sign(
            &aws_lc_rs::signature::RSA_PSS_SHA256,
            rng,
            msg,
            &mut signature,
        )
        .context(error::SignSnafu)?;
        Ok(signature)
    }
}

/// Keypair used for signing metadata.
#[derive(Debug)]
#[allow(clippy::upper_case_acronyms)]
pub enum SignKeyPair {
    /// RSA key pair
    RSA(RsaKeyPair),
    /// ED25519 key pair
    ED25519(Ed25519KeyPair),
    /// ECDSA key pair
    ECDSA(EcdsaKeyPair),
}

#[async_trait]
impl Sign for SignKeyPair {
    fn metadata_key(&self) -> Key {
        match self {
            SignKeyPair::RSA(key) => key.metadata_key(),
            SignKeyPair::ED25519(key) => key.metadata_key(),
            SignKeyPair::ECDSA(key) => key.metadata_key(),
        }
    }

    async fn sign(&self, msg: &[u8], rng: &(dyn SecureRandom + Sync)) -> Result<Vec<u8>> {
        match self {
            SignKeyPair::RSA(key) => (key as &dyn Sign).sign(msg, rng).await,
            SignKeyPair::ED25519(key) => (key as &dyn Sign).sign(msg, rng).await,
            SignKeyPair::ECDSA(key) => (key as &dyn Sign).sign(msg, rng).await,
        }
    }
}

/// Parses a supplied private key and, if it is recognized, returns an object
/// that implements the `Sign` trait. Accepts PKCS#8 documents (raw DER or
/// wrapped in a `PRIVATE KEY` PEM) for all key types, plus `RSA PRIVATE KEY`
/// PEM documents.
pub fn parse_keypair(key: &[u8]) -> Result<SignKeyPair> {
    let der = match pem::parse(key) {
        Ok(pem) => match pem.tag() {
            "PRIVATE KEY" => pem.contents().to_vec(),
            "RSA PRIVATE KEY" => {
                return Ok(SignKeyPair::RSA(
                    RsaKeyPair::from_der(pem.contents()).context(error::KeyRejectedSnafu)?,
                ))
            }
            _ => return error::KeyUnrecognizedSnafu.fail(),
        },
        Err(_) => key.to_vec(),
    };

    if let Ok(ed25519_key_pair) = Ed25519KeyPair::from_pkcs8(&der) {
        Ok(SignKeyPair::ED25519(ed25519_key_pair))
    } else if let Ok(ecdsa_key_pair) = EcdsaKeyPair::from_pkcs8(
        &aws_lc_rs::signature::ECDSA_P256_SHA256_ASN1_SIGNING,
        &der,
    ) {
        Ok(SignKeyPair::ECDSA(ecdsa_key_pair))
    } else if let Ok(rsa_key_pair) = RsaKeyPair::from_pkcs8(&der) {
        Ok(SignKeyPair::RSA(rsa_key_pair))
    } else {
        error::KeyUnrecognizedSnafu.fail()
    }
}
