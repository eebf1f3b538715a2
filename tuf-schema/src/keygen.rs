// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keypair generation for each supported key type. Private keys are produced
//! as PKCS#8 PEM documents suitable for [`crate::sign::parse_keypair`].

use crate::decoded::{Decoded, Hex};
use crate::error::{self, Result};
use crate::key::{Key, KeyType};
use crate::sign::{parse_keypair, Sign};
use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{EcdsaKeyPair, Ed25519KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use snafu::{ensure, ResultExt};
use tokio::process::Command;

/// The smallest RSA modulus accepted for new keys.
pub const RSA_MINIMUM_BITS: u32 = 2048;

const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

/// A freshly generated keypair.
#[derive(Debug)]
pub struct GeneratedKey {
    /// The public half, as it appears in metadata.
    pub public: Key,
    /// The content-addressed ID of `public`.
    pub key_id: Decoded<Hex>,
    /// The private half as a PKCS#8 PEM document.
    pub private_pem: String,
}

/// Generates a keypair of the given type. `bits` applies to RSA only and
/// defaults to the minimum size.
pub async fn generate(key_type: KeyType, bits: Option<u32>) -> Result<GeneratedKey> {
    let private_pem = match key_type {
        KeyType::Ed25519 => {
            let document = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new())
                .context(error::KeyGenerationSnafu)?;
            pem::encode(&pem::Pem::new(PRIVATE_KEY_TAG, document.as_ref()))
        }
        KeyType::EcPrime256 => {
            let document =
                EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &SystemRandom::new())
                    .context(error::KeyGenerationSnafu)?;
            pem::encode(&pem::Pem::new(PRIVATE_KEY_TAG, document.as_ref()))
        }
        KeyType::Rsa => generate_rsa_pem(bits.unwrap_or(RSA_MINIMUM_BITS)).await?,
    };

    let pair = parse_keypair(private_pem.as_bytes())?;
    let public = pair.metadata_key();
    let key_id = public.key_id()?;
    log::debug!("generated {} key {}", key_type, key_id);
    Ok(GeneratedKey {
        public,
        key_id,
        private_pem,
    })
}

/// aws-lc-rs does not generate RSA keys, so defer to openssl.
async fn generate_rsa_pem(bits: u32) -> Result<String> {
    ensure!(
        bits >= RSA_MINIMUM_BITS,
        error::RsaKeyTooSmallSnafu {
            bits,
            minimum: RSA_MINIMUM_BITS,
        }
    );

    let command_str = format!("openssl genpkey -algorithm RSA -pkeyopt rsa_keygen_bits:{bits}");
    let output = Command::new("openssl")
        .args(["genpkey", "-algorithm", "RSA", "-pkeyopt"])
        .arg(format!("rsa_keygen_bits:{bits}"))
        .output()
        .await
        .context(error::CommandExecSnafu {
            command: &command_str,
        })?;
    ensure!(
        output.status.success(),
        error::CommandStatusSnafu {
            command: &command_str,
            status: output.status,
        }
    );
    String::from_utf8(output.stdout).context(error::CommandUtf8Snafu {
        command: command_str,
    })
}

#[cfg(test)]
mod tests {
    use super::generate;
    use crate::error::Error;
    use crate::key::{Key, KeyType};

    #[tokio::test]
    async fn ed25519_key_ids_are_content_addressed() {
        let generated = generate(KeyType::Ed25519, None).await.unwrap();
        assert_eq!(generated.key_id, generated.public.key_id().unwrap());
        assert_eq!(generated.key_id.len(), 32);
        assert!(matches!(generated.public, Key::Ed25519 { .. }));
    }

    #[tokio::test]
    async fn distinct_keys_have_distinct_ids() {
        let first = generate(KeyType::EcPrime256, None).await.unwrap();
        let second = generate(KeyType::EcPrime256, None).await.unwrap();
        assert_ne!(first.key_id, second.key_id);
    }

    #[tokio::test]
    async fn rejects_small_rsa_keys() {
        match generate(KeyType::Rsa, Some(1024)).await {
            Err(Error::RsaKeyTooSmall { bits: 1024, .. }) => {}
            other => panic!("expected RsaKeyTooSmall, got {other:?}"),
        }
    }
}
