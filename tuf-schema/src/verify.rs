// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Threshold signature verification for signed metadata payloads.

use crate::decoded::{Decoded, Hex};
use crate::error::{self, Result};
use crate::key::Key;
use crate::{RoleKeys, Signature};
use snafu::ensure;
use std::collections::{HashMap, HashSet};

/// Verifies `signatures` over the canonical bytes of a payload against the
/// role's declared key set.
///
/// The whole payload is rejected (rather than the offending signature being
/// skipped) when a signature references an unknown key ID, when the same key
/// signs twice, or when the signing key is not among the role's declared
/// keys. A signature by a declared key that simply fails to verify does not
/// count toward the threshold but does not reject the payload on its own.
pub fn verify_signatures(
    keys: &HashMap<Decoded<Hex>, Key>,
    role_keys: &RoleKeys,
    role_name: &str,
    canonical: &[u8],
    signatures: &[Signature],
) -> Result<()> {
    let mut seen: HashSet<&Decoded<Hex>> = HashSet::new();
    let mut valid = 0u64;

    for signature in signatures {
        let key = keys.get(&signature.keyid);
        let key = match key {
            Some(key) => key,
            None => {
                return error::UnknownKeyIdSnafu {
                    keyid: signature.keyid.to_string(),
                }
                .fail()
            }
        };
        ensure!(
            seen.insert(&signature.keyid),
            error::DuplicateSignatureSnafu {
                keyid: signature.keyid.to_string(),
            }
        );
        ensure!(
            role_keys.keyids.contains(&signature.keyid),
            error::KeyNotAuthorizedSnafu {
                keyid: signature.keyid.to_string(),
                role: role_name,
            }
        );
        if key.verify(canonical, &signature.sig) {
            valid += 1;
        } else {
            log::warn!(
                "signature by key {} over {} did not verify",
                signature.keyid,
                role_name
            );
        }
    }

    ensure!(
        valid >= role_keys.threshold.get(),
        error::SignatureThresholdSnafu {
            role: role_name,
            valid,
            threshold: role_keys.threshold.get(),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::verify_signatures;
    use crate::error::Error;
    use crate::keygen::generate;
    use crate::key::KeyType;
    use crate::sign::{parse_keypair, Sign};
    use crate::{RoleKeys, Signature};
    use aws_lc_rs::rand::SystemRandom;
    use std::collections::HashMap;
    use std::num::NonZeroU64;

    struct Fixture {
        keys: HashMap<crate::decoded::Decoded<crate::decoded::Hex>, crate::key::Key>,
        role_keys: RoleKeys,
        signatures: Vec<Signature>,
    }

    async fn fixture(signers: u64, threshold: u64, msg: &[u8]) -> Fixture {
        let mut keys = HashMap::new();
        let mut keyids = Vec::new();
        let mut signatures = Vec::new();
        for _ in 0..signers {
            let generated = generate(KeyType::Ed25519, None).await.unwrap();
            let pair = parse_keypair(generated.private_pem.as_bytes()).unwrap();
            let sig = pair.sign(msg, &SystemRandom::new()).await.unwrap();
            signatures.push(Signature {
                keyid: generated.key_id.clone(),
                sig: sig.into(),
            });
            keyids.push(generated.key_id.clone());
            keys.insert(generated.key_id, generated.public);
        }
        Fixture {
            keys,
            role_keys: RoleKeys {
                keyids,
                threshold: NonZeroU64::new(threshold).unwrap(),
                _extra: HashMap::new(),
            },
            signatures,
        }
    }

    #[tokio::test]
    async fn threshold_met() {
        let msg = b"payload";
        let f = fixture(2, 2, msg).await;
        verify_signatures(&f.keys, &f.role_keys, "targets", msg, &f.signatures).unwrap();
    }

    #[tokio::test]
    async fn threshold_not_met() {
        let msg = b"payload";
        let mut f = fixture(2, 2, msg).await;
        f.signatures.pop();
        match verify_signatures(&f.keys, &f.role_keys, "targets", msg, &f.signatures) {
            Err(Error::SignatureThreshold {
                valid: 1,
                threshold: 2,
                ..
            }) => {}
            other => panic!("expected SignatureThreshold, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_signature_rejected() {
        let msg = b"payload";
        let mut f = fixture(1, 1, msg).await;
        f.signatures.push(f.signatures[0].clone());
        assert!(matches!(
            verify_signatures(&f.keys, &f.role_keys, "targets", msg, &f.signatures),
            Err(Error::DuplicateSignature { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_key_rejected() {
        let msg = b"payload";
        let mut f = fixture(1, 1, msg).await;
        let stranger = generate(KeyType::Ed25519, None).await.unwrap();
        f.signatures[0].keyid = stranger.key_id;
        assert!(matches!(
            verify_signatures(&f.keys, &f.role_keys, "targets", msg, &f.signatures),
            Err(Error::UnknownKeyId { .. })
        ));
    }

    #[tokio::test]
    async fn undeclared_key_rejected() {
        let msg = b"payload";
        let mut f = fixture(2, 1, msg).await;
        // Key stays in the key list but is no longer declared for the role.
        f.role_keys.keyids.pop();
        assert!(matches!(
            verify_signatures(&f.keys, &f.role_keys, "targets", msg, &f.signatures),
            Err(Error::KeyNotAuthorized { .. })
        ));
    }

    #[tokio::test]
    async fn tampered_payload_fails_threshold() {
        let msg = b"payload";
        let f = fixture(1, 1, msg).await;
        assert!(matches!(
            verify_signatures(&f.keys, &f.role_keys, "targets", b"tampered", &f.signatures),
            Err(Error::SignatureThreshold { .. })
        ));
    }
}
