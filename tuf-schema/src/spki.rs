// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal SubjectPublicKeyInfo encoding and decoding, used to carry RSA and
//! ECDSA public keys as PEM strings in metadata while the verifier needs the
//! inner key bytes.

use crate::error::{self, Result};
use snafu::{ensure, ResultExt};

const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

/// AlgorithmIdentifier for id-ecPublicKey with the prime256v1 named curve.
const EC_P256_ALGORITHM: &[u8] = &[
    0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a, 0x86,
    0x48, 0xce, 0x3d, 0x03, 0x01, 0x07,
];

/// AlgorithmIdentifier for rsaEncryption with absent parameters (NULL).
const RSA_ALGORITHM: &[u8] = &[
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
];

/// Wraps an uncompressed P-256 point as a PEM `SubjectPublicKeyInfo`.
pub(crate) fn ec_point_to_pem(point: &[u8]) -> String {
    to_pem(EC_P256_ALGORITHM, point)
}

/// Extracts the uncompressed P-256 point from a PEM `SubjectPublicKeyInfo`.
pub(crate) fn ec_point_from_pem(pem_str: &str) -> Result<Vec<u8>> {
    from_pem(pem_str, EC_P256_ALGORITHM)
}

/// Wraps a PKCS#1 `RSAPublicKey` as a PEM `SubjectPublicKeyInfo`.
pub(crate) fn rsa_der_to_pem(der: &[u8]) -> String {
    to_pem(RSA_ALGORITHM, der)
}

/// Extracts the PKCS#1 `RSAPublicKey` from a PEM `SubjectPublicKeyInfo`.
pub(crate) fn rsa_der_from_pem(pem_str: &str) -> Result<Vec<u8>> {
    from_pem(pem_str, RSA_ALGORITHM)
}

fn to_pem(algorithm: &[u8], key: &[u8]) -> String {
    let mut bit_string = vec![0x03];
    encode_length(&mut bit_string, key.len() + 1);
    // Leading zero: no unused bits in the BIT STRING.
    bit_string.push(0x00);
    bit_string.extend_from_slice(key);

    let mut body = Vec::with_capacity(algorithm.len() + bit_string.len());
    body.extend_from_slice(algorithm);
    body.extend_from_slice(&bit_string);

    let mut document = vec![0x30];
    encode_length(&mut document, body.len());
    document.extend_from_slice(&body);

    pem::encode(&pem::Pem::new(PUBLIC_KEY_TAG, document))
}

fn from_pem(pem_str: &str, algorithm: &[u8]) -> Result<Vec<u8>> {
    let document = pem::parse(pem_str).context(error::PemDecodeSnafu)?;
    ensure!(
        document.tag() == PUBLIC_KEY_TAG,
        error::SpkiMalformedSnafu {
            reason: format!("unexpected PEM tag {:?}", document.tag()),
        }
    );

    let (tag, body, rest) = read_tlv(document.contents())?;
    ensure!(
        tag == 0x30 && rest.is_empty(),
        error::SpkiMalformedSnafu {
            reason: "expected a single outer SEQUENCE",
        }
    );
    ensure!(
        body.starts_with(algorithm),
        error::SpkiMalformedSnafu {
            reason: "unexpected algorithm identifier",
        }
    );

    let (tag, bits, rest) = read_tlv(&body[algorithm.len()..])?;
    ensure!(
        tag == 0x03 && rest.is_empty(),
        error::SpkiMalformedSnafu {
            reason: "expected a BIT STRING after the algorithm identifier",
        }
    );
    ensure!(
        bits.first() == Some(&0x00),
        error::SpkiMalformedSnafu {
            reason: "BIT STRING has unused bits",
        }
    );
    Ok(bits[1..].to_vec())
}

fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        out.push(0x80 | (bytes.len() - start) as u8);
        out.extend_from_slice(&bytes[start..]);
    }
}

/// Reads one DER TLV from `input`, returning the tag, the contents, and any
/// trailing bytes.
fn read_tlv(input: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let malformed = |reason: &str| {
        error::SpkiMalformedSnafu {
            reason: reason.to_string(),
        }
        .build()
    };

    let (tag, rest) = input.split_first().ok_or_else(|| malformed("truncated tag"))?;
    let (first_len, mut rest) = rest
        .split_first()
        .ok_or_else(|| malformed("truncated length"))?;

    let len = if first_len & 0x80 == 0 {
        usize::from(*first_len)
    } else {
        let count = usize::from(first_len & 0x7f);
        if count == 0 || count > std::mem::size_of::<usize>() || rest.len() < count {
            return Err(malformed("unsupported length encoding"));
        }
        let mut len = 0usize;
        for byte in &rest[..count] {
            len = (len << 8) | usize::from(*byte);
        }
        rest = &rest[count..];
        len
    };

    if rest.len() < len {
        return Err(malformed("truncated contents"));
    }
    let (contents, rest) = rest.split_at(len);
    Ok((*tag, contents, rest))
}

#[cfg(test)]
mod tests {
    use super::{ec_point_from_pem, ec_point_to_pem, rsa_der_from_pem, rsa_der_to_pem};

    #[test]
    fn ec_round_trip() {
        // A P-256 uncompressed point is 65 bytes starting with 0x04.
        let mut point = vec![0x04];
        point.extend((0..64).map(|i| i as u8));
        let pem_str = ec_point_to_pem(&point);
        assert!(pem_str.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(ec_point_from_pem(&pem_str).unwrap(), point);
    }

    #[test]
    fn rsa_round_trip() {
        // Contents long enough to require long-form DER lengths.
        let der = vec![0x55; 300];
        let pem_str = rsa_der_to_pem(&der);
        assert_eq!(rsa_der_from_pem(&pem_str).unwrap(), der);
    }

    #[test]
    fn algorithm_mismatch() {
        let pem_str = ec_point_to_pem(&[0x04; 65]);
        assert!(rsa_der_from_pem(&pem_str).is_err());
    }
}
