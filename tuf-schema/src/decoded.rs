// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides the `Decoded<T>` wrapper for binary data that is stored encoded as
//! a string in metadata, such as hex-encoded digests, key IDs, and signatures.

use crate::error::{self, Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::str::FromStr;

/// A scheme for encoding binary data as a string.
pub trait Encode {
    /// Encode bytes as a string.
    fn encode(bytes: &[u8]) -> String;
    /// Decode a string into bytes.
    fn decode(encoded: &str) -> Result<Vec<u8>>;
}

/// Lowercase hexadecimal encoding.
#[derive(Debug, Clone, Copy)]
pub struct Hex;

impl Encode for Hex {
    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(encoded: &str) -> Result<Vec<u8>> {
        hex::decode(encoded).context(error::HexDecodeSnafu)
    }
}

/// Binary data decoded from a string with encoding scheme `T`. Equality,
/// ordering, and hashing are all over the decoded bytes.
pub struct Decoded<T: Encode> {
    bytes: Vec<u8>,
    spooky: PhantomData<T>,
}

impl<T: Encode> Decoded<T> {
    /// Consumes the wrapper and returns the decoded bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl<T: Encode> From<Vec<u8>> for Decoded<T> {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            spooky: PhantomData,
        }
    }
}

impl<T: Encode> FromStr for Decoded<T> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self::from(T::decode(s)?))
    }
}

impl<T: Encode> Clone for Decoded<T> {
    fn clone(&self) -> Self {
        Self::from(self.bytes.clone())
    }
}

impl<T: Encode> fmt::Debug for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&T::encode(&self.bytes), f)
    }
}

impl<T: Encode> fmt::Display for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&T::encode(&self.bytes))
    }
}

impl<T: Encode> AsRef<[u8]> for Decoded<T> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T: Encode> Deref for Decoded<T> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T: Encode> PartialEq for Decoded<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<T: Encode> Eq for Decoded<T> {}

impl<T: Encode> PartialOrd for Decoded<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Encode> Ord for Decoded<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<T: Encode> Hash for Decoded<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<T: Encode> Serialize for Decoded<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&T::encode(&self.bytes))
    }
}

impl<'de, T: Encode> Deserialize<'de> for Decoded<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{Decoded, Hex};

    #[test]
    fn hex_round_trip() {
        let decoded: Decoded<Hex> = "deadbeef".parse().unwrap();
        assert_eq!(decoded.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decoded.to_string(), "deadbeef");
        assert_eq!(
            serde_json::to_string(&decoded).unwrap(),
            r#""deadbeef""#
        );
    }

    #[test]
    fn rejects_bad_hex() {
        assert!("nope".parse::<Decoded<Hex>>().is_err());
    }
}
