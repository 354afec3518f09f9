// SPDX-License-Identifier: MIT OR Apache-2.0

//! BLAKE3 content addressing.
//!
//! Every persisted entity (space headers, tree changes, access-control
//! records) is referred to by the hash of its encoded bytes. Hashes are
//! rendered as lower-case hex strings in human-readable formats and as raw
//! bytes otherwise.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of bytes of a BLAKE3 digest.
pub const HASH_LEN: usize = 32;

/// 32 byte BLAKE3 hash identifying a piece of content.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Hashes the given bytes.
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        Self(*blake3::hash(bytes.as_ref()).as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_LEN] {
        self.0
    }

    /// Hash as lower-case hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(value)?;
        Self::try_from(&bytes[..])
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = HashError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; HASH_LEN] = value
            .try_into()
            .map_err(|_| HashError::InvalidLength(value.len(), HASH_LEN))?;
        Ok(Self(bytes))
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors which can occur when decoding hashes from foreign input.
#[derive(Error, Debug)]
pub enum HashError {
    /// Hash string does not hold the right number of bytes.
    #[error("invalid hash length {0} bytes, expected {1} bytes")]
    InvalidLength(usize, usize),

    /// Hash string is invalid hex encoding.
    #[error("invalid hex encoding in hash string")]
    InvalidHexEncoding(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{HASH_LEN, Hash, HashError};

    #[test]
    fn hashing_is_deterministic() {
        let hash_1 = Hash::new(b"peanut butter");
        let hash_2 = Hash::new(b"peanut butter");
        let hash_3 = Hash::new(b"almond butter");
        assert_eq!(hash_1, hash_2);
        assert_ne!(hash_1, hash_3);
    }

    #[test]
    fn hex_representation() {
        let hash = Hash::new(b"bouillabaisse");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), HASH_LEN * 2);
        assert_eq!(Hash::from_str(&hex).unwrap(), hash);
        assert_eq!(format!("{hash}"), hex);
    }

    #[test]
    fn invalid_hashes() {
        // Not hex.
        assert!(matches!(
            Hash::from_str("vvvvv"),
            Err(HashError::InvalidHexEncoding(_))
        ));

        // Wrong length.
        assert!(matches!(
            Hash::from_str("124512"),
            Err(HashError::InvalidLength(3, 32))
        ));
    }
}
