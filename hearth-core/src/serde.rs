// SPDX-License-Identifier: MIT OR Apache-2.0

//! Custom serde `Serializer` and `Deserializer` implementations.
//!
//! Hashes, keys and signatures serialize as raw bytes in binary formats
//! (CBOR) and as hex strings in human-readable formats (JSON), branching on
//! `is_human_readable`.
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::{ByteBuf, Bytes as SerdeBytes};

use crate::hash::Hash;
use crate::identity::{PublicKey, Signature};

/// Serializes bytes as hex string for human-readable encodings or as bytes
/// otherwise.
pub fn serialize_hex<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        hex::serde::serialize(value, serializer)
    } else {
        SerdeBytes::new(value).serialize(serializer)
    }
}

/// Deserializes from hex string for human-readable encodings or from bytes
/// otherwise.
pub fn deserialize_hex<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    if deserializer.is_human_readable() {
        hex::serde::deserialize(deserializer)
    } else {
        let bytes: ByteBuf = Deserialize::deserialize(deserializer)?;
        Ok(bytes.into_vec())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize_hex(self.as_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;
        Self::try_from(&bytes[..])
            .map_err(|err| serde::de::Error::custom(format!("invalid hash bytes: {err}")))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize_hex(self.as_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;
        Self::from_bytes(&bytes)
            .map_err(|err| serde::de::Error::custom(format!("invalid public key bytes: {err}")))
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize_hex(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;
        Self::try_from(&bytes[..])
            .map_err(|err| serde::de::Error::custom(format!("invalid signature bytes: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::hash::Hash;
    use crate::identity::PrivateKey;

    #[test]
    fn hash_binary_and_human_readable() {
        let hash = Hash::new(b"expedition");

        // CBOR: byte string of 32 bytes, two byte header.
        let mut cbor = Vec::new();
        ciborium::ser::into_writer(&hash, &mut cbor).unwrap();
        assert_eq!(cbor.len(), 34);
        assert_eq!(&cbor[..2], &[88, 32]);
        assert_eq!(&cbor[2..], hash.as_bytes());
        let decoded: Hash = ciborium::de::from_reader(&cbor[..]).unwrap();
        assert_eq!(decoded, hash);

        // JSON: hex string.
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let decoded: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, hash);
    }

    #[test]
    fn signature_binary_and_human_readable() {
        let private_key = PrivateKey::new();
        let public_key = private_key.public_key();
        let signature = private_key.sign(b"running out of test sentences");

        let mut cbor = Vec::new();
        ciborium::ser::into_writer(&signature, &mut cbor).unwrap();
        assert_eq!(cbor.len(), 66);
        assert_eq!(&cbor[..2], &[88, 64]);
        let decoded: crate::identity::Signature = ciborium::de::from_reader(&cbor[..]).unwrap();
        assert!(public_key.verify(b"running out of test sentences", &decoded));

        let json = serde_json::to_string(&public_key).unwrap();
        assert_eq!(json, format!("\"{}\"", public_key.to_hex()));
        let decoded: crate::identity::PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, public_key);
    }
}
