// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signed records of the access-control log.
use serde::{Deserialize, Serialize};

use crate::acl::{AclError, Permissions};
use crate::cbor::{decode_cbor, encode_cbor};
use crate::identity::{PrivateKey, PublicKey, Signature};
use crate::ids::ChangeId;

/// Profile details an account attaches to its join request.
///
/// Peers may send anything here, so decoding is lenient: bytes which do not
/// decode yield default (empty) metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountMetadata {
    pub name: String,
    pub icon: String,
    #[serde(with = "serde_bytes")]
    pub profile_key: Vec<u8>,
}

impl AccountMetadata {
    pub fn to_bytes(&self) -> Result<Vec<u8>, AclError> {
        Ok(encode_cbor(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        decode_cbor(bytes).unwrap_or_default()
    }
}

/// Operation carried by an access-control record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AclPayload {
    /// First record of the log, written by the space owner at creation.
    /// Carries the initial read key and the metadata key of the space.
    Root {
        read_key_id: String,
        #[serde(with = "serde_bytes")]
        read_key: Vec<u8>,
        #[serde(with = "serde_bytes")]
        metadata_key: Vec<u8>,
        #[serde(with = "serde_bytes")]
        metadata: Vec<u8>,
    },

    /// The signing account asks to join the space.
    RequestJoin {
        #[serde(with = "serde_bytes")]
        metadata: Vec<u8>,
    },

    /// The signing account withdraws its own pending join request.
    RequestCancel,

    /// An admin accepts a join request and grants permissions.
    RequestAccept {
        identity: PublicKey,
        permissions: Permissions,
    },

    /// An admin turns a join request down.
    RequestDecline { identity: PublicKey },

    /// An admin changes the permissions of an account.
    PermissionChange {
        identity: PublicKey,
        permissions: Permissions,
    },

    /// The signing account asks to leave the space. The account stays
    /// until an admin removes it and rotates the read key.
    RequestRemove,

    /// An admin removes accounts. A fresh read key is established so the
    /// removed accounts can not follow future content.
    AccountRemove {
        identities: Vec<PublicKey>,
        read_key_id: String,
        #[serde(with = "serde_bytes")]
        read_key: Vec<u8>,
    },
}

/// Fields covered by the record signature.
#[derive(Serialize)]
struct SignableRecord<'a> {
    prev: Option<ChangeId>,
    identity: PublicKey,
    timestamp: i64,
    payload: &'a AclPayload,
}

/// Persisted and wire shape of a record. The record id is the hash of these
/// encoded bytes.
#[derive(Serialize, Deserialize)]
struct RecordEnvelope {
    prev: Option<ChangeId>,
    identity: PublicKey,
    timestamp: i64,
    payload: AclPayload,
    signature: Signature,
}

/// A single verified record of the access-control log.
#[derive(Clone, Debug, PartialEq)]
pub struct AclRecord {
    id: ChangeId,
    prev: Option<ChangeId>,
    identity: PublicKey,
    timestamp: i64,
    payload: AclPayload,
    signature: Signature,
    bytes: Vec<u8>,
}

impl AclRecord {
    /// Creates and signs a record extending `prev`.
    pub fn create(
        key: &PrivateKey,
        prev: Option<ChangeId>,
        timestamp: i64,
        payload: AclPayload,
    ) -> Result<Self, AclError> {
        let identity = key.public_key();
        let signable = encode_cbor(&SignableRecord {
            prev,
            identity,
            timestamp,
            payload: &payload,
        })?;
        let signature = key.sign(&signable);
        let bytes = encode_cbor(&RecordEnvelope {
            prev,
            identity,
            timestamp,
            payload: payload.clone(),
            signature: signature.clone(),
        })?;
        let id = ChangeId::derive(&bytes);
        Ok(Self {
            id,
            prev,
            identity,
            timestamp,
            payload,
            signature,
            bytes,
        })
    }

    /// Decodes a record from its stored bytes and verifies the signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AclError> {
        let envelope: RecordEnvelope = decode_cbor(bytes)?;
        let record = Self {
            id: ChangeId::derive(bytes),
            prev: envelope.prev,
            identity: envelope.identity,
            timestamp: envelope.timestamp,
            payload: envelope.payload,
            signature: envelope.signature,
            bytes: bytes.to_vec(),
        };
        record.verify()?;
        Ok(record)
    }

    /// Checks the signature against the identity the record claims.
    pub fn verify(&self) -> Result<(), AclError> {
        let signable = encode_cbor(&SignableRecord {
            prev: self.prev,
            identity: self.identity,
            timestamp: self.timestamp,
            payload: &self.payload,
        })?;
        if !self.identity.verify(&signable, &self.signature) {
            return Err(AclError::InvalidSignature(self.id));
        }
        Ok(())
    }

    pub fn id(&self) -> ChangeId {
        self.id
    }

    pub fn prev(&self) -> Option<ChangeId> {
        self.prev
    }

    /// Account which signed this record.
    pub fn identity(&self) -> &PublicKey {
        &self.identity
    }

    /// Unix timestamp (seconds) claimed by the signer.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn payload(&self) -> &AclPayload {
        &self.payload
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Encoded signed bytes, the preimage of the record id.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_root(&self) -> bool {
        matches!(self.payload, AclPayload::Root { .. })
    }
}

#[cfg(test)]
mod tests {
    use crate::identity::PrivateKey;

    use super::{AccountMetadata, AclPayload, AclRecord};

    fn join_payload() -> AclPayload {
        AclPayload::RequestJoin {
            metadata: AccountMetadata {
                name: "panda".into(),
                icon: String::new(),
                profile_key: vec![1, 2, 3],
            }
            .to_bytes()
            .unwrap(),
        }
    }

    #[test]
    fn create_and_restore() {
        let key = PrivateKey::new();
        let record = AclRecord::create(&key, None, 1_700_000_000, join_payload()).unwrap();

        let restored = AclRecord::from_bytes(record.as_bytes()).unwrap();
        assert_eq!(restored, record);
        assert_eq!(restored.id(), record.id());
        assert_eq!(restored.identity(), &key.public_key());
    }

    #[test]
    fn tampered_bytes_are_rejected() {
        let key = PrivateKey::new();
        let record = AclRecord::create(&key, None, 1_700_000_000, join_payload()).unwrap();

        let mut bytes = record.as_bytes().to_vec();
        // Flip a bit somewhere in the middle of the payload.
        let index = bytes.len() / 2;
        bytes[index] ^= 0x01;
        assert!(AclRecord::from_bytes(&bytes).is_err());
    }

    #[test]
    fn metadata_decoding_is_lenient() {
        let metadata = AccountMetadata {
            name: "panda".into(),
            icon: "cid".into(),
            profile_key: vec![9, 9],
        };
        let bytes = metadata.to_bytes().unwrap();
        assert_eq!(AccountMetadata::from_bytes(&bytes), metadata);

        // Garbage decodes to defaults instead of failing.
        assert_eq!(
            AccountMetadata::from_bytes(b"certainly not cbor"),
            AccountMetadata::default()
        );
    }
}
