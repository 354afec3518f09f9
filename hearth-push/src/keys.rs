// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-space push keys derived from access-control key material.
//!
//! The space signing key comes out of a SLIP-0010 ed25519 derivation over
//! the first metadata key of the space, the symmetric encryption key out of
//! a SLIP-0021 derivation over the current read key. Both are HMAC-SHA512
//! chains; rotating the read key rotates the encryption key while the
//! signing key stays stable for the lifetime of the space.
//!
//! <https://github.com/satoshilabs/slips/blob/master/slip-0010.md>
//! <https://github.com/satoshilabs/slips/blob/master/slip-0021.md>
use std::fmt;

use hearth_core::acl::{MetadataKey, ReadKey};
use hearth_core::identity::PrivateKey;
use hearth_spaces::PushKeyMaterial;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

const SLIP10_SEED_KEY: &[u8] = b"ed25519 seed";
const SLIP21_SEED_KEY: &[u8] = b"Symmetric key seed";
const HARDENED: u32 = 0x8000_0000;

/// Derivation path of the space signing key, all steps hardened.
const SIGNING_KEY_PATH: [u32; 2] = [99999, 1];

/// Derivation path of the symmetric per-space key.
const ENCRYPTION_KEY_PATH: [&str; 4] = ["SLIP-0021", "anytype", "space", "key"];

/// Symmetric key encrypting push payloads for one space.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EncryptionKey(<redacted>)")
    }
}

/// Everything the push engine needs for one space.
#[derive(Debug, Clone)]
pub struct SpaceKeys {
    /// Signs topics, its public half identifies the space at the push
    /// server.
    pub signing_key: PrivateKey,
    pub encryption_key: EncryptionKey,
    pub encryption_key_id: String,
}

pub fn derive_space_keys(material: &PushKeyMaterial) -> SpaceKeys {
    SpaceKeys {
        signing_key: derive_signing_key(&material.first_metadata_key),
        encryption_key: derive_encryption_key(&material.read_key),
        encryption_key_id: encryption_key_id(&material.read_key_id),
    }
}

/// SLIP-0010 ed25519 derivation of the space signing key.
pub fn derive_signing_key(metadata_key: &MetadataKey) -> PrivateKey {
    let mut node = slip10_master(metadata_key.as_bytes());
    for index in SIGNING_KEY_PATH {
        node = slip10_child(&node, index);
    }
    PrivateKey::from_bytes(&node.key)
}

/// SLIP-0021 derivation of the symmetric per-space key.
pub fn derive_encryption_key(read_key: &ReadKey) -> EncryptionKey {
    let mut node = slip21_master(read_key.as_bytes());
    for label in ENCRYPTION_KEY_PATH {
        node = slip21_child(&node, label);
    }
    EncryptionKey(node.key())
}

/// Identifier under which the push server knows the encryption key.
pub fn encryption_key_id(read_key_id: &str) -> String {
    hex::encode(Sha256::digest(read_key_id.as_bytes()))
}

fn hmac_sha512(key: &[u8], parts: &[&[u8]]) -> [u8; 64] {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(key).expect("hmac accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct Slip10Node {
    key: [u8; 32],
    chain_code: [u8; 32],
}

impl Slip10Node {
    fn from_digest(digest: [u8; 64]) -> Self {
        let mut key = [0; 32];
        let mut chain_code = [0; 32];
        key.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);
        Self { key, chain_code }
    }
}

fn slip10_master(seed: &[u8]) -> Slip10Node {
    Slip10Node::from_digest(hmac_sha512(SLIP10_SEED_KEY, &[seed]))
}

/// Hardened child derivation; ed25519 SLIP-0010 only defines hardened
/// steps.
fn slip10_child(parent: &Slip10Node, index: u32) -> Slip10Node {
    let index = (index | HARDENED).to_be_bytes();
    Slip10Node::from_digest(hmac_sha512(&parent.chain_code, &[
        &[0],
        &parent.key,
        &index,
    ]))
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct Slip21Node([u8; 64]);

impl Slip21Node {
    fn key(&self) -> [u8; 32] {
        let mut key = [0; 32];
        key.copy_from_slice(&self.0[32..]);
        key
    }
}

fn slip21_master(seed: &[u8]) -> Slip21Node {
    Slip21Node(hmac_sha512(SLIP21_SEED_KEY, &[seed]))
}

fn slip21_child(parent: &Slip21Node, label: &str) -> Slip21Node {
    Slip21Node(hmac_sha512(&parent.0[..32], &[&[0], label.as_bytes()]))
}
