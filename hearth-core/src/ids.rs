// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed identifiers for spaces, trees, changes, cached objects and peers.
//!
//! All of them are thin wrappers around [`Hash`] or [`PublicKey`]. The
//! wrappers exist so function signatures say which sort of entity they talk
//! about instead of passing bare hashes around.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{HASH_LEN, Hash, HashError};
use crate::identity::{IdentityError, PublicKey};

/// Identifier of a space, the hash of its encoded header.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(Hash);

impl SpaceId {
    /// Derives the space id from the encoded space header.
    pub fn derive(header_bytes: &[u8]) -> Self {
        Self(Hash::new(header_bytes))
    }

    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(Hash::from_bytes(bytes))
    }

    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SpaceId({})", self.0)
    }
}

impl FromStr for SpaceId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Hash::from_str(value)?))
    }
}

impl From<Hash> for SpaceId {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

/// Identifier of a single change in a tree or access-control log, the hash
/// of the signed change bytes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(Hash);

impl ChangeId {
    /// Derives the change id from the signed change bytes.
    pub fn derive(change_bytes: &[u8]) -> Self {
        Self(Hash::new(change_bytes))
    }

    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(Hash::from_bytes(bytes))
    }

    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ChangeId({})", self.0)
    }
}

impl FromStr for ChangeId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Hash::from_str(value)?))
    }
}

impl From<Hash> for ChangeId {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

/// Identifier of a change tree. A tree is addressed by its root change.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(Hash);

impl TreeId {
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(Hash::from_bytes(bytes))
    }

    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// The root change of this tree.
    pub fn root_change(&self) -> ChangeId {
        ChangeId(self.0)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TreeId({})", self.0)
    }
}

impl FromStr for TreeId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Hash::from_str(value)?))
    }
}

impl From<ChangeId> for TreeId {
    fn from(root: ChangeId) -> Self {
        Self(root.0)
    }
}

impl From<Hash> for TreeId {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

/// Identifier of a live in-memory object, for example an opened space or a
/// loaded tree.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Hash);

impl ObjectId {
    /// Derives an object id from arbitrary key bytes.
    pub fn derive(key_bytes: &[u8]) -> Self {
        Self(Hash::new(key_bytes))
    }

    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(Hash::from_bytes(bytes))
    }

    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Hash::from_str(value)?))
    }
}

impl From<TreeId> for ObjectId {
    fn from(tree_id: TreeId) -> Self {
        Self(tree_id.0)
    }
}

impl From<SpaceId> for ObjectId {
    fn from(space_id: SpaceId) -> Self {
        Self(space_id.0)
    }
}

impl From<Hash> for ObjectId {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

/// Identifier of a peer on the network, its public signing key.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(PublicKey);

impl PeerId {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        Ok(Self(PublicKey::from_bytes(bytes)?))
    }

    pub fn as_public_key(&self) -> &PublicKey {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl FromStr for PeerId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(PublicKey::from_str(value)?))
    }
}

impl From<PublicKey> for PeerId {
    fn from(public_key: PublicKey) -> Self {
        Self(public_key)
    }
}

/// Errors which can occur when decoding identifiers from strings.
#[derive(Error, Debug)]
pub enum IdError {
    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::identity::PrivateKey;

    use super::{ChangeId, PeerId, SpaceId, TreeId};

    #[test]
    fn ids_are_deterministic() {
        let space_1 = SpaceId::derive(b"space header");
        let space_2 = SpaceId::derive(b"space header");
        assert_eq!(space_1, space_2);
        assert_ne!(space_1, SpaceId::derive(b"another header"));
    }

    #[test]
    fn string_round_trips() {
        let space_id = SpaceId::derive(b"space header");
        assert_eq!(SpaceId::from_str(&space_id.to_hex()).unwrap(), space_id);

        let peer_id = PeerId::from(PrivateKey::new().public_key());
        assert_eq!(PeerId::from_str(&peer_id.to_hex()).unwrap(), peer_id);
    }

    #[test]
    fn tree_is_addressed_by_root_change() {
        let root = ChangeId::derive(b"signed root change");
        let tree_id = TreeId::from(root);
        assert_eq!(tree_id.root_change(), root);
        assert_eq!(tree_id.as_hash(), root.as_hash());
    }
}
