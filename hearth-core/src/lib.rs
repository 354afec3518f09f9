// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data types for spaces: content addressing, identities and the
//! access-control log which governs who participates in a space.
//!
//! Everything in here is plain data with no I/O attached. Higher layers
//! (storage, discovery, push) build on these types.
pub mod acl;
pub mod cbor;
pub mod hash;
pub mod identity;
pub mod ids;
mod serde;

pub use acl::{
    AccountMetadata, AccountState, AclError, AclList, AclPayload, AclRecord, AclState,
    MetadataKey, ParticipantStatus, Permissions, ReadKey,
};
pub use cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
pub use hash::{HASH_LEN, Hash, HashError};
pub use identity::{IdentityError, PrivateKey, PublicKey, Signature};
pub use ids::{ChangeId, IdError, ObjectId, PeerId, SpaceId, TreeId};
