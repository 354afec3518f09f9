// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access-control log of a space.
//!
//! Every space carries an append-only log of signed records which governs
//! who participates in it. The first record is written by the space owner
//! and carries the initial key material. Later records track join requests,
//! grants, permission changes and removals.
//!
//! [`AclList`] holds the verified chain of records, [`AclState`] is the
//! account table obtained by replaying the chain from the root.
mod list;
mod permissions;
mod record;
mod state;

use thiserror::Error;

pub use list::AclList;
pub use permissions::Permissions;
pub use record::{AccountMetadata, AclPayload, AclRecord};
pub use state::{AccountState, AclState, MetadataKey, ParticipantStatus, ReadKey};

use crate::cbor::{DecodeError, EncodeError};
use crate::ids::ChangeId;

/// Errors which can occur when building or replaying access-control logs.
#[derive(Error, Debug)]
pub enum AclError {
    /// Record signature does not verify against the identity it claims.
    #[error("record {0} carries an invalid signature")]
    InvalidSignature(ChangeId),

    /// Record does not extend the current head of the log.
    #[error("record {0} does not extend the current head")]
    BrokenChain(ChangeId),

    /// Record with this id is already part of the log.
    #[error("record {0} is already part of the log")]
    DuplicateRecord(ChangeId),

    /// First record of a log must be a root record without a predecessor.
    #[error("first record of a log must be a root record")]
    NotARoot,

    /// Root records can only ever start a log.
    #[error("root record {0} can not be appended to an existing log")]
    UnexpectedRoot(ChangeId),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
