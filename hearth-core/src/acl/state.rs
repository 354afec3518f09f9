// SPDX-License-Identifier: MIT OR Apache-2.0

//! Account table derived from replaying an access-control log.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::acl::Permissions;
use crate::acl::list::AclList;
use crate::acl::record::{AclPayload, AclRecord};
use crate::identity::PublicKey;
use crate::ids::{ChangeId, SpaceId};

/// Where an account stands in the join lifecycle of a space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantStatus {
    /// Asked to join, no decision yet.
    Joining,

    /// Member of the space.
    Active,

    /// Asked to leave, stays until an admin removes it.
    Removing,

    /// Removed by an admin.
    Removed,

    /// Join request turned down by an admin.
    Declined,

    /// Withdrew its own join request.
    Canceled,
}

/// Symmetric key encrypting space content. Rotated whenever accounts are
/// removed so they can not follow future content.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ReadKey(Vec<u8>);

impl ReadKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for ReadKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for ReadKey {}

impl fmt::Debug for ReadKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ReadKey(<redacted>)")
    }
}

/// Key material from which per-space signing and encryption secrets are
/// derived. Established once in the root record, never rotated.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MetadataKey(Vec<u8>);

impl MetadataKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for MetadataKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for MetadataKey {}

impl fmt::Debug for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MetadataKey(<redacted>)")
    }
}

/// One account as seen after replaying the log.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountState {
    pub identity: PublicKey,
    pub permissions: Permissions,
    pub status: ParticipantStatus,

    /// Metadata supplied with the latest join request.
    pub metadata: Vec<u8>,

    /// Timestamp of the record which last granted the account access after
    /// it had none, unix seconds. `None` while the account holds no
    /// permissions.
    pub joined_at: Option<i64>,
}

/// Replayed account table and key material of one access-control log.
#[derive(Clone, Debug)]
pub struct AclState {
    space_id: SpaceId,
    owner: PublicKey,
    created_at: i64,
    head_id: ChangeId,
    accounts: BTreeMap<PublicKey, AccountState>,
    read_key_id: String,
    read_key: ReadKey,
    first_metadata_key: MetadataKey,
}

impl AclState {
    /// Replays the log from the root and returns the resulting state.
    pub fn from_list(list: &AclList) -> Self {
        let records = list.records();
        let root = &records[0];
        let AclPayload::Root {
            read_key_id,
            read_key,
            metadata_key,
            metadata,
        } = root.payload()
        else {
            // `AclList` only accepts root records as the first record.
            unreachable!("acl list starts with a root record");
        };

        let owner = *root.identity();
        let mut state = Self {
            space_id: list.space_id(),
            owner,
            created_at: root.timestamp(),
            head_id: list.head_id(),
            accounts: BTreeMap::new(),
            read_key_id: read_key_id.clone(),
            read_key: ReadKey::new(read_key.clone()),
            first_metadata_key: MetadataKey::new(metadata_key.clone()),
        };
        state.accounts.insert(
            owner,
            AccountState {
                identity: owner,
                permissions: Permissions::Owner,
                status: ParticipantStatus::Active,
                metadata: metadata.clone(),
                joined_at: Some(root.timestamp()),
            },
        );

        for record in &records[1..] {
            state.apply(record);
        }
        state
    }

    fn apply(&mut self, record: &AclRecord) {
        let author = *record.identity();
        let timestamp = record.timestamp();
        match record.payload() {
            // Rejected by `AclList::append`.
            AclPayload::Root { .. } => (),
            AclPayload::RequestJoin { metadata } => {
                let account = self.entry(author);
                account.permissions = Permissions::None;
                account.status = ParticipantStatus::Joining;
                account.metadata = metadata.clone();
                account.joined_at = None;
            }
            AclPayload::RequestCancel => {
                if let Some(account) = self.accounts.get_mut(&author)
                    && account.status == ParticipantStatus::Joining
                {
                    account.status = ParticipantStatus::Canceled;
                }
            }
            AclPayload::RequestAccept {
                identity,
                permissions,
            } => {
                self.grant(*identity, *permissions, timestamp);
            }
            AclPayload::RequestDecline { identity } => {
                if let Some(account) = self.accounts.get_mut(identity)
                    && account.status == ParticipantStatus::Joining
                {
                    account.status = ParticipantStatus::Declined;
                }
            }
            AclPayload::PermissionChange {
                identity,
                permissions,
            } => {
                self.grant(*identity, *permissions, timestamp);
            }
            AclPayload::RequestRemove => {
                if let Some(account) = self.accounts.get_mut(&author) {
                    account.status = ParticipantStatus::Removing;
                }
            }
            AclPayload::AccountRemove {
                identities,
                read_key_id,
                read_key,
            } => {
                for identity in identities {
                    if let Some(account) = self.accounts.get_mut(identity) {
                        account.permissions = Permissions::None;
                        account.status = ParticipantStatus::Removed;
                        account.joined_at = None;
                    }
                }
                self.read_key_id = read_key_id.clone();
                self.read_key = ReadKey::new(read_key.clone());
            }
        }
    }

    fn grant(&mut self, identity: PublicKey, permissions: Permissions, timestamp: i64) {
        let account = self.entry(identity);
        if account.permissions.is_none() && !permissions.is_none() {
            account.joined_at = Some(timestamp);
        }
        account.permissions = permissions;
        if !permissions.is_none() {
            account.status = ParticipantStatus::Active;
        }
    }

    fn entry(&mut self, identity: PublicKey) -> &mut AccountState {
        self.accounts.entry(identity).or_insert_with(|| AccountState {
            identity,
            permissions: Permissions::None,
            status: ParticipantStatus::Joining,
            metadata: Vec::new(),
            joined_at: None,
        })
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    pub fn owner(&self) -> &PublicKey {
        &self.owner
    }

    /// Timestamp of the root record, unix seconds.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Head of the log this state was replayed up to.
    pub fn head_id(&self) -> ChangeId {
        self.head_id
    }

    pub fn account(&self, identity: &PublicKey) -> Option<&AccountState> {
        self.accounts.get(identity)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountState> {
        self.accounts.values()
    }

    /// Accounts with the owner first, the rest sorted by identity. Gives
    /// watchers a deterministic processing order.
    pub fn accounts_owner_first(&self) -> Vec<&AccountState> {
        let mut accounts: Vec<&AccountState> = self.accounts.values().collect();
        accounts.sort_by_key(|account| (!account.permissions.is_owner(), account.identity));
        accounts
    }

    /// Permission level of an account, `None` for unknown accounts.
    pub fn permissions(&self, identity: &PublicKey) -> Permissions {
        self.accounts
            .get(identity)
            .map(|account| account.permissions)
            .unwrap_or_default()
    }

    pub fn status(&self, identity: &PublicKey) -> Option<ParticipantStatus> {
        self.accounts.get(identity).map(|account| account.status)
    }

    /// Read key currently encrypting space content.
    pub fn read_key(&self) -> &ReadKey {
        &self.read_key
    }

    pub fn read_key_id(&self) -> &str {
        &self.read_key_id
    }

    /// Metadata key from the root record.
    pub fn first_metadata_key(&self) -> &MetadataKey {
        &self.first_metadata_key
    }
}
