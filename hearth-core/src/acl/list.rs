// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered, verified chain of access-control records.
use std::collections::HashMap;

use crate::acl::AclError;
use crate::acl::record::AclRecord;
use crate::identity::PublicKey;
use crate::ids::{ChangeId, SpaceId};

/// Append-only chain of access-control records of one space.
///
/// The list enforces the chain structure: the first record is the root,
/// every later record references the previous head and carries a valid
/// signature. Interpreting the records is left to
/// [`AclState`](crate::acl::AclState).
#[derive(Clone, Debug)]
pub struct AclList {
    space_id: SpaceId,
    records: Vec<AclRecord>,
    index: HashMap<ChangeId, usize>,
}

impl AclList {
    /// Starts a log from its root record.
    pub fn new(space_id: SpaceId, root: AclRecord) -> Result<Self, AclError> {
        root.verify()?;
        if !root.is_root() || root.prev().is_some() {
            return Err(AclError::NotARoot);
        }
        let mut index = HashMap::new();
        index.insert(root.id(), 0);
        Ok(Self {
            space_id,
            records: vec![root],
            index,
        })
    }

    /// Restores a log from stored record bytes, root first.
    pub fn from_bytes<'a>(
        space_id: SpaceId,
        mut records: impl Iterator<Item = &'a [u8]>,
    ) -> Result<Self, AclError> {
        let root_bytes = records.next().ok_or(AclError::NotARoot)?;
        let mut list = Self::new(space_id, AclRecord::from_bytes(root_bytes)?)?;
        for bytes in records {
            list.append(AclRecord::from_bytes(bytes)?)?;
        }
        Ok(list)
    }

    /// Appends a record to the head of the log.
    pub fn append(&mut self, record: AclRecord) -> Result<(), AclError> {
        record.verify()?;
        if record.is_root() {
            return Err(AclError::UnexpectedRoot(record.id()));
        }
        if self.index.contains_key(&record.id()) {
            return Err(AclError::DuplicateRecord(record.id()));
        }
        if record.prev() != Some(self.head_id()) {
            return Err(AclError::BrokenChain(record.id()));
        }
        self.index.insert(record.id(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    /// Id of the root record.
    pub fn root_id(&self) -> ChangeId {
        self.records[0].id()
    }

    /// Id of the newest record.
    pub fn head_id(&self) -> ChangeId {
        self.records[self.records.len() - 1].id()
    }

    pub fn head(&self) -> &AclRecord {
        &self.records[self.records.len() - 1]
    }

    /// Account which wrote the root record and owns the space.
    pub fn owner(&self) -> &PublicKey {
        self.records[0].identity()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &ChangeId) -> Option<&AclRecord> {
        self.index.get(id).map(|index| &self.records[*index])
    }

    /// Whether a record with this id is part of the log.
    pub fn contains(&self, id: &ChangeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn records(&self) -> &[AclRecord] {
        &self.records
    }

    /// Iterates over all records strictly after the given checkpoint, oldest
    /// first. `None` and unknown checkpoints yield the whole log from the
    /// root; consumers are expected to deduplicate on record ids.
    pub fn iterate_after(
        &self,
        checkpoint: Option<&ChangeId>,
    ) -> impl Iterator<Item = &AclRecord> {
        let start = checkpoint
            .and_then(|id| self.index.get(id).map(|index| index + 1))
            .unwrap_or(0);
        self.records[start.min(self.records.len())..].iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::acl::record::{AclPayload, AclRecord};
    use crate::acl::{AclError, Permissions};
    use crate::identity::PrivateKey;
    use crate::ids::SpaceId;

    use super::AclList;

    fn root_payload() -> AclPayload {
        AclPayload::Root {
            read_key_id: "rk-1".into(),
            read_key: vec![1; 32],
            metadata_key: vec![2; 32],
            metadata: Vec::new(),
        }
    }

    fn make_list(owner: &PrivateKey, member: &PrivateKey) -> AclList {
        let space_id = SpaceId::derive(b"test space header");
        let root = AclRecord::create(owner, None, 100, root_payload()).unwrap();
        let mut list = AclList::new(space_id, root).unwrap();

        let join = AclRecord::create(
            member,
            Some(list.head_id()),
            110,
            AclPayload::RequestJoin {
                metadata: Vec::new(),
            },
        )
        .unwrap();
        list.append(join).unwrap();

        let accept = AclRecord::create(
            owner,
            Some(list.head_id()),
            120,
            AclPayload::RequestAccept {
                identity: member.public_key(),
                permissions: Permissions::Writer,
            },
        )
        .unwrap();
        list.append(accept).unwrap();
        list
    }

    #[test]
    fn builds_a_chain() {
        let owner = PrivateKey::new();
        let member = PrivateKey::new();
        let list = make_list(&owner, &member);

        assert_eq!(list.len(), 3);
        assert_eq!(list.owner(), &owner.public_key());
        assert_ne!(list.root_id(), list.head_id());
        assert!(list.contains(&list.root_id()));
    }

    #[test]
    fn first_record_must_be_a_root() {
        let key = PrivateKey::new();
        let join = AclRecord::create(
            &key,
            None,
            100,
            AclPayload::RequestJoin {
                metadata: Vec::new(),
            },
        )
        .unwrap();
        assert!(matches!(
            AclList::new(SpaceId::derive(b"header"), join),
            Err(AclError::NotARoot)
        ));
    }

    #[test]
    fn append_enforces_the_chain() {
        let owner = PrivateKey::new();
        let member = PrivateKey::new();
        let mut list = make_list(&owner, &member);

        // Does not reference the head.
        let stale = AclRecord::create(
            &owner,
            Some(list.root_id()),
            130,
            AclPayload::RequestDecline {
                identity: member.public_key(),
            },
        )
        .unwrap();
        assert!(matches!(
            list.append(stale),
            Err(AclError::BrokenChain(_))
        ));

        // A second root is rejected.
        let second_root =
            AclRecord::create(&owner, Some(list.head_id()), 130, root_payload()).unwrap();
        assert!(matches!(
            list.append(second_root),
            Err(AclError::UnexpectedRoot(_))
        ));
    }

    #[test]
    fn restores_from_bytes() {
        let owner = PrivateKey::new();
        let member = PrivateKey::new();
        let list = make_list(&owner, &member);

        let bytes: Vec<&[u8]> = list.records().iter().map(|record| record.as_bytes()).collect();
        let restored = AclList::from_bytes(list.space_id(), bytes.into_iter()).unwrap();
        assert_eq!(restored.head_id(), list.head_id());
        assert_eq!(restored.len(), list.len());
    }

    #[test]
    fn iterate_after_checkpoints() {
        let owner = PrivateKey::new();
        let member = PrivateKey::new();
        let list = make_list(&owner, &member);

        // No checkpoint walks the whole log.
        assert_eq!(list.iterate_after(None).count(), 3);

        // Checkpoint at the root yields everything after it.
        let after_root: Vec<_> = list.iterate_after(Some(&list.root_id())).collect();
        assert_eq!(after_root.len(), 2);

        // Checkpoint at the head yields nothing.
        assert_eq!(list.iterate_after(Some(&list.head_id())).count(), 0);

        // Unknown checkpoints restart from the beginning.
        let unknown = crate::ids::ChangeId::derive(b"unknown");
        assert_eq!(list.iterate_after(Some(&unknown)).count(), 3);
    }
}
