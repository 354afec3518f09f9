// SPDX-License-Identifier: MIT OR Apache-2.0

//! Space rows and exclusive per-space storage handles.
use hearth_core::hash::HASH_LEN;
use hearth_core::ids::{ChangeId, SpaceId, TreeId};
use sqlx::{FromRow, query, query_as, query_scalar};
use tokio_util::sync::CancellationToken;

use crate::lock::SpaceLockGuard;
use crate::sqlite::{RowDecodeError, SpaceStore, StoreError};
use crate::trees::{RawChange, TreeKind};

/// Everything needed to persist a new space: its encoded header plus the
/// root changes of the settings tree and the access-control list.
#[derive(Clone, Debug)]
pub struct CreateSpaceParams {
    pub space_id: SpaceId,
    pub header: Vec<u8>,
    pub settings_root: RawChange,
    pub acl_root: RawChange,
}

/// One space row as loaded from the store.
///
/// `hash` and `old_hash` are opaque 32-byte digests managed by the caller,
/// the store never interprets them.
#[derive(Clone, Debug)]
pub struct SpaceRecord {
    pub id: SpaceId,
    pub header: Vec<u8>,
    pub settings_id: TreeId,
    pub acl_id: ChangeId,
    pub hash: Option<[u8; HASH_LEN]>,
    pub old_hash: Option<[u8; HASH_LEN]>,
    pub is_created: bool,
    pub is_deleted: bool,
}

#[derive(Debug, FromRow)]
struct SpaceRow {
    id: String,
    header: Vec<u8>,
    settings_id: Option<String>,
    acl_id: Option<String>,
    hash: Option<Vec<u8>>,
    old_hash: Option<Vec<u8>>,
    is_created: i64,
    is_deleted: i64,
}

fn decode_digest(blob: Option<Vec<u8>>) -> Result<Option<[u8; HASH_LEN]>, StoreError> {
    blob.map(|bytes| {
        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            StoreError::Decode("space hash".into(), RowDecodeError::InvalidBlobLength(len))
        })
    })
    .transpose()
}

impl TryFrom<SpaceRow> for SpaceRecord {
    type Error = StoreError;

    fn try_from(row: SpaceRow) -> Result<Self, Self::Error> {
        let decode_id = |label: &str, value: Option<String>| {
            value
                .ok_or_else(|| {
                    StoreError::Decode(label.into(), RowDecodeError::UnknownLabel("null".into()))
                })?
                .parse::<hearth_core::hash::Hash>()
                .map_err(|err| StoreError::Decode(label.into(), RowDecodeError::Id(err.into())))
        };

        Ok(SpaceRecord {
            id: row
                .id
                .parse()
                .map_err(|err: hearth_core::ids::IdError| {
                    StoreError::Decode("space id".into(), err.into())
                })?,
            header: row.header,
            settings_id: decode_id("settings id", row.settings_id)?.into(),
            acl_id: decode_id("acl id", row.acl_id)?.into(),
            hash: decode_digest(row.hash)?,
            old_hash: decode_digest(row.old_hash)?,
            is_created: row.is_created != 0,
            is_deleted: row.is_deleted != 0,
        })
    }
}

impl SpaceStore {
    /// Persists a new space: the space row, its settings tree, its
    /// access-control list and both root changes, all in one transaction.
    ///
    /// Fails with `SpaceExists` when a row with this id is already present,
    /// leaving the store untouched.
    pub async fn create_space(&self, params: &CreateSpaceParams) -> Result<(), StoreError> {
        let settings_id = TreeId::from(params.settings_root.id);
        let acl_tree_id = TreeId::from(params.acl_root.id);
        let settings_heads = hearth_core::cbor::encode_cbor(&[params.settings_root.id])
            .map_err(|err| StoreError::Encode("heads".into(), err))?;
        let acl_heads = hearth_core::cbor::encode_cbor(&[params.acl_root.id])
            .map_err(|err| StoreError::Encode("heads".into(), err))?;

        self.with_tx(async |tx| {
            let result = query(
                "INSERT INTO spaces (id, header, settings_id, acl_id) VALUES (?, ?, ?, ?)",
            )
            .bind(params.space_id.to_hex())
            .bind(&params.header)
            .bind(settings_id.to_hex())
            .bind(params.acl_root.id.to_hex())
            .execute(&mut **tx)
            .await;
            match result {
                Ok(_) => (),
                Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                    return Err(StoreError::SpaceExists);
                }
                Err(err) => return Err(err.into()),
            }

            for (tree_id, kind, heads, root) in [
                (
                    settings_id,
                    TreeKind::Settings,
                    &settings_heads,
                    &params.settings_root,
                ),
                (acl_tree_id, TreeKind::List, &acl_heads, &params.acl_root),
            ] {
                query("INSERT INTO trees (id, space_id, type, heads) VALUES (?, ?, ?, ?)")
                    .bind(tree_id.to_hex())
                    .bind(params.space_id.to_hex())
                    .bind(kind.as_str())
                    .bind(heads)
                    .execute(&mut **tx)
                    .await?;
                query(
                    "INSERT OR IGNORE INTO changes (id, space_id, tree_id, data) VALUES (?, ?, ?, ?)",
                )
                .bind(root.id.to_hex())
                .bind(params.space_id.to_hex())
                .bind(tree_id.to_hex())
                .bind(&root.bytes)
                .execute(&mut **tx)
                .await?;
            }
            Ok(())
        })
        .await
    }

    pub async fn load_space(&self, id: &SpaceId) -> Result<SpaceRecord, StoreError> {
        let row = self
            .execute(async |pool| {
                Ok(query_as::<_, SpaceRow>(
                    "SELECT id, header, settings_id, acl_id, hash, old_hash, is_created, is_deleted \
                     FROM spaces WHERE id = ?",
                )
                .bind(id.to_hex())
                .fetch_optional(pool)
                .await?)
            })
            .await?;
        row.ok_or(StoreError::SpaceNotFound)?.try_into()
    }

    pub async fn space_ids(&self) -> Result<Vec<SpaceId>, StoreError> {
        let ids: Vec<String> = self
            .execute(async |pool| {
                Ok(query_scalar("SELECT id FROM spaces ORDER BY id")
                    .fetch_all(pool)
                    .await?)
            })
            .await?;
        ids.into_iter()
            .map(|id| {
                id.parse().map_err(|err: hearth_core::ids::IdError| {
                    StoreError::Decode("space id".into(), err.into())
                })
            })
            .collect()
    }

    pub async fn space_exists(&self, id: &SpaceId) -> Result<bool, StoreError> {
        let row: Option<i64> = self
            .execute(async |pool| {
                Ok(query_scalar("SELECT 1 FROM spaces WHERE id = ?")
                    .bind(id.to_hex())
                    .fetch_optional(pool)
                    .await?)
            })
            .await?;
        Ok(row.is_some())
    }

    pub async fn mark_space_created(&self, id: &SpaceId) -> Result<(), StoreError> {
        self.update_space_flag(id, "is_created").await
    }

    pub async fn mark_space_deleted(&self, id: &SpaceId) -> Result<(), StoreError> {
        self.update_space_flag(id, "is_deleted").await
    }

    pub async fn is_space_created(&self, id: &SpaceId) -> Result<bool, StoreError> {
        self.read_space_flag(id, "is_created").await
    }

    pub async fn is_space_deleted(&self, id: &SpaceId) -> Result<bool, StoreError> {
        self.read_space_flag(id, "is_deleted").await
    }

    // Column names come from a fixed set above, never from input.
    async fn update_space_flag(&self, id: &SpaceId, column: &str) -> Result<(), StoreError> {
        let sql = format!("UPDATE spaces SET {column} = 1 WHERE id = ?");
        let result = self
            .execute(async |pool| Ok(query(&sql).bind(id.to_hex()).execute(pool).await?))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::SpaceNotFound);
        }
        Ok(())
    }

    async fn read_space_flag(&self, id: &SpaceId, column: &str) -> Result<bool, StoreError> {
        let sql = format!("SELECT {column} FROM spaces WHERE id = ?");
        let flag: Option<i64> = self
            .execute(async |pool| Ok(query_scalar(&sql).bind(id.to_hex()).fetch_optional(pool).await?))
            .await?;
        Ok(flag.ok_or(StoreError::SpaceNotFound)? != 0)
    }

    pub async fn set_hash(&self, id: &SpaceId, hash: [u8; HASH_LEN]) -> Result<(), StoreError> {
        self.update_space_digest(id, "hash", hash).await
    }

    pub async fn set_old_hash(&self, id: &SpaceId, hash: [u8; HASH_LEN]) -> Result<(), StoreError> {
        self.update_space_digest(id, "old_hash", hash).await
    }

    async fn update_space_digest(
        &self,
        id: &SpaceId,
        column: &str,
        hash: [u8; HASH_LEN],
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE spaces SET {column} = ? WHERE id = ?");
        let result = self
            .execute(async |pool| {
                Ok(query(&sql)
                    .bind(hash.to_vec())
                    .bind(id.to_hex())
                    .execute(pool)
                    .await?)
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::SpaceNotFound);
        }
        Ok(())
    }

    /// Tombstones a space: removes every tree, change and bind row of the
    /// space in one transaction and marks the space row deleted. The header
    /// row stays behind so the deletion survives restarts.
    pub async fn delete_space(&self, id: &SpaceId) -> Result<(), StoreError> {
        self.with_tx(async |tx| {
            query("DELETE FROM changes WHERE space_id = ?")
                .bind(id.to_hex())
                .execute(&mut **tx)
                .await?;
            query("DELETE FROM trees WHERE space_id = ?")
                .bind(id.to_hex())
                .execute(&mut **tx)
                .await?;
            query("DELETE FROM binds WHERE space_id = ?")
                .bind(id.to_hex())
                .execute(&mut **tx)
                .await?;
            let result = query("UPDATE spaces SET is_deleted = 1 WHERE id = ?")
                .bind(id.to_hex())
                .execute(&mut **tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::SpaceNotFound);
            }
            Ok(())
        })
        .await
    }

    /// Waits for exclusive access to one space and returns a storage handle
    /// scoped to it. The handle keeps the lock until it is dropped.
    pub async fn wait_space_storage(
        &self,
        ctx: &CancellationToken,
        id: SpaceId,
    ) -> Result<SpaceStorage, StoreError> {
        let guard = self.locks.lock(ctx, id).await?;
        Ok(SpaceStorage {
            store: self.clone(),
            guard,
        })
    }

    /// Non-blocking variant of [`wait_space_storage`], fails with `Locked`
    /// when another handle to the space is alive.
    ///
    /// [`wait_space_storage`]: SpaceStore::wait_space_storage
    pub fn try_lock_space(&self, id: SpaceId) -> Result<SpaceStorage, StoreError> {
        let guard = self.locks.try_lock(id)?;
        Ok(SpaceStorage {
            store: self.clone(),
            guard,
        })
    }
}

/// Storage handle scoped to one space, holding its exclusive lock.
///
/// All store operations remain available through [`store`], the handle only
/// pins the lock and remembers which space it belongs to.
///
/// [`store`]: SpaceStorage::store
#[derive(Debug)]
pub struct SpaceStorage {
    store: SpaceStore,
    guard: SpaceLockGuard,
}

impl SpaceStorage {
    pub fn space_id(&self) -> SpaceId {
        self.guard.space_id()
    }

    pub fn store(&self) -> &SpaceStore {
        &self.store
    }

    /// Convenience look-up of the space row this handle is scoped to.
    pub async fn record(&self) -> Result<SpaceRecord, StoreError> {
        self.store.load_space(&self.guard.space_id()).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use hearth_core::ids::{ObjectId, SpaceId, TreeId};
    use tokio_util::sync::CancellationToken;

    use crate::lock::LockError;
    use crate::sqlite::{SpaceStore, StoreError};
    use crate::trees::RawChange;

    use super::CreateSpaceParams;

    pub(crate) fn space_params(seed: &str) -> CreateSpaceParams {
        let header = format!("header of {seed}").into_bytes();
        CreateSpaceParams {
            space_id: SpaceId::derive(&header),
            header,
            settings_root: RawChange::new(format!("settings root of {seed}").into_bytes()),
            acl_root: RawChange::new(format!("acl root of {seed}").into_bytes()),
        }
    }

    #[tokio::test]
    async fn create_space_is_atomic() {
        let store = SpaceStore::temporary().await;
        let params = space_params("home");

        store.create_space(&params).await.unwrap();
        assert!(store.space_exists(&params.space_id).await.unwrap());

        let record = store.load_space(&params.space_id).await.unwrap();
        assert_eq!(record.id, params.space_id);
        assert_eq!(record.header, params.header);
        assert_eq!(record.settings_id, TreeId::from(params.settings_root.id));
        assert_eq!(record.acl_id, params.acl_root.id);
        assert_eq!(record.hash, None);
        assert!(!record.is_created);
        assert!(!record.is_deleted);

        // Both trees and both root changes landed.
        let mut trees = store.tree_ids(&params.space_id).await.unwrap();
        trees.sort();
        let mut expected = vec![
            TreeId::from(params.settings_root.id),
            TreeId::from(params.acl_root.id),
        ];
        expected.sort();
        assert_eq!(trees, expected);
        assert!(store.has_change(&params.settings_root.id).await.unwrap());
        assert!(store.has_change(&params.acl_root.id).await.unwrap());

        // Double-create fails and leaves the first space intact.
        assert_matches!(
            store.create_space(&params).await,
            Err(StoreError::SpaceExists)
        );
        assert_eq!(store.space_ids().await.unwrap(), vec![params.space_id]);
    }

    #[tokio::test]
    async fn flags_and_digests() {
        let store = SpaceStore::temporary().await;
        let params = space_params("flags");
        store.create_space(&params).await.unwrap();

        assert!(!store.is_space_created(&params.space_id).await.unwrap());
        store.mark_space_created(&params.space_id).await.unwrap();
        assert!(store.is_space_created(&params.space_id).await.unwrap());

        store.set_hash(&params.space_id, [7; 32]).await.unwrap();
        store.set_old_hash(&params.space_id, [9; 32]).await.unwrap();
        let record = store.load_space(&params.space_id).await.unwrap();
        assert_eq!(record.hash, Some([7; 32]));
        assert_eq!(record.old_hash, Some([9; 32]));

        let missing = SpaceId::derive(b"missing");
        assert_matches!(
            store.mark_space_created(&missing).await,
            Err(StoreError::SpaceNotFound)
        );
        assert_matches!(
            store.is_space_deleted(&missing).await,
            Err(StoreError::SpaceNotFound)
        );
    }

    #[tokio::test]
    async fn delete_space_tombstones() {
        let store = SpaceStore::temporary().await;
        let params = space_params("doomed");
        store.create_space(&params).await.unwrap();
        let object_id = ObjectId::derive(b"profile");
        store
            .upsert_bind(&object_id, &params.space_id)
            .await
            .unwrap();

        store.delete_space(&params.space_id).await.unwrap();

        // Rows are gone, only the tombstoned space row remains.
        assert!(store.tree_ids(&params.space_id).await.unwrap().is_empty());
        assert!(!store.has_change(&params.settings_root.id).await.unwrap());
        assert_matches!(
            store.bind_space(&object_id).await,
            Err(StoreError::BindNotFound)
        );
        assert!(store.is_space_deleted(&params.space_id).await.unwrap());
        assert_eq!(
            store.load_space(&params.space_id).await.unwrap().header,
            params.header
        );
    }

    #[tokio::test]
    async fn storage_handle_holds_the_lock() {
        let store = SpaceStore::temporary().await;
        let params = space_params("locked");
        store.create_space(&params).await.unwrap();

        let ctx = CancellationToken::new();
        let storage = store
            .wait_space_storage(&ctx, params.space_id)
            .await
            .unwrap();
        assert_eq!(storage.space_id(), params.space_id);
        assert_eq!(storage.record().await.unwrap().id, params.space_id);

        assert_matches!(
            store.try_lock_space(params.space_id),
            Err(StoreError::Lock(LockError::Locked))
        );

        drop(storage);
        assert!(store.try_lock_space(params.space_id).is_ok());
    }
}
