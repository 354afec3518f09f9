// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tree and change rows.
//!
//! A tree row holds the current heads of one change tree, the change rows
//! hold the raw signed bytes. Change insertion is idempotent on the change
//! id so replaying a sync never fails, and per-tree head updates go through
//! a single atomic statement.
use hearth_core::cbor::{decode_cbor, encode_cbor};
use hearth_core::ids::{ChangeId, SpaceId, TreeId};
use sqlx::{FromRow, query, query_as, query_scalar};

use crate::sqlite::{RowDecodeError, SpaceStore, StoreError};

/// What kind of structure a tree row backs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TreeKind {
    /// Regular object change tree.
    Tree,

    /// Totally ordered log, used for the access-control list.
    List,

    /// The space settings tree.
    Settings,
}

impl TreeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::List => "list",
            Self::Settings => "settings",
        }
    }

    fn from_label(label: &str) -> Result<Self, RowDecodeError> {
        match label {
            "tree" => Ok(Self::Tree),
            "list" => Ok(Self::List),
            "settings" => Ok(Self::Settings),
            other => Err(RowDecodeError::UnknownLabel(other.to_string())),
        }
    }
}

/// Deletion state of a tree, `None` while the tree is live.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TreeDeleteStatus {
    /// Deletion was requested but the rows are still present.
    Queued,

    /// The tree was deleted, only the tombstone row remains.
    Deleted,
}

impl TreeDeleteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Deleted => "deleted",
        }
    }

    fn from_label(label: &str) -> Result<Self, RowDecodeError> {
        match label {
            "queued" => Ok(Self::Queued),
            "deleted" => Ok(Self::Deleted),
            other => Err(RowDecodeError::UnknownLabel(other.to_string())),
        }
    }
}

/// A single signed change as it is stored, identified by the hash of its
/// bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawChange {
    pub id: ChangeId,
    pub bytes: Vec<u8>,
}

impl RawChange {
    /// Wraps change bytes, deriving the id from them.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            id: ChangeId::derive(&bytes),
            bytes,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CreateTreeParams {
    pub space_id: SpaceId,
    pub tree_id: TreeId,
    pub kind: TreeKind,
    pub root: RawChange,
}

/// One tree row as loaded from the store.
#[derive(Clone, Debug)]
pub struct TreeRecord {
    pub id: TreeId,
    pub space_id: SpaceId,
    pub kind: TreeKind,
    pub heads: Vec<ChangeId>,
    pub delete_status: Option<TreeDeleteStatus>,
}

#[derive(Debug, FromRow)]
struct TreeRow {
    id: String,
    space_id: String,
    r#type: String,
    heads: Vec<u8>,
    delete_status: Option<String>,
}

impl TryFrom<TreeRow> for TreeRecord {
    type Error = StoreError;

    fn try_from(row: TreeRow) -> Result<Self, Self::Error> {
        Ok(TreeRecord {
            id: row
                .id
                .parse()
                .map_err(|err: hearth_core::ids::IdError| {
                    StoreError::Decode("tree id".into(), err.into())
                })?,
            space_id: row
                .space_id
                .parse()
                .map_err(|err: hearth_core::ids::IdError| {
                    StoreError::Decode("space id".into(), err.into())
                })?,
            kind: TreeKind::from_label(&row.r#type)
                .map_err(|err| StoreError::Decode("tree type".into(), err))?,
            heads: decode_heads(&row.heads)?,
            delete_status: row
                .delete_status
                .as_deref()
                .map(TreeDeleteStatus::from_label)
                .transpose()
                .map_err(|err| StoreError::Decode("delete status".into(), err))?,
        })
    }
}

fn encode_heads(heads: &[ChangeId]) -> Result<Vec<u8>, StoreError> {
    encode_cbor(&heads).map_err(|err| StoreError::Encode("heads".into(), err))
}

fn decode_heads(bytes: &[u8]) -> Result<Vec<ChangeId>, StoreError> {
    decode_cbor(bytes).map_err(|err| StoreError::Decode("heads".into(), RowDecodeError::Cbor(err)))
}

impl SpaceStore {
    /// Creates a tree together with its root change in one transaction.
    ///
    /// Fails with `TreeExists` when a tree row with this id is already
    /// present.
    pub async fn create_tree(&self, params: &CreateTreeParams) -> Result<(), StoreError> {
        let heads = encode_heads(&[params.root.id])?;
        self.with_tx(async |tx| {
            let result = query(
                "INSERT INTO trees (id, space_id, type, heads) VALUES (?, ?, ?, ?)",
            )
            .bind(params.tree_id.to_hex())
            .bind(params.space_id.to_hex())
            .bind(params.kind.as_str())
            .bind(&heads)
            .execute(&mut **tx)
            .await;
            match result {
                Ok(_) => (),
                Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                    return Err(StoreError::TreeExists);
                }
                Err(err) => return Err(err.into()),
            }

            query("INSERT OR IGNORE INTO changes (id, space_id, tree_id, data) VALUES (?, ?, ?, ?)")
                .bind(params.root.id.to_hex())
                .bind(params.space_id.to_hex())
                .bind(params.tree_id.to_hex())
                .bind(&params.root.bytes)
                .execute(&mut **tx)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn load_tree(&self, id: &TreeId) -> Result<TreeRecord, StoreError> {
        let row = self
            .execute(async |pool| {
                Ok(query_as::<_, TreeRow>(
                    "SELECT id, space_id, type, heads, delete_status FROM trees WHERE id = ?",
                )
                .bind(id.to_hex())
                .fetch_optional(pool)
                .await?)
            })
            .await?;
        row.ok_or(StoreError::TreeNotFound)?.try_into()
    }

    /// Ids of all trees of a space.
    pub async fn tree_ids(&self, space_id: &SpaceId) -> Result<Vec<TreeId>, StoreError> {
        let ids: Vec<String> = self
            .execute(async |pool| {
                Ok(
                    query_scalar("SELECT id FROM trees WHERE space_id = ? ORDER BY id")
                        .bind(space_id.to_hex())
                        .fetch_all(pool)
                        .await?,
                )
            })
            .await?;
        ids.into_iter()
            .map(|id| {
                id.parse().map_err(|err: hearth_core::ids::IdError| {
                    StoreError::Decode("tree id".into(), err.into())
                })
            })
            .collect()
    }

    pub async fn has_tree(&self, id: &TreeId) -> Result<bool, StoreError> {
        let row: Option<i64> = self
            .execute(async |pool| {
                Ok(query_scalar("SELECT 1 FROM trees WHERE id = ?")
                    .bind(id.to_hex())
                    .fetch_optional(pool)
                    .await?)
            })
            .await?;
        Ok(row.is_some())
    }

    /// Root change of a tree. Trees are addressed by their root, so this
    /// is a change look-up by the tree id.
    pub async fn tree_root(&self, id: &TreeId) -> Result<RawChange, StoreError> {
        let root = id.root_change();
        let bytes = self.change_bytes(&root).await?;
        Ok(RawChange { id: root, bytes })
    }

    pub async fn heads(&self, id: &TreeId) -> Result<Vec<ChangeId>, StoreError> {
        Ok(self.load_tree(id).await?.heads)
    }

    /// Replaces the heads of a tree in one atomic statement.
    pub async fn set_heads(&self, id: &TreeId, heads: &[ChangeId]) -> Result<(), StoreError> {
        let encoded = encode_heads(heads)?;
        let result = self
            .execute(async |pool| {
                Ok(query("UPDATE trees SET heads = ? WHERE id = ?")
                    .bind(&encoded)
                    .bind(id.to_hex())
                    .execute(pool)
                    .await?)
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TreeNotFound);
        }
        Ok(())
    }

    pub async fn set_tree_delete_status(
        &self,
        id: &TreeId,
        status: Option<TreeDeleteStatus>,
    ) -> Result<(), StoreError> {
        let result = self
            .execute(async |pool| {
                Ok(query("UPDATE trees SET delete_status = ? WHERE id = ?")
                    .bind(status.map(|status| status.as_str()))
                    .bind(id.to_hex())
                    .execute(pool)
                    .await?)
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TreeNotFound);
        }
        Ok(())
    }

    /// Removes the tree row and all its change rows in one transaction.
    pub async fn delete_tree(&self, id: &TreeId) -> Result<(), StoreError> {
        self.with_tx(async |tx| {
            query("DELETE FROM changes WHERE tree_id = ?")
                .bind(id.to_hex())
                .execute(&mut **tx)
                .await?;
            query("DELETE FROM trees WHERE id = ?")
                .bind(id.to_hex())
                .execute(&mut **tx)
                .await?;
            Ok(())
        })
        .await
    }

    /// Stores a change. Inserting the same change twice is not an error,
    /// the second write is ignored. Returns whether the row was new.
    pub async fn add_change(
        &self,
        space_id: &SpaceId,
        tree_id: &TreeId,
        change: &RawChange,
    ) -> Result<bool, StoreError> {
        let result = self
            .execute(async |pool| {
                Ok(query(
                    "INSERT OR IGNORE INTO changes (id, space_id, tree_id, data) VALUES (?, ?, ?, ?)",
                )
                .bind(change.id.to_hex())
                .bind(space_id.to_hex())
                .bind(tree_id.to_hex())
                .bind(&change.bytes)
                .execute(pool)
                .await?)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn has_change(&self, id: &ChangeId) -> Result<bool, StoreError> {
        let row: Option<i64> = self
            .execute(async |pool| {
                Ok(query_scalar("SELECT 1 FROM changes WHERE id = ?")
                    .bind(id.to_hex())
                    .fetch_optional(pool)
                    .await?)
            })
            .await?;
        Ok(row.is_some())
    }

    pub async fn change_bytes(&self, id: &ChangeId) -> Result<Vec<u8>, StoreError> {
        let bytes: Option<Vec<u8>> = self
            .execute(async |pool| {
                Ok(query_scalar("SELECT data FROM changes WHERE id = ?")
                    .bind(id.to_hex())
                    .fetch_optional(pool)
                    .await?)
            })
            .await?;
        bytes.ok_or(StoreError::ChangeNotFound)
    }

    /// All change ids of a tree, sorted by id. The deterministic order
    /// makes byte-level store comparisons possible.
    pub async fn change_ids_sorted(&self, tree_id: &TreeId) -> Result<Vec<ChangeId>, StoreError> {
        let ids: Vec<String> = self
            .execute(async |pool| {
                Ok(
                    query_scalar("SELECT id FROM changes WHERE tree_id = ? ORDER BY id")
                        .bind(tree_id.to_hex())
                        .fetch_all(pool)
                        .await?,
                )
            })
            .await?;
        ids.into_iter()
            .map(|id| {
                id.parse().map_err(|err: hearth_core::ids::IdError| {
                    StoreError::Decode("change id".into(), err.into())
                })
            })
            .collect()
    }
}
