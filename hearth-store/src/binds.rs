// SPDX-License-Identifier: MIT OR Apache-2.0

//! Object-to-space binds.
//!
//! Some objects (profiles, invites) are addressed without knowing which
//! space they live in. The bind table remembers the mapping so look-ups can
//! resolve the space first.
use hearth_core::ids::{ObjectId, SpaceId};
use sqlx::{query, query_scalar};

use crate::sqlite::{SpaceStore, StoreError};

impl SpaceStore {
    /// Inserts or updates the bind of one object. Re-binding an object to
    /// another space overwrites the previous row.
    pub async fn upsert_bind(
        &self,
        object_id: &ObjectId,
        space_id: &SpaceId,
    ) -> Result<(), StoreError> {
        self.execute(async |pool| {
            query(
                "INSERT INTO binds (object_id, space_id) VALUES (?, ?) \
                 ON CONFLICT (object_id) DO UPDATE SET space_id = excluded.space_id",
            )
            .bind(object_id.to_hex())
            .bind(space_id.to_hex())
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// The space an object is bound to.
    pub async fn bind_space(&self, object_id: &ObjectId) -> Result<SpaceId, StoreError> {
        let space_id: Option<String> = self
            .execute(async |pool| {
                Ok(
                    query_scalar("SELECT space_id FROM binds WHERE object_id = ?")
                        .bind(object_id.to_hex())
                        .fetch_optional(pool)
                        .await?,
                )
            })
            .await?;
        space_id
            .ok_or(StoreError::BindNotFound)?
            .parse()
            .map_err(|err: hearth_core::ids::IdError| {
                StoreError::Decode("space id".into(), err.into())
            })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use hearth_core::ids::{ObjectId, SpaceId};

    use crate::sqlite::{SpaceStore, StoreError};

    #[tokio::test]
    async fn binds_resolve_and_rebind() {
        let store = SpaceStore::temporary().await;
        let object_id = ObjectId::derive(b"profile");
        let space_a = SpaceId::derive(b"a");
        let space_b = SpaceId::derive(b"b");

        assert_matches!(
            store.bind_space(&object_id).await,
            Err(StoreError::BindNotFound)
        );

        store.upsert_bind(&object_id, &space_a).await.unwrap();
        assert_eq!(store.bind_space(&object_id).await.unwrap(), space_a);

        // Re-binding moves the object.
        store.upsert_bind(&object_id, &space_b).await.unwrap();
        assert_eq!(store.bind_space(&object_id).await.unwrap(), space_b);
    }
}
