// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot import of a legacy space store.
//!
//! The migrator walks every space and every tree of a legacy store (behind
//! [`LegacySource`]), copies the rows into the SQLite store and optionally
//! verifies the result. Change copying fans out over a fixed pool of worker
//! tasks fed by a task channel; closing the channel stops the pool.
//!
//! Finishing a migration renames the legacy store file to
//! `space_store_migrated.<ext>` and removes the auxiliary CRDT index
//! directory, so a re-run finds an already-migrated store and turns into a
//! verification pass.
use std::path::PathBuf;
use std::sync::Arc;

use hearth_core::ids::{ChangeId, SpaceId, TreeId};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::sqlite::{SpaceStore, StoreError};
use crate::spaces::CreateSpaceParams;
use crate::trees::{CreateTreeParams, RawChange, TreeDeleteStatus, TreeKind};

/// Read access to a legacy space store.
///
/// Implementations are expected to be cheap to query repeatedly, the
/// migrator walks spaces one at a time and trees within them.
pub trait LegacySource {
    type Error: std::error::Error;

    fn space_ids(&self) -> Result<Vec<SpaceId>, Self::Error>;

    fn load_space(&self, id: &SpaceId) -> Result<LegacySpace, Self::Error>;

    fn trees(&self, space_id: &SpaceId) -> Result<Vec<LegacyTree>, Self::Error>;

    /// All changes of one tree, including the root change.
    fn changes(&self, space_id: &SpaceId, tree_id: &TreeId)
    -> Result<Vec<RawChange>, Self::Error>;
}

/// One space as read from the legacy store.
#[derive(Clone, Debug)]
pub struct LegacySpace {
    pub space_id: SpaceId,
    pub header: Vec<u8>,
    pub settings_root: RawChange,
    pub acl_root: RawChange,
    pub is_created: bool,
    pub is_deleted: bool,
}

/// One tree as read from the legacy store.
#[derive(Clone, Debug)]
pub struct LegacyTree {
    pub tree_id: TreeId,
    pub kind: TreeKind,
    pub root: RawChange,
    pub heads: Vec<ChangeId>,
    pub delete_status: Option<TreeDeleteStatus>,
}

/// On-disk artefacts of the legacy store, cleaned up after migration.
#[derive(Clone, Debug)]
pub struct LegacyPaths {
    /// The legacy store file, renamed to `space_store_migrated.<ext>` once
    /// the migration went through.
    pub store_file: PathBuf,

    /// Auxiliary CRDT index directory, removed after migration.
    pub crdt_index_dir: Option<PathBuf>,
}

/// How thoroughly a migrated space is checked against the legacy store.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VerifyMode {
    /// Every legacy change id must exist in the new store.
    Fast,

    /// Change id sets must match exactly and every change must be
    /// byte-equal.
    Full,
}

#[derive(Clone, Debug)]
pub struct MigratorConfig {
    /// Size of the change-copy worker pool.
    pub workers: usize,

    /// Verification run after copying, `None` skips it. Already-migrated
    /// spaces are always fast-verified regardless.
    pub verify: Option<VerifyMode>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            verify: Some(VerifyMode::Fast),
        }
    }
}

/// Tally of one migration run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub spaces_migrated: usize,
    pub spaces_skipped: usize,
    pub trees_migrated: usize,
    pub changes_copied: usize,
}

#[derive(Debug)]
pub struct Migrator {
    store: SpaceStore,
    config: MigratorConfig,
}

struct CopyTask {
    space_id: SpaceId,
    tree_id: TreeId,
    change: RawChange,
}

impl Migrator {
    pub fn new(store: SpaceStore, config: MigratorConfig) -> Self {
        Self { store, config }
    }

    /// Runs the migration to completion and finalizes the legacy files.
    ///
    /// Spaces which already exist in the new store are not copied again,
    /// they are fast-verified and counted as skipped. This makes re-running
    /// an interrupted or repeated migration a no-op.
    pub async fn run<S: LegacySource>(
        &self,
        ctx: &CancellationToken,
        source: &S,
        paths: &LegacyPaths,
    ) -> Result<MigrationReport, MigrateError> {
        let mut report = MigrationReport::default();

        for space_id in source.space_ids().map_err(MigrateError::source)? {
            if ctx.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            if self.store.space_exists(&space_id).await? {
                debug!(space = %space_id, "space already migrated, verifying");
                self.verify_space(source, &space_id, VerifyMode::Fast)
                    .await?;
                report.spaces_skipped += 1;
                continue;
            }

            self.migrate_space(ctx, source, &space_id, &mut report)
                .await?;
            if let Some(mode) = self.config.verify {
                self.verify_space(source, &space_id, mode).await?;
            }
            report.spaces_migrated += 1;
        }

        self.finalize(paths).await?;
        info!(
            migrated = report.spaces_migrated,
            skipped = report.spaces_skipped,
            changes = report.changes_copied,
            "legacy store migration finished"
        );
        Ok(report)
    }

    async fn migrate_space<S: LegacySource>(
        &self,
        ctx: &CancellationToken,
        source: &S,
        space_id: &SpaceId,
        report: &mut MigrationReport,
    ) -> Result<(), MigrateError> {
        let space = source.load_space(space_id).map_err(MigrateError::source)?;
        self.store
            .create_space(&CreateSpaceParams {
                space_id: space.space_id,
                header: space.header.clone(),
                settings_root: space.settings_root.clone(),
                acl_root: space.acl_root.clone(),
            })
            .await?;

        let trees = source.trees(space_id).map_err(MigrateError::source)?;

        // Fan the change rows out over the worker pool.
        let (task_tx, task_rx) = mpsc::channel::<CopyTask>(self.config.workers.max(1) * 2);
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Result<bool, StoreError>>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let mut workers = Vec::with_capacity(self.config.workers.max(1));
        for _ in 0..self.config.workers.max(1) {
            let store = self.store.clone();
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let task = { task_rx.lock().await.recv().await };
                    let Some(task) = task else {
                        break;
                    };
                    let result = store
                        .add_change(&task.space_id, &task.tree_id, &task.change)
                        .await;
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut send_error = None;
        'outer: for tree in &trees {
            // The settings tree and the access-control list were already
            // created alongside the space row.
            if tree.kind == TreeKind::Tree {
                self.store
                    .create_tree(&CreateTreeParams {
                        space_id: *space_id,
                        tree_id: tree.tree_id,
                        kind: tree.kind,
                        root: tree.root.clone(),
                    })
                    .await?;
            }
            self.store.set_heads(&tree.tree_id, &tree.heads).await?;
            if tree.delete_status.is_some() {
                self.store
                    .set_tree_delete_status(&tree.tree_id, tree.delete_status)
                    .await?;
            }
            report.trees_migrated += 1;

            for change in source
                .changes(space_id, &tree.tree_id)
                .map_err(MigrateError::source)?
            {
                let task = CopyTask {
                    space_id: *space_id,
                    tree_id: tree.tree_id,
                    change,
                };
                tokio::select! {
                    _ = ctx.cancelled() => {
                        send_error = Some(MigrateError::Cancelled);
                        break 'outer;
                    }
                    sent = task_tx.send(task) => {
                        if sent.is_err() {
                            // A worker failing to forward its result is the
                            // only way the channel closes early.
                            break 'outer;
                        }
                    }
                }
            }
        }

        // Closing the task channel stops the pool.
        drop(task_tx);
        let mut copy_error = None;
        while let Some(result) = result_rx.recv().await {
            match result {
                Ok(true) => report.changes_copied += 1,
                Ok(false) => (),
                Err(err) if copy_error.is_none() => copy_error = Some(err),
                Err(_) => (),
            }
        }
        for worker in workers {
            let _ = worker.await;
        }

        if let Some(err) = send_error {
            return Err(err);
        }
        if let Some(err) = copy_error {
            return Err(err.into());
        }

        if space.is_created {
            self.store.mark_space_created(space_id).await?;
        }
        if space.is_deleted {
            self.store.mark_space_deleted(space_id).await?;
        }
        Ok(())
    }

    async fn verify_space<S: LegacySource>(
        &self,
        source: &S,
        space_id: &SpaceId,
        mode: VerifyMode,
    ) -> Result<(), MigrateError> {
        for tree in source.trees(space_id).map_err(MigrateError::source)? {
            let mut legacy = source
                .changes(space_id, &tree.tree_id)
                .map_err(MigrateError::source)?;

            match mode {
                VerifyMode::Fast => {
                    for change in &legacy {
                        if !self.store.has_change(&change.id).await? {
                            return Err(MigrateError::VerifyFailed {
                                space_id: *space_id,
                                reason: format!("change {} is missing", change.id),
                            });
                        }
                    }
                }
                VerifyMode::Full => {
                    legacy.sort_by_key(|change| change.id);
                    let migrated = self.store.change_ids_sorted(&tree.tree_id).await?;
                    let legacy_ids: Vec<ChangeId> =
                        legacy.iter().map(|change| change.id).collect();
                    if migrated != legacy_ids {
                        return Err(MigrateError::VerifyFailed {
                            space_id: *space_id,
                            reason: format!("change set of tree {} differs", tree.tree_id),
                        });
                    }
                    for change in &legacy {
                        if self.store.change_bytes(&change.id).await? != change.bytes {
                            return Err(MigrateError::VerifyFailed {
                                space_id: *space_id,
                                reason: format!("change {} differs", change.id),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Renames the legacy store file and removes the CRDT index directory.
    /// Already-cleaned paths are skipped silently.
    async fn finalize(&self, paths: &LegacyPaths) -> Result<(), MigrateError> {
        if tokio::fs::try_exists(&paths.store_file).await? {
            let extension = paths
                .store_file
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_else(|| "db".into());
            let target = paths
                .store_file
                .with_file_name(format!("space_store_migrated.{extension}"));
            tokio::fs::rename(&paths.store_file, &target).await?;
            debug!(target = %target.display(), "renamed legacy store file");
        }

        if let Some(dir) = &paths.crdt_index_dir
            && tokio::fs::try_exists(dir).await?
        {
            tokio::fs::remove_dir_all(dir).await?;
            debug!(dir = %dir.display(), "removed crdt index directory");
        }
        Ok(())
    }
}

/// Errors which can occur while migrating a legacy store.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The legacy store could not be read.
    #[error("legacy source: {0}")]
    Source(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A migrated space does not match the legacy store.
    #[error("verification of space {space_id} failed: {reason}")]
    VerifyFailed { space_id: SpaceId, reason: String },

    #[error("migration cancelled")]
    Cancelled,
}

impl MigrateError {
    fn source<E: std::error::Error>(err: E) -> Self {
        Self::Source(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::path::PathBuf;

    use assert_matches::assert_matches;
    use hearth_core::ids::{SpaceId, TreeId};
    use tokio_util::sync::CancellationToken;

    use crate::sqlite::SpaceStore;
    use crate::trees::{RawChange, TreeKind};

    use super::{
        LegacyPaths, LegacySource, LegacySpace, LegacyTree, MigrateError, Migrator,
        MigratorConfig, VerifyMode,
    };

    #[derive(Default)]
    struct FakeLegacy {
        spaces: Vec<LegacySpace>,
        trees: HashMap<SpaceId, Vec<LegacyTree>>,
        changes: HashMap<TreeId, Vec<RawChange>>,
    }

    impl FakeLegacy {
        fn with_space(seed: &str, extra_changes: usize) -> Self {
            let header = format!("header of {seed}").into_bytes();
            let settings_root = RawChange::new(format!("settings of {seed}").into_bytes());
            let acl_root = RawChange::new(format!("acl of {seed}").into_bytes());
            let space = LegacySpace {
                space_id: SpaceId::derive(&header),
                header,
                settings_root: settings_root.clone(),
                acl_root: acl_root.clone(),
                is_created: true,
                is_deleted: false,
            };

            let doc_root = RawChange::new(format!("doc of {seed}").into_bytes());
            let doc_id = TreeId::from(doc_root.id);
            let mut doc_changes = vec![doc_root.clone()];
            for n in 0..extra_changes {
                doc_changes.push(RawChange::new(format!("{seed} change {n}").into_bytes()));
            }
            let heads = vec![doc_changes.last().unwrap().id];

            let mut legacy = Self::default();
            legacy.trees.insert(
                space.space_id,
                vec![
                    LegacyTree {
                        tree_id: TreeId::from(settings_root.id),
                        kind: TreeKind::Settings,
                        root: settings_root.clone(),
                        heads: vec![settings_root.id],
                        delete_status: None,
                    },
                    LegacyTree {
                        tree_id: TreeId::from(acl_root.id),
                        kind: TreeKind::List,
                        root: acl_root.clone(),
                        heads: vec![acl_root.id],
                        delete_status: None,
                    },
                    LegacyTree {
                        tree_id: doc_id,
                        kind: TreeKind::Tree,
                        root: doc_root,
                        heads,
                        delete_status: None,
                    },
                ],
            );
            legacy
                .changes
                .insert(TreeId::from(settings_root.id), vec![settings_root]);
            legacy
                .changes
                .insert(TreeId::from(acl_root.id), vec![acl_root]);
            legacy.changes.insert(doc_id, doc_changes);
            legacy.spaces.push(space);
            legacy
        }
    }

    impl LegacySource for FakeLegacy {
        type Error = Infallible;

        fn space_ids(&self) -> Result<Vec<SpaceId>, Infallible> {
            Ok(self.spaces.iter().map(|space| space.space_id).collect())
        }

        fn load_space(&self, id: &SpaceId) -> Result<LegacySpace, Infallible> {
            Ok(self
                .spaces
                .iter()
                .find(|space| space.space_id == *id)
                .cloned()
                .unwrap())
        }

        fn trees(&self, space_id: &SpaceId) -> Result<Vec<LegacyTree>, Infallible> {
            Ok(self.trees.get(space_id).cloned().unwrap_or_default())
        }

        fn changes(
            &self,
            _space_id: &SpaceId,
            tree_id: &TreeId,
        ) -> Result<Vec<RawChange>, Infallible> {
            Ok(self.changes.get(tree_id).cloned().unwrap_or_default())
        }
    }

    fn missing_paths() -> LegacyPaths {
        LegacyPaths {
            store_file: PathBuf::from("/nonexistent/space_store.db"),
            crdt_index_dir: None,
        }
    }

    #[tokio::test]
    async fn migrates_a_space_with_full_verification() {
        let store = SpaceStore::temporary().await;
        let legacy = FakeLegacy::with_space("alpha", 8);
        let migrator = Migrator::new(
            store.clone(),
            MigratorConfig {
                workers: 2,
                verify: Some(VerifyMode::Full),
            },
        );

        let report = migrator
            .run(&CancellationToken::new(), &legacy, &missing_paths())
            .await
            .unwrap();
        assert_eq!(report.spaces_migrated, 1);
        assert_eq!(report.spaces_skipped, 0);
        assert_eq!(report.trees_migrated, 3);
        // Root changes land with their tree rows, only the 8 appended
        // changes go through the worker pool as new rows.
        assert_eq!(report.changes_copied, 8);

        let space = &legacy.spaces[0];
        assert!(store.is_space_created(&space.space_id).await.unwrap());
        assert_eq!(store.tree_ids(&space.space_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rerun_is_a_noop() {
        let store = SpaceStore::temporary().await;
        let legacy = FakeLegacy::with_space("beta", 3);
        let migrator = Migrator::new(store.clone(), MigratorConfig::default());

        let ctx = CancellationToken::new();
        migrator.run(&ctx, &legacy, &missing_paths()).await.unwrap();
        let report = migrator.run(&ctx, &legacy, &missing_paths()).await.unwrap();
        assert_eq!(report.spaces_migrated, 0);
        assert_eq!(report.spaces_skipped, 1);
        assert_eq!(report.changes_copied, 0);
    }

    #[tokio::test]
    async fn verification_catches_missing_changes() {
        let store = SpaceStore::temporary().await;
        let mut legacy = FakeLegacy::with_space("gamma", 2);
        let migrator = Migrator::new(store.clone(), MigratorConfig::default());

        let ctx = CancellationToken::new();
        migrator.run(&ctx, &legacy, &missing_paths()).await.unwrap();

        // A change the migration never saw shows up in the legacy store.
        let space_id = legacy.spaces[0].space_id;
        let doc_id = legacy.trees[&space_id]
            .iter()
            .find(|tree| tree.kind == TreeKind::Tree)
            .unwrap()
            .tree_id;
        legacy
            .changes
            .get_mut(&doc_id)
            .unwrap()
            .push(RawChange::new(b"late change".to_vec()));

        assert_matches!(
            migrator.run(&ctx, &legacy, &missing_paths()).await,
            Err(MigrateError::VerifyFailed { .. })
        );
    }

    #[tokio::test]
    async fn finalize_renames_the_legacy_file() {
        let dir = std::env::temp_dir().join(format!("hearth-migrator-{}", rand::random::<u32>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store_file = dir.join("space_store.db");
        tokio::fs::write(&store_file, b"legacy bytes").await.unwrap();
        let crdt_dir = dir.join("crdt-index");
        tokio::fs::create_dir_all(&crdt_dir).await.unwrap();

        let store = SpaceStore::temporary().await;
        let legacy = FakeLegacy::with_space("delta", 1);
        let migrator = Migrator::new(store, MigratorConfig::default());
        migrator
            .run(
                &CancellationToken::new(),
                &legacy,
                &LegacyPaths {
                    store_file: store_file.clone(),
                    crdt_index_dir: Some(crdt_dir.clone()),
                },
            )
            .await
            .unwrap();

        assert!(!tokio::fs::try_exists(&store_file).await.unwrap());
        assert!(
            tokio::fs::try_exists(dir.join("space_store_migrated.db"))
                .await
                .unwrap()
        );
        assert!(!tokio::fs::try_exists(&crdt_dir).await.unwrap());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_stops_the_run() {
        let store = SpaceStore::temporary().await;
        let legacy = FakeLegacy::with_space("epsilon", 1);
        let migrator = Migrator::new(store, MigratorConfig::default());

        let ctx = CancellationToken::new();
        ctx.cancel();
        assert_matches!(
            migrator.run(&ctx, &legacy, &missing_paths()).await,
            Err(MigrateError::Cancelled)
        );
    }
}
