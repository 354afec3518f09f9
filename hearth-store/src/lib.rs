// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for spaces.
//!
//! One embedded store per node holds every space the node replicates: the
//! space headers, the change trees, the raw change bytes and the object
//! binds. The store preserves per-tree append order, keeps change insertion
//! idempotent and scopes exclusive access per space through
//! [`SpaceStore::wait_space_storage`].
//!
//! [`migrator`] imports data from a legacy store layout into this one.
pub mod lock;
pub mod migrator;

mod binds;
mod spaces;
mod sqlite;
mod traits;
mod trees;

pub use lock::{LockError, SpaceLockGuard, SpaceLocks};
pub use migrator::{
    LegacyPaths, LegacySource, LegacySpace, LegacyTree, MigrateError, MigrationReport, Migrator,
    MigratorConfig, VerifyMode,
};
pub use spaces::{CreateSpaceParams, SpaceRecord, SpaceStorage};
pub use sqlite::{
    DEFAULT_CHECKPOINT_PERIOD, DEFAULT_MAX_CONNECTIONS, RowDecodeError, SpaceStore,
    SpaceStoreBuilder, StoreError, TransactionPermit, migrations,
};
pub use traits::Transaction;
pub use trees::{CreateTreeParams, RawChange, TreeDeleteStatus, TreeKind, TreeRecord};
