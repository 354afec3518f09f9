// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite pool, serialized transactions and store lifecycle.
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hearth_core::cbor::{DecodeError, EncodeError};
use hearth_core::ids::IdError;
use sqlx::migrate::{MigrateDatabase, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, migrate, query_as};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lock::{LockError, SpaceLocks};

/// Connections pooled per store, roughly four readers and one writer.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How often the WAL checkpoint task wakes up.
pub const DEFAULT_CHECKPOINT_PERIOD: Duration = Duration::from_secs(10);

/// Checkpoints are skipped while the WAL holds fewer frames than this.
const CHECKPOINT_MIN_FRAMES: i64 = 64;

/// Create SQLite database if it doesn't already exist.
pub async fn create_database(url: &str) -> Result<(), StoreError> {
    if !Sqlite::database_exists(url).await? {
        Sqlite::create_database(url).await?
    }
    Ok(())
}

/// Get migrations from folder without running them.
pub fn migrations() -> Migrator {
    migrate!()
}

/// Run any pending database migrations from inside the application.
pub async fn run_pending_migrations(pool: &sqlx::SqlitePool) -> Result<(), StoreError> {
    migrations().run(pool).await?;
    Ok(())
}

#[derive(Debug)]
pub struct SpaceStoreBuilder {
    url: String,
    max_connections: u32,
    run_migrations: bool,
    create_database: bool,
    checkpoint_period: Option<Duration>,
}

impl Default for SpaceStoreBuilder {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            run_migrations: true,
            create_database: true,
            checkpoint_period: Some(DEFAULT_CHECKPOINT_PERIOD),
        }
    }
}

impl SpaceStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, feature = "test_utils"))]
    pub fn random_memory_url(mut self) -> Self {
        // Combining Rust tests with in-memory databases can lead to unsound
        // behaviour, this "workaround" assigns every temporary database a
        // different, random name and keeps them isolated from other tests.
        //
        // See related issue: https://github.com/launchbadge/sqlx/issues/2510
        self.url = format!(
            "sqlite://dbmem{}?mode=memory&cache=private",
            rand::random::<u32>()
        );
        self
    }

    pub fn database_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn create_database(mut self, create_database: bool) -> Self {
        self.create_database = create_database;
        self
    }

    pub fn run_default_migrations(mut self, run_migrations: bool) -> Self {
        self.run_migrations = run_migrations;
        self
    }

    /// How often the WAL is checkpointed, `None` disables the task.
    pub fn checkpoint_period(mut self, period: Option<Duration>) -> Self {
        self.checkpoint_period = period;
        self
    }

    pub async fn build(self) -> Result<SpaceStore, StoreError> {
        if self.create_database {
            create_database(&self.url).await?;
        }

        let in_memory = self.url.contains(":memory:") || self.url.contains("mode=memory");
        let mut options =
            SqliteConnectOptions::from_str(&self.url)?.busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool: sqlx::SqlitePool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await?;

        if self.run_migrations {
            run_pending_migrations(&pool).await?;
        }

        let store = SpaceStore::new(pool);
        if !in_memory && let Some(period) = self.checkpoint_period {
            store.spawn_checkpoint_task(period).await;
        }
        Ok(store)
    }
}

pub type SqlTransaction<'a> = sqlx::Transaction<'a, Sqlite>;

/// SQLite database holding every space this node replicates.
///
/// The struct can be cloned and used in multiple places, every clone
/// re-uses the same connection pool. SQLite strictly serializes write
/// transactions, which is made explicit through a transaction permit:
/// processes acquire the permit with [`Transaction::begin`], do their
/// writes and release it with commit or rollback. Read-only queries skip
/// the permit and go through [`SpaceStore::execute`] directly.
///
/// [`Transaction::begin`]: crate::traits::Transaction::begin
#[derive(Clone, Debug)]
pub struct SpaceStore {
    tx: Arc<Mutex<Option<SqlTransaction<'static>>>>,
    pool: sqlx::SqlitePool,
    semaphore: Arc<Semaphore>,
    pub(crate) locks: SpaceLocks,
    shutdown: CancellationToken,
    checkpoint_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SpaceStore {
    pub(crate) fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            tx: Arc::default(),
            pool,
            // SQLite only ever allows one write transaction at a time, the
            // semaphore makes this explicit right from the beginning.
            semaphore: Arc::new(Semaphore::new(1)),
            locks: SpaceLocks::new(),
            shutdown: CancellationToken::new(),
            checkpoint_task: Arc::default(),
        }
    }

    /// Shortcut building an in-memory store with a randomised name for
    /// testing purposes.
    #[cfg(any(test, feature = "test_utils"))]
    pub async fn temporary() -> Self {
        SpaceStoreBuilder::new()
            .random_memory_url()
            .max_connections(1)
            .build()
            .await
            .expect("migrations succeeded")
    }

    async fn spawn_checkpoint_task(&self, period: Duration) {
        let pool = self.pool.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => (),
                }

                // Only truncate the WAL once it accumulated enough frames.
                let passive: Result<(i64, i64, i64), sqlx::Error> =
                    query_as("PRAGMA wal_checkpoint(PASSIVE)")
                        .fetch_one(&pool)
                        .await;
                match passive {
                    Ok((_busy, frames, _checkpointed)) if frames >= CHECKPOINT_MIN_FRAMES => {
                        if let Err(err) = query_as::<_, (i64, i64, i64)>(
                            "PRAGMA wal_checkpoint(TRUNCATE)",
                        )
                        .fetch_one(&pool)
                        .await
                        {
                            warn!("wal checkpoint failed: {err}");
                        } else {
                            debug!(frames, "truncated wal");
                        }
                    }
                    Ok(_) => (),
                    Err(err) => warn!("wal checkpoint probe failed: {err}"),
                }
            }
        });
        self.checkpoint_task.lock().await.replace(handle);
    }

    /// Execute SQL query within the currently held transaction.
    ///
    /// This method will return an error when no transaction is currently
    /// given. Make sure to call `begin` before.
    pub async fn tx<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: AsyncFnOnce(&mut SqlTransaction<'static>) -> Result<R, StoreError>,
    {
        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(StoreError::TransactionMissing)?;

        f(tx).await
    }

    /// Execute SQL query directly on the pool.
    pub async fn execute<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: AsyncFnOnce(&sqlx::SqlitePool) -> Result<R, StoreError>,
    {
        f(&self.pool).await
    }

    /// Runs `f` inside its own transaction, committing on success and
    /// rolling back on error.
    pub(crate) async fn with_tx<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: AsyncFnOnce(&mut SqlTransaction<'static>) -> Result<R, StoreError>,
    {
        use crate::traits::Transaction as _;

        let permit = self.begin().await?;
        match self.tx(f).await {
            Ok(value) => {
                self.commit(permit).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback(permit).await {
                    warn!("transaction rollback failed: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    /// Stops the checkpoint task and closes all pooled connections.
    pub async fn close(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.checkpoint_task.lock().await.take()
            && let Err(err) = handle.await
        {
            warn!("checkpoint task panicked: {err}");
        }
        self.pool.close().await;
    }
}

impl crate::traits::Transaction for SpaceStore {
    type Error = StoreError;

    type Permit = TransactionPermit;

    async fn begin(&self) -> Result<TransactionPermit, StoreError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("if semaphore is closed then the whole struct is gone as well");

        let mut tx_ref = self.tx.lock().await;
        assert!(
            tx_ref.is_none(),
            "can't have an already existing transaction after a just-acquired permit"
        );

        let tx = self.pool.begin().await?;
        tx_ref.replace(tx);

        Ok(TransactionPermit(permit))
    }

    async fn rollback(&self, permit: TransactionPermit) -> Result<(), StoreError> {
        let Some(tx) = self.tx.lock().await.take() else {
            panic!("can't have no transaction without dropping permit first")
        };

        let result = tx.rollback().await.map_err(StoreError::Sqlite);
        drop(permit);
        result
    }

    async fn commit(&self, permit: TransactionPermit) -> Result<(), StoreError> {
        let Some(tx) = self.tx.lock().await.take() else {
            panic!("can't have no transaction without dropping permit first")
        };

        let result = tx.commit().await.map_err(StoreError::Sqlite);
        drop(permit);
        result
    }
}

#[allow(unused)]
#[derive(Debug)]
pub struct TransactionPermit(OwnedSemaphorePermit);

#[derive(Debug, Error)]
pub enum StoreError {
    /// This is a critical error as it indicates that something is wrong with
    /// the usage of this API: queries using transactions can only ever occur
    /// if a transaction was started before.
    #[error("tried to interact with inexistant transaction")]
    TransactionMissing,

    #[error("space already exists")]
    SpaceExists,

    #[error("space not found")]
    SpaceNotFound,

    #[error("tree already exists")]
    TreeExists,

    #[error("tree not found")]
    TreeNotFound,

    #[error("change not found")]
    ChangeNotFound,

    #[error("object is not bound to any space")]
    BindNotFound,

    /// Another process holds exclusive access to the space.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// SQLite database and connection error.
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),

    /// SQL table schema migration error.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// An I/O error occurred while encoding bytes before storing them into
    /// the database. This is a critical error.
    #[error("failed encoding '{0}' value before storing to database: {1}")]
    Encode(String, EncodeError),

    /// Invalid, corrupted data was found in the database. This is a critical
    /// error.
    #[error("could not decode corrupted '{0}' value from database: {1}")]
    Decode(String, RowDecodeError),
}

#[derive(Debug, Error)]
pub enum RowDecodeError {
    #[error(transparent)]
    Cbor(#[from] DecodeError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error("unknown enum label '{0}'")]
    UnknownLabel(String),

    #[error("invalid blob length {0}")]
    InvalidBlobLength(usize),
}

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use sqlx::{Executor, query, query_as};
    use tokio::pin;

    use crate::sqlite::{SpaceStoreBuilder, StoreError};
    use crate::traits::Transaction;

    fn noop_context() -> std::task::Context<'static> {
        std::task::Context::from_waker(std::task::Waker::noop())
    }

    #[tokio::test]
    async fn transaction_provider() {
        let store = SpaceStoreBuilder::new()
            .run_default_migrations(false)
            .random_memory_url()
            .build()
            .await
            .unwrap();

        // Executing with an in-existant transaction should throw error.
        assert!(matches!(
            store.tx(async |_| Ok(())).await,
            Err(StoreError::TransactionMissing)
        ));

        // Starting a new transaction should work.
        let permit = store.begin().await.expect("no error");

        // .. attempting to start a second one should make us wait.
        assert!(matches!(
            {
                let fut = store.begin();
                let mut cx = noop_context();
                pin!(fut);
                fut.poll(&mut cx)
            },
            Poll::Pending
        ));

        // Using the transaction should work without failure.
        assert!(store.tx(async |_| Ok(())).await.is_ok());

        // Committing should work as well.
        assert!(store.commit(permit).await.is_ok());

        // .. and now running a transaction should fail again.
        assert!(matches!(
            store.tx(async |_| Ok(())).await,
            Err(StoreError::TransactionMissing)
        ));
    }

    #[tokio::test]
    async fn rolled_back_writes_are_not_visible() {
        let store = SpaceStoreBuilder::new()
            .run_default_migrations(false)
            .max_connections(1)
            .random_memory_url()
            .build()
            .await
            .unwrap();

        store
            .execute(async |pool| {
                pool.execute("CREATE TABLE test(x INTEGER)").await?;
                Ok(())
            })
            .await
            .unwrap();

        let permit = store.begin().await.unwrap();
        store
            .tx(async |tx| {
                query("INSERT INTO test (x) VALUES (5)")
                    .execute(&mut **tx)
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
        store.rollback(permit).await.unwrap();

        let count = store
            .execute(async |pool| {
                let row: (i64,) = query_as("SELECT COUNT(*) FROM test")
                    .fetch_one(pool)
                    .await?;
                Ok(row.0)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
