// SPDX-License-Identifier: MIT OR Apache-2.0

//! Object cache keeping at most one live instance per object.
//!
//! Look-ups that miss install an entry and become the single loader for
//! that object; concurrent look-ups wait on the entry's latch and share the
//! result. A periodic sweep drops objects nobody referenced for longer than
//! the TTL.
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hearth_core::ids::ObjectId;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long an unreferenced object stays resident.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// How often the sweep looks for expired objects.
pub const DEFAULT_GC_PERIOD: Duration = Duration::from_secs(60);

#[derive(Copy, Clone, Debug)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub gc_period: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            gc_period: DEFAULT_GC_PERIOD,
        }
    }
}

/// Values held by the cache. [`close`] runs when the cache evicts or
/// removes the object.
///
/// [`close`]: CacheItem::close
pub trait CacheItem: Send + Sync + 'static {
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Well-known object categories a unique key can address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SmartblockType {
    Settings,
    Profile,
    Workspace,
    Archive,
    Page,
}

impl SmartblockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Profile => "profile",
            Self::Workspace => "workspace",
            Self::Archive => "archive",
            Self::Page => "page",
        }
    }
}

/// Deterministic address of a built-in object within a space. Deriving the
/// same key always yields the same object id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    kind: SmartblockType,
    key: String,
}

impl UniqueKey {
    pub fn new(kind: SmartblockType, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn kind(&self) -> SmartblockType {
        self.kind
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId::derive(format!("{}/{}", self.kind.as_str(), self.key).as_bytes())
    }
}

/// Errors which can occur when looking up or removing cached objects.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// No stored or derivable form of the object exists.
    #[error("object not found")]
    NotFound,

    /// The object (or a derivation target) already exists. Treated as
    /// success by [`ObjectCache::derive_or_create`].
    #[error("object already exists")]
    AlreadyExists,

    /// The object is referenced or mid-load.
    #[error("object is in use")]
    Locked,

    /// The wait was cancelled before the object became available.
    #[error("object look-up cancelled")]
    Cancelled,

    /// The cache was closed, no further loads are served.
    #[error("object cache closed")]
    Closed,

    /// The injected loader failed.
    #[error("object load failed: {0}")]
    Load(String),
}

enum Slot<T> {
    Pending,
    Ready(Arc<T>),
    Failed(CacheError),
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Ready(object) => Self::Ready(object.clone()),
            Self::Failed(err) => Self::Failed(err.clone()),
        }
    }
}

struct Entry<T> {
    slot: watch::Sender<Slot<T>>,
    last_used: Mutex<Instant>,
}

impl<T> Entry<T> {
    fn new() -> Self {
        Self {
            slot: watch::Sender::new(Slot::Pending),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().expect("cache entry mutex poisoned") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .expect("cache entry mutex poisoned")
            .elapsed()
    }
}

struct State<T> {
    entries: HashMap<ObjectId, Arc<Entry<T>>>,
    closed: bool,
}

type LoadFuture<T> = Pin<Box<dyn Future<Output = Result<Arc<T>, CacheError>> + Send>>;
type Loader<T> = Arc<dyn Fn(CancellationToken, ObjectId) -> LoadFuture<T> + Send + Sync>;
type InitFuture = Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send>>;

/// Cache guaranteeing at most one live instance per object id.
pub struct ObjectCache<T> {
    state: Arc<Mutex<State<T>>>,
    loader: Loader<T>,
    shutdown: CancellationToken,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> std::fmt::Debug for ObjectCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ObjectCache").finish_non_exhaustive()
    }
}

impl<T: CacheItem> ObjectCache<T> {
    /// Creates a cache around the injected loader and starts the sweep.
    pub fn new<F, Fut>(config: CacheConfig, loader: F) -> Arc<Self>
    where
        F: Fn(CancellationToken, ObjectId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>, CacheError>> + Send + 'static,
    {
        let cache = Arc::new(Self {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                closed: false,
            })),
            loader: Arc::new(move |ctx, id| Box::pin(loader(ctx, id))),
            shutdown: CancellationToken::new(),
            gc_task: Mutex::new(None),
        });
        cache.spawn_gc_task(config);
        cache
    }

    fn spawn_gc_task(self: &Arc<Self>, config: CacheConfig) {
        let cache = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.gc_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately and would sweep nothing.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => (),
                }
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep(config.ttl).await;
            }
        });
        self.gc_task
            .lock()
            .expect("gc task mutex poisoned")
            .replace(handle);
    }

    /// Returns the live object, loading it when not resident.
    ///
    /// Concurrent callers for the same id share one loader; a caller whose
    /// token fires returns `Cancelled` without disturbing the load.
    pub async fn get(&self, ctx: &CancellationToken, id: ObjectId) -> Result<Arc<T>, CacheError> {
        self.get_or_load(ctx, id, None::<fn(ObjectId) -> InitFuture>)
            .await
    }

    /// Derives the object id from a unique key, then opens the object or
    /// creates it first. `init` runs exactly once, only when no stored form
    /// exists yet; an `AlreadyExists` failure from `init` counts as created.
    pub async fn derive_or_create<F, Fut>(
        &self,
        ctx: &CancellationToken,
        key: &UniqueKey,
        init: F,
    ) -> Result<Arc<T>, CacheError>
    where
        F: FnOnce(ObjectId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CacheError>> + Send + 'static,
    {
        let id = key.object_id();
        let mut init = Some(init);
        self.get_or_load(ctx, id, Some(move |id: ObjectId| -> InitFuture {
            let init = init.take();
            Box::pin(async move {
                match init {
                    Some(init) => match init(id).await {
                        Ok(()) | Err(CacheError::AlreadyExists) => Ok(()),
                        Err(err) => Err(err),
                    },
                    None => Err(CacheError::NotFound),
                }
            })
        }))
        .await
    }

    async fn get_or_load<I>(
        &self,
        ctx: &CancellationToken,
        id: ObjectId,
        mut init: Option<I>,
    ) -> Result<Arc<T>, CacheError>
    where
        I: FnMut(ObjectId) -> InitFuture + Send,
    {
        loop {
            let (entry, is_loader) = {
                let mut state = self.state.lock().expect("cache state mutex poisoned");
                if state.closed {
                    return Err(CacheError::Closed);
                }
                match state.entries.get(&id) {
                    Some(entry) => (entry.clone(), false),
                    None => {
                        let entry = Arc::new(Entry::new());
                        state.entries.insert(id, entry.clone());
                        (entry, true)
                    }
                }
            };

            if is_loader {
                return self.load_into(ctx, id, &entry, init.as_mut()).await;
            }

            let mut rx = entry.slot.subscribe();
            loop {
                let slot = rx.borrow_and_update().clone();
                match slot {
                    Slot::Ready(object) => {
                        // Holding the clone keeps the sweep off; when the
                        // sweep unmapped the entry first the object is
                        // already closing and the look-up starts over.
                        if !self.confirm_resident(&id, &entry) {
                            break;
                        }
                        entry.touch();
                        return Ok(object);
                    }
                    Slot::Failed(err) => return Err(err),
                    Slot::Pending => {
                        tokio::select! {
                            _ = ctx.cancelled() => return Err(CacheError::Cancelled),
                            changed = rx.changed() => {
                                if changed.is_err() {
                                    // The loader went away without settling
                                    // the latch, start over.
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn load_into<I>(
        &self,
        ctx: &CancellationToken,
        id: ObjectId,
        entry: &Arc<Entry<T>>,
        mut init: Option<&mut I>,
    ) -> Result<Arc<T>, CacheError>
    where
        I: FnMut(ObjectId) -> InitFuture + Send,
    {
        let mut result = (self.loader)(ctx.clone(), id).await;
        if let (Err(CacheError::NotFound), Some(init)) = (&result, init.take()) {
            result = match init(id).await {
                Ok(()) => (self.loader)(ctx.clone(), id).await,
                Err(err) => Err(err),
            };
        }

        match result {
            Ok(object) => {
                entry.touch();
                entry.slot.send_replace(Slot::Ready(object.clone()));
                Ok(object)
            }
            Err(err) => {
                // Drop the failed entry so the next caller may retry.
                self.remove_entry_if_same(&id, entry);
                entry.slot.send_replace(Slot::Failed(err.clone()));
                Err(err)
            }
        }
    }

    fn remove_entry_if_same(&self, id: &ObjectId, entry: &Arc<Entry<T>>) {
        let mut state = self.state.lock().expect("cache state mutex poisoned");
        if let Some(current) = state.entries.get(id)
            && Arc::ptr_eq(current, entry)
        {
            state.entries.remove(id);
        }
    }

    fn confirm_resident(&self, id: &ObjectId, entry: &Arc<Entry<T>>) -> bool {
        let state = self.state.lock().expect("cache state mutex poisoned");
        state
            .entries
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    /// Re-checks expiry and unmaps the entry in one critical section.
    /// Returns the object to close, or `None` when a look-up referenced or
    /// touched the object in the meantime.
    fn remove_entry_if_expired(
        &self,
        id: &ObjectId,
        entry: &Arc<Entry<T>>,
        ttl: Duration,
    ) -> Option<Arc<T>> {
        let mut state = self.state.lock().expect("cache state mutex poisoned");
        let current = state.entries.get(id)?;
        if !Arc::ptr_eq(current, entry) {
            return None;
        }
        let object = match &*entry.slot.borrow() {
            Slot::Ready(object)
                if Arc::strong_count(object) == 1 && entry.idle_for() >= ttl =>
            {
                object.clone()
            }
            _ => return None,
        };
        state.entries.remove(id);
        Some(object)
    }

    /// Unmaps the object, closing it first when resident. Waits for an
    /// in-flight load of the object to settle.
    pub async fn remove(&self, ctx: &CancellationToken, id: ObjectId) -> Result<(), CacheError> {
        let entry = {
            let mut state = self.state.lock().expect("cache state mutex poisoned");
            state.entries.remove(&id)
        };
        let Some(entry) = entry else {
            return Ok(());
        };

        let mut rx = entry.slot.subscribe();
        loop {
            let slot = rx.borrow_and_update().clone();
            match slot {
                Slot::Ready(object) => {
                    object.close().await;
                    return Ok(());
                }
                Slot::Failed(_) => return Ok(()),
                Slot::Pending => {
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(CacheError::Cancelled),
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Non-blocking removal. Fails with `Locked` while the object is
    /// referenced outside the cache or still loading.
    pub async fn try_remove(&self, id: ObjectId) -> Result<(), CacheError> {
        let object = {
            let mut state = self.state.lock().expect("cache state mutex poisoned");
            let Some(entry) = state.entries.get(&id) else {
                return Ok(());
            };
            let object = match &*entry.slot.borrow() {
                Slot::Pending => return Err(CacheError::Locked),
                Slot::Ready(object) if Arc::strong_count(object) > 1 => {
                    return Err(CacheError::Locked);
                }
                Slot::Ready(object) => Some(object.clone()),
                Slot::Failed(_) => None,
            };
            state.entries.remove(&id);
            object
        };
        if let Some(object) = object {
            // Our clone above is the only reference left.
            object.close().await;
        }
        Ok(())
    }

    /// Whether an object is currently resident or loading.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.state
            .lock()
            .expect("cache state mutex poisoned")
            .entries
            .contains_key(id)
    }

    async fn sweep(&self, ttl: Duration) {
        let candidates: Vec<(ObjectId, Arc<Entry<T>>)> = {
            let state = self.state.lock().expect("cache state mutex poisoned");
            state
                .entries
                .iter()
                .filter(|(_, entry)| {
                    let slot = entry.slot.borrow();
                    matches!(&*slot, Slot::Ready(object) if Arc::strong_count(object) == 1)
                        && entry.idle_for() >= ttl
                })
                .map(|(id, entry)| (*id, entry.clone()))
                .collect()
        };

        // Closing one victim yields, a look-up may reference or touch a
        // later candidate in the meantime. Expiry is therefore re-checked
        // together with the unmap.
        for (id, entry) in candidates {
            let Some(object) = self.remove_entry_if_expired(&id, &entry, ttl) else {
                continue;
            };
            debug!(object = %id, "evicting idle object");
            object.close().await;
        }
    }

    /// Forbids further loads and closes every resident object.
    pub async fn close_all(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self
            .gc_task
            .lock()
            .expect("gc task mutex poisoned")
            .take()
            && let Err(err) = handle.await
        {
            warn!("cache gc task panicked: {err}");
        }

        let entries: Vec<Arc<Entry<T>>> = {
            let mut state = self.state.lock().expect("cache state mutex poisoned");
            state.closed = true;
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            let slot = entry.slot.borrow().clone();
            if let Slot::Ready(object) = slot {
                object.close().await;
            }
        }
    }
}
