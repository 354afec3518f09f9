// SPDX-License-Identifier: MIT OR Apache-2.0

//! Space loader, driving one space through its local lifecycle.
//!
//! Loading opens the underlying space through the injected [`SpaceOpener`]
//! and waits for the mandatory objects. Failures retry with capped
//! exponential backoff; deletion outcomes terminate the loader and leave a
//! terminal status behind. Everybody interested in the outcome shares one
//! completion latch via [`SpaceLoader::wait_load`].
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hearth_core::ids::SpaceId;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::status::{AccountStatus, LocalStatus, RemoteStatus, StatusHandle};
use crate::tech::TechSpace;

/// Outcome of opening the underlying space, reported by the external
/// transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OpenSpaceError {
    /// The space is not available yet, worth retrying.
    #[error("space is missing")]
    SpaceMissing,

    /// The network decided to delete the space but has not finished.
    #[error("space deletion is pending")]
    DeletionPending,

    /// The space was deleted remotely.
    #[error("space was deleted")]
    SpaceDeleted,

    /// A failure unrelated to the space lifecycle.
    #[error("transient open failure: {0}")]
    Transient(String),
}

/// Opens the underlying space and waits for its mandatory objects
/// (settings, profile, workspace, archive). Implemented by the transport
/// layer, stubbed in tests.
pub trait SpaceOpener: Send + Sync + 'static {
    type Space: Send + Sync + 'static;

    fn open(
        &self,
        ctx: &CancellationToken,
        space_id: SpaceId,
    ) -> impl Future<Output = Result<Arc<Self::Space>, OpenSpaceError>> + Send;

    fn wait_mandatory_objects(
        &self,
        ctx: &CancellationToken,
        space: &Self::Space,
    ) -> impl Future<Output = Result<(), OpenSpaceError>> + Send;
}

/// Errors which can occur while loading a space.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoaderError {
    /// The account status of the space is `Deleted`, nothing is loaded.
    #[error("space was deleted")]
    SpaceDeleted,

    /// No space view exists in the tech space.
    #[error("space does not exist")]
    SpaceNotExists,

    /// The load was cancelled or the loader closed.
    #[error("space load cancelled")]
    Cancelled,
}

#[derive(Copy, Clone, Debug)]
pub struct LoaderConfig {
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            max_backoff: Duration::from_secs(20),
        }
    }
}

type LoadResult<S> = Result<Arc<S>, LoaderError>;

/// Loader of one space.
pub struct SpaceLoader<O: SpaceOpener> {
    space_id: SpaceId,
    opener: Arc<O>,
    tech: Arc<TechSpace>,
    status: StatusHandle,
    config: LoaderConfig,
    latch: watch::Sender<Option<LoadResult<O::Space>>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<O: SpaceOpener> std::fmt::Debug for SpaceLoader<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SpaceLoader")
            .field("space_id", &self.space_id)
            .finish_non_exhaustive()
    }
}

impl<O: SpaceOpener> SpaceLoader<O> {
    pub fn new(
        space_id: SpaceId,
        opener: Arc<O>,
        tech: Arc<TechSpace>,
        status: StatusHandle,
        config: LoaderConfig,
    ) -> Self {
        Self {
            space_id,
            opener,
            tech,
            status,
            config,
            latch: watch::Sender::new(None),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    /// Starts the retrying loader task.
    ///
    /// Fails fast with `SpaceDeleted` when the persistent account status
    /// says the space is gone, and with `SpaceNotExists` when the tech
    /// space has no view for it. Neither failure touches storage.
    pub async fn start_load(&self) -> Result<(), LoaderError> {
        if self.status.snapshot().await.account == AccountStatus::Deleted {
            return Err(LoaderError::SpaceDeleted);
        }
        if !self.tech.view_exists(&self.space_id) {
            return Err(LoaderError::SpaceNotExists);
        }
        self.status.set_local(LocalStatus::Loading).await;

        let space_id = self.space_id;
        let opener = self.opener.clone();
        let status = self.status.clone();
        let latch = self.latch.clone();
        let shutdown = self.shutdown.clone();
        let config = self.config;
        let handle = tokio::spawn(async move {
            let mut backoff = config.initial_backoff;
            loop {
                let attempt = async {
                    let space = opener.open(&shutdown, space_id).await?;
                    opener.wait_mandatory_objects(&shutdown, &space).await?;
                    Ok(space)
                };
                let result = tokio::select! {
                    _ = shutdown.cancelled() => {
                        latch.send_replace(Some(Err(LoaderError::Cancelled)));
                        return;
                    }
                    result = attempt => result,
                };

                match result {
                    Ok(space) => {
                        status
                            .set_local_remote(LocalStatus::Ok, RemoteStatus::Unknown)
                            .await;
                        latch.send_replace(Some(Ok(space)));
                        return;
                    }
                    Err(OpenSpaceError::DeletionPending) => {
                        status
                            .set_local_remote(LocalStatus::Missing, RemoteStatus::WaitingDeletion)
                            .await;
                        latch.send_replace(Some(Err(LoaderError::SpaceDeleted)));
                        return;
                    }
                    Err(OpenSpaceError::SpaceDeleted) => {
                        status
                            .set_local_remote(LocalStatus::Missing, RemoteStatus::Deleted)
                            .await;
                        latch.send_replace(Some(Err(LoaderError::SpaceDeleted)));
                        return;
                    }
                    Err(OpenSpaceError::SpaceMissing) => {
                        debug!(space = %space_id, "space not available yet, retrying");
                    }
                    Err(OpenSpaceError::Transient(reason)) => {
                        warn!(space = %space_id, %reason, "space load failed, retrying");
                        status
                            .set_local_remote(LocalStatus::Missing, RemoteStatus::Error)
                            .await;
                    }
                }

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        latch.send_replace(Some(Err(LoaderError::Cancelled)));
                        return;
                    }
                    _ = tokio::time::sleep(backoff) => (),
                }
                backoff = backoff
                    .mul_f64(config.backoff_multiplier)
                    .min(config.max_backoff);
            }
        });
        self.task
            .lock()
            .expect("loader task mutex poisoned")
            .replace(handle);
        Ok(())
    }

    /// Waits until the loader settles. Concurrent callers share the
    /// completion latch and receive the same result.
    pub async fn wait_load(&self, ctx: &CancellationToken) -> LoadResult<O::Space> {
        let mut latch = self.latch.subscribe();
        loop {
            if let Some(result) = latch.borrow_and_update().clone() {
                return result;
            }
            tokio::select! {
                _ = ctx.cancelled() => return Err(LoaderError::Cancelled),
                changed = latch.changed() => {
                    if changed.is_err() {
                        return Err(LoaderError::Cancelled);
                    }
                }
            }
        }
    }

    /// Stops the loader task. Pending `wait_load` calls resolve with
    /// `Cancelled`.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().expect("loader task mutex poisoned").take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!("loader task panicked: {err}");
        }
        self.latch.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(Err(LoaderError::Cancelled));
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use hearth_core::ids::SpaceId;
    use tokio_util::sync::CancellationToken;

    use crate::event::SpaceEvents;
    use crate::status::{AccountStatus, LocalStatus, RemoteStatus, StatusHandle};
    use crate::tech::TechSpace;

    use super::{LoaderConfig, LoaderError, OpenSpaceError, SpaceLoader, SpaceOpener};

    #[derive(Debug, PartialEq, Eq)]
    struct TestSpace(SpaceId);

    struct ScriptedOpener {
        script: Mutex<VecDeque<Result<(), OpenSpaceError>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedOpener {
        fn new(script: impl IntoIterator<Item = Result<(), OpenSpaceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                attempts: AtomicUsize::new(0),
            })
        }
    }

    impl SpaceOpener for ScriptedOpener {
        type Space = TestSpace;

        async fn open(
            &self,
            _ctx: &CancellationToken,
            space_id: SpaceId,
        ) -> Result<Arc<TestSpace>, OpenSpaceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(())) | None => Ok(Arc::new(TestSpace(space_id))),
                Some(Err(err)) => Err(err),
            }
        }

        async fn wait_mandatory_objects(
            &self,
            _ctx: &CancellationToken,
            _space: &TestSpace,
        ) -> Result<(), OpenSpaceError> {
            Ok(())
        }
    }

    fn loader(
        opener: Arc<ScriptedOpener>,
        register_view: bool,
    ) -> (SpaceLoader<ScriptedOpener>, StatusHandle) {
        let space_id = SpaceId::derive(b"loader space");
        let tech = Arc::new(TechSpace::new());
        if register_view {
            tech.register_view(space_id);
        }
        let status = StatusHandle::new(space_id, SpaceEvents::new());
        let loader = SpaceLoader::new(
            space_id,
            opener,
            tech,
            status.clone(),
            LoaderConfig::default(),
        );
        (loader, status)
    }

    #[tokio::test]
    async fn deleted_account_fails_before_opening() {
        let opener = ScriptedOpener::new([]);
        let (loader, status) = loader(opener.clone(), true);
        status.set_account(AccountStatus::Deleted).await;

        assert_matches!(loader.start_load().await, Err(LoaderError::SpaceDeleted));
        assert_eq!(opener.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_view_fails_fast() {
        let opener = ScriptedOpener::new([]);
        let (loader, _status) = loader(opener, false);
        assert_matches!(loader.start_load().await, Err(LoaderError::SpaceNotExists));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_space_appears() {
        let opener = ScriptedOpener::new([
            Err(OpenSpaceError::SpaceMissing),
            Err(OpenSpaceError::SpaceMissing),
            Ok(()),
        ]);
        let (loader, status) = loader(opener.clone(), true);

        loader.start_load().await.unwrap();
        let space = loader.wait_load(&CancellationToken::new()).await.unwrap();
        assert_eq!(space.0, loader.space_id());
        assert_eq!(opener.attempts.load(Ordering::SeqCst), 3);

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.local, LocalStatus::Ok);
        assert_eq!(snapshot.remote, RemoteStatus::Unknown);
        loader.close().await;
    }

    #[tokio::test]
    async fn deletion_pending_terminates() {
        let opener = ScriptedOpener::new([Err(OpenSpaceError::DeletionPending)]);
        let (loader, status) = loader(opener.clone(), true);

        loader.start_load().await.unwrap();
        assert_matches!(
            loader.wait_load(&CancellationToken::new()).await,
            Err(LoaderError::SpaceDeleted)
        );
        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.local, LocalStatus::Missing);
        assert_eq!(snapshot.remote, RemoteStatus::WaitingDeletion);
        // No retry after a terminal outcome.
        assert_eq!(opener.attempts.load(Ordering::SeqCst), 1);
        loader.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_share_the_result() {
        let opener = ScriptedOpener::new([Err(OpenSpaceError::SpaceMissing), Ok(())]);
        let (loader, _status) = loader(opener, true);
        let loader = Arc::new(loader);

        loader.start_load().await.unwrap();
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let loader = loader.clone();
            waiters.push(tokio::spawn(async move {
                loader.wait_load(&CancellationToken::new()).await.unwrap()
            }));
        }

        let mut spaces = Vec::new();
        for waiter in waiters {
            spaces.push(waiter.await.unwrap());
        }
        assert!(Arc::ptr_eq(&spaces[0], &spaces[1]));
        assert!(Arc::ptr_eq(&spaces[0], &spaces[2]));
        loader.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_waiters() {
        let opener = ScriptedOpener::new(vec![
            Err(OpenSpaceError::SpaceMissing);
            64
        ]);
        let (loader, _status) = loader(opener, true);
        let loader = Arc::new(loader);

        loader.start_load().await.unwrap();
        let waiter = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.wait_load(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        loader.close().await;
        assert_matches!(waiter.await.unwrap(), Err(LoaderError::Cancelled));
    }
}
