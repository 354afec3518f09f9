// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exclusive per-space locks.
//!
//! Opening a space takes its lock for as long as the returned storage
//! handle lives. A second opener blocks on a completion signal which fires
//! when the current holder is done, then retries. This mirrors how the
//! store scopes concurrent access: many spaces in parallel, one opener per
//! space.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hearth_core::ids::SpaceId;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Registry of currently locked spaces.
#[derive(Clone, Debug, Default)]
pub struct SpaceLocks {
    inner: Arc<Mutex<HashMap<SpaceId, watch::Sender<()>>>>,
}

impl SpaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock for a space, waiting until the current holder (if
    /// any) releases it. Returns `Cancelled` when the token fires first.
    pub async fn lock(
        &self,
        ctx: &CancellationToken,
        id: SpaceId,
    ) -> Result<SpaceLockGuard, LockError> {
        loop {
            let mut released = match self.try_lock(id) {
                Ok(guard) => return Ok(guard),
                Err(LockError::Locked) => {
                    let map = self.inner.lock().expect("space locks mutex poisoned");
                    match map.get(&id) {
                        Some(holder) => holder.subscribe(),
                        // Holder released between try_lock and here, retry.
                        None => continue,
                    }
                }
                Err(err) => return Err(err),
            };

            tokio::select! {
                _ = ctx.cancelled() => return Err(LockError::Cancelled),
                // The sender is dropped when the holder releases the lock.
                result = released.changed() => {
                    let _ = result;
                }
            }
        }
    }

    /// Non-blocking variant, fails with `Locked` when the space is held.
    pub fn try_lock(&self, id: SpaceId) -> Result<SpaceLockGuard, LockError> {
        let mut map = self.inner.lock().expect("space locks mutex poisoned");
        if map.contains_key(&id) {
            return Err(LockError::Locked);
        }
        let (holder, _) = watch::channel(());
        map.insert(id, holder);
        Ok(SpaceLockGuard {
            locks: self.clone(),
            id,
        })
    }

    /// Whether a space is currently locked.
    pub fn is_locked(&self, id: &SpaceId) -> bool {
        self.inner
            .lock()
            .expect("space locks mutex poisoned")
            .contains_key(id)
    }

    fn release(&self, id: &SpaceId) {
        // Dropping the sender wakes every waiter subscribed to it.
        self.inner
            .lock()
            .expect("space locks mutex poisoned")
            .remove(id);
    }
}

/// Holds the exclusive lock of one space, released on drop.
#[derive(Debug)]
pub struct SpaceLockGuard {
    locks: SpaceLocks,
    id: SpaceId,
}

impl SpaceLockGuard {
    pub fn space_id(&self) -> SpaceId {
        self.id
    }
}

impl Drop for SpaceLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.id);
    }
}

/// Errors which can occur when taking a space lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process holds exclusive access to the space.
    #[error("space storage is locked")]
    Locked,

    /// The wait was cancelled before the lock became available.
    #[error("lock wait cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use hearth_core::ids::SpaceId;
    use tokio_util::sync::CancellationToken;

    use super::{LockError, SpaceLocks};

    #[tokio::test]
    async fn exclusive_per_space() {
        let locks = SpaceLocks::new();
        let space_a = SpaceId::derive(b"a");
        let space_b = SpaceId::derive(b"b");

        let guard = locks.try_lock(space_a).unwrap();
        assert_matches!(locks.try_lock(space_a), Err(LockError::Locked));

        // Other spaces are unaffected.
        assert!(locks.try_lock(space_b).is_ok());

        drop(guard);
        assert!(locks.try_lock(space_a).is_ok());
    }

    #[tokio::test]
    async fn waiter_acquires_after_release() {
        let locks = SpaceLocks::new();
        let space = SpaceId::derive(b"contended");
        let guard = locks.try_lock(space).unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks.lock(&CancellationToken::new(), space).await.unwrap()
            })
        };

        // Give the waiter time to subscribe, then release.
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);

        let guard = waiter.await.unwrap();
        assert_eq!(guard.space_id(), space);
    }

    #[tokio::test]
    async fn cancelled_waiter_returns_promptly() {
        let locks = SpaceLocks::new();
        let space = SpaceId::derive(b"held");
        let _guard = locks.try_lock(space).unwrap();

        let ctx = CancellationToken::new();
        ctx.cancel();
        assert_matches!(locks.lock(&ctx, space).await, Err(LockError::Cancelled));
    }
}
