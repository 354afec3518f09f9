// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-space status, guarded by a single mutex so transitions serialize.
use std::sync::Arc;

use hearth_core::ids::SpaceId;
use tokio::sync::Mutex;

use crate::event::{SpaceEvent, SpaceEvents};

/// How far the local node got with loading a space.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LocalStatus {
    #[default]
    Unknown,
    Loading,
    Ok,
    Missing,
}

/// What the network reports about a space.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RemoteStatus {
    #[default]
    Unknown,
    Ok,
    Error,
    WaitingDeletion,
    Deleted,
}

/// Persistent standing of the local account in a space, survives restarts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AccountStatus {
    #[default]
    Unknown,
    Joining,
    Active,
    Removing,
    Deleted,
}

/// Combined status of one space on this node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SpaceStatus {
    pub local: LocalStatus,
    pub remote: RemoteStatus,
    pub account: AccountStatus,
}

/// Shared handle on the status of one space.
///
/// All writers go through the same mutex, so no transition can interleave
/// with another. Every effective change is published as
/// [`SpaceEvent::StatusChanged`].
#[derive(Clone, Debug)]
pub struct StatusHandle {
    space_id: SpaceId,
    inner: Arc<Mutex<SpaceStatus>>,
    events: SpaceEvents,
}

impl StatusHandle {
    pub fn new(space_id: SpaceId, events: SpaceEvents) -> Self {
        Self {
            space_id,
            inner: Arc::default(),
            events,
        }
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    pub async fn snapshot(&self) -> SpaceStatus {
        *self.inner.lock().await
    }

    pub async fn set_local(&self, local: LocalStatus) {
        self.update(|status| status.local = local).await;
    }

    pub async fn set_remote(&self, remote: RemoteStatus) {
        self.update(|status| status.remote = remote).await;
    }

    pub async fn set_account(&self, account: AccountStatus) {
        self.update(|status| status.account = account).await;
    }

    /// Sets local and remote status in one serialized step.
    pub async fn set_local_remote(&self, local: LocalStatus, remote: RemoteStatus) {
        self.update(|status| {
            status.local = local;
            status.remote = remote;
        })
        .await;
    }

    async fn update(&self, f: impl FnOnce(&mut SpaceStatus)) {
        let mut status = self.inner.lock().await;
        let before = *status;
        f(&mut status);
        if *status != before {
            self.events.emit(SpaceEvent::StatusChanged {
                space_id: self.space_id,
                status: *status,
            });
        }
    }
}
