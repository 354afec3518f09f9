// SPDX-License-Identifier: MIT OR Apache-2.0

//! Space event stream.
use hearth_core::ids::{ChangeId, SpaceId};
use tokio::sync::broadcast;

use crate::status::SpaceStatus;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events published by the space runtime. Consumers subscribe through
/// [`SpaceEvents::subscribe`] and must keep up; slow subscribers lose the
/// oldest events first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpaceEvent {
    /// A space status transition went through.
    StatusChanged {
        space_id: SpaceId,
        status: SpaceStatus,
    },

    /// The access-control log of a space was indexed up to a new head.
    AclIndexed { space_id: SpaceId, head: ChangeId },
}

/// Cloneable publisher of [`SpaceEvent`]s.
#[derive(Clone, Debug)]
pub struct SpaceEvents {
    tx: broadcast::Sender<SpaceEvent>,
}

impl SpaceEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpaceEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Events without any subscriber are dropped.
    pub fn emit(&self, event: SpaceEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for SpaceEvents {
    fn default() -> Self {
        Self::new()
    }
}
