// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tech space: one view per space this account knows about.
//!
//! Views hold the account-level facts about a space which are not part of
//! the space content itself: who owns it, how far the access-control log
//! was indexed, the persistent account status and the key material the push
//! engine derives its secrets from. Every write bumps a change counter
//! subscribers can watch.
use std::collections::HashMap;
use std::sync::Mutex;

use hearth_core::acl::{MetadataKey, ReadKey};
use hearth_core::identity::PublicKey;
use hearth_core::ids::{ChangeId, SpaceId};
use tokio::sync::watch;

use crate::status::AccountStatus;

/// Key material the participant watcher publishes whenever the read key of
/// a space rotates. Consumed by the push engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushKeyMaterial {
    pub first_metadata_key: MetadataKey,
    pub read_key: ReadKey,
    pub read_key_id: String,
}

/// Account-level view of one space.
#[derive(Clone, Debug, Default)]
pub struct SpaceView {
    pub owner: Option<PublicKey>,
    pub created_at: Option<i64>,

    /// Head of the access-control log the watcher indexed last.
    pub last_indexed: Option<ChangeId>,

    pub account_status: AccountStatus,
    pub push_keys: Option<PushKeyMaterial>,
}

/// Registry of space views, shared across the runtime.
#[derive(Debug)]
pub struct TechSpace {
    views: Mutex<HashMap<SpaceId, SpaceView>>,
    // Bumped on every write so subscribers can coalesce changes.
    changed: watch::Sender<u64>,
}

impl TechSpace {
    pub fn new() -> Self {
        Self {
            views: Mutex::new(HashMap::new()),
            changed: watch::Sender::new(0),
        }
    }

    /// Registers an empty view. Loading a space requires its view to exist
    /// first. Registering twice keeps the existing view.
    pub fn register_view(&self, space_id: SpaceId) {
        let mut views = self.views.lock().expect("tech space mutex poisoned");
        views.entry(space_id).or_default();
        drop(views);
        self.bump();
    }

    pub fn view_exists(&self, space_id: &SpaceId) -> bool {
        self.views
            .lock()
            .expect("tech space mutex poisoned")
            .contains_key(space_id)
    }

    pub fn view(&self, space_id: &SpaceId) -> Option<SpaceView> {
        self.views
            .lock()
            .expect("tech space mutex poisoned")
            .get(space_id)
            .cloned()
    }

    /// All views with their space ids, for full passes over the registry.
    pub fn views(&self) -> Vec<(SpaceId, SpaceView)> {
        self.views
            .lock()
            .expect("tech space mutex poisoned")
            .iter()
            .map(|(space_id, view)| (*space_id, view.clone()))
            .collect()
    }

    pub fn set_owner(&self, space_id: SpaceId, owner: PublicKey, created_at: i64) {
        self.update(space_id, |view| {
            view.owner = Some(owner);
            view.created_at = Some(created_at);
        });
    }

    /// Records how far the access-control log was indexed.
    pub fn set_last_indexed(&self, space_id: SpaceId, head: ChangeId) {
        self.update(space_id, |view| view.last_indexed = Some(head));
    }

    pub fn set_account_status(&self, space_id: SpaceId, status: AccountStatus) {
        self.update(space_id, |view| view.account_status = status);
    }

    pub fn set_push_keys(&self, space_id: SpaceId, keys: PushKeyMaterial) {
        self.update(space_id, |view| view.push_keys = Some(keys));
    }

    /// Watches the change counter. The receiver is marked changed on every
    /// write to any view.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    fn update(&self, space_id: SpaceId, f: impl FnOnce(&mut SpaceView)) {
        let mut views = self.views.lock().expect("tech space mutex poisoned");
        f(views.entry(space_id).or_default());
        drop(views);
        self.bump();
    }

    fn bump(&self) {
        self.changed.send_modify(|counter| *counter += 1);
    }
}

impl Default for TechSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use hearth_core::identity::PrivateKey;
    use hearth_core::ids::SpaceId;

    use crate::status::AccountStatus;

    use super::TechSpace;

    #[test]
    fn views_are_registered_and_updated() {
        let tech = TechSpace::new();
        let space_id = SpaceId::derive(b"tech");
        assert!(!tech.view_exists(&space_id));

        tech.register_view(space_id);
        assert!(tech.view_exists(&space_id));

        let owner = PrivateKey::new().public_key();
        tech.set_owner(space_id, owner, 1_700_000_000);
        tech.set_account_status(space_id, AccountStatus::Active);

        let view = tech.view(&space_id).unwrap();
        assert_eq!(view.owner, Some(owner));
        assert_eq!(view.created_at, Some(1_700_000_000));
        assert_eq!(view.account_status, AccountStatus::Active);
        assert_eq!(view.last_indexed, None);

        // Re-registration keeps the view.
        tech.register_view(space_id);
        assert_eq!(tech.view(&space_id).unwrap().owner, Some(owner));
    }

    #[test]
    fn writes_bump_the_change_counter() {
        let tech = TechSpace::new();
        let mut changes = tech.subscribe();
        let before = *changes.borrow_and_update();

        tech.register_view(SpaceId::derive(b"counted"));
        assert!(changes.has_changed().unwrap());
        assert!(*changes.borrow_and_update() > before);
    }
}
