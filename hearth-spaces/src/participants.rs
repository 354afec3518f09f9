// SPDX-License-Identifier: MIT OR Apache-2.0

//! Participant objects derived from access-control state.
//!
//! For every identity that ever appeared in the access-control log of a
//! loaded space the watcher keeps one participant. Permissions and status
//! come from replayed ACL state, names and icons from the local profile
//! (for the own account) or from the identity registry (for everybody
//! else).
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use hearth_core::acl::{AccountMetadata, AclState, ParticipantStatus, Permissions};
use hearth_core::identity::PublicKey;
use hearth_core::ids::SpaceId;
use tracing::debug;

use crate::event::{SpaceEvent, SpaceEvents};
use crate::status::AccountStatus;
use crate::tech::{PushKeyMaterial, TechSpace};

/// Local profile snapshot of the own account. Implemented by the profile
/// store, stubbed in tests.
pub trait ProfileSource: Send + Sync + 'static {
    fn profile(&self) -> AccountProfile;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountProfile {
    pub name: String,
    pub icon: String,
}

/// Registry of remote identities. Observing an identity subscribes to its
/// public profile, decrypted with the symmetric key the account put into
/// its join request metadata.
pub trait IdentityRegistry: Send + Sync + 'static {
    type Error: std::error::Error + Send;

    fn observe(
        &self,
        space_id: SpaceId,
        identity: PublicKey,
        profile_key: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// One participant of one space.
#[derive(Clone, Debug, PartialEq)]
pub struct Participant {
    pub space_id: SpaceId,
    pub identity: PublicKey,
    pub permissions: Permissions,
    pub status: ParticipantStatus,
    pub joined_at: Option<i64>,
    pub name: String,
    pub icon: String,
}

/// Watcher maintaining participant objects per loaded space.
pub struct ParticipantWatcher<R> {
    tech: Arc<TechSpace>,
    registry: Arc<R>,
    identity: PublicKey,
    events: SpaceEvents,
    participants: Mutex<HashMap<(SpaceId, PublicKey), Participant>>,
    // Guards against double-registration of identity observers, keyed on
    // space and account public key.
    observed: Mutex<HashSet<(SpaceId, String)>>,
}

impl<R> std::fmt::Debug for ParticipantWatcher<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ParticipantWatcher")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl<R: IdentityRegistry> ParticipantWatcher<R> {
    pub fn new(
        tech: Arc<TechSpace>,
        registry: Arc<R>,
        identity: PublicKey,
        events: SpaceEvents,
    ) -> Self {
        Self {
            tech,
            registry,
            identity,
            events,
            participants: Mutex::new(HashMap::new()),
            observed: Mutex::new(HashSet::new()),
        }
    }

    /// Runs one full pass over replayed access-control state.
    ///
    /// Nothing happens when the head was already indexed. Otherwise the
    /// pass records the owner on the space view, rewrites every
    /// participant owner-first, registers missing identity observers,
    /// publishes rotated push keys and finally stores the new head. A
    /// failing observer registration aborts the pass before the head is
    /// stored, so the next pass retries.
    pub async fn process_acl(&self, state: &AclState) -> Result<(), R::Error> {
        let space_id = state.space_id();
        let view = self.tech.view(&space_id).unwrap_or_default();
        if view.last_indexed == Some(state.head_id()) {
            return Ok(());
        }

        let previously_active = {
            let participants = self.participants.lock().expect("participants mutex poisoned");
            participants
                .get(&(space_id, self.identity))
                .is_some_and(|participant| !participant.permissions.is_none())
        };

        self.tech
            .set_owner(space_id, *state.owner(), state.created_at());

        for account in state.accounts_owner_first() {
            self.upsert_participant(space_id, account.identity, |participant| {
                participant.permissions = account.permissions;
                participant.status = account.status;
                participant.joined_at = account.joined_at;
            });

            if account.identity == self.identity {
                continue;
            }
            let profile_key = AccountMetadata::from_bytes(&account.metadata).profile_key;
            if profile_key.is_empty() {
                continue;
            }
            let observer_key = (space_id, account.identity.to_hex());
            let already_observed = self
                .observed
                .lock()
                .expect("observed mutex poisoned")
                .contains(&observer_key);
            if !already_observed {
                self.registry
                    .observe(space_id, account.identity, profile_key)
                    .await?;
                self.observed
                    .lock()
                    .expect("observed mutex poisoned")
                    .insert(observer_key);
            }
        }

        // Losing all permissions after having been an active member means
        // this account was kicked out of the space.
        if state.permissions(&self.identity).is_none() && previously_active {
            self.upsert_participant(space_id, self.identity, |participant| {
                participant.status = ParticipantStatus::Removed;
            });
            self.tech
                .set_account_status(space_id, AccountStatus::Removing);
            debug!(space = %space_id, "local account lost access");
        }

        if view
            .push_keys
            .as_ref()
            .is_none_or(|keys| keys.read_key_id != state.read_key_id())
        {
            self.tech.set_push_keys(space_id, PushKeyMaterial {
                first_metadata_key: state.first_metadata_key().clone(),
                read_key: state.read_key().clone(),
                read_key_id: state.read_key_id().to_string(),
            });
        }

        self.tech.set_last_indexed(space_id, state.head_id());
        self.events.emit(SpaceEvent::AclIndexed {
            space_id,
            head: state.head_id(),
        });
        Ok(())
    }

    /// Refreshes the own participant from the local profile.
    pub fn update_account_participant_from_profile(
        &self,
        space_id: SpaceId,
        source: &impl ProfileSource,
    ) {
        let profile = source.profile();
        self.upsert_participant(space_id, self.identity, |participant| {
            participant.name = profile.name.clone();
            participant.icon = profile.icon.clone();
        });
    }

    /// Callback for the identity registry: the public profile of a remote
    /// identity changed.
    pub fn identity_updated(&self, space_id: SpaceId, identity: PublicKey, name: String, icon: String) {
        self.upsert_participant(space_id, identity, |participant| {
            participant.name = name.clone();
            participant.icon = icon.clone();
        });
    }

    pub fn participant(&self, space_id: SpaceId, identity: &PublicKey) -> Option<Participant> {
        self.participants
            .lock()
            .expect("participants mutex poisoned")
            .get(&(space_id, *identity))
            .cloned()
    }

    /// All participants of a space, owner first, the rest sorted by
    /// identity.
    pub fn participants(&self, space_id: SpaceId) -> Vec<Participant> {
        let owner = self.tech.view(&space_id).and_then(|view| view.owner);
        let mut participants: Vec<Participant> = self
            .participants
            .lock()
            .expect("participants mutex poisoned")
            .values()
            .filter(|participant| participant.space_id == space_id)
            .cloned()
            .collect();
        participants
            .sort_by_key(|participant| (Some(participant.identity) != owner, participant.identity));
        participants
    }

    fn upsert_participant(
        &self,
        space_id: SpaceId,
        identity: PublicKey,
        f: impl FnOnce(&mut Participant),
    ) {
        let mut participants = self.participants.lock().expect("participants mutex poisoned");
        let participant = participants
            .entry((space_id, identity))
            .or_insert_with(|| Participant {
                space_id,
                identity,
                permissions: Permissions::None,
                status: ParticipantStatus::Joining,
                joined_at: None,
                name: String::new(),
                icon: String::new(),
            });
        f(participant);
    }
}
