// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime layer above the space storage: object cache, space lifecycle,
//! access-control processing and the tech space.
//!
//! The crate hosts the long-running pieces a node keeps per space: the
//! [`cache`] guarantees at most one live instance per object, the [`loader`]
//! drives a space through its local lifecycle, [`acl_notify`] and
//! [`participants`] tail the access-control log of every loaded space, and
//! [`tech`] tracks one view per known space. External collaborators (the
//! underlying space transport, the notification subsystem, the identity
//! registry) appear only as traits.
pub mod acl_notify;
pub mod cache;
pub mod event;
pub mod loader;
pub mod participants;
pub mod status;
pub mod subscription;
pub mod tech;

pub use acl_notify::{
    AclNotifier, Notification, NotificationPayload, NotificationSink, NotifierError,
};
pub use cache::{CacheConfig, CacheError, CacheItem, ObjectCache, SmartblockType, UniqueKey};
pub use event::{SpaceEvent, SpaceEvents};
pub use loader::{LoaderConfig, LoaderError, OpenSpaceError, SpaceLoader, SpaceOpener};
pub use participants::{
    AccountProfile, IdentityRegistry, Participant, ParticipantWatcher, ProfileSource,
};
pub use status::{AccountStatus, LocalStatus, RemoteStatus, SpaceStatus, StatusHandle};
pub use subscription::{ObjectSubscription, SubscriptionEvent};
pub use tech::{PushKeyMaterial, SpaceView, TechSpace};
