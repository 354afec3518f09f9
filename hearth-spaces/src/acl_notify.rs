// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification processor tailing access-control logs.
//!
//! Every loaded space enqueues walks over its access-control log here. The
//! processor matches each record against the notification rules exactly
//! once per checkpoint, hands matches to the injected [`NotificationSink`]
//! and relies on the sink for checkpointing: the walk restarts from the id
//! of the last accepted notification, so delivery is at-least-once and the
//! sink deduplicates on the notification id (which equals the record id).
use std::sync::Arc;

use hearth_core::acl::{AccountMetadata, AclList, AclPayload, AclRecord, Permissions};
use hearth_core::identity::PublicKey;
use hearth_core::ids::{ChangeId, SpaceId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::status::AccountStatus;

const NOTIFIER_QUEUE_CAPACITY: usize = 64;

/// A user-visible notification derived from one access-control record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Equals the id of the record which produced the notification, used
    /// by the sink to deduplicate.
    pub id: ChangeId,
    pub space_id: SpaceId,
    pub payload: NotificationPayload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationPayload {
    /// Somebody asked to join a space this account administrates.
    RequestToJoin {
        identity: PublicKey,
        name: String,
        icon: String,
    },

    /// This account was removed from the space.
    ParticipantRemove { identity: PublicKey },

    /// The join request of this account was approved.
    ParticipantRequestApproved { permissions: Permissions },

    /// The join request of this account was turned down.
    ParticipantRequestDecline,

    /// The permissions of this account changed.
    ParticipantPermissionsChange { permissions: Permissions },
}

/// Notification subsystem the processor delivers into. Implemented by the
/// application shell, stubbed in tests.
pub trait NotificationSink: Send + Sync + 'static {
    type Error: std::error::Error + Send;

    /// Resolves once existing notifications finished loading. The
    /// processor delivers nothing before that.
    fn load_finished(&self) -> impl Future<Output = ()> + Send;

    /// Id of the last notification accepted for this log, the walk
    /// checkpoint.
    fn last_notification_id(
        &self,
        acl_id: ChangeId,
    ) -> impl Future<Output = Result<Option<ChangeId>, Self::Error>> + Send;

    /// Stores and delivers one notification, idempotent on its id.
    fn create_and_send(
        &self,
        acl_id: ChangeId,
        notification: Notification,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Errors which can occur when handing work to the processor.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("notification processor closed")]
    Closed,
}

enum ToNotifierActor {
    AddRecords {
        acl: AclList,
        permissions: Permissions,
        space_id: SpaceId,
        account_status: AccountStatus,
        local_status_ok: bool,
    },
    AddSingleRecord {
        acl_id: ChangeId,
        record: Box<AclRecord>,
        space_id: SpaceId,
        account_status: AccountStatus,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle on the notification processor actor.
#[derive(Debug)]
pub struct AclNotifier {
    tx: mpsc::Sender<ToNotifierActor>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AclNotifier {
    /// Spawns the processor actor around a sink and the local identity.
    pub fn new<S: NotificationSink>(sink: Arc<S>, identity: PublicKey) -> Self {
        let (tx, inbox) = mpsc::channel(NOTIFIER_QUEUE_CAPACITY);
        let actor = NotifierActor {
            sink,
            identity,
            inbox,
        };
        let handle = tokio::spawn(actor.run());
        Self {
            tx,
            task: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Enqueues a walk over the log, starting from the checkpoint.
    pub async fn add_records(
        &self,
        acl: AclList,
        permissions: Permissions,
        account_status: AccountStatus,
        local_status_ok: bool,
    ) -> Result<(), NotifierError> {
        let space_id = acl.space_id();
        self.tx
            .send(ToNotifierActor::AddRecords {
                acl,
                permissions,
                space_id,
                account_status,
                local_status_ok,
            })
            .await
            .map_err(|_| NotifierError::Closed)
    }

    /// Enqueues one record caught out-of-band. Declined join requests are
    /// erased from the log by the follow-up request, so they arrive here.
    pub async fn add_single_record(
        &self,
        acl_id: ChangeId,
        record: AclRecord,
        space_id: SpaceId,
        account_status: AccountStatus,
    ) -> Result<(), NotifierError> {
        self.tx
            .send(ToNotifierActor::AddSingleRecord {
                acl_id,
                record: Box::new(record),
                space_id,
                account_status,
            })
            .await
            .map_err(|_| NotifierError::Closed)
    }

    /// Finishes the record in flight and stops the actor.
    pub async fn close(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(ToNotifierActor::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        let handle = self.task.lock().expect("notifier mutex poisoned").take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            error!("notification processor panicked: {err}");
        }
    }
}

struct NotifierActor<S> {
    sink: Arc<S>,
    identity: PublicKey,
    inbox: mpsc::Receiver<ToNotifierActor>,
}

impl<S: NotificationSink> NotifierActor<S> {
    async fn run(mut self) {
        // Nothing is delivered before the existing notifications are in.
        self.sink.load_finished().await;

        while let Some(msg) = self.inbox.recv().await {
            match msg {
                ToNotifierActor::AddRecords {
                    acl,
                    permissions,
                    space_id,
                    account_status,
                    local_status_ok,
                } => {
                    self.process_records(&acl, permissions, space_id, account_status, local_status_ok)
                        .await;
                }
                ToNotifierActor::AddSingleRecord {
                    acl_id,
                    record,
                    space_id,
                    account_status,
                } => {
                    self.process_single(acl_id, &record, space_id, account_status)
                        .await;
                }
                ToNotifierActor::Shutdown { reply } => {
                    let _ = reply.send(());
                    return;
                }
            }
        }
    }

    async fn process_records(
        &self,
        acl: &AclList,
        permissions: Permissions,
        space_id: SpaceId,
        _account_status: AccountStatus,
        local_status_ok: bool,
    ) {
        let acl_id = acl.root_id();
        let checkpoint = match self.sink.last_notification_id(acl_id).await {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                warn!(acl = %acl_id, "reading notification checkpoint failed: {err}");
                return;
            }
        };

        for record in acl.iterate_after(checkpoint.as_ref()) {
            let Some(payload) = self.evaluate(record, permissions, local_status_ok) else {
                continue;
            };
            let notification = Notification {
                id: record.id(),
                space_id,
                payload,
            };
            if let Err(err) = self.sink.create_and_send(acl_id, notification).await {
                // The checkpoint stays put, the next walk retries.
                warn!(acl = %acl_id, record = %record.id(), "notification delivery failed: {err}");
                return;
            }
            debug!(acl = %acl_id, record = %record.id(), "notification sent");
        }
    }

    async fn process_single(
        &self,
        acl_id: ChangeId,
        record: &AclRecord,
        space_id: SpaceId,
        account_status: AccountStatus,
    ) {
        let AclPayload::RequestDecline { identity } = record.payload() else {
            return;
        };
        if *identity != self.identity || account_status != AccountStatus::Deleted {
            return;
        }
        let notification = Notification {
            id: record.id(),
            space_id,
            payload: NotificationPayload::ParticipantRequestDecline,
        };
        if let Err(err) = self.sink.create_and_send(acl_id, notification).await {
            warn!(acl = %acl_id, record = %record.id(), "notification delivery failed: {err}");
        }
    }

    fn evaluate(
        &self,
        record: &AclRecord,
        permissions: Permissions,
        local_status_ok: bool,
    ) -> Option<NotificationPayload> {
        match record.payload() {
            AclPayload::RequestJoin { metadata } => {
                if !permissions.can_manage_accounts() {
                    return None;
                }
                // Peers may send anything as metadata, undecodable bytes
                // yield empty profile fields.
                let metadata = AccountMetadata::from_bytes(metadata);
                Some(NotificationPayload::RequestToJoin {
                    identity: *record.identity(),
                    name: metadata.name,
                    icon: metadata.icon,
                })
            }
            AclPayload::AccountRemove { identities, .. } => {
                if identities.contains(&self.identity) && local_status_ok {
                    Some(NotificationPayload::ParticipantRemove {
                        identity: self.identity,
                    })
                } else {
                    None
                }
            }
            AclPayload::RequestAccept {
                identity,
                permissions: granted,
            } if *identity == self.identity => {
                Some(NotificationPayload::ParticipantRequestApproved {
                    permissions: *granted,
                })
            }
            AclPayload::PermissionChange {
                identity,
                permissions: changed,
            } if *identity == self.identity => {
                Some(NotificationPayload::ParticipantPermissionsChange {
                    permissions: *changed,
                })
            }
            _ => None,
        }
    }
}
