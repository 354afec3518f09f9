// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push engine.
//!
//! One background control task keeps the push server in sync with local
//! state: it registers the device token, announces spaces whose keys became
//! known and wakes up on tech-space changes, explicit wake requests or a
//! periodic timer. Outgoing notifications are sealed eagerly and drained by
//! a separate delivery task with a bounded retry policy.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hearth_core::identity::PrivateKey;
use hearth_core::ids::SpaceId;
use hearth_spaces::TechSpace;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{CryptoError, EncryptedMessage, Platform, PushApi, seal_message};
use crate::keys::derive_space_keys;
use crate::topics::{SignedTopic, make_topics};

const DEFAULT_DELIVERY_ATTEMPTS: u32 = 6;
const DEFAULT_DELIVERY_SPACING: Duration = Duration::from_secs(10);
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

const NOTIFY_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum PushError {
    /// The space has no published push keys yet, its access-control log
    /// was not indexed.
    #[error("no push keys known for space {0}")]
    MissingKeys(SpaceId),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("push engine is closed")]
    Closed,
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub delivery_attempts: u32,
    pub delivery_spacing: Duration,
    pub sync_interval: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            delivery_attempts: DEFAULT_DELIVERY_ATTEMPTS,
            delivery_spacing: DEFAULT_DELIVERY_SPACING,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

struct QueuedNotification {
    topics: Vec<SignedTopic>,
    message: EncryptedMessage,
}

#[derive(Default)]
struct TokenState {
    token: Option<(Platform, String)>,
    registered: bool,
}

struct EngineInner<A> {
    api: Arc<A>,
    tech: Arc<TechSpace>,
    account_key: PrivateKey,
    config: PushConfig,
    token: Mutex<TokenState>,
    // Spaces already announced at the push server.
    created: Mutex<HashSet<SpaceId>>,
}

impl<A: PushApi> EngineInner<A> {
    /// One full pass: register the token if needed, then announce every
    /// space whose keys are known but which the server has not seen yet.
    /// Passes re-read all state, so coalescing wake-ups is harmless.
    async fn pass(&self) {
        self.ensure_token_registered().await;
        self.sync_spaces().await;
    }

    async fn ensure_token_registered(&self) {
        let pending = {
            let state = self.token.lock().expect("token mutex poisoned");
            if state.registered {
                None
            } else {
                state.token.clone()
            }
        };
        let Some((platform, token)) = pending else {
            return;
        };

        if let Err(err) = self.api.set_token(platform, &token).await {
            warn!("push token registration failed: {err}");
            return;
        }
        let mut state = self.token.lock().expect("token mutex poisoned");
        // The token may have changed while the call was in flight.
        if state.token.as_ref().is_some_and(|(_, current)| *current == token) {
            state.registered = true;
        }
    }

    async fn sync_spaces(&self) {
        for (space_id, view) in self.tech.views() {
            let Some(material) = view.push_keys else {
                continue;
            };
            let already_created = self
                .created
                .lock()
                .expect("created mutex poisoned")
                .contains(&space_id);
            if already_created {
                continue;
            }

            let keys = derive_space_keys(&material);
            let space_key = keys.signing_key.public_key().to_bytes();
            let signature = keys
                .signing_key
                .sign(self.account_key.public_key().as_bytes());
            match self.api.create_space(&space_key, &signature).await {
                Ok(()) => {
                    debug!(space = %space_id, "announced space at the push server");
                    self.created
                        .lock()
                        .expect("created mutex poisoned")
                        .insert(space_id);
                }
                Err(err) => warn!(space = %space_id, "push space creation failed: {err}"),
            }
        }
    }

    /// Delivers one notification, retrying with fixed spacing. After the
    /// final failure the notification is dropped.
    async fn deliver(&self, shutdown: &CancellationToken, notification: QueuedNotification) {
        let attempts = self.config.delivery_attempts;
        for attempt in 1..=attempts {
            match self
                .api
                .notify(notification.topics.clone(), notification.message.clone())
                .await
            {
                Ok(()) => return,
                Err(err) => warn!(attempt, "push delivery failed: {err}"),
            }
            if attempt < attempts {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = tokio::time::sleep(self.config.delivery_spacing) => (),
                }
            }
        }
        warn!("dropping push notification after {attempts} failed attempts");
    }
}

/// Handle on the push engine tasks.
pub struct PushEngine<A> {
    inner: Arc<EngineInner<A>>,
    wake_tx: mpsc::Sender<()>,
    queue_tx: mpsc::Sender<QueuedNotification>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<A> std::fmt::Debug for PushEngine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PushEngine").finish_non_exhaustive()
    }
}

impl<A: PushApi> PushEngine<A> {
    pub fn new(
        api: Arc<A>,
        tech: Arc<TechSpace>,
        account_key: PrivateKey,
        config: PushConfig,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            api,
            tech,
            account_key,
            config,
            token: Mutex::new(TokenState::default()),
            created: Mutex::new(HashSet::new()),
        });
        // Sticky wake channel: a pending wake-up already covers any number
        // of further requests.
        let (wake_tx, mut wake_rx) = mpsc::channel(1);
        let (queue_tx, mut queue_rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();

        let control = {
            let inner = inner.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut changes = inner.tech.subscribe();
                let mut timer = tokio::time::interval(inner.config.sync_interval);
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        _ = wake_rx.recv() => (),
                        result = changes.changed() => {
                            if result.is_err() {
                                break;
                            }
                        }
                        _ = timer.tick() => (),
                    }
                    inner.pass().await;
                }
            })
        };
        let delivery = {
            let inner = inner.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        notification = queue_rx.recv() => {
                            match notification {
                                Some(notification) => {
                                    inner.deliver(&shutdown, notification).await;
                                }
                                None => break,
                            }
                        }
                    }
                }
            })
        };

        Self {
            inner,
            wake_tx,
            queue_tx,
            shutdown,
            tasks: Mutex::new(vec![control, delivery]),
        }
    }

    /// Stores the device token and wakes the control loop to register it.
    pub fn register_token(&self, platform: Platform, token: impl Into<String>) {
        {
            let mut state = self.inner.token.lock().expect("token mutex poisoned");
            state.token = Some((platform, token.into()));
            state.registered = false;
        }
        self.wake();
    }

    /// Seals a payload for a space and queues it for delivery.
    pub async fn notify(
        &self,
        space_id: SpaceId,
        topics: &[String],
        payload: &[u8],
    ) -> Result<(), PushError> {
        let material = self
            .inner
            .tech
            .view(&space_id)
            .and_then(|view| view.push_keys)
            .ok_or(PushError::MissingKeys(space_id))?;

        let keys = derive_space_keys(&material);
        let notification = QueuedNotification {
            topics: make_topics(&keys.signing_key, topics),
            message: seal_message(&keys, &self.inner.account_key, payload)?,
        };
        self.queue_tx
            .send(notification)
            .await
            .map_err(|_| PushError::Closed)
    }

    fn wake(&self) {
        self.wake_tx.try_send(()).ok();
    }

    pub async fn close(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .expect("tasks mutex poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            task.await.ok();
        }
    }
}
