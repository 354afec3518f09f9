// SPDX-License-Identifier: MIT OR Apache-2.0

//! mDNS responder and browser for local peer discovery.
//!
//! One background actor owns the multicast socket. It answers PTR queries
//! for the service with our own announcement, queries for other instances
//! once a second and rereads the interface list every five seconds or when
//! the network monitor reports a change. Discovered peers are handed to the
//! injected notifier; our own announcements are filtered out by peer ID.
pub mod dns;
mod socket;

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hearth_core::ids::PeerId;
use hickory_proto::rr::Name;
use n0_watcher::Watcher as _;
use netwatch::netmon::Monitor;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, Receiver};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::addrs::{InterfaceProvider, announced_ips, eligible_interfaces, p2p_possible};
use crate::hooks::HookRegistry;
use crate::mdns::dns::{
    MulticastDnsMessage, PeerAnnouncement, make_query, make_response, parse_message, service_name,
};
use crate::mdns::socket::{send, socket_v4};

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("network monitor: {0}")]
    Monitor(String),
}

/// A peer announced on the local network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub peer_id: PeerId,
    /// `ip:port` strings taken from the peer's announcement.
    pub addrs: Vec<String>,
}

/// Receives discovered peers together with our own announced addresses.
pub trait PeerNotifier: Send + Sync + 'static {
    fn peer_found(&self, peer: DiscoveredPeer, own_addrs: &[String], own_port: u16);
}

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub peer_id: PeerId,
    pub port: u16,
    pub refresh_interval: Duration,
    pub query_interval: Duration,
}

impl DiscoveryConfig {
    pub fn new(peer_id: PeerId, port: u16) -> Self {
        Self {
            peer_id,
            port,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            query_interval: DEFAULT_QUERY_INTERVAL,
        }
    }
}

enum ToDiscoveryActor {
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle on the discovery actor.
pub struct LocalDiscovery {
    tx: mpsc::Sender<ToDiscoveryActor>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LocalDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("LocalDiscovery").finish_non_exhaustive()
    }
}

/// Create a new network monitor and forward interface state changes.
async fn network_monitor() -> Result<Receiver<bool>, DiscoveryError> {
    let monitor = Monitor::new()
        .await
        .map_err(|err| DiscoveryError::Monitor(err.to_string()))?;
    let (change_tx, change_rx) = mpsc::channel(8);
    tokio::spawn(async move {
        // The watched state lives inside the monitor, so the monitor moves
        // into the forwarding task and is dropped once the receiver goes.
        let mut state = monitor.interface_state();
        while state.updated().await.is_ok() {
            debug!("detected network interface change");
            if change_tx.send(true).await.is_err() {
                break;
            }
        }
    });

    Ok(change_rx)
}

impl LocalDiscovery {
    pub async fn spawn<P, N>(
        config: DiscoveryConfig,
        provider: Arc<P>,
        notifier: Arc<N>,
        hooks: Arc<HookRegistry>,
    ) -> Result<Self, DiscoveryError>
    where
        P: InterfaceProvider,
        N: PeerNotifier,
    {
        let interface_change_rx = network_monitor().await?;
        let (tx, rx) = mpsc::channel(16);

        let actor = DiscoveryActor {
            config,
            provider,
            notifier,
            hooks,
            service: service_name(),
            inbox: rx,
            interface_change_rx,
            socket: None,
            ips: Vec::new(),
        };
        let task = tokio::spawn(actor.run());

        Ok(Self {
            tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Shuts the responder down, waiting at most one second before the
    /// actor is aborted.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(ToDiscoveryActor::Shutdown { reply }).await.is_ok()
            && tokio::time::timeout(CLOSE_TIMEOUT, done).await.is_ok()
        {
            return;
        }
        if let Some(task) = self.task.lock().expect("task mutex poisoned").take() {
            warn!("mdns responder did not stop in time, aborting");
            task.abort();
        }
    }
}

struct DiscoveryActor<P, N> {
    config: DiscoveryConfig,
    provider: Arc<P>,
    notifier: Arc<N>,
    hooks: Arc<HookRegistry>,
    service: Name,
    inbox: mpsc::Receiver<ToDiscoveryActor>,
    interface_change_rx: Receiver<bool>,
    socket: Option<UdpSocket>,
    ips: Vec<Ipv4Addr>,
}

impl<P, N> DiscoveryActor<P, N>
where
    P: InterfaceProvider,
    N: PeerNotifier,
{
    async fn run(mut self) {
        let mut refresh = tokio::time::interval(self.config.refresh_interval);
        let mut query = tokio::time::interval(self.config.query_interval);
        let mut buf = [0; 1472];

        loop {
            tokio::select! {
                biased;
                msg = self.inbox.recv() => {
                    match msg {
                        Some(ToDiscoveryActor::Shutdown { reply }) => {
                            reply.send(()).ok();
                            break;
                        }
                        None => break,
                    }
                }
                Some(true) = self.interface_change_rx.recv() => {
                    self.refresh(true);
                }
                _ = refresh.tick() => {
                    self.refresh(false);
                }
                recv = recv_packet(&self.socket, &mut buf) => {
                    match recv {
                        Ok(len) => self.handle_packet(&buf[..len]).await,
                        Err(err) => {
                            warn!("mdns socket receive failed: {err}");
                            self.socket = None;
                        }
                    }
                }
                _ = query.tick() => {
                    if let Some(socket) = &self.socket {
                        send(socket, make_query(&self.service)).await;
                    }
                }
            }
        }
    }

    /// Rereads the interface list; when the announced address set changed
    /// (or a network change was reported) the responder restarts on a fresh
    /// socket.
    fn refresh(&mut self, force: bool) {
        let interfaces = self.provider.interfaces();
        self.hooks.update(p2p_possible(&interfaces));

        let ips = announced_ips(&eligible_interfaces(interfaces));
        if !force && ips == self.ips && self.socket.is_some() {
            return;
        }
        self.ips = ips;
        self.socket = match socket_v4() {
            Ok(socket) => {
                debug!(addrs = self.ips.len(), "mdns responder restarted");
                Some(socket)
            }
            Err(err) => {
                warn!("failed to bind mdns socket: {err}");
                None
            }
        };
    }

    async fn handle_packet(&mut self, bytes: &[u8]) {
        let Some(message) = parse_message(bytes) else {
            return;
        };
        match message {
            MulticastDnsMessage::Query(name) => {
                if name != self.service || self.ips.is_empty() {
                    return;
                }
                let announcement = PeerAnnouncement {
                    peer_id: self.config.peer_id,
                    port: self.config.port,
                    ips: self.ips.clone(),
                };
                if let Some(socket) = &self.socket {
                    send(socket, make_response(&self.service, &announcement)).await;
                }
            }
            MulticastDnsMessage::Response(announcements) => {
                let own_addrs = own_addrs(&self.ips, self.config.port);
                for peer in
                    peers_from_announcements(self.config.peer_id, announcements)
                {
                    self.notifier
                        .peer_found(peer, &own_addrs, self.config.port);
                }
            }
        }
    }
}

async fn recv_packet(socket: &Option<UdpSocket>, buf: &mut [u8]) -> std::io::Result<usize> {
    match socket {
        Some(socket) => socket.recv(buf).await,
        None => std::future::pending().await,
    }
}

fn own_addrs(ips: &[Ipv4Addr], port: u16) -> Vec<String> {
    ips.iter().map(|ip| format!("{ip}:{port}")).collect()
}

/// Turns parsed announcements into discovered peers, dropping our own
/// instance.
fn peers_from_announcements(
    own_peer_id: PeerId,
    announcements: Vec<PeerAnnouncement>,
) -> Vec<DiscoveredPeer> {
    announcements
        .into_iter()
        .filter(|announcement| announcement.peer_id != own_peer_id)
        .map(|announcement| DiscoveredPeer {
            peer_id: announcement.peer_id,
            addrs: announcement
                .ips
                .iter()
                .map(|ip| format!("{ip}:{}", announcement.port))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use hearth_core::identity::PrivateKey;
    use hearth_core::ids::PeerId;

    use super::dns::PeerAnnouncement;
    use super::{own_addrs, peers_from_announcements};

    fn peer() -> PeerId {
        PeerId::from(PrivateKey::new().public_key())
    }

    #[test]
    fn own_announcements_are_skipped() {
        let me = peer();
        let other = peer();
        let announcements = vec![
            PeerAnnouncement {
                peer_id: me,
                port: 4006,
                ips: vec![Ipv4Addr::new(192, 168, 1, 5)],
            },
            PeerAnnouncement {
                peer_id: other,
                port: 4010,
                ips: vec![Ipv4Addr::new(192, 168, 1, 7), Ipv4Addr::new(10, 0, 0, 3)],
            },
        ];

        let peers = peers_from_announcements(me, announcements);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, other);
        assert_eq!(peers[0].addrs, vec!["192.168.1.7:4010", "10.0.0.3:4010"]);
    }

    #[test]
    fn own_addresses_carry_the_server_port() {
        let addrs = own_addrs(
            &[Ipv4Addr::new(192, 168, 1, 5), Ipv4Addr::new(10, 0, 0, 2)],
            4006,
        );
        assert_eq!(addrs, vec!["192.168.1.5:4006", "10.0.0.2:4006"]);
    }
}
