// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local peer discovery.
//!
//! Announces the local node via mDNS on every eligible interface and feeds
//! discovered peers to an injected notifier. Interface eligibility and the
//! announcement order live in [`addrs`], the responder in [`mdns`]. The
//! [`hooks`] registry classifies whether peer-to-peer connections are
//! possible at all, and [`port`] persists the server port across restarts.
pub mod addrs;
pub mod hooks;
pub mod mdns;
pub mod port;

pub use addrs::{
    INTERFACE_PRIORITY, Interface, InterfaceAddr, InterfaceProvider, SystemInterfaces,
    eligible_interfaces, p2p_possible,
};
pub use hooks::{HookRegistry, P2pStatus};
pub use mdns::dns::{PeerAnnouncement, SERVICE_TYPE};
pub use mdns::{DiscoveredPeer, DiscoveryConfig, DiscoveryError, LocalDiscovery, PeerNotifier};
pub use port::{PortError, server_port};
