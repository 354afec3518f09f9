// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::error;

const MDNS_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_PORT: u16 = 5353;

/// Binds the shared mDNS port and joins the IPv4 multicast group.
pub fn socket_v4() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into())?;
    socket.set_multicast_loop_v4(true)?;
    socket.join_multicast_v4(&MDNS_IPV4, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(16)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(std::net::UdpSocket::from(socket))
}

pub async fn send(socket: &UdpSocket, message: Message) {
    let bytes = match message.to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("failed encoding dns message: {err}");
            return;
        }
    };

    if let Err(err) = socket
        .send_to(&bytes, (IpAddr::from(MDNS_IPV4), MDNS_PORT))
        .await
    {
        error!("failed sending mdns message on udp socket: {err}");
    }
}
