// src/mcast.rs
use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Publishing socket: egress pinned to `iface_addr`, connected to the group
/// so the hot path is a plain `send()`.
pub fn publisher(iface_addr: Ipv4Addr, group: Ipv4Addr, port: u16) -> anyhow::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;
    sock.set_multicast_if_v4(&iface_addr).context("set_multicast_if_v4")?;
    sock.set_multicast_loop_v4(true).ok();
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    sock.bind(&bind_addr.into()).context("bind")?;
    let s: UdpSocket = sock.into();
    s.connect(SocketAddrV4::new(group, port)).context("connect multicast group")?;
    s.set_nonblocking(true).context("set nonblocking")?;
    Ok(s)
}

/// Subscribing socket: wildcard-bound on `port`, IGMP-joined to `group` on
/// `iface_addr`, sized to tolerate bursts, non-blocking for busy-spin recv.
pub fn subscriber(
    iface_addr: Ipv4Addr,
    group: Ipv4Addr,
    port: u16,
    recv_buffer_bytes: u32,
) -> anyhow::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;

    sock.set_reuse_address(true).ok();
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    sock.set_reuse_port(true).ok();

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    sock.bind(&bind_addr.into()).context("bind")?;

    if recv_buffer_bytes > 0 {
        let _ = sock.set_recv_buffer_size(recv_buffer_bytes as usize);
    }

    sock.join_multicast_v4(&group, &iface_addr).context("join_multicast_v4")?;

    let s: UdpSocket = sock.into();
    s.set_nonblocking(true).context("set nonblocking")?;
    Ok(s)
}

pub fn leave(sock: &UdpSocket, group: Ipv4Addr, iface_addr: Ipv4Addr) {
    if let Err(e) = sock.leave_multicast_v4(&group, &iface_addr) {
        log::warn!("leave_multicast_v4 {group} failed: {e}");
    }
}
