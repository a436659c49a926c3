//! Discovery of the host's address on the local network.
//!
//! The room's host has to tell nearby peers where to connect.  When the
//! server is bound to one specific address that address is the answer.  For
//! a wildcard bind (`0.0.0.0`, `::`) the address of the interface the OS
//! would route outbound traffic through is used instead.
//!
//! # How the lookup works (for beginners)
//!
//! Calling `connect` on a UDP socket sends nothing: it only asks the kernel
//! to pick a route to the target and fix the socket's source address.  Reading
//! `local_addr()` afterwards therefore tells us which interface address the
//! machine uses to reach the outside world, without any packet leaving it.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};

use lanchat_core::{ErrorBatch, ErrorCode, Severity};
use tokio::net::UdpSocket;
use tracing::debug;

/// Any globally routable address works; nothing is ever sent to it.
pub const ROUTE_TARGET: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80));

/// The address LAN peers should connect to for a server bound to `bound`.
///
/// A specific `bound` address is returned unchanged.  For a wildcard bind the
/// routing source address is looked up; a failure, or an answer that is only
/// loopback, is recorded in `batch` as a non-critical `local-ip-failure`.
pub async fn discover_local_ip(bound: IpAddr, batch: &mut ErrorBatch) -> Option<IpAddr> {
    if !bound.is_unspecified() {
        return Some(bound);
    }

    match route_source(ROUTE_TARGET).await {
        Ok(ip) => accept_source(ip, batch),
        Err(e) => {
            batch.add(
                ErrorCode::LocalIpFailure,
                Severity::NonCritical,
                format!("Failed to retrieve local IP address: {e}"),
                "local-ip",
            );
            None
        }
    }
}

/// The source address the OS picks for traffic to `target`.
async fn route_source(target: SocketAddr) -> io::Result<IpAddr> {
    let unspecified = match target {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

fn accept_source(ip: IpAddr, batch: &mut ErrorBatch) -> Option<IpAddr> {
    if ip.is_loopback() || ip.is_unspecified() {
        batch.add(
            ErrorCode::LocalIpFailure,
            Severity::NonCritical,
            format!("Failed to retrieve local IP address (only {ip} available)"),
            "local-ip",
        );
        return None;
    }
    debug!(%ip, "local IP discovered");
    Some(ip)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
