use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};

const DISCOVERY_TARGET_IP: &str = "8.8.8.8";
const DISCOVERY_TARGET_PORT: u16 = 80;

/// Poll interval for blocking receives, so loops notice their running flag.
pub const RECV_POLL: Duration = Duration::from_millis(200);

/// Largest datagram we ever expect (one RTP packet).
pub const MAX_DATAGRAM: usize = 65_535;

/// Binds `0.0.0.0:port` in blocking mode with a read timeout.
///
/// # Errors
/// Propagates the OS bind / setsockopt error.
pub fn bind_udp(port: u16, read_timeout: Option<Duration>) -> io::Result<UdpSocket> {
    let sock = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))?;
    sock.set_nonblocking(false)?;
    sock.set_read_timeout(read_timeout)?;
    Ok(sock)
}

/// True for the errors a timed-out blocking read produces.
#[must_use]
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Primary non-loopback IPv4 of this host, found by "connecting" a temporary
/// UDP socket (no packet is sent).
#[must_use]
pub fn discover_local_ipv4() -> Option<Ipv4Addr> {
    let probe = UdpSocket::bind("0.0.0.0:0").ok()?;
    probe
        .connect((DISCOVERY_TARGET_IP, DISCOVERY_TARGET_PORT))
        .ok()?;
    match probe.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// `configured` if set, else the discovered address, else loopback.
#[must_use]
pub fn resolve_local_ipv4(configured: Option<Ipv4Addr>) -> Ipv4Addr {
    configured
        .or_else(discover_local_ipv4)
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn bound_socket_times_out() {
        let sock = bind_udp(0, Some(Duration::from_millis(20))).unwrap();
        let mut buf = [0u8; 16];
        let err = sock.recv_from(&mut buf).unwrap_err();
        assert!(is_timeout(&err), "unexpected error kind: {:?}", err.kind());
    }

    #[test]
    fn configured_address_wins() {
        let ip = Ipv4Addr::new(10, 9, 8, 7);
        assert_eq!(resolve_local_ipv4(Some(ip)), ip);
    }
}
