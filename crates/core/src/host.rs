//! Host facts used to build a node identity.

use std::net::{IpAddr, UdpSocket};

/// Where systemd-based hosts keep their stable machine identifier.
pub const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Read the stable machine id, trimmed. `None` when unavailable or empty.
pub fn machine_id() -> Option<String> {
    std::fs::read_to_string(MACHINE_ID_PATH)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The host name reported by the operating system, trimmed. `None` when
/// unavailable, empty or not valid UTF-8.
pub fn hostname() -> Option<String> {
    ::hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The local address the OS would use for outbound IPv4 traffic.
///
/// Connecting a UDP socket sends no packets; it only resolves a route.
pub fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_not_empty() {
        let name = hostname().expect("host should report a name");
        assert!(!name.is_empty());
        assert!(!name.contains('\0'));
        assert_eq!(name, name.trim());
    }
}
