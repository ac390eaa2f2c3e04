//! Opaque network addresses.
//!
//! The core never depends on a concrete socket type; every peer address
//! is one of a fixed set of network families, each carrying enough
//! information to round-trip and to be compared and hashed. Concrete
//! socket binding, SOCKS5 proxying, and Tor/I2P/Nym adapters are external
//! collaborators that produce and consume these values — this module
//! only parses, serializes, and classifies them.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is malformed")]
    Malformed,
    #[error("address network family is not recognized")]
    UnknownFamily,
    #[error("link-local IPv6 addresses are rejected")]
    LinkLocalRejected,
}

/// The network family a [`NetAddress`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetFamily {
    Ipv4,
    Ipv6,
    TorOnion,
    I2p,
    Nym,
}

/// An opaque, hashable peer address. Round-trips through
/// [`NetAddress::serialize`] / [`NetAddress::deserialize`] for the two
/// families (IPv4, IPv6) the internal wire format fixes; the overlay
/// address families carry their native textual form since no single
/// binary layout is shared between Tor, I2P, and Nym.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetAddress {
    V4 { ip: Ipv4Addr, port: u16 },
    V6 { ip: Ipv6Addr, port: u16 },
    TorOnion { address: String, port: u16 },
    I2p { address: String, port: u16 },
    Nym { address: String, port: u16 },
}

impl NetAddress {
    pub fn family(&self) -> NetFamily {
        match self {
            NetAddress::V4 { .. } => NetFamily::Ipv4,
            NetAddress::V6 { .. } => NetFamily::Ipv6,
            NetAddress::TorOnion { .. } => NetFamily::TorOnion,
            NetAddress::I2p { .. } => NetFamily::I2p,
            NetAddress::Nym { .. } => NetFamily::Nym,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            NetAddress::V4 { port, .. }
            | NetAddress::V6 { port, .. }
            | NetAddress::TorOnion { port, .. }
            | NetAddress::I2p { port, .. }
            | NetAddress::Nym { port, .. } => *port,
        }
    }

    /// True for RFC1918 / unique-local / loopback space: not directly
    /// dialable from outside the host's own network.
    pub fn is_private(&self) -> bool {
        match self {
            NetAddress::V4 { ip, .. } => {
                ip.is_private() || ip.is_loopback() || ip.is_link_local()
            }
            NetAddress::V6 { ip, .. } => ip.is_loopback() || (ip.segments()[0] & 0xfe00) == 0xfc00,
            _ => false,
        }
    }

    /// True when reaching this address requires an external proxy (Tor,
    /// I2P, Nym) rather than a direct or NAT-traversed socket.
    pub fn requires_proxy(&self) -> bool {
        matches!(
            self.family(),
            NetFamily::TorOnion | NetFamily::I2p | NetFamily::Nym
        )
    }

    /// True when this address is a plain clearnet address eligible for
    /// UDP hole punching / NAT traversal.
    pub fn supports_nat_traversal(&self) -> bool {
        matches!(self.family(), NetFamily::Ipv4 | NetFamily::Ipv6) && !self.is_private()
    }

    /// Canonical internal serialization: `ip ‖ port_be` for IPv4 (6
    /// bytes total) and IPv6 (18 bytes total). Overlay families are not
    /// representable in this fixed binary form and return `None`.
    pub fn serialize(&self) -> Option<Vec<u8>> {
        match self {
            NetAddress::V4 { ip, port } => {
                let mut out = Vec::with_capacity(6);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_be_bytes());
                Some(out)
            }
            NetAddress::V6 { ip, port } => {
                let mut out = Vec::with_capacity(18);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_be_bytes());
                Some(out)
            }
            _ => None,
        }
    }

    pub fn deserialize_v4(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != 6 {
            return Err(AddressError::Malformed);
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = u16::from_be_bytes([bytes[4], bytes[5]]);
        Ok(NetAddress::V4 { ip, port })
    }

    pub fn deserialize_v6(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != 18 {
            return Err(AddressError::Malformed);
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&bytes[..16]);
        let ip = Ipv6Addr::from(octets);
        if ip.segments()[0] & 0xffc0 == 0xfe80 {
            return Err(AddressError::LinkLocalRejected);
        }
        let port = u16::from_be_bytes([bytes[16], bytes[17]]);
        Ok(NetAddress::V6 { ip, port })
    }

    /// Parse a textual address: dotted-quad/bracketed-IPv6 host:port,
    /// a 56-char base32 Tor v3 onion address, an I2P base32 address, or
    /// a Nym gateway address.
    pub fn parse(text: &str, default_family_hint: Option<NetFamily>) -> Result<Self, AddressError> {
        let _ = default_family_hint;
        if let Some(rest) = text.strip_suffix(".onion").map(|_| text) {
            return Self::parse_suffixed(rest, ".onion", |addr, port| {
                if addr.len() != 56 || !addr.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
                    return Err(AddressError::Malformed);
                }
                Ok(NetAddress::TorOnion {
                    address: addr.to_string(),
                    port,
                })
            });
        }
        if text.contains(".b32.i2p") {
            return Self::parse_suffixed(text, ".b32.i2p", |addr, port| {
                Ok(NetAddress::I2p {
                    address: addr.to_string(),
                    port,
                })
            });
        }
        if text.contains(".clients.nym") {
            return Self::parse_suffixed(text, ".clients.nym", |addr, port| {
                Ok(NetAddress::Nym {
                    address: addr.to_string(),
                    port,
                })
            });
        }
        Self::parse_ip(text)
    }

    fn parse_suffixed(
        text: &str,
        suffix: &str,
        build: impl FnOnce(&str, u16) -> Result<Self, AddressError>,
    ) -> Result<Self, AddressError> {
        let (host_part, port) = split_host_port(text)?;
        let addr = host_part
            .strip_suffix(suffix)
            .ok_or(AddressError::Malformed)?;
        build(addr, port)
    }

    fn parse_ip(text: &str) -> Result<Self, AddressError> {
        let (host, port) = split_host_port(text)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(NetAddress::V4 { ip, port });
        }
        if let Ok(ip) = host.parse::<Ipv6Addr>() {
            if ip.segments()[0] & 0xffc0 == 0xfe80 {
                return Err(AddressError::LinkLocalRejected);
            }
            return Ok(NetAddress::V6 { ip, port });
        }
        Err(AddressError::UnknownFamily)
    }
}

fn split_host_port(text: &str) -> Result<(&str, u16), AddressError> {
    let idx = text.rfind(':').ok_or(AddressError::Malformed)?;
    let (host, port_str) = text.split_at(idx);
    let port: u16 = port_str[1..].parse().map_err(|_| AddressError::Malformed)?;
    Ok((host, port))
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddress::V4 { ip, port } => write!(f, "{ip}:{port}"),
            NetAddress::V6 { ip, port } => write!(f, "[{ip}]:{port}"),
            NetAddress::TorOnion { address, port } => write!(f, "{address}.onion:{port}"),
            NetAddress::I2p { address, port } => write!(f, "{address}.b32.i2p:{port}"),
            NetAddress::Nym { address, port } => write!(f, "{address}.clients.nym:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trip_preserves_port() {
        let addr = NetAddress::V4 {
            ip: Ipv4Addr::new(192, 168, 1, 7),
            port: 33445,
        };
        let bytes = addr.serialize().unwrap();
        assert_eq!(bytes.len(), 6);
        let back = NetAddress::deserialize_v4(&bytes).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn v6_round_trip_preserves_port() {
        let addr = NetAddress::V6 {
            ip: "2001:db8::1".parse().unwrap(),
            port: 443,
        };
        let bytes = addr.serialize().unwrap();
        assert_eq!(bytes.len(), 18);
        let back = NetAddress::deserialize_v6(&bytes).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn link_local_v6_is_rejected() {
        let err = NetAddress::parse("[fe80::1]:1234", None).unwrap_err();
        assert_eq!(err, AddressError::LinkLocalRejected);
    }

    #[test]
    fn parses_onion_v3() {
        let onion = "a".repeat(56);
        let text = format!("{onion}.onion:443");
        let addr = NetAddress::parse(&text, None).unwrap();
        assert_eq!(addr.family(), NetFamily::TorOnion);
        assert!(addr.requires_proxy());
    }

    #[test]
    fn parses_i2p_and_nym() {
        let i2p = NetAddress::parse("abcdefgh.b32.i2p:80", None).unwrap();
        assert_eq!(i2p.family(), NetFamily::I2p);
        let nym = NetAddress::parse("gw1.clients.nym:1789", None).unwrap();
        assert_eq!(nym.family(), NetFamily::Nym);
    }

    #[test]
    fn parses_plain_ipv4() {
        let addr = NetAddress::parse("127.0.0.1:33445", None).unwrap();
        assert_eq!(addr.family(), NetFamily::Ipv4);
        assert!(addr.is_private());
    }

    proptest::proptest! {
        #[test]
        fn v4_serialize_round_trips_for_any_octets_and_port(
            octets in proptest::prelude::any::<[u8; 4]>(),
            port in proptest::prelude::any::<u16>(),
        ) {
            let addr = NetAddress::V4 { ip: Ipv4Addr::from(octets), port };
            let back = NetAddress::deserialize_v4(&addr.serialize().unwrap()).unwrap();
            proptest::prop_assert_eq!(addr, back);
        }

        #[test]
        fn v6_serialize_round_trips_for_any_non_link_local_address(
            segments in proptest::prelude::any::<[u16; 8]>(),
            port in proptest::prelude::any::<u16>(),
        ) {
            // fe80::/10 is rejected by deserialize_v6, so constrain the
            // first segment's top bits away from that range.
            let mut segments = segments;
            if segments[0] & 0xffc0 == 0xfe80 {
                segments[0] ^= 0x0040;
            }
            let addr = NetAddress::V6 { ip: Ipv6Addr::from(segments), port };
            let back = NetAddress::deserialize_v6(&addr.serialize().unwrap()).unwrap();
            proptest::prop_assert_eq!(addr, back);
        }
    }
}
