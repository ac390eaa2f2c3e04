//! Host-supplied configuration (C10 ambient stack): the knobs a host
//! application sets before constructing a [`crate::tox::Tox`]. Concrete
//! socket binding, SOCKS5 proxying, and Tor/I2P/Nym adapters are
//! external collaborators; this module only carries the values they
//! need, the same way [`crate::transport`] carries addresses without
//! touching a socket type.

use serde::{Deserialize, Serialize};

/// Proxy configuration for reaching the DHT/friends when direct UDP/TCP
/// is unavailable or undesired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyConfig {
    None,
    Socks5 { host: String, port: u16, user: Option<String>, pass: Option<String> },
    Http { host: String, port: u16, user: Option<String>, pass: Option<String> },
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig::None
    }
}

/// How to seed identity and friend state at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SaveDataOption {
    /// Generate a fresh identity.
    None,
    /// Restore only the long-term secret key, with an empty friend list.
    SecretKey([u8; 32]),
    /// Restore a full savedata blob, as produced by
    /// [`crate::tox::Tox::get_savedata`].
    FullSave(Vec<u8>),
}

impl Default for SaveDataOption {
    fn default() -> Self {
        SaveDataOption::None
    }
}

/// Construction-time options for a [`crate::tox::Tox`] instance.
///
/// A configuration that merely describes an absent capability (UDP
/// disabled, TCP port zero, empty proxy host) never fails construction;
/// absence only surfaces as [`crate::transport::TransportError::Unavailable`]
/// on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToxOptions {
    pub udp_enabled: bool,
    pub ipv6_enabled: bool,
    pub tcp_port: u16,
    pub start_port: u16,
    pub end_port: u16,
    pub local_discovery: bool,
    pub proxy: ProxyConfig,
    pub min_bootstrap_nodes: u32,
    pub savedata: SaveDataOption,
}

impl Default for ToxOptions {
    fn default() -> Self {
        ToxOptions {
            udp_enabled: true,
            ipv6_enabled: true,
            tcp_port: 0,
            start_port: 33445,
            end_port: 33545,
            local_discovery: true,
            proxy: ProxyConfig::None,
            min_bootstrap_nodes: 4,
            savedata: SaveDataOption::None,
        }
    }
}
