//! Transport abstraction (C3): the single capability the core actually
//! consumes — "send bytes to an opaque address" and "receive bytes with
//! their source address" — plus the transport-capability flags the
//! negotiator reports to callers.

use async_trait::async_trait;
use thiserror::Error;

use super::address::NetAddress;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no send path available: {0}")]
    Unavailable(String),
    #[error("packet exceeds the carrier's maximum size")]
    Oversize,
}

/// Abstract outbound packet sink. A concrete UDP/TCP/SOCKS5/Tor adapter
/// implements this; the core never downcasts to a concrete socket type.
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn send_to(&self, bytes: &[u8], dest: &NetAddress) -> Result<(), TransportError>;
}

/// Abstract inbound packet source.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Receive the next datagram and its source address. Returns `None`
    /// when the source is permanently closed.
    async fn recv_from(&mut self) -> Option<(Vec<u8>, NetAddress)>;
}

/// A sink that has no usable send path at all (e.g. UDP disabled, no TCP
/// port configured, proxy host empty). Every call fails with
/// `TransportUnavailable` rather than silently succeeding.
pub struct NullSink;

#[async_trait]
impl PacketSink for NullSink {
    async fn send_to(&self, _bytes: &[u8], _dest: &NetAddress) -> Result<(), TransportError> {
        Err(TransportError::Unavailable(
            "no UDP or TCP transport configured".into(),
        ))
    }
}

/// Read-only security posture of the negotiated transport, exposed to
/// callers that want to display or log what protection is in effect.
#[derive(Debug, Clone)]
pub struct TransportSecurityInfo {
    pub transport_kind: &'static str,
    pub noise_ik_enabled: bool,
    pub legacy_fallback_enabled: bool,
    pub supported_versions: Vec<&'static str>,
}
