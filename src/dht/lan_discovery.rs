//! LAN discovery: best-effort local-subnet broadcast of our DHT
//! public key on `base_port + 1`. Port conflicts silently disable it
//! rather than failing the process.

use crate::crypto::PublicKey;

/// LAN discovery payload: `public_key(32) ‖ dht_port_be(2)`.
pub fn build_announcement(public_key: &PublicKey, dht_port: u16) -> [u8; 34] {
    let mut out = [0u8; 34];
    out[..32].copy_from_slice(&public_key.0);
    out[32..].copy_from_slice(&dht_port.to_be_bytes());
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanAnnouncementError {
    Truncated,
}

/// Parse an inbound LAN discovery broadcast into `(sender_pk,
/// sender_dht_port)`.
pub fn parse_announcement(bytes: &[u8]) -> Result<(PublicKey, u16), LanAnnouncementError> {
    if bytes.len() != 34 {
        return Err(LanAnnouncementError::Truncated);
    }
    let mut pk = [0u8; 32];
    pk.copy_from_slice(&bytes[..32]);
    let port = u16::from_be_bytes([bytes[32], bytes[33]]);
    Ok((PublicKey(pk), port))
}

/// The broadcast port LAN discovery sends on, relative to the DHT's
/// own listening port.
pub fn broadcast_port(base_port: u16) -> u16 {
    base_port.wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_round_trips() {
        let pk = PublicKey([42u8; 32]);
        let bytes = build_announcement(&pk, 33446);
        let (parsed_pk, parsed_port) = parse_announcement(&bytes).unwrap();
        assert_eq!(parsed_pk, pk);
        assert_eq!(parsed_port, 33446);
    }

    #[test]
    fn truncated_announcement_is_rejected() {
        assert_eq!(parse_announcement(&[0u8; 10]), Err(LanAnnouncementError::Truncated));
    }

    #[test]
    fn broadcast_port_is_base_plus_one() {
        assert_eq!(broadcast_port(33445), 33446);
    }
}
