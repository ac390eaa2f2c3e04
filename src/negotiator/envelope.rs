//! Wire framing: the handshake envelope and the encrypted application
//! envelope.
//!
//! Handshake envelope: `version_tag(1) ‖ handshake_nonce(32) ‖
//! timestamp_le(8) ‖ noise_message_bytes`.
//!
//! Encrypted application envelope: `inner_nonce(24) ‖ AEAD ciphertext`
//! for the legacy protocol, whose session key is a static DH-derived
//! secret rather than a Noise transport state. A Noise-IK session's
//! `TransportState` manages its own internal nonce counter (matching the
//! data model's "independent counters" Session description) and so
//! carries no separate nonce prefix on the wire — see DESIGN.md for this
//! resolved ambiguity.

use super::version::ProtocolVersion;
use crate::crypto::NONCE_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeError {
    Truncated,
    UnknownVersionTag,
}

/// The first packet exchanged between two peers that have not yet
/// established a session: carries the negotiated-protocol tag, a fresh
/// handshake nonce, a timestamp for freshness checking, and the
/// embedded Noise (or legacy) handshake message.
#[derive(Debug, Clone)]
pub struct HandshakeEnvelope {
    pub version: ProtocolVersion,
    pub handshake_nonce: [u8; 32],
    pub timestamp: u64,
    pub message: Vec<u8>,
}

impl HandshakeEnvelope {
    fn version_tag(version: ProtocolVersion) -> u8 {
        match version {
            ProtocolVersion::Legacy => 0,
            ProtocolVersion::NoiseIk => 1,
        }
    }

    fn version_from_tag(tag: u8) -> Option<ProtocolVersion> {
        match tag {
            0 => Some(ProtocolVersion::Legacy),
            1 => Some(ProtocolVersion::NoiseIk),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32 + 8 + self.message.len());
        out.push(Self::version_tag(self.version));
        out.extend_from_slice(&self.handshake_nonce);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.message);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() < 1 + 32 + 8 {
            return Err(EnvelopeError::Truncated);
        }
        let version =
            Self::version_from_tag(bytes[0]).ok_or(EnvelopeError::UnknownVersionTag)?;
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&bytes[1..33]);
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[33..41]);
        let timestamp = u64::from_le_bytes(ts_bytes);
        let message = bytes[41..].to_vec();
        Ok(HandshakeEnvelope {
            version,
            handshake_nonce: nonce,
            timestamp,
            message,
        })
    }
}

/// Frame a legacy-protocol application payload as `nonce ‖ ciphertext`.
pub fn frame_legacy_payload(nonce: &[u8; NONCE_BYTES], ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(ciphertext);
    out
}

/// Split a legacy-protocol wire payload back into its nonce and
/// ciphertext.
pub fn unframe_legacy_payload(bytes: &[u8]) -> Result<([u8; NONCE_BYTES], &[u8]), EnvelopeError> {
    if bytes.len() < NONCE_BYTES {
        return Err(EnvelopeError::Truncated);
    }
    let mut nonce = [0u8; NONCE_BYTES];
    nonce.copy_from_slice(&bytes[..NONCE_BYTES]);
    Ok((nonce, &bytes[NONCE_BYTES..]))
}
