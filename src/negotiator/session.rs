//! Session table: peer public key → [`Session`], with lifecycle
//! `Handshaking → Established → Expired`.

use std::collections::HashMap;

use crate::crypto::PublicKey;
use crate::noise::Cipher;

use super::version::ProtocolVersion;

/// How long an established session may sit idle before it expires and
/// is removed from the table.
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 5 * 60;

/// How long a handshake may remain incomplete before it is abandoned.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    Handshaking,
    Established,
    Expired,
}

/// The keying material backing a session's encrypt/decrypt operations.
/// `Legacy` sessions use a static DH-derived key with explicit
/// application-level nonces; `NoiseIk` sessions use the duplex cipher
/// pair the Noise engine produced, whose nonces are internal counters.
pub enum SessionCrypto {
    Legacy { shared_key: [u8; 32] },
    NoiseIk { send: Cipher, recv: Cipher },
}

/// A per-peer encryption context after a completed handshake.
pub struct Session {
    pub peer_pk: PublicKey,
    pub local_pk: PublicKey,
    pub crypto: SessionCrypto,
    pub handshake_nonce: [u8; 32],
    pub created_at: u64,
    pub last_active_at: u64,
    pub negotiated_version: ProtocolVersion,
    pub lifecycle: SessionLifecycle,
}

impl Session {
    pub fn is_usable(&self) -> bool {
        matches!(self.lifecycle, SessionLifecycle::Established)
    }

    pub fn touch(&mut self, now: u64) {
        self.last_active_at = now;
    }

    pub fn is_idle(&self, now: u64) -> bool {
        now.saturating_sub(self.last_active_at) > SESSION_IDLE_TIMEOUT_SECS
    }
}

/// Owns every established/in-progress session, keyed by peer public
/// key.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<PublicKey, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &PublicKey) -> Option<&Session> {
        self.sessions.get(peer)
    }

    pub fn get_mut(&mut self, peer: &PublicKey) -> Option<&mut Session> {
        self.sessions.get_mut(peer)
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.peer_pk, session);
    }

    pub fn remove(&mut self, peer: &PublicKey) -> Option<Session> {
        self.sessions.remove(peer)
    }

    pub fn contains(&self, peer: &PublicKey) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Remove every session idle longer than [`SESSION_IDLE_TIMEOUT_SECS`],
    /// returning the peers that were expired.
    pub fn expire_idle(&mut self, now: u64) -> Vec<PublicKey> {
        let expired: Vec<PublicKey> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_usable() && s.is_idle(now))
            .map(|(pk, _)| *pk)
            .collect();
        for pk in &expired {
            self.sessions.remove(pk);
        }
        expired
    }

    /// Resolve concurrent handshake attempts from both sides
    /// deterministically: the peer with the lexicographically smaller
    /// public key keeps the initiator role.
    pub fn should_remain_initiator(local_pk: &PublicKey, peer_pk: &PublicKey) -> bool {
        local_pk.0 < peer_pk.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(byte: u8) -> PublicKey {
        PublicKey([byte; 32])
    }

    fn dummy_session(peer: PublicKey, local: PublicKey, last_active_at: u64) -> Session {
        Session {
            peer_pk: peer,
            local_pk: local,
            crypto: SessionCrypto::Legacy {
                shared_key: [0u8; 32],
            },
            handshake_nonce: [0u8; 32],
            created_at: 0,
            last_active_at,
            negotiated_version: ProtocolVersion::Legacy,
            lifecycle: SessionLifecycle::Established,
        }
    }

    #[test]
    fn idle_sessions_are_expired() {
        let mut table = SessionTable::new();
        table.insert(dummy_session(pk(1), pk(2), 0));
        let expired = table.expire_idle(SESSION_IDLE_TIMEOUT_SECS + 1);
        assert_eq!(expired, vec![pk(1)]);
        assert!(table.get(&pk(1)).is_none());
    }

    #[test]
    fn fresh_sessions_are_not_expired() {
        let mut table = SessionTable::new();
        table.insert(dummy_session(pk(1), pk(2), 100));
        let expired = table.expire_idle(100 + SESSION_IDLE_TIMEOUT_SECS - 1);
        assert!(expired.is_empty());
        assert!(table.get(&pk(1)).is_some());
    }

    #[test]
    fn smaller_public_key_remains_initiator() {
        assert!(SessionTable::should_remain_initiator(&pk(1), &pk(2)));
        assert!(!SessionTable::should_remain_initiator(&pk(9), &pk(2)));
    }
}
