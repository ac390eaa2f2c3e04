//! Protocol negotiator (C4): version negotiation, session table,
//! replay protection, encrypted envelope framing, and packet dispatch.
//!
//! This is the seam between "I have a destination public key" (C5/C6)
//! and "encrypted bytes are on the wire" (C3).

mod envelope;
mod legacy;
mod replay;
mod session;
mod version;

pub use envelope::{EnvelopeError, HandshakeEnvelope};
pub use replay::ReplayCache;
pub use session::{
    Session, SessionCrypto, SessionLifecycle, SessionTable, HANDSHAKE_TIMEOUT_SECS,
    SESSION_IDLE_TIMEOUT_SECS,
};
pub use version::{negotiate, ProtocolVersion, VersionOffer};

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::crypto::{KeyPair, PublicKey};
use crate::noise::{check_timestamp_freshness, HandshakeSession, NoiseError};
use crate::rng::Rng;
use crate::time::TimeSource;
use crate::transport::TransportSecurityInfo;

#[derive(Debug, Error)]
pub enum NegotiatorError {
    #[error("no established session with this peer")]
    NoSession,
    #[error("packet failed authentication and was dropped")]
    AuthFailure,
    #[error("plaintext exceeds the negotiator's buffer cap")]
    OversizeMessage,
    #[error("no mutually supported protocol version")]
    UnsupportedVersion,
    #[error("handshake envelope error: {0:?}")]
    Envelope(EnvelopeError),
    #[error("handshake protocol error: {0}")]
    Handshake(#[from] NoiseError),
    #[error("handshake nonce already seen (replay)")]
    ReplayedNonce,
    #[error("handshake timestamp out of the freshness window")]
    StaleHandshake,
}

impl From<EnvelopeError> for NegotiatorError {
    fn from(e: EnvelopeError) -> Self {
        NegotiatorError::Envelope(e)
    }
}

/// Plaintext buffer cap for application payloads carried in an
/// encrypted envelope.
pub const MAX_PLAINTEXT: usize = crate::crypto::MAX_ENCRYPTION_BUFFER;

/// What to do after feeding the negotiator an inbound handshake packet.
pub enum HandshakeStep {
    /// The handshake advanced; send this reply to the peer.
    Reply(Vec<u8>),
    /// The handshake completed; the session is now established and
    /// usable. Nothing further to send.
    Completed,
}

struct PendingHandshake {
    session: HandshakeSession,
    created_at: u64,
}

/// Owns the session table, replay cache, and in-flight handshakes for
/// one local identity.
pub struct Negotiator {
    local: KeyPair,
    offer: VersionOffer,
    sessions: Mutex<SessionTable>,
    replay: Mutex<ReplayCache>,
    pending: Mutex<HashMap<PublicKey, PendingHandshake>>,
}

impl Negotiator {
    pub fn new(local: KeyPair) -> Self {
        Negotiator {
            local,
            offer: VersionOffer::modern(),
            sessions: Mutex::new(SessionTable::new()),
            replay: Mutex::new(ReplayCache::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_public_key(&self) -> PublicKey {
        self.local.public
    }

    pub fn security_info(&self) -> TransportSecurityInfo {
        TransportSecurityInfo {
            transport_kind: "tox-noise-ik",
            noise_ik_enabled: true,
            legacy_fallback_enabled: true,
            supported_versions: vec!["legacy", "noise-ik"],
        }
    }

    pub fn has_session(&self, peer: &PublicKey) -> bool {
        self.sessions
            .lock()
            .get(peer)
            .map(|s| s.is_usable())
            .unwrap_or(false)
    }

    /// Start establishing a session with `peer`. For a `Legacy`-only
    /// peer this completes immediately (the shared key is
    /// non-interactively derivable) and returns `None` — there is
    /// nothing to send. For `NoiseIk` it returns `Some(wire_bytes)`
    /// to transmit as the first handshake packet.
    #[instrument(skip(self, rng, time), fields(peer = ?peer))]
    pub fn initiate(
        &self,
        peer: PublicKey,
        peer_supported: &[ProtocolVersion],
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<Option<Vec<u8>>, NegotiatorError> {
        let version =
            negotiate(&self.offer, peer_supported).ok_or(NegotiatorError::UnsupportedVersion)?;
        match version {
            ProtocolVersion::Legacy => {
                let shared_key = legacy::derive_shared_key(&self.local, &peer);
                let now = time.now();
                self.sessions.lock().insert(Session {
                    peer_pk: peer,
                    local_pk: self.local.public,
                    crypto: SessionCrypto::Legacy { shared_key },
                    handshake_nonce: [0u8; 32],
                    created_at: now,
                    last_active_at: now,
                    negotiated_version: ProtocolVersion::Legacy,
                    lifecycle: SessionLifecycle::Established,
                });
                Ok(None)
            }
            ProtocolVersion::NoiseIk => {
                let (handshake, msg1) = HandshakeSession::initiate_ik(&self.local, &peer, rng, time)?;
                let envelope = HandshakeEnvelope {
                    version: ProtocolVersion::NoiseIk,
                    handshake_nonce: handshake.handshake_nonce(),
                    timestamp: handshake.created_at(),
                    message: msg1,
                };
                let created_at = handshake.created_at();
                self.pending
                    .lock()
                    .insert(peer, PendingHandshake { session: handshake, created_at });
                Ok(Some(envelope.to_bytes()))
            }
        }
    }

    /// Feed an inbound handshake-kind packet to the negotiator.
    ///
    /// `from_hint` should be `Some(peer_pk)` when the caller already
    /// knows which peer this is a reply to (continuing our own
    /// initiator attempt); `None` for an unsolicited inbound handshake
    /// where the peer's identity is only known once the Noise message
    /// is decrypted (we are the responder).
    #[instrument(skip(self, bytes, rng, time), fields(from_hint = ?from_hint))]
    pub fn handle_handshake_packet(
        &self,
        bytes: &[u8],
        from_hint: Option<PublicKey>,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<HandshakeStep, NegotiatorError> {
        let envelope = HandshakeEnvelope::from_bytes(bytes)?;
        if envelope.version != ProtocolVersion::NoiseIk {
            return Err(NegotiatorError::UnsupportedVersion);
        }
        check_timestamp_freshness(envelope.timestamp, time.now())
            .map_err(|_| NegotiatorError::StaleHandshake)?;

        if let Some(peer) = from_hint {
            if self.pending.lock().contains_key(&peer) {
                return self.continue_initiator(peer, &envelope);
            }
        }
        self.accept_as_responder(&envelope, rng, time)
    }

    fn continue_initiator(
        &self,
        peer: PublicKey,
        envelope: &HandshakeEnvelope,
    ) -> Result<HandshakeStep, NegotiatorError> {
        let mut pending = self.pending.lock();
        let mut entry = pending.remove(&peer).ok_or(NegotiatorError::NoSession)?;
        entry.session.read_message(&envelope.message)?;
        if !entry.session.is_complete() {
            pending.insert(peer, entry);
            return Err(NegotiatorError::Handshake(NoiseError::NotComplete));
        }
        drop(pending);
        self.finalize(entry.session, peer)?;
        Ok(HandshakeStep::Completed)
    }

    fn accept_as_responder(
        &self,
        envelope: &HandshakeEnvelope,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<HandshakeStep, NegotiatorError> {
        let mut responder = HandshakeSession::accept_ik(&self.local, rng, time)?;
        responder.read_message(&envelope.message)?;
        let remote_pk = responder
            .get_remote_static_key()
            .ok_or_else(|| NegotiatorError::Handshake(NoiseError::InvalidMessage))?;

        if !self
            .replay
            .lock()
            .check_and_record(remote_pk, envelope.handshake_nonce)
        {
            return Err(NegotiatorError::ReplayedNonce);
        }

        // Concurrent-handshake tie-break: if we also have an in-flight
        // initiator attempt toward this same peer, the lexicographically
        // smaller public key keeps the initiator role.
        if self.pending.lock().contains_key(&remote_pk)
            && SessionTable::should_remain_initiator(&self.local.public, &remote_pk)
        {
            debug!("dropping inbound responder role in favor of our own initiator attempt");
            return Err(NegotiatorError::Handshake(NoiseError::AlreadyComplete));
        }
        self.pending.lock().remove(&remote_pk);

        let msg2 = responder.write_message()?;
        let reply = HandshakeEnvelope {
            version: ProtocolVersion::NoiseIk,
            handshake_nonce: responder.handshake_nonce(),
            timestamp: responder.created_at(),
            message: msg2,
        };
        self.finalize(responder, remote_pk)?;
        Ok(HandshakeStep::Reply(reply.to_bytes()))
    }

    fn finalize(&self, handshake: HandshakeSession, peer: PublicKey) -> Result<(), NegotiatorError> {
        let nonce = handshake.handshake_nonce();
        let created_at = handshake.created_at();
        let (send, recv) = handshake.get_cipher_states()?;
        self.sessions.lock().insert(Session {
            peer_pk: peer,
            local_pk: self.local.public,
            crypto: SessionCrypto::NoiseIk { send, recv },
            handshake_nonce: nonce,
            created_at,
            last_active_at: created_at,
            negotiated_version: ProtocolVersion::NoiseIk,
            lifecycle: SessionLifecycle::Established,
        });
        Ok(())
    }

    /// Encrypt `plaintext` under the established session for `peer`.
    #[instrument(skip(self, plaintext, rng), fields(peer = ?peer))]
    pub fn encrypt_for(
        &self,
        peer: &PublicKey,
        plaintext: &[u8],
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<Vec<u8>, NegotiatorError> {
        if plaintext.len() > MAX_PLAINTEXT {
            return Err(NegotiatorError::OversizeMessage);
        }
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(peer).ok_or(NegotiatorError::NoSession)?;
        if !session.is_usable() {
            return Err(NegotiatorError::NoSession);
        }
        let wire = match &session.crypto {
            SessionCrypto::Legacy { shared_key } => legacy::encrypt(plaintext, shared_key, rng)
                .map_err(|_| NegotiatorError::OversizeMessage)?,
            SessionCrypto::NoiseIk { send, .. } => send
                .encrypt(plaintext)
                .map_err(|_| NegotiatorError::AuthFailure)?,
        };
        session.touch(time.now());
        Ok(wire)
    }

    /// Decrypt an inbound encrypted-envelope payload from `peer`.
    /// Authentication failures are dropped (the packet is discarded,
    /// the session is left intact) per the negotiator's error policy.
    #[instrument(skip(self, wire), fields(peer = ?peer))]
    pub fn decrypt_from(
        &self,
        peer: &PublicKey,
        wire: &[u8],
        time: &dyn TimeSource,
    ) -> Result<Vec<u8>, NegotiatorError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(peer).ok_or(NegotiatorError::NoSession)?;
        if !session.is_usable() {
            return Err(NegotiatorError::NoSession);
        }
        let plain = match &session.crypto {
            SessionCrypto::Legacy { shared_key } => legacy::decrypt(wire, shared_key).map_err(|e| {
                warn!(error = ?e, "legacy AEAD verification failed, dropping packet");
                NegotiatorError::AuthFailure
            })?,
            SessionCrypto::NoiseIk { recv, .. } => recv.decrypt(wire).map_err(|_| {
                warn!("noise-ik AEAD verification failed, dropping packet");
                NegotiatorError::AuthFailure
            })?,
        };
        session.touch(time.now());
        Ok(plain)
    }

    /// Run periodic maintenance: expire idle sessions. Called from the
    /// top-level coordinator's `iterate()`.
    pub fn expire_idle_sessions(&self, time: &dyn TimeSource) -> Vec<PublicKey> {
        self.sessions.lock().expire_idle(time.now())
    }

    /// Drop initiator handshake attempts that have sat incomplete
    /// longer than [`HANDSHAKE_TIMEOUT_SECS`], freeing the slot so a
    /// fresh attempt can be made. Called from the top-level
    /// coordinator's `iterate()`; unlike [`Self::expire_idle_sessions`]
    /// this never touches the session table, only in-flight
    /// handshakes.
    pub fn expire_stale_handshakes(&self, time: &dyn TimeSource) -> Vec<PublicKey> {
        let now = time.now();
        let mut pending = self.pending.lock();
        let stale: Vec<PublicKey> = pending
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.created_at) > HANDSHAKE_TIMEOUT_SECS)
            .map(|(pk, _)| *pk)
            .collect();
        for pk in &stale {
            pending.remove(pk);
        }
        stale
    }

    pub fn remove_session(&self, peer: &PublicKey) {
        self.sessions.lock().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use crate::time::SystemTimeSource;
    use rand::rngs::OsRng;

    #[test]
    fn full_noise_ik_handshake_via_negotiator() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice_kp = generate_keypair(&mut rng);
        let bob_kp = generate_keypair(&mut rng);
        let alice_pk = alice_kp.public;
        let bob_pk = bob_kp.public;

        let alice = Negotiator::new(alice_kp);
        let bob = Negotiator::new(bob_kp);

        let msg1 = alice
            .initiate(bob_pk, &[ProtocolVersion::Legacy, ProtocolVersion::NoiseIk], &mut rng, &time)
            .unwrap()
            .expect("noise-ik requires a wire message");

        let step = bob
            .handle_handshake_packet(&msg1, None, &mut rng, &time)
            .unwrap();
        let reply = match step {
            HandshakeStep::Reply(bytes) => bytes,
            HandshakeStep::Completed => panic!("responder should reply, not complete immediately"),
        };
        assert!(bob.has_session(&alice_pk));

        let step2 = alice
            .handle_handshake_packet(&reply, Some(bob_pk), &mut rng, &time)
            .unwrap();
        assert!(matches!(step2, HandshakeStep::Completed));
        assert!(alice.has_session(&bob_pk));

        let ciphertext = alice.encrypt_for(&bob_pk, b"hello bob", &mut rng, &time).unwrap();
        let plaintext = bob.decrypt_from(&alice_pk, &ciphertext, &time).unwrap();
        assert_eq!(plaintext, b"hello bob");
    }

    #[test]
    fn legacy_negotiation_needs_no_wire_round_trip() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice_kp = generate_keypair(&mut rng);
        let bob_pk = generate_keypair(&mut rng).public;
        let alice = Negotiator::new(alice_kp);

        let result = alice
            .initiate(bob_pk, &[ProtocolVersion::Legacy], &mut rng, &time)
            .unwrap();
        assert!(result.is_none());
        assert!(alice.has_session(&bob_pk));
    }

    #[test]
    fn no_session_error_on_encrypt_without_handshake() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice = Negotiator::new(generate_keypair(&mut rng));
        let bob_pk = generate_keypair(&mut rng).public;
        let err = alice.encrypt_for(&bob_pk, b"hi", &mut rng, &time).unwrap_err();
        assert!(matches!(err, NegotiatorError::NoSession));
    }

    #[test]
    fn oversize_plaintext_rejected() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice_kp = generate_keypair(&mut rng);
        let bob_pk = generate_keypair(&mut rng).public;
        let alice = Negotiator::new(alice_kp);
        alice
            .initiate(bob_pk, &[ProtocolVersion::Legacy], &mut rng, &time)
            .unwrap();
        let huge = vec![0u8; MAX_PLAINTEXT + 1];
        let err = alice.encrypt_for(&bob_pk, &huge, &mut rng, &time).unwrap_err();
        assert!(matches!(err, NegotiatorError::OversizeMessage));
    }

    #[test]
    fn abandoned_initiator_handshake_is_swept_after_timeout() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice_kp = generate_keypair(&mut rng);
        let bob_pk = generate_keypair(&mut rng).public;
        let alice = Negotiator::new(alice_kp);

        alice
            .initiate(bob_pk, &[ProtocolVersion::NoiseIk], &mut rng, &time)
            .unwrap();
        assert!(alice.pending.lock().contains_key(&bob_pk));

        // Not yet past the timeout: still pending.
        let fresh = crate::time::ManualTimeSource::new(time.now());
        assert!(alice.expire_stale_handshakes(&fresh).is_empty());

        let future = crate::time::ManualTimeSource::new(time.now() + HANDSHAKE_TIMEOUT_SECS + 1);
        let swept = alice.expire_stale_handshakes(&future);
        assert_eq!(swept, vec![bob_pk]);
        assert!(!alice.pending.lock().contains_key(&bob_pk));
    }

    #[test]
    fn stale_handshake_timestamp_is_rejected() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice_kp = generate_keypair(&mut rng);
        let bob_kp = generate_keypair(&mut rng);
        let bob_pk = bob_kp.public;
        let alice = Negotiator::new(alice_kp);
        let bob = Negotiator::new(bob_kp);

        let msg1 = alice
            .initiate(bob_pk, &[ProtocolVersion::NoiseIk], &mut rng, &time)
            .unwrap()
            .unwrap();
        let mut envelope = HandshakeEnvelope::from_bytes(&msg1).unwrap();
        envelope.timestamp = time.now() - crate::noise::HANDSHAKE_MAX_AGE_SECS - 10;
        let stale_bytes = envelope.to_bytes();

        let err = bob
            .handle_handshake_packet(&stale_bytes, None, &mut rng, &time)
            .unwrap_err();
        assert!(matches!(err, NegotiatorError::StaleHandshake));
    }
}
