//! Noise-IK / Noise-XX handshake state machine.

use thiserror::Error;

use crate::crypto::{KeyPair, PublicKey, SecretKey};
use crate::rng::Rng;
use crate::time::TimeSource;

use super::cipher::Cipher;

/// Handshakes older than this (by their carried timestamp) are rejected.
pub const HANDSHAKE_MAX_AGE_SECS: u64 = 5 * 60;
/// Handshakes whose timestamp is this far in the future are rejected.
pub const HANDSHAKE_MAX_FUTURE_DRIFT_SECS: u64 = 60;

const IK_PATTERN: &str = "Noise_IK_25519_ChaChaPoly_SHA256";
const XX_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("handshake already complete")]
    AlreadyComplete,
    #[error("handshake message was invalid or truncated")]
    InvalidMessage,
    #[error("handshake is not yet complete")]
    NotComplete,
    #[error("handshake timestamp is stale or from the future")]
    StaleHandshake,
    #[error("internal noise protocol error: {0}")]
    Protocol(String),
}

impl From<snow::Error> for NoiseError {
    fn from(e: snow::Error) -> Self {
        NoiseError::Protocol(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Initiator,
    Responder,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Pattern {
    Ik,
    Xx,
}

/// A handshake in progress (or freshly completed). Carries the metadata
/// (role, local static key, handshake nonce, creation time) the
/// negotiator needs for freshness checks, replay protection, and
/// tie-breaking concurrent handshake attempts.
pub struct HandshakeSession {
    role: HandshakeRole,
    pattern: Pattern,
    state: Option<snow::HandshakeState>,
    local_static_pk: PublicKey,
    handshake_nonce: [u8; 32],
    created_at: u64,
}

fn build(pattern: &str, local_sk: &SecretKey) -> Result<snow::Builder<'_>, NoiseError> {
    Ok(snow::Builder::new(pattern.parse().map_err(|_| {
        NoiseError::Protocol("unparseable noise pattern".into())
    })?)
    .local_private_key(&local_sk.0))
}

impl HandshakeSession {
    fn new_nonce(rng: &mut dyn Rng) -> [u8; 32] {
        let mut nonce = [0u8; 32];
        rng.fill_bytes(&mut nonce);
        nonce
    }

    /// Begin an IK handshake as the initiator, who already knows the
    /// responder's static public key. Returns the session and message 1
    /// to send.
    pub fn initiate_ik(
        local: &KeyPair,
        remote_static_pk: &PublicKey,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<(Self, Vec<u8>), NoiseError> {
        let state = build(IK_PATTERN, local.secret())?
            .remote_public_key(&remote_static_pk.0)
            .build_initiator()?;
        let mut session = HandshakeSession {
            role: HandshakeRole::Initiator,
            pattern: Pattern::Ik,
            state: Some(state),
            local_static_pk: local.public,
            handshake_nonce: Self::new_nonce(rng),
            created_at: time.now(),
        };
        let msg = session.write_message()?;
        Ok((session, msg))
    }

    /// Begin an IK handshake as the responder. The peer's static key is
    /// not known until message 1 is read.
    pub fn accept_ik(local: &KeyPair, rng: &mut dyn Rng, time: &dyn TimeSource) -> Result<Self, NoiseError> {
        let state = build(IK_PATTERN, local.secret())?.build_responder()?;
        Ok(HandshakeSession {
            role: HandshakeRole::Responder,
            pattern: Pattern::Ik,
            state: Some(state),
            local_static_pk: local.public,
            handshake_nonce: Self::new_nonce(rng),
            created_at: time.now(),
        })
    }

    /// Begin an XX handshake as the initiator (first contact, peer's
    /// static key unknown).
    pub fn initiate_xx(
        local: &KeyPair,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<(Self, Vec<u8>), NoiseError> {
        let state = build(XX_PATTERN, local.secret())?.build_initiator()?;
        let mut session = HandshakeSession {
            role: HandshakeRole::Initiator,
            pattern: Pattern::Xx,
            state: Some(state),
            local_static_pk: local.public,
            handshake_nonce: Self::new_nonce(rng),
            created_at: time.now(),
        };
        let msg = session.write_message()?;
        Ok((session, msg))
    }

    /// Begin an XX handshake as the responder.
    pub fn accept_xx(local: &KeyPair, rng: &mut dyn Rng, time: &dyn TimeSource) -> Result<Self, NoiseError> {
        let state = build(XX_PATTERN, local.secret())?.build_responder()?;
        Ok(HandshakeSession {
            role: HandshakeRole::Responder,
            pattern: Pattern::Xx,
            state: Some(state),
            local_static_pk: local.public,
            handshake_nonce: Self::new_nonce(rng),
            created_at: time.now(),
        })
    }

    fn state_mut(&mut self) -> Result<&mut snow::HandshakeState, NoiseError> {
        self.state.as_mut().ok_or(NoiseError::AlreadyComplete)
    }

    /// Write the next handshake message. Fails once both sides have
    /// finalized.
    pub fn write_message(&mut self) -> Result<Vec<u8>, NoiseError> {
        let state = self.state_mut()?;
        if state.is_handshake_finished() {
            return Err(NoiseError::AlreadyComplete);
        }
        let mut buf = vec![0u8; 512];
        let len = state
            .write_message(&[], &mut buf)
            .map_err(|_| NoiseError::InvalidMessage)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Read the peer's handshake message. Fails on tampered/truncated
    /// input.
    pub fn read_message(&mut self, msg: &[u8]) -> Result<(), NoiseError> {
        let state = self.state_mut()?;
        if state.is_handshake_finished() {
            return Err(NoiseError::AlreadyComplete);
        }
        let mut buf = vec![0u8; msg.len().max(1)];
        state
            .read_message(msg, &mut buf)
            .map_err(|_| NoiseError::InvalidMessage)?;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| s.is_handshake_finished())
            .unwrap_or(false)
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    pub fn handshake_nonce(&self) -> [u8; 32] {
        self.handshake_nonce
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// The local **static** identity public key — never the ephemeral
    /// key. A handshake accessor that instead derived this from live
    /// handshake state risks returning the ephemeral key once the
    /// session has moved past the handshake phase; storing it at
    /// construction time sidesteps that class of bug entirely.
    pub fn get_local_static_key(&self) -> PublicKey {
        self.local_static_pk
    }

    /// The authenticated peer static public key, available only once
    /// the peer's static key has been transmitted (after message 1 for
    /// IK responders, after message 2 for XX initiators, ...).
    pub fn get_remote_static_key(&self) -> Option<PublicKey> {
        self.state
            .as_ref()
            .and_then(|s| s.get_remote_static())
            .and_then(|bytes| bytes.try_into().ok())
            .map(PublicKey)
    }

    /// Check the handshake's carried creation timestamp against the
    /// freshness window, using `now` from an injected [`TimeSource`].
    pub fn check_freshness(&self, now: u64) -> Result<(), NoiseError> {
        check_timestamp_freshness(self.created_at, now)
    }

    /// Consume the completed handshake and produce the duplex cipher
    /// pair. Errors if the handshake has not finished.
    pub fn get_cipher_states(self) -> Result<(Cipher, Cipher), NoiseError> {
        let state = self.state.ok_or(NoiseError::NotComplete)?;
        if !state.is_handshake_finished() {
            return Err(NoiseError::NotComplete);
        }
        let transport = state.into_transport_mode()?;
        Ok(Cipher::pair(transport))
    }

    pub fn pattern_is_ik(&self) -> bool {
        self.pattern == Pattern::Ik
    }
}

/// Standalone freshness check used both by [`HandshakeSession`] and by
/// the negotiator when validating a wire-carried timestamp directly.
pub fn check_timestamp_freshness(timestamp: u64, now: u64) -> Result<(), NoiseError> {
    if now.saturating_sub(timestamp) > HANDSHAKE_MAX_AGE_SECS {
        return Err(NoiseError::StaleHandshake);
    }
    if timestamp.saturating_sub(now) > HANDSHAKE_MAX_FUTURE_DRIFT_SECS {
        return Err(NoiseError::StaleHandshake);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use crate::time::SystemTimeSource;
    use rand::rngs::OsRng;

    #[test]
    fn ik_handshake_completes_and_exchanges_data() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);

        let (mut initiator, msg1) =
            HandshakeSession::initiate_ik(&alice, &bob.public, &mut rng, &time).unwrap();
        assert!(!initiator.is_complete());

        let mut responder = HandshakeSession::accept_ik(&bob, &mut rng, &time).unwrap();
        responder.read_message(&msg1).unwrap();
        let msg2 = responder.write_message().unwrap();
        assert!(responder.is_complete());
        assert_eq!(responder.get_remote_static_key(), Some(alice.public));

        initiator.read_message(&msg2).unwrap();
        assert!(initiator.is_complete());
        assert_eq!(initiator.get_remote_static_key(), Some(bob.public));

        assert_eq!(initiator.get_local_static_key(), alice.public);
        assert_eq!(responder.get_local_static_key(), bob.public);

        let (alice_send, _alice_recv) = initiator.get_cipher_states().unwrap();
        let (_bob_send, bob_recv) = responder.get_cipher_states().unwrap();

        let ciphertext = alice_send.encrypt(b"hello bob").unwrap();
        let plaintext = bob_recv.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"hello bob");
    }

    #[test]
    fn write_after_complete_fails() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);

        let (mut initiator, msg1) =
            HandshakeSession::initiate_ik(&alice, &bob.public, &mut rng, &time).unwrap();
        let mut responder = HandshakeSession::accept_ik(&bob, &mut rng, &time).unwrap();
        responder.read_message(&msg1).unwrap();
        let msg2 = responder.write_message().unwrap();
        initiator.read_message(&msg2).unwrap();

        assert!(matches!(
            initiator.write_message(),
            Err(NoiseError::AlreadyComplete)
        ));
    }

    #[test]
    fn tampered_message_is_rejected() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);

        let (_initiator, mut msg1) =
            HandshakeSession::initiate_ik(&alice, &bob.public, &mut rng, &time).unwrap();
        *msg1.last_mut().unwrap() ^= 0xff;

        let mut responder = HandshakeSession::accept_ik(&bob, &mut rng, &time).unwrap();
        assert!(responder.read_message(&msg1).is_err());
    }

    #[test]
    fn freshness_window_rejects_stale_and_future() {
        assert!(check_timestamp_freshness(1_000, 1_000 + HANDSHAKE_MAX_AGE_SECS + 1).is_err());
        assert!(check_timestamp_freshness(1_000 + HANDSHAKE_MAX_FUTURE_DRIFT_SECS + 1, 1_000).is_err());
        assert!(check_timestamp_freshness(1_000, 1_000 + HANDSHAKE_MAX_AGE_SECS - 1).is_ok());
    }

    #[test]
    fn xx_handshake_completes() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);

        let (mut initiator, msg1) = HandshakeSession::initiate_xx(&alice, &mut rng, &time).unwrap();
        let mut responder = HandshakeSession::accept_xx(&bob, &mut rng, &time).unwrap();

        responder.read_message(&msg1).unwrap();
        let msg2 = responder.write_message().unwrap();
        initiator.read_message(&msg2).unwrap();
        let msg3 = initiator.write_message().unwrap();
        responder.read_message(&msg3).unwrap();

        assert!(initiator.is_complete());
        assert!(responder.is_complete());
    }
}
