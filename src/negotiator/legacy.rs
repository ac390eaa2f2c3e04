//! The legacy session protocol: a one-message handshake over a static
//! DH-derived key, kept around for peers that have not upgraded to
//! Noise-IK. Uses a precomputed shared-key approach, built from a plain
//! `X25519` + `HKDF-SHA256` derivation rather than NaCl's `crypto_box`.

use crate::crypto::{self, KeyPair, Nonce, PublicKey, NONCE_BYTES};
use crate::rng::Rng;

use super::envelope::{frame_legacy_payload, unframe_legacy_payload, EnvelopeError};

/// Derive the static shared key two legacy peers use for the lifetime
/// of their session. Either side can compute it unilaterally from its
/// own secret and the peer's public key.
pub fn derive_shared_key(local: &KeyPair, peer_pk: &PublicKey) -> [u8; 32] {
    crypto::encrypt_symmetric_key(local.secret(), peer_pk, b"tox-legacy-session-v1")
}

/// Encrypt `plaintext` for the wire under a legacy session's shared
/// key, framing a fresh random nonce ahead of the ciphertext.
pub fn encrypt(plaintext: &[u8], shared_key: &[u8; 32], rng: &mut dyn Rng) -> Result<Vec<u8>, crypto::CryptoError> {
    let nonce = crypto::generate_nonce(rng);
    let ciphertext = crypto::encrypt_symmetric(plaintext, &nonce, shared_key)?;
    Ok(frame_legacy_payload(&nonce.0, &ciphertext))
}

/// Decrypt a legacy-protocol wire payload produced by [`encrypt`].
pub fn decrypt(wire: &[u8], shared_key: &[u8; 32]) -> Result<Vec<u8>, LegacyError> {
    let (nonce_bytes, ciphertext) = unframe_legacy_payload(wire)?;
    let nonce = Nonce(nonce_bytes);
    debug_assert_eq!(nonce.0.len(), NONCE_BYTES);
    crypto::decrypt_symmetric(ciphertext, &nonce, shared_key).map_err(LegacyError::Crypto)
}

#[derive(Debug, thiserror::Error)]
pub enum LegacyError {
    #[error("legacy payload framing error: {0:?}")]
    Envelope(EnvelopeError),
    #[error("legacy payload crypto error: {0}")]
    Crypto(crypto::CryptoError),
}

impl From<EnvelopeError> for LegacyError {
    fn from(e: EnvelopeError) -> Self {
        LegacyError::Envelope(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use rand::rngs::OsRng;

    #[test]
    fn both_sides_derive_the_same_shared_key() {
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);
        let k1 = derive_shared_key(&alice, &bob.public);
        let k2 = derive_shared_key(&bob, &alice.public);
        assert_eq!(k1, k2);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);
        let key = derive_shared_key(&alice, &bob.public);
        let wire = encrypt(b"legacy hello", &key, &mut rng).unwrap();
        let plain = decrypt(&wire, &key).unwrap();
        assert_eq!(plain, b"legacy hello");
    }
}
