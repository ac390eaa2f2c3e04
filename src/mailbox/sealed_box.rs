//! Sealed-box message encryption: a fresh ephemeral key pair per
//! message so the wire ciphertext carries no plaintext sender
//! identity. The sender's real public key is only recoverable after
//! decryption, from the authenticated inner payload.

use crate::crypto::{self, CryptoError, KeyPair, Nonce, PublicKey, SecretKey, NONCE_BYTES};
use crate::rng::Rng;

#[derive(Debug, Clone)]
pub struct SealedBox {
    pub ephemeral_public: PublicKey,
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SealedBoxError {
    #[error("sealed box crypto error: {0}")]
    Crypto(CryptoError),
    #[error("sealed box wire payload is truncated")]
    Truncated,
}

impl From<CryptoError> for SealedBoxError {
    fn from(e: CryptoError) -> Self {
        SealedBoxError::Crypto(e)
    }
}

impl SealedBox {
    /// Seal `message` for `recipient_pk`, embedding `sender_pk` inside
    /// the encrypted payload so it survives in transit only for
    /// someone who can decrypt.
    pub fn seal(recipient_pk: &PublicKey, sender_pk: &PublicKey, message: &[u8], rng: &mut dyn Rng) -> Result<Self, SealedBoxError> {
        let ephemeral = crypto::generate_keypair(rng);
        let nonce = crypto::generate_nonce(rng);
        let mut inner = Vec::with_capacity(32 + message.len());
        inner.extend_from_slice(&sender_pk.0);
        inner.extend_from_slice(message);
        let ciphertext = crypto::encrypt(&inner, &nonce, recipient_pk, ephemeral.secret())?;
        Ok(SealedBox {
            ephemeral_public: ephemeral.public,
            nonce,
            ciphertext,
        })
    }

    /// Open a sealed box, recovering `(sender_pk, message)`.
    pub fn open(&self, recipient_sk: &SecretKey) -> Result<(PublicKey, Vec<u8>), SealedBoxError> {
        let plain = crypto::decrypt(&self.ciphertext, &self.nonce, &self.ephemeral_public, recipient_sk)?;
        if plain.len() < 32 {
            return Err(SealedBoxError::Truncated);
        }
        let mut sender_pk = [0u8; 32];
        sender_pk.copy_from_slice(&plain[..32]);
        Ok((PublicKey(sender_pk), plain[32..].to_vec()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + NONCE_BYTES + self.ciphertext.len());
        out.extend_from_slice(&self.ephemeral_public.0);
        out.extend_from_slice(&self.nonce.0);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SealedBoxError> {
        if bytes.len() < 32 + NONCE_BYTES {
            return Err(SealedBoxError::Truncated);
        }
        let mut ephemeral = [0u8; 32];
        ephemeral.copy_from_slice(&bytes[..32]);
        let mut nonce = [0u8; NONCE_BYTES];
        nonce.copy_from_slice(&bytes[32..32 + NONCE_BYTES]);
        Ok(SealedBox {
            ephemeral_public: PublicKey(ephemeral),
            nonce: Nonce(nonce),
            ciphertext: bytes[32 + NONCE_BYTES..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use rand::rngs::OsRng;

    #[test]
    fn seal_open_round_trip_recovers_sender_and_message() {
        let mut rng = OsRng;
        let sender = generate_keypair(&mut rng);
        let recipient = generate_keypair(&mut rng);

        let sealed = SealedBox::seal(&recipient.public, &sender.public, b"catch you later", &mut rng).unwrap();
        let wire = sealed.to_bytes();
        let parsed = SealedBox::from_bytes(&wire).unwrap();
        let (sender_pk, message) = parsed.open(recipient.secret()).unwrap();
        assert_eq!(sender_pk, sender.public);
        assert_eq!(message, b"catch you later");
    }

    #[test]
    fn distinct_ephemeral_keys_for_each_message() {
        let mut rng = OsRng;
        let sender = generate_keypair(&mut rng);
        let recipient = generate_keypair(&mut rng);
        let a = SealedBox::seal(&recipient.public, &sender.public, b"one", &mut rng).unwrap();
        let b = SealedBox::seal(&recipient.public, &sender.public, b"two", &mut rng).unwrap();
        assert_ne!(a.ephemeral_public, b.ephemeral_public);
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let mut rng = OsRng;
        let sender = generate_keypair(&mut rng);
        let recipient = generate_keypair(&mut rng);
        let eavesdropper = generate_keypair(&mut rng);
        let sealed = SealedBox::seal(&recipient.public, &sender.public, b"secret", &mut rng).unwrap();
        assert!(sealed.open(eavesdropper.secret()).is_err());
    }
}
