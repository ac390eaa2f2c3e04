//! Key pairs, nonces, AEAD encryption, signatures, and secure zeroization.
//!
//! DH is Curve25519 (`x25519-dalek`), AEAD is XChaCha20-Poly1305 (24-byte
//! nonces, matching the data model's `Nonce` size), signatures are
//! Ed25519. A shared secret is never used as an AEAD key directly — it is
//! passed through HKDF-SHA256 first, which also doubles as the key
//! derivation primitive the async-mailbox extension (C8) reuses for
//! pseudonym derivation.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand_core::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Largest plaintext `encrypt`/`encrypt_symmetric` will accept.
pub const MAX_ENCRYPTION_BUFFER: usize = 65507;

/// Size in bytes of a [`Nonce`].
pub const NONCE_BYTES: usize = 24;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("plaintext exceeds MAX_ENCRYPTION_BUFFER")]
    InputTooLarge,
    #[error("ciphertext authentication failed")]
    AuthFailure,
    #[error("malformed key or nonce material")]
    Malformed,
}

/// A Curve25519 public key, also reused as an Ed25519 verifying key where
/// the signing variant of a keypair is requested.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A Curve25519 secret key. Zeroized on drop; never `Debug`-printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(pub [u8; 32]);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// A DH-derived shared secret. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub [u8; 32]);

/// A 24-byte nonce, unique per encryption under a given key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; NONCE_BYTES]);

impl AsRef<[u8]> for Nonce {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An Ed25519 signature.
#[derive(Clone, Copy)]
pub struct Signature(pub [u8; 64]);

/// A Curve25519 key pair: a public identity key and its zeroized secret
/// half.
pub struct KeyPair {
    pub public: PublicKey,
    secret: SecretKey,
}

impl KeyPair {
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

/// An Ed25519 signing key pair, derived deterministically from a
/// [`KeyPair`]'s secret so that a peer's identity key doubles as its
/// signature-verification key (used by the mailbox extension's fetch
/// authentication).
pub struct SigningKeyPair {
    signing_key: SigningKey,
    pub verifying_key: PublicKey,
}

impl SigningKeyPair {
    pub fn from_secret(sk: &SecretKey) -> Self {
        let signing_key = SigningKey::from_bytes(&sk.0);
        let verifying_key = PublicKey(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            verifying_key,
        }
    }
}

/// Generate a fresh random `KeyPair` using the supplied RNG.
pub fn generate_keypair(rng: &mut dyn RngCore) -> KeyPair {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    derive_from_secret(&SecretKey(bytes))
}

/// Deterministically derive the public half of a `KeyPair` from an
/// existing secret key (e.g. loaded from savedata).
pub fn derive_from_secret(sk: &SecretKey) -> KeyPair {
    let static_secret = StaticSecret::from(sk.0);
    let public = XPublicKey::from(&static_secret);
    KeyPair {
        public: PublicKey(*public.as_bytes()),
        secret: sk.clone(),
    }
}

/// Draw a fresh random nonce from the supplied RNG.
pub fn generate_nonce(rng: &mut dyn RngCore) -> Nonce {
    let mut bytes = [0u8; NONCE_BYTES];
    rng.fill_bytes(&mut bytes);
    Nonce(bytes)
}

fn dh(my_sk: &SecretKey, peer_pk: &PublicKey) -> SharedSecret {
    let secret = StaticSecret::from(my_sk.0);
    let shared = secret.diffie_hellman(&XPublicKey::from(peer_pk.0));
    SharedSecret(*shared.as_bytes())
}

/// Derive a symmetric AEAD key from a raw DH output via HKDF-SHA256,
/// bound to the pair of public keys so the same shared secret never
/// yields the same key material in another context.
fn derive_symmetric_key(shared: &SharedSecret, context: &[u8]) -> Zeroizing<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, &shared.0);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(context, &mut *key)
        .expect("32 is a valid HKDF-SHA256 output length");
    key
}

/// Public accessor used by callers (e.g. the mailbox extension) that need
/// the raw symmetric key a DH exchange would produce, without performing
/// an encryption themselves.
pub fn encrypt_symmetric_key(my_sk: &SecretKey, peer_pk: &PublicKey, context: &[u8]) -> [u8; 32] {
    let shared = dh(my_sk, peer_pk);
    *derive_symmetric_key(&shared, context)
}

/// Authenticated-encrypt `plain` to `peer_pk` under a key derived from
/// `X25519(my_sk, peer_pk)`. Nonces must never repeat under the same key
/// pair: callers draw a fresh one from [`generate_nonce`] each call.
pub fn encrypt(
    plain: &[u8],
    nonce: &Nonce,
    peer_pk: &PublicKey,
    my_sk: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    if plain.len() > MAX_ENCRYPTION_BUFFER {
        return Err(CryptoError::InputTooLarge);
    }
    let shared = dh(my_sk, peer_pk);
    let key = derive_symmetric_key(&shared, b"tox-box-v1");
    let cipher = XChaCha20Poly1305::new((&*key).into());
    cipher
        .encrypt(XNonce::from_slice(&nonce.0), plain)
        .map_err(|_| CryptoError::Malformed)
}

/// Decrypt and authenticate a ciphertext produced by [`encrypt`].
pub fn decrypt(
    cipher_text: &[u8],
    nonce: &Nonce,
    peer_pk: &PublicKey,
    my_sk: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    let shared = dh(my_sk, peer_pk);
    let key = derive_symmetric_key(&shared, b"tox-box-v1");
    let cipher = XChaCha20Poly1305::new((&*key).into());
    cipher
        .decrypt(XNonce::from_slice(&nonce.0), cipher_text)
        .map_err(|_| CryptoError::AuthFailure)
}

/// Authenticated-encrypt under an already-derived 32-byte symmetric key
/// (used by session transport and the mailbox sealed box, where the key
/// did not come directly from a DH call).
pub fn encrypt_symmetric(plain: &[u8], nonce: &Nonce, key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if plain.len() > MAX_ENCRYPTION_BUFFER {
        return Err(CryptoError::InputTooLarge);
    }
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(XNonce::from_slice(&nonce.0), plain)
        .map_err(|_| CryptoError::Malformed)
}

pub fn decrypt_symmetric(
    cipher_text: &[u8],
    nonce: &Nonce,
    key: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(&nonce.0), cipher_text)
        .map_err(|_| CryptoError::AuthFailure)
}

/// Sign `msg` under `sk`'s Ed25519 derivation. Used by the mailbox
/// extension to authenticate `FETCH` requests against a pseudonym's
/// published verifier key.
pub fn sign(msg: &[u8], sk: &SecretKey) -> Signature {
    let signing = SigningKeyPair::from_secret(sk);
    let sig = signing.signing_key.sign(msg);
    Signature(sig.to_bytes())
}

/// Verify a signature produced by [`sign`]. Never panics on a tampered
/// message or mismatched key; returns `false`.
pub fn verify(msg: &[u8], sig: &Signature, pk: &PublicKey) -> bool {
    let Ok(verifying) = VerifyingKey::from_bytes(&pk.0) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&sig.0);
    verifying.verify(msg, &signature).is_ok()
}

/// The Ed25519 verifying key corresponding to `sk`'s signing derivation.
pub fn sig_pk_from_sk(sk: &SecretKey) -> PublicKey {
    SigningKeyPair::from_secret(sk).verifying_key
}
