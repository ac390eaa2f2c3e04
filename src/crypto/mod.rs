//! Cryptographic primitives (C1): key pairs, nonces, AEAD, signatures,
//! `ToxID`, nospam, secure zeroization.
//!
//! Everything above this module (the Noise engine, the negotiator, the
//! friend engine) builds its own constructions out of the primitives
//! exposed here; nothing outside `crypto` touches `x25519_dalek`,
//! `chacha20poly1305`, `ed25519_dalek`, or `sha2` directly.

mod primitives;

pub use primitives::{
    decrypt, decrypt_symmetric, derive_from_secret, encrypt, encrypt_symmetric,
    encrypt_symmetric_key, generate_keypair, generate_nonce, sig_pk_from_sk, sign, verify,
    CryptoError, KeyPair, Nonce, PublicKey, SecretKey, SharedSecret, Signature, SigningKeyPair,
    MAX_ENCRYPTION_BUFFER, NONCE_BYTES,
};

mod toxid;
pub use toxid::{NoSpam, ToxId, NOSPAM_BYTES, TOXID_BYTES};
