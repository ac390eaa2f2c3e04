//! Noise-IK engine (C2): a one-round-trip mutual-authentication handshake
//! over Curve25519 / ChaCha20-Poly1305 / SHA-256, producing a duplex AEAD
//! session. A second pattern, Noise-XX, is available for first contact
//! when the peer's static key is not yet known.

mod cipher;
mod handshake;

pub use cipher::Cipher;
pub use handshake::{
    check_timestamp_freshness, HandshakeRole, HandshakeSession, NoiseError,
    HANDSHAKE_MAX_AGE_SECS, HANDSHAKE_MAX_FUTURE_DRIFT_SECS,
};
