//! `ToxID`: `public_key(32) ‖ nospam(4) ‖ checksum(2)`, textual form is
//! uppercase hex of the 38-byte concatenation.

use rand_core::RngCore;

use super::primitives::PublicKey;

pub const NOSPAM_BYTES: usize = 4;
pub const TOXID_BYTES: usize = 32 + NOSPAM_BYTES + 2;

/// A 4-byte token appended to a public key. Rotating it invalidates
/// outstanding friend requests without requiring a new key pair.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NoSpam(pub [u8; NOSPAM_BYTES]);

impl NoSpam {
    pub fn generate(rng: &mut dyn RngCore) -> Self {
        let mut bytes = [0u8; NOSPAM_BYTES];
        rng.fill_bytes(&mut bytes);
        NoSpam(bytes)
    }
}

/// Textual Tox identity: public key + nospam + checksum.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ToxId {
    pub public_key: PublicKey,
    pub nospam: NoSpam,
}

fn checksum(public_key: &[u8; 32], nospam: &[u8; NOSPAM_BYTES]) -> [u8; 2] {
    let mut xor = [0u8; 2];
    let mut chunks = public_key.chunks_exact(2).chain(nospam.chunks_exact(2));
    for pair in &mut chunks {
        xor[0] ^= pair[0];
        xor[1] ^= pair[1];
    }
    xor
}

impl ToxId {
    pub fn new(public_key: PublicKey, nospam: NoSpam) -> Self {
        ToxId { public_key, nospam }
    }

    fn to_bytes(self) -> [u8; TOXID_BYTES] {
        let mut out = [0u8; TOXID_BYTES];
        out[..32].copy_from_slice(&self.public_key.0);
        out[32..36].copy_from_slice(&self.nospam.0);
        let sum = checksum(&self.public_key.0, &self.nospam.0);
        out[36..38].copy_from_slice(&sum);
        out
    }

    /// Parse a `ToxID` from its uppercase-hex textual form. Fails on
    /// wrong length or checksum mismatch.
    pub fn parse(s: &str) -> Result<Self, ToxIdParseError> {
        let bytes = hex::decode(s).map_err(|_| ToxIdParseError::NotHex)?;
        if bytes.len() != TOXID_BYTES {
            return Err(ToxIdParseError::WrongLength);
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&bytes[..32]);
        let mut nospam = [0u8; NOSPAM_BYTES];
        nospam.copy_from_slice(&bytes[32..36]);
        let expected = checksum(&pk, &nospam);
        if expected != bytes[36..38] {
            return Err(ToxIdParseError::BadChecksum);
        }
        Ok(ToxId {
            public_key: PublicKey(pk),
            nospam: NoSpam(nospam),
        })
    }
}

impl std::fmt::Display for ToxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode_upper(self.to_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ToxIdParseError {
    #[error("ToxID is not valid hex")]
    NotHex,
    #[error("ToxID has the wrong length")]
    WrongLength,
    #[error("ToxID checksum does not match")]
    BadChecksum,
}
