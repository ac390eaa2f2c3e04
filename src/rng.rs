//! Injected randomness capability.
//!
//! Mirrors [`crate::time`]: keep OS entropy in production, but let tests
//! swap in a fixed byte stream so nonce- and key-generation paths are
//! reproducible.

use rand_core::{CryptoRng, RngCore};

/// Randomness capability required everywhere a nonce or ephemeral key is
/// generated. Anything implementing [`RngCore`] + [`CryptoRng`] qualifies,
/// so production code can hand in `rand::rngs::OsRng` directly.
pub trait Rng: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> Rng for T {}

/// A fixed byte stream for deterministic tests. Cycles once exhausted.
pub struct FixedRng {
    bytes: Vec<u8>,
    pos: usize,
}

impl FixedRng {
    pub fn new(seed: impl Into<Vec<u8>>) -> Self {
        let bytes = seed.into();
        assert!(!bytes.is_empty(), "FixedRng needs at least one seed byte");
        Self { bytes, pos: 0 }
    }
}

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest {
            *byte = self.bytes[self.pos];
            self.pos = (self.pos + 1) % self.bytes.len();
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for FixedRng {}
