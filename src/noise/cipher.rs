//! Thin wrapper around a `snow` `TransportState`, exposing the
//! encrypt/decrypt surface the negotiator's session table needs without
//! leaking the underlying Noise types across the module boundary.
//!
//! A single `TransportState` tracks both directions' nonce counters
//! internally; `send_cipher`/`recv_cipher` are two handles onto the same
//! shared state so the data model's "independent counters" description
//! holds without duplicating the handshake output.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("AEAD authentication failed")]
    AuthFailure,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Send,
    Recv,
}

/// One directional handle onto an established Noise session's transport
/// state.
pub struct Cipher {
    transport: Arc<Mutex<snow::TransportState>>,
    direction: Direction,
}

impl Cipher {
    /// Build the `(send, recv)` pair sharing one transport state.
    pub(crate) fn pair(transport: snow::TransportState) -> (Cipher, Cipher) {
        let shared = Arc::new(Mutex::new(transport));
        (
            Cipher {
                transport: shared.clone(),
                direction: Direction::Send,
            },
            Cipher {
                transport: shared,
                direction: Direction::Recv,
            },
        )
    }

    /// Encrypt `plaintext` under this cipher's next send nonce. Only
    /// meaningful on the `send` handle of the pair.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        debug_assert_eq!(self.direction, Direction::Send);
        let mut out = vec![0u8; plaintext.len() + 16];
        let len = self
            .transport
            .lock()
            .write_message(plaintext, &mut out)
            .map_err(|_| CipherError::AuthFailure)?;
        out.truncate(len);
        Ok(out)
    }

    /// Decrypt and authenticate `ciphertext`. Only meaningful on the
    /// `recv` handle of the pair.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        debug_assert_eq!(self.direction, Direction::Recv);
        let mut out = vec![0u8; ciphertext.len()];
        let len = self
            .transport
            .lock()
            .read_message(ciphertext, &mut out)
            .map_err(|_| CipherError::AuthFailure)?;
        out.truncate(len);
        Ok(out)
    }
}
