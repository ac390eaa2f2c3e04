//! Storage-node side of the async-mailbox extension: `STORE`/`FETCH`
//! handling, TTL expiry, per-pseudonym size caps, and source-address
//! rate limiting. A storage node never learns a sender's or
//! recipient's real public key — only opaque pseudonyms and sealed
//! ciphertexts.

use std::collections::HashMap;

use thiserror::Error;

use crate::crypto::{self, PublicKey, Signature};
use crate::transport::NetAddress;

use super::pseudonym::Pseudonym;

/// TTL hard cap: 7 days.
pub const MAX_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Maximum ciphertexts held per pseudonym before `STORE` is refused.
pub const MAX_RECORDS_PER_PSEUDONYM: usize = 16;

/// Source-address rate limit: at most this many `STORE`s per window.
pub const RATE_LIMIT_MAX_STORES: u32 = 20;
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("ttl {requested} exceeds the maximum of {max}")]
    TtlTooLarge { requested: u64, max: u64 },
    #[error("pseudonym has reached its storage cap")]
    PseudonymFull,
    #[error("source address is rate-limited")]
    RateLimited,
    #[error("fetch challenge signature did not verify against any stored record")]
    AuthFailure,
    #[error("the DHT currently has no advertised storage nodes")]
    NoStorageAvailable,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    ciphertext: Vec<u8>,
    verifier: PublicKey,
    stored_at: u64,
    expires_at: u64,
}

#[derive(Default)]
struct RateWindow {
    window_start: u64,
    count: u32,
}

/// One DHT node's local view of the mailboxes it has agreed to host.
pub struct StorageNode {
    records: HashMap<Pseudonym, Vec<StoredRecord>>,
    rate_limits: HashMap<NetAddress, RateWindow>,
}

impl StorageNode {
    pub fn new() -> Self {
        StorageNode {
            records: HashMap::new(),
            rate_limits: HashMap::new(),
        }
    }

    fn check_rate_limit(&mut self, source: &NetAddress, now: u64) -> Result<(), MailboxError> {
        let window = self.rate_limits.entry(source.clone()).or_default();
        if now.saturating_sub(window.window_start) >= RATE_LIMIT_WINDOW_SECS {
            window.window_start = now;
            window.count = 0;
        }
        if window.count >= RATE_LIMIT_MAX_STORES {
            return Err(MailboxError::RateLimited);
        }
        window.count += 1;
        Ok(())
    }

    /// Accept a `STORE(pseudonym, ciphertext, ttl)` request from
    /// `source`.
    pub fn store(
        &mut self,
        pseudonym: Pseudonym,
        ciphertext: Vec<u8>,
        ttl_secs: u64,
        verifier: PublicKey,
        source: &NetAddress,
        now: u64,
    ) -> Result<(), MailboxError> {
        if ttl_secs > MAX_TTL_SECS {
            return Err(MailboxError::TtlTooLarge { requested: ttl_secs, max: MAX_TTL_SECS });
        }
        self.check_rate_limit(source, now)?;

        self.expire(now);
        let bucket = self.records.entry(pseudonym).or_default();
        if bucket.len() >= MAX_RECORDS_PER_PSEUDONYM {
            return Err(MailboxError::PseudonymFull);
        }
        bucket.push(StoredRecord {
            ciphertext,
            verifier,
            stored_at: now,
            expires_at: now + ttl_secs,
        });
        Ok(())
    }

    /// Serve a `FETCH(pseudonym, challenge_response)` request: the
    /// caller signed `challenge` with the private half of the
    /// pseudonym's verifier key, proving ownership without revealing
    /// any persistent identity.
    pub fn fetch(
        &mut self,
        pseudonym: &Pseudonym,
        challenge: &[u8],
        signature: &Signature,
        now: u64,
    ) -> Result<Vec<Vec<u8>>, MailboxError> {
        self.expire(now);
        let bucket = self.records.get(pseudonym).ok_or(MailboxError::AuthFailure)?;
        let matches: Vec<Vec<u8>> = bucket
            .iter()
            .filter(|r| crypto::verify(challenge, signature, &r.verifier))
            .map(|r| r.ciphertext.clone())
            .collect();
        if matches.is_empty() {
            return Err(MailboxError::AuthFailure);
        }
        Ok(matches)
    }

    /// Drop every record past its TTL.
    pub fn expire(&mut self, now: u64) {
        for bucket in self.records.values_mut() {
            bucket.retain(|r| r.expires_at > now);
        }
        self.records.retain(|_, bucket| !bucket.is_empty());
    }

    pub fn record_count(&self, pseudonym: &Pseudonym) -> usize {
        self.records.get(pseudonym).map(|b| b.len()).unwrap_or(0)
    }
}

impl Default for StorageNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_keypair, SecretKey};
    use rand::rngs::OsRng;
    use std::net::Ipv4Addr;

    fn addr() -> NetAddress {
        NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 1 }
    }

    fn pseudonym() -> Pseudonym {
        Pseudonym([3u8; 32])
    }

    #[test]
    fn store_then_fetch_with_valid_signature_succeeds() {
        let mut node = StorageNode::new();
        let verifier_kp = crypto::derive_from_secret(&SecretKey([9u8; 32]));
        node.store(pseudonym(), b"ciphertext".to_vec(), 3600, verifier_kp.public, &addr(), 0).unwrap();

        let challenge = b"prove-it";
        let sig = crypto::sign(challenge, verifier_kp.secret());
        let results = node.fetch(&pseudonym(), challenge, &sig, 0).unwrap();
        assert_eq!(results, vec![b"ciphertext".to_vec()]);
    }

    #[test]
    fn fetch_with_wrong_key_fails() {
        let mut node = StorageNode::new();
        let verifier_kp = crypto::derive_from_secret(&SecretKey([9u8; 32]));
        node.store(pseudonym(), b"ciphertext".to_vec(), 3600, verifier_kp.public, &addr(), 0).unwrap();

        let wrong_kp = generate_keypair(&mut OsRng);
        let sig = crypto::sign(b"prove-it", wrong_kp.secret());
        assert!(node.fetch(&pseudonym(), b"prove-it", &sig, 0).is_err());
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let mut node = StorageNode::new();
        let verifier_kp = crypto::derive_from_secret(&SecretKey([1u8; 32]));
        let err = node
            .store(pseudonym(), b"x".to_vec(), MAX_TTL_SECS + 1, verifier_kp.public, &addr(), 0)
            .unwrap_err();
        assert!(matches!(err, MailboxError::TtlTooLarge { .. }));
    }

    #[test]
    fn expired_records_are_dropped() {
        let mut node = StorageNode::new();
        let verifier_kp = crypto::derive_from_secret(&SecretKey([1u8; 32]));
        node.store(pseudonym(), b"x".to_vec(), 10, verifier_kp.public, &addr(), 0).unwrap();
        node.expire(20);
        assert_eq!(node.record_count(&pseudonym()), 0);
    }

    #[test]
    fn rate_limit_blocks_excess_stores_from_one_source() {
        let mut node = StorageNode::new();
        let verifier_kp = crypto::derive_from_secret(&SecretKey([1u8; 32]));
        for i in 0..RATE_LIMIT_MAX_STORES {
            let p = Pseudonym([i as u8; 32]);
            node.store(p, b"x".to_vec(), 10, verifier_kp.public, &addr(), 0).unwrap();
        }
        let err = node
            .store(Pseudonym([200u8; 32]), b"x".to_vec(), 10, verifier_kp.public, &addr(), 0)
            .unwrap_err();
        assert!(matches!(err, MailboxError::RateLimited));
    }
}
