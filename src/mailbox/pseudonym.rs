//! Epoch pseudonyms: per-(friendship, epoch) recipient identifiers
//! derivable by both ends from a shared secret, but by no one else.

use crate::crypto::{self, KeyPair, PublicKey, SecretKey};

/// Epoch length: 24 hours.
pub const EPOCH_SECS: u64 = 24 * 60 * 60;

/// A 32-byte pseudonym standing in for a recipient for one epoch of one
/// friendship. Opaque to storage nodes; reveals neither party's real
/// public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pseudonym(pub [u8; 32]);

impl std::fmt::Debug for Pseudonym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pseudonym({})", hex::encode(self.0))
    }
}

pub fn epoch_for(unix_time: u64) -> u64 {
    unix_time / EPOCH_SECS
}

fn pseudonym_context(recipient_pk: &PublicKey, epoch: u64) -> Vec<u8> {
    let mut ctx = Vec::with_capacity(13 + 32 + 8);
    ctx.extend_from_slice(b"async-tox-v1");
    ctx.extend_from_slice(&recipient_pk.0);
    ctx.extend_from_slice(&epoch.to_le_bytes());
    ctx
}

/// `P_E = HKDF(X25519(my_sk, peer_pk), "async-tox-v1" ‖ recipient_pk ‖ E)`.
/// Either side of a friendship computes the same value: the sender uses
/// its own secret and the recipient's public key; the recipient uses
/// its own secret and the sender's public key, since X25519 is
/// symmetric.
pub fn derive_pseudonym(my_sk: &SecretKey, peer_pk: &PublicKey, recipient_pk: &PublicKey, epoch: u64) -> Pseudonym {
    let context = pseudonym_context(recipient_pk, epoch);
    Pseudonym(crypto::encrypt_symmetric_key(my_sk, peer_pk, &context))
}

/// Pseudonyms for the current epoch and the `lookback` epochs before
/// it, newest first, used when polling on reconnect so messages stored
/// just before an epoch boundary are not missed.
pub fn recent_pseudonyms(my_sk: &SecretKey, peer_pk: &PublicKey, recipient_pk: &PublicKey, now: u64, lookback: u64) -> Vec<Pseudonym> {
    let current = epoch_for(now);
    (0..=lookback)
        .map(|back| derive_pseudonym(my_sk, peer_pk, recipient_pk, current.saturating_sub(back)))
        .collect()
}

fn verifier_context(pseudonym: &Pseudonym) -> Vec<u8> {
    let mut ctx = Vec::with_capacity(21 + 32);
    ctx.extend_from_slice(b"async-tox-verifier-v1");
    ctx.extend_from_slice(&pseudonym.0);
    ctx
}

/// The short-lived Ed25519 keypair that authenticates `FETCH` requests
/// for `pseudonym`. Derivable by both friendship ends from the shared
/// secret, so the storage node (which knows neither) cannot forge it,
/// but either legitimate party can publish and later prove ownership of
/// the pseudonym.
pub fn derive_verifier_keypair(my_sk: &SecretKey, peer_pk: &PublicKey, pseudonym: &Pseudonym) -> KeyPair {
    let context = verifier_context(pseudonym);
    let bytes = crypto::encrypt_symmetric_key(my_sk, peer_pk, &context);
    crypto::derive_from_secret(&SecretKey(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use rand::rngs::OsRng;

    #[test]
    fn both_friends_derive_the_same_pseudonym() {
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);
        let epoch = 19_000;

        let p_from_alice = derive_pseudonym(alice.secret(), &bob.public, &bob.public, epoch);
        let p_from_bob = derive_pseudonym(bob.secret(), &alice.public, &bob.public, epoch);
        assert_eq!(p_from_alice.0, p_from_bob.0);
    }

    #[test]
    fn different_epochs_yield_different_pseudonyms() {
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);
        let p1 = derive_pseudonym(alice.secret(), &bob.public, &bob.public, 1);
        let p2 = derive_pseudonym(alice.secret(), &bob.public, &bob.public, 2);
        assert_ne!(p1.0, p2.0);
    }

    #[test]
    fn verifier_keypairs_match_on_both_ends() {
        let mut rng = OsRng;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);
        let pseudonym = derive_pseudonym(alice.secret(), &bob.public, &bob.public, 7);

        let v1 = derive_verifier_keypair(alice.secret(), &bob.public, &pseudonym);
        let v2 = derive_verifier_keypair(bob.secret(), &alice.public, &pseudonym);
        assert_eq!(v1.public, v2.public);
    }
}
