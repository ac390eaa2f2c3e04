//! Client-side mailbox operations: `send_async` and polling on
//! reconnect, expressed against the `k` storage nodes the DHT
//! currently advertises for a (friend, epoch) pair.

use crate::crypto::{KeyPair, PublicKey, Signature};
use crate::dht::DhtNode;
use crate::rng::Rng;
use crate::time::TimeSource;

use super::pseudonym::{self, Pseudonym};
use super::sealed_box::SealedBox;
use super::storage_node::MailboxError;

/// How many trailing epochs to also poll on reconnect, so messages
/// stored just before an epoch boundary are not missed.
pub const FETCH_LOOKBACK_EPOCHS: u64 = 2;

/// Default TTL offered for a stored message: 3 days.
pub const DEFAULT_TTL_SECS: u64 = 3 * 24 * 60 * 60;

/// Everything needed to issue one `STORE` to one mailbox node.
pub struct StoreRequest {
    pub pseudonym: Pseudonym,
    pub ciphertext: Vec<u8>,
    pub ttl_secs: u64,
    pub verifier: PublicKey,
}

/// Everything needed to issue one `FETCH` to one mailbox node.
pub struct FetchRequest {
    pub pseudonym: Pseudonym,
    pub challenge: Vec<u8>,
    pub signature: Signature,
}

/// Build the `STORE` request for `message` addressed to `recipient_pk`,
/// and the storage-node set it should be sent to. Returns
/// `NoStorageAvailable` if the DHT currently advertises none.
pub fn prepare_send_async(
    local: &KeyPair,
    recipient_pk: &PublicKey,
    message: &[u8],
    storage_nodes: &[DhtNode],
    rng: &mut dyn Rng,
    time: &dyn TimeSource,
) -> Result<(StoreRequest, Vec<DhtNode>), MailboxError> {
    if storage_nodes.is_empty() {
        return Err(MailboxError::NoStorageAvailable);
    }
    let epoch = pseudonym::epoch_for(time.now());
    let pseudonym = pseudonym::derive_pseudonym(local.secret(), recipient_pk, recipient_pk, epoch);
    let verifier_kp = pseudonym::derive_verifier_keypair(local.secret(), recipient_pk, &pseudonym);

    let sealed = SealedBox::seal(recipient_pk, &local.public, message, rng)
        .map_err(|_| MailboxError::NoStorageAvailable)?;

    Ok((
        StoreRequest {
            pseudonym,
            ciphertext: sealed.to_bytes(),
            ttl_secs: DEFAULT_TTL_SECS,
            verifier: verifier_kp.public,
        },
        storage_nodes.to_vec(),
    ))
}

/// Build the `FETCH` requests (current epoch plus
/// [`FETCH_LOOKBACK_EPOCHS`] before it) a recipient issues to its
/// mailbox nodes on reconnect, each signed to authenticate ownership
/// of that epoch's pseudonym.
pub fn prepare_fetches(local: &KeyPair, sender_pk: &PublicKey, challenge: &[u8], time: &dyn TimeSource) -> Vec<FetchRequest> {
    pseudonym::recent_pseudonyms(local.secret(), sender_pk, &local.public, time.now(), FETCH_LOOKBACK_EPOCHS)
        .into_iter()
        .map(|pseudonym| {
            let verifier_kp = pseudonym::derive_verifier_keypair(local.secret(), sender_pk, &pseudonym);
            let signature = crate::crypto::sign(challenge, verifier_kp.secret());
            FetchRequest { pseudonym, challenge: challenge.to_vec(), signature }
        })
        .collect()
}

/// Open a ciphertext returned by a mailbox `FETCH`, recovering the
/// original sender and message.
pub fn open_fetched(local: &KeyPair, wire: &[u8]) -> Result<(PublicKey, Vec<u8>), MailboxError> {
    let sealed = SealedBox::from_bytes(wire).map_err(|_| MailboxError::AuthFailure)?;
    sealed.open(local.secret()).map_err(|_| MailboxError::AuthFailure)
}

impl StoreRequest {
    /// `pseudonym(32) ‖ ttl_secs(8 BE) ‖ verifier(32) ‖ ciphertext`.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 8 + 32 + self.ciphertext.len());
        out.extend_from_slice(&self.pseudonym.0);
        out.extend_from_slice(&self.ttl_secs.to_be_bytes());
        out.extend_from_slice(&self.verifier.0);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_wire(payload: &[u8]) -> Option<Self> {
        if payload.len() < 72 {
            return None;
        }
        let mut pseudonym = [0u8; 32];
        pseudonym.copy_from_slice(&payload[0..32]);
        let mut ttl_bytes = [0u8; 8];
        ttl_bytes.copy_from_slice(&payload[32..40]);
        let mut verifier = [0u8; 32];
        verifier.copy_from_slice(&payload[40..72]);
        Some(StoreRequest {
            pseudonym: Pseudonym(pseudonym),
            ttl_secs: u64::from_be_bytes(ttl_bytes),
            verifier: PublicKey(verifier),
            ciphertext: payload[72..].to_vec(),
        })
    }
}

impl FetchRequest {
    /// `pseudonym(32) ‖ challenge_len(2 BE) ‖ challenge ‖ signature(64)`.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 2 + self.challenge.len() + 64);
        out.extend_from_slice(&self.pseudonym.0);
        out.extend_from_slice(&(self.challenge.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.challenge);
        out.extend_from_slice(&self.signature.0);
        out
    }

    pub fn from_wire(payload: &[u8]) -> Option<Self> {
        if payload.len() < 34 {
            return None;
        }
        let mut pseudonym = [0u8; 32];
        pseudonym.copy_from_slice(&payload[0..32]);
        let mut len_bytes = [0u8; 2];
        len_bytes.copy_from_slice(&payload[32..34]);
        let challenge_len = u16::from_be_bytes(len_bytes) as usize;
        if payload.len() < 34 + challenge_len + 64 {
            return None;
        }
        let challenge = payload[34..34 + challenge_len].to_vec();
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&payload[34 + challenge_len..34 + challenge_len + 64]);
        Some(FetchRequest { pseudonym: Pseudonym(pseudonym), challenge, signature: Signature(signature) })
    }
}

/// Frame the ciphertexts a storage node found for `pseudonym` into one
/// `FETCH` reply: `pseudonym(32) ‖ count(2 BE) ‖ (len(4 BE) ‖ bytes)*`.
pub fn encode_fetch_response(pseudonym: &Pseudonym, records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&pseudonym.0);
    out.extend_from_slice(&(records.len() as u16).to_be_bytes());
    for record in records {
        out.extend_from_slice(&(record.len() as u32).to_be_bytes());
        out.extend_from_slice(record);
    }
    out
}

pub fn decode_fetch_response(payload: &[u8]) -> Option<(Pseudonym, Vec<Vec<u8>>)> {
    if payload.len() < 34 {
        return None;
    }
    let mut pseudonym = [0u8; 32];
    pseudonym.copy_from_slice(&payload[0..32]);
    let mut count_bytes = [0u8; 2];
    count_bytes.copy_from_slice(&payload[32..34]);
    let count = u16::from_be_bytes(count_bytes) as usize;

    let mut pos = 34;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        if payload.len() < pos + 4 {
            return None;
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&payload[pos..pos + 4]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        pos += 4;
        if payload.len() < pos + len {
            return None;
        }
        records.push(payload[pos..pos + len].to_vec());
        pos += len;
    }
    Some((Pseudonym(pseudonym), records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use crate::mailbox::storage_node::StorageNode;
    use crate::time::SystemTimeSource;
    use crate::transport::NetAddress;
    use rand::rngs::OsRng;
    use std::net::Ipv4Addr;

    fn dht_node(pk: PublicKey) -> DhtNode {
        let mut node = DhtNode::new(pk, NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 1 }, 0);
        node.is_storage_node = true;
        node
    }

    #[test]
    fn no_storage_nodes_fails_fast() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng).public;
        let err = prepare_send_async(&alice, &bob, b"hi", &[], &mut rng, &time).unwrap_err();
        assert!(matches!(err, MailboxError::NoStorageAvailable));
    }

    #[test]
    fn end_to_end_send_store_fetch_open() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);
        let storage_node_info = dht_node(generate_keypair(&mut rng).public);

        let (store_req, targets) = prepare_send_async(&alice, &bob.public, b"catch you later", &[storage_node_info], &mut rng, &time).unwrap();
        assert_eq!(targets.len(), 1);

        let mut node = StorageNode::new();
        node.store(
            store_req.pseudonym,
            store_req.ciphertext,
            store_req.ttl_secs,
            store_req.verifier,
            &NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 2 },
            time.now(),
        )
        .unwrap();

        let challenge = b"are-you-there";
        let fetches = prepare_fetches(&bob, &alice.public, challenge, &time);
        let matching = fetches
            .iter()
            .find(|f| node.record_count(&f.pseudonym) > 0)
            .expect("bob's current-epoch pseudonym should match alice's store");

        let results = node.fetch(&matching.pseudonym, &matching.challenge, &matching.signature, time.now()).unwrap();
        let (sender_pk, message) = open_fetched(&bob, &results[0]).unwrap();
        assert_eq!(sender_pk, alice.public);
        assert_eq!(message, b"catch you later");
    }

    #[test]
    fn store_and_fetch_requests_round_trip_through_wire() {
        let mut rng = OsRng;
        let time = SystemTimeSource;
        let alice = generate_keypair(&mut rng);
        let bob = generate_keypair(&mut rng);
        let storage_node_info = dht_node(generate_keypair(&mut rng).public);

        let (store_req, _) = prepare_send_async(&alice, &bob.public, b"hi", &[storage_node_info], &mut rng, &time).unwrap();
        let parsed = StoreRequest::from_wire(&store_req.to_wire()).unwrap();
        assert_eq!(parsed.pseudonym.0, store_req.pseudonym.0);
        assert_eq!(parsed.ciphertext, store_req.ciphertext);
        assert_eq!(parsed.ttl_secs, store_req.ttl_secs);

        let fetch_req = &prepare_fetches(&bob, &alice.public, b"challenge", &time)[0];
        let parsed = FetchRequest::from_wire(&fetch_req.to_wire()).unwrap();
        assert_eq!(parsed.pseudonym.0, fetch_req.pseudonym.0);
        assert_eq!(parsed.challenge, fetch_req.challenge);
    }

    #[test]
    fn fetch_response_round_trips_multiple_records() {
        let pseudonym = Pseudonym([4u8; 32]);
        let records = vec![b"one".to_vec(), b"two".to_vec()];
        let wire = encode_fetch_response(&pseudonym, &records);
        let (decoded_pseudonym, decoded_records) = decode_fetch_response(&wire).unwrap();
        assert_eq!(decoded_pseudonym.0, pseudonym.0);
        assert_eq!(decoded_records, records);
    }
}
