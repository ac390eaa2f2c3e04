//! Kademlia routing table: 256 k-buckets indexed by XOR-distance prefix
//! length, `K` entries each, classical longest-known-wins eviction.

use std::collections::VecDeque;

use crate::crypto::PublicKey;

use super::node::{leading_zero_bits, xor_distance, DhtNode};

/// Bucket capacity. `k-bucket size ... [is an] implementation choice`;
/// 8 is the conventional Kademlia/Tox value.
pub const K: usize = 8;

/// Lookup parallelism: how many unqueried candidates a `FindNodeLookup`
/// asks in one round.
pub const ALPHA: usize = 3;

const NUM_BUCKETS: usize = 256;

struct KBucket {
    /// Front = longest-known, back = most-recently-seen.
    entries: VecDeque<DhtNode>,
}

impl KBucket {
    fn new() -> Self {
        KBucket {
            entries: VecDeque::with_capacity(K),
        }
    }

    fn find(&self, pk: &PublicKey) -> Option<usize> {
        self.entries.iter().position(|n| &n.public_key == pk)
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= K
    }
}

/// Outcome of [`RoutingTable::add_node`].
pub enum AddNodeOutcome {
    Inserted,
    Updated,
    /// Self-insert; ignored.
    Ignored,
    /// Bucket full of live nodes; caller should ping the returned node
    /// and call [`RoutingTable::evict_and_insert`] if it fails to
    /// respond.
    BucketFull { oldest: DhtNode },
}

/// 256-bucket Kademlia routing table keyed by XOR distance from a local
/// public-key identity.
pub struct RoutingTable {
    local_pk: PublicKey,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_pk: PublicKey) -> Self {
        let mut buckets = Vec::with_capacity(NUM_BUCKETS);
        for _ in 0..NUM_BUCKETS {
            buckets.push(KBucket::new());
        }
        RoutingTable { local_pk, buckets }
    }

    pub fn local_public_key(&self) -> PublicKey {
        self.local_pk
    }

    fn bucket_index(&self, pk: &PublicKey) -> Option<usize> {
        leading_zero_bits(&xor_distance(&self.local_pk, pk))
    }

    /// Kademlia's classical bucket-contention policy: prefer live,
    /// longer-known nodes. A new node to a full bucket is returned as
    /// `BucketFull` rather than inserted so the caller can ping the
    /// oldest entry first.
    pub fn add_node(&mut self, node: DhtNode) -> AddNodeOutcome {
        let idx = match self.bucket_index(&node.public_key) {
            Some(idx) => idx,
            None => return AddNodeOutcome::Ignored,
        };
        let bucket = &mut self.buckets[idx];

        if let Some(existing) = bucket.find(&node.public_key) {
            let mut entry = bucket.entries.remove(existing).expect("index just found");
            entry.touch(node.last_seen);
            entry.address = node.address;
            bucket.entries.push_back(entry);
            return AddNodeOutcome::Updated;
        }

        if !bucket.is_full() {
            bucket.entries.push_back(node);
            return AddNodeOutcome::Inserted;
        }

        let oldest = bucket.entries.front().expect("bucket is full").clone();
        AddNodeOutcome::BucketFull { oldest }
    }

    /// Evict `stale` from its bucket (after a failed liveness ping) and
    /// insert `replacement` in its place.
    pub fn evict_and_insert(&mut self, stale: &PublicKey, replacement: DhtNode) {
        if let Some(idx) = self.bucket_index(stale) {
            let bucket = &mut self.buckets[idx];
            if let Some(pos) = bucket.find(stale) {
                bucket.entries.remove(pos);
            }
            if !bucket.is_full() {
                bucket.entries.push_back(replacement);
            }
        }
    }

    pub fn remove(&mut self, pk: &PublicKey) -> Option<DhtNode> {
        let idx = self.bucket_index(pk)?;
        let bucket = &mut self.buckets[idx];
        let pos = bucket.find(pk)?;
        bucket.entries.remove(pos)
    }

    pub fn get(&self, pk: &PublicKey) -> Option<&DhtNode> {
        let idx = self.bucket_index(pk)?;
        self.buckets[idx].entries.iter().find(|n| &n.public_key == pk)
    }

    pub fn get_mut(&mut self, pk: &PublicKey) -> Option<&mut DhtNode> {
        let idx = self.bucket_index(pk)?;
        self.buckets[idx].entries.iter_mut().find(|n| &n.public_key == pk)
    }

    /// The `count` nodes in the table closest to `target` by XOR
    /// distance, nearest first.
    pub fn find_closest(&self, target: &PublicKey, count: usize) -> Vec<DhtNode> {
        let mut all: Vec<(DhtNode, [u8; 32])> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .map(|n| (n.clone(), xor_distance(&n.public_key, target)))
            .collect();
        all.sort_by(|a, b| a.1.cmp(&b.1));
        all.into_iter().take(count).map(|(n, _)| n).collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn storage_nodes_near(&self, target: &PublicKey, count: usize) -> Vec<DhtNode> {
        self.find_closest(target, self.len())
            .into_iter()
            .filter(|n| n.is_storage_node)
            .take(count)
            .collect()
    }
}
