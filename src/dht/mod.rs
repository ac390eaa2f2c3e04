//! Kademlia-style DHT (C5): routing table, iterative lookup, bootstrap,
//! and LAN discovery.

mod bootstrap;
mod lan_discovery;
mod lookup;
mod node;
mod routing_table;

pub use bootstrap::{BootstrapNode, BootstrapTracker, DhtStatus};
pub use lan_discovery::{broadcast_port, build_announcement, parse_announcement, LanAnnouncementError};
pub use lookup::FindNodeLookup;
pub use node::{DhtNode, NodeStatus};
pub use routing_table::{AddNodeOutcome, RoutingTable, ALPHA, K};

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::crypto::PublicKey;
use crate::transport::NetAddress;

/// Bound on the number of `get_nodes` rounds an iterative [`resolve`]
/// will issue before giving up.
const MAX_LOOKUP_ROUNDS: usize = 8;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("routing table has no nodes to query")]
    EmptyTable,
    #[error("lookup did not converge on the target within the round budget")]
    NotFound,
}

/// Owns the routing table and bootstrap/lookup state for one local DHT
/// identity. Network I/O (actually sending `get_nodes`/`send_nodes`
/// packets) is the caller's responsibility: this type is the pure
/// state machine C3/C4 drive.
pub struct Dht {
    table: Mutex<RoutingTable>,
    bootstrap: Mutex<BootstrapTracker>,
    /// Last-known address for peers not currently in the routing table
    /// (e.g. evicted, or known only via a prior lookup).
    last_known_address: Mutex<HashMap<PublicKey, NetAddress>>,
    /// Reverse of `last_known_address`, so inbound traffic arriving
    /// from a bare source address can be attributed to a public key
    /// before the session/friend layer looks up a session.
    address_to_pk: Mutex<HashMap<NetAddress, PublicKey>>,
}

impl Dht {
    pub fn new(local_pk: PublicKey, min_bootstrap_nodes: u32) -> Self {
        Dht {
            table: Mutex::new(RoutingTable::new(local_pk)),
            bootstrap: Mutex::new(BootstrapTracker::new(min_bootstrap_nodes)),
            last_known_address: Mutex::new(HashMap::new()),
            address_to_pk: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_public_key(&self) -> PublicKey {
        self.table.lock().local_public_key()
    }

    pub fn add_bootstrap_seed(&self, node: BootstrapNode) {
        self.bootstrap.lock().add_seed(node);
    }

    pub fn bootstrap_seeds(&self) -> Vec<BootstrapNode> {
        self.bootstrap.lock().seeds().to_vec()
    }

    pub fn status(&self) -> DhtStatus {
        let live = self.table.lock().len();
        self.bootstrap.lock().status(live)
    }

    /// Incorporate a freshly seen node into the routing table,
    /// following Kademlia's prefer-the-longer-known-node eviction
    /// policy on bucket contention.
    #[instrument(skip(self, node), fields(peer = ?node.public_key))]
    pub fn observe_node(&self, node: DhtNode) -> AddNodeOutcome {
        self.last_known_address
            .lock()
            .insert(node.public_key, node.address.clone());
        self.address_to_pk
            .lock()
            .insert(node.address.clone(), node.public_key);
        self.table.lock().add_node(node)
    }

    /// The public key last observed sending from `address`, if any.
    /// Used to attribute an inbound packet carrying only a source
    /// address to the peer it came from.
    pub fn pk_for_address(&self, address: &NetAddress) -> Option<PublicKey> {
        self.address_to_pk.lock().get(address).copied()
    }

    /// Call once a ping to `stale`'s previous occupant of a contended
    /// bucket slot has timed out, confirming it as dead.
    pub fn evict_and_insert(&self, stale: &PublicKey, replacement: DhtNode) {
        self.table.lock().evict_and_insert(stale, replacement);
    }

    /// Record a ping round-trip failure for `peer`. Returns `true` if
    /// the node has now failed twice in a row and was evicted.
    pub fn record_ping_timeout(&self, peer: &PublicKey) -> bool {
        let mut table = self.table.lock();
        let evict = table
            .get_mut(peer)
            .map(|n| n.record_ping_timeout())
            .unwrap_or(false);
        if evict {
            table.remove(peer);
            debug!(peer = ?peer, "evicted node after two consecutive ping timeouts");
        }
        evict
    }

    pub fn record_ping_success(&self, peer: &PublicKey, now: u64) {
        if let Some(node) = self.table.lock().get_mut(peer) {
            node.touch(now);
        }
    }

    /// The `count` nodes in the local table closest to `target`.
    pub fn find_closest(&self, target: &PublicKey, count: usize) -> Vec<DhtNode> {
        self.table.lock().find_closest(target, count)
    }

    pub fn storage_nodes_near(&self, target: &PublicKey, count: usize) -> Vec<DhtNode> {
        self.table.lock().storage_nodes_near(target, count)
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Begin an iterative lookup for `peer_pk`, seeded from our own
    /// closest known nodes. An empty routing table fails immediately
    /// per the "resolve returns NotFound immediately" failure
    /// semantics; callers (C6) queue the work for retry.
    pub fn start_lookup(&self, peer_pk: PublicKey) -> Result<FindNodeLookup, DhtError> {
        if self.is_empty() {
            return Err(DhtError::EmptyTable);
        }
        let seed = self.find_closest(&peer_pk, K);
        Ok(FindNodeLookup::new(peer_pk, seed))
    }

    /// Drive a lookup to completion using only the local table (no
    /// network I/O): useful for a synchronous best-effort resolution
    /// attempt, or in tests. The async friend engine instead drives
    /// [`FindNodeLookup`] directly against C3 for real `get_nodes`
    /// round trips.
    pub fn resolve_locally(&self, peer_pk: &PublicKey) -> Result<NetAddress, DhtError> {
        if let Some(node) = self.table.lock().get(peer_pk) {
            return Ok(node.address.clone());
        }
        if let Some(addr) = self.last_known_address.lock().get(peer_pk) {
            return Ok(addr.clone());
        }
        let mut lookup = self.start_lookup(*peer_pk)?;
        for _ in 0..MAX_LOOKUP_ROUNDS {
            let batch = lookup.next_queries();
            if batch.is_empty() {
                break;
            }
            let responses: Vec<DhtNode> = batch
                .iter()
                .flat_map(|pk| self.table.lock().get(pk).cloned())
                .collect();
            lookup.add_candidates(responses);
            if lookup.is_converged() {
                break;
            }
        }
        lookup
            .resolved_address()
            .map(|n| n.address)
            .ok_or(DhtError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> NetAddress {
        NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 33445 }
    }

    #[test]
    fn empty_table_resolve_fails_immediately() {
        let dht = Dht::new(PublicKey([0u8; 32]), 4);
        assert!(matches!(
            dht.resolve_locally(&PublicKey([1u8; 32])),
            Err(DhtError::EmptyTable)
        ));
    }

    #[test]
    fn resolve_locally_finds_directly_known_peer() {
        let dht = Dht::new(PublicKey([0u8; 32]), 1);
        let peer = PublicKey([9u8; 32]);
        dht.observe_node(DhtNode::new(peer, addr(), 0));
        let resolved = dht.resolve_locally(&peer).unwrap();
        assert_eq!(resolved, addr());
    }

    #[test]
    fn pk_for_address_resolves_the_most_recent_observer() {
        let dht = Dht::new(PublicKey([0u8; 32]), 1);
        let peer = PublicKey([9u8; 32]);
        assert!(dht.pk_for_address(&addr()).is_none());
        dht.observe_node(DhtNode::new(peer, addr(), 0));
        assert_eq!(dht.pk_for_address(&addr()), Some(peer));
    }

    #[test]
    fn status_transitions_to_connected_at_threshold() {
        let dht = Dht::new(PublicKey([0u8; 32]), 1);
        assert_eq!(dht.status(), DhtStatus::Bootstrapping);
        dht.observe_node(DhtNode::new(PublicKey([1u8; 32]), addr(), 0));
        assert_eq!(dht.status(), DhtStatus::Connected);
    }

    #[test]
    fn two_consecutive_ping_timeouts_evict() {
        let dht = Dht::new(PublicKey([0u8; 32]), 1);
        let peer = PublicKey([1u8; 32]);
        dht.observe_node(DhtNode::new(peer, addr(), 0));
        assert!(!dht.record_ping_timeout(&peer));
        assert!(dht.record_ping_timeout(&peer));
        assert_eq!(dht.node_count(), 0);
    }
}
