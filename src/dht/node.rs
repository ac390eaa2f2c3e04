//! DHT node records and status tracking.

use crate::crypto::PublicKey;
use crate::transport::NetAddress;

/// Liveness status of a routing-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Never pinged, or last ping succeeded.
    Good,
    /// One ping has timed out; one more failure evicts the node.
    Questionable,
}

/// A single known peer in the DHT: identity, last-known address, and
/// liveness bookkeeping. `last_ping` and `failed_pings` drive the
/// "pings that time out twice in a row evict the node" rule.
#[derive(Debug, Clone)]
pub struct DhtNode {
    pub public_key: PublicKey,
    pub address: NetAddress,
    pub last_seen: u64,
    pub last_ping_sent: Option<u64>,
    pub failed_pings: u32,
    pub status: NodeStatus,
    /// Whether this node has advertised willingness to serve as a
    /// mailbox storage node (C8).
    pub is_storage_node: bool,
}

impl DhtNode {
    pub fn new(public_key: PublicKey, address: NetAddress, now: u64) -> Self {
        DhtNode {
            public_key,
            address,
            last_seen: now,
            last_ping_sent: None,
            failed_pings: 0,
            status: NodeStatus::Good,
            is_storage_node: false,
        }
    }

    pub fn touch(&mut self, now: u64) {
        self.last_seen = now;
        self.failed_pings = 0;
        self.status = NodeStatus::Good;
    }

    pub fn record_ping_sent(&mut self, now: u64) {
        self.last_ping_sent = Some(now);
    }

    /// Record a ping timeout. Returns `true` once the node has now
    /// timed out twice in a row and should be evicted.
    pub fn record_ping_timeout(&mut self) -> bool {
        self.failed_pings += 1;
        self.status = NodeStatus::Questionable;
        self.failed_pings >= 2
    }
}

/// XOR distance between two 256-bit public-key identifiers.
pub fn xor_distance(a: &PublicKey, b: &PublicKey) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a.0[i] ^ b.0[i];
    }
    out
}

/// Number of leading zero bits in a 256-bit XOR distance, used as the
/// k-bucket index. Returns `None` for a zero distance (identical IDs).
pub fn leading_zero_bits(distance: &[u8; 32]) -> Option<usize> {
    for (i, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            return Some(i * 8 + byte.leading_zeros() as usize);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_ids_have_zero_distance_and_no_bucket() {
        let pk = PublicKey([7u8; 32]);
        let distance = xor_distance(&pk, &pk);
        assert_eq!(distance, [0u8; 32]);
        assert_eq!(leading_zero_bits(&distance), None);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = PublicKey([1u8; 32]);
        let b = PublicKey([2u8; 32]);
        assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
    }

    #[test]
    fn second_consecutive_timeout_signals_eviction() {
        let mut node = DhtNode::new(PublicKey([1u8; 32]), NetAddress::V4 { ip: std::net::Ipv4Addr::LOCALHOST, port: 1 }, 0);
        assert!(!node.record_ping_timeout());
        assert!(node.record_ping_timeout());
    }
}
