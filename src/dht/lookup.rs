//! Iterative `get_nodes` lookup state machine converging on the `K`
//! closest live nodes to a target public key.

use crate::crypto::PublicKey;

use super::node::{xor_distance, DhtNode};
use super::routing_table::{ALPHA, K};

struct Candidate {
    node: DhtNode,
    distance: [u8; 32],
    queried: bool,
}

/// Drives one iterative `FIND_NODE`-style lookup. The caller repeatedly
/// calls [`next_queries`](Self::next_queries), sends a `get_nodes`
/// packet to each, and feeds responses back via
/// [`add_candidates`](Self::add_candidates) until
/// [`is_converged`](Self::is_converged).
pub struct FindNodeLookup {
    target: PublicKey,
    candidates: Vec<Candidate>,
}

impl FindNodeLookup {
    pub fn new(target: PublicKey, seed: Vec<DhtNode>) -> Self {
        let mut candidates: Vec<Candidate> = seed
            .into_iter()
            .map(|node| {
                let distance = xor_distance(&node.public_key, &target);
                Candidate {
                    node,
                    distance,
                    queried: false,
                }
            })
            .collect();
        candidates.sort_by(|a, b| a.distance.cmp(&b.distance));
        FindNodeLookup { target, candidates }
    }

    /// Up to `ALPHA` not-yet-queried candidates to send `get_nodes` to
    /// next.
    pub fn next_queries(&mut self) -> Vec<PublicKey> {
        let mut out = Vec::with_capacity(ALPHA);
        for c in &mut self.candidates {
            if out.len() >= ALPHA {
                break;
            }
            if !c.queried {
                c.queried = true;
                out.push(c.node.public_key);
            }
        }
        out
    }

    pub fn add_candidates(&mut self, nodes: Vec<DhtNode>) {
        for node in nodes {
            if self.candidates.iter().any(|c| c.node.public_key == node.public_key) {
                continue;
            }
            let distance = xor_distance(&node.public_key, &self.target);
            self.candidates.push(Candidate {
                node,
                distance,
                queried: false,
            });
        }
        self.candidates.sort_by(|a, b| a.distance.cmp(&b.distance));
        self.candidates.truncate(K * 3);
    }

    /// Converged once every one of the `K` closest candidates has been
    /// queried.
    pub fn is_converged(&self) -> bool {
        self.candidates.iter().take(K).all(|c| c.queried)
    }

    pub fn results(&self) -> Vec<DhtNode> {
        self.candidates.iter().take(K).map(|c| c.node.clone()).collect()
    }

    /// The node holding the target's last-known address, if the lookup
    /// converged on the target itself.
    pub fn resolved_address(&self) -> Option<DhtNode> {
        self.candidates
            .iter()
            .find(|c| c.node.public_key == self.target)
            .map(|c| c.node.clone())
    }
}
