//! Replay protection: a bounded LRU of observed handshake nonces per
//! peer public key, evicting the oldest on overflow.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::crypto::PublicKey;

/// Default capacity of each peer's nonce window.
pub const REPLAY_CACHE_CAPACITY: usize = 4096;

struct PeerWindow {
    seen: HashSet<[u8; 32]>,
    order: VecDeque<[u8; 32]>,
}

impl PeerWindow {
    fn new() -> Self {
        PeerWindow {
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, nonce: &[u8; 32]) -> bool {
        self.seen.contains(nonce)
    }

    fn insert(&mut self, nonce: [u8; 32], capacity: usize) {
        if self.seen.insert(nonce) {
            self.order.push_back(nonce);
            while self.order.len() > capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
    }
}

/// Per-peer bounded set of observed handshake nonces.
pub struct ReplayCache {
    capacity: usize,
    windows: HashMap<PublicKey, PeerWindow>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::with_capacity(REPLAY_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ReplayCache {
            capacity,
            windows: HashMap::new(),
        }
    }

    /// Returns `true` if `nonce` has already been observed for `peer`
    /// within the current window (i.e. this is a replay and should be
    /// rejected).
    pub fn is_replay(&self, peer: &PublicKey, nonce: &[u8; 32]) -> bool {
        self.windows
            .get(peer)
            .map(|w| w.contains(nonce))
            .unwrap_or(false)
    }

    /// Record `nonce` as observed for `peer`, evicting the oldest entry
    /// in that peer's window if it is now over capacity.
    pub fn record(&mut self, peer: PublicKey, nonce: [u8; 32]) {
        self.windows
            .entry(peer)
            .or_insert_with(PeerWindow::new)
            .insert(nonce, self.capacity);
    }

    /// Check-and-record in one step. Returns `false` (rejected) if the
    /// nonce was already seen; otherwise records it and returns `true`.
    pub fn check_and_record(&mut self, peer: PublicKey, nonce: [u8; 32]) -> bool {
        if self.is_replay(&peer, &nonce) {
            return false;
        }
        self.record(peer, nonce);
        true
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}
