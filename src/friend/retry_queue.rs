//! Outbound message retry queue: exponential back-off starting at 5 s,
//! doubling per attempt, dropped after [`MAX_RETRIES`].
//!
//! An entry returned by [`RetryQueue::take_ready`] is removed from the
//! queue, not merely marked pending: the caller owns it until it calls
//! either [`RetryQueue::reschedule`] (attempt failed, try again later)
//! or lets it drop (attempt succeeded). This avoids re-sending a
//! message whose delivery already went out this tick just because it
//! was also due for a scheduled retry.

use std::collections::HashMap;

use crate::crypto::PublicKey;

pub const INITIAL_BACKOFF_SECS: u64 = 5;
pub const MAX_RETRIES: u32 = 10;

/// Back-off delay for the given (zero-indexed) attempt count.
pub(super) fn backoff_secs(attempt: u32) -> u64 {
    INITIAL_BACKOFF_SECS.saturating_mul(1u64 << attempt.min(32))
}

#[derive(Debug, Clone)]
struct RetryEntry {
    message: Vec<u8>,
    attempt: u32,
    next_attempt_at: u64,
}

/// An entry pulled out of the queue by [`RetryQueue::take_ready`],
/// ready for the caller to attempt delivery. `message` is the raw
/// plaintext bytes originally passed to [`RetryQueue::enqueue`] —
/// never re-encoded through UTF-8, since file-transfer chunks are not
/// guaranteed to be valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyMessage {
    pub peer: PublicKey,
    pub message: Vec<u8>,
    attempt: u32,
}

/// Per-process list of offline messages waiting for the DHT to resolve
/// the recipient, keyed by the recipient's public key so a second send
/// to the same target updates rather than duplicates the entry.
#[derive(Default)]
pub struct RetryQueue {
    entries: HashMap<PublicKey, RetryEntry>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `message` for `peer`, or update the pending message if an
    /// entry already exists. A second enqueue to the same target
    /// resets nothing else — the retry schedule is left untouched.
    pub fn enqueue(&mut self, peer: PublicKey, message: Vec<u8>, now: u64) {
        self.entries
            .entry(peer)
            .and_modify(|e| e.message = message.clone())
            .or_insert_with(|| RetryEntry {
                message,
                attempt: 0,
                next_attempt_at: now,
            });
    }

    pub fn remove(&mut self, peer: &PublicKey) {
        self.entries.remove(peer);
    }

    pub fn contains(&self, peer: &PublicKey) -> bool {
        self.entries.contains_key(peer)
    }

    /// Peers whose retry delay has elapsed as of `now`, removed from
    /// the queue. The caller must call [`Self::reschedule`] for each
    /// entry whose delivery attempt fails; entries left undisposed are
    /// gone for good (treat that as "delivered").
    pub fn take_ready(&mut self, now: u64) -> Vec<ReadyMessage> {
        let ready_peers: Vec<PublicKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.next_attempt_at <= now)
            .map(|(pk, _)| *pk)
            .collect();

        ready_peers
            .into_iter()
            .map(|peer| {
                let entry = self.entries.remove(&peer).expect("just matched");
                ReadyMessage { peer, message: entry.message, attempt: entry.attempt }
            })
            .collect()
    }

    /// Re-queue `entry` after a failed delivery attempt, advancing its
    /// back-off schedule. Dropped instead of re-queued once
    /// [`MAX_RETRIES`] attempts have been made.
    pub fn reschedule(&mut self, entry: ReadyMessage, now: u64) {
        let attempt = entry.attempt + 1;
        if attempt >= MAX_RETRIES {
            return;
        }
        self.entries.insert(
            entry.peer,
            RetryEntry {
                message: entry.message,
                attempt,
                next_attempt_at: now + backoff_secs(attempt),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
