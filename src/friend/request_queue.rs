//! Outbound friend-request retry queue (spec data model:
//! `PendingFriendRequest`): retries an unanswered friend request, with
//! the same exponential back-off shape as [`super::retry_queue`] but
//! exposing `retry_count`/`next_retry_at` directly, since callers
//! inspect them (see the offline-retry end-to-end scenario).

use std::collections::HashMap;

use crate::crypto::PublicKey;

use super::retry_queue::{backoff_secs, MAX_RETRIES};

/// One outbound friend request still waiting for the DHT to resolve
/// its target, or for the target to accept/reject it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFriendRequest {
    pub target_pk: PublicKey,
    pub message: String,
    pub retry_count: u32,
    pub next_retry_at: u64,
    pub created_at: u64,
}

/// Pulled out of the queue by [`OutboundRequestQueue::take_ready`],
/// ready for the caller to attempt a send. Dropped (not re-queued) if
/// the attempt succeeds; pass back to [`OutboundRequestQueue::reschedule`]
/// if it doesn't.
pub type ReadyFriendRequest = PendingFriendRequest;

/// Per-process list of outbound friend requests, keyed by target
/// public key so a second `add_friend` to the same target updates the
/// pending message rather than duplicating the entry or resetting its
/// retry schedule.
#[derive(Default)]
pub struct OutboundRequestQueue {
    entries: HashMap<PublicKey, PendingFriendRequest>,
}

impl OutboundRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a friend request to `target_pk`, or update the pending
    /// message if one is already outstanding. Per spec, "a second
    /// `add_friend` to the same target updates the pending message and
    /// resets nothing else."
    pub fn enqueue(&mut self, target_pk: PublicKey, message: String, now: u64) {
        self.entries
            .entry(target_pk)
            .and_modify(|e| e.message = message.clone())
            .or_insert_with(|| PendingFriendRequest {
                target_pk,
                message,
                retry_count: 0,
                next_retry_at: now,
                created_at: now,
            });
    }

    pub fn get(&self, target_pk: &PublicKey) -> Option<&PendingFriendRequest> {
        self.entries.get(target_pk)
    }

    pub fn remove(&mut self, target_pk: &PublicKey) {
        self.entries.remove(target_pk);
    }

    pub fn contains(&self, target_pk: &PublicKey) -> bool {
        self.entries.contains_key(target_pk)
    }

    /// Requests whose retry delay has elapsed as of `now`, removed
    /// from the queue. Call [`Self::reschedule`] for each one whose
    /// send attempt fails; letting one drop instead means "delivered,
    /// don't retry it again."
    pub fn take_ready(&mut self, now: u64) -> Vec<ReadyFriendRequest> {
        let ready: Vec<PublicKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.next_retry_at <= now)
            .map(|(pk, _)| *pk)
            .collect();
        ready
            .into_iter()
            .map(|pk| self.entries.remove(&pk).expect("just matched"))
            .collect()
    }

    /// Re-queue `entry` after a failed send attempt, advancing
    /// `retry_count` and `next_retry_at`. Dropped once `retry_count`
    /// would reach [`super::retry_queue::MAX_RETRIES`].
    pub fn reschedule(&mut self, mut entry: PendingFriendRequest, now: u64) {
        entry.retry_count += 1;
        if entry.retry_count >= MAX_RETRIES {
            return;
        }
        entry.next_retry_at = now + backoff_secs(entry.retry_count);
        self.entries.insert(entry.target_pk, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
