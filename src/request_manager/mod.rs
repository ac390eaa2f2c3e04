//! Request manager (C7): holds incoming friend requests until the
//! host accepts or rejects them.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::crypto::PublicKey;

/// One pending incoming friend request.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub public_key: PublicKey,
    pub message: String,
}

/// Deduplicates incoming requests by sender public key: a second
/// arrival from the same sender updates the stored message rather than
/// creating a second entry. `accept`/`reject` are both idempotent.
#[derive(Default)]
pub struct RequestManager {
    pending: Mutex<HashMap<PublicKey, String>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incoming friend request, updating the stored message
    /// if `pk` already has one pending.
    pub fn submit(&self, pk: PublicKey, message: String) {
        self.pending.lock().insert(pk, message);
    }

    pub fn list_pending(&self) -> Vec<PendingRequest> {
        self.pending
            .lock()
            .iter()
            .map(|(pk, message)| PendingRequest { public_key: *pk, message: message.clone() })
            .collect()
    }

    /// Accept the pending request from `pk`, if any, clearing it and
    /// returning its message so the caller can create a friend record
    /// via [`crate::friend::FriendEngine::add_friend_by_pk`]. Idempotent:
    /// calling this again for an already-accepted (now absent) entry
    /// simply returns `None`.
    pub fn accept(&self, pk: &PublicKey) -> Option<String> {
        self.pending.lock().remove(pk)
    }

    /// Silently drop the pending request from `pk`, if any. Idempotent.
    pub fn reject(&self, pk: &PublicKey) {
        self.pending.lock().remove(pk);
    }

    pub fn is_pending(&self, pk: &PublicKey) -> bool {
        self.pending.lock().contains_key(pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_submission_updates_stored_message() {
        let mgr = RequestManager::new();
        let pk = PublicKey([1u8; 32]);
        mgr.submit(pk, "hi".into());
        mgr.submit(pk, "hi again".into());
        let pending = mgr.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message, "hi again");
    }

    #[test]
    fn accept_clears_and_returns_message() {
        let mgr = RequestManager::new();
        let pk = PublicKey([1u8; 32]);
        mgr.submit(pk, "hi".into());
        assert_eq!(mgr.accept(&pk), Some("hi".to_string()));
        assert!(!mgr.is_pending(&pk));
    }

    #[test]
    fn accept_and_reject_are_idempotent() {
        let mgr = RequestManager::new();
        let pk = PublicKey([1u8; 32]);
        mgr.reject(&pk);
        mgr.reject(&pk);
        assert_eq!(mgr.accept(&pk), None);
        assert_eq!(mgr.accept(&pk), None);
    }
}
