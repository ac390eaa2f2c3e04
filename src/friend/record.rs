//! Friend data model: per-friend identity, presence, and message
//! sequencing state.

use std::collections::HashMap;

use thiserror::Error;

use crate::crypto::PublicKey;

/// Opaque handle a host application uses to refer to a friend across
/// calls. Stable for the lifetime of the friendship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FriendId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No established session.
    None,
    /// A session with this friend is currently established over UDP.
    Udp,
    /// A session with this friend is currently established over TCP.
    Tcp,
}

/// Presence a friend reports about itself, distinct from
/// [`ConnectionStatus`] (which transport, if any, currently carries the
/// session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    None,
    Online,
    Away,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Normal,
    Action,
}

/// One friend relationship: identity, presence, display metadata, and
/// the strictly-increasing outbound message counter used for
/// at-most-once delivery.
#[derive(Debug, Clone)]
pub struct Friend {
    pub id: FriendId,
    pub public_key: PublicKey,
    pub name: String,
    pub status_message: String,
    pub status: UserStatus,
    pub connection_status: ConnectionStatus,
    /// Unix timestamp of the last time this friend was known to be
    /// online; updated on inbound traffic and on disconnect.
    pub last_seen: u64,
    /// Set while an outbound friend request is still pending
    /// acceptance; cleared once the friendship is mutual.
    pub pending_request_message: Option<String>,
    next_outbound_message_id: u64,
}

impl Friend {
    fn new(id: FriendId, public_key: PublicKey, pending_request_message: Option<String>) -> Self {
        Friend {
            id,
            public_key,
            name: String::new(),
            status_message: String::new(),
            status: UserStatus::None,
            connection_status: ConnectionStatus::None,
            last_seen: 0,
            pending_request_message,
            next_outbound_message_id: 0,
        }
    }

    /// Allocate the next strictly-increasing outbound message id.
    pub fn next_message_id(&mut self) -> u64 {
        let id = self.next_outbound_message_id;
        self.next_outbound_message_id += 1;
        id
    }
}

#[derive(Debug, Error)]
pub enum FriendError {
    #[error("no friend with this id")]
    UnknownFriend,
    #[error("this public key is already a friend")]
    AlreadyFriend,
}

/// Owns every friend relationship, indexed both by [`FriendId`] and by
/// public key.
#[derive(Default)]
pub struct FriendTable {
    by_id: HashMap<FriendId, Friend>,
    by_pk: HashMap<PublicKey, FriendId>,
    next_id: u64,
}

impl FriendTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> FriendId {
        let id = FriendId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a new friend with an optional pending outbound request
    /// message. Fails if `pk` is already a friend.
    pub fn insert(&mut self, pk: PublicKey, pending_request_message: Option<String>) -> Result<FriendId, FriendError> {
        if self.by_pk.contains_key(&pk) {
            return Err(FriendError::AlreadyFriend);
        }
        let id = self.allocate_id();
        self.by_id.insert(id, Friend::new(id, pk, pending_request_message));
        self.by_pk.insert(pk, id);
        Ok(id)
    }

    pub fn get(&self, id: FriendId) -> Option<&Friend> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: FriendId) -> Option<&mut Friend> {
        self.by_id.get_mut(&id)
    }

    pub fn find_by_pk(&self, pk: &PublicKey) -> Option<FriendId> {
        self.by_pk.get(pk).copied()
    }

    pub fn id_for_pk(&self, pk: &PublicKey) -> Option<FriendId> {
        self.find_by_pk(pk)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Friend> {
        self.by_id.values()
    }
}
