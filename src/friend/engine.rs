//! Friend engine (C6): the public add-friend / send-message / send-file
//! surface, wired to the DHT for address resolution and the negotiator
//! for encrypted session transport.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::instrument;

use crate::crypto::{PublicKey, ToxId};
use crate::dht::Dht;
use crate::negotiator::{Negotiator, NegotiatorError, ProtocolVersion};
use crate::rng::Rng;
use crate::time::TimeSource;
use crate::transport::{NetAddress, PacketKind};

pub use super::file_transfer::{
    FileControl, FileTransferDirection, FileTransferError, FileTransferId, FileTransferState,
};
use super::file_transfer::{FileTransferTable, FileWireMessage};
pub use super::record::{ConnectionStatus, Friend, FriendError, FriendId, FriendTable, MessageKind, UserStatus};
pub use super::request_queue::{OutboundRequestQueue, PendingFriendRequest};
pub use super::retry_queue::{ReadyMessage, RetryQueue};

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Friend(#[from] FriendError),
    #[error(transparent)]
    Negotiator(#[from] NegotiatorError),
    #[error(transparent)]
    FileTransfer(#[from] FileTransferError),
}

/// What the caller must do to actually get a message onto the wire
/// after [`FriendEngine::prepare_send`].
pub enum SendPlan {
    /// A session was already established: transmit `wire` to `dest`.
    Direct { wire: Vec<u8>, dest: NetAddress },
    /// No session yet, but the peer's address is known: transmit
    /// `handshake_wire` to begin one. The caller is responsible for
    /// re-sending the plaintext once the handshake completes.
    HandshakeThenSend { handshake_wire: Vec<u8>, dest: NetAddress, pending_plaintext: Vec<u8> },
    /// The DHT could not resolve the peer; the message has been queued
    /// for delivery once a session is available.
    QueuedNoRoute,
}

/// Events the friend engine reports back to the host application.
/// Fired on transitions only, never on polls.
#[derive(Debug, Clone)]
pub enum FriendEvent {
    FriendRequest { public_key: PublicKey, message: String },
    Message { friend_id: FriendId, text: String, kind: MessageKind },
    ConnectionStatusChanged { friend_id: FriendId, status: ConnectionStatus },
    StatusChanged { friend_id: FriendId, status: UserStatus },
    NameChanged { friend_id: FriendId, name: String },
    StatusMessageChanged { friend_id: FriendId, status_message: String },
    /// A peer wants to send us a file. Accept with
    /// [`FriendEngine::accept_file`], or let it sit — nothing is
    /// transferred until accepted.
    FileTransferRequest { friend_id: FriendId, transfer_id: FileTransferId, filename: String, size: u64 },
    /// The peer accepted a transfer we started with
    /// [`FriendEngine::send_file`].
    FileTransferAccepted { friend_id: FriendId, transfer_id: FileTransferId },
    /// The peer applied a pause/resume/cancel to a transfer.
    FileControlReceived { friend_id: FriendId, transfer_id: FileTransferId, control: FileControl },
    /// A chunk of incoming file data arrived.
    FileChunkReceived { friend_id: FriendId, transfer_id: FileTransferId, offset: u64, data: Vec<u8> },
}

/// Receives [`FriendEvent`]s as they occur. Implementations must not
/// block or call back into the engine's own locks.
pub trait FriendEventSink: Send + Sync {
    fn handle_event(&self, event: FriendEvent);
}

/// An event sink that discards everything; the default when the host
/// has not registered callbacks.
pub struct NullEventSink;

impl FriendEventSink for NullEventSink {
    fn handle_event(&self, _event: FriendEvent) {}
}

/// Pending plaintext queued for a friend mid-handshake, flushed once
/// the session the friend engine kicked off finishes establishing.
#[derive(Default)]
struct PendingOutbound {
    queued: HashMap<PublicKey, Vec<Vec<u8>>>,
}

impl PendingOutbound {
    fn push(&mut self, peer: PublicKey, plaintext: Vec<u8>) {
        self.queued.entry(peer).or_default().push(plaintext);
    }

    fn drain(&mut self, peer: &PublicKey) -> Vec<Vec<u8>> {
        self.queued.remove(peer).unwrap_or_default()
    }
}

pub struct FriendEngine {
    friends: Mutex<FriendTable>,
    retry_queue: Mutex<RetryQueue>,
    outbound_requests: Mutex<OutboundRequestQueue>,
    pending_outbound: Mutex<PendingOutbound>,
    file_transfers: Mutex<FileTransferTable>,
    events: Box<dyn FriendEventSink>,
}

impl FriendEngine {
    pub fn new(events: Box<dyn FriendEventSink>) -> Self {
        FriendEngine {
            friends: Mutex::new(FriendTable::new()),
            retry_queue: Mutex::new(RetryQueue::new()),
            outbound_requests: Mutex::new(OutboundRequestQueue::new()),
            pending_outbound: Mutex::new(PendingOutbound::default()),
            file_transfers: Mutex::new(FileTransferTable::new()),
            events,
        }
    }

    /// Create a pending outbound friend request and a local friend
    /// record, and queue the request itself for delivery (with
    /// exponential back-off if the DHT cannot yet resolve the target).
    /// A second `add_friend` to an already-pending target updates the
    /// stored message without resetting the retry schedule.
    pub fn add_friend(&self, tox_id: &ToxId, message: String, now: u64) -> Result<FriendId, FriendError> {
        let id = self.friends.lock().insert(tox_id.public_key, Some(message.clone()))?;
        self.outbound_requests.lock().enqueue(tox_id.public_key, message, now);
        Ok(id)
    }

    /// Register an already-mutual friend (e.g. loaded from savedata),
    /// skipping the request handshake.
    pub fn add_friend_by_pk(&self, pk: PublicKey) -> Result<FriendId, FriendError> {
        self.friends.lock().insert(pk, None)
    }

    pub fn friend_public_key(&self, id: FriendId) -> Option<PublicKey> {
        self.friends.lock().get(id).map(|f| f.public_key)
    }

    pub fn connection_status(&self, id: FriendId) -> Option<ConnectionStatus> {
        self.friends.lock().get(id).map(|f| f.connection_status)
    }

    /// Allocate the next message id for `friend_id` and decide how to
    /// get `plaintext` onto the wire: directly if a session is already
    /// established, via a fresh handshake if the peer's address is
    /// known but no session exists yet, or queued for retry if the DHT
    /// cannot currently resolve the peer.
    #[instrument(skip(self, plaintext, dht, negotiator, rng, time), fields(friend = ?friend_id))]
    pub fn prepare_send(
        &self,
        friend_id: FriendId,
        plaintext: &[u8],
        dht: &Dht,
        negotiator: &Negotiator,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<(u64, SendPlan), SendError> {
        let peer_pk = {
            let mut friends = self.friends.lock();
            let friend = friends.get_mut(friend_id).ok_or(FriendError::UnknownFriend)?;
            let message_id = friend.next_message_id();
            (friend.public_key, message_id)
        };
        let (peer_pk, message_id) = peer_pk;

        if negotiator.has_session(&peer_pk) {
            let ciphertext = negotiator.encrypt_for(&peer_pk, plaintext, rng, time)?;
            let wire = PacketKind::Message.frame(&ciphertext);
            let dest = dht
                .find_closest(&peer_pk, 1)
                .into_iter()
                .find(|n| n.public_key == peer_pk)
                .map(|n| n.address)
                .ok_or(NegotiatorError::NoSession)?;
            return Ok((message_id, SendPlan::Direct { wire, dest }));
        }

        match dht.resolve_locally(&peer_pk) {
            Ok(dest) => {
                let handshake_msg = negotiator
                    .initiate(peer_pk, &[ProtocolVersion::Legacy, ProtocolVersion::NoiseIk], rng, time)?
                    .unwrap_or_default();
                if handshake_msg.is_empty() {
                    // Legacy negotiated: the session is already
                    // established non-interactively, so send directly.
                    let ciphertext = negotiator.encrypt_for(&peer_pk, plaintext, rng, time)?;
                    let wire = PacketKind::Message.frame(&ciphertext);
                    Ok((message_id, SendPlan::Direct { wire, dest }))
                } else {
                    let handshake_wire = PacketKind::Handshake.frame(&handshake_msg);
                    self.pending_outbound.lock().push(peer_pk, plaintext.to_vec());
                    Ok((
                        message_id,
                        SendPlan::HandshakeThenSend {
                            handshake_wire,
                            dest,
                            pending_plaintext: plaintext.to_vec(),
                        },
                    ))
                }
            }
            Err(_) => {
                self.retry_queue.lock().enqueue(peer_pk, plaintext.to_vec(), time.now());
                Ok((message_id, SendPlan::QueuedNoRoute))
            }
        }
    }

    /// Drain plaintext queued for `peer` while its handshake was in
    /// flight, now that a session exists. Called by the top-level
    /// coordinator once a handshake completes.
    pub fn flush_pending(&self, peer: &PublicKey) -> Vec<Vec<u8>> {
        self.pending_outbound.lock().drain(peer)
    }

    /// Walk the message retry queue and return entries ready for
    /// another attempt, removed from the queue. The coordinator must
    /// call [`Self::reschedule_send_retry`] for each one whose
    /// re-attempt fails this tick.
    pub fn ready_retries(&self, now: u64) -> Vec<ReadyMessage> {
        self.retry_queue.lock().take_ready(now)
    }

    /// Re-queue a message retry after a failed delivery attempt,
    /// advancing its back-off schedule.
    pub fn reschedule_send_retry(&self, entry: ReadyMessage, now: u64) {
        self.retry_queue.lock().reschedule(entry, now);
    }

    /// Walk the outbound friend-request queue and return entries ready
    /// for another delivery attempt, removed from the queue. The
    /// coordinator must call [`Self::reschedule_request_retry`] for
    /// each one whose re-attempt fails this tick.
    pub fn ready_request_retries(&self, now: u64) -> Vec<PendingFriendRequest> {
        self.outbound_requests.lock().take_ready(now)
    }

    /// Re-queue a friend request after a failed delivery attempt,
    /// advancing its back-off schedule. Dropped for good once
    /// [`super::retry_queue::MAX_RETRIES`] attempts have been made.
    pub fn reschedule_request_retry(&self, entry: PendingFriendRequest, now: u64) {
        self.outbound_requests.lock().reschedule(entry, now);
    }

    /// Number of outbound friend requests still waiting on delivery or
    /// a future retry. Exposed for observability/tests.
    pub fn pending_request_count(&self) -> usize {
        self.outbound_requests.lock().len()
    }

    /// Build the on-wire friend-request packet
    /// (`kind ‖ sender_public_key(32) ‖ message`) for `request`. Friend
    /// requests are not session-encrypted: the recipient has not yet
    /// accepted the friendship, so there is nothing to encrypt under.
    pub fn build_friend_request_wire(local_pk: &PublicKey, request: &PendingFriendRequest) -> Vec<u8> {
        let mut wire = Vec::with_capacity(1 + 32 + request.message.len());
        wire.push(PacketKind::FriendRequest.as_byte());
        wire.extend_from_slice(local_pk.as_bytes());
        wire.extend_from_slice(request.message.as_bytes());
        wire
    }

    /// Announce a new outgoing file transfer to `friend_id`, returning
    /// its id and how to get the announcement onto the wire. The
    /// transfer stays `Pending` until the peer sends back `Accept`
    /// (see [`FriendEvent::FileTransferAccepted`]); call
    /// [`Self::send_file_chunk`] only once that has happened.
    #[instrument(skip(self, dht, negotiator, rng, time), fields(friend = ?friend_id))]
    pub fn send_file(
        &self,
        friend_id: FriendId,
        filename: String,
        size: u64,
        dht: &Dht,
        negotiator: &Negotiator,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<(FileTransferId, SendPlan), SendError> {
        let transfer_id = self.file_transfers.lock().start_outgoing(friend_id, filename.clone(), size);
        let payload = super::file_transfer::build_request_payload(transfer_id, &filename, size);
        let (_, plan) = self.prepare_send(friend_id, &payload, dht, negotiator, rng, time)?;
        Ok((transfer_id, plan))
    }

    /// Accept a pending incoming transfer, sending `Accept` back to the
    /// sender.
    pub fn accept_file(
        &self,
        friend_id: FriendId,
        transfer_id: FileTransferId,
        dht: &Dht,
        negotiator: &Negotiator,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<SendPlan, SendError> {
        self.file_transfers.lock().accept_incoming(friend_id, transfer_id)?;
        let payload = super::file_transfer::build_accept_payload(transfer_id);
        let (_, plan) = self.prepare_send(friend_id, &payload, dht, negotiator, rng, time)?;
        Ok(plan)
    }

    /// Apply a pause/resume/cancel to a transfer we are a party to
    /// (either direction) and send it to the peer.
    pub fn file_control(
        &self,
        friend_id: FriendId,
        transfer_id: FileTransferId,
        control: FileControl,
        dht: &Dht,
        negotiator: &Negotiator,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<SendPlan, SendError> {
        self.file_transfers.lock().apply_local_control(friend_id, transfer_id, control)?;
        let payload = super::file_transfer::build_control_op_payload(transfer_id, control);
        let (_, plan) = self.prepare_send(friend_id, &payload, dht, negotiator, rng, time)?;
        Ok(plan)
    }

    /// Send the next chunk of an accepted outgoing transfer.
    pub fn send_file_chunk(
        &self,
        friend_id: FriendId,
        transfer_id: FileTransferId,
        offset: u64,
        chunk: &[u8],
        dht: &Dht,
        negotiator: &Negotiator,
        rng: &mut dyn Rng,
        time: &dyn TimeSource,
    ) -> Result<SendPlan, SendError> {
        {
            let table = self.file_transfers.lock();
            let record = table.get(friend_id, transfer_id).ok_or(FileTransferError::UnknownTransfer)?;
            if record.state != FileTransferState::Transferring {
                return Err(FileTransferError::IllegalState.into());
            }
        }
        let payload = super::file_transfer::build_chunk_payload(transfer_id, offset, chunk);
        let (_, plan) = self.prepare_send(friend_id, &payload, dht, negotiator, rng, time)?;
        self.file_transfers
            .lock()
            .record_progress(friend_id, transfer_id, offset + chunk.len() as u64)?;
        Ok(plan)
    }

    pub fn file_transfer_state(&self, friend_id: FriendId, transfer_id: FileTransferId) -> Option<FileTransferState> {
        self.file_transfers.lock().get(friend_id, transfer_id).map(|r| r.state)
    }

    /// Route a decrypted session payload that turned out to be a
    /// `FileControl`/`FileData` packet rather than a plain message.
    /// Returns `true` if the payload was a file-transfer message and
    /// was handled; `false` if the caller should try the plain-message
    /// path instead.
    pub fn handle_inbound_file_payload(&self, friend_id: FriendId, payload: &[u8]) -> bool {
        let Some(parsed) = super::file_transfer::parse_payload(payload) else {
            return false;
        };
        match parsed {
            Ok(FileWireMessage::Request { transfer_id, filename, size }) => {
                self.file_transfers.lock().register_incoming(friend_id, transfer_id, filename.clone(), size);
                self.events.handle_event(FriendEvent::FileTransferRequest { friend_id, transfer_id, filename, size });
            }
            Ok(FileWireMessage::Accept { transfer_id }) => {
                if self.file_transfers.lock().mark_accepted_by_peer(friend_id, transfer_id).is_ok() {
                    self.events.handle_event(FriendEvent::FileTransferAccepted { friend_id, transfer_id });
                }
            }
            Ok(FileWireMessage::Control { transfer_id, control }) => {
                if self.file_transfers.lock().apply_remote_control(friend_id, transfer_id, control).is_ok() {
                    self.events.handle_event(FriendEvent::FileControlReceived { friend_id, transfer_id, control });
                }
            }
            Ok(FileWireMessage::Chunk { transfer_id, offset, data }) => {
                let end = offset + data.len() as u64;
                if self.file_transfers.lock().record_progress(friend_id, transfer_id, end).is_ok() {
                    self.events.handle_event(FriendEvent::FileChunkReceived { friend_id, transfer_id, offset, data });
                }
            }
            Err(_) => {}
        }
        true
    }

    pub fn set_connection_status(&self, id: FriendId, status: ConnectionStatus) {
        let changed = {
            let mut friends = self.friends.lock();
            match friends.get_mut(id) {
                Some(friend) if friend.connection_status != status => {
                    friend.connection_status = status;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.events.handle_event(FriendEvent::ConnectionStatusChanged { friend_id: id, status });
        }
    }

    pub fn set_status(&self, id: FriendId, status: UserStatus) {
        let changed = {
            let mut friends = self.friends.lock();
            match friends.get_mut(id) {
                Some(friend) if friend.status != status => {
                    friend.status = status;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.events.handle_event(FriendEvent::StatusChanged { friend_id: id, status });
        }
    }

    /// Record that `id` was just seen (inbound traffic, or a
    /// connection-status transition), for display and savedata
    /// purposes only.
    pub fn touch_last_seen(&self, id: FriendId, now: u64) {
        if let Some(friend) = self.friends.lock().get_mut(id) {
            friend.last_seen = now;
        }
    }

    pub fn handle_inbound_friend_request(&self, peer_pk: PublicKey, message: String) {
        self.events.handle_event(FriendEvent::FriendRequest { public_key: peer_pk, message });
    }

    pub fn handle_inbound_message(&self, friend_id: FriendId, text: String, kind: MessageKind) {
        self.events.handle_event(FriendEvent::Message { friend_id, text, kind });
    }

    pub fn friend_id_for(&self, pk: &PublicKey) -> Option<FriendId> {
        self.friends.lock().find_by_pk(pk)
    }

    /// Snapshot every friend record, for persistence. Connection status
    /// and per-session message counters are runtime-only; a caller
    /// persisting this for savedata should keep only the fields it
    /// needs (public key, name, status message).
    pub fn all_friends(&self) -> Vec<Friend> {
        self.friends.lock().iter().cloned().collect()
    }

    /// Re-register a friend loaded from savedata, restoring its display
    /// metadata, last known presence, and last-seen timestamp.
    /// Connection status always starts `None`: liveness is
    /// re-established by the DHT/negotiator, never persisted.
    pub fn restore_friend(
        &self,
        pk: PublicKey,
        name: String,
        status_message: String,
        status: UserStatus,
        last_seen: u64,
    ) -> Result<FriendId, FriendError> {
        let id = self.friends.lock().insert(pk, None)?;
        if let Some(friend) = self.friends.lock().get_mut(id) {
            friend.name = name;
            friend.status_message = status_message;
            friend.status = status;
            friend.last_seen = last_seen;
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use crate::time::SystemTimeSource;
    use rand::rngs::OsRng;

    #[test]
    fn add_friend_by_pk_skips_request() {
        let engine = FriendEngine::new(Box::new(NullEventSink));
        let pk = generate_keypair(&mut OsRng).public;
        let id = engine.add_friend_by_pk(pk).unwrap();
        assert!(engine.friends.lock().get(id).unwrap().pending_request_message.is_none());
    }

    #[test]
    fn prepare_send_queues_when_dht_cannot_resolve() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let dht = Dht::new(generate_keypair(&mut rng).public, 4);
        let negotiator = Negotiator::new(generate_keypair(&mut rng));
        let engine = FriendEngine::new(Box::new(NullEventSink));

        let peer = generate_keypair(&mut rng).public;
        let friend_id = engine.add_friend_by_pk(peer).unwrap();

        let (_, plan) = engine
            .prepare_send(friend_id, b"hello", &dht, &negotiator, &mut rng, &time)
            .unwrap();
        assert!(matches!(plan, SendPlan::QueuedNoRoute));
        assert_eq!(engine.retry_queue.lock().len(), 1);
    }

    #[test]
    fn message_ids_increase_across_sends() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let dht = Dht::new(generate_keypair(&mut rng).public, 4);
        let negotiator = Negotiator::new(generate_keypair(&mut rng));
        let engine = FriendEngine::new(Box::new(NullEventSink));
        let peer = generate_keypair(&mut rng).public;
        let friend_id = engine.add_friend_by_pk(peer).unwrap();

        let (id1, _) = engine.prepare_send(friend_id, b"one", &dht, &negotiator, &mut rng, &time).unwrap();
        let (id2, _) = engine.prepare_send(friend_id, b"two", &dht, &negotiator, &mut rng, &time).unwrap();
        assert_eq!(id1, 0);
        assert_eq!(id2, 1);
    }

    #[test]
    fn unknown_friend_id_is_rejected() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let dht = Dht::new(generate_keypair(&mut rng).public, 4);
        let negotiator = Negotiator::new(generate_keypair(&mut rng));
        let engine = FriendEngine::new(Box::new(NullEventSink));
        let err = engine
            .prepare_send(FriendId(999), b"hi", &dht, &negotiator, &mut rng, &time)
            .unwrap_err();
        assert!(matches!(err, SendError::Friend(FriendError::UnknownFriend)));
    }

    #[test]
    fn add_friend_queues_a_retryable_request() {
        let engine = FriendEngine::new(Box::new(NullEventSink));
        let target = generate_keypair(&mut OsRng).public;
        let tox_id = ToxId::new(target, crate::crypto::NoSpam::generate(&mut OsRng));

        engine.add_friend(&tox_id, "hi".into(), 1_000).unwrap();
        assert_eq!(engine.pending_request_count(), 1);

        let ready = engine.ready_request_retries(1_000);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].retry_count, 0);
        assert_eq!(ready[0].message, "hi");
    }

    #[test]
    fn friend_request_retry_backs_off_and_is_dropped_after_max_retries() {
        let engine = FriendEngine::new(Box::new(NullEventSink));
        let target = generate_keypair(&mut OsRng).public;
        let tox_id = ToxId::new(target, crate::crypto::NoSpam::generate(&mut OsRng));
        engine.add_friend(&tox_id, "hi".into(), 0).unwrap();

        let mut now = 0u64;
        for _ in 0..crate::friend::MAX_RETRIES {
            let ready = engine.ready_request_retries(now);
            assert_eq!(ready.len(), 1);
            engine.reschedule_request_retry(ready.into_iter().next().unwrap(), now);
            now += 10_000_000;
        }
        assert_eq!(engine.pending_request_count(), 0);
    }

    #[test]
    fn successful_request_delivery_is_not_retried_again() {
        let engine = FriendEngine::new(Box::new(NullEventSink));
        let target = generate_keypair(&mut OsRng).public;
        let tox_id = ToxId::new(target, crate::crypto::NoSpam::generate(&mut OsRng));
        engine.add_friend(&tox_id, "hi".into(), 0).unwrap();

        let ready = engine.ready_request_retries(0);
        assert_eq!(ready.len(), 1);
        // Delivery succeeded this tick: the coordinator simply drops
        // `ready`, never calling `reschedule_request_retry`.
        assert_eq!(engine.pending_request_count(), 0);
        assert!(engine.ready_request_retries(1_000_000).is_empty());
    }

    #[test]
    fn send_file_then_accept_round_trips_through_handle_inbound_file_payload() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let dht = Dht::new(generate_keypair(&mut rng).public, 4);
        let negotiator = Negotiator::new(generate_keypair(&mut rng));
        let sender = FriendEngine::new(Box::new(NullEventSink));
        let peer = generate_keypair(&mut rng).public;
        let friend_id = sender.add_friend_by_pk(peer).unwrap();

        let (transfer_id, _plan) = sender
            .send_file(friend_id, "photo.png".into(), 10, &dht, &negotiator, &mut rng, &time)
            .unwrap();
        assert_eq!(
            sender.file_transfer_state(friend_id, transfer_id),
            Some(FileTransferState::Pending)
        );

        // The peer's own engine receives the request payload and replies
        // with Accept; the sender applies that reply to its own table.
        let request_payload = super::super::file_transfer::build_request_payload(transfer_id, "photo.png", 10);
        let receiver = FriendEngine::new(Box::new(NullEventSink));
        let receiver_friend = receiver.add_friend_by_pk(generate_keypair(&mut rng).public).unwrap();
        assert!(receiver.handle_inbound_file_payload(receiver_friend, &request_payload));
        assert_eq!(
            receiver.file_transfer_state(receiver_friend, transfer_id),
            Some(FileTransferState::Pending)
        );
        receiver
            .accept_file(receiver_friend, transfer_id, &dht, &negotiator, &mut rng, &time)
            .unwrap();

        let accept_payload = super::super::file_transfer::build_accept_payload(transfer_id);
        assert!(sender.handle_inbound_file_payload(friend_id, &accept_payload));
        assert_eq!(
            sender.file_transfer_state(friend_id, transfer_id),
            Some(FileTransferState::Transferring)
        );

        sender
            .send_file_chunk(friend_id, transfer_id, 0, &[0u8; 10], &dht, &negotiator, &mut rng, &time)
            .unwrap();
        assert_eq!(sender.file_transfer_state(friend_id, transfer_id), Some(FileTransferState::Done));
    }

    #[test]
    fn file_control_pause_is_rejected_before_transfer_starts() {
        let time = SystemTimeSource;
        let mut rng = OsRng;
        let dht = Dht::new(generate_keypair(&mut rng).public, 4);
        let negotiator = Negotiator::new(generate_keypair(&mut rng));
        let engine = FriendEngine::new(Box::new(NullEventSink));
        let peer = generate_keypair(&mut rng).public;
        let friend_id = engine.add_friend_by_pk(peer).unwrap();
        let (transfer_id, _) = engine
            .send_file(friend_id, "f".into(), 1, &dht, &negotiator, &mut rng, &time)
            .unwrap();

        let err = engine
            .file_control(friend_id, transfer_id, FileControl::Pause, &dht, &negotiator, &mut rng, &time)
            .unwrap_err();
        assert!(matches!(err, SendError::FileTransfer(FileTransferError::IllegalState)));
    }

    #[test]
    fn handle_inbound_file_payload_returns_false_for_non_file_payload() {
        let engine = FriendEngine::new(Box::new(NullEventSink));
        let friend_id = engine.add_friend_by_pk(generate_keypair(&mut OsRng).public).unwrap();
        let plain = vec![PacketKind::Message.as_byte(), 1, 2, 3];
        assert!(!engine.handle_inbound_file_payload(friend_id, &plain));
    }

    #[test]
    fn friend_request_wire_carries_sender_key_and_message() {
        let local = generate_keypair(&mut OsRng);
        let request = PendingFriendRequest {
            target_pk: generate_keypair(&mut OsRng).public,
            message: "hi there".into(),
            retry_count: 0,
            next_retry_at: 0,
            created_at: 0,
        };
        let wire = FriendEngine::build_friend_request_wire(&local.public, &request);
        assert_eq!(wire[0], PacketKind::FriendRequest.as_byte());
        assert_eq!(&wire[1..33], local.public.as_bytes());
        assert_eq!(&wire[33..], b"hi there");
    }
}
