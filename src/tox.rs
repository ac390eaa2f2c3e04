//! Top-level coordinator (C10): owns every subsystem for one local
//! identity and drives their periodic maintenance from a single
//! `iterate()` call. Network I/O itself is the host application's
//! responsibility via [`crate::transport::PacketSink`]/[`PacketSource`];
//! this type only decides *what* needs to happen next.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use tracing::{info, instrument};

use crate::av::{AvSession, CallPhase, IncomingMediaPacket, MediaFlags, MediaFrame};
use crate::config::{SaveDataOption, ToxOptions};
use crate::crypto::{derive_from_secret, generate_keypair, KeyPair, NoSpam, PublicKey, SecretKey, ToxId};
use crate::dht::Dht;
use crate::friend::{ConnectionStatus, FriendEngine, FriendError, FriendEventSink, FriendId, NullEventSink, SendPlan};
use crate::friend::{FileControl, FileTransferId, FileTransferState, MessageKind};
use crate::mailbox::{self, FetchRequest, StorageNode, StoreRequest};
use crate::negotiator::{HandshakeStep, Negotiator};
use crate::request_manager::RequestManager;
use crate::savedata::{restore_friends, Savedata, SavedataError};
use crate::time::{SystemTimeSource, TimeSource};
use crate::transport::{NetAddress, PacketEnvelope, PacketKind};

/// Minimum live bootstrap nodes before the DHT is considered connected,
/// used when constructing via [`Tox::new`]/[`Tox::load_savedata`]
/// rather than [`Tox::with_options`].
const DEFAULT_MIN_BOOTSTRAP_NODES: u32 = 4;

/// How often the host application should call [`Tox::iterate`] absent
/// other activity.
const ITERATION_INTERVAL: Duration = Duration::from_millis(50);

/// How often each friend's mailbox nodes are polled with `FETCH`,
/// standing in for the "poll on reconnect" trigger: a fresh connection
/// is simply never more than this many seconds stale.
const MAILBOX_POLL_INTERVAL_SECS: u64 = 60;

pub struct Tox {
    identity: KeyPair,
    nospam: NoSpam,
    name: String,
    status_message: String,
    dht: Dht,
    negotiator: Negotiator,
    friends: FriendEngine,
    requests: RequestManager,
    av: AvSession,
    /// Mailboxes this identity has agreed to host for other peers (C8).
    /// Any node can be asked to serve as storage; whether one actually
    /// gets used depends on whether peers' DHT lookups surface it.
    storage: Mutex<StorageNode>,
    /// Last time each friend's mailbox nodes were polled with `FETCH`.
    last_mailbox_poll: Mutex<HashMap<PublicKey, u64>>,
    time: Box<dyn TimeSource>,
    /// Whether the host's configuration describes any send path at all
    /// (UDP enabled, or a nonzero TCP port). No concrete socket is ever
    /// held here — socket I/O stays an external collaborator — but a
    /// configuration that describes no path at all must still surface
    /// `TransportUnavailable` rather than silently queuing work that
    /// can never be delivered.
    transport_enabled: bool,
}

/// One action the host application must perform in response to
/// [`Tox::iterate`]: a packet to transmit. Everything else iterate()
/// does is internal bookkeeping.
pub enum IterationAction {
    Transmit { wire: Vec<u8>, dest: NetAddress },
}

impl Tox {
    /// Start a fresh identity with a freshly generated key pair and
    /// nospam, using default options (UDP enabled).
    pub fn new() -> Self {
        let mut rng = OsRng;
        let identity = generate_keypair(&mut rng);
        let nospam = NoSpam::generate(&mut rng);
        Self::from_identity(identity, nospam, DEFAULT_MIN_BOOTSTRAP_NODES, true)
    }

    /// Construct from host-supplied [`ToxOptions`]. Never fails on a
    /// configuration that merely describes an absent capability
    /// (`udp_enabled: false`, `tcp_port: 0`, an empty proxy host); that
    /// absence is surfaced only as [`ToxError::TransportUnavailable`]
    /// on first use. Fails only if `options.savedata` is a
    /// [`SaveDataOption::FullSave`] blob that does not parse.
    ///
    /// [`ToxError::TransportUnavailable`]: crate::error::ToxError::TransportUnavailable
    pub fn with_options(options: ToxOptions) -> Result<Self, SavedataError> {
        let transport_enabled = options.udp_enabled || options.tcp_port != 0;
        let min_bootstrap = options.min_bootstrap_nodes;
        let mut rng = OsRng;

        let tox = match options.savedata {
            SaveDataOption::None => {
                let identity = generate_keypair(&mut rng);
                let nospam = NoSpam::generate(&mut rng);
                Self::from_identity(identity, nospam, min_bootstrap, transport_enabled)
            }
            SaveDataOption::SecretKey(sk) => {
                let identity = derive_from_secret(&SecretKey(sk));
                let nospam = NoSpam::generate(&mut rng);
                Self::from_identity(identity, nospam, min_bootstrap, transport_enabled)
            }
            SaveDataOption::FullSave(blob) => {
                let saved = Savedata::from_bytes(&blob)?;
                let identity = saved.key_pair();
                let mut tox = Self::from_identity(identity, saved.nospam, min_bootstrap, transport_enabled);
                restore_friends(&tox.friends, &saved.friends);
                tox.name = saved.name.clone();
                tox.status_message = saved.status_message.clone();
                tox
            }
        };
        Ok(tox)
    }

    /// Restore an identity and friend list previously produced by
    /// [`Tox::get_savedata`], using default options (UDP enabled).
    pub fn load_savedata(bytes: &[u8]) -> Result<Self, SavedataError> {
        Self::with_options(ToxOptions { savedata: SaveDataOption::FullSave(bytes.to_vec()), ..ToxOptions::default() })
    }

    fn from_identity(identity: KeyPair, nospam: NoSpam, min_bootstrap_nodes: u32, transport_enabled: bool) -> Self {
        let local_pk = identity.public;
        Tox {
            negotiator: Negotiator::new(identity_clone(&identity)),
            identity,
            nospam,
            name: String::new(),
            status_message: String::new(),
            dht: Dht::new(local_pk, min_bootstrap_nodes),
            friends: FriendEngine::new(Box::new(NullEventSink)),
            requests: RequestManager::new(),
            av: AvSession::new(),
            storage: Mutex::new(StorageNode::new()),
            last_mailbox_poll: Mutex::new(HashMap::new()),
            time: Box::new(SystemTimeSource),
            transport_enabled,
        }
    }

    /// Replace the event sink friend/request/connection events are
    /// delivered to. Must be called before any event-producing
    /// operation if the host wants to observe them (there is no queue
    /// to replay).
    pub fn set_event_sink(&mut self, sink: Box<dyn FriendEventSink>) {
        self.friends = FriendEngine::new(sink);
    }

    pub fn tox_id(&self) -> ToxId {
        ToxId::new(self.identity.public, self.nospam)
    }

    pub fn dht(&self) -> &Dht {
        &self.dht
    }

    pub fn friends(&self) -> &FriendEngine {
        &self.friends
    }

    pub fn requests(&self) -> &RequestManager {
        &self.requests
    }

    pub fn av(&self) -> &AvSession {
        &self.av
    }

    pub fn iteration_interval(&self) -> Duration {
        ITERATION_INTERVAL
    }

    /// Register a pending outbound friend request, queuing the request
    /// packet itself for delivery (with exponential back-off) once the
    /// DHT can resolve the target.
    pub fn add_friend(&self, tox_id: &ToxId, message: String) -> Result<FriendId, FriendError> {
        self.friends.add_friend(tox_id, message, self.time.now())
    }

    /// Send a message to `friend_id`, returning what the host must do
    /// to put it on the wire. Fails fast with
    /// [`ToxError::TransportUnavailable`] if this instance was
    /// constructed with neither UDP nor a TCP port enabled.
    ///
    /// [`ToxError::TransportUnavailable`]: crate::error::ToxError::TransportUnavailable
    pub fn send_message(&self, friend_id: FriendId, text: &str) -> crate::error::Result<(u64, SendPlan)> {
        if !self.transport_enabled {
            return Err(crate::error::ToxError::TransportUnavailable("no UDP or TCP transport configured".into()));
        }
        let mut rng = OsRng;
        self.friends
            .prepare_send(friend_id, text.as_bytes(), &self.dht, &self.negotiator, &mut rng, self.time.as_ref())
            .map_err(Into::into)
    }

    /// Send a store-and-forward message via the async-mailbox extension
    /// when no live session is available. Returns one
    /// [`IterationAction::Transmit`] per storage node the `STORE`
    /// should go to. Falls back to the caller retrying through
    /// [`Tox::send_message`]'s live-delivery queue if the DHT currently
    /// advertises no storage nodes. Fails fast with
    /// [`ToxError::TransportUnavailable`] under the same condition as
    /// [`Tox::send_message`].
    ///
    /// [`ToxError::TransportUnavailable`]: crate::error::ToxError::TransportUnavailable
    pub fn send_async_message(&self, friend_pk: PublicKey, text: &str) -> crate::error::Result<Vec<IterationAction>> {
        if !self.transport_enabled {
            return Err(crate::error::ToxError::TransportUnavailable("no UDP or TCP transport configured".into()));
        }
        let mut rng = OsRng;
        let storage_nodes = self.dht.storage_nodes_near(&friend_pk, crate::dht::K);
        let (store_request, targets) = mailbox::prepare_send_async(
            &self.identity,
            &friend_pk,
            text.as_bytes(),
            &storage_nodes,
            &mut rng,
            self.time.as_ref(),
        )?;
        let wire = PacketKind::Store.frame(&store_request.to_wire());
        Ok(targets
            .into_iter()
            .map(|node| IterationAction::Transmit { wire: wire.clone(), dest: node.address })
            .collect())
    }

    /// Announce a new outgoing file transfer to `friend_id`. Fails fast
    /// with [`ToxError::TransportUnavailable`] under the same condition
    /// as [`Tox::send_message`].
    ///
    /// [`ToxError::TransportUnavailable`]: crate::error::ToxError::TransportUnavailable
    pub fn send_file(&self, friend_id: FriendId, filename: String, size: u64) -> crate::error::Result<(FileTransferId, SendPlan)> {
        if !self.transport_enabled {
            return Err(crate::error::ToxError::TransportUnavailable("no UDP or TCP transport configured".into()));
        }
        let mut rng = OsRng;
        self.friends
            .send_file(friend_id, filename, size, &self.dht, &self.negotiator, &mut rng, self.time.as_ref())
            .map_err(Into::into)
    }

    /// Accept a pending incoming file transfer.
    pub fn accept_file(&self, friend_id: FriendId, transfer_id: FileTransferId) -> crate::error::Result<SendPlan> {
        let mut rng = OsRng;
        self.friends
            .accept_file(friend_id, transfer_id, &self.dht, &self.negotiator, &mut rng, self.time.as_ref())
            .map_err(Into::into)
    }

    /// Pause, resume, or cancel a file transfer.
    pub fn file_control(&self, friend_id: FriendId, transfer_id: FileTransferId, control: FileControl) -> crate::error::Result<SendPlan> {
        let mut rng = OsRng;
        self.friends
            .file_control(friend_id, transfer_id, control, &self.dht, &self.negotiator, &mut rng, self.time.as_ref())
            .map_err(Into::into)
    }

    /// Send the next chunk of an accepted outgoing file transfer.
    pub fn send_file_chunk(&self, friend_id: FriendId, transfer_id: FileTransferId, offset: u64, chunk: &[u8]) -> crate::error::Result<SendPlan> {
        let mut rng = OsRng;
        self.friends
            .send_file_chunk(friend_id, transfer_id, offset, chunk, &self.dht, &self.negotiator, &mut rng, self.time.as_ref())
            .map_err(Into::into)
    }

    pub fn file_transfer_state(&self, friend_id: FriendId, transfer_id: FileTransferId) -> Option<FileTransferState> {
        self.friends.file_transfer_state(friend_id, transfer_id)
    }

    /// Send one audio frame to `friend_id` over an active call carrying
    /// audio. Resolves the friend's live address via the DHT and
    /// session-encrypts the frame the same way [`Tox::send_message`]
    /// does, but as a `Lossy` packet: there is no retry queue, since a
    /// dropped media frame is simply superseded by the next one.
    pub fn audio_send_frame(&self, friend_id: FriendId, frame: Vec<u8>) -> crate::error::Result<IterationAction> {
        self.send_media_frame(friend_id, MediaFlags::AUDIO, MediaFrame::Audio(frame))
    }

    /// Send one video frame to `friend_id`. See [`Tox::audio_send_frame`].
    pub fn video_send_frame(&self, friend_id: FriendId, frame: Vec<u8>) -> crate::error::Result<IterationAction> {
        self.send_media_frame(friend_id, MediaFlags::VIDEO, MediaFrame::Video(frame))
    }

    fn send_media_frame(&self, friend_id: FriendId, kind: MediaFlags, frame: MediaFrame) -> crate::error::Result<IterationAction> {
        if !self.transport_enabled {
            return Err(crate::error::ToxError::TransportUnavailable("no UDP or TCP transport configured".into()));
        }
        let state = self.av.state(friend_id);
        if !matches!(state.phase, CallPhase::Sending | CallPhase::Accepting) || !state.media.contains(kind) {
            return Err(crate::error::ToxError::State("no active call carries this media kind".into()));
        }
        let peer_pk = self.friends.friend_public_key(friend_id).ok_or_else(|| crate::error::ToxError::NotFound("no such friend".into()))?;
        if !self.negotiator.has_session(&peer_pk) {
            return Err(crate::error::ToxError::Transient("no active session with this friend yet".into()));
        }
        let dest = self
            .dht
            .find_closest(&peer_pk, 1)
            .into_iter()
            .find(|n| n.public_key == peer_pk)
            .map(|n| n.address)
            .ok_or_else(|| crate::error::ToxError::Transient("friend address not currently known".into()))?;
        let mut rng = OsRng;
        let ciphertext = self
            .negotiator
            .encrypt_for(&peer_pk, &frame.to_wire(), &mut rng, self.time.as_ref())
            .map_err(|_| crate::error::ToxError::State("failed to encrypt media frame".into()))?;
        Ok(IterationAction::Transmit { wire: PacketKind::Lossy.frame(&ciphertext), dest })
    }

    /// Drain every A/V media packet received since the last call.
    pub fn take_incoming_media(&self) -> Vec<IncomingMediaPacket> {
        self.av.take_incoming()
    }

    /// Run one iteration of periodic maintenance: expire idle sessions,
    /// walk the message retry queue, and walk the outbound
    /// friend-request retry queue. Does not perform network I/O itself;
    /// the host drains its own transport separately, transmits the
    /// returned actions, and feeds inbound bytes to the
    /// negotiator/DHT/friend engine.
    #[instrument(skip(self))]
    pub fn iterate(&self) -> Vec<IterationAction> {
        let expired = self.negotiator.expire_idle_sessions(self.time.as_ref());
        for peer in &expired {
            info!(peer = ?peer, "session idle-expired");
        }

        let abandoned = self.negotiator.expire_stale_handshakes(self.time.as_ref());
        for peer in &abandoned {
            info!(peer = ?peer, "handshake abandoned after timeout");
        }

        let now = self.time.now();
        let mut actions = Vec::new();
        let mut rng = OsRng;

        for ready in self.friends.ready_retries(now) {
            let peer_pk = ready.peer;
            let Some(friend_id) = self.friends.friend_id_for(&peer_pk) else { continue };
            let delivered = (|| -> Option<()> {
                let dest = self.dht.resolve_locally(&peer_pk).ok()?;
                let (_, plan) = self
                    .friends
                    .prepare_send(friend_id, &ready.message, &self.dht, &self.negotiator, &mut rng, self.time.as_ref())
                    .ok()?;
                match plan {
                    SendPlan::Direct { wire, dest: _ } => actions.push(IterationAction::Transmit { wire, dest }),
                    SendPlan::HandshakeThenSend { handshake_wire, dest: _, .. } => {
                        actions.push(IterationAction::Transmit { wire: handshake_wire, dest })
                    }
                    SendPlan::QueuedNoRoute => return None,
                }
                Some(())
            })();
            if delivered.is_none() {
                self.friends.reschedule_send_retry(ready, now);
            }
        }

        for request in self.friends.ready_request_retries(now) {
            match self.dht.resolve_locally(&request.target_pk) {
                Ok(dest) => {
                    let wire = FriendEngine::build_friend_request_wire(&self.identity.public, &request);
                    actions.push(IterationAction::Transmit { wire, dest });
                }
                Err(_) => self.friends.reschedule_request_retry(request, now),
            }
        }

        self.storage.lock().expire(now);
        actions.extend(self.poll_mailboxes(now));

        actions
    }

    /// Issue `FETCH`es to each friend's advertised mailbox nodes, at
    /// most once every [`MAILBOX_POLL_INTERVAL_SECS`] per friend, so a
    /// store-and-forward message sent while we were offline is picked
    /// up without the sender needing to retry.
    fn poll_mailboxes(&self, now: u64) -> Vec<IterationAction> {
        let mut actions = Vec::new();
        let mut last_poll = self.last_mailbox_poll.lock();

        for friend in self.friends.all_friends() {
            let due = last_poll.get(&friend.public_key).map(|&at| now.saturating_sub(at) >= MAILBOX_POLL_INTERVAL_SECS).unwrap_or(true);
            if !due {
                continue;
            }
            let storage_nodes = self.dht.storage_nodes_near(&friend.public_key, crate::dht::K);
            if storage_nodes.is_empty() {
                continue;
            }
            let challenge = self.identity.public.0;
            let fetches = mailbox::prepare_fetches(&self.identity, &friend.public_key, &challenge, self.time.as_ref());
            for node in &storage_nodes {
                for fetch in &fetches {
                    actions.push(IterationAction::Transmit {
                        wire: PacketKind::Fetch.frame(&fetch.to_wire()),
                        dest: node.address.clone(),
                    });
                }
            }
            last_poll.insert(friend.public_key, now);
        }

        actions
    }

    /// Record presence for a friend whose traffic just decrypted
    /// successfully over a live link: direct IP traffic counts as UDP,
    /// anything that needed an overlay proxy counts as TCP. Does not
    /// apply to messages that arrived indirectly through a mailbox
    /// fetch, since those say nothing about the friend's current
    /// connectivity.
    fn mark_friend_live(&self, friend_id: FriendId, src: &NetAddress, now: u64) {
        let status = if src.requires_proxy() { ConnectionStatus::Tcp } else { ConnectionStatus::Udp };
        self.friends.set_connection_status(friend_id, status);
        self.friends.touch_last_seen(friend_id, now);
    }

    /// Feed one raw inbound datagram (already received from `src` by
    /// the host's transport) through version negotiation, decryption,
    /// and routing by packet kind: raw packet -> negotiator
    /// (decrypt/validate) -> DHT, friend engine, or request manager,
    /// depending on what kind of packet it turned out to be. Malformed
    /// or unauthenticated packets are dropped silently, matching the
    /// negotiator's own drop-on-failure policy. DHT maintenance packets
    /// (ping/get_nodes/nat-ping) and presence packets
    /// (online/offline/nickname/status/user-status) are not dispatched
    /// here: their wire layout is a host/network concern this crate's
    /// core does not fix.
    #[instrument(skip(self, wire), fields(src = ?src))]
    pub fn handle_packet(&self, wire: &[u8], src: NetAddress) -> Vec<IterationAction> {
        let Some(envelope) = PacketEnvelope::from_wire(wire, src.clone()) else {
            return Vec::new();
        };
        let mut rng = OsRng;
        let time = self.time.as_ref();

        match envelope.kind {
            PacketKind::Handshake | PacketKind::Negotiation => {
                let from_hint = self.dht.pk_for_address(&src);
                match self.negotiator.handle_handshake_packet(&envelope.payload, from_hint, &mut rng, time) {
                    Ok(HandshakeStep::Reply(reply)) => {
                        vec![IterationAction::Transmit { wire: PacketKind::Handshake.frame(&reply), dest: src }]
                    }
                    Ok(HandshakeStep::Completed) => {
                        // `Completed` is only ever returned by
                        // continuing an initiator attempt of our own,
                        // so `from_hint` is guaranteed to be the peer
                        // whose handshake just finished.
                        let Some(peer) = from_hint else { return Vec::new() };
                        self.friends
                            .flush_pending(&peer)
                            .into_iter()
                            .filter_map(|plaintext| {
                                let ciphertext = self.negotiator.encrypt_for(&peer, &plaintext, &mut rng, time).ok()?;
                                Some(IterationAction::Transmit {
                                    wire: PacketKind::Message.frame(&ciphertext),
                                    dest: src.clone(),
                                })
                            })
                            .collect()
                    }
                    Err(_) => Vec::new(),
                }
            }
            PacketKind::FriendRequest => {
                if envelope.payload.len() >= 32 {
                    let mut pk_bytes = [0u8; 32];
                    pk_bytes.copy_from_slice(&envelope.payload[..32]);
                    let pk = PublicKey(pk_bytes);
                    let message = String::from_utf8_lossy(&envelope.payload[32..]).into_owned();
                    self.requests.submit(pk, message.clone());
                    self.friends.handle_inbound_friend_request(pk, message);
                }
                Vec::new()
            }
            PacketKind::Message | PacketKind::Action => {
                let Some(peer_pk) = self.dht.pk_for_address(&src) else { return Vec::new() };
                let Some(friend_id) = self.friends.friend_id_for(&peer_pk) else { return Vec::new() };
                let Ok(plaintext) = self.negotiator.decrypt_from(&peer_pk, &envelope.payload, time) else {
                    return Vec::new();
                };
                self.mark_friend_live(friend_id, &src, time.now());
                if !self.friends.handle_inbound_file_payload(friend_id, &plaintext) {
                    let kind = if envelope.kind == PacketKind::Action { MessageKind::Action } else { MessageKind::Normal };
                    self.friends.handle_inbound_message(friend_id, String::from_utf8_lossy(&plaintext).into_owned(), kind);
                }
                Vec::new()
            }
            PacketKind::Store => {
                let Some(request) = StoreRequest::from_wire(&envelope.payload) else { return Vec::new() };
                let _ = self.storage.lock().store(
                    request.pseudonym,
                    request.ciphertext,
                    request.ttl_secs,
                    request.verifier,
                    &src,
                    time.now(),
                );
                Vec::new()
            }
            PacketKind::Fetch => {
                let Some(request) = FetchRequest::from_wire(&envelope.payload) else { return Vec::new() };
                match self.storage.lock().fetch(&request.pseudonym, &request.challenge, &request.signature, time.now()) {
                    Ok(records) => {
                        let wire = mailbox::encode_fetch_response(&request.pseudonym, &records);
                        vec![IterationAction::Transmit { wire: PacketKind::FetchResponse.frame(&wire), dest: src }]
                    }
                    Err(_) => Vec::new(),
                }
            }
            PacketKind::Lossy => {
                let Some(peer_pk) = self.dht.pk_for_address(&src) else { return Vec::new() };
                let Ok(plaintext) = self.negotiator.decrypt_from(&peer_pk, &envelope.payload, time) else {
                    return Vec::new();
                };
                if let Some(friend_id) = self.friends.friend_id_for(&peer_pk) {
                    self.mark_friend_live(friend_id, &src, time.now());
                }
                if let Some(frame) = MediaFrame::from_wire(&plaintext) {
                    self.av.push_incoming(IncomingMediaPacket { sender_pk: peer_pk, frame });
                }
                Vec::new()
            }
            PacketKind::FetchResponse => {
                let Some((_, records)) = mailbox::decode_fetch_response(&envelope.payload) else { return Vec::new() };
                for record in records {
                    if let Ok((sender_pk, message)) = mailbox::open_fetched(&self.identity, &record) {
                        if let Some(friend_id) = self.friends.friend_id_for(&sender_pk) {
                            self.friends.touch_last_seen(friend_id, time.now());
                            self.friends.handle_inbound_message(friend_id, String::from_utf8_lossy(&message).into_owned(), MessageKind::Normal);
                        }
                    }
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    pub fn get_savedata(&self) -> Vec<u8> {
        Savedata::snapshot(
            self.identity.secret().clone(),
            self.nospam,
            self.name.clone(),
            self.status_message.clone(),
            &self.friends,
        )
        .to_bytes()
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn set_status_message(&mut self, status_message: String) {
        self.status_message = status_message;
    }
}

impl Default for Tox {
    fn default() -> Self {
        Self::new()
    }
}

fn identity_clone(kp: &KeyPair) -> KeyPair {
    crate::crypto::derive_from_secret(kp.secret())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_identity_has_a_valid_tox_id() {
        let tox = Tox::new();
        let id = tox.tox_id();
        assert!(ToxId::parse(&id.to_string()).is_ok());
    }

    #[test]
    fn savedata_round_trips_identity_and_friends() {
        let mut tox = Tox::new();
        tox.set_name("alice".into());
        let friend_pk = generate_keypair(&mut OsRng).public;
        tox.friends.add_friend_by_pk(friend_pk).unwrap();

        let bytes = tox.get_savedata();
        let restored = Tox::load_savedata(&bytes).unwrap();
        assert_eq!(restored.tox_id().public_key, tox.tox_id().public_key);
        assert_eq!(restored.name, "alice");
        assert!(restored.friends.friend_id_for(&friend_pk).is_some());
    }

    #[test]
    fn iterate_with_no_friends_produces_no_actions() {
        let tox = Tox::new();
        assert!(tox.iterate().is_empty());
    }

    #[test]
    fn transport_disabled_rejects_sends_without_panicking() {
        let options = ToxOptions { udp_enabled: false, tcp_port: 0, ..ToxOptions::default() };
        let tox = Tox::with_options(options).unwrap();
        let friend_pk = generate_keypair(&mut OsRng).public;
        let friend_id = tox.friends.add_friend_by_pk(friend_pk).unwrap();

        let err = tox.send_message(friend_id, "hi").unwrap_err();
        assert!(matches!(err, crate::error::ToxError::TransportUnavailable(_)));

        let err = tox.send_async_message(friend_pk, "hi").unwrap_err();
        assert!(matches!(err, crate::error::ToxError::TransportUnavailable(_)));
    }

    #[test]
    fn secret_key_savedata_option_restores_identity_with_no_friends() {
        let sk = crate::crypto::SecretKey([7u8; 32]);
        let options = ToxOptions { savedata: SaveDataOption::SecretKey(sk.0), ..ToxOptions::default() };
        let tox = Tox::with_options(options).unwrap();
        let expected = crate::crypto::derive_from_secret(&sk);
        assert_eq!(tox.tox_id().public_key, expected.public);
    }

    #[test]
    fn handshake_and_message_round_trip_through_handle_packet() {
        use crate::dht::DhtNode;
        use std::net::Ipv4Addr;

        let alice = Tox::new();
        let bob = Tox::new();
        let bob_addr = NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 1 };
        let alice_addr = NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 2 };

        // Each side learns the other's address, and both sides are
        // mutual friends already (as if a friend request had already
        // been accepted).
        alice.dht.observe_node(DhtNode::new(bob.tox_id().public_key, bob_addr.clone(), 0));
        bob.dht.observe_node(DhtNode::new(alice.tox_id().public_key, alice_addr.clone(), 0));
        let alice_friend = alice.friends.add_friend_by_pk(bob.tox_id().public_key).unwrap();
        bob.friends.add_friend_by_pk(alice.tox_id().public_key).unwrap();

        let (_, plan) = alice.send_message(alice_friend, "hello bob").unwrap();
        let handshake_wire = match plan {
            SendPlan::HandshakeThenSend { handshake_wire, .. } => handshake_wire,
            _ => panic!("expected a fresh handshake"),
        };

        // Bob receives the handshake (arriving from alice's address)
        // and replies.
        let bob_actions = bob.handle_packet(&handshake_wire, alice_addr.clone());
        assert_eq!(bob_actions.len(), 1);
        let IterationAction::Transmit { wire: reply_wire, .. } = &bob_actions[0];

        // Alice receives the reply (arriving from bob's address): the
        // handshake completes and her queued "hello bob" is flushed as
        // a ciphertext to transmit.
        let alice_actions = alice.handle_packet(reply_wire, bob_addr.clone());
        assert_eq!(alice_actions.len(), 1);
        let IterationAction::Transmit { wire: message_wire, .. } = &alice_actions[0];

        // Bob receives the message itself, from alice's address.
        let bob_friend = bob.friends.friend_id_for(&alice.tox_id().public_key).unwrap();
        assert!(bob.handle_packet(message_wire, alice_addr).is_empty());
        assert_eq!(bob.friends.connection_status(bob_friend), Some(ConnectionStatus::Udp));
        let seen = bob.friends.all_friends().into_iter().find(|f| f.public_key == alice.tox_id().public_key).unwrap();
        assert!(seen.last_seen > 0);
    }

    #[test]
    fn friend_request_packet_is_surfaced_to_the_request_manager() {
        let bob = Tox::new();
        let alice_pk = generate_keypair(&mut OsRng).public;
        let mut wire = vec![crate::transport::PacketKind::FriendRequest.as_byte()];
        wire.extend_from_slice(alice_pk.as_bytes());
        wire.extend_from_slice(b"hi there");

        let addr = crate::transport::NetAddress::V4 { ip: std::net::Ipv4Addr::LOCALHOST, port: 3 };
        assert!(bob.handle_packet(&wire, addr).is_empty());
        assert!(bob.requests().is_pending(&alice_pk));
    }

    #[test]
    fn send_file_via_tox_starts_a_pending_transfer() {
        let tox = Tox::new();
        let friend_pk = generate_keypair(&mut OsRng).public;
        let friend_id = tox.friends.add_friend_by_pk(friend_pk).unwrap();

        let (transfer_id, _plan) = tox.send_file(friend_id, "notes.txt".into(), 128).unwrap();
        assert_eq!(tox.file_transfer_state(friend_id, transfer_id), Some(crate::friend::FileTransferState::Pending));
    }

    #[test]
    fn async_message_is_stored_fetched_and_delivered_through_handle_packet() {
        use crate::dht::DhtNode;
        use std::net::Ipv4Addr;

        let alice = Tox::new();
        let bob = Tox::new();
        alice.friends.add_friend_by_pk(bob.tox_id().public_key).unwrap();
        bob.friends.add_friend_by_pk(alice.tox_id().public_key).unwrap();

        // A third identity hosts the mailbox both alice and bob resolve
        // as a storage node near bob's public key.
        let mailbox_addr = NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 9 };
        let mailbox_pk = generate_keypair(&mut OsRng).public;
        let mut mailbox_node = DhtNode::new(mailbox_pk, mailbox_addr.clone(), 0);
        mailbox_node.is_storage_node = true;
        alice.dht.observe_node(mailbox_node.clone());
        bob.dht.observe_node(mailbox_node);

        // Alice stores a message for bob while he's offline.
        let store_actions = alice.send_async_message(bob.tox_id().public_key, "see you later").unwrap();
        assert_eq!(store_actions.len(), 1);
        let IterationAction::Transmit { wire: store_wire, dest } = &store_actions[0];
        assert_eq!(*dest, mailbox_addr);

        // The mailbox host is a standalone Tox instance serving storage.
        let mailbox = Tox::new();
        let alice_addr = NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 10 };
        assert!(mailbox.handle_packet(store_wire, alice_addr.clone()).is_empty());

        // Bob polls on reconnect and gets a FETCH to send to the mailbox.
        let fetch_actions = bob.poll_mailboxes(bob.time.now());
        assert_eq!(fetch_actions.len(), 1);
        let IterationAction::Transmit { wire: fetch_wire, dest: fetch_dest } = &fetch_actions[0];
        assert_eq!(*fetch_dest, mailbox_addr);

        // The mailbox answers with the stored ciphertext, and bob opens
        // it straight into his friend's message history.
        let bob_addr = NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 11 };
        let response_actions = mailbox.handle_packet(fetch_wire, bob_addr);
        assert_eq!(response_actions.len(), 1);
        let IterationAction::Transmit { wire: response_wire, .. } = &response_actions[0];

        assert!(bob.handle_packet(response_wire, alice_addr).is_empty());
    }

    #[test]
    fn audio_frame_is_encrypted_sent_and_decoded_on_the_other_end() {
        use crate::dht::DhtNode;
        use std::net::Ipv4Addr;

        let alice = Tox::new();
        let bob = Tox::new();
        let bob_addr = NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 21 };
        let alice_addr = NetAddress::V4 { ip: Ipv4Addr::LOCALHOST, port: 22 };
        alice.dht.observe_node(DhtNode::new(bob.tox_id().public_key, bob_addr.clone(), 0));
        bob.dht.observe_node(DhtNode::new(alice.tox_id().public_key, alice_addr.clone(), 0));
        let alice_friend = alice.friends.add_friend_by_pk(bob.tox_id().public_key).unwrap();
        bob.friends.add_friend_by_pk(alice.tox_id().public_key).unwrap();

        // No session yet: sending a frame before a call exists fails
        // without a live session.
        let err = alice.audio_send_frame(alice_friend, vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, crate::error::ToxError::State(_)));

        alice.av.call(alice_friend, MediaFlags::AUDIO).unwrap();

        // Establish a session via an ordinary message round trip first.
        let (_, plan) = alice.send_message(alice_friend, "hi").unwrap();
        let handshake_wire = match plan {
            SendPlan::HandshakeThenSend { handshake_wire, .. } => handshake_wire,
            _ => panic!("expected a fresh handshake"),
        };
        let bob_actions = bob.handle_packet(&handshake_wire, alice_addr.clone());
        let IterationAction::Transmit { wire: reply_wire, .. } = &bob_actions[0];
        alice.handle_packet(reply_wire, bob_addr.clone());

        let action = alice.audio_send_frame(alice_friend, vec![9, 8, 7]).unwrap();
        let IterationAction::Transmit { wire, dest } = action;
        assert_eq!(dest, bob_addr);

        assert!(bob.handle_packet(&wire, alice_addr).is_empty());
        let incoming = bob.take_incoming_media();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].sender_pk, alice.tox_id().public_key);
        assert_eq!(incoming[0].frame, MediaFrame::Audio(vec![9, 8, 7]));
    }

    #[test]
    fn add_friend_via_tox_queues_an_outbound_request() {
        let tox = Tox::new();
        let target = generate_keypair(&mut OsRng).public;
        let tox_id = ToxId::new(target, crate::crypto::NoSpam::generate(&mut OsRng));
        let id = tox.add_friend(&tox_id, "let's be friends".into()).unwrap();
        assert!(tox.friends.friend_public_key(id).is_some());
        assert_eq!(tox.friends.pending_request_count(), 1);
    }
}
