//! File-transfer state and wire encoding (C6 supplement): chunked
//! transfer over the same session-encrypted envelope a text message
//! uses, framed under `PacketKind::FileControl`/`FileData` the way
//! `build_friend_request_wire` frames a friend request under
//! `PacketKind::FriendRequest`.
//!
//! Transfer ids are assigned by whichever side calls [`send_file`] and
//! echoed back verbatim in control replies; a `(FriendId, id)` pair is
//! therefore enough to key a transfer without a separate namespace per
//! direction.

use std::collections::HashMap;

use thiserror::Error;

use super::record::FriendId;
use crate::transport::PacketKind;

/// Wire-level control-byte tags inside a `FileControl` payload. `Request`
/// is never exposed to callers as a [`FileControl`] variant — it is the
/// implicit first message [`FileEngine::start_outgoing`] sends.
const CONTROL_REQUEST: u8 = 0;
const CONTROL_ACCEPT: u8 = 1;
const CONTROL_PAUSE: u8 = 2;
const CONTROL_RESUME: u8 = 3;
const CONTROL_CANCEL: u8 = 4;

/// Opaque per-(friend, direction) transfer handle, assigned by the
/// side that calls [`FileEngine::start_outgoing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileTransferId(pub u32);

/// Flow-control operation a caller applies to an in-progress transfer.
/// `Request`/acceptance itself is not a variant here: accepting an
/// incoming transfer is [`FileEngine::accept_incoming`], not a control
/// op, since only the recipient may accept and only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileControl {
    Pause,
    Resume,
    Cancel,
}

impl FileControl {
    fn as_byte(self) -> u8 {
        match self {
            FileControl::Pause => CONTROL_PAUSE,
            FileControl::Resume => CONTROL_RESUME,
            FileControl::Cancel => CONTROL_CANCEL,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            CONTROL_PAUSE => Some(FileControl::Pause),
            CONTROL_RESUME => Some(FileControl::Resume),
            CONTROL_CANCEL => Some(FileControl::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTransferDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTransferState {
    /// Request sent (outgoing) or received and not yet accepted
    /// (incoming).
    Pending,
    Transferring,
    Paused,
    Cancelled,
    Done,
}

#[derive(Debug, Clone)]
pub struct FileTransferRecord {
    pub direction: FileTransferDirection,
    pub filename: String,
    pub size: u64,
    pub transferred: u64,
    pub state: FileTransferState,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FileTransferError {
    #[error("no transfer with this id for this friend")]
    UnknownTransfer,
    #[error("transfer is not in a state that accepts this operation")]
    IllegalState,
    #[error("malformed file-transfer wire payload")]
    Malformed,
}

/// A parsed `FileControl`/`FileData` payload, after the negotiator has
/// already decrypted it under the friend's session.
pub enum FileWireMessage {
    Request { transfer_id: FileTransferId, filename: String, size: u64 },
    Accept { transfer_id: FileTransferId },
    Control { transfer_id: FileTransferId, control: FileControl },
    Chunk { transfer_id: FileTransferId, offset: u64, data: Vec<u8> },
}

/// Build the plaintext payload [`FriendEngine::send_file`] hands to
/// `prepare_send` to announce a new outgoing transfer.
pub fn build_request_payload(transfer_id: FileTransferId, filename: &str, size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 1 + 8 + filename.len());
    out.push(PacketKind::FileControl.as_byte());
    out.extend_from_slice(&transfer_id.0.to_be_bytes());
    out.push(CONTROL_REQUEST);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(filename.as_bytes());
    out
}

fn build_control_payload(transfer_id: FileTransferId, byte: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 1);
    out.push(PacketKind::FileControl.as_byte());
    out.extend_from_slice(&transfer_id.0.to_be_bytes());
    out.push(byte);
    out
}

pub fn build_accept_payload(transfer_id: FileTransferId) -> Vec<u8> {
    build_control_payload(transfer_id, CONTROL_ACCEPT)
}

pub fn build_control_op_payload(transfer_id: FileTransferId, control: FileControl) -> Vec<u8> {
    build_control_payload(transfer_id, control.as_byte())
}

pub fn build_chunk_payload(transfer_id: FileTransferId, offset: u64, chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 8 + chunk.len());
    out.push(PacketKind::FileData.as_byte());
    out.extend_from_slice(&transfer_id.0.to_be_bytes());
    out.extend_from_slice(&offset.to_be_bytes());
    out.extend_from_slice(chunk);
    out
}

/// Parse a decrypted session payload that carries a `FileControl` or
/// `FileData` kind byte. Returns `None` for payloads of any other kind
/// (the caller routes those to the plain-message path instead).
pub fn parse_payload(payload: &[u8]) -> Option<Result<FileWireMessage, FileTransferError>> {
    let (&kind_byte, rest) = payload.split_first()?;
    let kind = PacketKind::from_byte(kind_byte)?;
    match kind {
        PacketKind::FileControl => Some(parse_control(rest)),
        PacketKind::FileData => Some(parse_chunk(rest)),
        _ => None,
    }
}

fn parse_control(rest: &[u8]) -> Result<FileWireMessage, FileTransferError> {
    if rest.len() < 5 {
        return Err(FileTransferError::Malformed);
    }
    let mut id_bytes = [0u8; 4];
    id_bytes.copy_from_slice(&rest[0..4]);
    let transfer_id = FileTransferId(u32::from_be_bytes(id_bytes));
    let op = rest[4];
    match op {
        CONTROL_REQUEST => {
            if rest.len() < 13 {
                return Err(FileTransferError::Malformed);
            }
            let mut size_bytes = [0u8; 8];
            size_bytes.copy_from_slice(&rest[5..13]);
            let size = u64::from_be_bytes(size_bytes);
            let filename = String::from_utf8_lossy(&rest[13..]).into_owned();
            Ok(FileWireMessage::Request { transfer_id, filename, size })
        }
        CONTROL_ACCEPT => Ok(FileWireMessage::Accept { transfer_id }),
        other => {
            let control = FileControl::from_byte(other).ok_or(FileTransferError::Malformed)?;
            Ok(FileWireMessage::Control { transfer_id, control })
        }
    }
}

fn parse_chunk(rest: &[u8]) -> Result<FileWireMessage, FileTransferError> {
    if rest.len() < 12 {
        return Err(FileTransferError::Malformed);
    }
    let mut id_bytes = [0u8; 4];
    id_bytes.copy_from_slice(&rest[0..4]);
    let transfer_id = FileTransferId(u32::from_be_bytes(id_bytes));
    let mut offset_bytes = [0u8; 8];
    offset_bytes.copy_from_slice(&rest[4..12]);
    let offset = u64::from_be_bytes(offset_bytes);
    Ok(FileWireMessage::Chunk { transfer_id, offset, data: rest[12..].to_vec() })
}

/// Owns every file transfer in flight for one [`super::FriendEngine`],
/// keyed by the friend it belongs to and the id the initiating side
/// assigned it.
#[derive(Default)]
pub struct FileTransferTable {
    transfers: HashMap<(FriendId, u32), FileTransferRecord>,
    next_outgoing_id: u32,
}

impl FileTransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_outgoing(&mut self, friend_id: FriendId, filename: String, size: u64) -> FileTransferId {
        let id = self.next_outgoing_id;
        self.next_outgoing_id += 1;
        self.transfers.insert(
            (friend_id, id),
            FileTransferRecord {
                direction: FileTransferDirection::Outgoing,
                filename,
                size,
                transferred: 0,
                state: FileTransferState::Pending,
            },
        );
        FileTransferId(id)
    }

    pub fn register_incoming(&mut self, friend_id: FriendId, transfer_id: FileTransferId, filename: String, size: u64) {
        self.transfers.insert(
            (friend_id, transfer_id.0),
            FileTransferRecord {
                direction: FileTransferDirection::Incoming,
                filename,
                size,
                transferred: 0,
                state: FileTransferState::Pending,
            },
        );
    }

    pub fn get(&self, friend_id: FriendId, transfer_id: FileTransferId) -> Option<&FileTransferRecord> {
        self.transfers.get(&(friend_id, transfer_id.0))
    }

    fn get_mut(&mut self, friend_id: FriendId, transfer_id: FileTransferId) -> Result<&mut FileTransferRecord, FileTransferError> {
        self.transfers
            .get_mut(&(friend_id, transfer_id.0))
            .ok_or(FileTransferError::UnknownTransfer)
    }

    /// The recipient accepts a pending incoming transfer, moving it to
    /// `Transferring`. Fails if the transfer is unknown, already
    /// accepted, or not ours to accept.
    pub fn accept_incoming(&mut self, friend_id: FriendId, transfer_id: FileTransferId) -> Result<(), FileTransferError> {
        let record = self.get_mut(friend_id, transfer_id)?;
        if record.direction != FileTransferDirection::Incoming || record.state != FileTransferState::Pending {
            return Err(FileTransferError::IllegalState);
        }
        record.state = FileTransferState::Transferring;
        Ok(())
    }

    /// Apply the peer's `Accept` reply to one of our own outgoing
    /// transfers.
    pub fn mark_accepted_by_peer(&mut self, friend_id: FriendId, transfer_id: FileTransferId) -> Result<(), FileTransferError> {
        let record = self.get_mut(friend_id, transfer_id)?;
        if record.direction != FileTransferDirection::Outgoing || record.state != FileTransferState::Pending {
            return Err(FileTransferError::IllegalState);
        }
        record.state = FileTransferState::Transferring;
        Ok(())
    }

    /// Apply a `Pause`/`Resume`/`Cancel` issued locally by the caller
    /// (either party may pause/resume/cancel either direction).
    pub fn apply_local_control(&mut self, friend_id: FriendId, transfer_id: FileTransferId, control: FileControl) -> Result<(), FileTransferError> {
        let record = self.get_mut(friend_id, transfer_id)?;
        apply_control(record, control)
    }

    /// Apply a `Pause`/`Resume`/`Cancel` the peer sent us.
    pub fn apply_remote_control(&mut self, friend_id: FriendId, transfer_id: FileTransferId, control: FileControl) -> Result<(), FileTransferError> {
        let record = self.get_mut(friend_id, transfer_id)?;
        apply_control(record, control)
    }

    pub fn record_progress(&mut self, friend_id: FriendId, transfer_id: FileTransferId, transferred: u64) -> Result<(), FileTransferError> {
        let record = self.get_mut(friend_id, transfer_id)?;
        record.transferred = transferred;
        if record.transferred >= record.size {
            record.state = FileTransferState::Done;
        }
        Ok(())
    }
}

fn apply_control(record: &mut FileTransferRecord, control: FileControl) -> Result<(), FileTransferError> {
    match (record.state, control) {
        (FileTransferState::Transferring, FileControl::Pause) => {
            record.state = FileTransferState::Paused;
            Ok(())
        }
        (FileTransferState::Paused, FileControl::Resume) => {
            record.state = FileTransferState::Transferring;
            Ok(())
        }
        (FileTransferState::Cancelled | FileTransferState::Done, _) => Err(FileTransferError::IllegalState),
        (_, FileControl::Cancel) => {
            record.state = FileTransferState::Cancelled;
            Ok(())
        }
        _ => Err(FileTransferError::IllegalState),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_payload_round_trips_through_parse() {
        let id = FileTransferId(7);
        let payload = build_request_payload(id, "photo.png", 4096);
        match parse_payload(&payload).unwrap().unwrap() {
            FileWireMessage::Request { transfer_id, filename, size } => {
                assert_eq!(transfer_id.0, 7);
                assert_eq!(filename, "photo.png");
                assert_eq!(size, 4096);
            }
            _ => panic!("expected a Request"),
        }
    }

    #[test]
    fn chunk_payload_round_trips_through_parse() {
        let id = FileTransferId(3);
        let payload = build_chunk_payload(id, 128, b"chunk bytes");
        match parse_payload(&payload).unwrap().unwrap() {
            FileWireMessage::Chunk { transfer_id, offset, data } => {
                assert_eq!(transfer_id.0, 3);
                assert_eq!(offset, 128);
                assert_eq!(data, b"chunk bytes");
            }
            _ => panic!("expected a Chunk"),
        }
    }

    #[test]
    fn control_payload_round_trips_through_parse() {
        let id = FileTransferId(1);
        let payload = build_control_op_payload(id, FileControl::Pause);
        match parse_payload(&payload).unwrap().unwrap() {
            FileWireMessage::Control { transfer_id, control } => {
                assert_eq!(transfer_id.0, 1);
                assert_eq!(control, FileControl::Pause);
            }
            _ => panic!("expected a Control"),
        }
    }

    #[test]
    fn pause_then_resume_is_allowed_only_while_transferring() {
        let mut table = FileTransferTable::new();
        let friend = FriendId(0);
        let id = table.start_outgoing(friend, "f".into(), 10);
        assert_eq!(
            table.apply_local_control(friend, id, FileControl::Pause),
            Err(FileTransferError::IllegalState)
        );
        table.mark_accepted_by_peer(friend, id).unwrap();
        table.apply_local_control(friend, id, FileControl::Pause).unwrap();
        assert_eq!(table.get(friend, id).unwrap().state, FileTransferState::Paused);
        table.apply_local_control(friend, id, FileControl::Resume).unwrap();
        assert_eq!(table.get(friend, id).unwrap().state, FileTransferState::Transferring);
    }

    #[test]
    fn cancel_is_terminal() {
        let mut table = FileTransferTable::new();
        let friend = FriendId(0);
        let id = table.start_outgoing(friend, "f".into(), 10);
        table.mark_accepted_by_peer(friend, id).unwrap();
        table.apply_local_control(friend, id, FileControl::Cancel).unwrap();
        assert_eq!(
            table.apply_local_control(friend, id, FileControl::Resume),
            Err(FileTransferError::IllegalState)
        );
    }

    #[test]
    fn progress_past_size_marks_done() {
        let mut table = FileTransferTable::new();
        let friend = FriendId(0);
        let id = table.start_outgoing(friend, "f".into(), 10);
        table.mark_accepted_by_peer(friend, id).unwrap();
        table.record_progress(friend, id, 10).unwrap();
        assert_eq!(table.get(friend, id).unwrap().state, FileTransferState::Done);
    }

    #[test]
    fn incoming_transfer_must_be_accepted_before_control_applies() {
        let mut table = FileTransferTable::new();
        let friend = FriendId(0);
        let id = FileTransferId(9);
        table.register_incoming(friend, id, "f".into(), 1);
        assert_eq!(
            table.apply_remote_control(friend, id, FileControl::Pause),
            Err(FileTransferError::IllegalState)
        );
        table.accept_incoming(friend, id).unwrap();
        table.apply_remote_control(friend, id, FileControl::Pause).unwrap();
    }
}
