//! A/V session glue (C9). The codec and RTP subsystem is an external
//! collaborator; this module only tracks per-friend call state,
//! bitrate negotiation, and media-packet routing hooks.
//!
//! The call state here is deliberately **not** a single integer with
//! bitwise-OR'd direction/media flags over non-power-of-two values:
//! [`CallPhase`] is a plain enum for the call's lifecycle, and
//! [`MediaFlags`] (a proper `bitflags` type) independently tracks which
//! media kinds are active, so compositions can never collide.

use bitflags::bitflags;
use thiserror::Error;

use crate::crypto::PublicKey;
use crate::friend::FriendId;

bitflags! {
    /// Which media kinds are active for a call. Orthogonal to
    /// [`CallPhase`] — a call can be `Sending` while carrying audio
    /// only, video only, or both.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MediaFlags: u8 {
        const AUDIO = 0b01;
        const VIDEO = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    None,
    Incoming,
    Sending,
    Accepting,
    Finished,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallControl {
    Resume,
    Pause,
    Cancel,
    MuteAudio,
    UnmuteAudio,
    HideVideo,
    ShowVideo,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no friend with this id")]
    UnknownFriend,
    #[error("no call in progress with this friend")]
    NoCall,
    #[error("a call with this friend is already in progress")]
    AlreadyInCall,
}

/// Per-friend call state.
#[derive(Debug, Clone, Copy)]
pub struct CallState {
    pub phase: CallPhase,
    pub media: MediaFlags,
    pub audio_bitrate: u32,
    pub video_bitrate: u32,
}

impl CallState {
    fn idle() -> Self {
        CallState {
            phase: CallPhase::None,
            media: MediaFlags::empty(),
            audio_bitrate: 0,
            video_bitrate: 0,
        }
    }
}

/// Decoded media ready to hand to the collaborator, or encoded media
/// ready to send, depending on direction. The core never touches pixel
/// or sample data beyond passing it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFrame {
    Audio(Vec<u8>),
    Video(Vec<u8>),
}

impl MediaFrame {
    /// `kind_tag(1) ‖ sample/pixel bytes`, the payload carried inside a
    /// `Lossy` packet once session-encrypted.
    pub fn to_wire(&self) -> Vec<u8> {
        let (tag, bytes) = match self {
            MediaFrame::Audio(bytes) => (0u8, bytes),
            MediaFrame::Video(bytes) => (1u8, bytes),
        };
        let mut out = Vec::with_capacity(1 + bytes.len());
        out.push(tag);
        out.extend_from_slice(bytes);
        out
    }

    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        match tag {
            0 => Some(MediaFrame::Audio(rest.to_vec())),
            1 => Some(MediaFrame::Video(rest.to_vec())),
            _ => None,
        }
    }
}

use std::collections::HashMap;

use parking_lot::Mutex;

/// Tracks call state per friend and decides how `call_control`
/// operations affect it. Resolving a friend's live address and
/// encrypting media packets for transmission is the top-level
/// coordinator's job (via C5/C6/C4); this type only holds the state
/// and the inbound-frame queue those frames land in once decrypted.
pub struct AvSession {
    calls: Mutex<HashMap<FriendId, CallState>>,
    incoming: Mutex<Vec<IncomingMediaPacket>>,
}

impl AvSession {
    pub fn new() -> Self {
        AvSession { calls: Mutex::new(HashMap::new()), incoming: Mutex::new(Vec::new()) }
    }

    pub fn state(&self, friend_id: FriendId) -> CallState {
        self.calls.lock().get(&friend_id).copied().unwrap_or_else(CallState::idle)
    }

    /// Place an outgoing call, requesting `media`.
    pub fn call(&self, friend_id: FriendId, media: MediaFlags) -> Result<(), CallError> {
        let mut calls = self.calls.lock();
        let state = calls.entry(friend_id).or_insert_with(CallState::idle);
        if !matches!(state.phase, CallPhase::None | CallPhase::Finished | CallPhase::Error) {
            return Err(CallError::AlreadyInCall);
        }
        state.phase = CallPhase::Sending;
        state.media = media;
        Ok(())
    }

    /// Record an inbound call invitation.
    pub fn register_incoming(&self, friend_id: FriendId, media: MediaFlags) {
        let mut calls = self.calls.lock();
        let state = calls.entry(friend_id).or_insert_with(CallState::idle);
        state.phase = CallPhase::Incoming;
        state.media = media;
    }

    /// Accept an incoming call.
    pub fn answer(&self, friend_id: FriendId) -> Result<(), CallError> {
        let mut calls = self.calls.lock();
        let state = calls.get_mut(&friend_id).ok_or(CallError::NoCall)?;
        if state.phase != CallPhase::Incoming {
            return Err(CallError::NoCall);
        }
        state.phase = CallPhase::Accepting;
        Ok(())
    }

    pub fn call_control(&self, friend_id: FriendId, op: CallControl) -> Result<(), CallError> {
        let mut calls = self.calls.lock();
        let state = calls.get_mut(&friend_id).ok_or(CallError::NoCall)?;
        match op {
            CallControl::Resume => state.phase = CallPhase::Sending,
            CallControl::Pause => {}
            CallControl::Cancel => {
                state.phase = CallPhase::Finished;
                state.media = MediaFlags::empty();
            }
            CallControl::MuteAudio => state.media.remove(MediaFlags::AUDIO),
            CallControl::UnmuteAudio => state.media.insert(MediaFlags::AUDIO),
            CallControl::HideVideo => state.media.remove(MediaFlags::VIDEO),
            CallControl::ShowVideo => state.media.insert(MediaFlags::VIDEO),
        }
        Ok(())
    }

    pub fn set_audio_bitrate(&self, friend_id: FriendId, bitrate: u32) -> Result<(), CallError> {
        let mut calls = self.calls.lock();
        let state = calls.get_mut(&friend_id).ok_or(CallError::NoCall)?;
        state.audio_bitrate = bitrate;
        Ok(())
    }

    pub fn set_video_bitrate(&self, friend_id: FriendId, bitrate: u32) -> Result<(), CallError> {
        let mut calls = self.calls.lock();
        let state = calls.get_mut(&friend_id).ok_or(CallError::NoCall)?;
        state.video_bitrate = bitrate;
        Ok(())
    }

    /// Queue a decrypted inbound media packet for the host to pick up.
    /// Called by the top-level coordinator once a `Lossy` packet has
    /// been session-decrypted and parsed.
    pub fn push_incoming(&self, packet: IncomingMediaPacket) {
        self.incoming.lock().push(packet);
    }

    /// Drain every media packet received since the last call. The host
    /// is expected to call this every iteration, the same way it reads
    /// [`crate::tox::IterationAction`]s.
    pub fn take_incoming(&self) -> Vec<IncomingMediaPacket> {
        std::mem::take(&mut *self.incoming.lock())
    }
}

impl Default for AvSession {
    fn default() -> Self {
        Self::new()
    }
}

/// A received, decrypted lossy A/V packet, handed off for the decoder
/// collaborator to consume. The core does not decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMediaPacket {
    pub sender_pk: PublicKey,
    pub frame: MediaFrame,
}
