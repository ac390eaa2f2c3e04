//! Wire packet-kind registry and the envelope type that carries a
//! parsed kind, its payload, and the opaque source/destination address.

use super::address::NetAddress;

/// Stable numeric packet-kind tags. Values must never be renumbered once
/// shipped: they are persisted implicitly by interoperating with peers
/// and, for the coordinator's own bookkeeping, are stable across a
/// savedata round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    PingRequest = 0,
    PingResponse = 1,
    GetNodesRequest = 2,
    GetNodesResponse = 3,
    NatPing = 4,
    Handshake = 16,
    Negotiation = 17,
    FriendRequest = 32,
    Online = 48,
    Offline = 49,
    Nickname = 50,
    StatusMessage = 51,
    UserStatus = 52,
    Message = 64,
    Action = 65,
    FileControl = 80,
    FileData = 81,
    Store = 96,
    Fetch = 97,
    FetchResponse = 98,
    Lossy = 192,
}

impl PacketKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use PacketKind::*;
        Some(match byte {
            0 => PingRequest,
            1 => PingResponse,
            2 => GetNodesRequest,
            3 => GetNodesResponse,
            4 => NatPing,
            16 => Handshake,
            17 => Negotiation,
            32 => FriendRequest,
            48 => Online,
            49 => Offline,
            50 => Nickname,
            51 => StatusMessage,
            52 => UserStatus,
            64 => Message,
            65 => Action,
            80 => FileControl,
            81 => FileData,
            96 => Store,
            97 => Fetch,
            98 => FetchResponse,
            192 => Lossy,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Prepend this kind's tag byte to `payload`. Used to frame packets
    /// sent ahead of a [`PacketEnvelope`] being built around them (a
    /// session-encrypted ciphertext, a handshake message) the same way
    /// [`PacketEnvelope::to_wire`] frames a parsed one.
    pub fn frame(self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(self.as_byte());
        out.extend_from_slice(payload);
        out
    }
}

/// A raw inbound or outbound packet: a kind tag, its payload bytes, and
/// the opaque peer address it came from or is going to.
#[derive(Debug, Clone)]
pub struct PacketEnvelope {
    pub kind: PacketKind,
    pub payload: Vec<u8>,
    pub peer_address: NetAddress,
}

impl PacketEnvelope {
    pub fn new(kind: PacketKind, payload: Vec<u8>, peer_address: NetAddress) -> Self {
        PacketEnvelope {
            kind,
            payload,
            peer_address,
        }
    }

    /// Serialize as `[kind_byte] ‖ payload`, the on-wire form.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push(self.kind.as_byte());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a raw datagram into kind + payload, given the address it
    /// arrived from.
    pub fn from_wire(bytes: &[u8], peer_address: NetAddress) -> Option<Self> {
        let (&kind_byte, rest) = bytes.split_first()?;
        let kind = PacketKind::from_byte(kind_byte)?;
        Some(PacketEnvelope {
            kind,
            payload: rest.to_vec(),
            peer_address,
        })
    }
}
