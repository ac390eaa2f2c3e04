//! Persistent identity and friend-list codec.
//!
//! Savedata is a versioned binary blob: a single format tag byte
//! followed by length-prefixed fields, in the same hand-rolled style as
//! [`crate::negotiator::HandshakeEnvelope`]. Only round-tripping through
//! [`Savedata::to_bytes`]/[`Savedata::from_bytes`] is guaranteed; the
//! internal layout is not a public wire contract and may gain fields in
//! a later format version.

use thiserror::Error;

use crate::crypto::{KeyPair, NoSpam, PublicKey, SecretKey};
use crate::friend::{Friend, FriendEngine, UserStatus};

const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SavedataError {
    #[error("savedata is truncated")]
    Truncated,
    #[error("unsupported savedata format version {0}")]
    UnsupportedVersion(u8),
    #[error("savedata is corrupt: {0}")]
    Corrupt(&'static str),
}

/// One friend entry as persisted: enough to reconstruct a mutual
/// friendship without replaying the request handshake. Connection
/// status and the outbound message counter are runtime-only and always
/// reset on load; `status` and `last_seen` are the friend's
/// last-known presence and are restored as-is.
#[derive(Debug, Clone)]
pub struct SavedFriend {
    pub public_key: PublicKey,
    pub name: String,
    pub status_message: String,
    pub status: UserStatus,
    pub last_seen: u64,
}

fn status_to_byte(status: UserStatus) -> u8 {
    match status {
        UserStatus::None => 0,
        UserStatus::Online => 1,
        UserStatus::Away => 2,
        UserStatus::Busy => 3,
    }
}

fn status_from_byte(byte: u8) -> Result<UserStatus, SavedataError> {
    match byte {
        0 => Ok(UserStatus::None),
        1 => Ok(UserStatus::Online),
        2 => Ok(UserStatus::Away),
        3 => Ok(UserStatus::Busy),
        _ => Err(SavedataError::Corrupt("unknown friend status byte")),
    }
}

/// Everything needed to restore a `Tox` identity across restarts: the
/// long-term key pair, nospam, self display metadata, and friend list.
#[derive(Debug, Clone)]
pub struct Savedata {
    pub secret_key: SecretKey,
    pub nospam: NoSpam,
    pub name: String,
    pub status_message: String,
    pub friends: Vec<SavedFriend>,
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_bytes<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8], SavedataError> {
    if bytes.len() < *pos + 4 {
        return Err(SavedataError::Truncated);
    }
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&bytes[*pos..*pos + 4]);
    let len = u32::from_le_bytes(len_buf) as usize;
    *pos += 4;
    if bytes.len() < *pos + len {
        return Err(SavedataError::Truncated);
    }
    let slice = &bytes[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

fn read_string(bytes: &[u8], pos: &mut usize) -> Result<String, SavedataError> {
    let raw = read_bytes(bytes, pos)?;
    String::from_utf8(raw.to_vec()).map_err(|_| SavedataError::Corrupt("non-utf8 string field"))
}

impl Savedata {
    /// Snapshot the running state needed to restore this identity: the
    /// key pair, nospam, self metadata, and the current friend list
    /// (connection status and per-session counters are intentionally
    /// dropped, since they are not meaningful across a restart).
    pub fn snapshot(
        secret_key: SecretKey,
        nospam: NoSpam,
        name: String,
        status_message: String,
        friends: &FriendEngine,
    ) -> Self {
        let friends = friends
            .all_friends()
            .into_iter()
            .map(|f: Friend| SavedFriend {
                public_key: f.public_key,
                name: f.name,
                status_message: f.status_message,
                status: f.status,
                last_seen: f.last_seen,
            })
            .collect();
        Savedata { secret_key, nospam, name, status_message, friends }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![FORMAT_VERSION];
        write_bytes(&mut out, &self.secret_key.0);
        write_bytes(&mut out, &self.nospam.0);
        write_bytes(&mut out, self.name.as_bytes());
        write_bytes(&mut out, self.status_message.as_bytes());
        out.extend_from_slice(&(self.friends.len() as u32).to_le_bytes());
        for friend in &self.friends {
            write_bytes(&mut out, &friend.public_key.0);
            write_bytes(&mut out, friend.name.as_bytes());
            write_bytes(&mut out, friend.status_message.as_bytes());
            out.push(status_to_byte(friend.status));
            out.extend_from_slice(&friend.last_seen.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SavedataError> {
        if bytes.is_empty() {
            return Err(SavedataError::Truncated);
        }
        let version = bytes[0];
        if version != FORMAT_VERSION {
            return Err(SavedataError::UnsupportedVersion(version));
        }
        let mut pos = 1;

        let sk_bytes = read_bytes(bytes, &mut pos)?;
        if sk_bytes.len() != 32 {
            return Err(SavedataError::Corrupt("secret key is not 32 bytes"));
        }
        let mut sk = [0u8; 32];
        sk.copy_from_slice(sk_bytes);

        let nospam_bytes = read_bytes(bytes, &mut pos)?;
        if nospam_bytes.len() != 4 {
            return Err(SavedataError::Corrupt("nospam is not 4 bytes"));
        }
        let mut nospam = [0u8; 4];
        nospam.copy_from_slice(nospam_bytes);

        let name = read_string(bytes, &mut pos)?;
        let status_message = read_string(bytes, &mut pos)?;

        if bytes.len() < pos + 4 {
            return Err(SavedataError::Truncated);
        }
        let mut count_buf = [0u8; 4];
        count_buf.copy_from_slice(&bytes[pos..pos + 4]);
        let count = u32::from_le_bytes(count_buf) as usize;
        pos += 4;

        let mut friends = Vec::with_capacity(count);
        for _ in 0..count {
            let pk_bytes = read_bytes(bytes, &mut pos)?;
            if pk_bytes.len() != 32 {
                return Err(SavedataError::Corrupt("friend public key is not 32 bytes"));
            }
            let mut pk = [0u8; 32];
            pk.copy_from_slice(pk_bytes);
            let name = read_string(bytes, &mut pos)?;
            let status_message = read_string(bytes, &mut pos)?;

            if bytes.len() < pos + 1 {
                return Err(SavedataError::Truncated);
            }
            let status = status_from_byte(bytes[pos])?;
            pos += 1;

            if bytes.len() < pos + 8 {
                return Err(SavedataError::Truncated);
            }
            let mut last_seen_buf = [0u8; 8];
            last_seen_buf.copy_from_slice(&bytes[pos..pos + 8]);
            let last_seen = u64::from_le_bytes(last_seen_buf);
            pos += 8;

            friends.push(SavedFriend { public_key: PublicKey(pk), name, status_message, status, last_seen });
        }

        Ok(Savedata {
            secret_key: SecretKey(sk),
            nospam: NoSpam(nospam),
            name,
            status_message,
            friends,
        })
    }

    pub fn key_pair(&self) -> KeyPair {
        crate::crypto::derive_from_secret(&self.secret_key)
    }
}

/// Apply loaded friends into a fresh [`FriendEngine`], restoring
/// display metadata, presence, and last-seen. Connection status always
/// starts `None`: liveness is re-established by the DHT/negotiator,
/// never persisted.
pub fn restore_friends(engine: &FriendEngine, saved: &[SavedFriend]) {
    for friend in saved {
        let _ = engine.restore_friend(
            friend.public_key,
            friend.name.clone(),
            friend.status_message.clone(),
            friend.status,
            friend.last_seen,
        );
    }
}
