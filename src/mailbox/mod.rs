//! Async-mailbox extension (C8): pseudonymous, end-to-end encrypted
//! store-and-forward over DHT storage nodes. Unofficial: the core
//! works without it, but it lets a message reach a recipient who is
//! offline.

mod client;
mod pseudonym;
mod sealed_box;
mod storage_node;

pub use client::{
    decode_fetch_response, encode_fetch_response, open_fetched, prepare_fetches, prepare_send_async, FetchRequest,
    StoreRequest, DEFAULT_TTL_SECS, FETCH_LOOKBACK_EPOCHS,
};
pub use pseudonym::{derive_pseudonym, derive_verifier_keypair, epoch_for, recent_pseudonyms, Pseudonym, EPOCH_SECS};
pub use sealed_box::{SealedBox, SealedBoxError};
pub use storage_node::{MailboxError, StorageNode, MAX_RECORDS_PER_PSEUDONYM, MAX_TTL_SECS, RATE_LIMIT_MAX_STORES, RATE_LIMIT_WINDOW_SECS};
