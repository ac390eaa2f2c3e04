//! A Tox-like protocol core in pure Rust: P2P, distributed,
//! end-to-end encrypted, DHT-based network, with a Noise-IK session
//! layer and store-and-forward offline messaging.
//!
//! Module map mirrors the subsystem boundaries (C1..C10): [`crypto`]
//! and [`noise`] are the cryptographic foundation; [`transport`] is
//! the abstract packet carrier; [`negotiator`] sits between them,
//! turning a destination public key into encrypted bytes on the wire;
//! [`dht`] resolves a public key to an address; [`friend`] and
//! [`request_manager`] are the friend-relationship state machine;
//! [`mailbox`] is the optional async store-and-forward extension;
//! [`av`] is audio/video call-session glue; [`tox`] wires all of the
//! above into one coordinator.

pub mod av;
pub mod config;
pub mod crypto;
pub mod dht;
pub mod error;
pub mod friend;
pub mod mailbox;
pub mod negotiator;
pub mod noise;
pub mod request_manager;
pub mod rng;
pub mod savedata;
pub mod time;
pub mod tox;
pub mod transport;

pub use config::{ProxyConfig, SaveDataOption, ToxOptions};
pub use error::{Result, ToxError};
pub use tox::{IterationAction, Tox};
