//! Injected time capability.
//!
//! Reaching for wall-clock `now()` directly wherever a timestamp is
//! needed (handshake freshness, retry scheduling, session expiry)
//! makes deterministic tests impossible, so every subsystem here is
//! handed a `TimeSource` instead of calling `SystemTime::now()` itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current Unix timestamp, in seconds.
///
/// Production code uses [`SystemTimeSource`]; tests use [`ManualTimeSource`]
/// to drive handshake-freshness and retry-backoff logic without real sleeps.
pub trait TimeSource: Send + Sync {
    /// Current Unix time, in seconds.
    fn now(&self) -> u64;
}

/// Wall-clock time source backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs()
    }
}

/// A manually-advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Advance the clock by `secs` seconds.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, value: u64) {
        self.now.store(value, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
