//! Friend engine (C6): add/accept friends, send messages and files,
//! and the outbound friend-request retry queue.

mod engine;
mod file_transfer;
mod record;
mod request_queue;
mod retry_queue;

pub use engine::{FriendEngine, FriendEvent, FriendEventSink, NullEventSink, SendError, SendPlan};
pub use file_transfer::{
    FileControl, FileTransferDirection, FileTransferError, FileTransferId, FileTransferState,
};
pub use record::{ConnectionStatus, Friend, FriendError, FriendId, FriendTable, MessageKind, UserStatus};
pub use request_queue::{OutboundRequestQueue, PendingFriendRequest};
pub use retry_queue::{ReadyMessage, RetryQueue, INITIAL_BACKOFF_SECS, MAX_RETRIES};
