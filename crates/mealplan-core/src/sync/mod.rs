//! Sync layer
//!
//! - [`change`]: queued mutations and their storage encoding
//! - [`engine`]: drains the queue against the server
//! - [`message`]: realtime channel messages
//! - [`realtime`]: merges server-pushed notifications into local state
//! - [`sse`]: event-stream framing for the realtime subscription

pub mod change;
pub mod engine;
pub mod message;
pub mod realtime;
pub mod sse;

pub use change::{Change, PendingChange, Subject};
pub use engine::{
    spawn_sync_task, DrainReport, Step, SyncCommand, SyncEngine, SyncError, SyncHandle,
    SyncResult,
};
pub use message::{InboundEvent, MessageError};
pub use realtime::{
    spawn_realtime_task, LinkStatus, RealtimeBridge, RealtimeCommand, RealtimeConfig,
    RealtimeHandle,
};
pub use sse::SseDecoder;
