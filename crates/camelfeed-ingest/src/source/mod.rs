//! Event source adapters.
//!
//! A source yields firehose frames in sequence order and can resume from a
//! checkpointed cursor. The consumer loop depends only on [`EventSource`].
//!
//! # Available Sources
//!
//! - [`WebSocketSource`] - Live firehose over a WebSocket subscription
//! - [`JsonlSource`] - Replays recorded frames from a JSONL file

mod jsonl;
mod websocket;

pub use jsonl::{JsonlConfig, JsonlSource};
pub use websocket::{WebSocketConfig, WebSocketSource};

use std::future::Future;
use std::time::Duration;

use camelfeed_core::FirehoseEvent;

use crate::Result;

/// A resumable, ordered stream of firehose frames.
///
/// Lifecycle: `connect`, then `next_event` until it returns `Ok(None)` or an
/// error. After either, the consumer may call `connect` again with the latest
/// checkpoint.
pub trait EventSource: Send {
    /// Human-readable name for this source (used in logs and as the cursor key).
    fn name(&self) -> &str;

    /// Open (or reopen) the stream, resuming after `cursor` if given.
    fn connect(&mut self, cursor: Option<u64>) -> impl Future<Output = Result<()>> + Send;

    /// Next frame. `Ok(None)` means the stream ended.
    fn next_event(&mut self) -> impl Future<Output = Result<Option<FirehoseEvent>>> + Send;

    /// Minimum wait the source asks for before the next connect, if any.
    fn reconnect_hint(&self) -> Option<Duration> {
        None
    }

    /// True if end of stream means the input is exhausted rather than a
    /// dropped connection.
    fn is_finite(&self) -> bool {
        false
    }
}
