//! camelfeed ingestion pipeline.
//!
//! This crate consumes the repository-commit firehose, keeps posts that
//! mention the topic, and persists them for the feed service.
//!
//! # Modules
//!
//! - [`source`] - Event source adapters (live WebSocket, JSONL replay)
//! - [`classify`] - Topic and recency filter over commit operations
//! - [`pipeline`] - SQLite post/cursor store and the dispatch worker pool
//! - [`stats`] - Consumption counters
//! - [`reconnect`] - Reconnect delay policy
//! - [`consumer`] - The stream consumer loop tying it all together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   EventSource   │  (WebSocket firehose, JSONL replay)
//! └────────┬────────┘
//!          │  resume from cursor
//!          ▼
//! ┌─────────────────┐      ┌──────────────┐
//! │ StreamConsumer  │─────▶│ CursorStore  │  every 20th seq
//! └────────┬────────┘      └──────────────┘
//!          │  Classifier (inline)
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  worker pool, routed by repo
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    PostStore    │  SQLite, first writer wins
//! └─────────────────┘
//! ```

pub mod classify;
pub mod consumer;
pub mod error;
pub mod pipeline;
pub mod reconnect;
pub mod source;
pub mod stats;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use classify::{Classification, Classifier, TopicFilter};
pub use consumer::{ConsumerConfig, ConsumerState, RunSummary, StreamConsumer};
pub use pipeline::{
    CursorStore, DispatchConfig, DispatchStats, Dispatcher, PersistBatch, PostStore, SqliteStore,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use source::{EventSource, JsonlConfig, JsonlSource, WebSocketConfig, WebSocketSource};
pub use stats::{IngestStats, StatsSnapshot};
