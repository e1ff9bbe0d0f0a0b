//! Persistence pipeline for matched posts.
//!
//! - [`SqliteStore`] - SQLite-backed post set and cursor checkpoint
//! - [`Dispatcher`] - Worker pool that applies per-commit write batches
//!
//! # Architecture
//!
//! ```text
//! [StreamConsumer] → [Classifier] → [Dispatcher] → workers → [PostStore]
//!        ↓
//!  [CursorStore] (every N-th commit)
//! ```

mod dispatch;
pub(crate) mod schema;
mod store;

pub use dispatch::{DispatchConfig, DispatchStats, Dispatcher, PersistBatch};
pub use store::{CursorStore, PostStore, SqliteStore, format_indexed_at};
