//! camelfeed Serve - feed generator HTTP API
//!
//! This crate serves the posts collected by `camelfeed-ingest` as a feed
//! skeleton. It opens the shared SQLite database read-only.
//!
//! # Architecture
//!
//! - **AppState**: Shared application state (database connection, configuration)
//! - **Algos**: Feed short name to skeleton handler
//! - **Routes**: XRPC endpoint handlers

pub mod algos;
mod error;
mod routes;
mod state;

pub use self::algos::{AlgoHandler, AlgoRegistry, FeedCursor, FeedParams, FeedSkeleton};
pub use self::error::ApiError;
pub use self::routes::router;
pub use self::state::{AppState, Config};
