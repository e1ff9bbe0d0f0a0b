//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database setup or schema error.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Firehose frame could not be decoded.
    #[error("Frame error: {0}")]
    Frame(#[from] camelfeed_core::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The upstream ended the stream.
    #[error("Stream closed by upstream")]
    StreamClosed,

    /// `next_event` was called before a successful `connect`.
    #[error("Source not connected")]
    NotConnected,

    /// Dispatch queue closed (a worker exited).
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The reconnect policy gave up.
    #[error("Reconnect retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of reconnect attempts made.
        attempts: u32,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}
