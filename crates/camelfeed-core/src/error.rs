//! Error types shared across camelfeed crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding firehose frames.
#[derive(Error, Debug)]
pub enum Error {
    /// Frame body is not valid JSON or does not match the frame shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A commit frame is missing a field required to build an event.
    #[error("missing field '{field}' in {kind} frame")]
    MissingField {
        /// The frame kind (e.g. `commit`).
        kind: String,
        /// The name of the missing field.
        field: &'static str,
    },

    /// An operation path is not of the form `<collection>/<rkey>`.
    #[error("invalid operation path '{0}'")]
    InvalidPath(String),
}
