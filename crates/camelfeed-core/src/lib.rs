//! Core types, frame decoding, and shared utilities for camelfeed.
//!
//! This crate provides:
//! - Firehose event types (commits, operations, matched posts)
//! - JSON frame decoding for the firehose wire format
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
mod frame;
pub mod metrics;

pub use error::{Error, Result};
pub use event::{
    CommitEvent, FirehoseEvent, MatchedPost, Operation, POST_COLLECTION, PostRecord, record_uri,
};
pub use frame::{decode_frame, decode_frame_str};
