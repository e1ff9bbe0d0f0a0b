//! JSON frame decoding for the firehose.
//!
//! Upstream frames are JSON objects tagged by `kind`. Commit frames look like:
//!
//! ```json
//! {
//!   "kind": "commit",
//!   "seq": 41,
//!   "repo": "did:plc:abc",
//!   "time": "2024-05-01T12:00:00Z",
//!   "ops": [
//!     {"action": "create", "path": "app.bsky.feed.post/3kxyz", "cid": "bafy...",
//!      "record": {"text": "hello", "createdAt": "2024-05-01T11:59:58Z"}},
//!     {"action": "delete", "path": "app.bsky.feed.post/3kabc"}
//!   ]
//! }
//! ```
//!
//! Any other `kind` decodes to [`FirehoseEvent::Other`]. `update` operations
//! and unknown actions are dropped: the feed only tracks record creation and
//! deletion. A malformed operation (bad path, create without a cid) is logged
//! and dropped without affecting the rest of the commit, so a single bad op
//! cannot wedge a resumed stream on the same frame.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::event::{CommitEvent, FirehoseEvent, Operation, PostRecord, record_uri};

#[derive(Debug, Deserialize)]
struct RawFrame {
    kind: String,
    seq: u64,
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    ops: Vec<RawOp>,
}

#[derive(Debug, Deserialize)]
struct RawOp {
    action: String,
    path: String,
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    record: Option<serde_json::Value>,
}

/// Decode one frame from its JSON bytes.
pub fn decode_frame(bytes: &[u8]) -> Result<FirehoseEvent> {
    let raw: RawFrame = serde_json::from_slice(bytes)?;
    into_event(raw)
}

/// Decode one frame from a JSON string (e.g. a JSONL line).
pub fn decode_frame_str(line: &str) -> Result<FirehoseEvent> {
    decode_frame(line.as_bytes())
}

fn into_event(raw: RawFrame) -> Result<FirehoseEvent> {
    if raw.kind != "commit" {
        return Ok(FirehoseEvent::Other {
            seq: raw.seq,
            kind: raw.kind,
        });
    }

    let repo = raw.repo.ok_or_else(|| Error::MissingField {
        kind: raw.kind.clone(),
        field: "repo",
    })?;

    let mut ops = Vec::with_capacity(raw.ops.len());
    for op in raw.ops {
        match into_operation(&repo, op) {
            Ok(Some(op)) => ops.push(op),
            Ok(None) => {}
            Err(e) => {
                counter!("firehose_malformed_ops_total").increment(1);
                tracing::warn!(seq = raw.seq, repo = %repo, "dropping malformed op: {}", e);
            }
        }
    }

    Ok(FirehoseEvent::Commit(CommitEvent {
        seq: raw.seq,
        repo,
        time: raw.time,
        ops,
    }))
}

fn into_operation(repo: &str, op: RawOp) -> Result<Option<Operation>> {
    let (collection, rkey) = op
        .path
        .split_once('/')
        .filter(|(c, r)| !c.is_empty() && !r.is_empty())
        .ok_or_else(|| Error::InvalidPath(op.path.clone()))?;
    let uri = record_uri(repo, collection, rkey);

    match op.action.as_str() {
        "create" => {
            let cid = op.cid.ok_or_else(|| Error::MissingField {
                kind: "create op".to_string(),
                field: "cid",
            })?;
            // Non-post records rarely fit PostRecord; fall back to empty.
            let record = op
                .record
                .and_then(|value| serde_json::from_value::<PostRecord>(value).ok())
                .unwrap_or_default();
            Ok(Some(Operation::Create {
                collection: collection.to_string(),
                uri,
                cid,
                record,
            }))
        }
        "delete" => Ok(Some(Operation::Delete {
            collection: collection.to_string(),
            uri,
        })),
        "update" => Ok(None),
        other => {
            tracing::debug!(action = other, path = %op.path, "skipping unknown action");
            Ok(None)
        }
    }
}
