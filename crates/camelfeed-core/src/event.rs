//! Firehose event types.
//!
//! A [`FirehoseEvent`] is one frame of the repository-change stream. Commit
//! frames carry a batch of record-level [`Operation`]s; every other frame kind
//! (identity, account, handle, info) is kept only as a sequence marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection NSID for feed posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// One frame of the firehose.
#[derive(Debug, Clone, PartialEq)]
pub enum FirehoseEvent {
    /// A repository commit.
    Commit(CommitEvent),
    /// Any non-commit frame (identity, account, handle, info).
    Other {
        /// Stream sequence number.
        seq: u64,
        /// Frame kind as sent by the upstream.
        kind: String,
    },
}

impl FirehoseEvent {
    /// Stream sequence number of this frame.
    pub fn seq(&self) -> u64 {
        match self {
            Self::Commit(commit) => commit.seq,
            Self::Other { seq, .. } => *seq,
        }
    }

    /// Returns the commit if this is a commit frame.
    pub fn as_commit(&self) -> Option<&CommitEvent> {
        match self {
            Self::Commit(commit) => Some(commit),
            Self::Other { .. } => None,
        }
    }
}

/// One unit of change in a repository's history.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    /// Monotonically increasing stream sequence number.
    pub seq: u64,
    /// Repository DID.
    pub repo: String,
    /// Time the upstream emitted the commit, if reported.
    pub time: Option<DateTime<Utc>>,
    /// Record-level operations carried by this commit.
    pub ops: Vec<Operation>,
}

/// A single record-level change within a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create {
        collection: String,
        uri: String,
        cid: String,
        record: PostRecord,
    },
    Delete {
        collection: String,
        uri: String,
    },
}

impl Operation {
    /// Collection NSID the operation applies to.
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection, .. } | Self::Delete { collection, .. } => collection,
        }
    }

    /// AT-URI of the affected record.
    pub fn uri(&self) -> &str {
        match self {
            Self::Create { uri, .. } | Self::Delete { uri, .. } => uri,
        }
    }
}

/// The subset of a post record the classifier reads.
///
/// Records from other collections decode to an empty text and no timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    /// Raw `createdAt` value. Kept unparsed so malformed values surface as
    /// non-matches instead of decode failures.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A post that passed the topic filter, as written to the post store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPost {
    pub uri: String,
    pub cid: String,
    pub indexed_at: DateTime<Utc>,
}

/// Build the AT-URI for a record in a repository.
pub fn record_uri(repo: &str, collection: &str, rkey: &str) -> String {
    format!("at://{repo}/{collection}/{rkey}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(uri: &str) -> Operation {
        Operation::Create {
            collection: POST_COLLECTION.to_string(),
            uri: uri.to_string(),
            cid: "bafycid".to_string(),
            record: PostRecord::default(),
        }
    }

    #[test]
    fn test_record_uri() {
        assert_eq!(
            record_uri("did:plc:abc", POST_COLLECTION, "3kxyz"),
            "at://did:plc:abc/app.bsky.feed.post/3kxyz"
        );
    }

    #[test]
    fn test_operation_accessors() {
        let op = create("at://did:plc:abc/app.bsky.feed.post/1");
        assert_eq!(op.collection(), POST_COLLECTION);
        assert_eq!(op.uri(), "at://did:plc:abc/app.bsky.feed.post/1");

        let del = Operation::Delete {
            collection: "app.bsky.feed.like".to_string(),
            uri: "at://did:plc:abc/app.bsky.feed.like/2".to_string(),
        };
        assert_eq!(del.collection(), "app.bsky.feed.like");
    }

    #[test]
    fn test_firehose_event_seq() {
        let commit = FirehoseEvent::Commit(CommitEvent {
            seq: 7,
            repo: "did:plc:abc".to_string(),
            time: None,
            ops: vec![],
        });
        assert_eq!(commit.seq(), 7);
        assert!(commit.as_commit().is_some());

        let other = FirehoseEvent::Other {
            seq: 8,
            kind: "identity".to_string(),
        };
        assert_eq!(other.seq(), 8);
        assert!(other.as_commit().is_none());
    }

    #[test]
    fn test_matched_post_serializes_camel_case() {
        let post = MatchedPost {
            uri: "at://did:plc:abc/app.bsky.feed.post/1".to_string(),
            cid: "bafycid".to_string(),
            indexed_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["indexedAt"], "2024-05-01T12:00:00Z");
        assert_eq!(json["cid"], "bafycid");
    }
}
