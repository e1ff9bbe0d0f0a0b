//! Commit classification.
//!
//! [`Classifier::classify`] turns one commit into the writes it implies:
//! URIs to delete and matched posts to insert. It is pure CPU work and runs
//! inline in the consumer loop.
//!
//! A post matches when both hold:
//! - its `createdAt` is strictly later than `now - window`
//! - its text contains the keyword (case-insensitive) or the emoji marker
//!
//! An unparseable `createdAt` is a non-match, not an error.
//!
//! Deletes dominate within one commit: a create whose URI is also deleted by
//! the same commit is dropped, so the URI ends up absent.

use std::collections::HashSet;

use camelfeed_core::{CommitEvent, MatchedPost, Operation, POST_COLLECTION, PostRecord};
use chrono::{DateTime, Duration, Utc};

/// Default topic keyword.
pub const DEFAULT_KEYWORD: &str = "ocaml";

/// Default topic emoji marker.
pub const DEFAULT_EMOJI: &str = "🐫";

/// Default recency window.
pub const DEFAULT_WINDOW_HOURS: i64 = 48;

/// Topic and recency predicate for post records.
#[derive(Debug, Clone)]
pub struct TopicFilter {
    /// Lower-cased keyword.
    keyword: String,
    emoji: String,
    window: Duration,
}

impl Default for TopicFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_KEYWORD,
            DEFAULT_EMOJI,
            Duration::hours(DEFAULT_WINDOW_HOURS),
        )
    }
}

impl TopicFilter {
    /// Create a filter. The keyword is matched case-insensitively.
    pub fn new(keyword: impl Into<String>, emoji: impl Into<String>, window: Duration) -> Self {
        Self {
            keyword: keyword.into().to_lowercase(),
            emoji: emoji.into(),
            window,
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn emoji(&self) -> &str {
        &self.emoji
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True if the text mentions the topic.
    pub fn matches_text(&self, text: &str) -> bool {
        let keyword_hit = !self.keyword.is_empty() && text.to_lowercase().contains(&self.keyword);
        let emoji_hit = !self.emoji.is_empty() && text.contains(&self.emoji);
        keyword_hit || emoji_hit
    }

    /// True if `created_at` parses and falls inside the window ending at `now`.
    pub fn is_recent(&self, created_at: &str, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(created_at) {
            Ok(ts) => ts.with_timezone(&Utc) > now - self.window,
            Err(_) => false,
        }
    }

    /// Full predicate for a post record.
    pub fn matches(&self, record: &PostRecord, now: DateTime<Utc>) -> bool {
        let Some(created_at) = record.created_at.as_deref() else {
            return false;
        };
        self.is_recent(created_at, now) && self.matches_text(&record.text)
    }
}

/// Writes implied by one commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// URIs to delete.
    pub deletes: Vec<String>,
    /// Matched posts to insert, `indexed_at` set to the classification time.
    pub creates: Vec<MatchedPost>,
}

impl Classification {
    /// True if the commit implies no writes.
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty()
    }
}

/// Extracts target-collection writes from commits.
#[derive(Debug, Clone)]
pub struct Classifier {
    collection: String,
    filter: TopicFilter,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(TopicFilter::default())
    }
}

impl Classifier {
    /// Classifier for feed posts.
    pub fn new(filter: TopicFilter) -> Self {
        Self::with_collection(POST_COLLECTION, filter)
    }

    /// Classifier for an arbitrary collection.
    pub fn with_collection(collection: impl Into<String>, filter: TopicFilter) -> Self {
        Self {
            collection: collection.into(),
            filter,
        }
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Classify a commit against wall-clock time `now`.
    pub fn classify(&self, commit: &CommitEvent, now: DateTime<Utc>) -> Classification {
        let mut out = Classification::default();

        for op in commit
            .ops
            .iter()
            .filter(|op| op.collection() == self.collection)
        {
            match op {
                Operation::Delete { uri, .. } => out.deletes.push(uri.clone()),
                Operation::Create {
                    uri, cid, record, ..
                } => {
                    if self.filter.matches(record, now) {
                        out.creates.push(MatchedPost {
                            uri: uri.clone(),
                            cid: cid.clone(),
                            indexed_at: now,
                        });
                    }
                }
            }
        }

        if !out.deletes.is_empty() && !out.creates.is_empty() {
            let deleted: HashSet<&str> = out.deletes.iter().map(String::as_str).collect();
            out.creates.retain(|post| !deleted.contains(post.uri.as_str()));
        }

        out
    }
}
