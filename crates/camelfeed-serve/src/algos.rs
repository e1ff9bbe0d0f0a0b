//! Feed algorithms.
//!
//! [`AlgoRegistry`] maps a feed short name to the handler that builds its
//! skeleton. The topic feed pages through the `post` table newest first,
//! ordered by `(indexed_at DESC, cid DESC)`.
//!
//! Cursors have the form `<indexed_at epoch ms>::<cid>` and point at the
//! last post of the previous page.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Default page size.
pub const DEFAULT_LIMIT: u32 = 50;

/// Largest accepted page size.
pub const MAX_LIMIT: u32 = 100;

/// Parameters of a skeleton request after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedParams {
    pub limit: u32,
    pub cursor: Option<FeedCursor>,
}

/// Position of the last post on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    pub indexed_at: DateTime<Utc>,
    pub cid: String,
}

impl FeedCursor {
    /// Parse `<epoch ms>::<cid>`.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let (millis, cid) = raw
            .split_once("::")
            .ok_or_else(|| ApiError::BadCursor(format!("expected <time>::<cid>, got {raw:?}")))?;

        if cid.is_empty() {
            return Err(ApiError::BadCursor("cursor has an empty cid".to_string()));
        }

        let millis: i64 = millis
            .parse()
            .map_err(|_| ApiError::BadCursor(format!("bad timestamp in cursor: {millis:?}")))?;
        let indexed_at = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| ApiError::BadCursor(format!("timestamp out of range: {millis}")))?;

        Ok(Self {
            indexed_at,
            cid: cid.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("{}::{}", self.indexed_at.timestamp_millis(), self.cid)
    }
}

/// One entry of the skeleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonItem {
    pub post: String,
}

/// `app.bsky.feed.getFeedSkeleton` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSkeleton {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub feed: Vec<SkeletonItem>,
}

/// Builds one page of a feed.
pub type AlgoHandler = fn(&Connection, &FeedParams) -> Result<FeedSkeleton, ApiError>;

/// Feed short name to handler.
#[derive(Default)]
pub struct AlgoRegistry {
    handlers: HashMap<String, AlgoHandler>,
}

impl AlgoRegistry {
    /// Registry serving the topic feed under `name`.
    pub fn with_topic_feed(name: &str) -> Self {
        let mut registry = Self::default();
        registry.register(name, topic_feed);
        registry
    }

    pub fn register(&mut self, name: &str, handler: AlgoHandler) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<AlgoHandler> {
        self.handlers.get(name).copied()
    }

    /// Registered short names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Newest matched posts first.
pub fn topic_feed(conn: &Connection, params: &FeedParams) -> Result<FeedSkeleton, ApiError> {
    let mut rows: Vec<(String, String, String)> = Vec::new();

    match &params.cursor {
        Some(cursor) => {
            let ts = cursor
                .indexed_at
                .to_rfc3339_opts(SecondsFormat::Millis, true);
            let mut stmt = conn.prepare_cached(
                "SELECT uri, cid, indexed_at FROM post
                 WHERE indexed_at < ?1 OR (indexed_at = ?1 AND cid < ?2)
                 ORDER BY indexed_at DESC, cid DESC
                 LIMIT ?3",
            )?;
            let mapped = stmt.query_map(params![ts, cursor.cid, params.limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            for row in mapped {
                rows.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare_cached(
                "SELECT uri, cid, indexed_at FROM post
                 ORDER BY indexed_at DESC, cid DESC
                 LIMIT ?1",
            )?;
            let mapped = stmt.query_map(params![params.limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            for row in mapped {
                rows.push(row?);
            }
        }
    }

    let cursor = match rows.last() {
        Some((_, cid, indexed_at)) => {
            let indexed_at = DateTime::parse_from_rfc3339(indexed_at)
                .map_err(|e| anyhow::anyhow!("bad indexed_at {indexed_at:?}: {e}"))?
                .with_timezone(&Utc);
            Some(
                FeedCursor {
                    indexed_at,
                    cid: cid.clone(),
                }
                .encode(),
            )
        }
        None => None,
    };

    Ok(FeedSkeleton {
        cursor,
        feed: rows
            .into_iter()
            .map(|(uri, _, _)| SkeletonItem { post: uri })
            .collect(),
    })
}
