//! Post and cursor persistence.
//!
//! [`PostStore`] and [`CursorStore`] are the two seams the consumer loop and
//! the dispatch workers write through. [`SqliteStore`] implements both over a
//! single SQLite file in WAL mode.
//!
//! # Idempotence
//!
//! - Inserts use `ON CONFLICT(uri) DO NOTHING`: the first stored version of a
//!   post wins, so redelivered creates are no-ops.
//! - Deletes remove by URI whether or not a matching row exists.
//! - Cursor writes keep `MAX(stored, new)`, so the cursor never moves back.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use camelfeed_core::MatchedPost;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::schema;
use crate::{Error, Result};

/// Durable set of matched posts keyed by URI.
///
/// Implementations must tolerate concurrent callers.
pub trait PostStore: Send + Sync {
    /// Delete every post whose URI is in `uris`. Missing URIs are not an error.
    fn remove_by_uri(&self, uris: &[String]) -> Result<()>;

    /// Insert posts, skipping any whose URI is already stored.
    fn insert_ignoring_conflicts(&self, posts: &[MatchedPost]) -> Result<()>;
}

/// Durable single-value store for the last checkpointed sequence number.
pub trait CursorStore: Send + Sync {
    /// Read the checkpointed cursor, `None` on a fresh database.
    fn get_cursor(&self) -> Result<Option<u64>>;

    /// Record a checkpoint. Lower values than the stored one are ignored.
    fn set_cursor(&self, seq: u64) -> Result<()>;
}

/// Format used for `post.indexed_at`. Fixed width, so text order is time order.
pub fn format_indexed_at(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SQLite-backed post and cursor store.
pub struct SqliteStore {
    /// SQLite connection (protected by mutex for thread safety).
    conn: Mutex<Connection>,
    /// Key for this store's row in `sub_state`.
    service: String,
    /// Database path (`:memory:` for in-memory stores).
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the feed database at `path`.
    ///
    /// `service` identifies the upstream the cursor belongs to, so one
    /// database can track several firehoses.
    pub fn open<P: AsRef<Path>>(path: P, service: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL lets the serve process read while we write
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)?;

        tracing::info!("Feed database opened at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            service: service.into(),
            path: path.to_path_buf(),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory(service: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            service: service.into(),
            path: PathBuf::from(":memory:"),
        })
    }

    /// The service key used for the cursor row.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored posts.
    pub fn post_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM post", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Look up a stored post by URI.
    pub fn get_post(&self, uri: &str) -> Result<Option<MatchedPost>> {
        let conn = self.conn.lock();
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT uri, cid, indexed_at FROM post WHERE uri = ?",
                [uri],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((uri, cid, indexed_at)) = row else {
            return Ok(None);
        };

        let indexed_at = DateTime::parse_from_rfc3339(&indexed_at)
            .map_err(|e| Error::Database(format!("Bad indexed_at for {}: {}", uri, e)))?
            .with_timezone(&Utc);

        Ok(Some(MatchedPost {
            uri,
            cid,
            indexed_at,
        }))
    }

    fn unix_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl PostStore for SqliteStore {
    fn remove_by_uri(&self, uris: &[String]) -> Result<()> {
        if uris.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; uris.len()].join(", ");
        let sql = format!("DELETE FROM post WHERE uri IN ({placeholders})");

        let conn = self.conn.lock();
        let removed = conn.execute(&sql, params_from_iter(uris.iter()))?;
        tracing::debug!("Removed {} of {} posts", removed, uris.len());

        Ok(())
    }

    fn insert_ignoring_conflicts(&self, posts: &[MatchedPost]) -> Result<()> {
        if posts.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO post (uri, cid, indexed_at) VALUES (?, ?, ?)
                 ON CONFLICT(uri) DO NOTHING",
            )?;
            for post in posts {
                stmt.execute(params![post.uri, post.cid, format_indexed_at(&post.indexed_at)])?;
            }
        }
        tx.commit()?;

        Ok(())
    }
}

impl CursorStore for SqliteStore {
    fn get_cursor(&self) -> Result<Option<u64>> {
        let conn = self.conn.lock();
        let cursor: Option<i64> = conn
            .query_row(
                "SELECT cursor FROM sub_state WHERE service = ?",
                [&self.service],
                |row| row.get(0),
            )
            .optional()?;

        Ok(cursor.map(|c| c as u64))
    }

    fn set_cursor(&self, seq: u64) -> Result<()> {
        let now = Self::unix_now();
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO sub_state (service, cursor, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(service) DO UPDATE SET
                cursor = MAX(cursor, excluded.cursor),
                updated_at = excluded.updated_at",
            params![self.service, seq as i64, now],
        )
        .map_err(|e| Error::Database(format!("Failed to update cursor: {}", e)))?;

        Ok(())
    }
}
