//! Application state and configuration.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::algos::AlgoRegistry;

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:3000").
    pub bind_addr: String,

    /// Path to the feed database written by `camelfeed-ingest`.
    pub db_path: PathBuf,

    /// DID of the account that publishes the feed record.
    pub publisher_did: String,

    /// DID of this feed generator service.
    pub service_did: String,

    /// Short name (record key) of the feed.
    pub feed_name: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `FEEDGEN_PUBLISHER_DID`: DID that owns the feed generator record
    /// - `FEEDGEN_SERVICE_DID` or `FEEDGEN_HOSTNAME`: service DID, or the
    ///   hostname to derive `did:web:{hostname}` from
    ///
    /// Optional environment variables:
    /// - `CAMELFEED_BIND_ADDR`: Server bind address (default: "0.0.0.0:3000")
    /// - `CAMELFEED_DB_PATH`: Feed database path (default: "./data/feed.db")
    /// - `FEEDGEN_FEED_NAME`: Feed short name (default: "ocaml")
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = var("CAMELFEED_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());

        let db_path = var("CAMELFEED_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/feed.db"));

        let publisher_did = var("FEEDGEN_PUBLISHER_DID").ok_or_else(|| {
            anyhow::anyhow!("FEEDGEN_PUBLISHER_DID environment variable is required")
        })?;

        let service_did = match (var("FEEDGEN_SERVICE_DID"), var("FEEDGEN_HOSTNAME")) {
            (Some(did), _) => did,
            (None, Some(hostname)) => format!("did:web:{hostname}"),
            (None, None) => {
                anyhow::bail!("FEEDGEN_SERVICE_DID or FEEDGEN_HOSTNAME must be set")
            }
        };

        let feed_name = var("FEEDGEN_FEED_NAME").unwrap_or_else(|| "ocaml".to_string());

        tracing::info!(
            bind_addr = %bind_addr,
            db_path = %db_path.display(),
            service_did = %service_did,
            feed_name = %feed_name,
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            db_path,
            publisher_did,
            service_did,
            feed_name,
        })
    }

    /// AT-URI of the feed generator record for `name`.
    pub fn feed_uri(&self, name: &str) -> String {
        format!(
            "at://{}/app.bsky.feed.generator/{}",
            self.publisher_did, name
        )
    }
}

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,

    /// Read-only connection to the feed database.
    pub db: Arc<Mutex<Connection>>,

    /// Feed short name to handler.
    pub algos: Arc<AlgoRegistry>,
}

impl AppState {
    /// Open the feed database read-only and build the algorithm registry.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let conn = Connection::open_with_flags(
            &config.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to open feed database {}: {}",
                config.db_path.display(),
                e
            )
        })?;

        tracing::info!("Feed database connected (read-only): {:?}", config.db_path);

        let algos = AlgoRegistry::with_topic_feed(&config.feed_name);

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(Mutex::new(conn)),
            algos: Arc::new(algos),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("FEEDGEN_PUBLISHER_DID", "did:plc:publisher"),
            ("FEEDGEN_HOSTNAME", "feed.example.com"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.db_path, PathBuf::from("./data/feed.db"));
        assert_eq!(config.service_did, "did:web:feed.example.com");
        assert_eq!(config.feed_name, "ocaml");
    }

    #[test]
    fn test_explicit_service_did_wins() {
        let config = Config::from_lookup(lookup(&[
            ("FEEDGEN_PUBLISHER_DID", "did:plc:publisher"),
            ("FEEDGEN_SERVICE_DID", "did:plc:service"),
            ("FEEDGEN_HOSTNAME", "feed.example.com"),
        ]))
        .unwrap();

        assert_eq!(config.service_did, "did:plc:service");
    }

    #[test]
    fn test_missing_publisher_did() {
        let result = Config::from_lookup(lookup(&[("FEEDGEN_HOSTNAME", "feed.example.com")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_service_identity() {
        let result = Config::from_lookup(lookup(&[("FEEDGEN_PUBLISHER_DID", "did:plc:p")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = Config::from_lookup(lookup(&[
            ("FEEDGEN_PUBLISHER_DID", "did:plc:publisher"),
            ("FEEDGEN_HOSTNAME", "feed.example.com"),
            ("FEEDGEN_FEED_NAME", "  "),
        ]))
        .unwrap();

        assert_eq!(config.feed_name, "ocaml");
    }

    #[test]
    fn test_feed_uri() {
        let config = Config::from_lookup(lookup(&[
            ("FEEDGEN_PUBLISHER_DID", "did:plc:publisher"),
            ("FEEDGEN_HOSTNAME", "feed.example.com"),
        ]))
        .unwrap();

        assert_eq!(
            config.feed_uri("ocaml"),
            "at://did:plc:publisher/app.bsky.feed.generator/ocaml"
        );
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let config = Config::from_lookup(lookup(&[
            ("FEEDGEN_PUBLISHER_DID", "did:plc:publisher"),
            ("FEEDGEN_HOSTNAME", "feed.example.com"),
            ("CAMELFEED_DB_PATH", "/nonexistent/dir/feed.db"),
        ]))
        .unwrap();

        assert!(AppState::new(config).is_err());
    }
}
