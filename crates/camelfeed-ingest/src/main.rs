//! camelfeed ingestion daemon.
//!
//! Consumes the repository-commit firehose, keeps posts that mention the
//! topic keyword or emoji within the recency window, and writes them to the
//! feed database shared with `camelfeed-serve`.
//!
//! # Usage
//!
//! ```bash
//! # Live JSON firehose with default topic (ocaml / 🐫 / 48h)
//! camelfeed-ingest --firehose-url wss://firehose.example/subscribe
//!
//! # Custom database
//! FIREHOSE_URL=wss://firehose.example/subscribe \
//!     camelfeed-ingest --db-path /var/lib/camelfeed/feed.db
//!
//! # Replay a recorded stream
//! camelfeed-ingest --replay-file ./firehose.jsonl
//! ```
//!
//! # Graceful Shutdown
//!
//! On SIGINT (Ctrl+C) or SIGTERM the daemon:
//! 1. Stops pulling from the firehose (including a pending reconnect wait)
//! 2. Drains queued persistence batches
//! 3. Exits cleanly

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camelfeed_core::metrics::{init_metrics, start_metrics_server};
use camelfeed_ingest::source::WebSocketConfig;
use camelfeed_ingest::{
    Classifier, ConsumerConfig, CursorStore, DispatchConfig, Dispatcher, EventSource, JsonlConfig,
    JsonlSource, ReconnectConfig, RunSummary, SqliteStore, StreamConsumer, TopicFilter,
    WebSocketSource,
};
use clap::Parser;
use metrics::gauge;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Upper bound for `--window-hours` (one year).
const MAX_WINDOW_HOURS: i64 = 24 * 366;

/// camelfeed ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "camelfeed-ingest")]
#[command(about = "Firehose consumer for the camelfeed topic feed")]
#[command(version)]
struct Args {
    /// Firehose subscription endpoint emitting JSON commit frames
    #[arg(long, env = "FIREHOSE_URL", required_unless_present = "replay_file")]
    firehose_url: Option<String>,

    /// Replay frames from a JSONL file instead of the live firehose
    #[arg(long)]
    replay_file: Option<PathBuf>,

    /// SQLite feed database path
    #[arg(long, env = "CAMELFEED_DB_PATH", default_value = "./data/feed.db")]
    db_path: PathBuf,

    /// Topic keyword (matched case-insensitively)
    #[arg(long, default_value = "ocaml")]
    keyword: String,

    /// Topic emoji marker
    #[arg(long, default_value = "🐫")]
    emoji: String,

    /// Only keep posts created within this many hours
    #[arg(long, default_value = "48", value_parser = clap::value_parser!(i64).range(1..=MAX_WINDOW_HOURS))]
    window_hours: i64,

    /// Delay before reconnecting after a stream failure (ms)
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value = "3000")]
    reconnect_delay_ms: u64,

    /// Cap for the reconnect delay when backoff is enabled (ms)
    #[arg(long, default_value = "60000")]
    reconnect_max_delay_ms: u64,

    /// Grow the reconnect delay exponentially (with jitter)
    #[arg(long)]
    reconnect_backoff: bool,

    /// Give up after this many consecutive reconnect attempts (default: never)
    #[arg(long)]
    max_reconnects: Option<u32>,

    /// Number of persistence worker threads
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Queued batches per worker before intake waits
    #[arg(long, default_value = "1024")]
    queue_capacity: usize,

    /// Checkpoint the cursor on every seq divisible by this
    #[arg(long, default_value = "20")]
    checkpoint_interval: u64,

    /// Log progress on every seq divisible by this
    #[arg(long, default_value = "100")]
    report_interval: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

impl Args {
    fn topic_filter(&self) -> Result<TopicFilter> {
        let window = chrono::Duration::try_hours(self.window_hours)
            .filter(|window| *window > chrono::Duration::zero())
            .ok_or_else(|| anyhow::anyhow!("invalid --window-hours {}", self.window_hours))?;

        Ok(TopicFilter::new(
            self.keyword.clone(),
            self.emoji.clone(),
            window,
        ))
    }

    fn reconnect_config(&self) -> ReconnectConfig {
        let delay = Duration::from_millis(self.reconnect_delay_ms);
        let config = if self.reconnect_backoff {
            ReconnectConfig::exponential(delay, Duration::from_millis(self.reconnect_max_delay_ms))
        } else {
            ReconnectConfig::fixed(delay)
        };

        match self.max_reconnects {
            Some(max) => config.with_max_retries(max),
            None => config,
        }
    }

    fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            checkpoint_interval: self.checkpoint_interval,
            report_interval: self.report_interval,
            reconnect: self.reconnect_config(),
        }
    }

    fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("camelfeed_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    tracing::info!("camelfeed ingestion daemon starting...");

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
        gauge!("ingestion_running").set(1.0);
    }

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        shutdown_tx.send_replace(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    let filter = args.topic_filter()?;
    tracing::info!("Configuration:");
    tracing::info!("  Database: {}", args.db_path.display());
    tracing::info!("  Keyword: {}", filter.keyword());
    tracing::info!("  Emoji: {}", filter.emoji());
    tracing::info!("  Window: {}h", filter.window().num_hours());
    tracing::info!("  Workers: {}", args.workers);
    tracing::info!(
        "  Checkpoint / report interval: {} / {}",
        args.checkpoint_interval,
        args.report_interval
    );

    let summary = match (&args.replay_file, &args.firehose_url) {
        (Some(path), _) => {
            tracing::info!("  Source: replay {}", path.display());
            let source = JsonlSource::new(JsonlConfig::new(path));
            run(source, &args, filter, shutdown_rx).await?
        }
        (None, Some(url)) => {
            tracing::info!("  Source: {}", url);
            let source = WebSocketSource::new(WebSocketConfig::new(url.as_str()));
            run(source, &args, filter, shutdown_rx).await?
        }
        (None, None) => anyhow::bail!("either --firehose-url or --replay-file is required"),
    };

    gauge!("ingestion_running").set(0.0);

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Events received:      {}", summary.stats.total_events);
    tracing::info!("Matching posts:       {}", summary.stats.matching_posts);
    tracing::info!("Batches applied:      {}", summary.dispatch.batches_applied);
    tracing::info!("Batches failed:       {}", summary.dispatch.batches_failed);
    tracing::info!("Stream failures:      {}", summary.stream_failures);
    tracing::info!(
        "Last checkpoint:      {}",
        summary
            .last_checkpoint
            .map_or_else(|| "none".to_string(), |seq| seq.to_string())
    );

    Ok(())
}

/// Open the store, start the dispatcher, and drive `source` to completion.
async fn run<S: EventSource>(
    source: S,
    args: &Args,
    filter: TopicFilter,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let store = Arc::new(
        SqliteStore::open(&args.db_path, source.name())
            .with_context(|| format!("Failed to open feed database at {:?}", args.db_path))?,
    );

    match store.get_cursor().context("Failed to read cursor")? {
        Some(seq) => tracing::info!("Resuming from cursor {}", seq),
        None => tracing::info!("No cursor stored, starting from live head"),
    }

    let dispatcher = Dispatcher::start(args.dispatch_config(), store.clone())
        .context("Failed to start dispatcher")?;

    let consumer = StreamConsumer::new(
        source,
        Classifier::new(filter),
        dispatcher,
        store,
        args.consumer_config(),
    )
    .context("Invalid consumer configuration")?;

    consumer.run(shutdown).await.context("Consumer stopped")
}
