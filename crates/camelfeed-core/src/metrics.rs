//! Prometheus metrics helpers for camelfeed.
//!
//! This module provides metrics recorder initialization, the `/metrics`
//! endpoint, and descriptions for every metric the ingest daemon emits.
//!
//! # Usage
//!
//! ```rust,ignore
//! use camelfeed_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("firehose_events_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`firehose_`, `feed_`, `dispatch_`, `cursor_`)
//! - Suffix: unit or type (`_total`, `_seconds`, `_per_second`)
//! - Labels: only low-cardinality ones (e.g. `op`)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds the listener up front so port conflicts surface to the caller, then
/// serves `/metrics` from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for all camelfeed metrics.
fn register_common_metrics() {
    // =========================================================================
    // Firehose consumption
    // =========================================================================

    describe_gauge!(
        "ingestion_running",
        "1 while the ingest daemon is running, 0 after shutdown"
    );
    describe_counter!(
        "firehose_events_total",
        "Total firehose frames consumed (commit and non-commit)"
    );
    describe_counter!(
        "firehose_commits_total",
        "Commit frames consumed from the firehose"
    );
    describe_gauge!(
        "firehose_events_per_second",
        "Average consumption rate since process start (events/sec)"
    );
    describe_counter!(
        "firehose_stream_failures_total",
        "Stream terminations that triggered a reconnect"
    );
    describe_counter!(
        "firehose_reconnects_total",
        "Reconnect attempts to the firehose"
    );
    describe_counter!(
        "firehose_malformed_ops_total",
        "Commit operations dropped because they could not be decoded"
    );
    describe_gauge!(
        "firehose_last_seq",
        "Sequence number of the most recently consumed frame"
    );

    // =========================================================================
    // Topic matching
    // =========================================================================

    describe_counter!(
        "feed_matching_posts_total",
        "Posts that passed the topic and time-window filter"
    );

    // =========================================================================
    // Dispatch / persistence
    // =========================================================================

    describe_counter!(
        "dispatch_batches_total",
        "Persistence batches enqueued on the dispatch workers"
    );
    describe_counter!(
        "dispatch_errors_total",
        "Persistence batches that failed (label: op)"
    );
    describe_counter!(
        "dispatch_posts_inserted_total",
        "Matched posts submitted for insert"
    );
    describe_counter!(
        "dispatch_posts_deleted_total",
        "Post URIs submitted for deletion"
    );
    describe_counter!(
        "dispatch_enqueue_errors_total",
        "Batches that could not be handed to a dispatch worker"
    );
    describe_histogram!(
        "dispatch_batch_duration_seconds",
        "Time spent applying one persistence batch"
    );

    // =========================================================================
    // Cursor
    // =========================================================================

    describe_gauge!("cursor_checkpoint_seq", "Last checkpointed sequence number");
    describe_counter!(
        "cursor_checkpoint_errors_total",
        "Cursor checkpoint writes that failed"
    );
}
