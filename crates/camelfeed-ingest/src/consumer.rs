//! Stream consumer loop.
//!
//! [`StreamConsumer`] owns the connection lifecycle:
//!
//! ```text
//! Connecting → Streaming → (event) Streaming
//!                  ↓ (stream error / end of stream)
//!            ReconnectWait → Connecting
//! ```
//!
//! For each frame it updates [`IngestStats`]. For each commit it classifies
//! the operations inline, hands the resulting writes to the [`Dispatcher`]
//! without waiting for them to land, checkpoints the cursor when
//! `seq % checkpoint_interval == 0`, and logs a progress line when
//! `seq % report_interval == 0`.
//!
//! The loop runs until shutdown is signalled, a finite source is exhausted,
//! or the reconnect policy gives up.

use std::sync::Arc;

use camelfeed_core::{CommitEvent, FirehoseEvent};
use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::watch;

use crate::classify::Classifier;
use crate::pipeline::{CursorStore, DispatchStats, Dispatcher, PersistBatch};
use crate::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::source::EventSource;
use crate::stats::{IngestStats, StatsSnapshot};
use crate::{Error, Result};

/// Default checkpoint cadence, in sequence numbers.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 20;

/// Default progress-report cadence, in sequence numbers.
pub const DEFAULT_REPORT_INTERVAL: u64 = 100;

/// Consumer loop settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Checkpoint commits whose `seq` is a multiple of this.
    pub checkpoint_interval: u64,
    /// Log progress on commits whose `seq` is a multiple of this.
    pub report_interval: u64,
    /// Reconnect behavior after a stream failure.
    pub reconnect: ReconnectConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Lifecycle state of the consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Streaming,
    ReconnectWait,
    Stopped,
}

/// Final counters returned when the loop stops.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: StatsSnapshot,
    pub dispatch: DispatchStats,
    /// Last cursor written by this run.
    pub last_checkpoint: Option<u64>,
    /// Stream failures seen by this run.
    pub stream_failures: u64,
}

/// How one connection ended.
enum StreamEnd {
    Shutdown,
    Exhausted,
    Failed(Error),
}

/// Orchestrates source, classifier, dispatcher, and cursor store.
pub struct StreamConsumer<S: EventSource> {
    source: S,
    classifier: Classifier,
    dispatcher: Dispatcher,
    cursor_store: Arc<dyn CursorStore>,
    config: ConsumerConfig,
    policy: ReconnectPolicy,
    stats: IngestStats,
    state: ConsumerState,
    last_checkpoint: Option<u64>,
    stream_failures: u64,
}

impl<S: EventSource> StreamConsumer<S> {
    pub fn new(
        source: S,
        classifier: Classifier,
        dispatcher: Dispatcher,
        cursor_store: Arc<dyn CursorStore>,
        config: ConsumerConfig,
    ) -> Result<Self> {
        if config.checkpoint_interval == 0 {
            return Err(Error::Config("checkpoint interval must be > 0".into()));
        }
        if config.report_interval == 0 {
            return Err(Error::Config("report interval must be > 0".into()));
        }

        let policy = ReconnectPolicy::new(config.reconnect.clone());

        Ok(Self {
            source,
            classifier,
            dispatcher,
            cursor_store,
            config,
            policy,
            stats: IngestStats::new(),
            state: ConsumerState::Connecting,
            last_checkpoint: None,
            stream_failures: 0,
        })
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run until shutdown, source exhaustion, or retry exhaustion.
    ///
    /// On every exit path the dispatcher is closed and drained first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        tracing::info!("Starting consumer on {}", self.source.name());

        let outcome = loop {
            self.state = ConsumerState::Connecting;

            let failure = match self.stream(&mut shutdown).await {
                StreamEnd::Shutdown => {
                    tracing::info!("Shutdown requested, stopping consumer");
                    break Ok(());
                }
                StreamEnd::Exhausted => {
                    tracing::info!("Source {} exhausted", self.source.name());
                    break Ok(());
                }
                StreamEnd::Failed(e) => e,
            };

            self.state = ConsumerState::ReconnectWait;
            self.stream_failures += 1;
            counter!("firehose_stream_failures_total").increment(1);
            tracing::error!("Stream failed: {}", failure);

            let Some(delay) = self.policy.next_delay() else {
                break Err(Error::RetriesExhausted {
                    attempts: self.policy.attempt(),
                });
            };
            let delay = self
                .source
                .reconnect_hint()
                .map_or(delay, |hint| hint.max(delay));

            tracing::info!(
                "Reconnecting in {:?} (attempt {})",
                delay,
                self.policy.attempt()
            );

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    tracing::info!("Shutdown requested during reconnect wait");
                    break Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            counter!("firehose_reconnects_total").increment(1);
        };

        self.state = ConsumerState::Stopped;
        let summary = self.finish().await;
        outcome.map(|()| summary)
    }

    /// One connection: connect, then pull frames until the stream ends.
    async fn stream(&mut self, shutdown: &mut watch::Receiver<bool>) -> StreamEnd {
        let cursor = match self.cursor_store.get_cursor() {
            Ok(cursor) => cursor,
            Err(e) => return StreamEnd::Failed(e),
        };

        let connected = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => return StreamEnd::Shutdown,
            result = self.source.connect(cursor) => result,
        };
        if let Err(e) = connected {
            return StreamEnd::Failed(e);
        }

        self.state = ConsumerState::Streaming;

        loop {
            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return StreamEnd::Shutdown,
                result = self.source.next_event() => result,
            };

            match next {
                Ok(Some(event)) => {
                    self.policy.reset();
                    self.handle_event(event).await;
                }
                Ok(None) if self.source.is_finite() => return StreamEnd::Exhausted,
                Ok(None) => return StreamEnd::Failed(Error::StreamClosed),
                Err(e) => return StreamEnd::Failed(e),
            }
        }
    }

    async fn handle_event(&mut self, event: FirehoseEvent) {
        self.stats.record_event();
        gauge!("firehose_last_seq").set(event.seq() as f64);

        let FirehoseEvent::Commit(commit) = event else {
            return;
        };
        counter!("firehose_commits_total").increment(1);

        self.handle_commit(commit).await
    }

    /// Classify, hand off writes, then checkpoint and report. Nothing here
    /// ends the stream: a batch that cannot be enqueued is logged and counted
    /// like any other persistence failure.
    async fn handle_commit(&mut self, commit: CommitEvent) {
        let seq = commit.seq;
        let classification = self.classifier.classify(&commit, Utc::now());
        self.stats.record_matches(classification.creates.len() as u64);

        if !classification.is_empty() {
            let batch = PersistBatch {
                seq,
                repo: commit.repo,
                deletes: classification.deletes,
                creates: classification.creates,
            };
            if let Err(e) = self.dispatcher.dispatch(batch).await {
                counter!("dispatch_enqueue_errors_total").increment(1);
                tracing::error!(seq, "could not handle message: {}", e);
            }
        }

        if seq % self.config.checkpoint_interval == 0 {
            self.checkpoint(seq);
        }

        if seq % self.config.report_interval == 0 {
            tracing::info!("{}", self.stats.snapshot());
        }
    }

    /// Write the cursor. A failed write is logged and counted; the next
    /// checkpoint supersedes it.
    fn checkpoint(&mut self, seq: u64) {
        match self.cursor_store.set_cursor(seq) {
            Ok(()) => {
                self.last_checkpoint = Some(seq);
                gauge!("cursor_checkpoint_seq").set(seq as f64);
                tracing::debug!("Checkpointed cursor at {}", seq);
            }
            Err(e) => {
                counter!("cursor_checkpoint_errors_total").increment(1);
                tracing::error!("Failed to checkpoint cursor at {}: {}", seq, e);
            }
        }
    }

    async fn finish(self) -> RunSummary {
        let Self {
            dispatcher,
            stats,
            last_checkpoint,
            stream_failures,
            ..
        } = self;

        let dispatch = match tokio::task::spawn_blocking(move || dispatcher.shutdown()).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("Dispatcher shutdown failed: {}", e);
                DispatchStats::default()
            }
        };

        let stats = stats.snapshot();
        tracing::info!("Consumer stopped: {}", stats);

        RunSummary {
            stats,
            dispatch,
            last_checkpoint,
            stream_failures,
        }
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let signalled = rx.wait_for(|stop| *stop).await.map(|_| ());
    if signalled.is_err() {
        std::future::pending::<()>().await;
    }
}
