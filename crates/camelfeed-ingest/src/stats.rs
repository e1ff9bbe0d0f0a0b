//! Consumption counters.
//!
//! [`IngestStats`] is owned by the consumer loop and has exactly one writer.
//! Readers take a [`StatsSnapshot`]. Every update is mirrored into the
//! Prometheus recorder.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};

/// Point-in-time copy of the consumption counters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Frames consumed since start (commit and non-commit).
    pub total_events: u64,
    /// Posts that passed the topic filter since start.
    pub matching_posts: u64,
    /// `total_events / elapsed seconds`, recomputed on every event.
    pub events_per_second: f64,
    /// Process start time.
    pub started_at: DateTime<Utc>,
    /// Time of the most recent `record_event`.
    pub last_refresh: DateTime<Utc>,
    /// Time since start as of the last refresh.
    pub elapsed: Duration,
}

/// Running counters for one process run.
#[derive(Debug)]
pub struct IngestStats {
    total_events: u64,
    matching_posts: u64,
    events_per_second: f64,
    started: Instant,
    started_at: DateTime<Utc>,
    last_refresh: DateTime<Utc>,
    elapsed: Duration,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Counters whose clock starts at `started`.
    pub fn starting_at(started: Instant) -> Self {
        let now = Utc::now();
        Self {
            total_events: 0,
            matching_posts: 0,
            events_per_second: 0.0,
            started,
            started_at: now,
            last_refresh: now,
            elapsed: Duration::ZERO,
        }
    }

    /// Count one consumed frame and refresh the rate.
    pub fn record_event(&mut self) {
        self.record_event_at(Instant::now());
    }

    /// Count one consumed frame observed at `now`.
    pub fn record_event_at(&mut self, now: Instant) {
        self.total_events += 1;
        self.elapsed = now.saturating_duration_since(self.started);
        self.last_refresh = Utc::now();

        let secs = self.elapsed.as_secs_f64();
        self.events_per_second = if secs > 0.0 {
            self.total_events as f64 / secs
        } else {
            0.0
        };

        counter!("firehose_events_total").increment(1);
        gauge!("firehose_events_per_second").set(self.events_per_second);
    }

    /// Count matched posts.
    pub fn record_matches(&mut self, n: u64) {
        if n == 0 {
            return;
        }
        self.matching_posts += n;
        counter!("feed_matching_posts_total").increment(n);
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn matching_posts(&self) -> u64 {
        self.matching_posts
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_events: self.total_events,
            matching_posts: self.matching_posts,
            events_per_second: self.events_per_second,
            started_at: self.started_at,
            last_refresh: self.last_refresh,
            elapsed: self.elapsed,
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total events: {}, events/sec: {:.0}, matching posts: {}, running for {}s",
            self.total_events,
            self.events_per_second,
            self.matching_posts,
            self.elapsed.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stats_are_zero() {
        let stats = IngestStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.total_events, 0);
        assert_eq!(snap.matching_posts, 0);
        assert_eq!(snap.events_per_second, 0.0);
    }

    #[test]
    fn test_rate_is_total_over_elapsed() {
        let start = Instant::now();
        let mut stats = IngestStats::starting_at(start);

        for _ in 0..10 {
            stats.record_event_at(start + Duration::from_secs(2));
        }

        let snap = stats.snapshot();
        assert_eq!(snap.total_events, 10);
        assert!((snap.events_per_second - 5.0).abs() < f64::EPSILON);
        assert_eq!(snap.elapsed, Duration::from_secs(2));
    }

    #[test]
    fn test_zero_elapsed_gives_zero_rate() {
        let start = Instant::now();
        let mut stats = IngestStats::starting_at(start);
        stats.record_event_at(start);
        assert_eq!(stats.snapshot().events_per_second, 0.0);
        assert_eq!(stats.total_events(), 1);
    }

    #[test]
    fn test_counters_are_monotonic() {
        let start = Instant::now();
        let mut stats = IngestStats::starting_at(start);
        let mut last_total = 0;
        let mut last_matches = 0;

        for i in 1..=50u64 {
            stats.record_event_at(start + Duration::from_millis(i * 10));
            stats.record_matches(i % 3);

            let snap = stats.snapshot();
            assert!(snap.total_events >= last_total);
            assert!(snap.matching_posts >= last_matches);
            assert!(snap.events_per_second >= 0.0);
            last_total = snap.total_events;
            last_matches = snap.matching_posts;
        }

        assert_eq!(stats.total_events(), 50);
    }

    #[test]
    fn test_record_matches() {
        let mut stats = IngestStats::new();
        stats.record_matches(0);
        stats.record_matches(2);
        stats.record_matches(1);
        assert_eq!(stats.matching_posts(), 3);
    }

    #[test]
    fn test_snapshot_display() {
        let start = Instant::now();
        let mut stats = IngestStats::starting_at(start);
        stats.record_event_at(start + Duration::from_secs(4));
        stats.record_matches(1);

        let line = stats.snapshot().to_string();
        assert!(line.contains("total events: 1"));
        assert!(line.contains("matching posts: 1"));
        assert!(line.contains("running for 4s"));
    }
}
