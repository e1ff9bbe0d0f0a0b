//! JSONL replay source.
//!
//! Replays recorded firehose frames from a file, one JSON frame per line.
//! Connecting with a cursor skips every frame with `seq <= cursor`, which is
//! how a live subscription resumes. Reaching end of file ends the run.

use std::path::PathBuf;

use camelfeed_core::{FirehoseEvent, decode_frame_str};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::EventSource;
use crate::{Error, Result};

/// Configuration for the JSONL source.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Input file path.
    pub input: PathBuf,

    /// Log and skip undecodable lines instead of failing the stream.
    pub continue_on_error: bool,
}

impl JsonlConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            continue_on_error: true,
        }
    }
}

/// Recorded firehose replay.
pub struct JsonlSource {
    config: JsonlConfig,
    name: String,
    lines: Option<Lines<BufReader<File>>>,
    cursor: Option<u64>,
    line_num: usize,
    skipped_lines: usize,
}

impl JsonlSource {
    pub fn new(config: JsonlConfig) -> Self {
        let name = format!("jsonl:{}", config.input.display());
        Self {
            config,
            name,
            lines: None,
            cursor: None,
            line_num: 0,
            skipped_lines: 0,
        }
    }

    pub fn config(&self) -> &JsonlConfig {
        &self.config
    }

    /// Lines skipped as undecodable since the last connect.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}

impl EventSource for JsonlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self, cursor: Option<u64>) -> Result<()> {
        let file = File::open(&self.config.input).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open {}: {}", self.config.input.display(), e),
            ))
        })?;

        tracing::info!(
            "Replaying {} from cursor {:?}",
            self.config.input.display(),
            cursor
        );

        self.lines = Some(BufReader::new(file).lines());
        self.cursor = cursor;
        self.line_num = 0;
        self.skipped_lines = 0;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<FirehoseEvent>> {
        let lines = self.lines.as_mut().ok_or(Error::NotConnected)?;

        while let Some(line) = lines.next_line().await? {
            self.line_num += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event = match decode_frame_str(line) {
                Ok(event) => event,
                Err(e) if self.config.continue_on_error => {
                    tracing::warn!("Skipping line {}: {}", self.line_num, e);
                    self.skipped_lines += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if self.cursor.is_some_and(|cursor| event.seq() <= cursor) {
                continue;
            }

            return Ok(Some(event));
        }

        self.lines = None;
        Ok(None)
    }

    fn is_finite(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn commit_line(seq: u64) -> String {
        format!(
            r#"{{"kind":"commit","seq":{seq},"repo":"did:plc:a","ops":[{{"action":"create","path":"app.bsky.feed.post/{seq}","cid":"c{seq}","record":{{"text":"hi","createdAt":"2024-01-01T00:00:00Z"}}}}]}}"#
        )
    }

    fn write_lines(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    async fn drain(source: &mut JsonlSource) -> Vec<u64> {
        let mut seqs = Vec::new();
        while let Some(event) = source.next_event().await.unwrap() {
            seqs.push(event.seq());
        }
        seqs
    }

    #[tokio::test]
    async fn test_replays_all_frames() {
        let file = write_lines(&[commit_line(1), String::new(), commit_line(2)]);
        let mut source = JsonlSource::new(JsonlConfig::new(file.path()));

        source.connect(None).await.unwrap();
        assert_eq!(drain(&mut source).await, vec![1, 2]);
        assert!(source.is_finite());
    }

    #[tokio::test]
    async fn test_resume_skips_seen_frames() {
        let lines: Vec<String> = (1..=5).map(commit_line).collect();
        let file = write_lines(&lines);
        let mut source = JsonlSource::new(JsonlConfig::new(file.path()));

        source.connect(Some(3)).await.unwrap();
        assert_eq!(drain(&mut source).await, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_non_commit_frames_pass_through() {
        let file = write_lines(&[
            r#"{"kind":"identity","seq":7}"#.to_string(),
            commit_line(8),
        ]);
        let mut source = JsonlSource::new(JsonlConfig::new(file.path()));

        source.connect(None).await.unwrap();
        let first = source.next_event().await.unwrap().unwrap();
        assert!(first.as_commit().is_none());
        assert_eq!(first.seq(), 7);
    }

    #[tokio::test]
    async fn test_bad_lines_skipped_by_default() {
        let file = write_lines(&[commit_line(1), "not json".to_string(), commit_line(2)]);
        let mut source = JsonlSource::new(JsonlConfig::new(file.path()));

        source.connect(None).await.unwrap();
        assert_eq!(drain(&mut source).await, vec![1, 2]);
        assert_eq!(source.skipped_lines(), 1);
    }

    #[tokio::test]
    async fn test_bad_line_fails_when_strict() {
        let file = write_lines(&["not json".to_string()]);
        let mut source = JsonlSource::new(JsonlConfig {
            input: file.path().to_path_buf(),
            continue_on_error: false,
        });

        source.connect(None).await.unwrap();
        assert!(matches!(
            source.next_event().await,
            Err(Error::Frame(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let mut source = JsonlSource::new(JsonlConfig::new("/nonexistent/firehose.jsonl"));
        assert!(matches!(source.connect(None).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_next_event_before_connect() {
        let mut source = JsonlSource::new(JsonlConfig::new("/tmp/unused.jsonl"));
        assert!(matches!(source.next_event().await, Err(Error::NotConnected)));
    }
}
