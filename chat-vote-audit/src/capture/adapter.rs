//! Per-source capture loop

use crate::capture::{ChatSource, SourceError, SourcePoll, StopSignal};
use crate::config::CaptureConfig;
use crate::formats::LogWriter;
use crate::types::{EventRecord, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How an adapter finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AdapterStatus {
    /// The source reported its end
    Completed,
    /// The operator stop signal was raised
    Interrupted,
    /// The configured time limit elapsed
    TimeLimit,
    /// Fatal source error or too many consecutive transient failures
    Stopped(String),
    /// Log could not be written, or the adapter thread panicked
    Failed(String),
}

impl AdapterStatus {
    /// Whether the capture ended without a source or write failure
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            AdapterStatus::Completed | AdapterStatus::Interrupted | AdapterStatus::TimeLimit
        )
    }
}

/// What one adapter did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSummary {
    pub tag: String,
    pub output: PathBuf,
    pub records_written: u64,
    pub batches: u64,
    pub transient_failures: u64,
    pub status: AdapterStatus,
}

impl CaptureSummary {
    pub(crate) fn failed(tag: &str, output: &Path, reason: impl Into<String>) -> Self {
        Self {
            tag: tag.to_string(),
            output: output.to_path_buf(),
            records_written: 0,
            batches: 0,
            transient_failures: 0,
            status: AdapterStatus::Failed(reason.into()),
        }
    }
}

/// Polls one source and appends what it returns to one record log
pub struct CaptureAdapter {
    source: Box<dyn ChatSource>,
    output: PathBuf,
    config: CaptureConfig,
}

impl CaptureAdapter {
    pub fn new(source: Box<dyn ChatSource>, output: impl Into<PathBuf>, config: CaptureConfig) -> Self {
        Self {
            source,
            output: output.into(),
            config,
        }
    }

    pub fn tag(&self) -> &str {
        self.source.tag()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Run until the source ends, the time limit passes, `stop` is raised or
    /// the source fails for good
    ///
    /// Every batch is committed before the next poll, so a stop never loses a
    /// batch that was already received.
    pub fn run(mut self, stop: &StopSignal) -> CaptureSummary {
        let tag = self.source.tag().to_string();
        let mut summary = CaptureSummary {
            tag: tag.clone(),
            output: self.output.clone(),
            records_written: 0,
            batches: 0,
            transient_failures: 0,
            status: AdapterStatus::Completed,
        };

        let mut writer = match LogWriter::open_append(&self.output) {
            Ok(writer) => writer,
            Err(e) => {
                log::error!("[{}] Cannot open {:?}: {}", tag, self.output, e);
                summary.status = AdapterStatus::Failed(e.to_string());
                return summary;
            }
        };

        log::info!("[{}] Capturing to {:?}", tag, self.output);
        let started = Instant::now();
        let deadline = self.config.time_limit().map(|limit| started + limit);
        let mut consecutive_failures: u32 = 0;

        summary.status = loop {
            if stop.is_stopped() {
                break AdapterStatus::Interrupted;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break AdapterStatus::TimeLimit;
            }

            let pause = match self.source.poll() {
                Ok(SourcePoll::Records(batch)) => {
                    consecutive_failures = 0;
                    if !batch.is_empty() {
                        if let Err(e) = write_batch(&mut writer, &tag, batch, &mut summary) {
                            log::error!("[{}] Write failed: {}", tag, e);
                            break AdapterStatus::Failed(e.to_string());
                        }
                    }
                    self.config.poll_interval()
                }
                Ok(SourcePoll::Ended) => {
                    log::info!("[{}] Source ended", tag);
                    break AdapterStatus::Completed;
                }
                Err(SourceError::Fatal(reason)) => {
                    log::error!("[{}] Fatal source error: {}", tag, reason);
                    break AdapterStatus::Stopped(reason);
                }
                Err(SourceError::Transient(reason)) => {
                    consecutive_failures += 1;
                    summary.transient_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        log::error!(
                            "[{}] Giving up after {} consecutive failures: {}",
                            tag,
                            consecutive_failures,
                            reason
                        );
                        break AdapterStatus::Stopped(format!(
                            "{} consecutive failures, last: {}",
                            consecutive_failures, reason
                        ));
                    }
                    let delay = self.config.backoff.delay_for_attempt(consecutive_failures);
                    log::warn!(
                        "[{}] Transient failure {}/{}: {} (retrying in {:?})",
                        tag,
                        consecutive_failures,
                        self.config.max_consecutive_failures,
                        reason,
                        delay
                    );
                    delay
                }
            };

            let pause = match deadline {
                Some(d) => pause.min(d.saturating_duration_since(Instant::now())),
                None => pause,
            };
            if pause > Duration::ZERO {
                stop.sleep(pause);
            }
        };

        if let Err(e) = writer.commit() {
            log::error!("[{}] Final flush failed: {}", tag, e);
            if summary.status.is_clean() {
                summary.status = AdapterStatus::Failed(e.to_string());
            }
        }

        log::info!(
            "[{}] Capture finished ({:?}): {} records in {} batches, {} transient failures",
            tag,
            summary.status,
            summary.records_written,
            summary.batches,
            summary.transient_failures
        );
        summary
    }
}

fn write_batch(
    writer: &mut LogWriter,
    tag: &str,
    batch: Vec<EventRecord>,
    summary: &mut CaptureSummary,
) -> Result<()> {
    let count = batch.len() as u64;
    for mut record in batch {
        if record.sources.is_empty() {
            record.sources.push(tag.to_string());
        }
        writer.append(&record)?;
    }
    writer.commit()?;
    summary.records_written += count;
    summary.batches += 1;
    log::debug!("[{}] Committed batch of {} records", tag, count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::formats::read_log;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    struct Scripted {
        tag: String,
        script: VecDeque<std::result::Result<SourcePoll, SourceError>>,
    }

    impl Scripted {
        fn new(tag: &str, script: Vec<std::result::Result<SourcePoll, SourceError>>) -> Self {
            Self {
                tag: tag.to_string(),
                script: script.into(),
            }
        }
    }

    impl ChatSource for Scripted {
        fn tag(&self) -> &str {
            &self.tag
        }

        fn poll(&mut self) -> std::result::Result<SourcePoll, SourceError> {
            self.script.pop_front().unwrap_or(Ok(SourcePoll::Ended))
        }
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig::new()
            .with_poll_interval(Duration::from_millis(1))
            .with_backoff(BackoffConfig {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                multiplier: 2.0,
            })
    }

    fn record(author: &str, ts: f64, text: &str) -> EventRecord {
        let mut record = EventRecord::new(author, author, ts, text, "x");
        record.sources.clear();
        record
    }

    #[test]
    fn test_batches_committed_and_tagged() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("a.jsonl");
        let source = Scripted::new(
            "a",
            vec![
                Ok(SourcePoll::Records(vec![record("u1", 1.0, "1"), record("u2", 2.0, "2")])),
                Ok(SourcePoll::Records(vec![])),
                Err(SourceError::Transient("timeout".to_string())),
                Ok(SourcePoll::Records(vec![record("u3", 3.0, "3")])),
            ],
        );

        let summary = CaptureAdapter::new(Box::new(source), &output, fast_config()).run(&StopSignal::new());
        assert_eq!(summary.status, AdapterStatus::Completed);
        assert_eq!(summary.records_written, 3);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.transient_failures, 1);

        let load = read_log(&output).unwrap();
        assert_eq!(load.records.len(), 3);
        assert!(load.records.iter().all(|r| r.sources == vec!["a".to_string()]));
    }

    #[test]
    fn test_degrades_after_consecutive_failures() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("b.jsonl");
        let script = (0..5)
            .map(|_| Err(SourceError::Transient("refused".to_string())))
            .collect();
        let config = fast_config().with_max_consecutive_failures(3);

        let summary = CaptureAdapter::new(Box::new(Scripted::new("b", script)), &output, config)
            .run(&StopSignal::new());
        assert!(matches!(summary.status, AdapterStatus::Stopped(_)));
        assert_eq!(summary.transient_failures, 3);
    }

    #[test]
    fn test_fatal_error_stops_adapter() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("c.jsonl");
        let source = Scripted::new(
            "c",
            vec![
                Ok(SourcePoll::Records(vec![record("u1", 1.0, "1")])),
                Err(SourceError::Fatal("stream deleted".to_string())),
            ],
        );

        let summary = CaptureAdapter::new(Box::new(source), &output, fast_config()).run(&StopSignal::new());
        assert_eq!(summary.status, AdapterStatus::Stopped("stream deleted".to_string()));
        assert_eq!(read_log(&output).unwrap().records.len(), 1);
    }

    #[test]
    fn test_pre_raised_stop_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("d.jsonl");
        let source = Scripted::new("d", vec![Ok(SourcePoll::Records(vec![record("u1", 1.0, "1")]))]);
        let stop = StopSignal::new();
        stop.stop();

        let summary = CaptureAdapter::new(Box::new(source), &output, fast_config()).run(&stop);
        assert_eq!(summary.status, AdapterStatus::Interrupted);
        assert_eq!(summary.records_written, 0);
    }
}
