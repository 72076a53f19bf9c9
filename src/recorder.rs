//! Append-only result log.
//!
//! The recorder is owned by the outcome collector task, so entries are
//! appended one at a time and never interleave. Each entry is formatted in
//! full and written with a single `write_all`. File output is buffered and
//! flushed when the summary is written.

use serde_json::json;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::errors::ErrorCategory;
use crate::outcome::Outcome;
use crate::summary::RunSummary;

/// Errors raised by the result log.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to create results directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create result log {path:?}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write result log entry: {0}")]
    Write(#[from] io::Error),

    #[error("Failed to serialize result log entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receives every outcome of a run, then the summary exactly once.
pub trait OutcomeSink: Send + 'static {
    fn record(&mut self, outcome: &Outcome) -> Result<(), RecorderError>;

    fn finalize(&mut self, summary: &RunSummary) -> Result<(), RecorderError>;
}

/// Which outcomes get a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPolicy {
    All,
    /// Transport failures and non-2xx responses only.
    FailuresOnly,
}

impl LogPolicy {
    pub fn from_log_all(log_all: bool) -> Self {
        if log_all {
            LogPolicy::All
        } else {
            LogPolicy::FailuresOnly
        }
    }

    pub fn should_record(&self, outcome: &Outcome) -> bool {
        match self {
            LogPolicy::All => true,
            LogPolicy::FailuresOnly => outcome.is_failure(),
        }
    }

    /// Whether a response with this status will ever have its body logged.
    pub fn keeps_body(&self, status: u16) -> bool {
        match self {
            LogPolicy::All => true,
            LogPolicy::FailuresOnly => ErrorCategory::from_status_code(status).is_some(),
        }
    }
}

/// Entry layout of the result log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable blocks separated by a blank line.
    Text,
    /// One JSON object per line.
    Jsonl,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(LogFormat::Text),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            other => Err(format!("Unknown results format '{}'. Use text or jsonl.", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Jsonl => "jsonl",
        })
    }
}

/// Formats one outcome as a text block.
pub fn format_text_entry(outcome: &Outcome) -> Result<String, serde_json::Error> {
    Ok(format!(
        "Request {}\nStatus: {}\nResponse time: {}ms\nResponse body: {}\n\n",
        outcome.sequence_number,
        outcome.status,
        outcome.elapsed_ms,
        serde_json::to_string(&outcome.body)?
    ))
}

/// Writes outcomes and the summary to any writer, usually a buffered file.
pub struct OutcomeRecorder<W: Write + Send + 'static = BufWriter<File>> {
    writer: W,
    policy: LogPolicy,
    format: LogFormat,
    recorded: u64,
    finalized: bool,
}

impl OutcomeRecorder<BufWriter<File>> {
    /// Creates (or truncates) the log at `path`, creating parent directories.
    pub fn create(path: &Path, policy: LogPolicy, format: LogFormat) -> Result<Self, RecorderError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| RecorderError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(path).map_err(|source| RecorderError::CreateFile {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = ?path, policy = ?policy, format = %format, "Result log created");
        Ok(Self::new(BufWriter::new(file), policy, format))
    }
}

impl<W: Write + Send + 'static> OutcomeRecorder<W> {
    pub fn new(writer: W, policy: LogPolicy, format: LogFormat) -> Self {
        Self {
            writer,
            policy,
            format,
            recorded: 0,
            finalized: false,
        }
    }

    /// Number of outcome entries written so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn append(&mut self, entry: &str) -> Result<(), RecorderError> {
        self.writer.write_all(entry.as_bytes())?;
        Ok(())
    }
}

impl<W: Write + Send + 'static> OutcomeSink for OutcomeRecorder<W> {
    fn record(&mut self, outcome: &Outcome) -> Result<(), RecorderError> {
        if !self.policy.should_record(outcome) {
            return Ok(());
        }

        let entry = match self.format {
            LogFormat::Text => format_text_entry(outcome)?,
            LogFormat::Jsonl => {
                let mut line = serde_json::to_string(outcome)?;
                line.push('\n');
                line
            }
        };
        self.append(&entry)?;
        self.recorded += 1;
        Ok(())
    }

    fn finalize(&mut self, summary: &RunSummary) -> Result<(), RecorderError> {
        if self.finalized {
            debug!("Result log already finalized, ignoring");
            return Ok(());
        }
        self.finalized = true;

        let entry = match self.format {
            LogFormat::Text => format!("{}\n", summary.summary_line()),
            LogFormat::Jsonl => {
                let line = json!({
                    "summary": {
                        "total_sent": summary.sent,
                        "completed": summary.completed,
                        "message": summary.summary_line(),
                    }
                });
                format!("{}\n", line)
            }
        };
        self.append(&entry)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeStatus;
    use crate::summary::RunStats;
    use serde_json::Value;
    use tokio::time::Duration;

    fn ok(seq: u64, code: u16) -> Outcome {
        Outcome {
            sequence_number: seq,
            status: OutcomeStatus::Success { code },
            body: json!({"ok": true}),
            elapsed_ms: 12,
        }
    }

    fn refused(seq: u64) -> Outcome {
        Outcome {
            sequence_number: seq,
            status: OutcomeStatus::Failure {
                code: None,
                category: ErrorCategory::NetworkError,
            },
            body: Value::String("connection refused".into()),
            elapsed_ms: 3,
        }
    }

    fn summary(sent: u64, completed: u64) -> RunSummary {
        RunStats::new().into_summary(sent, sent, completed, Duration::ZERO, false)
    }

    fn text(recorder: OutcomeRecorder<Vec<u8>>) -> String {
        String::from_utf8(recorder.into_inner()).unwrap()
    }

    #[test]
    fn text_entry_layout() {
        let entry = format_text_entry(&refused(4)).unwrap();

        assert_eq!(
            entry,
            "Request 4\nStatus: Unknown error\nResponse time: 3ms\nResponse body: \"connection refused\"\n\n"
        );
    }

    #[test]
    fn failures_only_skips_2xx_but_keeps_non_2xx() {
        let mut recorder = OutcomeRecorder::new(Vec::<u8>::new(), LogPolicy::FailuresOnly, LogFormat::Text);

        recorder.record(&ok(1, 200)).unwrap();
        recorder.record(&ok(2, 404)).unwrap();
        recorder.record(&refused(3)).unwrap();

        assert_eq!(recorder.recorded(), 2);
        let log = text(recorder);
        assert!(!log.contains("Request 1\n"));
        assert!(log.contains("Request 2\nStatus: 404\n"));
        assert!(log.contains("Request 3\nStatus: Unknown error\n"));
    }

    #[test]
    fn log_all_records_successes() {
        let mut recorder = OutcomeRecorder::new(Vec::<u8>::new(), LogPolicy::from_log_all(true), LogFormat::Text);

        recorder.record(&ok(1, 200)).unwrap();

        assert_eq!(
            text(recorder),
            "Request 1\nStatus: 200\nResponse time: 12ms\nResponse body: {\"ok\":true}\n\n"
        );
    }

    #[test]
    fn finalize_appends_summary_once() {
        let mut recorder = OutcomeRecorder::new(Vec::<u8>::new(), LogPolicy::All, LogFormat::Text);

        recorder.record(&ok(1, 200)).unwrap();
        recorder.finalize(&summary(1, 1)).unwrap();
        recorder.finalize(&summary(1, 1)).unwrap();

        let log = text(recorder);
        assert_eq!(log.matches("Test completed.").count(), 1);
        assert!(log.ends_with("Test completed. Total sent: 1, Completed: 1.\n"));
    }

    #[test]
    fn jsonl_entries_are_one_object_per_line() {
        let mut recorder = OutcomeRecorder::new(Vec::<u8>::new(), LogPolicy::All, LogFormat::Jsonl);

        recorder.record(&ok(1, 200)).unwrap();
        recorder.record(&refused(2)).unwrap();
        recorder.finalize(&summary(2, 2)).unwrap();

        let log = text(recorder);
        let lines: Vec<Value> = log
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["sequence_number"], 1);
        assert_eq!(lines[1]["status"]["category"], "network_error");
        assert_eq!(lines[2]["summary"]["total_sent"], 2);
        assert_eq!(lines[2]["summary"]["completed"], 2);
    }

    #[test]
    fn create_truncates_existing_log_and_makes_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.txt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "stale contents").unwrap();

        let mut recorder = OutcomeRecorder::create(&path, LogPolicy::All, LogFormat::Text).unwrap();
        recorder.finalize(&summary(0, 0)).unwrap();
        drop(recorder);

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Test completed. Total sent: 0, Completed: 0.\n"
        );
    }

    /// Counts flushes so tests can see when buffered entries hit the disk.
    #[derive(Default)]
    struct FlushCounter {
        bytes: Vec<u8>,
        flushes: usize,
    }

    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn entries_are_flushed_once_at_finalize() {
        let mut recorder = OutcomeRecorder::new(FlushCounter::default(), LogPolicy::All, LogFormat::Text);

        for seq in 1..=5 {
            recorder.record(&ok(seq, 200)).unwrap();
        }
        recorder.finalize(&summary(5, 5)).unwrap();
        recorder.finalize(&summary(5, 5)).unwrap();

        let writer = recorder.into_inner();
        assert_eq!(writer.flushes, 1);
        assert_eq!(String::from_utf8(writer.bytes).unwrap().matches("Request ").count(), 5);
    }

    #[test]
    fn file_log_is_complete_after_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.txt");
        let mut recorder = OutcomeRecorder::create(&path, LogPolicy::All, LogFormat::Text).unwrap();

        recorder.record(&refused(1)).unwrap();
        recorder.finalize(&summary(1, 1)).unwrap();

        // Read while the recorder is still alive: finalize must have flushed.
        let log = fs::read_to_string(&path).unwrap();
        assert!(log.starts_with("Request 1\nStatus: Unknown error\n"));
        assert!(log.ends_with("Test completed. Total sent: 1, Completed: 1.\n"));
        drop(recorder);
    }

    #[test]
    fn failures_only_keeps_only_non_2xx_bodies() {
        assert!(!LogPolicy::FailuresOnly.keeps_body(200));
        assert!(LogPolicy::FailuresOnly.keeps_body(404));
        assert!(LogPolicy::FailuresOnly.keeps_body(503));
        assert!(LogPolicy::All.keeps_body(204));
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("TEXT".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert_eq!("jsonl".parse::<LogFormat>(), Ok(LogFormat::Jsonl));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
