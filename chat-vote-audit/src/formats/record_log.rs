//! Line-delimited JSON record logs
//!
//! Every capture adapter writes one of these, and the merge engine emits one.
//! A record is one JSON object terminated by `\n`. Logs may be read while a
//! writer is still appending: only complete lines are considered, so a record
//! whose write was interrupted is never treated as input.

use crate::types::{AuditError, EventRecord, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Counters collected while reading a log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Complete lines examined (blank lines included)
    pub lines: usize,
    /// Records accepted
    pub records: usize,
    /// Lines that are not valid JSON
    pub malformed: usize,
    /// JSON lines missing required fields or carrying invalid values
    pub schema_mismatches: usize,
    /// True when the log ends in an unterminated fragment
    pub incomplete_tail: bool,
}

/// The usable contents of a log plus what was skipped
#[derive(Debug, Clone, Default)]
pub struct LogLoad {
    pub records: Vec<EventRecord>,
    pub stats: LoadStats,
}

/// Read a record log from disk
///
/// A missing file is `SourceUnavailable`; bad lines are skipped and counted.
pub fn read_log(path: &Path) -> Result<LogLoad> {
    if !path.exists() {
        return Err(AuditError::SourceUnavailable(path.to_path_buf()));
    }

    let bytes = fs::read(path)?;
    let load = parse_log_bytes(&bytes);

    log::info!(
        "Loaded {} records from {:?} ({} malformed, {} schema mismatches{})",
        load.stats.records,
        path,
        load.stats.malformed,
        load.stats.schema_mismatches,
        if load.stats.incomplete_tail { ", incomplete tail ignored" } else { "" }
    );

    Ok(load)
}

/// Parse log contents, keeping only `\n`-terminated lines
pub fn parse_log_bytes(bytes: &[u8]) -> LogLoad {
    let mut load = LogLoad::default();

    let complete_len = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(pos) => pos + 1,
        None => 0,
    };
    load.stats.incomplete_tail = bytes[complete_len..].iter().any(|b| !b.is_ascii_whitespace());

    for (idx, chunk) in bytes[..complete_len]
        .split_inclusive(|b| *b == b'\n')
        .enumerate()
    {
        let raw_line = &chunk[..chunk.len() - 1];
        let line_no = idx + 1;
        load.stats.lines += 1;

        match parse_line(raw_line, line_no) {
            Ok(Some(record)) => {
                load.records.push(record);
                load.stats.records += 1;
            }
            Ok(None) => {}
            Err(AuditError::SchemaMismatch { line, reason }) => {
                log::debug!("Skipping record at line {}: {}", line, reason);
                load.stats.schema_mismatches += 1;
            }
            Err(e) => {
                log::debug!("Skipping line {}: {}", line_no, e);
                load.stats.malformed += 1;
            }
        }
    }

    if load.stats.malformed + load.stats.schema_mismatches > 0 {
        log::warn!(
            "Skipped {} malformed and {} schema-mismatched lines",
            load.stats.malformed,
            load.stats.schema_mismatches
        );
    }

    load
}

/// Parse one complete line; blank lines yield `Ok(None)`
pub fn parse_line(raw_line: &[u8], line: usize) -> Result<Option<EventRecord>> {
    let text = std::str::from_utf8(raw_line).map_err(|e| AuditError::MalformedRecord {
        line,
        reason: format!("invalid UTF-8: {}", e),
    })?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| AuditError::MalformedRecord {
            line,
            reason: e.to_string(),
        })?;

    let record: EventRecord =
        serde_json::from_value(value).map_err(|e| AuditError::SchemaMismatch {
            line,
            reason: e.to_string(),
        })?;

    record
        .validate()
        .map_err(|reason| AuditError::SchemaMismatch { line, reason })?;

    Ok(Some(record))
}

/// Append-only writer for a record log
///
/// Records become durable on `commit`, which flushes and syncs the file. The
/// buffer is also flushed when the writer is dropped, so every exit path
/// keeps what was appended.
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    appended: u64,
    committed: u64,
}

impl LogWriter {
    /// Open (or create) a log for appending
    ///
    /// If a previous writer died mid-record, the fragment is terminated so the
    /// next record starts on its own line; readers then count the fragment as
    /// one malformed line.
    pub fn open_append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let len = file.metadata()?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                log::warn!("Terminating partial record at end of {:?}", path);
                file.write_all(b"\n")?;
            }
        }

        log::debug!("Opened record log {:?} ({} bytes)", path, len);

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            appended: 0,
            committed: 0,
        })
    }

    /// Buffer one record
    pub fn append(&mut self, record: &EventRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.appended += 1;
        Ok(())
    }

    /// Flush buffered records and sync them to disk
    pub fn commit(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.committed = self.appended;
        Ok(())
    }

    /// Records appended through this writer
    pub fn records_appended(&self) -> u64 {
        self.appended
    }

    /// Records known to be on disk
    pub fn records_committed(&self) -> u64 {
        self.committed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::error!("Failed to flush record log {:?}: {}", self.path, e);
        }
    }
}

/// Write a complete log, replacing any existing file atomically
pub fn write_log(path: &Path, records: &[EventRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    log::info!("Wrote {} records to {:?}", records.len(), path);
    Ok(())
}
