//! Chat sources backed by raw export files

use crate::capture::{ChatSource, SourceError, SourcePoll};
use crate::formats::raw::{parse_raw_export, read_raw_export};
use crate::types::{EventRecord, Result};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Follows a raw export file that an external scraper keeps appending to
///
/// Only newline-terminated lines are consumed; a partially written line is
/// picked up by a later poll once it is complete. A file that does not exist
/// yet is a transient failure.
#[derive(Debug)]
pub struct TailSource {
    tag: String,
    path: PathBuf,
    offset: u64,
    unparseable: usize,
}

impl TailSource {
    pub fn new(tag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            path: path.into(),
            offset: 0,
            unparseable: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Lines seen so far that were not JSON
    pub fn unparseable(&self) -> usize {
        self.unparseable
    }

    fn read_new_bytes(&mut self) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            log::warn!(
                "[{}] {:?} shrank from {} to {} bytes; reading from the start",
                self.tag,
                self.path,
                self.offset,
                len
            );
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl ChatSource for TailSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn poll(&mut self) -> std::result::Result<SourcePoll, SourceError> {
        let buf = match self.read_new_bytes() {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::Transient(format!("{:?} does not exist yet", self.path)));
            }
            Err(e) => return Err(SourceError::Transient(e.to_string())),
        };

        let complete = match buf.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => last_newline + 1,
            None => return Ok(SourcePoll::Records(Vec::new())),
        };
        self.offset += complete as u64;

        let chunk = String::from_utf8_lossy(&buf[..complete]);
        let import = parse_raw_export(&chunk, &self.tag);
        self.unparseable += import.unparseable;
        if import.unparseable > 0 || import.skipped > 0 {
            log::debug!(
                "[{}] {} unparseable and {} incomplete entries in new data",
                self.tag,
                import.unparseable,
                import.skipped
            );
        }
        Ok(SourcePoll::Records(import.records))
    }
}

/// Pages through a finished export, then ends
#[derive(Debug, Clone)]
pub struct ReplaySource {
    tag: String,
    records: Vec<EventRecord>,
    cursor: usize,
    page_size: usize,
    /// Export still to be loaded on the first poll
    pending: Option<PathBuf>,
}

impl ReplaySource {
    pub fn from_records(tag: impl Into<String>, records: Vec<EventRecord>, page_size: usize) -> Self {
        Self {
            tag: tag.into(),
            records,
            cursor: 0,
            page_size: page_size.max(1),
            pending: None,
        }
    }

    /// Replay an export that is loaded on the first poll
    ///
    /// A load failure is fatal for this source only, so sibling adapters
    /// keep running.
    pub fn open(tag: impl Into<String>, path: impl Into<PathBuf>, page_size: usize) -> Self {
        let mut source = Self::from_records(tag, Vec::new(), page_size);
        source.pending = Some(path.into());
        source
    }

    /// Load a raw export (JSON array, line-delimited, or replay wrappers)
    pub fn from_file(tag: impl Into<String>, path: &Path, page_size: usize) -> Result<Self> {
        let tag = tag.into();
        let import = read_raw_export(path, &tag)?;
        Ok(Self::from_records(tag, import.records, page_size))
    }

    pub fn remaining(&self) -> usize {
        self.records.len() - self.cursor
    }
}

impl ChatSource for ReplaySource {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn poll(&mut self) -> std::result::Result<SourcePoll, SourceError> {
        if let Some(path) = self.pending.take() {
            let import = read_raw_export(&path, &self.tag)
                .map_err(|e| SourceError::Fatal(format!("cannot load {:?}: {}", path, e)))?;
            log::info!("[{}] Replaying {} messages from {:?}", self.tag, import.records.len(), path);
            self.records = import.records;
            self.cursor = 0;
        }
        if self.cursor >= self.records.len() {
            return Ok(SourcePoll::Ended);
        }
        let end = (self.cursor + self.page_size).min(self.records.len());
        let page = self.records[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(SourcePoll::Records(page))
    }
}
