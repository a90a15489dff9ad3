//! Core types for the chat vote audit library
//!
//! This module defines the fundamental records that flow through the pipeline:
//! chat events captured from a source, the per-source observations a canonical
//! event was merged from, and the errors the library reports. Records are
//! immutable once created; every stage produces new values instead of
//! patching old ones.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Timestamp type used throughout the library: seconds on the source-local clock
pub type Timestamp = f64;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors that can occur while loading, merging or analysing chat logs
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Source log unavailable: {0:?}")]
    SourceUnavailable(PathBuf),

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Schema mismatch at line {line}: {reason}")]
    SchemaMismatch { line: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid vote grammar: {0}")]
    InvalidGrammar(#[from] regex::Error),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One chat event as seen by a source, or the canonical merge of several sightings
///
/// Per-source logs carry a single tag in `sources` and no `observations`.
/// Canonical records produced by the merge engine carry the priority-ordered
/// union of contributing sources plus every observation they were built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Stable identity key (channel id when the source exposes one)
    pub author_id: String,
    /// Display name at capture time; not unique, may change
    #[serde(default)]
    pub author_name: String,
    /// Event time in seconds on the capturing source's clock
    pub timestamp: Timestamp,
    /// Raw message text
    pub text: String,
    /// Contributing source tags, most reliable first
    #[serde(default)]
    pub sources: Vec<String>,
    /// Source-provided ordering hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_hint: Option<u64>,
    /// Source-provided message identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Amount text for paid messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<String>,
    /// Offset into the broadcast for replayed chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_offset_ms: Option<i64>,
    /// Per-source sightings merged into this record (canonical records only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<Observation>,
}

/// A single source's sighting of a chat event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub source: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_hint: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl EventRecord {
    /// Create a per-source record
    pub fn new(
        author_id: impl Into<String>,
        author_name: impl Into<String>,
        timestamp: Timestamp,
        text: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            author_id: author_id.into(),
            author_name: author_name.into(),
            timestamp,
            text: text.into(),
            sources: vec![source.into()],
            sequence_hint: None,
            message_id: None,
            paid_amount: None,
            video_offset_ms: None,
            observations: Vec::new(),
        }
    }

    /// Builder method: set the sequence hint
    pub fn with_sequence_hint(mut self, hint: u64) -> Self {
        self.sequence_hint = Some(hint);
        self
    }

    /// Builder method: set the source message id
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Text with surrounding whitespace removed; the dedup and vote matching key
    pub fn normalized_text(&self) -> &str {
        normalize_text(&self.text)
    }

    /// Primary (most reliable) source tag, if any
    pub fn primary_source(&self) -> Option<&str> {
        self.sources.first().map(String::as_str)
    }

    /// Check the fields a record needs to take part in merge and analysis
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.author_id.trim().is_empty() {
            return Err("empty author_id".to_string());
        }
        if !self.timestamp.is_finite() {
            return Err(format!("non-finite timestamp {}", self.timestamp));
        }
        for obs in &self.observations {
            if !obs.timestamp.is_finite() {
                return Err(format!("non-finite observation timestamp from {}", obs.source));
            }
        }
        Ok(())
    }

    /// The sightings this record stands for
    ///
    /// A canonical record yields its stored observations. A per-source record
    /// is a single sighting by its own source, or by `fallback_source` when it
    /// carries no tag.
    pub fn sightings(&self, fallback_source: &str) -> Vec<Observation> {
        if !self.observations.is_empty() {
            return self.observations.clone();
        }
        let source = self
            .primary_source()
            .unwrap_or(fallback_source)
            .to_string();
        vec![Observation {
            source,
            timestamp: self.timestamp,
            sequence_hint: self.sequence_hint,
            message_id: self.message_id.clone(),
        }]
    }
}

/// Normalise message text for matching: trim surrounding whitespace
pub fn normalize_text(text: &str) -> &str {
    text.trim()
}

/// One recognised vote extracted from the canonical log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub author_id: String,
    pub choice: String,
    pub timestamp: Timestamp,
    /// Index of the originating record in the canonical log
    pub position: usize,
}

/// A point of an externally supplied concurrent-viewer estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewerSample {
    pub timestamp: Timestamp,
    pub viewers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_text_trims() {
        let record = EventRecord::new("UC1", "alice", 10.0, "  2 \n", "innertube");
        assert_eq!(record.normalized_text(), "2");
        assert_eq!(record.primary_source(), Some("innertube"));
    }

    #[test]
    fn test_validate_rejects_missing_identity() {
        let mut record = EventRecord::new("", "alice", 10.0, "1", "a");
        assert!(record.validate().is_err());

        record.author_id = "UC1".to_string();
        record.timestamp = f64::NAN;
        assert!(record.validate().is_err());

        record.timestamp = 1.0;
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_sightings_of_plain_and_canonical_records() {
        let plain = EventRecord::new("UC1", "alice", 10.0, "1", "chatdl").with_sequence_hint(7);
        let obs = plain.sightings("ignored");
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].source, "chatdl");
        assert_eq!(obs[0].sequence_hint, Some(7));

        let mut untagged = plain.clone();
        untagged.sources.clear();
        assert_eq!(untagged.sightings("fallback")[0].source, "fallback");

        let mut canonical = plain.clone();
        canonical.observations = vec![
            Observation { source: "a".into(), timestamp: 10.0, sequence_hint: None, message_id: None },
            Observation { source: "b".into(), timestamp: 11.0, sequence_hint: None, message_id: None },
        ];
        assert_eq!(canonical.sightings("x").len(), 2);
    }

    #[test]
    fn test_record_json_omits_empty_extras() {
        let record = EventRecord::new("UC1", "alice", 10.5, "1", "a");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("observations"));
        assert!(!json.contains("paid_amount"));

        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
