//! Chat Vote Audit Library
//!
//! A stateless, reusable library for auditing text votes cast in a live chat.
//! Chat is captured redundantly from several sources, the per-source logs are
//! merged into one canonical deduplicated log, and the canonical log is
//! analysed for vote manipulation.
//!
//! # Architecture
//!
//! - [`capture`]: one adapter per source writes an append-only record log
//! - [`merge`]: reconciles the per-source logs into one ordered log
//! - [`votes`]: vote grammar, vote extraction and per-author histories
//! - [`anomaly`]: temporal bins and anomaly signals
//! - [`analysis`]: one-call analysis producing a serializable report
//!
//! The library does NOT:
//! - Scrape the streaming platform (external tools write the raw exports)
//! - Render reports or charts
//! - Keep state between runs
//!
//! Rendering and configuration files live in the application layer
//! (chat-vote-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use chat_vote_audit::{analyze, AnalysisConfig, MergeConfig, MergeEngine, SourceInput, SourceSpec};
//!
//! let config = MergeConfig::new()
//!     .add_source(SourceSpec::new("innertube", 0))
//!     .add_source(SourceSpec::new("chatdl", 1).with_tolerance(5.0));
//! let engine = MergeEngine::new(config).unwrap();
//!
//! let merged = engine.merge_files(&[
//!     SourceInput::new("innertube", "logs/innertube.jsonl"),
//!     SourceInput::new("chatdl", "logs/chatdl.jsonl"),
//! ]);
//! println!("{} duplicates removed", merged.report.duplicates_removed());
//!
//! let report = analyze(&merged.records, &AnalysisConfig::default(), None).unwrap();
//! for row in &report.summary.tally {
//!     println!("{}: {} ({:.1}%)", row.choice, row.votes, row.percent);
//! }
//! ```

// Public modules
pub mod analysis;
pub mod anomaly;
pub mod capture;
pub mod config;
pub mod formats;
pub mod merge;
pub mod types;
pub mod votes;

// Re-export main types for convenience
pub use analysis::{analyze, AnalysisReport, ChatterRow, TallyRow, VoteSummary};
pub use anomaly::{AnomalyDetector, AnomalyFinding, AnomalyKind, BinSeries, TemporalBin};
pub use capture::{
    AdapterStatus, CaptureAdapter, CaptureRunner, CaptureSummary, ChatSource, ReplaySource,
    SourceError, SourcePoll, StopSignal, TailSource,
};
pub use config::{
    AnalysisConfig, BackoffConfig, CaptureConfig, DetectorConfig, GrammarConfig, MergeConfig,
    SourceSpec,
};
pub use formats::{read_log, read_viewer_series, write_log, LogWriter};
pub use merge::{MergeEngine, MergeOutput, MergeReport, SourceInput, SourceLog};
pub use types::{AuditError, EventRecord, Observation, Result, Timestamp, ViewerSample, VoteRecord};
pub use votes::{AuthorVoteHistory, VoteHistoryIndex};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
