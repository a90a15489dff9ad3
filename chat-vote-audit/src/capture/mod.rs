//! Redundant chat capture
//!
//! Each configured source gets its own [`CaptureAdapter`] running on its own
//! thread. An adapter owns its source, its log writer and its retry state and
//! shares nothing with its siblings except the [`StopSignal`]. Adapters may
//! write the same message more than once; the merge engine removes those
//! re-emissions later.
//!
//! Fetching chat from the streaming platform is left to external scrapers.
//! The shipped sources read what those tools write:
//! - [`TailSource`]: follows a growing raw export file
//! - [`ReplaySource`]: pages through a finished export

pub mod adapter;
pub mod runner;
pub mod sources;
pub mod stop;

pub use adapter::{AdapterStatus, CaptureAdapter, CaptureSummary};
pub use runner::CaptureRunner;
pub use sources::{ReplaySource, TailSource};
pub use stop::StopSignal;

use crate::types::EventRecord;

/// Result of one successful poll
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePoll {
    /// Zero or more new records
    Records(Vec<EventRecord>),
    /// The source has nothing more to give
    Ended,
}

/// Failure of one poll
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Retried with backoff by the adapter
    #[error("Transient source error: {0}")]
    Transient(String),

    /// Stops the adapter
    #[error("Fatal source error: {0}")]
    Fatal(String),
}

/// A chat endpoint that can be polled for new records
pub trait ChatSource: Send {
    /// Tag written into every record from this source
    fn tag(&self) -> &str;

    /// Fetch whatever is new since the last poll
    fn poll(&mut self) -> std::result::Result<SourcePoll, SourceError>;
}
