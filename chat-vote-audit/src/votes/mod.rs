//! Vote extraction and per-author vote histories
//!
//! This module contains the pluggable vote grammar, the extractor that turns
//! canonical records into votes, and the history index built from them.

pub mod extractor;
pub mod grammar;
pub mod history;

// Re-export key types for convenience
pub use extractor::extract_votes;
pub use grammar::{build_grammar, ExactTokens, PrefixTokens, RegexGrammar, VoteGrammar};
pub use history::{AuthorVoteHistory, ChangerRow, VoteHistoryIndex};
