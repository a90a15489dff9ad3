//! Vote extraction from the canonical log

use crate::types::{EventRecord, VoteRecord};
use crate::votes::grammar::VoteGrammar;

/// Turn canonical records into votes
///
/// Each record whose normalised text the grammar accepts yields exactly one
/// vote; everything else is ignored. `position` is the record's index in
/// `records`.
pub fn extract_votes(records: &[EventRecord], grammar: &dyn VoteGrammar) -> Vec<VoteRecord> {
    let votes: Vec<VoteRecord> = records
        .iter()
        .enumerate()
        .filter_map(|(position, record)| {
            let choice = grammar.parse(record.normalized_text())?;
            log::trace!("Vote '{}' by {} at {}", choice, record.author_id, record.timestamp);
            Some(VoteRecord {
                author_id: record.author_id.clone(),
                choice,
                timestamp: record.timestamp,
                position,
            })
        })
        .collect();

    log::debug!("Extracted {} votes from {} records", votes.len(), records.len());
    votes
}
