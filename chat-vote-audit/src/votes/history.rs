//! Per-author vote histories
//!
//! The index is rebuilt from scratch for every analysis run. It is the source
//! of truth for each author's final vote and switch count, and for the
//! headline result (one person, one counted vote).

use crate::types::{EventRecord, Timestamp, VoteRecord};
use serde::Serialize;
use std::collections::BTreeMap;

/// Chronological votes of one author
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorVoteHistory {
    pub author_id: String,
    /// Display name at the author's latest vote
    pub author_name: String,
    /// Votes ordered by timestamp, ties by log position
    pub votes: Vec<VoteRecord>,
}

impl AuthorVoteHistory {
    /// Choice of the last vote
    pub fn final_vote(&self) -> Option<&str> {
        self.votes.last().map(|v| v.choice.as_str())
    }

    /// Number of adjacent vote pairs whose choice differs
    pub fn switch_count(&self) -> usize {
        self.votes
            .windows(2)
            .filter(|pair| pair[0].choice != pair[1].choice)
            .count()
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn first_vote_at(&self) -> Option<Timestamp> {
        self.votes.first().map(|v| v.timestamp)
    }

    pub fn last_vote_at(&self) -> Option<Timestamp> {
        self.votes.last().map(|v| v.timestamp)
    }

    /// Seconds between first and last vote
    pub fn span_seconds(&self) -> f64 {
        match (self.first_vote_at(), self.last_vote_at()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Choices in order, e.g. `["1", "2", "2"]`
    pub fn choices(&self) -> Vec<&str> {
        self.votes.iter().map(|v| v.choice.as_str()).collect()
    }
}

/// One row of the vote-change table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangerRow {
    pub author_id: String,
    pub author_name: String,
    /// Choices joined with arrows, e.g. "1 → 2 → 2"
    pub history: String,
    pub vote_count: usize,
    pub switch_count: usize,
    pub first_choice: String,
    pub final_choice: String,
}

/// Vote histories of every author in a canonical log
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoteHistoryIndex {
    histories: BTreeMap<String, AuthorVoteHistory>,
}

impl VoteHistoryIndex {
    /// Build the index from extracted votes
    ///
    /// `records` is the canonical log the votes were extracted from; it
    /// supplies display names.
    pub fn build(votes: &[VoteRecord], records: &[EventRecord]) -> Self {
        let mut histories: BTreeMap<String, AuthorVoteHistory> = BTreeMap::new();

        for vote in votes {
            histories
                .entry(vote.author_id.clone())
                .or_insert_with(|| AuthorVoteHistory {
                    author_id: vote.author_id.clone(),
                    author_name: String::new(),
                    votes: Vec::new(),
                })
                .votes
                .push(vote.clone());
        }

        for history in histories.values_mut() {
            // stable: equal timestamps keep log order
            history.votes.sort_by(|a, b| {
                a.timestamp
                    .total_cmp(&b.timestamp)
                    .then(a.position.cmp(&b.position))
            });
            history.author_name = history
                .votes
                .last()
                .and_then(|v| records.get(v.position))
                .map(|r| r.author_name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| history.author_id.clone());
        }

        log::debug!(
            "Built vote histories for {} authors from {} votes",
            histories.len(),
            votes.len()
        );

        Self { histories }
    }

    pub fn get(&self, author_id: &str) -> Option<&AuthorVoteHistory> {
        self.histories.get(author_id)
    }

    /// Histories ordered by author id
    pub fn iter(&self) -> impl Iterator<Item = &AuthorVoteHistory> {
        self.histories.values()
    }

    /// Number of distinct voting authors
    pub fn distinct_voters(&self) -> usize {
        self.histories.len()
    }

    /// All recognised votes, repeats included
    pub fn total_votes(&self) -> usize {
        self.histories.values().map(AuthorVoteHistory::vote_count).sum()
    }

    /// Count of authors per final choice
    ///
    /// `known_choices` are listed even when nobody ended on them.
    pub fn tally(&self, known_choices: Option<&[String]>) -> BTreeMap<String, usize> {
        let mut tally: BTreeMap<String, usize> = known_choices
            .unwrap_or_default()
            .iter()
            .map(|c| (c.clone(), 0))
            .collect();
        for history in self.histories.values() {
            if let Some(choice) = history.final_vote() {
                *tally.entry(choice.to_string()).or_insert(0) += 1;
            }
        }
        tally
    }

    /// Choice(s) with the most final votes; several on a tie, none without votes
    pub fn leaders(&self) -> Vec<String> {
        let tally = self.tally(None);
        let best = tally.values().copied().max().unwrap_or(0);
        if best == 0 {
            return Vec::new();
        }
        tally
            .into_iter()
            .filter(|(_, count)| *count == best)
            .map(|(choice, _)| choice)
            .collect()
    }

    /// Authors who voted more than once
    pub fn multi_voters(&self) -> usize {
        self.histories.values().filter(|h| h.vote_count() > 1).count()
    }

    /// Authors who changed their vote at least once
    pub fn changers(&self) -> usize {
        self.histories.values().filter(|h| h.switch_count() > 0).count()
    }

    /// Median per-author vote count (0 when nobody voted)
    pub fn median_vote_count(&self) -> f64 {
        let mut counts: Vec<usize> = self.histories.values().map(|h| h.vote_count()).collect();
        if counts.is_empty() {
            return 0.0;
        }
        counts.sort_unstable();
        let mid = counts.len() / 2;
        if counts.len() % 2 == 0 {
            (counts[mid - 1] + counts[mid]) as f64 / 2.0
        } else {
            counts[mid] as f64
        }
    }

    /// Authors who changed their vote, most votes first
    pub fn changer_table(&self, limit: usize) -> Vec<ChangerRow> {
        let mut rows: Vec<ChangerRow> = self
            .histories
            .values()
            .filter(|h| h.switch_count() > 0)
            .map(|h| ChangerRow {
                author_id: h.author_id.clone(),
                author_name: h.author_name.clone(),
                history: h.choices().join(" → "),
                vote_count: h.vote_count(),
                switch_count: h.switch_count(),
                first_choice: h.votes.first().map(|v| v.choice.clone()).unwrap_or_default(),
                final_choice: h.final_vote().unwrap_or_default().to_string(),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.vote_count
                .cmp(&a.vote_count)
                .then_with(|| a.author_id.cmp(&b.author_id))
        });
        rows.truncate(limit);
        rows
    }
}
