//! One-call analysis of a canonical log
//!
//! [`analyze`] runs extraction, history building, binning and anomaly
//! detection over a snapshot and returns everything a report needs. The
//! result is plain serializable data; rendering is up to the caller.

use crate::anomaly::{
    bin_series, cumulative_series, AnomalyDetector, AnomalyFinding, BinSeries, BurstScanStats,
    CumulativePoint,
};
use crate::config::AnalysisConfig;
use crate::types::{EventRecord, Result, Timestamp, ViewerSample};
use crate::votes::{build_grammar, extract_votes, ChangerRow, VoteHistoryIndex};
use serde::Serialize;
use std::collections::HashMap;

/// Rows of the vote-change table included in the summary
const CHANGER_TABLE_LIMIT: usize = 30;

/// Final-vote count for one choice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TallyRow {
    pub choice: String,
    pub votes: usize,
    /// Share of distinct voters, 0-100
    pub percent: f64,
}

/// Message count of one author
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatterRow {
    pub author_id: String,
    pub author_name: String,
    pub messages: usize,
}

/// Headline numbers of a vote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteSummary {
    pub total_messages: usize,
    pub vote_messages: usize,
    pub distinct_voters: usize,
    pub first_vote_at: Option<Timestamp>,
    pub last_vote_at: Option<Timestamp>,
    /// Seconds between first and last vote
    pub duration_seconds: f64,
    /// Vote messages per minute, over at least one minute
    pub votes_per_minute: f64,
    /// One row per choice, by final vote
    pub tally: Vec<TallyRow>,
    pub leaders: Vec<String>,
    pub multi_voters: usize,
    pub changers: usize,
    pub median_vote_count: f64,
    pub changer_table: Vec<ChangerRow>,
    pub top_chatters: Vec<ChatterRow>,
}

/// Everything derived from one snapshot of the canonical log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub summary: VoteSummary,
    pub bins: Vec<BinSeries>,
    pub cumulative: Vec<CumulativePoint>,
    pub findings: Vec<AnomalyFinding>,
    pub burst_scans: Vec<BurstScanStats>,
}

/// Analyse a canonical log
///
/// `viewers` is an optional concurrent-viewer series; without it the
/// viewer-ratio check is skipped. Running twice on the same input gives the
/// same report.
pub fn analyze(
    records: &[EventRecord],
    config: &AnalysisConfig,
    viewers: Option<&[ViewerSample]>,
) -> Result<AnalysisReport> {
    config.validate()?;
    let grammar = build_grammar(&config.grammar)?;

    let votes = extract_votes(records, grammar.as_ref());
    let index = VoteHistoryIndex::build(&votes, records);
    let bins = bin_series(&votes, &config.bin_widths);
    let cumulative = cumulative_series(&votes);

    let detection = AnomalyDetector::new(config.detector.clone())
        .with_bin_widths(config.bin_widths.clone())
        .detect_with_bins(&index, &bins, viewers);

    let known_choices = grammar.choices();
    let summary = summarize(records, &index, known_choices.as_deref(), config.top_chatters);

    log::info!(
        "Analysed {} messages: {} votes from {} voters, {} findings",
        summary.total_messages,
        summary.vote_messages,
        summary.distinct_voters,
        detection.findings.len()
    );

    Ok(AnalysisReport {
        summary,
        bins,
        cumulative,
        findings: detection.findings,
        burst_scans: detection.burst_scans,
    })
}

fn summarize(
    records: &[EventRecord],
    index: &VoteHistoryIndex,
    known_choices: Option<&[String]>,
    top_chatters: usize,
) -> VoteSummary {
    let first_vote_at = index
        .iter()
        .filter_map(|h| h.first_vote_at())
        .min_by(|a, b| a.total_cmp(b));
    let last_vote_at = index
        .iter()
        .filter_map(|h| h.last_vote_at())
        .max_by(|a, b| a.total_cmp(b));
    let duration_seconds = match (first_vote_at, last_vote_at) {
        (Some(first), Some(last)) => last - first,
        _ => 0.0,
    };

    let vote_messages = index.total_votes();
    let distinct_voters = index.distinct_voters();
    let votes_per_minute = vote_messages as f64 / (duration_seconds / 60.0).max(1.0);

    let tally = index
        .tally(known_choices)
        .into_iter()
        .map(|(choice, votes)| TallyRow {
            choice,
            votes,
            percent: if distinct_voters == 0 {
                0.0
            } else {
                votes as f64 / distinct_voters as f64 * 100.0
            },
        })
        .collect();

    VoteSummary {
        total_messages: records.len(),
        vote_messages,
        distinct_voters,
        first_vote_at,
        last_vote_at,
        duration_seconds,
        votes_per_minute,
        tally,
        leaders: index.leaders(),
        multi_voters: index.multi_voters(),
        changers: index.changers(),
        median_vote_count: index.median_vote_count(),
        changer_table: index.changer_table(CHANGER_TABLE_LIMIT),
        top_chatters: rank_chatters(records, top_chatters),
    }
}

/// Authors with the most messages of any kind
fn rank_chatters(records: &[EventRecord], limit: usize) -> Vec<ChatterRow> {
    let mut counts: HashMap<&str, (usize, &str)> = HashMap::new();
    for record in records {
        let entry = counts
            .entry(record.author_id.as_str())
            .or_insert((0, record.author_name.as_str()));
        entry.0 += 1;
        if !record.author_name.is_empty() {
            entry.1 = record.author_name.as_str();
        }
    }

    let mut rows: Vec<ChatterRow> = counts
        .into_iter()
        .map(|(id, (messages, name))| ChatterRow {
            author_id: id.to_string(),
            author_name: name.to_string(),
            messages,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.messages
            .cmp(&a.messages)
            .then_with(|| a.author_id.cmp(&b.author_id))
    });
    rows.truncate(limit);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrammarConfig;

    fn chat() -> Vec<EventRecord> {
        vec![
            EventRecord::new("u1", "alice", 0.0, "1", "a"),
            EventRecord::new("u2", "bob", 10.0, "hello", "a"),
            EventRecord::new("u2", "bob", 20.0, "2", "a"),
            EventRecord::new("u1", "alice", 60.0, "2", "a"),
            EventRecord::new("u3", "carol", 90.0, "3", "a"),
            EventRecord::new("u2", "bob", 120.0, "2", "a"),
        ]
    }

    #[test]
    fn test_summary_numbers() {
        let report = analyze(&chat(), &AnalysisConfig::default(), None).unwrap();
        let summary = &report.summary;

        assert_eq!(summary.total_messages, 6);
        assert_eq!(summary.vote_messages, 5);
        assert_eq!(summary.distinct_voters, 3);
        assert_eq!(summary.duration_seconds, 120.0);
        assert_eq!(summary.votes_per_minute, 2.5);
        assert_eq!(summary.leaders, vec!["2".to_string()]);
        assert_eq!(summary.multi_voters, 2);
        assert_eq!(summary.changers, 1);

        let tally: Vec<(&str, usize)> = summary.tally.iter().map(|r| (r.choice.as_str(), r.votes)).collect();
        assert_eq!(tally, vec![("1", 0), ("2", 2), ("3", 1)]);
        assert!((summary.tally[1].percent - 200.0 / 3.0).abs() < 1e-9);

        assert_eq!(summary.top_chatters[0].author_id, "u2");
        assert_eq!(summary.top_chatters[0].messages, 3);
        assert_eq!(summary.changer_table[0].history, "1 → 2");
    }

    #[test]
    fn test_bins_per_configured_width() {
        let config = AnalysisConfig::default().with_bin_widths(vec![30, 60]);
        let report = analyze(&chat(), &config, None).unwrap();

        assert_eq!(report.bins.len(), 2);
        assert_eq!(report.bins[0].width, 30);
        assert_eq!(report.bins[0].bins.len(), 5);
        assert_eq!(report.burst_scans.len(), 2);
        assert_eq!(report.cumulative.len(), 5);
    }

    #[test]
    fn test_stray_clock_records_do_not_blow_up_bins() {
        let mut records = chat();
        records.push(EventRecord::new("u4", "dave", 1_700_000_000.0, "1", "b"));
        records.push(EventRecord::new("u5", "erin", 1e300, "3", "b"));

        let report = analyze(&records, &AnalysisConfig::default(), None).unwrap();
        assert_eq!(report.summary.distinct_voters, 5);
        assert_eq!(report.bins.len(), 3);
        for series in &report.bins {
            assert!(series.bins.len() < 20, "{}s series has {} bins", series.width, series.bins.len());
            assert_eq!(series.gaps, 1);
            assert_eq!(series.unbinnable, 1);
        }
    }

    #[test]
    fn test_analysis_is_repeatable() {
        let records = chat();
        let config = AnalysisConfig::default();
        let first = analyze(&records, &config, None).unwrap();
        let second = analyze(&records, &config, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_log() {
        let report = analyze(&[], &AnalysisConfig::default(), None).unwrap();
        assert_eq!(report.summary.distinct_voters, 0);
        assert_eq!(report.summary.votes_per_minute, 0.0);
        assert!(report.summary.leaders.is_empty());
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalysisConfig::default().with_grammar(GrammarConfig::Regex {
            pattern: "(".to_string(),
        });
        assert!(analyze(&chat(), &config, None).is_err());

        let config = AnalysisConfig::default().with_bin_widths(vec![0]);
        assert!(analyze(&chat(), &config, None).is_err());
    }
}
