//! Fixed-width temporal bins
//!
//! Bins are half-open `[start, start + width)` and aligned to multiples of
//! the width, so bins of the same width computed from different snapshots
//! line up. Empty bins are filled in between populated ones, up to a bounded
//! gap.

use crate::types::{Timestamp, VoteRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Identity of a bin: its width and aligned start, in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BinId {
    pub width: u64,
    pub start: i64,
}

impl std::fmt::Display for BinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}s@{}", self.width, self.start)
    }
}

/// Vote counts within one time window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalBin {
    pub bin_start: Timestamp,
    pub bin_width: u64,
    pub vote_count: usize,
    pub distinct_author_count: usize,
    pub per_choice: BTreeMap<String, usize>,
}

impl TemporalBin {
    pub fn id(&self) -> BinId {
        BinId {
            width: self.bin_width,
            start: self.bin_start as i64,
        }
    }

    pub fn bin_end(&self) -> Timestamp {
        self.bin_start + self.bin_width as f64
    }
}

/// All bins of one width
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinSeries {
    pub width: u64,
    pub bins: Vec<TemporalBin>,
    /// Silent stretches longer than [`MAX_GAP_FILL`] bins, left unfilled
    pub gaps: usize,
    /// Votes whose timestamp has no representable bin
    pub unbinnable: usize,
}

/// Longest run of empty bins filled in between two populated bins
///
/// Clock mixups (a replay offset next to epoch seconds) would otherwise
/// expand into hundreds of millions of empty bins.
pub const MAX_GAP_FILL: i64 = 1_000;

/// Largest timestamp magnitude that is binned, in seconds
const MAX_BINNABLE_SECONDS: f64 = 1e15;

/// Aligned start of the bin holding `timestamp`, if it has one
fn bin_start_of(timestamp: Timestamp, width: i64) -> Option<i64> {
    if !timestamp.is_finite() || timestamp.abs() > MAX_BINNABLE_SECONDS {
        return None;
    }
    let index = (timestamp / width as f64).floor() as i64;
    index.checked_mul(width)
}

type BinAccumulator<'a> = (usize, BTreeSet<&'a str>, BTreeMap<String, usize>);

fn build_series(votes: &[VoteRecord], width: u64) -> BinSeries {
    let mut series = BinSeries {
        width,
        bins: Vec::new(),
        gaps: 0,
        unbinnable: 0,
    };
    let step = match i64::try_from(width) {
        Ok(step) if step > 0 => step,
        _ => return series,
    };

    let mut grouped: BTreeMap<i64, BinAccumulator<'_>> = BTreeMap::new();
    for vote in votes {
        match bin_start_of(vote.timestamp, step) {
            Some(start) => {
                let entry = grouped.entry(start).or_default();
                entry.0 += 1;
                entry.1.insert(vote.author_id.as_str());
                *entry.2.entry(vote.choice.clone()).or_insert(0) += 1;
            }
            None => series.unbinnable += 1,
        }
    }
    if series.unbinnable > 0 {
        log::warn!("{} votes have timestamps that cannot be binned at {}s", series.unbinnable, width);
    }

    let mut previous: Option<i64> = None;
    for (start, (vote_count, authors, per_choice)) in grouped {
        if let Some(prev) = previous {
            let empty = (start - prev) / step - 1;
            if empty > MAX_GAP_FILL {
                series.gaps += 1;
                log::warn!(
                    "Leaving {} empty {}s bins between {} and {} unfilled",
                    empty,
                    width,
                    prev,
                    start
                );
            } else {
                series.bins.extend((1..=empty).map(|k| empty_bin(prev + k * step, width)));
            }
        }
        series.bins.push(TemporalBin {
            bin_start: start as f64,
            bin_width: width,
            vote_count,
            distinct_author_count: authors.len(),
            per_choice,
        });
        previous = Some(start);
    }

    log::debug!("Binned {} votes into {} bins of {}s", votes.len(), series.bins.len(), width);
    series
}

fn empty_bin(start: i64, width: u64) -> TemporalBin {
    TemporalBin {
        bin_start: start as f64,
        bin_width: width,
        vote_count: 0,
        distinct_author_count: 0,
        per_choice: BTreeMap::new(),
    }
}

/// Aggregate votes into `width`-second bins
///
/// The series is dense except across silences longer than
/// [`MAX_GAP_FILL`] bins. Returns an empty series for no votes or a zero
/// width.
pub fn bin_votes(votes: &[VoteRecord], width: u64) -> Vec<TemporalBin> {
    build_series(votes, width).bins
}

/// Bin votes at every requested width
pub fn bin_series(votes: &[VoteRecord], widths: &[u64]) -> Vec<BinSeries> {
    widths.iter().map(|&width| build_series(votes, width)).collect()
}

/// Running totals per choice after one vote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CumulativePoint {
    pub timestamp: Timestamp,
    pub choice: String,
    pub totals: BTreeMap<String, usize>,
}

/// Cumulative vote count per choice at each vote, in time order
///
/// Every vote counts here, repeats included; this is the raw trajectory of
/// chat, not the one-person-one-vote tally.
pub fn cumulative_series(votes: &[VoteRecord]) -> Vec<CumulativePoint> {
    let mut ordered: Vec<&VoteRecord> = votes.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .total_cmp(&b.timestamp)
            .then(a.position.cmp(&b.position))
    });

    let mut totals: BTreeMap<String, usize> = BTreeMap::new();
    ordered
        .into_iter()
        .map(|vote| {
            *totals.entry(vote.choice.clone()).or_insert(0) += 1;
            CumulativePoint {
                timestamp: vote.timestamp,
                choice: vote.choice.clone(),
                totals: totals.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(author: &str, choice: &str, ts: f64, position: usize) -> VoteRecord {
        VoteRecord {
            author_id: author.to_string(),
            choice: choice.to_string(),
            timestamp: ts,
            position,
        }
    }

    #[test]
    fn test_bins_are_aligned_and_dense() {
        let votes = vec![
            vote("a", "1", 12.0, 0),
            vote("b", "2", 19.9, 1),
            vote("a", "1", 20.0, 2),
            vote("c", "3", 47.5, 3),
        ];
        let bins = bin_votes(&votes, 10);

        let starts: Vec<f64> = bins.iter().map(|b| b.bin_start).collect();
        assert_eq!(starts, vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(bins[0].vote_count, 2);
        assert_eq!(bins[0].distinct_author_count, 2);
        assert_eq!(bins[1].vote_count, 1);
        assert_eq!(bins[2].vote_count, 0);
        assert!(bins[2].per_choice.is_empty());
        assert_eq!(bins[3].per_choice["3"], 1);
    }

    #[test]
    fn test_distinct_authors_per_bin() {
        let votes = vec![
            vote("a", "1", 0.0, 0),
            vote("a", "2", 1.0, 1),
            vote("a", "2", 2.0, 2),
        ];
        let bins = bin_votes(&votes, 60);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].vote_count, 3);
        assert_eq!(bins[0].distinct_author_count, 1);
        assert_eq!(bins[0].per_choice["2"], 2);
        assert_eq!(bins[0].id(), BinId { width: 60, start: 0 });
    }

    #[test]
    fn test_empty_input_and_zero_width() {
        assert!(bin_votes(&[], 10).is_empty());
        assert!(bin_votes(&[vote("a", "1", 1.0, 0)], 0).is_empty());
    }

    #[test]
    fn test_long_silence_is_not_filled() {
        let votes = vec![vote("a", "1", 5.0, 0), vote("b", "2", 20_000_000.0, 1)];
        let series = bin_series(&votes, &[10]);
        assert_eq!(series[0].bins.len(), 2);
        assert_eq!(series[0].gaps, 1);
        assert_eq!(series[0].bins[1].bin_start, 20_000_000.0);

        // a short silence is still filled
        let votes = vec![vote("a", "1", 5.0, 0), vote("b", "2", 95.0, 1)];
        assert_eq!(bin_votes(&votes, 10).len(), 10);
    }

    #[test]
    fn test_unbinnable_timestamps_are_skipped() {
        let votes = vec![
            vote("a", "1", 1e300, 0),
            vote("b", "1", -1e300, 1),
            vote("c", "2", 12.0, 2),
        ];
        let series = bin_series(&votes, &[10, u64::MAX]);
        assert_eq!(series[0].unbinnable, 2);
        assert_eq!(series[0].bins.len(), 1);
        assert_eq!(series[0].bins[0].bin_start, 10.0);
        assert!(series[1].bins.is_empty());
    }

    #[test]
    fn test_cumulative_series_orders_by_time() {
        let votes = vec![
            vote("a", "2", 5.0, 1),
            vote("b", "1", 1.0, 0),
            vote("c", "2", 9.0, 2),
        ];
        let series = cumulative_series(&votes);
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].choice, "1");
        assert_eq!(series[2].totals["1"], 1);
        assert_eq!(series[2].totals["2"], 2);
    }
}
