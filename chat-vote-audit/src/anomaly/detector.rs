//! Anomaly detection over vote histories and bins
//!
//! Each signal is computed independently; an author or bin can carry several
//! findings. Findings are evidence for a reviewer, not verdicts.

use crate::anomaly::bins::{bin_series, BinId, BinSeries, TemporalBin};
use crate::config::DetectorConfig;
use crate::types::{Timestamp, ViewerSample, VoteRecord};
use crate::votes::{AuthorVoteHistory, VoteHistoryIndex};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Kind of anomaly, in report order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    MultiVote,
    RepeatSpam,
    VoteSwitching,
    TemporalBurst,
    ViewerRatio,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AnomalyKind::MultiVote => "multi_vote",
            AnomalyKind::RepeatSpam => "repeat_spam",
            AnomalyKind::VoteSwitching => "vote_switching",
            AnomalyKind::TemporalBurst => "temporal_burst",
            AnomalyKind::ViewerRatio => "viewer_ratio",
        };
        f.write_str(name)
    }
}

/// What a finding is about
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subject {
    Author { author_id: String },
    Bin { bin: BinId },
    Stream,
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Author { author_id } => write!(f, "author {}", author_id),
            Subject::Bin { bin } => write!(f, "bin {}", bin),
            Subject::Stream => f.write_str("stream"),
        }
    }
}

/// Numbers behind a finding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    MultiVote {
        vote_count: usize,
        median_vote_count: f64,
    },
    RepeatSpam {
        choice: String,
        run_length: usize,
        first_at: Timestamp,
        last_at: Timestamp,
    },
    VoteSwitching {
        switch_count: usize,
        span_seconds: f64,
        history: Vec<String>,
    },
    TemporalBurst {
        vote_count: usize,
        distinct_author_count: usize,
        baseline_mean: f64,
        baseline_stddev: f64,
    },
    ViewerRatio {
        distinct_voters: usize,
        peak_viewers: u64,
        threshold: f64,
    },
}

/// One anomaly signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyFinding {
    pub kind: AnomalyKind,
    pub subject: Subject,
    pub severity_score: f64,
    pub evidence: Evidence,
}

/// Burst scan coverage for one bin width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BurstScanStats {
    pub bin_width: u64,
    pub bins_scanned: usize,
    pub bins_evaluated: usize,
    /// Bins with fewer than `burst_window` predecessors
    pub insufficient_history: usize,
    pub bins_flagged: usize,
}

/// Output of one detection run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub findings: Vec<AnomalyFinding>,
    pub burst_scans: Vec<BurstScanStats>,
}

impl Detection {
    pub fn count_of(&self, kind: AnomalyKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }
}

/// Runs every anomaly signal with one set of thresholds
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,
    bin_widths: Vec<u64>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            bin_widths: vec![10, 60, 300],
        }
    }

    /// Builder method: set the bin widths scanned for bursts
    pub fn with_bin_widths(mut self, widths: Vec<u64>) -> Self {
        self.bin_widths = widths;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run all signals over the vote histories of a canonical log
    ///
    /// `viewers` enables the viewer-ratio check; without it the check is
    /// skipped.
    pub fn detect(&self, index: &VoteHistoryIndex, viewers: Option<&[ViewerSample]>) -> Detection {
        let votes: Vec<VoteRecord> = index.iter().flat_map(|h| h.votes.iter().cloned()).collect();
        let series = bin_series(&votes, &self.bin_widths);
        self.detect_with_bins(index, &series, viewers)
    }

    /// Same as [`detect`](Self::detect) with precomputed bin series
    pub fn detect_with_bins(
        &self,
        index: &VoteHistoryIndex,
        series: &[BinSeries],
        viewers: Option<&[ViewerSample]>,
    ) -> Detection {
        let mut findings = Vec::new();

        let median = index.median_vote_count();
        for history in index.iter() {
            findings.extend(self.check_multi_vote(history, median));
            findings.extend(self.check_repeat_spam(history));
            findings.extend(self.check_switching(history));
        }

        let mut burst_scans = Vec::with_capacity(series.len());
        for s in series {
            let (burst_findings, stats) = self.scan_bursts(s.width, &s.bins);
            findings.extend(burst_findings);
            burst_scans.push(stats);
        }

        if let Some(samples) = viewers {
            findings.extend(self.check_viewer_ratio(index.distinct_voters(), samples));
        }

        sort_findings(&mut findings);
        log::info!(
            "Anomaly scan: {} findings over {} authors",
            findings.len(),
            index.distinct_voters()
        );

        Detection {
            findings,
            burst_scans,
        }
    }

    fn check_multi_vote(&self, history: &AuthorVoteHistory, median: f64) -> Option<AnomalyFinding> {
        let baseline = self.config.spam_multiple * median;
        let count = history.vote_count();
        if baseline <= 0.0 || count < self.config.min_spam_votes || (count as f64) <= baseline {
            return None;
        }
        Some(AnomalyFinding {
            kind: AnomalyKind::MultiVote,
            subject: author_subject(history),
            severity_score: count as f64 / baseline,
            evidence: Evidence::MultiVote {
                vote_count: count,
                median_vote_count: median,
            },
        })
    }

    fn check_repeat_spam(&self, history: &AuthorVoteHistory) -> Option<AnomalyFinding> {
        let threshold = self.config.repeat_threshold;
        if threshold == 0 {
            return None;
        }
        let (start, len) = longest_repeat_run(&history.votes, self.config.repeat_window_seconds)?;
        if len < threshold {
            return None;
        }
        let run = &history.votes[start..start + len];
        Some(AnomalyFinding {
            kind: AnomalyKind::RepeatSpam,
            subject: author_subject(history),
            severity_score: len as f64 / threshold as f64,
            evidence: Evidence::RepeatSpam {
                choice: run[0].choice.clone(),
                run_length: len,
                first_at: run[0].timestamp,
                last_at: run[len - 1].timestamp,
            },
        })
    }

    fn check_switching(&self, history: &AuthorVoteHistory) -> Option<AnomalyFinding> {
        let switches = history.switch_count();
        if switches == 0 || switches < self.config.switch_threshold {
            return None;
        }
        let span = history.span_seconds();
        let minutes = span.max(1.0) / 60.0;
        Some(AnomalyFinding {
            kind: AnomalyKind::VoteSwitching,
            subject: author_subject(history),
            severity_score: switches as f64 / minutes,
            evidence: Evidence::VoteSwitching {
                switch_count: switches,
                span_seconds: span,
                history: history.choices().into_iter().map(String::from).collect(),
            },
        })
    }

    fn scan_bursts(&self, width: u64, bins: &[TemporalBin]) -> (Vec<AnomalyFinding>, BurstScanStats) {
        let window = self.config.burst_window;
        let mut stats = BurstScanStats {
            bin_width: width,
            bins_scanned: bins.len(),
            bins_evaluated: 0,
            insufficient_history: 0,
            bins_flagged: 0,
        };
        let mut findings = Vec::new();

        // bins left out of a long silence count as empty
        let counts: BTreeMap<i64, usize> = bins.iter().map(|b| (b.id().start, b.vote_count)).collect();
        let first_start = match bins.first() {
            Some(first) => first.id().start as i128,
            None => return (findings, stats),
        };
        let step = width as i128;

        for bin in bins {
            let start = bin.id().start as i128;
            if window == 0 || start - window as i128 * step < first_start {
                stats.insufficient_history += 1;
                continue;
            }
            stats.bins_evaluated += 1;

            let baseline = (1..=window as i128).map(|k| {
                i64::try_from(start - k * step)
                    .ok()
                    .and_then(|s| counts.get(&s))
                    .copied()
                    .unwrap_or(0) as f64
            });
            let (mean, stddev) = mean_and_stddev(baseline);
            let count = bin.vote_count as f64;
            if count > mean + self.config.burst_k * stddev && bin.vote_count >= self.config.min_burst_votes {
                stats.bins_flagged += 1;
                log::debug!("Burst in {}s bin at {}: {} votes (baseline {:.2})", width, bin.bin_start, bin.vote_count, mean);
                findings.push(AnomalyFinding {
                    kind: AnomalyKind::TemporalBurst,
                    subject: Subject::Bin { bin: bin.id() },
                    severity_score: (count - mean) / stddev.max(1.0),
                    evidence: Evidence::TemporalBurst {
                        vote_count: bin.vote_count,
                        distinct_author_count: bin.distinct_author_count,
                        baseline_mean: mean,
                        baseline_stddev: stddev,
                    },
                });
            }
        }

        (findings, stats)
    }

    fn check_viewer_ratio(&self, distinct_voters: usize, samples: &[ViewerSample]) -> Option<AnomalyFinding> {
        let peak = samples.iter().map(|s| s.viewers).max()?;
        if peak == 0 {
            log::warn!("Viewer series peaks at zero; skipping viewer ratio check");
            return None;
        }
        let threshold = self.config.viewer_ratio_threshold;
        if (distinct_voters as f64) <= threshold * peak as f64 {
            return None;
        }
        Some(AnomalyFinding {
            kind: AnomalyKind::ViewerRatio,
            subject: Subject::Stream,
            severity_score: distinct_voters as f64 / peak as f64,
            evidence: Evidence::ViewerRatio {
                distinct_voters,
                peak_viewers: peak,
                threshold,
            },
        })
    }
}

fn author_subject(history: &AuthorVoteHistory) -> Subject {
    Subject::Author {
        author_id: history.author_id.clone(),
    }
}

/// Longest run of same-choice votes each within `window` seconds of the previous
///
/// Returns (start index, length); earliest run wins ties.
fn longest_repeat_run(votes: &[VoteRecord], window: f64) -> Option<(usize, usize)> {
    if votes.is_empty() {
        return None;
    }
    let mut best = (0, 1);
    let mut start = 0;
    for i in 1..votes.len() {
        let prev = &votes[i - 1];
        let cur = &votes[i];
        if cur.choice != prev.choice || cur.timestamp - prev.timestamp > window {
            start = i;
        }
        let len = i - start + 1;
        if len > best.1 {
            best = (start, len);
        }
    }
    Some(best)
}

/// Population mean and standard deviation
fn mean_and_stddev(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn sort_findings(findings: &mut [AnomalyFinding]) {
    findings.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| {
                b.severity_score
                    .partial_cmp(&a.severity_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.subject.cmp(&b.subject))
    });
}
