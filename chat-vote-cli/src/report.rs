//! Report generation
//!
//! Renders the library's read-only results as plain text or JSON. Nothing
//! here feeds back into the analysis.

use anyhow::Result;
use chat_vote_audit::anomaly::{Evidence, Subject};
use chat_vote_audit::{AnalysisReport, CaptureSummary, MergeReport};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Width of the tally bars
const BAR_WIDTH: usize = 40;

/// Timestamps below this are offsets, not epoch seconds
const EPOCH_THRESHOLD: f64 = 1e9;

const RULE: &str = "══════════════════════════════════════════════════";

/// Human-readable time: UTC date for epoch seconds, plain seconds otherwise
pub fn format_time(ts: f64) -> String {
    if ts >= EPOCH_THRESHOLD {
        let secs = ts.floor() as i64;
        let nanos = ((ts - ts.floor()) * 1e9) as u32;
        if let Some(dt) = DateTime::<Utc>::from_timestamp(secs, nanos) {
            return dt.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        }
    }
    format!("{:.1}s", ts)
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// Render an analysis report as text
pub fn render_text(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let s = &report.summary;

    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  VOTE STATISTICS");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  Chat messages          : {}", s.total_messages);
    let _ = writeln!(out, "  Vote messages          : {}", s.vote_messages);
    let _ = writeln!(out, "  Distinct voters        : {}", s.distinct_voters);
    if let (Some(first), Some(last)) = (s.first_vote_at, s.last_vote_at) {
        let _ = writeln!(out, "  Voting window          : {} → {}", format_time(first), format_time(last));
    }
    let _ = writeln!(out, "  Duration               : {}", format_duration(s.duration_seconds));
    let _ = writeln!(out, "  Votes/min              : {:.1}", s.votes_per_minute);

    let _ = writeln!(out, "\n  --- FINAL RESULTS (last vote per person) ---");
    for row in &s.tally {
        let bar = "█".repeat((row.percent / 100.0 * BAR_WIDTH as f64) as usize);
        let _ = writeln!(out, "  Vote {}: {:5} ({:5.1}%)  {}", row.choice, row.votes, row.percent, bar);
    }
    match s.leaders.as_slice() {
        [] => {
            let _ = writeln!(out, "\n  No votes recorded");
        }
        [winner] => {
            let _ = writeln!(out, "\n  Leader: vote {}", winner);
        }
        tied => {
            let _ = writeln!(out, "\n  Tie between votes {}", tied.join(", "));
        }
    }

    let _ = writeln!(out, "\n  People who voted more than once : {}", s.multi_voters);
    let _ = writeln!(out, "  People who changed their vote   : {}", s.changers);
    let _ = writeln!(out, "  Median votes per person         : {:.1}", s.median_vote_count);

    if !s.changer_table.is_empty() {
        let _ = writeln!(out, "\n  --- VOTE CHANGES ---");
        for row in &s.changer_table {
            let _ = writeln!(
                out,
                "  {:<24} {:<30} ({} votes)",
                truncate(&row.author_name, 24),
                row.history,
                row.vote_count
            );
        }
    }

    if !s.top_chatters.is_empty() {
        let _ = writeln!(out, "\n  --- MOST ACTIVE CHATTERS ---");
        for row in &s.top_chatters {
            let _ = writeln!(out, "  {:<24} {:5} messages", truncate(&row.author_name, 24), row.messages);
        }
    }

    let _ = writeln!(out, "\n  --- ANOMALIES ({}) ---", report.findings.len());
    if report.findings.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for finding in &report.findings {
        let _ = writeln!(
            out,
            "  [{}] {} severity {:.2}: {}",
            finding.kind,
            describe_subject(&finding.subject),
            finding.severity_score,
            describe_evidence(&finding.evidence)
        );
    }

    if !report.burst_scans.is_empty() {
        let _ = writeln!(out, "\n  --- BURST SCAN ---");
        for scan in &report.burst_scans {
            let _ = writeln!(
                out,
                "  {:>4}s bins: {} scanned, {} evaluated, {} without enough history, {} flagged",
                scan.bin_width,
                scan.bins_scanned,
                scan.bins_evaluated,
                scan.insufficient_history,
                scan.bins_flagged
            );
        }
    }

    out
}

/// Render an analysis report as pretty-printed JSON
pub fn render_json(report: &AnalysisReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Render a merge report as text
pub fn render_merge_text(report: &MergeReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Merge summary");
    for source in &report.sources {
        if source.available {
            let _ = writeln!(
                out,
                "  {:<12} {:6} records  ({} malformed, {} schema mismatches{})",
                source.tag,
                source.stats.records,
                source.stats.malformed,
                source.stats.schema_mismatches,
                if source.stats.incomplete_tail { ", incomplete tail" } else { "" }
            );
        } else {
            let _ = writeln!(out, "  {:<12} missing ({:?})", source.tag, source.path);
        }
    }
    let _ = writeln!(out, "  Sightings in        : {}", report.observations_in);
    let _ = writeln!(out, "  Re-emissions        : {}", report.reemissions_collapsed);
    let _ = writeln!(out, "  Merged clusters     : {}", report.clusters_merged);
    let _ = writeln!(out, "  Canonical records   : {}", report.records_out);
    out
}

/// Render capture summaries as text
pub fn render_capture_text(summaries: &[CaptureSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Capture summary");
    for s in summaries {
        let _ = writeln!(
            out,
            "  {:<12} {:6} records in {:4} batches, {} transient failures, {:?}",
            s.tag, s.records_written, s.batches, s.transient_failures, s.status
        );
    }
    out
}

fn describe_subject(subject: &Subject) -> String {
    match subject {
        Subject::Bin { bin } => format!("{}s bin at {}", bin.width, format_time(bin.start as f64)),
        other => other.to_string(),
    }
}

fn describe_evidence(evidence: &Evidence) -> String {
    match evidence {
        Evidence::MultiVote {
            vote_count,
            median_vote_count,
        } => format!("{} votes (median {:.1})", vote_count, median_vote_count),
        Evidence::RepeatSpam {
            choice,
            run_length,
            first_at,
            last_at,
        } => format!(
            "{} × '{}' between {} and {}",
            run_length,
            choice,
            format_time(*first_at),
            format_time(*last_at)
        ),
        Evidence::VoteSwitching {
            switch_count,
            span_seconds,
            history,
        } => format!(
            "{} switches over {} ({})",
            switch_count,
            format_duration(*span_seconds),
            history.join(" → ")
        ),
        Evidence::TemporalBurst {
            vote_count,
            distinct_author_count,
            baseline_mean,
            baseline_stddev,
        } => format!(
            "{} votes from {} authors (baseline {:.1} ± {:.1})",
            vote_count, distinct_author_count, baseline_mean, baseline_stddev
        ),
        Evidence::ViewerRatio {
            distinct_voters,
            peak_viewers,
            threshold,
        } => format!(
            "{} voters vs {} peak viewers (threshold {:.2})",
            distinct_voters, peak_viewers, threshold
        ),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max.saturating_sub(1)).chain(std::iter::once('…')).collect()
    }
}
