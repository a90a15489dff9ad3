//! Multi-source merge engine
//!
//! Combines any number of per-source record logs (partial, empty or missing)
//! into one canonical, time-ordered, duplicate-free log.
//!
//! # Algorithm
//!
//! 1. Every input record is decomposed into observations: a per-source record
//!    is one sighting by its source, a canonical record contributes the
//!    sightings it was merged from. Identical sightings (same source, author,
//!    text, timestamp, sequence hint and message id) are re-emissions and
//!    collapse to one.
//! 2. Sightings are ordered by timestamp, then source priority, then content.
//! 3. Two sightings match when author and normalised text are equal, they come
//!    from different sources, and their timestamps differ by at most the
//!    larger of the two sources' tolerances.
//! 4. Connected components of the match relation are computed, so chained
//!    offsets (A~B, B~C, A!~C) still end up together.
//! 5. A component where one source saw several distinct messages (rapid
//!    repeats) is split: sightings are visited in order and join the first
//!    open cluster that lacks their source and holds a matching sighting.
//! 6. Each cluster emits one record with the earliest timestamp, details from
//!    the most reliable sighting, and the union of sources.
//!
//! Because canonical records keep their sightings, merging a merged log (on
//! its own or together with the logs it came from) reproduces it exactly.

use crate::config::MergeConfig;
use crate::formats::record_log::{read_log, LoadStats};
use crate::types::{AuditError, EventRecord, Observation, Result, Timestamp};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// One input log, already loaded
#[derive(Debug, Clone)]
pub struct SourceLog {
    /// Tag applied to records that carry none
    pub tag: String,
    pub records: Vec<EventRecord>,
}

impl SourceLog {
    pub fn new(tag: impl Into<String>, records: Vec<EventRecord>) -> Self {
        Self {
            tag: tag.into(),
            records,
        }
    }
}

/// Where an input log lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInput {
    pub tag: String,
    pub path: PathBuf,
}

impl SourceInput {
    pub fn new(tag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            path: path.into(),
        }
    }
}

/// Load outcome of one input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub tag: String,
    pub path: PathBuf,
    /// False when the log was missing or unreadable
    pub available: bool,
    pub stats: LoadStats,
}

/// Counters describing one merge run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub sources: Vec<SourceReport>,
    /// Sightings read from all inputs
    pub observations_in: usize,
    /// Identical sightings dropped
    pub reemissions_collapsed: usize,
    /// Clusters built from more than one sighting
    pub clusters_merged: usize,
    /// Canonical records emitted
    pub records_out: usize,
}

impl MergeReport {
    /// Tags whose logs could not be read
    pub fn missing_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|s| !s.available)
            .map(|s| s.tag.as_str())
            .collect()
    }

    /// Sightings folded into another record (re-emissions included)
    pub fn duplicates_removed(&self) -> usize {
        self.observations_in.saturating_sub(self.records_out)
    }
}

/// Result of a merge: the canonical log and its report
#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    pub records: Vec<EventRecord>,
    pub report: MergeReport,
}

/// A sighting plus the record it came from
struct Sighting<'a> {
    obs: Observation,
    priority: i32,
    tolerance: f64,
    author_id: &'a str,
    text: &'a str,
    record: &'a EventRecord,
}

impl Sighting<'_> {
    fn order(&self, other: &Self) -> Ordering {
        self.obs
            .timestamp
            .total_cmp(&other.obs.timestamp)
            .then(self.priority.cmp(&other.priority))
            .then_with(|| self.obs.source.cmp(&other.obs.source))
            .then_with(|| self.author_id.cmp(other.author_id))
            .then_with(|| self.text.cmp(other.text))
            .then_with(|| self.obs.sequence_hint.cmp(&other.obs.sequence_hint))
            .then_with(|| self.obs.message_id.cmp(&other.obs.message_id))
    }

    fn is_reemission_of(&self, other: &Self) -> bool {
        self.order(other) == Ordering::Equal
    }

    fn matches(&self, other: &Self) -> bool {
        self.obs.source != other.obs.source
            && self.author_id == other.author_id
            && self.text == other.text
            && (self.obs.timestamp - other.obs.timestamp).abs()
                <= self.tolerance.max(other.tolerance)
    }
}

/// Union-find over sighting indices
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Keep the smaller index as root so component order follows sighting order
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// The merge engine - stateless apart from its configuration
pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    /// Create a merge engine
    pub fn new(config: MergeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Load the given logs from disk and merge them
    ///
    /// Logs that are missing or unreadable are reported and contribute nothing.
    pub fn merge_files(&self, inputs: &[SourceInput]) -> MergeOutput {
        let mut logs = Vec::new();
        let mut reports = Vec::new();

        for input in inputs {
            match load_source(&input.path) {
                Ok((records, stats)) => {
                    reports.push(SourceReport {
                        tag: input.tag.clone(),
                        path: input.path.clone(),
                        available: true,
                        stats,
                    });
                    logs.push(SourceLog::new(input.tag.clone(), records));
                }
                Err(e) => {
                    log::warn!("Source '{}' contributes nothing: {}", input.tag, e);
                    reports.push(SourceReport {
                        tag: input.tag.clone(),
                        path: input.path.clone(),
                        available: false,
                        stats: LoadStats::default(),
                    });
                }
            }
        }

        let mut output = self.merge(&logs);
        output.report.sources = reports;
        output
    }

    /// Merge already-loaded logs into a canonical log
    pub fn merge(&self, logs: &[SourceLog]) -> MergeOutput {
        let mut report = MergeReport::default();

        let mut sightings = self.collect_sightings(logs);
        report.observations_in = sightings.len();

        sightings.sort_by(|a, b| a.order(b));
        sightings.dedup_by(|later, earlier| later.is_reemission_of(earlier));
        report.reemissions_collapsed = report.observations_in - sightings.len();
        if report.reemissions_collapsed > 0 {
            log::debug!("Collapsed {} re-emitted sightings", report.reemissions_collapsed);
        }

        let clusters = self.cluster(&sightings);
        report.clusters_merged = clusters.iter().filter(|c| c.len() > 1).count();

        let mut records: Vec<EventRecord> = clusters
            .iter()
            .map(|members| self.emit(&sightings, members))
            .collect();
        records.sort_by(|a, b| self.output_order(a, b));
        report.records_out = records.len();

        log::info!(
            "Merged {} logs: {} sightings -> {} records ({} re-emissions, {} merged clusters)",
            logs.len(),
            report.observations_in,
            report.records_out,
            report.reemissions_collapsed,
            report.clusters_merged
        );

        MergeOutput { records, report }
    }

    fn collect_sightings<'a>(&self, logs: &'a [SourceLog]) -> Vec<Sighting<'a>> {
        let mut sightings = Vec::new();
        for log in logs {
            for record in &log.records {
                for obs in record.sightings(&log.tag) {
                    sightings.push(Sighting {
                        priority: self.config.priority_of(&obs.source),
                        tolerance: self.config.tolerance_of(&obs.source),
                        author_id: &record.author_id,
                        text: record.normalized_text(),
                        record,
                        obs,
                    });
                }
            }
        }
        sightings
    }

    /// Group sorted sightings into clusters of the same logical event
    fn cluster(&self, sightings: &[Sighting<'_>]) -> Vec<Vec<usize>> {
        let max_tolerance = sightings
            .iter()
            .map(|s| s.tolerance)
            .fold(0.0_f64, f64::max);

        let mut by_key: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
        for (idx, s) in sightings.iter().enumerate() {
            by_key.entry((s.author_id, s.text)).or_default().push(idx);
        }

        let mut sets = DisjointSet::new(sightings.len());
        for members in by_key.values() {
            for (pos, &i) in members.iter().enumerate() {
                for &j in &members[pos + 1..] {
                    if sightings[j].obs.timestamp - sightings[i].obs.timestamp > max_tolerance {
                        break;
                    }
                    if sightings[i].matches(&sightings[j]) {
                        sets.union(i, j);
                    }
                }
            }
        }

        // components keyed by root, members kept in sighting order
        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for idx in 0..sightings.len() {
            let root = sets.find(idx);
            components.entry(root).or_default().push(idx);
        }
        let mut roots: Vec<usize> = components.keys().copied().collect();
        roots.sort_unstable();

        let mut clusters = Vec::with_capacity(roots.len());
        for root in roots {
            let members = &components[&root];
            if members.len() == 1 {
                clusters.push(members.clone());
            } else {
                clusters.extend(split_component(sightings, members));
            }
        }
        clusters
    }

    /// Build the canonical record for a cluster
    fn emit(&self, sightings: &[Sighting<'_>], members: &[usize]) -> EventRecord {
        let earliest = &sightings[members[0]];
        let representative = members
            .iter()
            .map(|&i| &sightings[i])
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.obs.source.cmp(&b.obs.source))
                    .then_with(|| a.order(b))
            })
            .unwrap_or(earliest);

        // ordered by (priority, tag)
        let sources: BTreeSet<(i32, &str)> = members
            .iter()
            .map(|&i| (sightings[i].priority, sightings[i].obs.source.as_str()))
            .collect();

        let base = representative.record;
        EventRecord {
            author_id: base.author_id.clone(),
            author_name: base.author_name.clone(),
            timestamp: earliest.obs.timestamp,
            text: base.text.clone(),
            sources: sources.into_iter().map(|(_, tag)| tag.to_string()).collect(),
            sequence_hint: representative.obs.sequence_hint,
            message_id: representative.obs.message_id.clone(),
            paid_amount: base.paid_amount.clone(),
            video_offset_ms: base.video_offset_ms,
            observations: members.iter().map(|&i| sightings[i].obs.clone()).collect(),
        }
    }

    fn output_order(&self, a: &EventRecord, b: &EventRecord) -> Ordering {
        let best = |r: &EventRecord| {
            r.sources
                .iter()
                .map(|s| self.config.priority_of(s))
                .min()
                .unwrap_or(self.config.default_priority)
        };
        a.timestamp
            .total_cmp(&b.timestamp)
            .then_with(|| best(a).cmp(&best(b)))
            .then_with(|| a.author_id.cmp(&b.author_id))
            .then_with(|| a.normalized_text().cmp(b.normalized_text()))
            .then_with(|| a.sources.cmp(&b.sources))
            .then_with(|| a.sequence_hint.cmp(&b.sequence_hint))
            .then_with(|| a.message_id.cmp(&b.message_id))
    }
}

/// Split a connected component so no cluster holds two sightings from one source
fn split_component(sightings: &[Sighting<'_>], members: &[usize]) -> Vec<Vec<usize>> {
    let mut clusters: Vec<(Vec<usize>, BTreeSet<&str>)> = Vec::new();

    for &m in members {
        let candidate = &sightings[m];
        let slot = clusters.iter().position(|(cluster, sources)| {
            !sources.contains(candidate.obs.source.as_str())
                && cluster.iter().any(|&c| sightings[c].matches(candidate))
        });
        match slot {
            Some(pos) => {
                clusters[pos].0.push(m);
                clusters[pos].1.insert(candidate.obs.source.as_str());
            }
            None => {
                let mut sources = BTreeSet::new();
                sources.insert(candidate.obs.source.as_str());
                clusters.push((vec![m], sources));
            }
        }
    }

    if clusters.len() > 1 {
        log::debug!(
            "Split component of {} sightings for author '{}' into {} events",
            members.len(),
            sightings[members[0]].author_id,
            clusters.len()
        );
    }

    clusters.into_iter().map(|(cluster, _)| cluster).collect()
}

fn load_source(path: &Path) -> Result<(Vec<EventRecord>, LoadStats)> {
    let load = read_log(path).map_err(|e| {
        if !matches!(e, AuditError::SourceUnavailable(_)) {
            log::error!("Failed to read {:?}: {}", path, e);
        }
        e
    })?;
    Ok((load.records, load.stats))
}

/// Earliest and latest timestamps of a canonical log
pub fn time_span(records: &[EventRecord]) -> Option<(Timestamp, Timestamp)> {
    let first = records.iter().map(|r| r.timestamp).min_by(|a, b| a.total_cmp(b))?;
    let last = records.iter().map(|r| r.timestamp).max_by(|a, b| a.total_cmp(b))?;
    Some((first, last))
}
