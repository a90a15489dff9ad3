//! Library configuration types
//!
//! Every policy constant of the pipeline (dedup tolerance, source priorities,
//! capture cadence, burst window, spam thresholds, vote grammar) lives here as
//! explicit configuration with documented defaults. Callers needing a
//! different sensitivity change these values rather than the algorithms.

use crate::types::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default duplicate-timestamp tolerance in seconds
pub const DEFAULT_TOLERANCE_SECONDS: f64 = 3.0;

/// Merge settings for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Source tag as written into records
    pub tag: String,
    /// Lower value = more reliable; wins ties and supplies the canonical record
    #[serde(default)]
    pub priority: i32,
    /// Duplicate-timestamp tolerance for records from this source
    #[serde(default = "default_tolerance")]
    pub tolerance_seconds: f64,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE_SECONDS
}

impl SourceSpec {
    /// Create a source spec with the default tolerance
    pub fn new(tag: impl Into<String>, priority: i32) -> Self {
        Self {
            tag: tag.into(),
            priority,
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        }
    }

    /// Builder method: set the tolerance
    pub fn with_tolerance(mut self, seconds: f64) -> Self {
        self.tolerance_seconds = seconds;
        self
    }
}

/// Configuration for the merge engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Known sources in any order
    #[serde(default)]
    pub sources: Vec<SourceSpec>,

    /// Tolerance for sources not listed in `sources`
    #[serde(default = "default_tolerance")]
    pub default_tolerance_seconds: f64,

    /// Priority for sources not listed in `sources`
    #[serde(default = "default_unknown_priority")]
    pub default_priority: i32,
}

fn default_unknown_priority() -> i32 {
    i32::MAX
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            default_tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
            default_priority: default_unknown_priority(),
        }
    }
}

impl MergeConfig {
    /// Create a merge configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: register a source
    pub fn add_source(mut self, spec: SourceSpec) -> Self {
        self.sources.retain(|s| s.tag != spec.tag);
        self.sources.push(spec);
        self
    }

    /// Builder method: set the tolerance used for unlisted sources
    pub fn with_default_tolerance(mut self, seconds: f64) -> Self {
        self.default_tolerance_seconds = seconds;
        self
    }

    /// Look up a source by tag
    pub fn source(&self, tag: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.tag == tag)
    }

    /// Priority of a tag, or the default for unknown tags
    pub fn priority_of(&self, tag: &str) -> i32 {
        self.source(tag)
            .map(|s| s.priority)
            .unwrap_or(self.default_priority)
    }

    /// Tolerance of a tag, or the default for unknown tags
    pub fn tolerance_of(&self, tag: &str) -> f64 {
        self.source(tag)
            .map(|s| s.tolerance_seconds)
            .unwrap_or(self.default_tolerance_seconds)
    }

    /// Reject negative or non-finite tolerances and duplicate tags
    pub fn validate(&self) -> Result<()> {
        let tolerances = self
            .sources
            .iter()
            .map(|s| (s.tag.as_str(), s.tolerance_seconds))
            .chain(std::iter::once(("<default>", self.default_tolerance_seconds)));
        for (tag, tol) in tolerances {
            if !tol.is_finite() || tol < 0.0 {
                return Err(AuditError::InvalidConfig(format!(
                    "tolerance for source {} must be a non-negative number, got {}",
                    tag, tol
                )));
            }
        }
        for (i, spec) in self.sources.iter().enumerate() {
            if self.sources[..i].iter().any(|s| s.tag == spec.tag) {
                return Err(AuditError::InvalidConfig(format!(
                    "source {} listed twice",
                    spec.tag
                )));
            }
        }
        Ok(())
    }
}

/// Retry delays for transient source failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between attempts
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl BackoffConfig {
    /// Delay for a given consecutive failure number (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay_ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Configuration for a capture adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Pause between successful polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stop after this many seconds (None = until stopped or the source ends)
    #[serde(default)]
    pub time_limit_secs: Option<u64>,

    /// Consecutive transient failures tolerated before the adapter stops
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Retry delays
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_max_consecutive_failures() -> u32 {
    10
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            time_limit_secs: None,
            max_consecutive_failures: default_max_consecutive_failures(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Create a capture configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the time limit
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_secs = Some(limit.as_secs());
        self
    }

    /// Builder method: set the failure bound
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Builder method: set the backoff policy
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }
}

/// Vote grammar selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GrammarConfig {
    /// Whole normalised text equals one of the tokens
    Exact { tokens: Vec<String> },
    /// Text starts with a token followed by whitespace or end of text
    Prefix { tokens: Vec<String> },
    /// Regular expression; the first capture group (or whole match) is the choice
    Regex { pattern: String },
}

impl Default for GrammarConfig {
    fn default() -> Self {
        GrammarConfig::Exact {
            tokens: vec!["1".to_string(), "2".to_string(), "3".to_string()],
        }
    }
}

/// Thresholds for the anomaly detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Flag authors whose vote count exceeds this multiple of the median
    #[serde(default = "default_spam_multiple")]
    pub spam_multiple: f64,

    /// Minimum vote count before the multi-vote check applies
    #[serde(default = "default_min_spam_votes")]
    pub min_spam_votes: usize,

    /// Maximum gap between consecutive same-choice votes in a repeat run
    #[serde(default = "default_repeat_window")]
    pub repeat_window_seconds: f64,

    /// Shortest repeat run that is flagged; a run of exactly this length is a hit
    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: usize,

    /// Switch count from which an author is reported
    #[serde(default = "default_switch_threshold")]
    pub switch_threshold: usize,

    /// Number of preceding bins in the burst baseline
    #[serde(default = "default_burst_window")]
    pub burst_window: usize,

    /// Standard deviations above the baseline mean that count as a burst
    #[serde(default = "default_burst_k")]
    pub burst_k: f64,

    /// Minimum votes in a bin before it can be flagged
    #[serde(default = "default_min_burst_votes")]
    pub min_burst_votes: usize,

    /// Flag when distinct voters exceed this multiple of peak viewers
    #[serde(default = "default_viewer_ratio_threshold")]
    pub viewer_ratio_threshold: f64,
}

fn default_spam_multiple() -> f64 {
    5.0
}

fn default_min_spam_votes() -> usize {
    3
}

fn default_repeat_window() -> f64 {
    10.0
}

fn default_repeat_threshold() -> usize {
    4
}

fn default_switch_threshold() -> usize {
    1
}

fn default_burst_window() -> usize {
    6
}

fn default_burst_k() -> f64 {
    3.0
}

fn default_min_burst_votes() -> usize {
    5
}

fn default_viewer_ratio_threshold() -> f64 {
    1.0
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            spam_multiple: default_spam_multiple(),
            min_spam_votes: default_min_spam_votes(),
            repeat_window_seconds: default_repeat_window(),
            repeat_threshold: default_repeat_threshold(),
            switch_threshold: default_switch_threshold(),
            burst_window: default_burst_window(),
            burst_k: default_burst_k(),
            min_burst_votes: default_min_burst_votes(),
            viewer_ratio_threshold: default_viewer_ratio_threshold(),
        }
    }
}

impl DetectorConfig {
    /// Builder method: set the burst baseline window and threshold
    pub fn with_burst(mut self, window: usize, k: f64) -> Self {
        self.burst_window = window;
        self.burst_k = k;
        self
    }

    /// Builder method: set the switch reporting threshold
    pub fn with_switch_threshold(mut self, threshold: usize) -> Self {
        self.switch_threshold = threshold;
        self
    }

    /// Builder method: set the repeat-spam rule
    pub fn with_repeat_rule(mut self, window_seconds: f64, threshold: usize) -> Self {
        self.repeat_window_seconds = window_seconds;
        self.repeat_threshold = threshold;
        self
    }
}

/// Complete analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Vote grammar
    #[serde(default)]
    pub grammar: GrammarConfig,

    /// Bin widths in seconds, one series per width
    #[serde(default = "default_bin_widths")]
    pub bin_widths: Vec<u64>,

    /// Anomaly thresholds
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Number of most active chatters listed in the summary
    #[serde(default = "default_top_chatters")]
    pub top_chatters: usize,
}

fn default_bin_widths() -> Vec<u64> {
    vec![10, 60, 300]
}

fn default_top_chatters() -> usize {
    5
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            grammar: GrammarConfig::default(),
            bin_widths: default_bin_widths(),
            detector: DetectorConfig::default(),
            top_chatters: default_top_chatters(),
        }
    }
}

impl AnalysisConfig {
    /// Create an analysis configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the grammar
    pub fn with_grammar(mut self, grammar: GrammarConfig) -> Self {
        self.grammar = grammar;
        self
    }

    /// Builder method: set the bin widths
    pub fn with_bin_widths(mut self, widths: Vec<u64>) -> Self {
        self.bin_widths = widths;
        self
    }

    /// Builder method: set the detector thresholds
    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    /// Reject settings the analysis cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bin_widths.iter().any(|w| *w == 0) {
            return Err(AuditError::InvalidConfig(
                "bin widths must be positive".to_string(),
            ));
        }
        if self.detector.burst_window == 0 {
            return Err(AuditError::InvalidConfig(
                "burst window must cover at least one bin".to_string(),
            ));
        }
        if !(self.detector.burst_k.is_finite() && self.detector.burst_k >= 0.0) {
            return Err(AuditError::InvalidConfig(format!(
                "burst k must be a non-negative number, got {}",
                self.detector.burst_k
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_config_builder() {
        let config = MergeConfig::new()
            .add_source(SourceSpec::new("innertube", 0))
            .add_source(SourceSpec::new("chatdl", 1).with_tolerance(5.0))
            .with_default_tolerance(2.0);

        assert_eq!(config.priority_of("innertube"), 0);
        assert_eq!(config.tolerance_of("chatdl"), 5.0);
        assert_eq!(config.tolerance_of("unknown"), 2.0);
        assert_eq!(config.priority_of("unknown"), i32::MAX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_config_rejects_negative_tolerance() {
        let config = MergeConfig::new().add_source(SourceSpec::new("a", 0).with_tolerance(-1.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_re_adding_source_replaces_it() {
        let config = MergeConfig::new()
            .add_source(SourceSpec::new("a", 0))
            .add_source(SourceSpec::new("a", 4));
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.priority_of("a"), 4);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for_attempt(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_grammar_config_deserialization() {
        let exact: GrammarConfig =
            serde_json::from_str(r#"{"kind":"exact","tokens":["A","B"]}"#).unwrap();
        assert_eq!(
            exact,
            GrammarConfig::Exact { tokens: vec!["A".into(), "B".into()] }
        );

        let regex: GrammarConfig =
            serde_json::from_str(r#"{"kind":"regex","pattern":"^([123])$"}"#).unwrap();
        assert!(matches!(regex, GrammarConfig::Regex { .. }));
    }

    #[test]
    fn test_analysis_defaults_and_validation() {
        let config = AnalysisConfig::new();
        assert_eq!(config.bin_widths, vec![10, 60, 300]);
        assert_eq!(config.detector.burst_window, 6);
        assert!(config.validate().is_ok());

        let bad = AnalysisConfig::new().with_bin_widths(vec![10, 0]);
        assert!(bad.validate().is_err());
    }
}
