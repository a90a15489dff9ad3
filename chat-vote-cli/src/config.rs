//! Configuration loading and validation

use anyhow::{Context, Result};
use chat_vote_audit::config::DEFAULT_TOLERANCE_SECONDS;
use chat_vote_audit::{AnalysisConfig, CaptureConfig, MergeConfig, SourceInput, SourceSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub merge: MergeSection,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// One capture source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub tag: String,
    /// Lower is more reliable
    #[serde(default)]
    pub priority: i32,
    pub tolerance_seconds: Option<f64>,
    #[serde(default)]
    pub kind: SourceKind,
    /// Raw export written by the external scraper
    pub input: PathBuf,
    /// Per-source record log
    pub log: PathBuf,
    /// Messages per poll for replay sources
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    200
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Follow a file that is still being written
    #[default]
    Tail,
    /// Page through a finished export
    Replay,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MergeSection {
    #[serde(default = "default_tolerance")]
    pub default_tolerance_seconds: f64,
    /// Where the canonical log is written
    #[serde(default = "default_merge_output")]
    pub output: PathBuf,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE_SECONDS
}

fn default_merge_output() -> PathBuf {
    PathBuf::from("canonical.jsonl")
}

impl Default for MergeSection {
    fn default() -> Self {
        Self {
            default_tolerance_seconds: default_tolerance(),
            output: default_merge_output(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    pub output_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Txt,
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
}

/// Problems found after parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Source tag '{0}' is configured more than once")]
    DuplicateTag(String),

    #[error("Source '{tag}' has a negative tolerance ({value})")]
    NegativeTolerance { tag: String, value: f64 },

    #[error("Default tolerance must be non-negative, got {0}")]
    NegativeDefaultTolerance(f64),

    #[error("Source '{0}' has an empty tag")]
    EmptyTag(String),

    #[error("Invalid analysis settings: {0}")]
    Analysis(#[from] chat_vote_audit::AuditError),
}

impl AppConfig {
    /// Check settings that parse but cannot be used
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.tag.trim().is_empty() {
                return Err(ConfigError::EmptyTag(source.input.display().to_string()));
            }
            if !seen.insert(source.tag.as_str()) {
                return Err(ConfigError::DuplicateTag(source.tag.clone()));
            }
            if let Some(value) = source.tolerance_seconds {
                if value < 0.0 {
                    return Err(ConfigError::NegativeTolerance {
                        tag: source.tag.clone(),
                        value,
                    });
                }
            }
        }
        if self.merge.default_tolerance_seconds < 0.0 {
            return Err(ConfigError::NegativeDefaultTolerance(
                self.merge.default_tolerance_seconds,
            ));
        }
        self.analysis.validate()?;
        Ok(())
    }

    /// Merge settings for the configured sources
    pub fn merge_config(&self) -> MergeConfig {
        self.sources
            .iter()
            .fold(
                MergeConfig::new().with_default_tolerance(self.merge.default_tolerance_seconds),
                |config, source| {
                    let spec = SourceSpec::new(source.tag.clone(), source.priority);
                    let spec = match source.tolerance_seconds {
                        Some(seconds) => spec.with_tolerance(seconds),
                        None => spec.with_tolerance(self.merge.default_tolerance_seconds),
                    };
                    config.add_source(spec)
                },
            )
    }

    /// Per-source logs to merge
    pub fn merge_inputs(&self) -> Vec<SourceInput> {
        self.sources
            .iter()
            .map(|s| SourceInput::new(s.tag.clone(), s.log.clone()))
            .collect()
    }

    pub fn source(&self, tag: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.tag == tag)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_vote_audit::GrammarConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
        [[sources]]
        tag = "innertube"
        priority = 0
        input = "raw/innertube.jsonl"
        log = "logs/innertube.jsonl"

        [[sources]]
        tag = "chatdl"
        priority = 1
        tolerance_seconds = 5.0
        kind = "replay"
        input = "raw/chatdl.json"
        log = "logs/chatdl.jsonl"
        page_size = 50

        [merge]
        output = "logs/canonical.jsonl"

        [capture]
        poll_interval_ms = 2000
        time_limit_secs = 600

        [analysis]
        bin_widths = [10, 60]

        [analysis.grammar]
        kind = "prefix"
        tokens = ["1", "2", "3"]

        [analysis.detector]
        burst_k = 2.5

        [output]
        format = "json"
    "#;

    #[test]
    fn test_config_deserialization() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].kind, SourceKind::Tail);
        assert_eq!(config.sources[0].page_size, 200);
        assert_eq!(config.sources[1].kind, SourceKind::Replay);
        assert_eq!(config.merge.default_tolerance_seconds, 3.0);
        assert_eq!(config.capture.poll_interval_ms, 2000);
        assert_eq!(config.capture.time_limit_secs, Some(600));
        assert_eq!(config.capture.max_consecutive_failures, 10);
        assert_eq!(config.analysis.bin_widths, vec![10, 60]);
        assert_eq!(config.analysis.detector.burst_k, 2.5);
        assert_eq!(config.analysis.detector.burst_window, 6);
        assert!(matches!(config.analysis.grammar, GrammarConfig::Prefix { .. }));
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_config_from_sources() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        let merge = config.merge_config();
        assert_eq!(merge.priority_of("innertube"), 0);
        assert_eq!(merge.tolerance_of("innertube"), 3.0);
        assert_eq!(merge.tolerance_of("chatdl"), 5.0);
        assert_eq!(config.merge_inputs()[1].path, PathBuf::from("logs/chatdl.jsonl"));
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let toml_content = r#"
            [[sources]]
            tag = "a"
            input = "a.json"
            log = "a.jsonl"

            [[sources]]
            tag = "a"
            input = "b.json"
            log = "b.jsonl"
        "#;
        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateTag(_))));
    }

    #[test]
    fn test_load_config_validates() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[analysis]\nbin_widths = [0]").unwrap();
        file.flush().unwrap();
        assert!(load_config(file.path()).is_err());

        let mut empty = NamedTempFile::new().unwrap();
        writeln!(empty).unwrap();
        let config = load_config(empty.path()).unwrap();
        assert!(config.sources.is_empty());
        assert_eq!(config.output.format, OutputFormat::Txt);
    }
}
