//! Chat Vote Audit CLI Application
//!
//! This is the command-line interface for the chat vote audit pipeline.
//! It uses the chat-vote-audit library and adds:
//! - TOML configuration of sources, merge, capture and analysis settings
//! - Concurrent capture with an operator interrupt (Ctrl-C)
//! - Parallel import of raw chat exports
//! - Report rendering (TXT/JSON)

use anyhow::{bail, Context, Result};
use chat_vote_audit::formats::read_raw_export;
use chat_vote_audit::{
    analyze, read_log, read_viewer_series, write_log, CaptureAdapter, CaptureRunner, ChatSource,
    MergeEngine, ReplaySource, SourceInput, SourceSpec, StopSignal, TailSource, ViewerSample,
};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod config;
mod report;

use config::{AppConfig, OutputFormat, SourceKind};

/// Chat Vote Audit - capture, merge and audit votes cast in live chat
#[derive(Parser, Debug)]
#[command(name = "chat-vote-cli")]
#[command(about = "Capture, merge and audit text votes cast in a live chat", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture chat from the configured sources until stopped (Ctrl-C)
    Capture {
        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        time_limit: Option<u64>,

        /// Only capture these source tags (can be repeated)
        #[arg(long = "source", value_name = "TAG")]
        sources: Vec<String>,

        /// Merge the per-source logs into the canonical log once capture ends
        #[arg(long)]
        merge: bool,
    },

    /// Normalise raw chat exports into per-source record logs
    Import {
        /// Raw exports as TAG=FILE (default: configured sources)
        #[arg(value_name = "TAG=FILE")]
        inputs: Vec<String>,

        /// Directory for the record logs (default: configured log paths)
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Merge per-source record logs into one canonical log
    Merge {
        /// Record logs as TAG=FILE (default: configured sources)
        #[arg(value_name = "TAG=FILE")]
        inputs: Vec<String>,

        /// Canonical log to write (default: [merge].output)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Tolerance in seconds for sources without configuration
        #[arg(long, value_name = "SECS")]
        tolerance: Option<f64>,
    },

    /// Analyse a canonical log and print a report
    Analyze {
        /// Canonical log (default: [merge].output)
        #[arg(value_name = "FILE")]
        log: Option<PathBuf>,

        /// Viewer-count series, one {"timestamp", "viewers"} object per line
        #[arg(long, value_name = "FILE", conflicts_with = "viewer_estimate")]
        viewers: Option<PathBuf>,

        /// Single concurrent-viewer estimate
        #[arg(long, value_name = "COUNT")]
        viewer_estimate: Option<u64>,

        /// Report format (default: [output].format)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Report file (default: [output].output_dir or stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Chat Vote Audit CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using audit library v{}", chat_vote_audit::VERSION);

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    match args.command {
        Command::Capture {
            time_limit,
            sources,
            merge,
        } => {
            capture_mode(&config, time_limit, &sources)?;
            if merge {
                merge_mode(&config, &[], None, None)?;
            }
            Ok(())
        }
        Command::Import { inputs, output_dir } => import_mode(&config, &inputs, output_dir.as_deref()),
        Command::Merge {
            inputs,
            output,
            tolerance,
        } => merge_mode(&config, &inputs, output, tolerance),
        Command::Analyze {
            log,
            viewers,
            viewer_estimate,
            format,
            output,
        } => analyze_mode(&config, log, viewers, viewer_estimate, format, output),
    }
}

/// Capture mode - one adapter thread per configured source
fn capture_mode(config: &AppConfig, time_limit: Option<u64>, only: &[String]) -> Result<()> {
    if config.sources.is_empty() {
        bail!("No sources configured; pass --config with [[sources]] entries");
    }
    for tag in only {
        if config.source(tag).is_none() {
            bail!("Unknown source tag: {}", tag);
        }
    }

    let mut capture = config.capture.clone();
    if let Some(secs) = time_limit {
        capture = capture.with_time_limit(Duration::from_secs(secs));
    }

    let stop = StopSignal::new();
    let mut runner = CaptureRunner::new(stop.clone());
    for source in &config.sources {
        if !only.is_empty() && !only.contains(&source.tag) {
            continue;
        }
        let chat_source: Box<dyn ChatSource> = match source.kind {
            SourceKind::Tail => Box::new(TailSource::new(source.tag.clone(), source.input.clone())),
            SourceKind::Replay => Box::new(ReplaySource::open(
                source.tag.clone(),
                source.input.clone(),
                source.page_size,
            )),
        };
        runner.add_adapter(CaptureAdapter::new(chat_source, source.log.clone(), capture.clone()));
    }

    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupt received, stopping capture...");
        stop.stop();
    }) {
        log::warn!("Ctrl-C handler not installed ({}); capture stops at its time limit", e);
    }

    let summaries = runner.run();
    println!("{}", report::render_capture_text(&summaries));

    if summaries.iter().all(|s| !s.status.is_clean()) {
        bail!("Every capture adapter failed");
    }
    Ok(())
}

/// Import mode - normalise raw exports in parallel
fn import_mode(config: &AppConfig, inputs: &[String], output_dir: Option<&Path>) -> Result<()> {
    let jobs: Vec<(String, PathBuf, PathBuf)> = if inputs.is_empty() {
        config
            .sources
            .iter()
            .map(|s| {
                let log = match output_dir {
                    Some(dir) => dir.join(format!("{}.jsonl", s.tag)),
                    None => s.log.clone(),
                };
                (s.tag.clone(), s.input.clone(), log)
            })
            .collect()
    } else {
        let dir = output_dir.unwrap_or_else(|| Path::new("."));
        inputs
            .iter()
            .map(|spec| {
                let (tag, path) = parse_tagged(spec)?;
                let log = dir.join(format!("{}.jsonl", tag));
                Ok((tag, path, log))
            })
            .collect::<Result<_>>()?
    };
    if jobs.is_empty() {
        bail!("Nothing to import; pass TAG=FILE arguments or configure sources");
    }

    let results: Vec<Result<(String, usize, usize)>> = jobs
        .par_iter()
        .map(|(tag, input, log)| {
            let import = read_raw_export(input, tag)
                .with_context(|| format!("Failed to read raw export {:?}", input))?;
            write_log(log, &import.records)
                .with_context(|| format!("Failed to write record log {:?}", log))?;
            Ok((tag.clone(), import.records.len(), import.unparseable + import.skipped))
        })
        .collect();

    let mut failures = 0;
    for result in results {
        match result {
            Ok((tag, records, dropped)) => {
                println!("  {:<12} {:6} records ({} entries dropped)", tag, records, dropped)
            }
            Err(e) => {
                failures += 1;
                log::error!("{:#}", e);
            }
        }
    }
    if failures == jobs.len() {
        bail!("No export could be imported");
    }
    Ok(())
}

/// Merge mode - reconcile per-source logs into the canonical log
fn merge_mode(
    config: &AppConfig,
    inputs: &[String],
    output: Option<PathBuf>,
    tolerance: Option<f64>,
) -> Result<()> {
    let mut merge_config = config.merge_config();
    if let Some(seconds) = tolerance {
        merge_config = merge_config.with_default_tolerance(seconds);
    }

    let sources: Vec<SourceInput> = if inputs.is_empty() {
        config.merge_inputs()
    } else {
        inputs
            .iter()
            .map(|spec| parse_tagged(spec).map(|(tag, path)| SourceInput::new(tag, path)))
            .collect::<Result<_>>()?
    };
    if sources.is_empty() {
        bail!("Nothing to merge; pass TAG=FILE arguments or configure sources");
    }

    // unconfigured tags merge with the least priority, in argument order
    for (offset, source) in sources.iter().enumerate() {
        if merge_config.source(&source.tag).is_none() {
            let tolerance = merge_config.default_tolerance_seconds;
            let priority = config.sources.len() as i32 + offset as i32;
            merge_config = merge_config
                .add_source(SourceSpec::new(source.tag.clone(), priority).with_tolerance(tolerance));
        }
    }

    let engine = MergeEngine::new(merge_config).context("Invalid merge configuration")?;
    let merged = engine.merge_files(&sources);
    if merged.report.missing_sources().len() == sources.len() {
        log::warn!("No source log could be read; writing an empty canonical log");
    }

    let output = output.unwrap_or_else(|| config.merge.output.clone());
    write_log(&output, &merged.records)
        .with_context(|| format!("Failed to write canonical log {:?}", output))?;

    println!("{}", report::render_merge_text(&merged.report));
    println!("Canonical log written to {:?}", output);
    Ok(())
}

/// Analyze mode - run the analysis and render the report
fn analyze_mode(
    config: &AppConfig,
    log_path: Option<PathBuf>,
    viewers: Option<PathBuf>,
    viewer_estimate: Option<u64>,
    format: Option<OutputFormat>,
    output: Option<PathBuf>,
) -> Result<()> {
    let log_path = log_path.unwrap_or_else(|| config.merge.output.clone());
    let load = read_log(&log_path).with_context(|| format!("Failed to read log {:?}", log_path))?;
    if load.stats.malformed > 0 || load.stats.schema_mismatches > 0 {
        log::warn!(
            "Skipped {} malformed and {} mismatched lines in {:?}",
            load.stats.malformed,
            load.stats.schema_mismatches,
            log_path
        );
    }

    let series: Option<Vec<ViewerSample>> = match (viewers, viewer_estimate) {
        (Some(path), _) => Some(
            read_viewer_series(&path)
                .with_context(|| format!("Failed to read viewer series {:?}", path))?,
        ),
        (None, Some(viewers)) => Some(vec![ViewerSample {
            timestamp: 0.0,
            viewers,
        }]),
        (None, None) => None,
    };

    let analysis = analyze(&load.records, &config.analysis, series.as_deref())
        .context("Analysis failed")?;

    let format = format.unwrap_or(config.output.format);
    let rendered = match format {
        OutputFormat::Txt => report::render_text(&analysis),
        OutputFormat::Json => report::render_json(&analysis)?,
    };

    let destination = output.or_else(|| {
        config.output.output_dir.as_ref().map(|dir| {
            let ext = match format {
                OutputFormat::Txt => "txt",
                OutputFormat::Json => "json",
            };
            dir.join(format!("vote_report.{}", ext))
        })
    });

    match destination {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write report {:?}", path))?;
            println!("Report written to {:?}", path);
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

/// Split a `TAG=FILE` argument; a bare FILE is tagged with its file stem
fn parse_tagged(spec: &str) -> Result<(String, PathBuf)> {
    let (tag, path) = match spec.split_once('=') {
        Some((tag, path)) => (tag.trim().to_string(), PathBuf::from(path)),
        None => {
            let path = PathBuf::from(spec);
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            (stem, path)
        }
    };
    if tag.is_empty() {
        bail!("Missing source tag in '{}'", spec);
    }
    Ok((tag, path))
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged() {
        let (tag, path) = parse_tagged("innertube=raw/live.jsonl").unwrap();
        assert_eq!(tag, "innertube");
        assert_eq!(path, PathBuf::from("raw/live.jsonl"));

        let (tag, _) = parse_tagged("logs/chatdl.jsonl").unwrap();
        assert_eq!(tag, "chatdl");

        assert!(parse_tagged("=raw.json").is_err());
    }

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from([
            "chat-vote-cli",
            "-v",
            "merge",
            "a=logs/a.jsonl",
            "b=logs/b.jsonl",
            "--output",
            "canonical.jsonl",
        ])
        .unwrap();
        assert_eq!(args.verbose, 1);
        match args.command {
            Command::Merge { inputs, output, .. } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(output, Some(PathBuf::from("canonical.jsonl")));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = Args::try_parse_from(["chat-vote-cli", "analyze", "log.jsonl", "--format", "json"]).unwrap();
        assert!(matches!(args.command, Command::Analyze { format: Some(OutputFormat::Json), .. }));
    }

    #[test]
    fn test_import_and_merge_modes() {
        let dir = tempfile::TempDir::new().unwrap();
        let raw_a = dir.path().join("a.json");
        let raw_b = dir.path().join("b.json");
        std::fs::write(&raw_a, "{\"author\": \"alice\", \"timestamp\": 100.0, \"message\": \"1\"}\n").unwrap();
        std::fs::write(&raw_b, "{\"author\": \"alice\", \"timestamp\": 101.0, \"message\": \"1\"}\n").unwrap();

        let logs = dir.path().join("logs");
        let inputs = vec![
            format!("a={}", raw_a.display()),
            format!("b={}", raw_b.display()),
        ];
        import_mode(&AppConfig::default(), &inputs, Some(&logs)).unwrap();
        assert_eq!(read_log(&logs.join("a.jsonl")).unwrap().records.len(), 1);

        let canonical = dir.path().join("canonical.jsonl");
        let merge_inputs = vec![
            format!("a={}", logs.join("a.jsonl").display()),
            format!("b={}", logs.join("b.jsonl").display()),
        ];
        merge_mode(&AppConfig::default(), &merge_inputs, Some(canonical.clone()), None).unwrap();

        let merged = read_log(&canonical).unwrap();
        assert_eq!(merged.records.len(), 1);
        assert_eq!(merged.records[0].sources, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_capture_runs_healthy_sources_when_one_export_is_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let good_export = dir.path().join("good.json");
        std::fs::write(
            &good_export,
            concat!(
                "{\"author\": \"alice\", \"timestamp\": 100.0, \"message\": \"1\"}\n",
                "{\"author\": \"bob\", \"timestamp\": 101.0, \"message\": \"2\"}\n",
            ),
        )
        .unwrap();

        let toml_content = format!(
            r#"
            [[sources]]
            tag = "good"
            kind = "replay"
            input = "{good_in}"
            log = "{good_log}"

            [[sources]]
            tag = "bad"
            priority = 1
            kind = "replay"
            input = "{bad_in}"
            log = "{bad_log}"

            [merge]
            output = "{canonical}"

            [capture]
            poll_interval_ms = 5
            "#,
            good_in = good_export.display(),
            good_log = dir.path().join("good.jsonl").display(),
            bad_in = dir.path().join("missing.json").display(),
            bad_log = dir.path().join("bad.jsonl").display(),
            canonical = dir.path().join("canonical.jsonl").display(),
        );
        let config: AppConfig = toml::from_str(&toml_content).unwrap();

        capture_mode(&config, Some(5), &[]).unwrap();
        let good = read_log(&dir.path().join("good.jsonl")).unwrap();
        assert_eq!(good.records.len(), 2);

        // the follow-up merge tolerates the source that never produced a log
        merge_mode(&config, &[], None, None).unwrap();
        let canonical = read_log(&dir.path().join("canonical.jsonl")).unwrap();
        assert_eq!(canonical.records.len(), 2);
        assert_eq!(canonical.records[0].author_id, "alice");
    }

    #[test]
    fn test_capture_merge_flag_parses() {
        let args = Args::try_parse_from(["chat-vote-cli", "capture", "--merge", "--time-limit", "60"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Capture { merge: true, time_limit: Some(60), .. }
        ));
    }
}
