// End-to-end tests: raw exports -> capture -> merge -> analysis
use chat_vote_audit::anomaly::AnomalyKind;
use chat_vote_audit::{
    analyze, read_log, write_log, AdapterStatus, AnalysisConfig, CaptureAdapter, CaptureConfig,
    CaptureRunner, ChatSource, EventRecord, MergeConfig, MergeEngine, ReplaySource, SourceError,
    SourceInput, SourceLog, SourcePoll, SourceSpec, StopSignal, ViewerSample,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn flat(author_id: &str, name: &str, ts: f64, text: &str) -> String {
    format!(
        "{{\"author\": {{\"name\": \"{}\", \"id\": \"{}\"}}, \"timestamp\": {:.1}, \"message\": \"{}\"}}\n",
        name, author_id, ts, text
    )
}

fn write_export(path: &Path, lines: &[String]) {
    std::fs::write(path, lines.concat()).unwrap();
}

fn merge_config() -> MergeConfig {
    MergeConfig::new()
        .add_source(SourceSpec::new("innertube", 0))
        .add_source(SourceSpec::new("chatdl", 1))
        .add_source(SourceSpec::new("ytdlp", 2))
}

fn capture_config() -> CaptureConfig {
    CaptureConfig::new().with_poll_interval(Duration::from_millis(1))
}

/// Capture two overlapping exports and return the per-source log paths
fn capture_scenario(dir: &Path) -> Vec<SourceInput> {
    let raw_a = dir.join("raw_a.jsonl");
    let raw_b = dir.join("raw_b.jsonl");
    write_export(
        &raw_a,
        &[
            flat("UC1", "alice", 100.0, "1"),
            flat("UC2", "bob", 105.0, "2"),
            flat("UC3", "carol", 110.0, "3"),
            flat("UC2", "bob", 130.0, "gg"),
            flat("UC1", "alice", 200.0, "2"),
        ],
    );
    // source B missed carol, saw dave, runs slightly behind
    write_export(
        &raw_b,
        &[
            flat("UC1", "alice", 101.2, "1"),
            flat("UC2", "bob", 106.5, "2"),
            flat("UC4", "dave", 150.0, "1"),
            flat("UC2", "bob", 131.0, "gg"),
            flat("UC1", "alice", 201.0, " 2 "),
        ],
    );

    let log_a = dir.join("logs/innertube.jsonl");
    let log_b = dir.join("logs/chatdl.jsonl");
    let summaries = CaptureRunner::new(StopSignal::new())
        .with_adapter(CaptureAdapter::new(
            Box::new(ReplaySource::from_file("innertube", &raw_a, 2).unwrap()),
            &log_a,
            capture_config(),
        ))
        .with_adapter(CaptureAdapter::new(
            Box::new(ReplaySource::from_file("chatdl", &raw_b, 2).unwrap()),
            &log_b,
            capture_config(),
        ))
        .run();

    assert!(summaries.iter().all(|s| s.status == AdapterStatus::Completed));
    assert!(summaries.iter().all(|s| s.records_written == 5));

    vec![
        SourceInput::new("innertube", log_a),
        SourceInput::new("chatdl", log_b),
        SourceInput::new("ytdlp", dir.join("logs/ytdlp.jsonl")),
    ]
}

#[test]
fn test_capture_merge_analyze() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let inputs = capture_scenario(dir.path());

    let engine = MergeEngine::new(merge_config()).unwrap();
    let merged = engine.merge_files(&inputs);

    assert_eq!(merged.report.missing_sources(), vec!["ytdlp"]);
    assert_eq!(merged.report.observations_in, 10);
    assert_eq!(merged.report.clusters_merged, 4);
    // N - sum(cluster_size - 1)
    assert_eq!(merged.records.len(), 10 - 4);

    let first = &merged.records[0];
    assert_eq!(first.author_id, "UC1");
    assert_eq!(first.timestamp, 100.0);
    assert_eq!(first.sources, vec!["innertube".to_string(), "chatdl".to_string()]);

    let timestamps: Vec<f64> = merged.records.iter().map(|r| r.timestamp).collect();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

    let report = analyze(&merged.records, &AnalysisConfig::default(), None).unwrap();
    let summary = &report.summary;
    assert_eq!(summary.total_messages, 6);
    assert_eq!(summary.vote_messages, 5);
    assert_eq!(summary.distinct_voters, 4);
    assert_eq!(summary.leaders, vec!["2".to_string()]);
    let tally: Vec<(&str, usize)> = summary.tally.iter().map(|r| (r.choice.as_str(), r.votes)).collect();
    assert_eq!(tally, vec![("1", 1), ("2", 2), ("3", 1)]);
    assert_eq!(summary.changers, 1);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, AnomalyKind::VoteSwitching);
}

#[test]
fn test_merge_is_idempotent_through_files() {
    let dir = TempDir::new().unwrap();
    let inputs = capture_scenario(dir.path());
    let engine = MergeEngine::new(merge_config()).unwrap();

    let merged = engine.merge_files(&inputs);
    let canonical_path = dir.path().join("canonical.jsonl");
    write_log(&canonical_path, &merged.records).unwrap();

    let again = engine.merge_files(&[SourceInput::new("canonical", &canonical_path)]);
    assert_eq!(again.records, merged.records);

    let mut with_originals = inputs.clone();
    with_originals.push(SourceInput::new("canonical", &canonical_path));
    let combined = engine.merge_files(&with_originals);
    assert_eq!(combined.records, merged.records);
}

#[test]
fn test_canonical_log_from_disk_collapses_with_live_logs() {
    let dir = TempDir::new().unwrap();
    let mut a = Vec::new();
    let mut b = Vec::new();
    for i in 0..2000u64 {
        let micros = 1_700_000_000_000_000u64 + i * 1_000_003;
        let ts = micros as f64 / 1e6;
        let author = format!("UC{}", i);
        a.push(EventRecord::new(author.clone(), "", ts, "1", "innertube"));
        b.push(EventRecord::new(author, "", ts + 0.25, "1", "chatdl"));
    }
    let live = vec![SourceLog::new("innertube", a), SourceLog::new("chatdl", b)];

    let engine = MergeEngine::new(merge_config()).unwrap();
    let merged = engine.merge(&live);
    assert_eq!(merged.records.len(), 2000);

    let canonical_path = dir.path().join("canonical.jsonl");
    write_log(&canonical_path, &merged.records).unwrap();
    let canonical = read_log(&canonical_path).unwrap().records;

    let mut with_canonical = live.clone();
    with_canonical.push(SourceLog::new("canonical", canonical));
    let again = engine.merge(&with_canonical);
    assert_eq!(again.records, merged.records);
}

#[test]
fn test_incomplete_tail_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.jsonl");
    let complete = serde_json::to_string(&EventRecord::new("u1", "alice", 1.0, "1", "innertube")).unwrap();
    std::fs::write(&path, format!("{}\n{{\"author_id\": \"u2\", \"timest", complete)).unwrap();

    let load = read_log(&path).unwrap();
    assert_eq!(load.records.len(), 1);
    assert!(load.stats.incomplete_tail);

    let engine = MergeEngine::new(merge_config()).unwrap();
    let merged = engine.merge_files(&[SourceInput::new("innertube", &path)]);
    assert_eq!(merged.records.len(), 1);
    assert!(merged.report.sources[0].stats.incomplete_tail);
}

/// One record per poll, forever
struct Endless {
    next: u64,
}

impl ChatSource for Endless {
    fn tag(&self) -> &str {
        "endless"
    }

    fn poll(&mut self) -> Result<SourcePoll, SourceError> {
        self.next += 1;
        Ok(SourcePoll::Records(vec![EventRecord::new(
            format!("u{}", self.next),
            "",
            self.next as f64,
            "1",
            "endless",
        )]))
    }
}

#[test]
fn test_adapter_flushes_captured_records_on_stop() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("endless.jsonl");
    let runner = CaptureRunner::new(StopSignal::new()).with_adapter(CaptureAdapter::new(
        Box::new(Endless { next: 0 }),
        &output,
        capture_config(),
    ));
    let stop = runner.stop_signal();

    let handle = std::thread::spawn(move || runner.run());
    std::thread::sleep(Duration::from_millis(50));
    stop.stop();
    let summaries = handle.join().unwrap();

    assert_eq!(summaries[0].status, AdapterStatus::Interrupted);
    assert!(summaries[0].records_written > 0);

    let load = read_log(&output).unwrap();
    assert_eq!(load.records.len() as u64, summaries[0].records_written);
    assert!(!load.stats.incomplete_tail);
}

#[test]
fn test_viewer_ratio_end_to_end() {
    let records: Vec<EventRecord> = (0..500)
        .map(|i| EventRecord::new(format!("UC{}", i), format!("viewer{}", i), i as f64, "2", "innertube"))
        .collect();
    let config = AnalysisConfig::default();

    let low = [ViewerSample { timestamp: 0.0, viewers: 300 }];
    let report = analyze(&records, &config, Some(&low)).unwrap();
    assert!(report.findings.iter().any(|f| f.kind == AnomalyKind::ViewerRatio));

    let high = [ViewerSample { timestamp: 0.0, viewers: 1000 }];
    let report = analyze(&records, &config, Some(&high)).unwrap();
    assert!(report.findings.iter().all(|f| f.kind != AnomalyKind::ViewerRatio));
}
