//! Raw chat export normalisation
//!
//! External capture tools write chat in their own shapes. This module turns
//! those exports into `EventRecord`s tagged with a source:
//!
//! - Flat messages: `{"author": {"name", "id"?}, "timestamp", "message"}`, where
//!   `author` may also be a plain string, `text` may replace `message` and
//!   `time_in_seconds` may replace `timestamp`
//! - Replay wrappers: `{"replayChatItemAction": {"actions": [...], "videoOffsetTimeMsec"}}`
//! - Bare chat actions: `{"addChatItemAction": {"item": {...}}}`
//!
//! Exports may be line-delimited, a JSON array, or objects separated by
//! newlines with trailing commas. Entries without an author, a timestamp or
//! text are skipped and counted.

use crate::types::{EventRecord, Result, Timestamp};
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::path::Path;

/// Renderer keys that carry chat messages
const MESSAGE_RENDERERS: [&str; 2] = ["liveChatTextMessageRenderer", "liveChatPaidMessageRenderer"];

/// Numeric timestamps above this are microseconds
const MICROSECOND_THRESHOLD: f64 = 1e12;

/// Result of normalising a raw export
#[derive(Debug, Clone, Default)]
pub struct RawImport {
    pub records: Vec<EventRecord>,
    /// Top-level entries that were not valid JSON
    pub unparseable: usize,
    /// Messages dropped for lack of author, timestamp or text
    pub skipped: usize,
}

/// Read and normalise a raw export file
pub fn read_raw_export(path: &Path, source: &str) -> Result<RawImport> {
    let content = std::fs::read_to_string(path)?;
    let import = parse_raw_export(&content, source);
    log::info!(
        "Normalised {} messages from {:?} as source '{}' ({} unparseable, {} skipped)",
        import.records.len(),
        path,
        source,
        import.unparseable,
        import.skipped
    );
    Ok(import)
}

/// Normalise the contents of a raw export
pub fn parse_raw_export(content: &str, source: &str) -> RawImport {
    let mut import = RawImport::default();
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return import;
    }

    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<Value>>(trimmed) {
            Ok(values) => {
                for value in &values {
                    collect_value(value, source, &mut import);
                }
                return import;
            }
            Err(e) => {
                log::debug!("Export is not a JSON array ({}), reading line by line", e);
            }
        }
    }

    for line in trimmed.lines() {
        collect_line(line, source, &mut import);
    }
    import
}

/// Normalise one line of a line-delimited export
///
/// A single line may hold a replay wrapper with several messages.
pub fn parse_raw_line(line: &str, source: &str) -> RawImport {
    let mut import = RawImport::default();
    collect_line(line, source, &mut import);
    import
}

fn collect_line(line: &str, source: &str, import: &mut RawImport) {
    let line = line.trim().trim_end_matches(',');
    if line.is_empty() || line == "[" || line == "]" {
        return;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(value) => collect_value(&value, source, import),
        Err(e) => {
            log::trace!("Unparseable export line: {}", e);
            import.unparseable += 1;
        }
    }
}

fn collect_value(value: &Value, source: &str, import: &mut RawImport) {
    if let Some(replay) = value.get("replayChatItemAction") {
        let offset = replay
            .get("videoOffsetTimeMsec")
            .and_then(value_as_i64);
        let actions = replay.get("actions").and_then(Value::as_array);
        for action in actions.into_iter().flatten() {
            collect_action(action, offset, source, import);
        }
        return;
    }

    if value.get("addChatItemAction").is_some() {
        collect_action(value, None, source, import);
        return;
    }

    match flat_message(value, source) {
        Some(record) => import.records.push(record),
        None => import.skipped += 1,
    }
}

fn collect_action(action: &Value, offset: Option<i64>, source: &str, import: &mut RawImport) {
    let item = match action.get("addChatItemAction").and_then(|a| a.get("item")) {
        Some(item) => item,
        None => return, // banners, deletions, ticker updates
    };

    for key in MESSAGE_RENDERERS {
        if let Some(renderer) = item.get(key) {
            match renderer_message(renderer, offset, source) {
                Some(record) => import.records.push(record),
                None => import.skipped += 1,
            }
        }
    }
}

/// Convert a chat renderer object into a record
fn renderer_message(renderer: &Value, offset: Option<i64>, source: &str) -> Option<EventRecord> {
    let name = renderer
        .get("authorName")
        .and_then(|n| n.get("simpleText"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let channel = renderer
        .get("authorExternalChannelId")
        .and_then(Value::as_str);
    let author_id = channel.unwrap_or(name);
    if author_id.is_empty() {
        return None;
    }

    let timestamp = renderer.get("timestampUsec").and_then(normalize_timestamp)?;

    let runs = renderer
        .get("message")
        .and_then(|m| m.get("runs"))
        .and_then(Value::as_array);
    let text: String = runs.into_iter().flatten().map(run_text).collect();

    let mut record = EventRecord::new(author_id, name, timestamp, text, source);
    record.message_id = renderer.get("id").and_then(Value::as_str).map(str::to_string);
    record.paid_amount = renderer
        .get("purchaseAmountText")
        .and_then(|p| p.get("simpleText"))
        .and_then(Value::as_str)
        .map(str::to_string);
    record.video_offset_ms = offset;
    Some(record)
}

/// Text of one message run; emoji runs contribute their first shortcut
fn run_text(run: &Value) -> String {
    if let Some(text) = run.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    let emoji = match run.get("emoji") {
        Some(emoji) => emoji,
        None => return String::new(),
    };
    emoji
        .get("shortcuts")
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(Value::as_str)
        .or_else(|| emoji.get("emojiId").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// Convert a flat message object into a record
fn flat_message(value: &Value, source: &str) -> Option<EventRecord> {
    let (name, id) = match value.get("author") {
        Some(Value::Object(author)) => (
            author.get("name").and_then(Value::as_str).unwrap_or_default(),
            author.get("id").and_then(Value::as_str),
        ),
        Some(Value::String(name)) => (name.as_str(), None),
        _ => ("", None),
    };
    let author_id = id.unwrap_or(name);
    if author_id.is_empty() {
        return None;
    }

    let text = value
        .get("message")
        .or_else(|| value.get("text"))
        .and_then(Value::as_str)?;

    let timestamp = value
        .get("timestamp")
        .or_else(|| value.get("time_in_seconds"))
        .and_then(normalize_timestamp)?;

    let mut record = EventRecord::new(author_id, name, timestamp, text, source);
    record.sequence_hint = value.get("sequence").and_then(Value::as_u64);
    record.message_id = value
        .get("message_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    record.paid_amount = value
        .get("superchat")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    record.video_offset_ms = value.get("offset_ms").and_then(value_as_i64);
    Some(record)
}

/// Interpret a timestamp field as seconds
///
/// Numbers above 1e12 are microseconds. Strings may be numeric or ISO-8601;
/// ISO times without an offset are taken as UTC.
pub fn normalize_timestamp(value: &Value) -> Option<Timestamp> {
    let seconds = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                n
            } else if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                datetime_seconds(dt.timestamp(), dt.timestamp_subsec_nanos())
            } else {
                let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .ok()?;
                let utc = naive.and_utc();
                datetime_seconds(utc.timestamp(), utc.timestamp_subsec_nanos())
            }
        }
        _ => return None,
    };

    if !seconds.is_finite() {
        return None;
    }
    if seconds > MICROSECOND_THRESHOLD {
        Some(seconds / 1_000_000.0)
    } else {
        Some(seconds)
    }
}

fn datetime_seconds(secs: i64, nanos: u32) -> f64 {
    secs as f64 + nanos as f64 / 1e9
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
