//! Read-only historical formats, each mapped onto [`Event`].
//!
//! These readers are only used by the `convert` maintenance operation and
//! by [`crate::discovery`] when building the archive cache. They never
//! write; the formats they read are immutable from this crate's
//! perspective.

use crate::error::{OshError, Result};
use crate::event::Event;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::fs;
use std::path::Path;

fn parse_error(path: &Path, line: usize, detail: impl Into<String>) -> OshError {
    OshError::ParseError {
        path: path.to_path_buf(),
        line,
        detail: detail.into(),
    }
}

/// Parse a single non-continuation `.zsh_history` line into
/// `(posix_timestamp, duration, command)`.
///
/// Matches `^: <timestamp>:<duration>;<command>$`. Duration is parsed but
/// discarded by the caller — many shells never record it correctly.
fn parse_zsh_line(line: &str) -> Option<(i64, &str)> {
    let rest = line.strip_prefix(": ")?;
    let (timestamp, rest) = rest.split_once(':')?;
    let (duration, command) = rest.split_once(';')?;
    if duration.is_empty() || !duration.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let timestamp: i64 = timestamp.parse().ok()?;
    Some((timestamp, command))
}

/// Read a `.zsh_history` file.
///
/// Only `timestamp` and `command` populate each [`Event`]; duration is
/// read but never trusted, and no other field is available from this
/// format. The file is not assumed sorted; the returned vector is sorted
/// newest-first. A line that doesn't match the expected shape is a hard
/// parse error — even one bad line fails the whole read.
pub fn read_zsh_history(path: &Path) -> Result<Vec<Event>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut lines = text.lines().enumerate();
    let mut events = Vec::new();

    while let Some((idx, content)) = lines.next() {
        let (timestamp, command) = parse_zsh_line(content)
            .ok_or_else(|| parse_error(path, idx + 1, format!("cannot parse line: {content:?}")))?;

        let mut command = command.to_string();
        while command.ends_with('\\') {
            command.pop();
            let (_, continuation) = lines
                .next()
                .ok_or_else(|| parse_error(path, idx + 1, "command continues past end of file"))?;
            command.push('\n');
            command.push_str(continuation);
        }

        let timestamp = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or_else(|| parse_error(path, idx + 1, "timestamp out of range"))?;
        events.push(Event::new(timestamp, command));
    }

    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(events)
}

/// Interpret a legacy numeric timestamp as either whole seconds or
/// microseconds since the epoch. Pre-release `.osh_legacy` archives mix
/// both resolutions; values too large to be a plausible Unix second count
/// are assumed to be microseconds.
const MICROSECOND_THRESHOLD: i64 = 100_000_000_000;

fn legacy_timestamp_from_value(value: &Value, path: &Path, line: usize) -> Result<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i.abs() >= MICROSECOND_THRESHOLD {
                    Utc.timestamp_micros(i)
                        .single()
                        .ok_or_else(|| parse_error(path, line, "microsecond timestamp out of range"))
                } else {
                    Utc.timestamp_opt(i, 0)
                        .single()
                        .ok_or_else(|| parse_error(path, line, "timestamp out of range"))
                }
            } else if let Some(f) = n.as_f64() {
                let secs = f.trunc() as i64;
                let nanos = (f.fract().abs() * 1e9).round() as u32;
                Utc.timestamp_opt(secs, nanos)
                    .single()
                    .ok_or_else(|| parse_error(path, line, "timestamp out of range"))
            } else {
                Err(parse_error(path, line, "timestamp is not a finite number"))
            }
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| parse_error(path, line, format!("invalid ISO-8601 timestamp {s:?}: {e}"))),
        other => Err(parse_error(
            path,
            line,
            format!("unexpected timestamp shape: {other}"),
        )),
    }
}

fn str_field<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Read a pre-release `.osh_legacy` JSON-array archive.
///
/// Records without a `session` key are imported-from-zsh duplicates and
/// are skipped (the archive is expected to also carry the raw
/// `.zsh_history`, so keeping both would double-count). Accepts both
/// integer-second and microsecond-resolution timestamps, and ISO-8601
/// timestamp strings. Returned newest-first.
pub fn read_osh_legacy(path: &Path) -> Result<Vec<Event>> {
    let text = fs::read_to_string(path)?;
    let value: Value =
        serde_json::from_str(&text).map_err(|e| parse_error(path, 0, format!("invalid JSON: {e}")))?;
    let array = value
        .as_array()
        .ok_or_else(|| parse_error(path, 0, "expected a top-level JSON array"))?;

    let mut events = Vec::new();
    for (idx, item) in array.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| parse_error(path, idx, "expected a JSON object"))?;

        if !obj.contains_key("session") {
            continue;
        }

        let timestamp_value = obj
            .get("timestamp")
            .ok_or_else(|| parse_error(path, idx, "missing timestamp"))?;
        let timestamp = legacy_timestamp_from_value(timestamp_value, path, idx)?;
        let command = str_field(obj, "command")
            .ok_or_else(|| parse_error(path, idx, "missing command"))?
            .to_string();

        events.push(Event {
            timestamp,
            command,
            duration: obj.get("duration").and_then(Value::as_f64),
            exit_code: obj.get("exit_code").and_then(Value::as_i64),
            folder: str_field(obj, "folder").map(String::from),
            machine: str_field(obj, "machine").map(String::from),
            session: str_field(obj, "session").map(String::from),
        });
    }

    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(events)
}

/// Read an old JSON-lines `.osh` file: one JSON object per line, an
/// `event` key carries the record, lines without one (format/description
/// headers) are ignored.
pub fn read_old_osh_jsonlines(path: &Path) -> Result<Vec<Event>> {
    let text = fs::read_to_string(path)?;
    let mut events = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|e| parse_error(path, idx + 1, format!("invalid JSON line: {e}")))?;

        let Some(event_value) = value.get("event") else {
            continue;
        };
        let obj = event_value
            .as_object()
            .ok_or_else(|| parse_error(path, idx + 1, "event is not a JSON object"))?;

        let timestamp_str =
            str_field(obj, "timestamp").ok_or_else(|| parse_error(path, idx + 1, "missing timestamp"))?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| parse_error(path, idx + 1, format!("invalid timestamp: {e}")))?;
        let command = str_field(obj, "command")
            .ok_or_else(|| parse_error(path, idx + 1, "missing command"))?
            .to_string();

        events.push(Event {
            timestamp,
            command,
            duration: obj.get("duration").and_then(Value::as_f64),
            exit_code: obj.get("exit-code").and_then(Value::as_i64),
            folder: str_field(obj, "folder").map(String::from),
            machine: str_field(obj, "machine").map(String::from),
            session: str_field(obj, "session").map(String::from),
        });
    }

    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn zsh_parsing_with_continuation() {
        // scenario 2 from spec.md §8
        let input = ": 1700000000:0;echo one\\\n two\n: 1700000001:0;ls\n";
        let file = write_tmp(input);
        let events = read_zsh_history(file.path()).unwrap();

        assert_eq!(events.len(), 2);
        let newest = &events[0];
        assert_eq!(newest.timestamp.timestamp(), 1_700_000_001);
        assert_eq!(newest.command, "ls");
        assert!(newest.duration.is_none() && newest.session.is_none());

        let oldest = &events[1];
        assert_eq!(oldest.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(oldest.command, "echo one\n two");
    }

    #[test]
    fn zsh_rejects_non_matching_line() {
        let file = write_tmp("not a zsh history line\n");
        let err = read_zsh_history(file.path()).unwrap_err();
        assert!(matches!(err, OshError::ParseError { .. }));
    }

    #[test]
    fn zsh_rejects_non_numeric_duration() {
        let file = write_tmp(": 1700000000:oops;ls\n");
        let err = read_zsh_history(file.path()).unwrap_err();
        assert!(matches!(err, OshError::ParseError { .. }));
    }

    #[test]
    fn osh_legacy_skips_records_without_session() {
        // scenario 3 from spec.md §8
        let input = serde_json::json!([
            {"timestamp": 1700000000, "command": "ls", "session": "s1"},
            {"timestamp": 1700000001, "command": "imported", "machine": "laptop"},
        ])
        .to_string();
        let file = write_tmp(&input);
        let events = read_osh_legacy(file.path()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].command, "ls");
        assert_eq!(events[0].session.as_deref(), Some("s1"));
    }

    #[test]
    fn osh_legacy_accepts_microsecond_and_second_timestamps() {
        let input = serde_json::json!([
            {"timestamp": 1700000000, "command": "seconds", "session": "s1"},
            {"timestamp": 1700000000_000_000i64, "command": "micros", "session": "s2"},
        ])
        .to_string();
        let file = write_tmp(&input);
        let events = read_osh_legacy(file.path()).unwrap();

        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
        }
    }

    #[test]
    fn old_osh_jsonlines_ignores_header_lines() {
        let input = format!(
            "{}\n{}\n",
            serde_json::json!({"format": "osh-history-v1", "description": null}),
            serde_json::json!({"event": {
                "timestamp": "2023-11-14T22:13:20.000000+00:00",
                "command": "ls",
                "duration": 0.5,
                "exit-code": 0,
                "folder": "/home/user",
                "machine": "laptop",
                "session": "s1",
            }}),
        );
        let file = write_tmp(&input);
        let events = read_old_osh_jsonlines(file.path()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].command, "ls");
        assert_eq!(events[0].exit_code, Some(0));
        assert_eq!(events[0].folder.as_deref(), Some("/home/user"));
    }
}
