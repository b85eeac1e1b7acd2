//! Filtering, bagging, and the finder's null/US-delimited record protocol.

use crate::discovery;
use crate::error::Result;
use crate::event::Event;
use crate::merge::MergeReader;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Local, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Placeholder for an embedded newline in the single-line rendering of a
/// command, so the finder's null-delimited protocol sees one record per
/// line regardless of what the command itself contains.
const NON_LINE_BREAKING_MARKER: char = '\u{2424}';

const FIELD_SEP: char = '\u{1f}';

pub enum Mode {
    All,
    Session(String),
    Folder(String),
    Bag,
}

/// Per-command aggregate produced by `mode=bag`.
#[derive(Debug, Clone)]
pub struct Bag {
    pub command: String,
    pub count: u64,
    pub success: u64,
    pub failure: u64,
    pub timestamp: DateTime<Utc>,
}

impl Bag {
    fn unknown(&self) -> u64 {
        self.count - self.success - self.failure
    }

    pub fn success_ratio(&self) -> f64 {
        self.success as f64 / self.count as f64
    }

    pub fn failure_ratio(&self) -> f64 {
        self.failure as f64 / self.count as f64
    }

    pub fn unknown_ratio(&self) -> f64 {
        self.unknown() as f64 / self.count as f64
    }
}

/// Aggregate a newest-first (or any order) event stream by `command`,
/// preserving first-seen order, per `spec.md` §4.G.
pub fn aggregate(events: impl Iterator<Item = Result<Event>>) -> Result<Vec<Bag>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut bags: Vec<Bag> = Vec::new();

    for event in events {
        let event = event?;
        let idx = *index.entry(event.command.clone()).or_insert_with(|| {
            bags.push(Bag {
                command: event.command.clone(),
                count: 0,
                success: 0,
                failure: 0,
                timestamp: event.timestamp,
            });
            bags.len() - 1
        });
        let bag = &mut bags[idx];
        bag.count += 1;
        match event.exit_code {
            Some(0) => bag.success += 1,
            Some(_) => bag.failure += 1,
            None => {}
        }
        if event.timestamp > bag.timestamp {
            bag.timestamp = event.timestamp;
        }
    }

    Ok(bags)
}

/// Quantize a duration (seconds, may be negative) into the fixed
/// Y/W/D/H/M/S/ms precedence table from `spec.md` §4.G. The week arm only
/// fires while the rounded week count stays under 52 — at or above that it
/// falls through to years, so a delta of exactly 52 weeks renders as `1Y`
/// rather than `52W`.
pub fn human_duration(seconds: f64) -> String {
    quantize(seconds, false)
}

/// Same quantization as [`human_duration`], but with every unit letter
/// uppercased. Used for the short `[N ago]` column, which the spec calls
/// out as uppercase-only in contrast to the mixed-case units elsewhere in
/// the preview (e.g. `after 2m`).
fn human_duration_upper(seconds: f64) -> String {
    quantize(seconds, true)
}

fn quantize(seconds: f64, upper: bool) -> String {
    const MINUTE: f64 = 60.0;
    const HOUR: f64 = 3600.0;
    const DAY: f64 = 86400.0;
    const WEEK: f64 = 604800.0;
    const YEAR: f64 = 31_536_000.0;

    let abs = seconds.abs();
    if abs < 1.0 {
        let unit = if upper { "MS" } else { "ms" };
        format!("{}{unit}", (seconds * 1000.0).round() as i64)
    } else if abs < MINUTE {
        let unit = if upper { "S" } else { "s" };
        format!("{}{unit}", seconds.round() as i64)
    } else if abs < HOUR {
        let unit = if upper { "M" } else { "m" };
        format!("{}{unit}", (seconds / MINUTE).round() as i64)
    } else if abs < DAY {
        let unit = if upper { "H" } else { "h" };
        format!("{}{unit}", (seconds / HOUR).round() as i64)
    } else if abs < WEEK {
        format!("{}D", (seconds / DAY).round() as i64)
    } else {
        let weeks = (seconds / WEEK).round();
        if weeks.abs() < 52.0 {
            format!("{}W", weeks as i64)
        } else {
            format!("{}Y", (seconds / YEAR).round() as i64)
        }
    }
}

fn short_ago(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta_seconds = (now - timestamp).num_milliseconds() as f64 / 1000.0;
    format!("[{} ago]", human_duration_upper(delta_seconds))
}

fn folder_pretty(folder: &str) -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => match folder.strip_prefix(&home) {
            Some(rest) => format!("~{rest}"),
            None => folder.to_string(),
        },
        _ => folder.to_string(),
    }
}

fn local_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn preview_native(event: &Event) -> String {
    let exit = event.exit_code.map(|e| e.to_string()).unwrap_or_else(|| "?".to_string());
    let duration = event.duration.map(human_duration).unwrap_or_else(|| "?".to_string());
    let folder = event.folder.as_deref().map(folder_pretty).unwrap_or_else(|| "?".to_string());
    let machine = event.machine.as_deref().unwrap_or("?");
    format!(
        "[returned {exit} after {duration} at {}]\n[ran in {folder} on {machine}]\n\n{}",
        local_timestamp(event.timestamp),
        event.command,
    )
}

fn preview_legacy(event: &Event) -> String {
    format!("ran on {}\n\n{}", local_timestamp(event.timestamp), event.command)
}

fn preview_bagged(bag: &Bag) -> String {
    let pct = |ratio: f64| (ratio * 100.0).round() as i64;
    format!(
        "[ran {} times, most recently at {}]\n[{}% success, {}% failure, {}% unknown]\n\n{}",
        bag.count,
        local_timestamp(bag.timestamp),
        pct(bag.success_ratio()),
        pct(bag.failure_ratio()),
        pct(bag.unknown_ratio()),
        bag.command,
    )
}

fn single_line(command: &str) -> String {
    command.replace('\n', &NON_LINE_BREAKING_MARKER.to_string())
}

fn write_record<W: Write>(
    out: &mut W,
    command: &str,
    preview: &str,
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let fields = [
        BASE64.encode(command.as_bytes()),
        BASE64.encode(preview.as_bytes()),
        short_ago(timestamp, now),
        single_line(command),
    ];
    out.write_all(fields.join(&FIELD_SEP.to_string()).as_bytes())?;
    out.write_all(&[0u8])?;
    Ok(())
}

fn matches_mode(event: &Event, mode: &Mode) -> bool {
    match mode {
        Mode::All | Mode::Bag => true,
        Mode::Session(s) => event.session.as_deref() == Some(s.as_str()),
        Mode::Folder(f) => event.folder.as_deref() == Some(f.as_str()),
    }
}

/// Stream newest-first, NUL-delimited, US-separated records to `out` for
/// the interactive finder's null-delimited input mode.
pub fn search<W: Write>(base: &Path, wait: Duration, mode: &Mode, out: &mut W) -> Result<()> {
    discovery::refresh_archive_cache(base, wait)?;
    let sources = discovery::open_selected_sources(base, wait)?;
    let merged = MergeReader::new(sources);
    let now = Utc::now();

    if matches!(mode, Mode::Bag) {
        let bags = aggregate(merged)?;
        for bag in &bags {
            write_record(out, &bag.command, &preview_bagged(bag), bag.timestamp, now)?;
        }
        return Ok(());
    }

    for event in merged {
        let event = event?;
        if !matches_mode(&event, mode) {
            continue;
        }
        let preview = if event.is_native() {
            preview_native(&event)
        } else {
            preview_legacy(&event)
        };
        write_record(out, &event.command, &preview, event.timestamp, now)?;
    }
    Ok(())
}

/// Newest-first `{timestamp} -- {json-quoted command}` lines for the
/// `list` subcommand.
pub fn list<W: Write>(base: &Path, wait: Duration, out: &mut W) -> Result<()> {
    discovery::refresh_archive_cache(base, wait)?;
    let sources = discovery::open_selected_sources(base, wait)?;
    let merged = MergeReader::new(sources);
    for event in merged {
        let event = event?;
        let quoted = serde_json::to_string(&event.command).expect("string always serializes");
        writeln!(out, "{} -- {}", event.timestamp.to_rfc3339(), quoted)?;
    }
    Ok(())
}
