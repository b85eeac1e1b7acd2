//! `check`, `convert`, and `report` — operations that migrate or audit
//! sources rather than serve a live query.

use crate::discovery;
use crate::error::{OshError, Result};
use crate::event::Event;
use crate::legacy;
use crate::merge::MergeReader;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of checking one source's internal ordering.
#[derive(Debug)]
pub struct CheckReport {
    pub path: PathBuf,
    pub ok: bool,
    pub detail: Option<String>,
}

/// Verify every source under `base`. `.osh` files are checked for
/// non-decreasing timestamp order by scanning forward (via a reverse
/// scan, since that's the primitive the log format supports); legacy
/// sources are checked only for successful parsing, since their reader
/// always re-sorts and carries no forward-order invariant of its own.
pub fn check(base: &Path, wait: Duration) -> Result<Vec<CheckReport>> {
    discovery::discover(base)?
        .into_iter()
        .map(|path| Ok(check_one(&path, wait)))
        .collect()
}

fn check_one(path: &Path, wait: Duration) -> CheckReport {
    let result = match path.extension().and_then(|e| e.to_str()) {
        Some("osh") => check_osh_ordering(path, wait),
        Some("osh_legacy") => legacy::read_osh_legacy(path).map(|_| ()),
        Some("zsh_history") => legacy::read_zsh_history(path).map(|_| ()),
        _ => Ok(()),
    };
    match result {
        Ok(()) => CheckReport {
            path: path.to_path_buf(),
            ok: true,
            detail: None,
        },
        Err(e) => CheckReport {
            path: path.to_path_buf(),
            ok: false,
            detail: Some(e.to_string()),
        },
    }
}

fn check_osh_ordering(path: &Path, wait: Duration) -> Result<()> {
    let mut previous: Option<DateTime<Utc>> = None;
    for event in crate::log::reverse_scan(path, wait)? {
        let event = event?;
        if let Some(prev) = previous {
            if event.timestamp > prev {
                return Err(OshError::CorruptFrame {
                    path: path.to_path_buf(),
                    detail: format!(
                        "timestamp order violated: {} precedes {} reading forward",
                        event.timestamp, prev
                    ),
                });
            }
        }
        previous = Some(event.timestamp);
    }
    Ok(())
}

enum Format {
    Osh,
    OshLegacy,
    ZshHistory,
    OldOshJsonlines,
}

fn load_newest_first(path: &Path, format: &Format, wait: Duration) -> Result<Vec<Event>> {
    match format {
        Format::Osh => crate::log::reverse_scan(path, wait)?.collect(),
        Format::OshLegacy => legacy::read_osh_legacy(path),
        Format::ZshHistory => legacy::read_zsh_history(path),
        Format::OldOshJsonlines => legacy::read_old_osh_jsonlines(path),
    }
}

fn convert_one(path: &Path, format: Format, wait: Duration) -> Result<()> {
    let mut events = load_newest_first(path, &format, wait)?;
    events.reverse();
    let target = path.with_extension("osh");
    crate::log::forward_write(&events, &target, wait)?;
    if target != path {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn extension_format(path: &Path) -> Result<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("osh") => Ok(Format::Osh),
        Some("osh_legacy") => Ok(Format::OshLegacy),
        Some("zsh_history") => Ok(Format::ZshHistory),
        _ => Err(OshError::ParseError {
            path: path.to_path_buf(),
            line: 0,
            detail: "unsupported source extension".to_string(),
        }),
    }
}

/// Migrate each path to the canonical `.osh` format, dispatching on file
/// extension. Does not handle the old JSON-lines `.osh` shape, since it
/// shares an extension with the current binary format and so can't be
/// told apart automatically — use [`convert_old_osh`] for those.
pub fn convert(paths: &[PathBuf], wait: Duration) -> Result<()> {
    for path in paths {
        convert_one(path, extension_format(path)?, wait)?;
    }
    Ok(())
}

/// Migrate pre-release `.osh_legacy` archives regardless of their actual
/// file extension.
pub fn convert_osh_legacy(paths: &[PathBuf], wait: Duration) -> Result<()> {
    for path in paths {
        convert_one(path, Format::OshLegacy, wait)?;
    }
    Ok(())
}

/// Migrate old JSON-lines `.osh` files — these predate the binary frame
/// format but kept the same `.osh` extension, so the caller must name
/// them explicitly rather than relying on discovery's dispatch table.
pub fn convert_old_osh(paths: &[PathBuf], wait: Duration) -> Result<()> {
    for path in paths {
        convert_one(path, Format::OldOshJsonlines, wait)?;
    }
    Ok(())
}

/// Aggregate statistics over the full merged stream.
#[derive(Debug, Default)]
pub struct Report {
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub active_days: u64,
    pub span_days: i64,
    pub total_events: u64,
    pub success_count: u64,
    pub success_ratio: f64,
    pub average_active_day_volume: f64,
}

pub fn report(base: &Path, wait: Duration) -> Result<Report> {
    discovery::refresh_archive_cache(base, wait)?;
    let sources = discovery::open_selected_sources(base, wait)?;
    let merged = MergeReader::new(sources);

    let mut first: Option<DateTime<Utc>> = None;
    let mut last: Option<DateTime<Utc>> = None;
    let mut total = 0u64;
    let mut success = 0u64;
    let mut active_days = HashSet::new();

    for event in merged {
        let event = event?;
        total += 1;
        if event.exit_code == Some(0) {
            success += 1;
        }
        active_days.insert(event.timestamp.date_naive());
        first = Some(first.map_or(event.timestamp, |f| f.min(event.timestamp)));
        last = Some(last.map_or(event.timestamp, |l| l.max(event.timestamp)));
    }

    let span_days = match (first, last) {
        (Some(f), Some(l)) => (l.date_naive() - f.date_naive()).num_days() + 1,
        _ => 0,
    };
    let success_ratio = if total > 0 { success as f64 / total as f64 } else { 0.0 };
    let average_active_day_volume = if !active_days.is_empty() {
        total as f64 / active_days.len() as f64
    } else {
        0.0
    };

    Ok(Report {
        first,
        last,
        active_days: active_days.len() as u64,
        span_days,
        total_events: total,
        success_count: success,
        success_ratio,
        average_active_day_volume,
    })
}
