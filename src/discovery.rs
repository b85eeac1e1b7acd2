//! Source enumeration under a base directory and the `archived.osh` cache.
//!
//! Dispatch between the three on-disk formats is a tagged variant on file
//! extension, resolved once here at discovery time — each variant maps to
//! a dedicated reader, no polymorphic source objects.

use crate::error::{OshError, Result};
use crate::event::Event;
use crate::legacy;
use crate::merge::MergeReader;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Osh,
    OshLegacy,
    ZshHistory,
}

fn classify(path: &Path) -> Option<SourceKind> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("osh") => Some(SourceKind::Osh),
        Some("osh_legacy") => Some(SourceKind::OshLegacy),
        Some("zsh_history") => Some(SourceKind::ZshHistory),
        _ => None,
    }
}

fn glob_paths(pattern: &Path) -> Result<Vec<PathBuf>> {
    let pattern_str = pattern.to_string_lossy().into_owned();
    let entries =
        glob::glob(&pattern_str).map_err(|e| OshError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    entries
        .map(|entry| entry.map_err(|e| OshError::Io(e.into_error())))
        .collect()
}

fn dedupe_by_resolved_path(found: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>, path: PathBuf) {
    let resolved = fs::canonicalize(&path).unwrap_or(path);
    if seen.insert(resolved.clone()) {
        found.push(resolved);
    }
}

fn archive_sources(base: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    for pattern in [
        base.join("archive/**/*.osh"),
        base.join("archive/**/*.osh_legacy"),
        base.join("archive/**/*.zsh_history"),
    ] {
        for path in glob_paths(&pattern)? {
            dedupe_by_resolved_path(&mut found, &mut seen, path);
        }
    }
    Ok(found)
}

fn active_sources(base: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    for path in glob_paths(&base.join("active/**/*.osh"))? {
        dedupe_by_resolved_path(&mut found, &mut seen, path);
    }
    let local = base.join("local.osh");
    if local.exists() {
        dedupe_by_resolved_path(&mut found, &mut seen, local);
    }
    Ok(found)
}

/// Recursively enumerate every supported source under `base`: archive
/// files of any supported format plus active `.osh` logs and `local.osh`
/// if present. Symlinks are resolved and the result deduplicated by
/// resolved path.
pub fn discover(base: &Path) -> Result<Vec<PathBuf>> {
    let mut found = archive_sources(base)?;
    let mut seen: HashSet<PathBuf> = found.iter().cloned().collect();
    for path in active_sources(base)? {
        dedupe_by_resolved_path(&mut found, &mut seen, path);
    }
    Ok(found)
}

/// Build a newest-first iterator over one source file, dispatching on its
/// extension.
///
/// A `.osh` source whose shared lock can't be acquired within `wait`
/// contributes an empty stream rather than aborting the whole merge.
/// Already logged to stderr by the lock acquisition itself; not fatal.
fn reverse_iter_for(path: &Path, wait: Duration) -> Result<Box<dyn Iterator<Item = Result<Event>>>> {
    match classify(path) {
        Some(SourceKind::Osh) => match crate::log::reverse_scan(path, wait) {
            Ok(scan) => Ok(Box::new(scan)),
            Err(OshError::LockTimeout { .. }) => {
                Ok(Box::new(std::iter::empty::<Result<Event>>()))
            }
            Err(e) => Err(e),
        },
        Some(SourceKind::OshLegacy) => {
            let events = legacy::read_osh_legacy(path)?;
            Ok(Box::new(events.into_iter().map(Ok::<Event, OshError>)))
        }
        Some(SourceKind::ZshHistory) => {
            let events = legacy::read_zsh_history(path)?;
            Ok(Box::new(events.into_iter().map(Ok::<Event, OshError>)))
        }
        None => Err(OshError::CorruptFrame {
            path: path.to_path_buf(),
            detail: "unsupported source extension".to_string(),
        }),
    }
}

fn mtime(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Rebuild `archived.osh` if any archive source is newer than the cache,
/// or if the cache doesn't exist yet. Deletes the cache if there are no
/// archive sources left. Rebuild is a single truncating write under an
/// exclusive lock (see [`crate::log::forward_write`]).
pub fn refresh_archive_cache(base: &Path, wait: Duration) -> Result<()> {
    let sources = archive_sources(base)?;
    let cache = base.join("archived.osh");

    if sources.is_empty() {
        if cache.exists() {
            fs::remove_file(&cache)?;
        }
        return Ok(());
    }

    let max_mtime = sources
        .iter()
        .map(|p| mtime(p))
        .collect::<io::Result<Vec<_>>>()?
        .into_iter()
        .max()
        .expect("sources is non-empty");

    let needs_rebuild = match mtime(&cache) {
        Ok(cache_mtime) => cache_mtime < max_mtime,
        Err(_) => true,
    };
    if !needs_rebuild {
        return Ok(());
    }

    log::info!(
        "rebuilding archive cache at {} from {} source(s)",
        cache.display(),
        sources.len()
    );

    let iters = sources
        .iter()
        .map(|p| reverse_iter_for(p, wait))
        .collect::<Result<Vec<_>>>()?;
    let merged = MergeReader::new(iters);
    let mut events = merged.collect::<Result<Vec<Event>>>()?;
    events.reverse();
    crate::log::forward_write(&events, &cache, wait)
}

/// The set of sources handed to the merge reader for a query: every
/// active log, plus the archive cache if one exists.
pub fn select_sources(base: &Path) -> Result<Vec<PathBuf>> {
    let mut sources = active_sources(base)?;
    let cache = base.join("archived.osh");
    if cache.exists() {
        sources.push(cache);
    }
    Ok(sources)
}

/// Open every source returned by [`select_sources`] as a newest-first
/// iterator, ready for [`MergeReader`].
pub fn open_selected_sources(
    base: &Path,
    wait: Duration,
) -> Result<Vec<Box<dyn Iterator<Item = Result<Event>>>>> {
    select_sources(base)?
        .iter()
        .map(|p| reverse_iter_for(p, wait))
        .collect()
}
