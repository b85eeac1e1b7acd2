//! The primary `.osh` log: a length-prefixed, append-only binary file.
//!
//! A frame is `payload || size(u16 big-endian)`, with `size` measured in
//! bytes of `payload`. A file is a concatenation of frames in non-decreasing
//! timestamp order. The trailing size word lets readers walk the file
//! backwards without a separate index.

use crate::error::{OshError, Result};
use crate::event::{self, Event};
use fs2::FileExt;
use memmap2::{Mmap, MmapMut};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Bounded wait for an advisory lock before giving up with `LockTimeout`.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10);

const SIZE_WIDTH: usize = 2;

fn poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn lock_exclusive_bounded(file: &File, path: &Path, wait: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        match FileExt::try_lock_exclusive(file) {
            Ok(()) => return Ok(()),
            Err(_) if start.elapsed() < wait => thread::sleep(poll_interval()),
            Err(_) => {
                log::warn!("timed out waiting for exclusive lock on {}", path.display());
                return Err(OshError::LockTimeout {
                    path: path.to_path_buf(),
                });
            }
        }
    }
}

fn lock_shared_bounded(file: &File, path: &Path, wait: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        match FileExt::try_lock_shared(file) {
            Ok(()) => return Ok(()),
            Err(_) if start.elapsed() < wait => thread::sleep(poll_interval()),
            Err(_) => {
                log::warn!("timed out waiting for shared lock on {}", path.display());
                return Err(OshError::LockTimeout {
                    path: path.to_path_buf(),
                });
            }
        }
    }
}

/// Decode a frame payload, rewriting a `CorruptFrame`'s path to the file
/// actually being scanned. `event::decode` has no path of its own to
/// report, so callers that do know it fill it in here.
fn decode_frame(payload: &[u8], path: &Path) -> Result<Event> {
    event::decode(payload).map_err(|e| match e {
        OshError::CorruptFrame { detail, .. } => OshError::CorruptFrame {
            path: path.to_path_buf(),
            detail,
        },
        other => other,
    })
}

/// Concatenate a payload with its trailing big-endian size word.
fn frame_bytes(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + SIZE_WIDTH);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf
}

/// Append one event to the end of `path`.
///
/// Encodes the event and, if it fits within the 16-bit frame limit, writes
/// `payload || size` in a single `write_all` call (best-effort atomicity on
/// a POSIX append-mode file descriptor). Oversized events are dropped
/// silently. Does not verify that the new event's timestamp is not less
/// than the file's last one — callers must only use this when they already
/// know the new event sorts at or after the end.
pub fn append(event: &Event, path: &Path) -> Result<()> {
    let payload = match event::encode(event) {
        Ok(p) => p,
        Err(OshError::OversizedEvent { size }) => {
            log::warn!("dropping oversized event ({size} bytes) appending to {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&frame_bytes(&payload))?;
    file.sync_data()?;
    Ok(())
}

/// Insert one event into `path`, keeping the file in non-decreasing
/// timestamp order.
///
/// Algorithm (mirrors `spec.md` §4.B):
/// 1. If the file is missing or empty, initialize it with a single frame.
/// 2. Otherwise open read+write, take an exclusive lock, and memory-map it.
/// 3. Scan frames from the tail backwards until the first frame whose
///    timestamp is `<=` the new event's timestamp; the insertion point is
///    immediately after that frame (offset 0 if none qualify).
/// 4. Grow the file, shift the suffix right with one overlapping copy, and
///    write the new frame into the gap.
///
/// Oversized events are dropped silently, matching `append`.
pub fn insert(event: &Event, path: &Path, wait: Duration) -> Result<()> {
    let payload = match event::encode(event) {
        Ok(p) => p,
        Err(OshError::OversizedEvent { size }) => {
            log::warn!("dropping oversized event ({size} bytes) inserting into {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    lock_exclusive_bounded(&file, path, wait)?;

    let result = insert_locked(&file, path, &payload);
    let _ = FileExt::unlock(&file);
    result
}

fn insert_locked(file: &File, path: &Path, payload: &[u8]) -> Result<()> {
    let old_len = file.metadata()?.len() as usize;

    if old_len == 0 {
        let mut handle = file;
        handle.write_all(&frame_bytes(payload))?;
        file.sync_data()?;
        return Ok(());
    }

    let insertion_offset = {
        let mmap = unsafe { Mmap::map(file)? };
        find_insertion_offset(&mmap, path, payload)?
    };

    let frame_len = payload.len() + SIZE_WIDTH;
    let new_len = old_len + frame_len;
    file.set_len(new_len as u64)?;

    let mut mmap = unsafe { MmapMut::map_mut(file)? };
    if insertion_offset < old_len {
        let suffix_len = old_len - insertion_offset;
        mmap.copy_within(insertion_offset..insertion_offset + suffix_len, insertion_offset + frame_len);
    }
    mmap[insertion_offset..insertion_offset + payload.len()].copy_from_slice(payload);
    let size_bytes = (payload.len() as u16).to_be_bytes();
    mmap[insertion_offset + payload.len()..insertion_offset + frame_len].copy_from_slice(&size_bytes);
    mmap.flush()?;
    Ok(())
}

/// Find the byte offset at which a new event with this payload's timestamp
/// should be inserted, scanning the mapped file from the tail.
fn find_insertion_offset(mmap: &Mmap, path: &Path, new_payload: &[u8]) -> Result<usize> {
    let new_event = decode_frame(new_payload, path)?;
    let mut pos = mmap.len();

    while pos > 0 {
        if pos < SIZE_WIDTH {
            return Err(OshError::CorruptFrame {
                path: path.to_path_buf(),
                detail: "trailing size word runs past start of file".to_string(),
            });
        }
        let size = u16::from_be_bytes([mmap[pos - 2], mmap[pos - 1]]) as usize;
        let frame_start = pos.checked_sub(SIZE_WIDTH + size).ok_or_else(|| OshError::CorruptFrame {
            path: path.to_path_buf(),
            detail: "frame size points before start of file".to_string(),
        })?;
        let frame_event = decode_frame(&mmap[frame_start..frame_start + size], path)?;
        if frame_event.timestamp <= new_event.timestamp {
            return Ok(pos);
        }
        pos = frame_start;
    }
    Ok(0)
}

/// Write an entire list of events, oldest to newest, truncating the file
/// first. Takes an exclusive lock for the full operation.
pub fn forward_write(events: &[Event], path: &Path, wait: Duration) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    lock_exclusive_bounded(&file, path, wait)?;

    let result = (|| -> Result<()> {
        file.set_len(0)?;
        let mut writer = BufWriter::new(&file);
        for event in events {
            match event::encode(event) {
                Ok(payload) => {
                    writer.write_all(&frame_bytes(&payload))?;
                }
                Err(OshError::OversizedEvent { size }) => {
                    log::warn!("dropping oversized event ({size} bytes) writing {}", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        writer.flush()?;
        drop(writer);
        file.sync_data()?;
        Ok(())
    })();

    let _ = FileExt::unlock(&file);
    result
}

/// Acquire a shared lock on `path`, memory-map it, and return a lazy
/// backwards iterator over its events.
///
/// The returned iterator owns both the file (which keeps the lock alive)
/// and the mapping; dropping it (or fully draining it) releases both.
/// `CorruptFrame` is returned from `next()` if a trailing size word would
/// step outside the file.
pub fn reverse_scan(path: &Path, wait: Duration) -> Result<ReverseScan> {
    let file = OpenOptions::new().read(true).open(path)?;
    lock_shared_bounded(&file, path, wait)?;

    let len = file.metadata()?.len() as usize;
    let mmap = if len == 0 {
        None
    } else {
        Some(unsafe { Mmap::map(&file)? })
    };

    Ok(ReverseScan {
        _file: file,
        mmap,
        pos: len,
        path: path.to_path_buf(),
    })
}

/// Lazy, tail-to-head iterator over the frames of a `.osh` file.
///
/// Holds a shared advisory lock and a memory mapping for its entire
/// lifetime. Must be fully drained or dropped to release both — partial
/// consumption is fine, the lock releases on drop either way.
pub struct ReverseScan {
    _file: File,
    mmap: Option<Mmap>,
    pos: usize,
    path: PathBuf,
}

impl Iterator for ReverseScan {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == 0 {
            return None;
        }
        let mmap = self.mmap.as_ref()?;
        if self.pos < SIZE_WIDTH {
            return Some(Err(OshError::CorruptFrame {
                path: self.path.clone(),
                detail: "trailing size word runs past start of file".to_string(),
            }));
        }
        let size = u16::from_be_bytes([mmap[self.pos - 2], mmap[self.pos - 1]]) as usize;
        let frame_start = match self.pos.checked_sub(SIZE_WIDTH + size) {
            Some(v) => v,
            None => {
                return Some(Err(OshError::CorruptFrame {
                    path: self.path.clone(),
                    detail: "frame size points before start of file".to_string(),
                }))
            }
        };
        let payload = &mmap[frame_start..frame_start + size];
        let event = match decode_frame(payload, &self.path) {
            Ok(e) => e,
            Err(e) => return Some(Err(e)),
        };
        self.pos = frame_start;
        Some(Ok(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn event_at(ts: i64, command: &str) -> Event {
        Event::new(Utc.timestamp_opt(ts, 0).unwrap(), command)
    }

    fn timestamps(path: &Path) -> Vec<i64> {
        reverse_scan(path, Duration::from_secs(1))
            .unwrap()
            .map(|e| e.unwrap().timestamp.timestamp())
            .collect()
    }

    #[test]
    fn insert_into_empty_file_creates_one_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        insert(&event_at(1000, "ls"), &path, Duration::from_secs(1)).unwrap();
        assert_eq!(timestamps(&path), vec![1000]);
    }

    #[test]
    fn ordered_insert_in_the_middle() {
        // scenario 1 from spec.md §8
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        let wait = Duration::from_secs(1);
        insert(&event_at(1000, "a"), &path, wait).unwrap();
        insert(&event_at(3000, "b"), &path, wait).unwrap();
        insert(&event_at(4000, "c"), &path, wait).unwrap();
        insert(&event_at(2500, "ls"), &path, wait).unwrap();

        assert_eq!(timestamps(&path), vec![4000, 3000, 2500, 1000]);

        let forward: Vec<_> = {
            let mut v = timestamps(&path);
            v.reverse();
            v
        };
        assert_eq!(forward, vec![1000, 2500, 3000, 4000]);
    }

    #[test]
    fn insert_at_tail_and_head() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        let wait = Duration::from_secs(1);
        insert(&event_at(2000, "b"), &path, wait).unwrap();
        insert(&event_at(3000, "c"), &path, wait).unwrap(); // tail
        insert(&event_at(1000, "a"), &path, wait).unwrap(); // head
        assert_eq!(timestamps(&path), vec![3000, 2000, 1000]);
    }

    #[test]
    fn forward_write_then_reverse_scan_is_reverse_of_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        let events: Vec<_> = vec![
            event_at(1, "a"),
            event_at(2, "b"),
            event_at(3, "c"),
        ];
        forward_write(&events, &path, Duration::from_secs(1)).unwrap();

        let scanned: Vec<_> = reverse_scan(&path, Duration::from_secs(1))
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        let mut expected = events.clone();
        expected.reverse();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn reverse_scan_of_empty_file_yields_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        fs::write(&path, []).unwrap();
        let scanned: Vec<_> = reverse_scan(&path, Duration::from_secs(1)).unwrap().collect();
        assert!(scanned.is_empty());
    }

    #[test]
    fn reverse_scan_detects_corrupt_trailing_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        fs::write(&path, [0x01, 0x02]).unwrap(); // size word claims a 0x0102-byte payload that doesn't exist
        let mut scan = reverse_scan(&path, Duration::from_secs(1)).unwrap();
        assert!(matches!(scan.next(), Some(Err(OshError::CorruptFrame { .. }))));
    }

    #[test]
    fn reverse_scan_reports_the_real_path_for_an_undecodable_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        // a well-formed frame whose payload is not valid msgpack
        fs::write(&path, [0xff, 0x00, 0x01]).unwrap();
        let mut scan = reverse_scan(&path, Duration::from_secs(1)).unwrap();
        match scan.next() {
            Some(Err(OshError::CorruptFrame { path: reported, .. })) => {
                assert_eq!(reported, path);
            }
            other => panic!("expected CorruptFrame with the real path, got {other:?}"),
        }
    }

    #[test]
    fn append_does_not_reorder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        append(&event_at(1, "a"), &path).unwrap();
        append(&event_at(2, "b"), &path).unwrap();
        assert_eq!(timestamps(&path), vec![2, 1]);
    }
}
