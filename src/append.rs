//! Capture one event from the shell hook and insert it into the local log.

use crate::config::Config;
use crate::error::Result;
use crate::event::Event;
use chrono::{TimeZone, Utc};

/// Raw fields captured by the shell post-command hook.
pub struct CapturedCommand {
    /// POSIX seconds, may be fractional.
    pub starttime: f64,
    /// POSIX seconds, may be fractional.
    pub endtime: f64,
    pub command: String,
    pub folder: Option<String>,
    pub exit_code: Option<i64>,
    pub machine: Option<String>,
    pub session: Option<String>,
}

fn posix_seconds_to_utc(seconds: f64) -> chrono::DateTime<Utc> {
    let whole = seconds.trunc() as i64;
    let nanos = (seconds.fract().abs() * 1e9).round() as u32;
    Utc.timestamp_opt(whole, nanos).single().unwrap_or_else(|| Utc.timestamp_opt(whole, 0).unwrap())
}

/// Build the Event for one captured command and insert it into
/// `local.osh` under an exclusive lock.
///
/// `OversizedEvent` is handled inside [`crate::log::insert`] as a silent
/// drop; any other failure (I/O, lock timeout) propagates to the caller,
/// which per `spec.md` §4.F turns into a non-zero process exit without
/// touching any previously persisted history.
pub fn record(config: &Config, captured: CapturedCommand) -> Result<()> {
    let duration = captured.endtime - captured.starttime;
    let event = Event {
        timestamp: posix_seconds_to_utc(captured.starttime),
        command: captured.command,
        duration: Some(duration),
        exit_code: captured.exit_code,
        folder: captured.folder,
        machine: captured.machine,
        session: captured.session,
    };
    crate::log::insert(&event, &config.resolve_local_log(), config.lock_wait)
}
