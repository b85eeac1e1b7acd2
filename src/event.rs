use crate::error::{OshError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The maximum payload size a single frame can hold: a two-byte big-endian
/// length prefix caps it at `2^16 - 1` bytes.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// A single recorded shell command and its metadata.
///
/// Optional fields are jointly present for native records recorded by the
/// shell hook; legacy `.zsh_history` imports carry only `timestamp` and
/// `command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub duration: Option<f64>,
    pub exit_code: Option<i64>,
    pub folder: Option<String>,
    pub machine: Option<String>,
    pub session: Option<String>,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, command: impl Into<String>) -> Self {
        Event {
            timestamp,
            command: command.into(),
            duration: None,
            exit_code: None,
            folder: None,
            machine: None,
            session: None,
        }
    }

    /// True for events that carry the full native field set.
    pub fn is_native(&self) -> bool {
        self.duration.is_some()
            || self.exit_code.is_some()
            || self.folder.is_some()
            || self.machine.is_some()
            || self.session.is_some()
    }
}

/// On-disk payload shape, tagged with an explicit version field so that
/// future tags can add variants without changing the frame grammar.
#[derive(Debug, Serialize, Deserialize)]
struct TaggedEventV1 {
    version: String,
    timestamp: DateTime<Utc>,
    command: String,
    duration: Option<f64>,
    exit_code: Option<i64>,
    folder: Option<String>,
    machine: Option<String>,
    session: Option<String>,
}

const TAG_V1: &str = "v1";

/// Encode an event as a self-describing MessagePack payload.
///
/// Fails with `OversizedEvent` if the payload would exceed 65,535 bytes;
/// callers treat that as a dropped event, never a hard error.
pub fn encode(event: &Event) -> Result<Vec<u8>> {
    let tagged = TaggedEventV1 {
        version: TAG_V1.to_string(),
        timestamp: event.timestamp,
        command: event.command.clone(),
        duration: event.duration,
        exit_code: event.exit_code,
        folder: event.folder.clone(),
        machine: event.machine.clone(),
        session: event.session.clone(),
    };
    let payload = rmp_serde::to_vec_named(&tagged).map_err(|e| OshError::CorruptFrame {
        path: std::path::PathBuf::new(),
        detail: format!("failed to encode event: {e}"),
    })?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(OshError::OversizedEvent { size: payload.len() });
    }
    Ok(payload)
}

/// Decode a MessagePack payload back into an event.
///
/// Fails with `CorruptFrame` if the bytes are not a valid `v1` record.
pub fn decode(payload: &[u8]) -> Result<Event> {
    let tagged: TaggedEventV1 =
        rmp_serde::from_slice(payload).map_err(|e| OshError::CorruptFrame {
            path: std::path::PathBuf::new(),
            detail: format!("failed to decode payload: {e}"),
        })?;
    if tagged.version != TAG_V1 {
        return Err(OshError::CorruptFrame {
            path: std::path::PathBuf::new(),
            detail: format!("unknown version tag {:?}", tagged.version),
        });
    }
    Ok(Event {
        timestamp: tagged.timestamp,
        command: tagged.command,
        duration: tagged.duration,
        exit_code: tagged.exit_code,
        folder: tagged.folder,
        machine: tagged.machine,
        session: tagged.session,
    })
}
