use std::path::PathBuf;

/// The error kinds named in the history core's error handling design.
///
/// `OversizedEvent` is handled locally (the event is dropped) wherever it
/// can occur and rarely escapes to a caller; it is still a variant here so
/// that `encode` has an honest return type.
#[derive(Debug, thiserror::Error)]
pub enum OshError {
    #[error("event payload exceeds the 16-bit frame size limit ({size} bytes)")]
    OversizedEvent { size: usize },

    #[error("corrupt frame in {}: {detail}", path.display())]
    CorruptFrame { path: PathBuf, detail: String },

    #[error("timed out waiting for a lock on {}", path.display())]
    LockTimeout { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error in {} at line {line}: {detail}", path.display())]
    ParseError {
        path: PathBuf,
        line: usize,
        detail: String,
    },
}

pub type Result<T> = std::result::Result<T, OshError>;
