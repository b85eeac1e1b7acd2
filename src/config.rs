//! Process-wide configuration, gathered into one value constructed once at
//! startup and threaded through explicitly — no singleton, per the
//! "global mutable state" redesign note.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Base-directory layout and lock policy for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub base: PathBuf,
    pub lock_wait: Duration,
}

impl Config {
    /// Resolve from `OSH_HOME`, falling back to `$HOME/.osh`.
    pub fn from_env() -> Self {
        Config {
            base: resolve_base(),
            lock_wait: crate::log::DEFAULT_LOCK_WAIT,
        }
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.base.join("archive")
    }

    pub fn active_dir(&self) -> PathBuf {
        self.base.join("active")
    }

    pub fn local_log(&self) -> PathBuf {
        self.base.join("local.osh")
    }

    /// Resolve `local.osh` to its actual write target.
    ///
    /// `local.osh` is ordinarily a symlink into `active/` for the current
    /// machine, and its target may not exist yet (first run on a fresh
    /// machine). Following the symlink ourselves, rather than relying on
    /// the OS to do it during `open()`, lets the caller create the
    /// target's parent directory before writing — `active/` may not exist
    /// even though `local.osh` (the symlink itself) does.
    pub fn resolve_local_log(&self) -> PathBuf {
        let path = self.local_log();
        match std::fs::read_link(&path) {
            Ok(target) if target.is_absolute() => target,
            Ok(target) => path
                .parent()
                .map(|parent| parent.join(&target))
                .unwrap_or(target),
            Err(_) => path,
        }
    }

    pub fn archive_cache(&self) -> PathBuf {
        self.base.join("archived.osh")
    }
}

fn resolve_base() -> PathBuf {
    if let Ok(home) = env::var("OSH_HOME") {
        return PathBuf::from(home);
    }
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".osh")
}
