//! Common utilities for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crossbeam_channel::Receiver;
use dirwatch::{EventKind, Method, Registry, WatchConfig, WatchEvent};
use filetime::{set_file_mtime, FileTime};

/// Configuration that only uses stat polling
pub fn stat_config() -> WatchConfig {
    WatchConfig {
        preferred_backend: Method::Stat,
        network_preferred_backend: Method::Stat,
        poll_interval_ms: 100,
        ..WatchConfig::default()
    }
}

pub fn stat_registry() -> Registry {
    Registry::new(stat_config())
}

/// Drains a watcher's event channel
pub struct Recorder {
    rx: Receiver<WatchEvent>,
}

impl Recorder {
    pub fn new(rx: Receiver<WatchEvent>) -> Self {
        Self { rx }
    }

    pub fn take(&self) -> Vec<WatchEvent> {
        self.rx.try_iter().collect()
    }

    /// Kinds received for `path`, in order
    pub fn kinds_for(&self, path: &Path) -> Vec<EventKind> {
        self.take()
            .into_iter()
            .filter(|e| e.path == path)
            .map(|e| e.kind)
            .collect()
    }
}

pub fn event(path: &Path, kind: EventKind) -> WatchEvent {
    WatchEvent {
        path: PathBuf::from(path),
        kind,
    }
}

/// Move the mtime well away from now so coarse timestamps still differ
pub fn bump_mtime(path: &Path, secs: u64) {
    let t = SystemTime::now() + Duration::from_secs(secs);
    set_file_mtime(path, FileTime::from_system_time(t)).unwrap();
}
