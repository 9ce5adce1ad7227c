//! Native watcher backend
//!
//! Wraps the platform's recommended `notify` watcher, created on first use.
//! Callbacks run on notify's own thread; they push into a channel and wake
//! the driver, which drains the channel on its own thread.
//!
//! Like the OS services it wraps, this backend only says "something happened
//! here"; the registry re-stats to find out what.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use dirwatch_core::{Method, WatchError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::{Backend, RawEvent, RawKind};

pub struct NativeBackend {
    watcher: Option<RecommendedWatcher>,
    events_tx: Sender<notify::Result<Event>>,
    events_rx: Receiver<notify::Result<Event>>,
    wake: Arc<Notify>,
    watched: HashSet<PathBuf>,
}

impl NativeBackend {
    pub fn new(wake: Arc<Notify>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            watcher: None,
            events_tx,
            events_rx,
            wake,
            watched: HashSet::new(),
        }
    }

    fn watcher(&mut self) -> Result<&mut RecommendedWatcher, WatchError> {
        if self.watcher.is_none() {
            let events_tx = self.events_tx.clone();
            let wake = self.wake.clone();
            let watcher = RecommendedWatcher::new(
                move |result| {
                    // Unbounded channel: never blocks notify's thread
                    if events_tx.send(result).is_ok() {
                        wake.notify_one();
                    }
                },
                Config::default(),
            )
            .map_err(|e| WatchError::unavailable(Method::Native, e.to_string()))?;
            debug!("Native watcher started");
            self.watcher = Some(watcher);
        }

        self.watcher
            .as_mut()
            .ok_or_else(|| WatchError::unavailable(Method::Native, "watcher not running"))
    }

    /// Attribute a changed path to a watched path
    ///
    /// Events for the watched path itself come first; anything else is a
    /// change inside a watched directory.
    fn resolve(&self, changed: &Path, kind: &EventKind) -> Option<RawEvent> {
        if self.watched.contains(changed) {
            let raw = if matches!(kind, EventKind::Remove(_)) {
                RawKind::Removed
            } else {
                RawKind::Touched
            };
            return Some(RawEvent::new(changed.to_path_buf(), raw));
        }

        let parent = changed.parent()?;
        if self.watched.contains(parent) {
            let name = changed.file_name()?.to_os_string();
            return Some(RawEvent::child(parent.to_path_buf(), name, RawKind::Touched, None));
        }

        None
    }
}

impl Backend for NativeBackend {
    fn method(&self) -> Method {
        Method::Native
    }

    fn try_watch(&mut self, path: &Path, _is_dir: bool) -> Result<(), WatchError> {
        let watcher = self.watcher()?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| map_notify_error(e, path))?;
        trace!("Native watcher watching {}", path.display());
        self.watched.insert(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) {
        if !self.watched.remove(path) {
            return;
        }
        if let Some(watcher) = self.watcher.as_mut() {
            // The OS watch is gone already when the path was deleted
            if let Err(e) = watcher.unwatch(path) {
                trace!("Native unwatch of {}: {}", path.display(), e);
            }
        }
    }

    fn drain_events(&mut self) -> Result<Vec<RawEvent>, WatchError> {
        let mut out: Vec<RawEvent> = Vec::new();

        for result in self.events_rx.try_iter() {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!("Native watcher error: {}", e);
                    continue;
                }
            };

            if event.need_rescan() {
                out.push(RawEvent::overflow());
                continue;
            }
            if matches!(event.kind, EventKind::Access(_)) {
                continue;
            }

            for changed in &event.paths {
                if let Some(raw) = self.resolve(changed, &event.kind) {
                    if !out.contains(&raw) {
                        out.push(raw);
                    }
                }
            }
        }

        Ok(out)
    }
}

fn map_notify_error(err: notify::Error, path: &Path) -> WatchError {
    match err.kind {
        notify::ErrorKind::MaxFilesWatch => WatchError::ResourceExhausted {
            method: Method::Native,
            path: path.to_path_buf(),
        },
        notify::ErrorKind::Io(e) => WatchError::Io(e),
        notify::ErrorKind::PathNotFound => {
            WatchError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string()))
        }
        other => WatchError::unavailable(Method::Native, format!("{:?}", other)),
    }
}
