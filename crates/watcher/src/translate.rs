//! Raw backend events to registry state
//!
//! Backends say which watched path saw what. Here that becomes dirty flags,
//! new entries for appearing subdirectories, queued child events and a
//! settle timer for the pass that follows.

use std::path::{Path, PathBuf};

use dirwatch_core::fingerprint::{self, Probe};
use dirwatch_core::Method;
use tracing::{debug, trace, warn};

use crate::backend::{RawEvent, RawKind};
use crate::entry::{EntryStatus, EventMask, HandleId, WatchModes};
use crate::registry::WatchRegistry;

impl WatchRegistry {
    /// Drain every backend and apply what it saw
    pub fn process_backend_events(&mut self) {
        for (method, result) in self.backends.drain() {
            match result {
                Ok(events) => {
                    for event in events {
                        self.handle_raw_event(method, event);
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    self.disable_backend(method, None);
                }
            }
        }
    }

    pub(crate) fn handle_raw_event(&mut self, method: Method, event: RawEvent) {
        if event.kind == RawKind::Overflow {
            warn!("{} backend dropped events, rescanning everything", method);
            self.rescan_all = true;
            self.scheduler.arm_settle();
            return;
        }

        let Some(entry) = self.entries.get_mut(&event.path) else {
            trace!("{} event for unwatched {}", method, event.path.display());
            return;
        };
        // Late events from a backend this entry has moved away from
        if entry.mode.method() != Some(method) {
            return;
        }
        if !entry.exists() {
            return;
        }

        trace!("{} {:?} on {} ({:?})", method, event.kind, event.path.display(), event.name);

        let was_dirty = entry.dirty;
        entry.dirty = true;

        match event.kind {
            RawKind::SelfDeleted => self.handle_self_deleted(&event.path),
            RawKind::Removed => {
                if Probe::stat(&event.path).is_none() {
                    self.handle_self_deleted(&event.path);
                }
            }
            RawKind::ChildCreated => self.handle_child_created(method, &event),
            RawKind::ChildDeleted => self.handle_child_deleted(&event),
            RawKind::Modified { attrib } => self.handle_child_modified(&event, was_dirty, attrib),
            RawKind::Touched | RawKind::Overflow => {}
        }

        self.scheduler.arm_settle();
    }

    fn handle_self_deleted(&mut self, path: &Path) {
        let Some(entry) = self.entries.get_mut(path) else {
            return;
        };
        if !entry.exists() {
            return;
        }
        entry.status = EntryStatus::NonExistent;
        entry.fingerprint = None;
        let mode = entry.mode;
        let parent = entry.parent_dir();

        debug!("{} was deleted", path.display());
        if let Some(method) = mode.method() {
            self.backends.unwatch(method, path);
        }
        self.emit_event(path, EventMask::DELETED, None, None);

        if let Some(parent_entry) = self.entries.get_mut(&parent) {
            parent_entry.dirty = true;
        }
        self.attach_to_parent(path);
    }

    fn handle_child_created(&mut self, method: Method, event: &RawEvent) {
        let Some(child) = event.child_path() else {
            return;
        };
        let Some(entry) = self.entries.get(&event.path) else {
            return;
        };

        // A missing path we were waiting for
        if entry.has_dependent(&child) {
            trace!("Awaited {} appeared", child.display());
            if let Some(sub) = self.entries.get_mut(&child) {
                sub.dirty = true;
            }
            self.scheduler.settle_now();
            return;
        }

        if !entry.is_dir || entry.clients.is_empty() {
            return;
        }

        let is_dir = match event.is_dir {
            Some(is_dir) => is_dir,
            None => Probe::stat(&child).is_some_and(|p| p.is_dir) && !fingerprint::is_symlink(&child),
        };
        if self.is_excluded(&child, is_dir) {
            return;
        }

        let interested: Vec<(HandleId, WatchModes)> = entry
            .clients
            .iter()
            .filter(|c| c.wants_child(Some(is_dir)))
            .map(|c| (c.handle, c.modes))
            .collect();

        // inotify covers files through the directory watch
        if is_dir || method != Method::Inotify {
            for (handle, modes) in &interested {
                let modes = if is_dir { *modes } else { WatchModes::DIR_ONLY };
                self.add_entry(Some(*handle), &child, None, is_dir, modes);
            }
        }

        if !interested.is_empty() {
            debug!(
                "{} handles monitoring the new {} {}",
                interested.len(),
                if is_dir { "directory" } else { "file" },
                child.display()
            );
            self.emit_event(&event.path, EventMask::CREATED, Some(&child), Some(is_dir));
        }

        if method == Method::Inotify {
            if let Some(entry) = self.entries.get_mut(&event.path) {
                let own: PathBuf = entry.path.clone();
                entry.push_child_change(own);
            }
        }
    }

    fn handle_child_deleted(&mut self, event: &RawEvent) {
        let Some(child) = event.child_path() else {
            return;
        };
        let Some(entry) = self.entries.get(&event.path) else {
            return;
        };
        if !entry.is_dir || entry.clients.is_empty() {
            return;
        }
        if self.is_excluded(&child, event.is_dir.unwrap_or(false)) {
            return;
        }
        self.emit_event(&event.path, EventMask::DELETED, Some(&child), event.is_dir);
    }

    fn handle_child_modified(&mut self, event: &RawEvent, was_dirty: bool, attrib: bool) {
        let child = event.child_path();
        if child
            .as_deref()
            .is_some_and(|c| self.is_excluded(c, event.is_dir.unwrap_or(false)))
        {
            return;
        }

        let Some(entry) = self.entries.get_mut(&event.path) else {
            return;
        };
        if !entry.is_dir || entry.clients.is_empty() {
            return;
        }

        let changed = child.clone().unwrap_or_else(|| entry.path.clone());
        entry.push_child_change(changed);
        // Writes inside the directory do not touch the directory itself
        entry.dirty = was_dirty || (child.is_none() && attrib);
    }
}
