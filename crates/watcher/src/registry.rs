//! The watch registry
//!
//! Owns every [`Entry`], decides which backend services each one, runs the
//! scan algorithm and queues canonical events. Nothing here calls user code:
//! events go into a delivery queue that the driver dispatches once the
//! registry is no longer borrowed.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::iter;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use dirwatch_core::fingerprint::{self, Change, Probe};
use dirwatch_core::path as paths;
use dirwatch_core::{FsClass, Method, PathFilter, WatchConfig, WatchError};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::backend::{Backends, FALLBACK_ORDER};
use crate::entry::{Entry, EntryStatus, EventMask, HandleId, WatchMode, WatchModes};
use crate::scheduler::RescanScheduler;
use crate::EventKind;

/// Filesystem classifier used for backend selection
pub type Classifier = Box<dyn Fn(&Path) -> FsClass>;

/// One queued notification for one handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub handle: HandleId,
    /// Entry the event was computed on
    pub entry: PathBuf,
    /// Path reported to the handle (the entry or one of its children)
    pub path: PathBuf,
    pub mask: EventMask,
}

/// Snapshot of one client for [`WatchRegistry::statistics`]
#[derive(Debug, Clone, Serialize)]
pub struct ClientReport {
    pub handle: HandleId,
    pub ref_count: usize,
    pub stopped: bool,
    pub pending: Vec<EventKind>,
    pub files: bool,
    pub subdirs: bool,
}

/// Snapshot of one entry for [`WatchRegistry::statistics`]
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub path: PathBuf,
    pub is_dir: bool,
    pub exists: bool,
    pub backend: WatchMode,
    pub clients: Vec<ClientReport>,
    pub dependents: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub current_backend: Method,
    pub poll_interval_ms: Option<u64>,
    pub entries: Vec<EntryReport>,
}

pub struct WatchRegistry {
    config: WatchConfig,
    filter: PathFilter,
    classifier: Classifier,
    pub(crate) entries: BTreeMap<PathBuf, Entry>,
    pub(crate) backends: Backends,
    pub(crate) scheduler: RescanScheduler,
    /// Set while a pass iterates; removals go to `removal_list`
    delay_remove: bool,
    removal_list: BTreeSet<PathBuf>,
    /// A backend lost events; the next pass stats everything
    pub(crate) rescan_all: bool,
    /// Handles paused through `stop_scan`; their new clients start stopped
    stopped_handles: HashSet<HandleId>,
    queue: Vec<Delivery>,
}

impl WatchRegistry {
    pub fn new(config: WatchConfig, backends: Backends, classifier: Classifier) -> Self {
        let filter = PathFilter::new(&config.exclude).unwrap_or_else(|e| {
            warn!("Ignoring exclude patterns: {}", e);
            PathFilter::empty()
        });
        let scheduler = RescanScheduler::new(config.settle_delay());

        debug!(
            "Watch registry ready: preferred {}, network {}, poll {}ms",
            config.preferred_backend, config.network_preferred_backend, config.poll_interval_ms
        );

        Self {
            config,
            filter,
            classifier,
            entries: BTreeMap::new(),
            backends,
            scheduler,
            delay_remove: false,
            removal_list: BTreeSet::new(),
            rescan_all: false,
            stopped_handles: HashSet::new(),
            queue: Vec::new(),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn entry(&self, path: &Path) -> Option<&Entry> {
        self.entries.get(&paths::normalize(path)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current stat polling period, `None` when nothing is polled
    pub fn poll_interval(&self) -> Option<Duration> {
        self.scheduler.poll_interval()
    }

    /// Events computed since the last call
    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.queue)
    }

    /// Normalize a request path; `None` for requests that are silently dropped
    fn accept(&self, path: &Path, is_dir: bool) -> Option<PathBuf> {
        let Some(path) = paths::normalize(path) else {
            debug!("Ignoring watch request for non-absolute path {}", path.display());
            return None;
        };
        if paths::is_forbidden(&path) {
            debug!("Ignoring watch request for device path {}", path.display());
            return None;
        }
        if self.filter.is_excluded(&path, is_dir) {
            debug!("Ignoring watch request for excluded path {}", path.display());
            return None;
        }
        Some(path)
    }

    pub(crate) fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        self.filter.is_excluded(path, is_dir)
    }

    /// Register a client (or a dependent) on `path`
    pub fn add_entry(
        &mut self,
        handle: Option<HandleId>,
        path: &Path,
        dependent: Option<&Path>,
        is_dir: bool,
        modes: WatchModes,
    ) {
        let Some(path) = self.accept(path, is_dir) else {
            return;
        };

        if let Some(entry) = self.entries.get_mut(&path) {
            match (dependent, handle) {
                (Some(dependent), _) => {
                    entry.add_dependent(dependent);
                    trace!("Added already watched {} (for {})", path.display(), dependent.display());
                }
                (None, Some(handle)) => {
                    entry.add_client(handle, modes, self.stopped_handles.contains(&handle));
                    trace!(
                        "Added already watched {} (now {} clients)",
                        path.display(),
                        entry.client_count()
                    );
                }
                (None, None) => {}
            }
            return;
        }

        let mut modes = modes;
        let mut entry = Entry::new(path.clone(), is_dir);
        if let Some(probe) = Probe::stat(&path) {
            // Symlinks requested as files are never followed
            let entry_is_dir = probe.is_dir && (is_dir || !fingerprint::is_symlink(&path));

            if entry_is_dir && !is_dir {
                warn!("{} is a directory, use add_dir", path.display());
            } else if !entry_is_dir && is_dir {
                warn!("{} is a file, use add_file", path.display());
            }
            if !entry_is_dir && modes != WatchModes::DIR_ONLY {
                warn!("{} is a file; file and subdirectory modes do not apply", path.display());
                modes = WatchModes::DIR_ONLY;
            }

            entry.is_dir = entry_is_dir;
            entry.status = EntryStatus::Normal;
            entry.fingerprint = Some(probe.fingerprint);
        }

        match (dependent, handle) {
            (Some(dependent), _) => entry.add_dependent(dependent),
            (None, Some(handle)) => {
                entry.add_client(handle, modes, self.stopped_handles.contains(&handle))
            }
            (None, None) => {}
        }

        debug!(
            "Added {} {}{}",
            if entry.is_dir { "dir" } else { "file" },
            path.display(),
            if entry.exists() { "" } else { " (not existing)" }
        );

        let exists = entry.exists();
        let entry_is_dir = entry.is_dir;
        self.entries.insert(path.clone(), entry);

        if paths::is_noisy_path(&path) {
            return;
        }

        if exists && entry_is_dir && modes != WatchModes::DIR_ONLY {
            self.snapshot_children(handle, &path, modes);
        }

        self.add_watch(&path);
        self.update_poll_interval();
    }

    /// Register the immediate children of a newly watched directory
    fn snapshot_children(&mut self, handle: Option<HandleId>, dir: &Path, modes: WatchModes) {
        let want_dirs = modes.contains(WatchModes::SUBDIRS);
        // inotify reports changes to files through the directory watch
        let inotify = self.preferred_method(dir, (self.classifier)(dir)) == Method::Inotify
            && self.backends.is_available(Method::Inotify);
        let want_files = modes.contains(WatchModes::FILES) && !inotify;
        if !want_dirs && !want_files {
            return;
        }

        let children: Vec<(PathBuf, bool)> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| (e.path().to_path_buf(), e.file_type().is_dir()))
            .collect();

        for (child, child_is_dir) in children {
            if child_is_dir && want_dirs {
                self.add_entry(handle, &child, None, true, modes);
            } else if !child_is_dir && want_files {
                self.add_entry(handle, &child, None, false, WatchModes::DIR_ONLY);
            }
        }
    }

    fn preferred_method(&self, path: &Path, class: FsClass) -> Method {
        if let Some(method) = self.config.forced_backend(path) {
            return method;
        }
        if class.is_network() {
            self.config.network_preferred_backend
        } else {
            self.config.preferred_backend
        }
    }

    /// The backend new local entries would use
    pub fn current_backend(&self) -> Method {
        let preferred = self.config.preferred_backend;
        iter::once(preferred)
            .chain(FALLBACK_ORDER)
            .find(|m| self.backends.is_available(*m))
            .unwrap_or(Method::Stat)
    }

    /// Pick a backend for `path`, falling back until one accepts it
    pub(crate) fn add_watch(&mut self, path: &Path) {
        let Some(entry) = self.entries.get(path) else {
            return;
        };
        let is_dir = entry.is_dir;
        let exists = entry.exists();

        let class = (self.classifier)(path);
        let preferred = self.preferred_method(path, class);
        let candidates: Vec<Method> = iter::once(preferred)
            .chain(FALLBACK_ORDER.into_iter().filter(|m| *m != preferred))
            .collect();

        let mut chosen = Method::Stat;
        for method in candidates {
            if self.use_method(path, method, is_dir, exists) {
                chosen = method;
                break;
            }
        }

        let freq_ms = if class.is_network() {
            self.config.network_poll_interval_ms
        } else {
            self.config.poll_interval_ms
        };

        if let Some(entry) = self.entries.get_mut(path) {
            entry.mode = chosen.into();
            entry.dirty = false;
            if chosen == Method::Stat {
                entry.freq_ms = freq_ms;
                entry.msec_left = 0;
            }
            debug!("Watching {} with {}", path.display(), chosen);
        }

        // Missing paths learn about their creation through the parent
        if !exists {
            self.attach_to_parent(path);
        }
    }

    fn use_method(&mut self, path: &Path, method: Method, is_dir: bool, exists: bool) -> bool {
        if !self.backends.is_available(method) {
            return false;
        }
        if method == Method::Stat || !exists {
            return true;
        }

        match self.backends.try_watch(method, path, is_dir) {
            Ok(()) => true,
            Err(e) if e.is_resource_exhausted() => {
                warn!("{}; falling back to the next backend", e);
                false
            }
            Err(e @ WatchError::BackendUnavailable { .. }) => {
                debug!("{}", e);
                self.disable_backend(method, Some(path));
                false
            }
            Err(e) => {
                debug!("{} failed for {}: {}", method, path.display(), e);
                false
            }
        }
    }

    /// Drop a backend and move its entries to the next one
    pub(crate) fn disable_backend(&mut self, method: Method, except: Option<&Path>) {
        self.backends.disable(method);

        let mode = WatchMode::from(method);
        let homeless: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(path, entry)| entry.mode == mode && Some(path.as_path()) != except)
            .map(|(path, _)| path.clone())
            .collect();
        if !homeless.is_empty() {
            warn!("{} backend lost, moving {} entries", method, homeless.len());
        }

        for path in homeless {
            if let Some(entry) = self.entries.get_mut(&path) {
                entry.mode = WatchMode::Unknown;
            }
            self.add_watch(&path);
        }
        self.update_poll_interval();
    }

    fn remove_watch(&mut self, path: &Path) {
        if let Some(method) = self.entries.get(path).and_then(|e| e.mode.method()) {
            self.backends.unwatch(method, path);
        }
    }

    pub(crate) fn attach_to_parent(&mut self, path: &Path) {
        let parent = paths::parent_dir(path);
        if parent != path {
            self.add_entry(None, &parent, Some(path), true, WatchModes::DIR_ONLY);
        }
    }

    pub(crate) fn detach_from_parent(&mut self, path: &Path) {
        let parent = paths::parent_dir(path);
        if parent != path {
            self.remove_entry_at(&parent, None, Some(path));
        }
    }

    /// Drop one reference held by a client (or a dependent) on `path`
    pub fn remove_entry(&mut self, handle: Option<HandleId>, path: &Path, dependent: Option<&Path>) {
        if let Some(path) = paths::normalize(path) {
            self.remove_entry_at(&path, handle, dependent);
        }
    }

    fn remove_entry_at(&mut self, path: &Path, handle: Option<HandleId>, dependent: Option<&Path>) {
        self.removal_list.remove(path);

        let Some(entry) = self.entries.get_mut(path) else {
            return;
        };
        match (dependent, handle) {
            (Some(dependent), _) => entry.remove_dependent(dependent),
            (None, Some(handle)) => entry.remove_client(handle),
            (None, None) => {}
        }
        if entry.is_valid() {
            return;
        }

        if self.delay_remove {
            self.removal_list.insert(path.to_path_buf());
            return;
        }
        self.drop_entry(path);
    }

    fn drop_entry(&mut self, path: &Path) {
        let Some(entry) = self.entries.get(path) else {
            return;
        };
        let exists = entry.exists();
        let is_dir = entry.is_dir;

        if exists {
            self.remove_watch(path);
        }
        let parent = paths::parent_dir(path);
        if self.entries.get(&parent).is_some_and(|p| p.has_dependent(path)) {
            self.remove_entry_at(&parent, None, Some(path));
        }

        self.entries.remove(path);
        debug!("Removed {} {}", if is_dir { "dir" } else { "file" }, path.display());
        self.update_poll_interval();
    }

    /// Remove a handle from every entry, whatever its ref counts
    pub fn remove_entries(&mut self, handle: HandleId) {
        self.stopped_handles.remove(&handle);
        let owned: Vec<PathBuf> = self
            .entries
            .iter_mut()
            .filter_map(|(path, entry)| {
                entry.client_mut(handle).map(|client| {
                    client.ref_count = 1;
                    path.clone()
                })
            })
            .collect();

        for path in owned {
            self.remove_entry_at(&path, Some(handle), None);
        }
        self.update_poll_interval();
    }

    /// Entries whose removal was deferred during a pass
    fn remove_delayed(&mut self) {
        self.delay_remove = false;
        while let Some(path) = self.removal_list.pop_first() {
            if self.entries.get(&path).is_some_and(|e| !e.is_valid()) {
                self.drop_entry(&path);
            }
        }
    }

    /// Poll period is the shortest period among Stat-mode entries
    pub(crate) fn update_poll_interval(&mut self) {
        let min = self
            .entries
            .values()
            .filter(|e| e.mode == WatchMode::Stat)
            .map(|e| e.freq_ms)
            .min();
        self.scheduler.set_poll_interval(min.map(Duration::from_millis));
    }

    /// Pause delivery for one handle's client on `path` (or all clients)
    pub fn stop_entry_scan(&mut self, handle: Option<HandleId>, path: &Path, per_path: bool) -> bool {
        let Some(entry) = paths::normalize(path).and_then(|p| self.entries.get_mut(&p)) else {
            return false;
        };

        let mut still_watching = 0;
        for client in &mut entry.clients {
            if handle.map_or(true, |h| h == client.handle) {
                client.watching_stopped = true;
                if per_path {
                    client.path_stopped = true;
                }
            } else if !client.watching_stopped {
                still_watching += client.ref_count;
            }
        }

        debug!("Stopped scanning {} (now {} watchers)", entry.path.display(), still_watching);
        true
    }

    /// Resume delivery; with `notify`, deliver one event covering the gap
    pub fn restart_entry_scan(&mut self, handle: Option<HandleId>, path: &Path, notify: bool) -> bool {
        let Some(path) = paths::normalize(path) else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(&path) else {
            return false;
        };

        let mut was_watching = 0;
        let mut new_watching = 0;
        for client in &mut entry.clients {
            if !client.watching_stopped {
                was_watching += client.ref_count;
            } else if handle.map_or(true, |h| h == client.handle) {
                client.watching_stopped = false;
                client.path_stopped = false;
                if !notify {
                    client.pending = EventMask::empty();
                }
                new_watching += client.ref_count;
            }
        }
        if new_watching == 0 {
            return false;
        }

        debug!(
            "Restarted scanning {} (now {} watchers)",
            path.display(),
            was_watching + new_watching
        );

        if !notify {
            if was_watching == 0 {
                self.rebaseline(&path);
            }
            return true;
        }

        let mut ev = EventMask::empty();
        if was_watching == 0 {
            if let Some(entry) = self.entries.get_mut(&path) {
                entry.msec_left = 0;
                entry.dirty = true;
            }
            let was_dirty = true;
            ev = self.scan_entry(&path, true);
            self.apply_scan_result(&path, ev, was_dirty);
        }
        self.emit_event(&path, ev, None, None);
        true
    }

    /// Refresh existence and fingerprint without reporting anything
    fn rebaseline(&mut self, path: &Path) {
        let probe = Probe::stat(path);
        let Some(entry) = self.entries.get_mut(path) else {
            return;
        };
        let was_missing = !entry.exists();
        entry.msec_left = 0;
        entry.dirty = false;

        match probe {
            Some(probe) => {
                entry.status = EntryStatus::Normal;
                entry.fingerprint = Some(probe.fingerprint);
                trace!("Rebaselined {}", path.display());
                if was_missing {
                    self.detach_from_parent(path);
                    self.add_watch(path);
                }
            }
            None => {
                entry.status = EntryStatus::NonExistent;
                entry.fingerprint = None;
                trace!("Rebaselined {} (not existing)", path.display());
                self.attach_to_parent(path);
            }
        }
    }

    /// Pause every entry of `handle`
    pub fn stop_scan(&mut self, handle: HandleId) {
        self.stopped_handles.insert(handle);
        let owned = self.paths_of(handle, |_| true);
        for path in owned {
            self.stop_entry_scan(Some(handle), &path, false);
        }
    }

    /// Resume every entry of `handle`
    ///
    /// Entries stopped one by one stay stopped unless `include_stopped`.
    pub fn start_scan(&mut self, handle: HandleId, notify: bool, include_stopped: bool) {
        self.stopped_handles.remove(&handle);
        let owned = self.paths_of(handle, |client| {
            client.watching_stopped && (include_stopped || !client.path_stopped)
        });
        for path in owned {
            self.restart_entry_scan(Some(handle), &path, notify);
        }
    }

    fn paths_of<F>(&self, handle: HandleId, filter: F) -> Vec<PathBuf>
    where
        F: Fn(&crate::entry::Client) -> bool,
    {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.client(handle).is_some_and(&filter))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn contains(&self, handle: HandleId, path: &Path) -> bool {
        self.entry(path).is_some_and(|e| e.client(handle).is_some())
    }

    pub fn last_change_time(&self, path: &Path) -> Option<SystemTime> {
        self.entry(path).and_then(Entry::last_change_time)
    }

    /// Queue `mask` for every interested client of the entry at `path`
    ///
    /// Child events go to clients whose modes cover the child kind. Stopped
    /// clients collect entry-level events in their pending mask.
    pub(crate) fn emit_event(
        &mut self,
        path: &Path,
        mask: EventMask,
        child: Option<&Path>,
        child_is_dir: Option<bool>,
    ) {
        let Self { entries, queue, .. } = self;
        let Some(entry) = entries.get_mut(path) else {
            return;
        };
        let target = child.unwrap_or(path);

        trace!("{:?} {} ({} clients)", mask, target.display(), entry.clients.len());

        for client in &mut entry.clients {
            if client.ref_count == 0 {
                continue;
            }
            if child.is_some() && !client.wants_child(child_is_dir) {
                continue;
            }
            if client.watching_stopped {
                if child.is_none() {
                    client.pending |= mask;
                }
                continue;
            }

            let mut ev = mask;
            if child.is_none() {
                if ev.is_empty() || ev == EventMask::CHANGED {
                    ev |= client.pending;
                }
                client.pending = EventMask::empty();
            }
            if ev.is_empty() {
                continue;
            }

            queue.push(Delivery {
                handle: client.handle,
                entry: path.to_path_buf(),
                path: target.to_path_buf(),
                mask: ev,
            });
        }
    }

    /// Decide what happened to the entry at `path` since the last scan
    pub fn scan_entry(&mut self, path: &Path, poll_tick: bool) -> EventMask {
        let interval_ms = self
            .scheduler
            .poll_interval()
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let policy = self.config.fingerprint;

        let Some(entry) = self.entries.get_mut(path) else {
            return EventMask::empty();
        };

        match entry.mode {
            WatchMode::Unknown => return EventMask::empty(),
            WatchMode::Stat => {
                if entry.dirty {
                    entry.dirty = false;
                } else {
                    if !poll_tick {
                        return EventMask::empty();
                    }
                    // A 5s entry under a 500ms timer is stat'ed every 10th tick
                    entry.msec_left -= interval_ms;
                    if entry.msec_left > 0 {
                        return EventMask::empty();
                    }
                    entry.msec_left += entry.freq_ms as i64;
                }
            }
            _ => {
                if !entry.dirty {
                    return EventMask::empty();
                }
                entry.dirty = false;
            }
        }

        let Some(probe) = Probe::stat(path) else {
            entry.status = EntryStatus::NonExistent;
            return match entry.fingerprint.take() {
                Some(_) => EventMask::DELETED,
                None => EventMask::empty(),
            };
        };

        if entry.status == EntryStatus::NonExistent {
            entry.status = EntryStatus::Normal;
            entry.fingerprint = Some(probe.fingerprint);
            trace!("{} was created", path.display());
            self.detach_from_parent(path);
            return EventMask::CREATED;
        }

        let Some(previous) = entry.fingerprint else {
            entry.fingerprint = Some(probe.fingerprint);
            return EventMask::empty();
        };

        match previous.compare(&probe.fingerprint, &policy) {
            Change::Unchanged => EventMask::empty(),
            Change::Modified => {
                entry.fingerprint = Some(probe.fingerprint);
                EventMask::CHANGED
            }
            Change::Replaced => {
                entry.fingerprint = Some(probe.fingerprint);
                let event_driven = entry.mode.is_event_driven();
                trace!("{} was replaced", path.display());
                // The old watch followed the old inode
                if event_driven {
                    self.remove_watch(path);
                    self.add_watch(path);
                }
                EventMask::DELETED | EventMask::CREATED
            }
        }
    }

    /// Backend bookkeeping after a scan
    fn apply_scan_result(&mut self, path: &Path, ev: EventMask, was_dirty: bool) {
        let Some(entry) = self.entries.get(path) else {
            return;
        };
        let mode = entry.mode;
        let is_dir = entry.is_dir;

        if ev == EventMask::DELETED {
            if mode.is_event_driven() {
                self.remove_watch(path);
            }
            self.attach_to_parent(path);
        } else if ev == EventMask::CREATED {
            if mode.is_event_driven() {
                self.add_watch(path);
            }
        } else if mode == WatchMode::Native && !is_dir && was_dirty {
            // The OS watch can silently vanish on delete + recreate
            if let Err(e) = self.backends.try_watch(Method::Native, path, false) {
                trace!("Native re-watch of {}: {}", path.display(), e);
            }
        }
    }

    /// Report queued child modifications; the directory's own path merges into `ev`
    fn flush_child_changes(&mut self, path: &Path, ev: EventMask) -> EventMask {
        let Some(entry) = self.entries.get_mut(path) else {
            return ev;
        };
        if entry.pending_child_changes.is_empty() {
            return ev;
        }
        let changes = std::mem::take(&mut entry.pending_child_changes);

        let mut ev = ev;
        for changed in changes {
            if changed == path {
                if ev.is_empty() {
                    ev = EventMask::CHANGED;
                }
                continue;
            }
            trace!("Pending change for {}", changed.display());
            self.emit_event(path, EventMask::CHANGED, Some(&changed), None);
        }
        ev
    }

    /// Mark the dependents of `path` dirty, recursively
    pub(crate) fn propagate_dirty(&mut self, path: &Path) {
        let dependents = match self.entries.get(path) {
            Some(entry) => entry.dependents.clone(),
            None => return,
        };
        for dependent in dependents {
            if let Some(sub) = self.entries.get_mut(&dependent) {
                if !sub.dirty {
                    sub.dirty = true;
                    self.propagate_dirty(&dependent);
                }
            }
        }
    }

    /// One pass over every entry
    ///
    /// `poll_tick` is set when the stat poll timer fired; Stat-mode entries
    /// are only counted down on poll ticks.
    pub fn rescan_pass(&mut self, poll_tick: bool) {
        self.delay_remove = true;

        if std::mem::take(&mut self.rescan_all) {
            for entry in self.entries.values_mut() {
                entry.dirty = true;
            }
        } else {
            let dirty: Vec<PathBuf> = self
                .entries
                .iter()
                .filter(|(_, e)| e.mode.is_event_driven() && e.dirty)
                .map(|(path, _)| path.clone())
                .collect();
            for path in dirty {
                self.propagate_dirty(&path);
            }
        }

        let keys: Vec<PathBuf> = self.entries.keys().cloned().collect();
        for path in keys {
            let Some(entry) = self.entries.get(&path) else {
                continue;
            };
            // Removal deferred
            if !entry.is_valid() {
                continue;
            }
            let was_dirty = entry.dirty;

            let ev = self.scan_entry(&path, poll_tick);
            if !ev.is_empty() {
                trace!("Scan of {} says {:?}", path.display(), ev);
            }
            self.apply_scan_result(&path, ev, was_dirty);

            let ev = self.flush_child_changes(&path, ev);
            if !ev.is_empty() {
                self.emit_event(&path, ev, None, None);
            }
        }

        self.remove_delayed();
        self.update_poll_interval();
    }

    /// Run whatever timers are due at `now`
    pub fn fire_timers(&mut self, now: Instant) -> bool {
        let due = self.scheduler.take_due(now);
        if !due.any() {
            return false;
        }
        if due.poll {
            // This pass covers whatever the settle timer was waiting for
            self.scheduler.clear_settle();
        }
        self.rescan_pass(due.poll);
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Structured dump of every entry, also logged at debug level
    pub fn statistics(&self) -> Statistics {
        let entries: Vec<EntryReport> = self
            .entries
            .values()
            .map(|entry| EntryReport {
                path: entry.path.clone(),
                is_dir: entry.is_dir,
                exists: entry.exists(),
                backend: entry.mode,
                clients: entry
                    .clients
                    .iter()
                    .map(|c| ClientReport {
                        handle: c.handle,
                        ref_count: c.ref_count,
                        stopped: c.watching_stopped,
                        pending: c.pending.kinds(),
                        files: c.modes.contains(WatchModes::FILES),
                        subdirs: c.modes.contains(WatchModes::SUBDIRS),
                    })
                    .collect(),
                dependents: entry.dependents.clone(),
            })
            .collect();

        debug!("Entries watched: {}", entries.len());
        for report in &entries {
            debug!(
                "{} {} [{:?}{}] {} clients, {} dependents",
                if report.is_dir { "dir " } else { "file" },
                report.path.display(),
                report.backend,
                if report.exists { "" } else { ", not existing" },
                report.clients.len(),
                report.dependents.len()
            );
        }

        Statistics {
            current_backend: self.current_backend(),
            poll_interval_ms: self.poll_interval().map(|d| d.as_millis() as u64),
            entries,
        }
    }
}
