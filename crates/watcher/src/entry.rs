//! Per-path watch state and per-registration client records

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bitflags::bitflags;
use dirwatch_core::{Fingerprint, Method};
use serde::Serialize;

use crate::EventKind;

/// Identifies one [`crate::Watcher`] within its registry
pub type HandleId = u64;

bitflags! {
    /// What a directory watch covers besides the directory itself
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WatchModes: u8 {
        /// Report changes to files directly inside the directory
        const FILES = 0b01;
        /// Watch subdirectories with the same modes, recursively
        const SUBDIRS = 0b10;
    }
}

impl WatchModes {
    /// Only the directory entry itself
    pub const DIR_ONLY: Self = Self::empty();
}

bitflags! {
    /// Canonical change kinds; the empty mask means "no change"
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u8 {
        const DELETED = 0b001;
        const CREATED = 0b010;
        const CHANGED = 0b100;
    }
}

impl EventMask {
    /// Individual kinds, in delivery order
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        if self.contains(EventMask::DELETED) {
            kinds.push(EventKind::Deleted);
        }
        if self.contains(EventMask::CREATED) {
            kinds.push(EventKind::Created);
        }
        if self.contains(EventMask::CHANGED) {
            kinds.push(EventKind::Changed);
        }
        kinds
    }
}

/// Backend currently servicing an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// No backend (noisy files, or not set up yet)
    Unknown,
    Stat,
    Inotify,
    Daemon,
    Native,
}

impl WatchMode {
    /// Modes that learn about changes from events instead of polling
    pub fn is_event_driven(&self) -> bool {
        matches!(self, WatchMode::Inotify | WatchMode::Daemon | WatchMode::Native)
    }

    pub fn method(&self) -> Option<Method> {
        match self {
            WatchMode::Unknown => None,
            WatchMode::Stat => Some(Method::Stat),
            WatchMode::Inotify => Some(Method::Inotify),
            WatchMode::Daemon => Some(Method::Daemon),
            WatchMode::Native => Some(Method::Native),
        }
    }
}

impl From<Method> for WatchMode {
    fn from(method: Method) -> Self {
        match method {
            Method::Inotify => WatchMode::Inotify,
            Method::Daemon => WatchMode::Daemon,
            Method::Native => WatchMode::Native,
            Method::Stat => WatchMode::Stat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Normal,
    NonExistent,
}

/// One handle's registration on an entry
#[derive(Debug, Clone)]
pub struct Client {
    pub handle: HandleId,
    /// Number of times the handle added this path
    pub ref_count: usize,
    pub watching_stopped: bool,
    /// Stopped through a per-path stop rather than a handle-wide one
    pub path_stopped: bool,
    /// Events computed while stopped
    pub pending: EventMask,
    pub modes: WatchModes,
}

impl Client {
    fn new(handle: HandleId, modes: WatchModes, stopped: bool) -> Self {
        Self {
            handle,
            ref_count: 1,
            watching_stopped: stopped,
            path_stopped: false,
            pending: EventMask::empty(),
            modes,
        }
    }

    /// True if this client wants child events for a child of the given kind
    pub fn wants_child(&self, is_dir: Option<bool>) -> bool {
        match is_dir {
            Some(true) => self.modes.contains(WatchModes::SUBDIRS),
            Some(false) => self.modes.contains(WatchModes::FILES),
            None => self.modes.intersects(WatchModes::FILES | WatchModes::SUBDIRS),
        }
    }
}

/// Watch state for one normalized path
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub status: EntryStatus,
    pub mode: WatchMode,
    /// `None` while the baseline is invalid (always when NonExistent)
    pub fingerprint: Option<Fingerprint>,
    /// Needs a stat before the next scan decision
    pub dirty: bool,
    /// Stat polling period for this entry
    pub freq_ms: u64,
    /// Time left until this entry's next stat poll
    pub msec_left: i64,
    pub clients: Vec<Client>,
    /// Missing paths waiting on this entry to learn when they appear
    pub dependents: Vec<PathBuf>,
    /// Children reported as modified since the last pass
    pub pending_child_changes: Vec<PathBuf>,
}

impl Entry {
    pub fn new(path: PathBuf, is_dir: bool) -> Self {
        Self {
            path,
            is_dir,
            status: EntryStatus::NonExistent,
            mode: WatchMode::Unknown,
            fingerprint: None,
            dirty: false,
            freq_ms: 0,
            msec_left: 0,
            clients: Vec::new(),
            dependents: Vec::new(),
            pending_child_changes: Vec::new(),
        }
    }

    /// Reachable entries have a client or a dependent
    pub fn is_valid(&self) -> bool {
        !self.clients.is_empty() || !self.dependents.is_empty()
    }

    pub fn exists(&self) -> bool {
        self.status == EntryStatus::Normal
    }

    /// Parent used for dependent tracking; the root is its own parent
    pub fn parent_dir(&self) -> PathBuf {
        dirwatch_core::path::parent_dir(&self.path)
    }

    pub fn client(&self, handle: HandleId) -> Option<&Client> {
        self.clients.iter().find(|c| c.handle == handle)
    }

    pub fn client_mut(&mut self, handle: HandleId) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.handle == handle)
    }

    /// Add a client or bump its ref count; modes follow the latest request
    ///
    /// A new client of a stopped handle starts stopped.
    pub fn add_client(&mut self, handle: HandleId, modes: WatchModes, stopped: bool) {
        match self.client_mut(handle) {
            Some(client) => {
                client.ref_count += 1;
                client.modes = modes;
            }
            None => self.clients.push(Client::new(handle, modes, stopped)),
        }
    }

    /// Drop one reference; the client goes away when none remain
    pub fn remove_client(&mut self, handle: HandleId) {
        if let Some(idx) = self.clients.iter().position(|c| c.handle == handle) {
            let client = &mut self.clients[idx];
            if client.ref_count > 1 {
                client.ref_count -= 1;
            } else {
                self.clients.remove(idx);
            }
        }
    }

    /// Total registrations, counting repeated adds
    pub fn client_count(&self) -> usize {
        self.clients.iter().map(|c| c.ref_count).sum()
    }

    /// Registrations that are not stopped
    pub fn watching_count(&self) -> usize {
        self.clients
            .iter()
            .filter(|c| !c.watching_stopped)
            .map(|c| c.ref_count)
            .sum()
    }

    pub fn add_dependent(&mut self, path: &Path) {
        if !self.dependents.iter().any(|d| d == path) {
            self.dependents.push(path.to_path_buf());
        }
    }

    pub fn remove_dependent(&mut self, path: &Path) {
        self.dependents.retain(|d| d != path);
    }

    pub fn has_dependent(&self, path: &Path) -> bool {
        self.dependents.iter().any(|d| d == path)
    }

    pub fn last_change_time(&self) -> Option<SystemTime> {
        self.fingerprint.map(|fp| fp.changed_at())
    }

    /// Record a child as modified; duplicates are dropped
    pub fn push_child_change(&mut self, path: PathBuf) {
        if !self.pending_child_changes.contains(&path) {
            self.pending_child_changes.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ref_counting() {
        let mut entry = Entry::new(PathBuf::from("/tmp/x"), true);
        assert!(!entry.is_valid());

        entry.add_client(1, WatchModes::DIR_ONLY, false);
        entry.add_client(1, WatchModes::FILES, false);
        entry.add_client(2, WatchModes::DIR_ONLY, false);
        assert_eq!(entry.clients.len(), 2);
        assert_eq!(entry.client_count(), 3);
        assert_eq!(entry.client(1).unwrap().modes, WatchModes::FILES);

        entry.remove_client(1);
        assert_eq!(entry.client(1).unwrap().ref_count, 1);
        entry.remove_client(1);
        assert!(entry.client(1).is_none());
        entry.remove_client(2);
        assert!(!entry.is_valid());
    }

    #[test]
    fn test_dependents_are_unique() {
        let mut entry = Entry::new(PathBuf::from("/tmp"), true);
        entry.add_dependent(Path::new("/tmp/a"));
        entry.add_dependent(Path::new("/tmp/a"));
        assert_eq!(entry.dependents.len(), 1);
        assert!(entry.is_valid());

        entry.remove_dependent(Path::new("/tmp/a"));
        assert!(!entry.is_valid());
    }

    #[test]
    fn test_watching_count_skips_stopped() {
        let mut entry = Entry::new(PathBuf::from("/tmp/x"), false);
        entry.add_client(1, WatchModes::DIR_ONLY, false);
        entry.add_client(1, WatchModes::DIR_ONLY, false);
        entry.add_client(2, WatchModes::DIR_ONLY, false);
        entry.client_mut(1).unwrap().watching_stopped = true;
        assert_eq!(entry.watching_count(), 1);
    }

    #[test]
    fn test_new_client_of_stopped_handle_starts_stopped() {
        let mut entry = Entry::new(PathBuf::from("/tmp/x"), false);
        entry.add_client(1, WatchModes::DIR_ONLY, true);
        entry.add_client(2, WatchModes::DIR_ONLY, false);

        let client = entry.client(1).unwrap();
        assert!(client.watching_stopped);
        assert!(!client.path_stopped);
        assert_eq!(entry.watching_count(), 1);

        // Existing clients keep their state on a repeated add
        entry.add_client(2, WatchModes::DIR_ONLY, true);
        assert!(!entry.client(2).unwrap().watching_stopped);
    }

    #[test]
    fn test_client_child_interest() {
        let mut entry = Entry::new(PathBuf::from("/tmp/x"), true);
        entry.add_client(1, WatchModes::FILES, false);
        let client = entry.client(1).unwrap();
        assert!(client.wants_child(Some(false)));
        assert!(!client.wants_child(Some(true)));
        assert!(client.wants_child(None));

        entry.add_client(2, WatchModes::DIR_ONLY, false);
        assert!(!entry.client(2).unwrap().wants_child(None));
    }

    #[test]
    fn test_mask_kinds_order() {
        let mask = EventMask::CHANGED | EventMask::CREATED | EventMask::DELETED;
        assert_eq!(
            mask.kinds(),
            vec![EventKind::Deleted, EventKind::Created, EventKind::Changed]
        );
        assert!(EventMask::empty().kinds().is_empty());
    }

    #[test]
    fn test_child_changes_are_deduplicated() {
        let mut entry = Entry::new(PathBuf::from("/tmp/x"), true);
        entry.push_child_change(PathBuf::from("/tmp/x/a"));
        entry.push_child_change(PathBuf::from("/tmp/x/a"));
        entry.push_child_change(PathBuf::from("/tmp/x/b"));
        assert_eq!(entry.pending_child_changes.len(), 2);
    }
}
