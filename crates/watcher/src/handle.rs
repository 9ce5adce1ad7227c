//! The public watch handle

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::SystemTime;

use crossbeam_channel::{unbounded, Receiver, Sender};
use dirwatch_core::Method;

use crate::driver::Registry;
use crate::entry::{HandleId, WatchModes};
use crate::{EventKind, WatchEvent};

type Callback = Rc<dyn Fn(&Path)>;

/// Callbacks and channels of one handle
#[derive(Default)]
pub(crate) struct EventSink {
    created: RefCell<Vec<Callback>>,
    changed: RefCell<Vec<Callback>>,
    deleted: RefCell<Vec<Callback>>,
    senders: RefCell<Vec<Sender<WatchEvent>>>,
}

impl EventSink {
    pub(crate) fn deliver(&self, event: &WatchEvent) {
        let callbacks = match event.kind {
            EventKind::Created => &self.created,
            EventKind::Changed => &self.changed,
            EventKind::Deleted => &self.deleted,
        };
        // Callbacks may register more callbacks
        let callbacks: Vec<Callback> = callbacks.borrow().clone();
        for callback in callbacks {
            callback(&event.path);
        }

        // Receivers that went away are forgotten
        self.senders
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A set of watched paths and the callbacks interested in them
///
/// Dropping the watcher removes all of its paths.
pub struct Watcher {
    id: HandleId,
    registry: Registry,
    sink: Rc<EventSink>,
    stopped: Cell<bool>,
}

impl Watcher {
    /// Watcher on this thread's shared registry
    pub fn new() -> Self {
        Self::with_registry(&Registry::for_this_thread())
    }

    pub fn with_registry(registry: &Registry) -> Self {
        let sink = Rc::new(EventSink::default());
        let id = registry.register_sink(&sink);
        Self {
            id,
            registry: registry.clone(),
            sink,
            stopped: Cell::new(false),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Watch a directory; `modes` adds its files and/or subdirectories
    pub fn add_dir(&self, path: impl AsRef<Path>, modes: WatchModes) {
        self.registry
            .shared
            .core
            .borrow_mut()
            .add_entry(Some(self.id), path.as_ref(), None, true, modes);
    }

    pub fn add_file(&self, path: impl AsRef<Path>) {
        self.registry.shared.core.borrow_mut().add_entry(
            Some(self.id),
            path.as_ref(),
            None,
            false,
            WatchModes::DIR_ONLY,
        );
    }

    /// Undo one `add_dir` or `add_file`
    pub fn remove_path(&self, path: impl AsRef<Path>) {
        self.registry
            .shared
            .core
            .borrow_mut()
            .remove_entry(Some(self.id), path.as_ref(), None);
    }

    /// Pause reporting for one path
    pub fn stop_path(&self, path: impl AsRef<Path>) -> bool {
        self.registry
            .shared
            .core
            .borrow_mut()
            .stop_entry_scan(Some(self.id), path.as_ref(), true)
    }

    /// Resume reporting for one path; changes made meanwhile are not reported
    pub fn restart_path(&self, path: impl AsRef<Path>) -> bool {
        self.registry
            .shared
            .core
            .borrow_mut()
            .restart_entry_scan(Some(self.id), path.as_ref(), false)
    }

    /// Pause reporting for every path
    pub fn stop(&self) {
        self.stopped.set(true);
        self.registry.shared.core.borrow_mut().stop_scan(self.id);
    }

    /// Resume reporting
    ///
    /// With `notify`, every path that changed while stopped reports once.
    /// Paths stopped individually stay stopped unless `include_stopped`.
    pub fn start(&self, notify: bool, include_stopped: bool) {
        self.stopped.set(false);
        self.registry
            .shared
            .core
            .borrow_mut()
            .start_scan(self.id, notify, include_stopped);
        self.registry.dispatch();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.registry.shared.core.borrow().contains(self.id, path.as_ref())
    }

    pub fn last_change_time(&self, path: impl AsRef<Path>) -> Option<SystemTime> {
        self.registry
            .shared
            .core
            .borrow()
            .last_change_time(path.as_ref())
    }

    /// Backend used for newly added local paths
    pub fn current_backend(&self) -> Method {
        self.registry.shared.core.borrow().current_backend()
    }

    pub fn on_created<F>(&self, callback: F)
    where
        F: Fn(&Path) + 'static,
    {
        self.sink.created.borrow_mut().push(Rc::new(callback));
    }

    pub fn on_changed<F>(&self, callback: F)
    where
        F: Fn(&Path) + 'static,
    {
        self.sink.changed.borrow_mut().push(Rc::new(callback));
    }

    pub fn on_deleted<F>(&self, callback: F)
    where
        F: Fn(&Path) + 'static,
    {
        self.sink.deleted.borrow_mut().push(Rc::new(callback));
    }

    /// Channel receiving every event of this watcher
    pub fn events(&self) -> Receiver<WatchEvent> {
        let (tx, rx) = unbounded();
        self.sink.senders.borrow_mut().push(tx);
        rx
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirwatch_core::WatchConfig;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn registry() -> Registry {
        Registry::new(WatchConfig {
            preferred_backend: Method::Stat,
            network_preferred_backend: Method::Stat,
            ..WatchConfig::default()
        })
    }

    #[test]
    fn test_callbacks_and_channel_both_receive() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        let registry = registry();
        let watcher = Watcher::with_registry(&registry);
        watcher.add_file(&file);

        let created: Rc<RefCell<Vec<PathBuf>>> = Rc::default();
        {
            let created = created.clone();
            watcher.on_created(move |p| created.borrow_mut().push(p.to_path_buf()));
        }
        let events = watcher.events();

        fs::write(&file, b"x").unwrap();
        registry.rescan_now();

        assert_eq!(*created.borrow(), vec![file.clone()]);
        assert_eq!(
            events.try_recv().unwrap(),
            WatchEvent {
                path: file.clone(),
                kind: EventKind::Created
            }
        );
    }

    #[test]
    fn test_dropped_receiver_is_forgotten() {
        let sink = EventSink::default();
        let rx = {
            let (tx, rx) = unbounded();
            sink.senders.borrow_mut().push(tx);
            rx
        };
        drop(rx);
        sink.deliver(&WatchEvent {
            path: PathBuf::from("/tmp/x"),
            kind: EventKind::Changed,
        });
        assert!(sink.senders.borrow().is_empty());
    }

    #[test]
    fn test_stop_and_start_flags() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry();
        let watcher = Watcher::with_registry(&registry);
        watcher.add_dir(temp_dir.path(), WatchModes::DIR_ONLY);

        assert!(!watcher.is_stopped());
        watcher.stop();
        assert!(watcher.is_stopped());
        watcher.start(false, false);
        assert!(!watcher.is_stopped());
    }

    #[test]
    fn test_current_backend_follows_config() {
        let registry = registry();
        let watcher = Watcher::with_registry(&registry);
        assert_eq!(watcher.current_backend(), Method::Stat);
    }

    #[test]
    fn test_remove_path_and_contains() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry();
        let watcher = Watcher::with_registry(&registry);

        watcher.add_dir(temp_dir.path(), WatchModes::DIR_ONLY);
        assert!(watcher.contains(temp_dir.path()));
        assert!(watcher.last_change_time(temp_dir.path()).is_some());

        watcher.remove_path(temp_dir.path());
        assert!(!watcher.contains(temp_dir.path()));
        assert_eq!(registry.entry_count(), 0);
    }
}
