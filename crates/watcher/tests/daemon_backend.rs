//! Daemon backend through an injected connection

mod common;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use common::Recorder;
use dirwatch::backend::{DaemonCode, DaemonConnection, DaemonEvent, RequestId};
use dirwatch::{EventKind, Method, Registry, WatchConfig, WatchMode, WatchModes, Watcher};
use tempfile::TempDir;

#[derive(Default)]
struct FakeDaemon {
    next: RequestId,
    requests: HashMap<PathBuf, RequestId>,
    queued: VecDeque<DaemonEvent>,
    down: bool,
}

impl FakeDaemon {
    fn push(&mut self, watched: &Path, code: DaemonCode, filename: impl Into<PathBuf>) {
        let request = self.requests[watched];
        self.queued.push_back(DaemonEvent {
            request,
            code,
            filename: filename.into(),
        });
    }
}

struct Connection(Rc<RefCell<FakeDaemon>>);

impl DaemonConnection for Connection {
    fn monitor(&mut self, path: &Path, _is_dir: bool) -> io::Result<RequestId> {
        let mut daemon = self.0.borrow_mut();
        if daemon.down {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "daemon down"));
        }
        daemon.next += 1;
        let id = daemon.next;
        daemon.requests.insert(path.to_path_buf(), id);
        Ok(id)
    }

    fn cancel(&mut self, request: RequestId) -> io::Result<()> {
        self.0.borrow_mut().requests.retain(|_, id| *id != request);
        Ok(())
    }

    fn pending(&mut self) -> io::Result<Vec<DaemonEvent>> {
        let mut daemon = self.0.borrow_mut();
        if daemon.down {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "daemon down"));
        }
        Ok(daemon.queued.drain(..).collect())
    }
}

fn daemon_registry() -> (Registry, Rc<RefCell<FakeDaemon>>) {
    let daemon = Rc::new(RefCell::new(FakeDaemon::default()));
    let registry = Registry::builder(WatchConfig {
        preferred_backend: Method::Daemon,
        network_preferred_backend: Method::Daemon,
        ..WatchConfig::default()
    })
    .daemon_connection(Box::new(Connection(daemon.clone())))
    .build();
    (registry, daemon)
}

#[test]
fn test_new_files_are_reported_and_monitored() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let (registry, daemon) = daemon_registry();
    let watcher = Watcher::with_registry(&registry);
    let recorder = Recorder::new(watcher.events());
    watcher.add_dir(dir, WatchModes::FILES);
    assert_eq!(watcher.current_backend(), Method::Daemon);

    let file = dir.join("report.pdf");
    std::fs::write(&file, b"%PDF").unwrap();
    daemon.borrow_mut().push(dir, DaemonCode::Created, "report.pdf");
    registry.pump();

    assert_eq!(recorder.kinds_for(&file), vec![EventKind::Created]);
    assert!(watcher.contains(&file));
    assert!(daemon.borrow().requests.contains_key(&file));
}

#[test]
fn test_lost_daemon_degrades_to_another_backend() {
    let temp_dir = TempDir::new().unwrap();
    let (registry, daemon) = daemon_registry();
    let watcher = Watcher::with_registry(&registry);
    watcher.add_dir(temp_dir.path(), WatchModes::DIR_ONLY);
    assert_eq!(registry.statistics().entries[0].backend, WatchMode::Daemon);

    daemon.borrow_mut().down = true;
    registry.pump();

    let stats = registry.statistics();
    assert_ne!(stats.entries[0].backend, WatchMode::Daemon);
    assert_ne!(stats.current_backend, Method::Daemon);
}

#[test]
fn test_unavailable_daemon_at_watch_time() {
    let temp_dir = TempDir::new().unwrap();
    let (registry, daemon) = daemon_registry();
    daemon.borrow_mut().down = true;

    let watcher = Watcher::with_registry(&registry);
    watcher.add_dir(temp_dir.path(), WatchModes::DIR_ONLY);

    let stats = registry.statistics();
    assert_ne!(stats.entries[0].backend, WatchMode::Daemon);
    assert_ne!(stats.entries[0].backend, WatchMode::Unknown);
}
