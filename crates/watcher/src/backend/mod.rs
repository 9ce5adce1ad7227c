//! Backend adapters
//!
//! Each adapter wraps one OS change-notification mechanism behind the
//! [`Backend`] trait. Adapters only report raw events for the paths they were
//! asked to watch; turning those into canonical events is the registry's job.
//!
//! Fallback order after the preferred backend fails:
//! Inotify, Daemon, Native, Stat (always succeeds).

pub mod daemon;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod inotify;
pub mod native;
pub mod stat;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dirwatch_core::{Method, WatchError};
use tokio::sync::Notify;
use tracing::debug;

pub use daemon::{DaemonBackend, DaemonCode, DaemonConnection, DaemonEvent, RequestId};
pub use native::NativeBackend;
pub use stat::StatBackend;

/// Backends tried, in order, when the preferred one cannot watch a path
pub const FALLBACK_ORDER: [Method; 4] = [Method::Inotify, Method::Daemon, Method::Native, Method::Stat];

/// What a backend observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    /// The watched path itself was deleted
    SelfDeleted,
    /// A child appeared in the watched directory
    ChildCreated,
    /// A child disappeared from the watched directory
    ChildDeleted,
    /// A child (or, without a name, the path itself) was written to
    Modified { attrib: bool },
    /// Something happened; stat to find out what
    Touched,
    /// The watched path may have been removed; stat to confirm
    Removed,
    /// The backend dropped events; everything must be rescanned
    Overflow,
}

/// Backend event, relative to a watched path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// The watched path the event was reported on
    pub path: PathBuf,
    /// Child name for directory events
    pub name: Option<OsString>,
    pub kind: RawKind,
    /// Child kind when the backend knows it
    pub is_dir: Option<bool>,
}

impl RawEvent {
    pub fn new(path: PathBuf, kind: RawKind) -> Self {
        Self {
            path,
            name: None,
            kind,
            is_dir: None,
        }
    }

    pub fn child(path: PathBuf, name: OsString, kind: RawKind, is_dir: Option<bool>) -> Self {
        Self {
            path,
            name: Some(name),
            kind,
            is_dir,
        }
    }

    pub fn overflow() -> Self {
        Self::new(PathBuf::new(), RawKind::Overflow)
    }

    /// Absolute path of the child, if this is a child event
    pub fn child_path(&self) -> Option<PathBuf> {
        self.name
            .as_ref()
            .filter(|name| !name.is_empty())
            .map(|name| self.path.join(name))
    }
}

/// One OS change-notification mechanism
pub trait Backend {
    fn method(&self) -> Method;

    /// Start watching `path`
    fn try_watch(&mut self, path: &Path, is_dir: bool) -> Result<(), WatchError>;

    /// Stop watching `path`; unknown paths are ignored
    fn unwatch(&mut self, path: &Path);

    /// Everything observed since the last call, without blocking
    fn drain_events(&mut self) -> Result<Vec<RawEvent>, WatchError>;

    /// Descriptor that becomes readable when events are pending
    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<std::os::unix::io::RawFd> {
        None
    }
}

/// The set of backends owned by one registry
pub struct Backends {
    inotify: Option<Box<dyn Backend>>,
    daemon: Option<Box<dyn Backend>>,
    native: Option<Box<dyn Backend>>,
    stat: StatBackend,
}

impl Backends {
    /// Probe the available backends
    ///
    /// `wake` is notified from other threads when a backend without a
    /// descriptor has events ready.
    pub fn new(wake: Arc<Notify>, daemon: Option<Box<dyn DaemonConnection>>) -> Self {
        Self {
            inotify: Self::probe_inotify(),
            daemon: match daemon {
                Some(conn) => Some(Box::new(DaemonBackend::new(conn, wake.clone())) as Box<dyn Backend>),
                None => {
                    debug!("No notification daemon connection, daemon backend unavailable");
                    None
                }
            },
            native: Some(Box::new(NativeBackend::new(wake)) as Box<dyn Backend>),
            stat: StatBackend,
        }
    }

    /// Only the stat backend
    pub fn stat_only() -> Self {
        Self {
            inotify: None,
            daemon: None,
            native: None,
            stat: StatBackend,
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn probe_inotify() -> Option<Box<dyn Backend>> {
        match self::inotify::InotifyBackend::new() {
            Ok(backend) => Some(Box::new(backend) as Box<dyn Backend>),
            Err(e) => {
                debug!("inotify unavailable: {}", e);
                None
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn probe_inotify() -> Option<Box<dyn Backend>> {
        None
    }

    /// Replace the adapter for one method
    pub fn install(&mut self, backend: Box<dyn Backend>) {
        match backend.method() {
            Method::Inotify => self.inotify = Some(backend),
            Method::Daemon => self.daemon = Some(backend),
            Method::Native => self.native = Some(backend),
            Method::Stat => {}
        }
    }

    pub fn is_available(&self, method: Method) -> bool {
        match method {
            Method::Inotify => self.inotify.is_some(),
            Method::Daemon => self.daemon.is_some(),
            Method::Native => self.native.is_some(),
            Method::Stat => true,
        }
    }

    fn get_mut(&mut self, method: Method) -> Option<&mut (dyn Backend + 'static)> {
        match method {
            Method::Inotify => self.inotify.as_deref_mut(),
            Method::Daemon => self.daemon.as_deref_mut(),
            Method::Native => self.native.as_deref_mut(),
            Method::Stat => Some(&mut self.stat),
        }
    }

    pub fn try_watch(&mut self, method: Method, path: &Path, is_dir: bool) -> Result<(), WatchError> {
        match self.get_mut(method) {
            Some(backend) => backend.try_watch(path, is_dir),
            None => Err(WatchError::unavailable(method, "not available on this system")),
        }
    }

    pub fn unwatch(&mut self, method: Method, path: &Path) {
        if let Some(backend) = self.get_mut(method) {
            backend.unwatch(path);
        }
    }

    /// Drop a backend for the lifetime of the registry
    pub fn disable(&mut self, method: Method) {
        debug!("Disabling {} backend", method);
        match method {
            Method::Inotify => self.inotify = None,
            Method::Daemon => self.daemon = None,
            Method::Native => self.native = None,
            Method::Stat => {}
        }
    }

    /// Drain every backend; failures are reported per method
    pub fn drain(&mut self) -> Vec<(Method, Result<Vec<RawEvent>, WatchError>)> {
        let mut out = Vec::new();
        for method in [Method::Inotify, Method::Daemon, Method::Native] {
            if let Some(backend) = self.get_mut(method) {
                out.push((method, backend.drain_events()));
            }
        }
        out
    }

    #[cfg(unix)]
    pub fn readiness_fd(&self) -> Option<std::os::unix::io::RawFd> {
        self.inotify.as_ref().and_then(|b| b.readiness_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path() {
        let event = RawEvent::child(
            PathBuf::from("/tmp/d"),
            OsString::from("a.txt"),
            RawKind::ChildCreated,
            Some(false),
        );
        assert_eq!(event.child_path(), Some(PathBuf::from("/tmp/d/a.txt")));

        let event = RawEvent::new(PathBuf::from("/tmp/d"), RawKind::Touched);
        assert_eq!(event.child_path(), None);
    }

    #[test]
    fn test_stat_only_has_no_event_backends() {
        let mut backends = Backends::stat_only();
        assert!(backends.is_available(Method::Stat));
        assert!(!backends.is_available(Method::Inotify));
        assert!(backends.try_watch(Method::Stat, Path::new("/tmp"), true).is_ok());
        assert!(matches!(
            backends.try_watch(Method::Native, Path::new("/tmp"), true),
            Err(WatchError::BackendUnavailable { .. })
        ));
        assert!(backends.drain().is_empty());
    }

    #[test]
    fn test_fallback_order_ends_with_stat() {
        assert_eq!(FALLBACK_ORDER.last(), Some(&Method::Stat));
    }
}
