//! Notification daemon backend (FAM/Gamin-style protocol)
//!
//! The daemon itself is reached through a [`DaemonConnection`]; no client
//! library ships with this crate, so without an injected connection the
//! backend is simply unavailable. A connection error disables the backend for
//! the rest of the registry's life.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dirwatch_core::{path, Method, WatchError};
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::{Backend, RawEvent, RawKind};

/// Daemon-assigned request number
pub type RequestId = u32;

/// Event codes of the daemon protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonCode {
    Changed,
    Deleted,
    StartExecuting,
    StopExecuting,
    Created,
    Moved,
    Acknowledge,
    Exists,
    EndExist,
}

/// One event from the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonEvent {
    pub request: RequestId,
    pub code: DaemonCode,
    /// Absolute for the monitored path itself, a bare name for children
    pub filename: PathBuf,
}

/// Client side of a notification daemon
pub trait DaemonConnection {
    /// Start monitoring a file or directory
    fn monitor(&mut self, path: &Path, is_dir: bool) -> io::Result<RequestId>;

    fn cancel(&mut self, request: RequestId) -> io::Result<()>;

    /// Events received since the last call, without blocking
    fn pending(&mut self) -> io::Result<Vec<DaemonEvent>>;

    /// Called once with the driver's wake-up handle; notify it when events arrive
    fn set_waker(&mut self, _wake: Arc<Notify>) {}
}

pub struct DaemonBackend {
    conn: Box<dyn DaemonConnection>,
    requests: HashMap<RequestId, PathBuf>,
    by_path: HashMap<PathBuf, RequestId>,
}

impl DaemonBackend {
    pub fn new(mut conn: Box<dyn DaemonConnection>, wake: Arc<Notify>) -> Self {
        conn.set_waker(wake);
        Self {
            conn,
            requests: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    fn translate(&mut self, event: DaemonEvent) -> Option<RawEvent> {
        if matches!(
            event.code,
            DaemonCode::Exists | DaemonCode::EndExist | DaemonCode::Acknowledge
        ) {
            return None;
        }

        // Acknowledgements for cancelled requests still trickle in
        let path = self.requests.get(&event.request)?.clone();
        if path::is_noisy_path(&event.filename) {
            return None;
        }

        trace!("daemon {:?} {} on {}", event.code, event.filename.display(), path.display());

        match event.code {
            DaemonCode::Deleted if event.filename.is_absolute() => {
                self.requests.remove(&event.request);
                self.by_path.remove(&path);
                if let Err(e) = self.conn.cancel(event.request) {
                    trace!("cancel of request {}: {}", event.request, e);
                }
                Some(RawEvent::new(path, RawKind::SelfDeleted))
            }
            DaemonCode::Created => {
                let name = event.filename.file_name()?.to_os_string();
                Some(RawEvent::child(path, name, RawKind::ChildCreated, None))
            }
            // Child deletions and everything else: the rescan stats the directory
            _ => Some(RawEvent::new(path, RawKind::Touched)),
        }
    }
}

impl Backend for DaemonBackend {
    fn method(&self) -> Method {
        Method::Daemon
    }

    fn try_watch(&mut self, path: &Path, is_dir: bool) -> Result<(), WatchError> {
        let request = self
            .conn
            .monitor(path, is_dir)
            .map_err(|e| WatchError::unavailable(Method::Daemon, e.to_string()))?;
        debug!("Daemon request {} for {}", request, path.display());
        if let Some(old) = self.by_path.insert(path.to_path_buf(), request) {
            self.requests.remove(&old);
        }
        self.requests.insert(request, path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) {
        if let Some(request) = self.by_path.remove(path) {
            self.requests.remove(&request);
            if let Err(e) = self.conn.cancel(request) {
                trace!("cancel of request {}: {}", request, e);
            }
        }
    }

    fn drain_events(&mut self) -> Result<Vec<RawEvent>, WatchError> {
        let events = self
            .conn
            .pending()
            .map_err(|e| WatchError::unavailable(Method::Daemon, e.to_string()))?;

        let mut out: Vec<RawEvent> = Vec::new();
        for event in events {
            if let Some(raw) = self.translate(event) {
                if !out.contains(&raw) {
                    out.push(raw);
                }
            }
        }
        Ok(out)
    }
}
