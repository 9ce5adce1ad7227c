//! Linux inotify backend
//!
//! One non-blocking inotify instance per registry, one watch descriptor per
//! watched path. The descriptor is polled by the driver; [`drain_events`]
//! reads until the kernel queue is empty.
//!
//! [`drain_events`]: Backend::drain_events

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use ::inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use dirwatch_core::{path, Method, WatchError};
use tracing::{debug, trace, warn};

use super::{Backend, RawEvent, RawKind};

/// Kernel read buffer; one event is 16 bytes plus the name
const BUFFER_SIZE: usize = 8192;

fn watch_mask() -> WatchMask {
    WatchMask::DELETE
        | WatchMask::DELETE_SELF
        | WatchMask::CREATE
        | WatchMask::MOVE
        | WatchMask::MOVE_SELF
        | WatchMask::DONT_FOLLOW
        | WatchMask::MOVED_FROM
        | WatchMask::MODIFY
        | WatchMask::ATTRIB
}

pub struct InotifyBackend {
    inotify: Inotify,
    by_wd: HashMap<WatchDescriptor, PathBuf>,
    by_path: HashMap<PathBuf, WatchDescriptor>,
    buffer: Vec<u8>,
}

impl InotifyBackend {
    pub fn new() -> io::Result<Self> {
        // init() opens the descriptor with IN_NONBLOCK | IN_CLOEXEC
        let inotify = Inotify::init()?;
        debug!("inotify initialized (fd {})", inotify.as_raw_fd());
        Ok(Self {
            inotify,
            by_wd: HashMap::new(),
            by_path: HashMap::new(),
            buffer: vec![0; BUFFER_SIZE],
        })
    }

    fn forget(&mut self, wd: &WatchDescriptor) {
        if let Some(path) = self.by_wd.remove(wd) {
            if self.by_path.get(&path) == Some(wd) {
                self.by_path.remove(&path);
            }
        }
    }

    /// Map one kernel event; `None` for events nobody needs
    fn translate(&mut self, wd: &WatchDescriptor, mask: EventMask, name: Option<&std::ffi::OsStr>) -> Option<RawEvent> {
        if mask.contains(EventMask::Q_OVERFLOW) {
            warn!("inotify event queue overflowed, check fs.inotify.max_queued_events");
            return Some(RawEvent::overflow());
        }

        if mask.contains(EventMask::IGNORED) {
            self.forget(wd);
            return None;
        }

        let path = self.by_wd.get(wd)?.clone();
        let name = name.filter(|n| !n.is_empty());
        if let Some(name) = name {
            if path::is_noisy(name) {
                return None;
            }
        }
        let is_dir = Some(mask.contains(EventMask::ISDIR));

        trace!("inotify {:?} on {} ({:?})", mask, path.display(), name);

        if mask.contains(EventMask::DELETE_SELF) {
            self.forget(wd);
            return Some(RawEvent::new(path, RawKind::SelfDeleted));
        }

        let kind = if mask.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
            RawKind::ChildCreated
        } else if mask.intersects(EventMask::DELETE | EventMask::MOVED_FROM) {
            RawKind::ChildDeleted
        } else if mask.intersects(EventMask::MODIFY | EventMask::ATTRIB) {
            RawKind::Modified {
                attrib: mask.contains(EventMask::ATTRIB),
            }
        } else {
            // MOVE_SELF: the next stat finds the path gone
            RawKind::Touched
        };

        Some(match name {
            Some(name) => RawEvent::child(path, name.to_os_string(), kind, is_dir),
            None => RawEvent::new(path, kind),
        })
    }
}

impl Backend for InotifyBackend {
    fn method(&self) -> Method {
        Method::Inotify
    }

    fn try_watch(&mut self, path: &Path, _is_dir: bool) -> Result<(), WatchError> {
        match self.inotify.watches().add(path, watch_mask()) {
            Ok(wd) => {
                trace!("inotify watching {} ({:?})", path.display(), wd);
                if let Some(old) = self.by_path.insert(path.to_path_buf(), wd.clone()) {
                    if old != wd {
                        self.by_wd.remove(&old);
                    }
                }
                self.by_wd.insert(wd, path.to_path_buf());
                Ok(())
            }
            Err(e) if e.raw_os_error() == Some(libc::ENOSPC) => {
                debug!("Raise fs.inotify.max_user_watches to watch more paths");
                Err(WatchError::ResourceExhausted {
                    method: Method::Inotify,
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                debug!("inotify failed for {}: {}", path.display(), e);
                Err(WatchError::Io(e))
            }
        }
    }

    fn unwatch(&mut self, path: &Path) {
        if let Some(wd) = self.by_path.remove(path) {
            self.by_wd.remove(&wd);
            // The kernel may already have dropped it (IN_IGNORED)
            if let Err(e) = self.inotify.watches().remove(wd) {
                trace!("inotify_rm_watch for {}: {}", path.display(), e);
            }
        }
    }

    fn drain_events(&mut self) -> Result<Vec<RawEvent>, WatchError> {
        let mut out = Vec::new();
        let mut buffer = std::mem::take(&mut self.buffer);

        loop {
            let batch: Vec<_> = match self.inotify.read_events(&mut buffer) {
                Ok(events) => events
                    .map(|event| (event.wd.clone(), event.mask, event.name.map(|n| n.to_os_string())))
                    .collect(),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.buffer = buffer;
                    return Err(WatchError::Io(e));
                }
            };
            if batch.is_empty() {
                break;
            }
            for (wd, mask, name) in batch {
                if let Some(event) = self.translate(&wd, mask, name.as_deref()) {
                    out.push(event);
                }
            }
        }

        self.buffer = buffer;
        Ok(out)
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        Some(self.inotify.as_raw_fd())
    }
}
