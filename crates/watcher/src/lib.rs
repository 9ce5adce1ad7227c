//! Directory and file change notification
//!
//! This crate provides:
//! - A registry of watched paths shared by any number of [`Watcher`]s
//! - Backend selection with fallback: inotify, a notification daemon, the
//!   platform's native watcher, and stat polling
//! - Watches on paths that do not exist yet, through their parent directory
//! - Created/Changed/Deleted events computed in rescan passes and delivered
//!   once the pass is complete
//!
//! ```no_run
//! use dirwatch::{Registry, Watcher, WatchModes};
//!
//! # async fn demo() -> dirwatch::Result<()> {
//! let watcher = Watcher::new();
//! watcher.add_dir("/tmp/inbox", WatchModes::FILES);
//! watcher.on_created(|path| println!("new: {}", path.display()));
//! Registry::for_this_thread().run().await
//! # }
//! ```

pub mod backend;
pub mod driver;
pub mod entry;
pub mod handle;
pub mod registry;
pub mod scheduler;
mod translate;

use std::path::PathBuf;

use serde::Serialize;

// Re-exports
pub use dirwatch_core::{FsClass, Method, PathRule, WatchConfig, WatchError};
pub use driver::{Registry, RegistryBuilder};
pub use entry::{EventMask, HandleId, WatchMode, WatchModes};
pub use handle::Watcher;
pub use registry::{Statistics, WatchRegistry};

/// Result type for dirwatch operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// A change reported to a [`Watcher`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    /// The watched path, or a child of a watched directory
    pub path: PathBuf,
    pub kind: EventKind,
}

/// Type of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Changed,
    Deleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventKind::Created => "created",
            EventKind::Changed => "changed",
            EventKind::Deleted => "deleted",
        })
    }
}
