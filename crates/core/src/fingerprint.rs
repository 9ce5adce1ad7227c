//! Stat-based fingerprints used to detect change and recreation
//!
//! A fingerprint is the triple (timestamp, inode, link count). The timestamp
//! is `max(mtime, ctime)` so that content edits, permission changes and
//! renames all move it forward.
//!
//! Known false negatives:
//! - Two writes within the filesystem's timestamp granularity look identical
//!   (ext4 uses the coarse kernel clock, FAT has 2s resolution)
//! - Some platforms do not update a directory's mtime for every child
//!   operation; only the event backends see those

use std::fs::{self, Metadata};
use std::path::Path;
use std::time::SystemTime;

use crate::config::FingerprintPolicy;

/// Snapshot of the identity-relevant stat fields of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Last modification time
    pub mtime: SystemTime,
    /// Last status change time (`None` where the platform has no real ctime)
    pub ctime: Option<SystemTime>,
    /// Inode number (0 where unavailable)
    pub ino: u64,
    /// Hard link count
    pub nlink: u64,
}

/// Outcome of comparing two fingerprints of the same path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    /// Same node, new timestamp or link count
    Modified,
    /// Different inode: the node was deleted and recreated
    Replaced,
}

impl Fingerprint {
    /// Build a fingerprint from already-fetched metadata
    #[cfg(unix)]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime: Some(unix_time(meta.ctime(), meta.ctime_nsec())),
            ino: meta.ino(),
            nlink: meta.nlink(),
        }
    }

    /// Build a fingerprint from already-fetched metadata
    ///
    /// Windows reports the creation time as "ctime", so only mtime is kept.
    #[cfg(not(unix))]
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: None,
            ino: 0,
            nlink: 1,
        }
    }

    /// The latest change of any kind
    pub fn changed_at(&self) -> SystemTime {
        match self.ctime {
            Some(ctime) => self.mtime.max(ctime),
            None => self.mtime,
        }
    }

    /// Timestamp used for comparison under `policy`
    fn stamp(&self, policy: &FingerprintPolicy) -> SystemTime {
        if policy.compare_ctime {
            self.changed_at()
        } else {
            self.mtime
        }
    }

    /// Compare a previous fingerprint (`self`) with a fresh one
    pub fn compare(&self, current: &Fingerprint, policy: &FingerprintPolicy) -> Change {
        if policy.compare_inode && self.ino != current.ino {
            return Change::Replaced;
        }

        let stamp_moved = self.stamp(policy) != current.stamp(policy);
        let links_moved = policy.compare_link_count && self.nlink != current.nlink;
        if stamp_moved || links_moved {
            Change::Modified
        } else {
            Change::Unchanged
        }
    }
}

/// Result of stat'ing a watched path
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub fingerprint: Fingerprint,
    pub is_dir: bool,
}

impl Probe {
    /// Stat `path`, following symlinks
    ///
    /// Any failure (missing, permission denied, racing deletion) reads as
    /// "does not exist"; the next scan checks again.
    pub fn stat(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            fingerprint: Fingerprint::from_metadata(&meta),
            is_dir: meta.is_dir(),
        })
    }
}

/// True if `path` itself is a symbolic link (not followed)
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(unix)]
fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    use std::time::{Duration, UNIX_EPOCH};

    let nanos = Duration::from_nanos(nsecs.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}
