//! Filesystem classification
//!
//! Network shares get a different preferred backend and a slower poll
//! interval: kernel event APIs do not see changes made by other clients of
//! the share, and stat'ing over the network is expensive.

use std::path::Path;

use tracing::trace;

/// Coarse filesystem class of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsClass {
    Local,
    NetworkShare,
    /// Could not be determined
    Other,
}

impl FsClass {
    pub fn is_network(&self) -> bool {
        matches!(self, FsClass::NetworkShare)
    }
}

/// Classify the filesystem holding `path`
///
/// Paths that do not exist yet are classified by their nearest existing
/// ancestor.
pub fn classify(path: &Path) -> FsClass {
    let Some(existing) = path.ancestors().find(|p| p.exists()) else {
        return FsClass::Other;
    };
    let class = platform::classify_existing(existing);
    trace!("{} is on a {:?} filesystem", path.display(), class);
    class
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod platform {
    use super::FsClass;
    use nix::sys::statfs::statfs;
    use std::path::Path;

    const NFS_SUPER_MAGIC: u32 = 0x6969;
    const SMB_SUPER_MAGIC: u32 = 0x517B;
    const CIFS_MAGIC_NUMBER: u32 = 0xFF53_4D42;
    const SMB2_MAGIC_NUMBER: u32 = 0xFE53_4D42;
    const AFS_SUPER_MAGIC: u32 = 0x5346_414F;
    const CODA_SUPER_MAGIC: u32 = 0x7375_7245;
    const V9FS_MAGIC: u32 = 0x0102_1997;

    const NETWORK_MAGICS: &[u32] = &[
        NFS_SUPER_MAGIC,
        SMB_SUPER_MAGIC,
        CIFS_MAGIC_NUMBER,
        SMB2_MAGIC_NUMBER,
        AFS_SUPER_MAGIC,
        CODA_SUPER_MAGIC,
        V9FS_MAGIC,
    ];

    pub(super) fn classify_existing(path: &Path) -> FsClass {
        match statfs(path) {
            // f_type is a signed word on some targets; the magics are 32-bit
            Ok(stat) => {
                let magic = stat.filesystem_type().0 as u32;
                if NETWORK_MAGICS.contains(&magic) {
                    FsClass::NetworkShare
                } else {
                    FsClass::Local
                }
            }
            Err(_) => FsClass::Other,
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod platform {
    use super::FsClass;
    use nix::sys::statfs::statfs;
    use std::path::Path;

    const NETWORK_TYPES: &[&str] = &["nfs", "smbfs", "afpfs", "webdav", "cifs"];

    pub(super) fn classify_existing(path: &Path) -> FsClass {
        match statfs(path) {
            Ok(stat) => {
                let name = stat.filesystem_type_name().to_ascii_lowercase();
                if NETWORK_TYPES.contains(&name.as_str()) {
                    FsClass::NetworkShare
                } else {
                    FsClass::Local
                }
            }
            Err(_) => FsClass::Other,
        }
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
mod platform {
    use super::FsClass;
    use std::path::Path;

    pub(super) fn classify_existing(_path: &Path) -> FsClass {
        FsClass::Other
    }
}
