//! Path rules for watch requests
//!
//! - Only absolute paths are watched; they are normalized lexically
//!   (`.` dropped, `..` folded, no trailing slash except for `/`)
//! - Device trees are never watched
//! - A handful of files that change on every keystroke are never reported

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Normalize a watch path
///
/// Returns `None` for empty or relative paths; callers treat that as a
/// silent rejection.
pub fn normalize(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() || !path.is_absolute() {
        return None;
    }

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // `pop` refuses to remove the root, which is what we want
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    Some(out)
}

/// Lexical parent directory; the root is its own parent
pub fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

/// Paths under `/dev` are never watched, apart from hidden entries and `/dev/shm`
#[cfg(unix)]
pub fn is_forbidden(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s == "/dev" || (s.starts_with("/dev/") && !s.starts_with("/dev/.") && !s.starts_with("/dev/shm"))
}

#[cfg(not(unix))]
pub fn is_forbidden(_path: &Path) -> bool {
    false
}

/// Files rewritten constantly by the session itself
///
/// `$HOME/.X.err` and `.xsession-errors` grow with debug output and
/// fontconfig touches its cache on every application start.
pub fn is_noisy(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with(".X.err") || name.starts_with(".xsession-errors") || name.starts_with(".fonts.cache")
}

/// Noisy-file check on the last component of a path
pub fn is_noisy_path(path: &Path) -> bool {
    path.file_name().map(is_noisy).unwrap_or(false)
}
