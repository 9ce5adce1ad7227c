//! Exclude patterns for watch requests
//!
//! Patterns use gitignore syntax and are anchored at the filesystem root, so
//! `*.swp` excludes swap files anywhere and `/tmp/scratch/` excludes one tree.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::WatchError;
use crate::Result;

/// Compiled exclude patterns
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    excludes: Option<Gitignore>,
}

impl PathFilter {
    /// Filter that excludes nothing
    pub fn empty() -> Self {
        Self {
            root: PathBuf::from("/"),
            excludes: None,
        }
    }

    /// Compile gitignore-style patterns
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let root = PathBuf::from("/");
        if patterns.is_empty() {
            return Ok(Self::empty());
        }

        let mut builder = GitignoreBuilder::new(&root);
        for pattern in patterns {
            builder
                .add_line(None, pattern.as_ref())
                .map_err(|e| WatchError::InvalidConfig(format!("bad exclude pattern: {}", e)))?;
        }
        let excludes = builder
            .build()
            .map_err(|e| WatchError::InvalidConfig(format!("bad exclude patterns: {}", e)))?;

        Ok(Self {
            root,
            excludes: Some(excludes),
        })
    }

    /// True if `path` (or one of its parent directories) is excluded
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        let Some(excludes) = &self.excludes else {
            return false;
        };
        if !path.starts_with(&self.root) {
            return false;
        }
        excludes.matched_path_or_any_parents(path, is_dir).is_ignore()
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::empty()
    }
}
