//! Error type shared by the watch engine and its backends

use std::path::PathBuf;
use thiserror::Error;

use crate::config::Method;

/// Errors raised while setting up or servicing a watch
///
/// None of these are fatal: the registry recovers from every variant by
/// falling back to another backend or to defaults.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The OS facility behind a backend is missing or disabled
    #[error("{method} backend unavailable: {reason}")]
    BackendUnavailable { method: Method, reason: String },

    /// The backend hit its watch-count ceiling
    #[error("{method} watch limit reached while watching {}", path.display())]
    ResourceExhausted { method: Method, path: PathBuf },

    /// Empty, relative or forbidden path
    #[error("invalid watch path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WatchError {
    /// Shorthand for [`WatchError::BackendUnavailable`]
    pub fn unavailable(method: Method, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            method,
            reason: reason.into(),
        }
    }

    /// True for errors that mean "this backend is full", not "this backend is broken"
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}
