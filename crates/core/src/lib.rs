//! Shared building blocks for dirwatch
//!
//! This crate provides:
//! - Path normalization and the forbidden/noisy path rules
//! - File fingerprints (timestamp, inode, link count) and their comparison
//! - Filesystem classification (local vs network share)
//! - Watch configuration (TOML + environment overrides)
//! - The error type shared by every backend

pub mod config;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod fstype;
pub mod path;

// Re-exports
pub use config::{FingerprintPolicy, Method, PathRule, WatchConfig};
pub use error::WatchError;
pub use filter::PathFilter;
pub use fingerprint::{Change, Fingerprint, Probe};
pub use fstype::{classify, FsClass};

/// Result type for dirwatch operations
pub type Result<T> = std::result::Result<T, WatchError>;
