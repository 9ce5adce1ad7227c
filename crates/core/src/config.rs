//! Watch configuration
//!
//! Loaded once when a registry is constructed, from `$DIRWATCH_CONFIG` or
//! `<config dir>/dirwatch/config.toml`, then overridden by environment:
//!
//! - `DIRWATCH_METHOD`: preferred backend
//! - `DIRWATCH_NETWORK_METHOD`: preferred backend on network shares
//! - `DIRWATCH_POLL_INTERVAL`: stat polling interval (ms)
//! - `DIRWATCH_NETWORK_POLL_INTERVAL`: stat polling interval on network shares (ms)

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::WatchError;
use crate::Result;

/// Longest interval accepted anywhere in the configuration (one hour)
const MAX_INTERVAL_MS: u64 = 3_600_000;

/// Change-notification mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
    /// Kernel inotify
    Inotify,
    /// FAM-style notification daemon
    Daemon,
    /// The platform's recommended native watcher
    Native,
    /// Timer-driven stat polling
    Stat,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Inotify => "inotify",
            Method::Daemon => "daemon",
            Method::Native => "native",
            Method::Stat => "stat",
        }
    }

    /// Parse a method name, falling back to inotify for unknown names
    pub fn parse_lenient(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("Unknown watch method '{}', using inotify", name);
            Method::Inotify
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inotify" => Ok(Method::Inotify),
            "fam" | "daemon" => Ok(Method::Daemon),
            "native" | "qfswatch" => Ok(Method::Native),
            "stat" => Ok(Method::Stat),
            other => Err(WatchError::InvalidConfig(format!("unknown watch method '{}'", other))),
        }
    }
}

impl From<String> for Method {
    fn from(name: String) -> Self {
        Method::parse_lenient(&name)
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

/// Force a backend for every path under `prefix`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    pub prefix: PathBuf,
    pub backend: Method,
}

/// Which stat fields count as a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintPolicy {
    /// Use `max(mtime, ctime)` instead of mtime alone
    pub compare_ctime: bool,
    /// A different inode means delete + recreate
    pub compare_inode: bool,
    /// A different hard link count means changed
    pub compare_link_count: bool,
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self {
            compare_ctime: true,
            compare_inode: true,
            compare_link_count: true,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Backend tried first for local paths
    pub preferred_backend: Method,

    /// Backend tried first for paths on network shares
    pub network_preferred_backend: Method,

    /// Stat polling interval for local paths (milliseconds)
    pub poll_interval_ms: u64,

    /// Stat polling interval for network shares (milliseconds)
    pub network_poll_interval_ms: u64,

    /// Delay between an event-driven batch and the rescan pass it triggers
    pub settle_delay_ms: u64,

    /// Per-prefix backend overrides, first match wins
    pub force_backend: Vec<PathRule>,

    /// Gitignore-style patterns for paths that are never watched
    pub exclude: Vec<String>,

    pub fingerprint: FingerprintPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            preferred_backend: Method::Inotify,
            network_preferred_backend: Method::Daemon,
            poll_interval_ms: 500,
            network_poll_interval_ms: 5000,
            settle_delay_ms: 500,
            force_backend: Vec::new(),
            exclude: Vec::new(),
            fingerprint: FingerprintPolicy::default(),
        }
    }
}

impl WatchConfig {
    /// Location of the configuration file
    pub fn config_file_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os("DIRWATCH_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("dirwatch").join("config.toml"))
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: WatchConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` (absent file means defaults)
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load the file, apply environment overrides and validate
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_file_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// [`WatchConfig::load`], degrading to defaults on any error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load watch configuration, using defaults: {}", e);
                let mut config = Self::default();
                config.apply_env_overrides(|key| std::env::var(key).ok());
                if config.validate().is_err() {
                    return Self::default();
                }
                config
            }
        }
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("DIRWATCH_METHOD") {
            self.preferred_backend = Method::parse_lenient(&name);
        }
        if let Some(name) = lookup("DIRWATCH_NETWORK_METHOD") {
            self.network_preferred_backend = Method::parse_lenient(&name);
        }
        if let Some(ms) = lookup("DIRWATCH_POLL_INTERVAL").and_then(|v| parse_ms("DIRWATCH_POLL_INTERVAL", &v)) {
            self.poll_interval_ms = ms;
        }
        if let Some(ms) = lookup("DIRWATCH_NETWORK_POLL_INTERVAL")
            .and_then(|v| parse_ms("DIRWATCH_NETWORK_POLL_INTERVAL", &v))
        {
            self.network_poll_interval_ms = ms;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        check_interval("poll_interval_ms", self.poll_interval_ms)?;
        check_interval("network_poll_interval_ms", self.network_poll_interval_ms)?;

        if self.settle_delay_ms > MAX_INTERVAL_MS {
            return Err(WatchError::InvalidConfig(format!(
                "settle_delay_ms must be at most {} (got {})",
                MAX_INTERVAL_MS, self.settle_delay_ms
            )));
        }

        for rule in &self.force_backend {
            if !rule.prefix.is_absolute() {
                return Err(WatchError::InvalidConfig(format!(
                    "force_backend prefix must be absolute: {}",
                    rule.prefix.display()
                )));
            }
        }

        Ok(())
    }

    /// Backend forced for `path` by a prefix rule
    pub fn forced_backend(&self, path: &Path) -> Option<Method> {
        self.force_backend
            .iter()
            .find(|rule| path.starts_with(&rule.prefix))
            .map(|rule| rule.backend)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn check_interval(name: &str, value: u64) -> Result<()> {
    if !(1..=MAX_INTERVAL_MS).contains(&value) {
        return Err(WatchError::InvalidConfig(format!(
            "{} must be between 1 and {} (got {})",
            name, MAX_INTERVAL_MS, value
        )));
    }
    Ok(())
}

fn parse_ms(key: &str, value: &str) -> Option<u64> {
    match value.trim().parse() {
        Ok(ms) => Some(ms),
        Err(_) => {
            warn!("Ignoring {}={}: not a number of milliseconds", key, value);
            None
        }
    }
}
