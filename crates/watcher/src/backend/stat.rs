//! Stat polling backend
//!
//! Holds no OS resources and produces no events: the registry's poll timer
//! stats every Stat-mode entry instead.

use std::path::Path;

use dirwatch_core::{Method, WatchError};

use super::{Backend, RawEvent};

#[derive(Debug, Default, Clone, Copy)]
pub struct StatBackend;

impl Backend for StatBackend {
    fn method(&self) -> Method {
        Method::Stat
    }

    fn try_watch(&mut self, _path: &Path, _is_dir: bool) -> Result<(), WatchError> {
        Ok(())
    }

    fn unwatch(&mut self, _path: &Path) {}

    fn drain_events(&mut self) -> Result<Vec<RawEvent>, WatchError> {
        Ok(Vec::new())
    }
}
