//! Shared registry and its async driver
//!
//! A [`Registry`] is a cheap `Rc` handle to one [`WatchRegistry`] plus the
//! callbacks of every live [`crate::Watcher`]. It is `!Send`: one registry
//! serves one thread, and its driver runs on that thread's current-thread
//! tokio runtime.
//!
//! Each wake-up drains the backends, runs whatever timers are due, and then
//! dispatches the queued events with the registry borrow released.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::{pending, Future};
use std::path::Path;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use dirwatch_core::{classify, FsClass, WatchConfig};
use tokio::sync::Notify;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, trace};

use crate::backend::{Backends, DaemonConnection};
use crate::entry::HandleId;
use crate::handle::EventSink;
use crate::registry::{Classifier, Statistics, WatchRegistry};
use crate::{Result, WatchEvent};

thread_local! {
    static THREAD_REGISTRY: RefCell<Option<Registry>> = const { RefCell::new(None) };
}

pub(crate) struct Shared {
    pub(crate) core: RefCell<WatchRegistry>,
    sinks: RefCell<HashMap<HandleId, Weak<EventSink>>>,
    next_handle: Cell<HandleId>,
    wake: Arc<Notify>,
}

/// Handle to a watch registry
#[derive(Clone)]
pub struct Registry {
    pub(crate) shared: Rc<Shared>,
}

/// Builder for [`Registry`]
pub struct RegistryBuilder {
    config: WatchConfig,
    classifier: Option<Classifier>,
    daemon: Option<Box<dyn DaemonConnection>>,
}

impl RegistryBuilder {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            classifier: None,
            daemon: None,
        }
    }

    /// Replace the statfs-based filesystem classifier
    pub fn classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Path) -> FsClass + 'static,
    {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Connection used by the daemon backend
    pub fn daemon_connection(mut self, conn: Box<dyn DaemonConnection>) -> Self {
        self.daemon = Some(conn);
        self
    }

    pub fn build(self) -> Registry {
        let wake = Arc::new(Notify::new());
        let backends = Backends::new(wake.clone(), self.daemon);
        let classifier = self
            .classifier
            .unwrap_or_else(|| Box::new(classify) as Classifier);

        Registry {
            shared: Rc::new(Shared {
                core: RefCell::new(WatchRegistry::new(self.config, backends, classifier)),
                sinks: RefCell::new(HashMap::new()),
                next_handle: Cell::new(1),
                wake,
            }),
        }
    }
}

impl Registry {
    pub fn new(config: WatchConfig) -> Self {
        RegistryBuilder::new(config).build()
    }

    pub fn builder(config: WatchConfig) -> RegistryBuilder {
        RegistryBuilder::new(config)
    }

    /// The registry shared by every watcher on this thread
    ///
    /// Created on first use from the configuration file and environment.
    pub fn for_this_thread() -> Registry {
        THREAD_REGISTRY.with(|slot| {
            slot.borrow_mut()
                .get_or_insert_with(|| Registry::new(WatchConfig::load_or_default()))
                .clone()
        })
    }

    pub(crate) fn register_sink(&self, sink: &Rc<EventSink>) -> HandleId {
        let id = self.shared.next_handle.get();
        self.shared.next_handle.set(id + 1);
        self.shared.sinks.borrow_mut().insert(id, Rc::downgrade(sink));
        id
    }

    pub(crate) fn unregister(&self, handle: HandleId) {
        self.shared.sinks.borrow_mut().remove(&handle);
        self.shared.core.borrow_mut().remove_entries(handle);
    }

    /// Current stat polling period, `None` when nothing is polled
    pub fn poll_interval(&self) -> Option<Duration> {
        self.shared.core.borrow().poll_interval()
    }

    /// Number of entries, stand-ins for missing paths included
    pub fn entry_count(&self) -> usize {
        self.shared.core.borrow().len()
    }

    pub fn statistics(&self) -> Statistics {
        self.shared.core.borrow().statistics()
    }

    /// Drain the backends, run due timers and deliver events
    pub fn pump(&self) {
        {
            let mut core = self.shared.core.borrow_mut();
            core.process_backend_events();
            core.fire_timers(Instant::now());
        }
        self.dispatch();
    }

    /// Drain the backends and scan every entry right away
    pub fn rescan_now(&self) {
        {
            let mut core = self.shared.core.borrow_mut();
            core.process_backend_events();
            core.scheduler.clear_settle();
            core.rescan_pass(true);
        }
        self.dispatch();
    }

    /// Deliver queued events
    ///
    /// Each delivery is re-checked against the current state: callbacks run
    /// earlier in the batch may have dropped the handle or removed the path.
    pub(crate) fn dispatch(&self) {
        let deliveries = self.shared.core.borrow_mut().take_deliveries();
        if deliveries.is_empty() {
            return;
        }
        trace!("Dispatching {} deliveries", deliveries.len());

        for delivery in deliveries {
            for kind in delivery.mask.kinds() {
                let sink = self
                    .shared
                    .sinks
                    .borrow()
                    .get(&delivery.handle)
                    .and_then(Weak::upgrade);
                let Some(sink) = sink else {
                    break;
                };
                let still_watching = self
                    .shared
                    .core
                    .borrow()
                    .entry(&delivery.entry)
                    .is_some_and(|e| e.client(delivery.handle).is_some());
                if !still_watching {
                    break;
                }

                sink.deliver(&WatchEvent {
                    path: delivery.path.clone(),
                    kind,
                });
            }
        }
    }

    /// Drive the registry until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut readiness = Readiness::default();
        debug!("Watch driver started");

        loop {
            readiness.refresh(&self.shared.core.borrow().backends)?;
            let deadline = self.shared.core.borrow().next_deadline();
            let wake = self.shared.wake.clone();

            tokio::select! {
                _ = &mut shutdown => break,
                _ = wake.notified() => {}
                _ = sleep_until_deadline(deadline) => {}
                _ = readiness.wait() => {}
            }

            self.pump();
        }

        debug!("Watch driver stopped");
        Ok(())
    }

    /// Drive the registry forever
    pub async fn run(&self) -> Result<()> {
        self.run_until(pending()).await
    }

    /// Drive the registry for `duration`
    pub async fn run_for(&self, duration: Duration) -> Result<()> {
        self.run_until(sleep(duration)).await
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(unix)]
struct ReadinessFd(std::os::unix::io::RawFd);

#[cfg(unix)]
impl std::os::unix::io::AsRawFd for ReadinessFd {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.0
    }
}

/// Reactor registration of the inotify descriptor
#[derive(Default)]
struct Readiness {
    #[cfg(unix)]
    fd: Option<tokio::io::unix::AsyncFd<ReadinessFd>>,
}

impl Readiness {
    /// Follow the descriptor as backends come and go
    #[cfg(unix)]
    fn refresh(&mut self, backends: &Backends) -> Result<()> {
        let current = self.fd.as_ref().map(|fd| fd.get_ref().0);
        let wanted = backends.readiness_fd();
        if current == wanted {
            return Ok(());
        }
        self.fd = match wanted {
            Some(raw) => Some(tokio::io::unix::AsyncFd::new(ReadinessFd(raw))?),
            None => None,
        };
        Ok(())
    }

    #[cfg(not(unix))]
    fn refresh(&mut self, _backends: &Backends) -> Result<()> {
        Ok(())
    }

    /// Completes when the descriptor has data
    ///
    /// Readiness is cleared before the caller drains, so events arriving
    /// during the drain wake the next iteration.
    #[cfg(unix)]
    async fn wait(&self) {
        let Some(fd) = self.fd.as_ref() else {
            return pending().await;
        };
        match fd.readable().await {
            Ok(mut guard) => guard.clear_ready(),
            Err(_) => pending().await,
        }
    }

    #[cfg(not(unix))]
    async fn wait(&self) {
        pending().await
    }
}
