//! Watch paths and print changes as they happen

use crate::output::{self, Format};
use anyhow::{Context, Result};
use dirwatch::{EventKind, Method, Registry, WatchConfig, WatchEvent, WatchModes, Watcher};
use owo_colors::OwoColorize;
use std::future::pending;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub struct WatchArgs {
    pub paths: Vec<PathBuf>,
    pub files: bool,
    pub subdirs: bool,
    pub method: Option<Method>,
    pub json: bool,
    pub stats: Option<u64>,
    pub duration: Option<u64>,
}

impl WatchArgs {
    fn modes(&self) -> WatchModes {
        let mut modes = WatchModes::DIR_ONLY;
        if self.files {
            modes |= WatchModes::FILES;
        }
        if self.subdirs {
            modes |= WatchModes::SUBDIRS;
        }
        modes
    }

    fn format(&self) -> Format {
        if self.json {
            Format::Json
        } else {
            Format::Text
        }
    }
}

fn printer(kind: EventKind, format: Format) -> impl Fn(&Path) + 'static {
    move |path: &Path| {
        let event = WatchEvent {
            path: path.to_path_buf(),
            kind,
        };
        match output::event_line(&event, format) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to render event for {}: {}", path.display(), e),
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let mut config = WatchConfig::load_or_default();
    if let Some(method) = args.method {
        config.preferred_backend = method;
    }
    config.validate().context("Invalid watch configuration")?;

    let format = args.format();
    let registry = Registry::new(config);
    let watcher = Watcher::with_registry(&registry);
    watcher.on_created(printer(EventKind::Created, format));
    watcher.on_changed(printer(EventKind::Changed, format));
    watcher.on_deleted(printer(EventKind::Deleted, format));

    for path in &args.paths {
        let path = absolute(path)?;
        // Missing paths are watched as directories and reported once they appear
        let is_file = std::fs::metadata(&path).map(|m| !m.is_dir()).unwrap_or(false);
        if is_file {
            watcher.add_file(&path);
        } else {
            watcher.add_dir(&path, args.modes());
        }
        debug!("Watching {}", path.display());
    }

    if format == Format::Text {
        eprintln!(
            "{} {} path(s) with {} (Ctrl-C to stop)",
            "Watching".bold(),
            args.paths.len(),
            watcher.current_backend()
        );
    }

    let stop = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    pending::<()>().await;
                }
            }
        }
    };

    let report = async {
        let Some(secs) = args.stats else {
            return pending::<()>().await;
        };
        let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match output::statistics(&registry.statistics(), format) {
                Ok(text) if format == Format::Json => println!("{}", text),
                Ok(text) => eprint!("{}", text),
                Err(e) => warn!("Failed to render statistics: {}", e),
            }
        }
    };

    registry
        .run_until(async {
            tokio::select! {
                _ = stop => {}
                _ = report => {}
            }
        })
        .await
        .context("Watch driver failed")?;

    drop(watcher);
    Ok(())
}
