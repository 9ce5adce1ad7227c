//! dirwatch CLI - dw command

use anyhow::Result;
use clap::{Parser, Subcommand};
use dirwatch::Method;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

/// dirwatch - watch files and directories for changes
#[derive(Parser)]
#[command(name = "dw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch paths and print every change
    Watch {
        /// Files or directories to watch
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Also report files directly inside watched directories
        #[arg(long)]
        files: bool,

        /// Also watch subdirectories, recursively
        #[arg(long)]
        subdirs: bool,

        /// Preferred backend (inotify, daemon, native, stat)
        #[arg(long)]
        method: Option<Method>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Print registry statistics every N seconds
        #[arg(long, value_name = "SECS")]
        stats: Option<u64>,

        /// Exit after N seconds instead of waiting for Ctrl-C
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
    /// Show the effective configuration
    Config {
        /// Only print where the configuration file is read from
        #[arg(long)]
        path: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "dirwatch=debug,dw=debug",
        _ => "dirwatch=trace,dirwatch_core=trace,dw=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// The registry is bound to one thread
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Watch {
            paths,
            files,
            subdirs,
            method,
            json,
            stats,
            duration,
        } => {
            let args = cmd::watch::WatchArgs {
                paths,
                files,
                subdirs,
                method,
                json,
                stats,
                duration,
            };
            cmd::watch::run(args).await
        }
        Commands::Config { path } => cmd::config::run(path),
    }
}
