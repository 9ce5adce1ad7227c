//! Show the effective configuration

use anyhow::{Context, Result};
use dirwatch::WatchConfig;
use owo_colors::OwoColorize;

pub fn run(path_only: bool) -> Result<()> {
    let path = WatchConfig::config_file_path();

    if path_only {
        match path {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("No configuration directory on this system"),
        }
        return Ok(());
    }

    let config = WatchConfig::load().context("Failed to load configuration")?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

    match path {
        Some(path) if path.exists() => {
            println!("{}", format!("# from {}", path.display()).dimmed());
        }
        Some(path) => {
            println!("{}", format!("# defaults ({} not found)", path.display()).dimmed());
        }
        None => println!("{}", "# defaults".dimmed()),
    }
    print!("{}", rendered);

    Ok(())
}
