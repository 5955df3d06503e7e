mod cli;
mod display;
mod error;

use std::path::Path;

use agetrends::config::Config;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{Cli, RunCommand};
use log::debug;

const DEFAULT_LOGGING_LEVEL: &str = "warn";

fn main() -> Result<()> {
    // Set RUST_LOG to `DEFAULT_LOGGING_LEVEL` if not set
    let _ =
        std::env::var("RUST_LOG").map_err(|_| std::env::set_var("RUST_LOG", DEFAULT_LOGGING_LEVEL));
    pretty_env_logger::init_timed();
    let args = Cli::parse();
    debug!("args: {args:?}");
    let config: Config = read_config_from_toml(args.config.as_deref())?;
    debug!("config: {config:?}");

    if let Some(command) = args.command {
        command.run(config)?;
    }
    Ok(())
}

/// Read the configuration from `path`, or from `agetrends/config.toml` in the user's config
/// directory. A missing default file falls back to the default configuration.
fn read_config_from_toml(path: Option<&Path>) -> Result<Config> {
    // macOS: ~/Library/Application Support/agetrends/config.toml
    let file_path = match path {
        Some(path) => path.to_path_buf(),
        None => dirs::config_dir()
            .ok_or_else(|| anyhow!("No configuration directory on this platform"))?
            .join("agetrends")
            .join("config.toml"),
    };
    match std::fs::read_to_string(&file_path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("Invalid TOML in config file {}", file_path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && path.is_none() => {
            Ok(Config::default())
        }
        Err(e) => {
            Err(e).with_context(|| format!("Error reading config file {}", file_path.display()))
        }
    }
}
