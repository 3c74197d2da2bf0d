pub mod build;
pub mod check;
pub mod index;
pub mod manifest;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use kiln::{Config, ConfigWarning, Pipeline, Toolchain};

use crate::cli::Cli;

/// Project root as an absolute path, so watcher paths compare equal.
pub fn project_root(cli: &Cli) -> PathBuf {
    cli.root.canonicalize().unwrap_or_else(|_| cli.root.clone())
}

/// Load, override and root the configuration. Warnings are printed to stderr.
pub fn load_config(cli: &Cli) -> Result<Config> {
    let (config, warnings) = kiln::Config::load_or_default(&cli.config_path())?;
    print_warnings(&warnings, cli.json);
    Ok(config.rooted(&project_root(cli)))
}

pub fn print_warnings(warnings: &[ConfigWarning], json: bool) {
    for warning in warnings {
        if json {
            let event = serde_json::json!({
                "event": "config_warning",
                "key": warning.key,
                "file": warning.file.display().to_string(),
                "line": warning.line,
                "suggestion": warning.suggestion,
            });
            eprintln!("{}", event);
            continue;
        }

        let location = match warning.line {
            Some(line) => format!("{}:{}", warning.file.display(), line),
            None => warning.file.display().to_string(),
        };
        match &warning.suggestion {
            Some(suggestion) => eprintln!(
                "warning: unknown config key '{}' at {} (did you mean '{}'?)",
                warning.key, location, suggestion
            ),
            None => eprintln!("warning: unknown config key '{}' at {}", warning.key, location),
        }
    }
}

/// Single-threaded runtime shared by every async command.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

pub async fn pipeline(config: Config) -> Result<Pipeline> {
    let toolchain = Toolchain::from_config(&config.tools);
    let pipeline = Pipeline::new(config, toolchain).await?;
    Ok(pipeline)
}
