use anyhow::Result;
use kiln::config::BuildMode;
use kiln::scripts::discover_entries;
use kiln::styles::StylePlan;
use kiln::{Config, ConfigError};

use crate::cli::Cli;

/// Facts about a valid configuration, for display
#[derive(Debug, Default)]
struct CheckOutcome {
    entries: usize,
    stylesheets: usize,
    indexes: usize,
}

/// Everything `Pipeline::new` would reject, checked without side effects.
fn check_config(config: &Config) -> Result<CheckOutcome, ConfigError> {
    config.validate()?;
    config.check_sources()?;

    let mut outcome = CheckOutcome {
        indexes: config.styles.index.len(),
        ..CheckOutcome::default()
    };
    if config.scripts.enabled {
        outcome.entries = match config.scripts.mode {
            BuildMode::Entry => discover_entries(&config.scripts)?.len(),
            BuildMode::Dynamic => 1,
        };
    }
    if config.styles.enabled {
        outcome.stylesheets = StylePlan::for_tree(&config.styles)?.outputs.len();
    }
    Ok(outcome)
}

pub fn cmd_check(cli: &Cli) -> Result<()> {
    let config_path = cli.config_path();
    let config = super::load_config(cli)?;
    let source = if config_path.exists() {
        config_path.display().to_string()
    } else {
        "defaults".to_string()
    };

    match check_config(&config) {
        Ok(outcome) => {
            if cli.json {
                let output = serde_json::json!({
                    "event": "check",
                    "success": true,
                    "config": source,
                    "entries": outcome.entries,
                    "stylesheets": outcome.stylesheets,
                    "indexes": outcome.indexes,
                });
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!("✓ Configuration OK ({})", source);
                println!("  {} script entries", outcome.entries);
                println!("  {} stylesheets", outcome.stylesheets);
                println!("  {} index files", outcome.indexes);
            }
            Ok(())
        }
        Err(e) => {
            if cli.json {
                let output = serde_json::json!({
                    "event": "check",
                    "success": false,
                    "config": source,
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string(&output)?);
            } else {
                eprintln!("✗ {}", e);
            }
            std::process::exit(1);
        }
    }
}
