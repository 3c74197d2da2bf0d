//! Kiln CLI - incremental front-end asset pipeline
//!
//! Usage: kiln <COMMAND>
//!
//! Commands:
//!   build     Build everything once
//!   watch     Build, then rebuild on every change
//!   index     Regenerate stylesheet index files
//!   manifest  Rebuild the image manifest
//!   check     Validate the configuration

use anyhow::Result;
use clap::Parser;
use is_terminal::IsTerminal;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match &cli.command {
        Commands::Build { only } => {
            let phases: Vec<kiln::Phase> = only.iter().copied().map(Into::into).collect();
            commands::build::cmd_build(&cli, &phases)
        }
        Commands::Watch => commands::watch::cmd_watch(&cli),
        Commands::Index => commands::index::cmd_index(&cli),
        Commands::Manifest => commands::manifest::cmd_manifest(&cli),
        Commands::Check => commands::check::cmd_check(&cli),
    }
}

/// Log to stderr; `RUST_LOG` overrides the level picked from `-v`.
fn init_tracing(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kiln={}", default_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1);

    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.with_ansi(std::io::stderr().is_terminal()).try_init();
    }
}
