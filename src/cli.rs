use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use kiln::Phase;

/// Kiln - incremental front-end asset pipeline
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file, relative to the project root
    #[arg(long, global = true, default_value = kiln::CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Project root
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Output format for CI
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build everything once
    Build {
        /// Only run these phases (repeatable)
        #[arg(long, value_enum)]
        only: Vec<PhaseArg>,
    },

    /// Build once, then rebuild on every change until Ctrl+C
    Watch,

    /// Regenerate the stylesheet index files
    Index,

    /// Rebuild the image manifest from the origin tree without converting
    Manifest,

    /// Validate the configuration
    Check,
}

/// Phases selectable with `build --only`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhaseArg {
    Scripts,
    Styles,
    Images,
    Lint,
}

impl From<PhaseArg> for Phase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::Scripts => Phase::Scripts,
            PhaseArg::Styles => Phase::Styles,
            PhaseArg::Images => Phase::Images,
            PhaseArg::Lint => Phase::Lint,
        }
    }
}

impl Cli {
    /// Config path resolved against the project root.
    pub fn config_path(&self) -> PathBuf {
        if self.config.is_absolute() {
            self.config.clone()
        } else {
            self.root.join(&self.config)
        }
    }
}
