//! Error types for Kiln
//!
//! Uses `thiserror` for library errors. Only configuration errors and
//! unrecoverable manifest persistence errors are meant to stop a run; every
//! other failure is recorded in a [`crate::report::BuildReport`] and the
//! pipeline keeps going.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// Main error type for Kiln operations
#[derive(Error, Debug)]
pub enum KilnError {
    /// Configuration could not be loaded or violates an invariant
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The image manifest could not be written after all retries
    #[error("failed to persist manifest {path} after {attempts} attempts: {message}")]
    ManifestPersist {
        path: PathBuf,
        attempts: u32,
        message: String,
    },

    /// An external tool failed for a whole target
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// File watcher could not be started
    #[error("watcher error: {0}")]
    Watch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, raised at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file is not valid TOML or has wrong types
    #[error("invalid config {file}: {message}")]
    Parse { file: PathBuf, message: String },

    /// Two entry files would produce the same output name
    #[error("entry output name '{name}' is produced by both {first} and {second}")]
    DuplicateEntry {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Two stylesheets would be flattened onto the same CSS file
    #[error("stylesheets {first} and {second} both compile to '{name}' (enable styles.preserve_structure)")]
    DuplicateStylesheet {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A required setting is absent
    #[error("missing required setting '{key}'")]
    Missing { key: String },

    /// A setting names a source path that is not on disk
    #[error("'{key}' points to {path}, which does not exist")]
    MissingPath { key: String, path: PathBuf },

    /// A setting is outside its allowed range
    #[error("invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },
}

/// Failure of one external tool invocation
#[derive(Error, Debug)]
pub enum ToolError {
    /// Tool could not be spawned at all
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    /// Tool ran and exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// Tool exceeded the configured timeout
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    /// Tool reported success but did not produce the expected file
    #[error("{program} did not produce {output}")]
    MissingOutput { program: String, output: PathBuf },
}
