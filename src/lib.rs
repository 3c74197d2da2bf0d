//! Kiln - incremental front-end asset pipeline
//!
//! Kiln keeps bundled scripts, compiled stylesheets and image derivatives in
//! step with a changing source tree. Changes are classified into the
//! smallest set of affected targets, debounced per resource, rebuilt through
//! external tools, and followed by removal of outputs that no source
//! accounts for anymore.

pub mod classify;
pub mod config;
pub mod error;
pub mod images;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod scheduler;
pub mod scripts;
pub mod styles;
pub mod tools;
pub mod watcher;

// Re-exports for convenience
pub use classify::{ChangeKind, Impact};
pub use config::{Config, ConfigWarning, CONFIG_FILE_NAME};
pub use error::{ConfigError, KilnError, KilnResult, ToolError};
pub use manifest::{ManifestEntry, ManifestStore};
pub use pipeline::Pipeline;
pub use report::{BuildReport, Phase, Summary};
pub use scheduler::{ResourceKey, Scheduler, TargetKey};
pub use tools::{BundleJob, Bundler, FormatJob, ImageTranscoder, Linter, StyleCompiler, Toolchain};
pub use watcher::{watch, ChangeEvent, WatchEvent};
