//! External tool boundary
//!
//! The pipeline never transforms file content itself. Bundling, downleveling,
//! minification, stylesheet compilation, CSS post-processing, image
//! transcoding and linting are delegated to the traits below, each of which
//! may fail with a [`ToolError`].
//!
//! [`CommandToolchain`] implements every trait by running configured command
//! lines as subprocesses.

mod command;

pub use command::{CommandLine, CommandToolchain};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ToolsConfig;
use crate::error::ToolError;

/// One named bundle input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    /// Output base name (`<name>.js`)
    pub name: String,
    pub path: PathBuf,
}

/// A single bundler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleJob {
    pub entries: Vec<BundleEntry>,
    pub out_dir: PathBuf,
    /// Emit ES module chunks for dynamic imports
    pub splitting: bool,
}

/// How the compressed copy of an image is resized
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resize {
    /// Shrink to this width when the source is wider
    MaxWidth(u32),
    /// Multiply the width by this factor
    Scale(f64),
}

/// Target format and parameters of one image conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormatJob {
    Avif { quality: u8, effort: u8 },
    Webp { quality: u8 },
    /// Same format as the source, resized; `quality` applies to JPEG only
    Compressed { resize: Resize, quality: Option<u8> },
}

impl FormatJob {
    pub fn label(&self) -> &'static str {
        match self {
            FormatJob::Avif { .. } => "avif",
            FormatJob::Webp { .. } => "webp",
            FormatJob::Compressed { .. } => "compression",
        }
    }
}

#[async_trait]
pub trait Bundler: Send + Sync {
    /// Bundle every entry into `job.out_dir`.
    async fn bundle(&self, job: &BundleJob) -> Result<(), ToolError>;

    /// Rewrite `file` in place to the compatibility target.
    async fn downlevel(&self, file: &Path) -> Result<(), ToolError>;

    /// Rewrite `file` in place, minified.
    async fn minify(&self, file: &Path) -> Result<(), ToolError>;
}

#[async_trait]
pub trait StyleCompiler: Send + Sync {
    /// Compile `input` to `output`, writing `<output>.map` alongside.
    async fn compile(&self, input: &Path, output: &Path) -> Result<(), ToolError>;

    /// Post-process a compiled CSS file in place.
    async fn post_process(&self, css: &Path) -> Result<(), ToolError>;
}

#[async_trait]
pub trait ImageTranscoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path, job: &FormatJob) -> Result<(), ToolError>;
}

#[async_trait]
pub trait Linter: Send + Sync {
    /// Lint every script under `root`.
    async fn lint(&self, root: &Path) -> Result<(), ToolError>;
}

/// The set of tools the pipeline runs
#[derive(Clone)]
pub struct Toolchain {
    pub bundler: Arc<dyn Bundler>,
    pub styles: Arc<dyn StyleCompiler>,
    pub images: Arc<dyn ImageTranscoder>,
    pub linter: Arc<dyn Linter>,
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Toolchain { .. }")
    }
}

impl Toolchain {
    /// Subprocess tools configured under `[tools]`.
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self::uniform(Arc::new(CommandToolchain::new(tools)))
    }

    /// One implementation for every role.
    pub fn uniform<T>(tools: Arc<T>) -> Self
    where
        T: Bundler + StyleCompiler + ImageTranscoder + Linter + 'static,
    {
        Self {
            bundler: tools.clone(),
            styles: tools.clone(),
            images: tools.clone(),
            linter: tools,
        }
    }
}
