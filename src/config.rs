//! Configuration module for Kiln
//!
//! Configuration is resolved once at startup:
//! 1. Environment variables (KILN_*) (highest priority)
//! 2. Project config (`kiln.toml`)
//! 3. Built-in defaults (lowest priority)
//!
//! Relative paths are resolved against the project root by [`Config::rooted`],
//! and [`Config::validate`] rejects invalid settings before any work starts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, KilnResult};

/// Default config file name, looked up in the project root
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// How script entry points are bundled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// One bundle per file in the entry directories
    #[default]
    Entry,
    /// A single entry bundled with code splitting
    Dynamic,
}

/// Directive used for each reference in a generated stylesheet index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// `@use`: members are consumed privately by the index
    #[default]
    Use,
    /// `@forward`: members are re-exported to whoever uses the index
    Forward,
}

impl ImportMode {
    pub fn directive(self) -> &'static str {
        match self {
            ImportMode::Use => "@use",
            ImportMode::Forward => "@forward",
        }
    }
}

/// What to recompile when a partial inside an index's target dirs changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartialChangePolicy {
    /// Only the index output that aggregates the partial
    #[default]
    #[serde(rename = "owning", alias = "entry")]
    OnlyOwningIndex,
    /// Every compilable stylesheet
    #[serde(rename = "all")]
    AllIndexes,
}

/// One generated stylesheet index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// File to generate
    pub output: PathBuf,
    /// Directories to aggregate, in order
    pub target_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub import: ImportMode,
    #[serde(default)]
    pub partial_change: PartialChangePolicy,
}

impl IndexSpec {
    /// Whether `path` lives under one of this spec's target dirs
    pub fn owns(&self, path: &Path) -> bool {
        self.target_dirs
            .iter()
            .any(|dir| crate::paths::is_within(path, dir))
    }
}

/// Script bundling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub mode: BuildMode,

    /// Root of all script sources (watched)
    #[serde(default = "default_scripts_src")]
    pub src_dir: PathBuf,

    #[serde(default = "default_scripts_out")]
    pub out_dir: PathBuf,

    /// Directories whose direct `.js` children are entry points
    #[serde(default = "default_entry_dirs")]
    pub entry_dirs: Vec<PathBuf>,

    /// Directories whose files rebuild only the entry with the same file name
    #[serde(default = "default_named_dependency_dirs")]
    pub named_dependency_dirs: Vec<PathBuf>,

    /// Directories whose files rebuild every entry
    #[serde(default = "default_dependency_dirs")]
    pub dependency_dirs: Vec<PathBuf>,

    #[serde(default = "default_dynamic_entry")]
    pub dynamic_entry: Option<PathBuf>,

    #[serde(default = "default_dynamic_dependency_dirs")]
    pub dynamic_dependency_dirs: Vec<PathBuf>,

    /// Run the linter after script changes
    #[serde(default)]
    pub lint: bool,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: BuildMode::default(),
            src_dir: default_scripts_src(),
            out_dir: default_scripts_out(),
            entry_dirs: default_entry_dirs(),
            named_dependency_dirs: default_named_dependency_dirs(),
            dependency_dirs: default_dependency_dirs(),
            dynamic_entry: default_dynamic_entry(),
            dynamic_dependency_dirs: default_dynamic_dependency_dirs(),
            lint: false,
        }
    }
}

fn default_scripts_src() -> PathBuf {
    PathBuf::from("htdocs/src/js")
}

fn default_scripts_out() -> PathBuf {
    PathBuf::from("htdocs/dist/js")
}

fn default_entry_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("htdocs/src/js/entry")]
}

fn default_named_dependency_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("htdocs/src/js/pages")]
}

fn default_dependency_dirs() -> Vec<PathBuf> {
    ["lifecycle", "common", "core", "modules", "utils"]
        .iter()
        .map(|d| PathBuf::from("htdocs/src/js").join(d))
        .collect()
}

fn default_dynamic_entry() -> Option<PathBuf> {
    Some(PathBuf::from("htdocs/src/js/main.js"))
}

fn default_dynamic_dependency_dirs() -> Vec<PathBuf> {
    ["pages", "lifecycle", "common", "core", "modules"]
        .iter()
        .map(|d| PathBuf::from("htdocs/src/js").join(d))
        .collect()
}

/// Stylesheet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_styles_src")]
    pub src_dir: PathBuf,

    #[serde(default = "default_styles_out")]
    pub out_dir: PathBuf,

    /// Mirror the source tree under `out_dir` instead of flattening
    #[serde(default)]
    pub preserve_structure: bool,

    #[serde(default = "default_index_specs")]
    pub index: Vec<IndexSpec>,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            src_dir: default_styles_src(),
            out_dir: default_styles_out(),
            preserve_structure: false,
            index: default_index_specs(),
        }
    }
}

fn default_styles_src() -> PathBuf {
    PathBuf::from("htdocs/src/scss")
}

fn default_styles_out() -> PathBuf {
    PathBuf::from("htdocs/dist/css")
}

fn default_index_specs() -> Vec<IndexSpec> {
    let scss = PathBuf::from("htdocs/src/scss");
    vec![
        IndexSpec {
            output: scss.join("common.scss"),
            target_dirs: [
                "global",
                "helpers",
                "utils",
                "js-contracts",
                "modules/elements",
                "modules/blocks-shared",
                "modules/footer",
                "modules/header",
                "modules/layouts",
            ]
            .iter()
            .map(|d| scss.join(d))
            .collect(),
            import: ImportMode::Use,
            partial_change: PartialChangePolicy::OnlyOwningIndex,
        },
        IndexSpec {
            output: scss.join("foundation/index.scss"),
            target_dirs: ["functions", "mixins", "variables", "project", "animation"]
                .iter()
                .map(|d| scss.join("foundation").join(d))
                .collect(),
            import: ImportMode::Forward,
            partial_change: PartialChangePolicy::AllIndexes,
        },
    ]
}

/// How the compressed copy of the original is sized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Shrink to `width` pixels when the source is wider
    #[default]
    Width,
    /// Multiply the source width by `scale`
    Scale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvifConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_avif_effort")]
    pub effort: u8,
}

impl Default for AvifConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            quality: default_quality(),
            effort: default_avif_effort(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl Default for WebpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            quality: default_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: CompressionMode,
    #[serde(default = "default_compression_width")]
    pub width: u32,
    #[serde(default = "default_compression_scale")]
    pub scale: f64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: CompressionMode::default(),
            width: default_compression_width(),
            scale: default_compression_scale(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_quality() -> u8 {
    80
}

fn default_avif_effort() -> u8 {
    4
}

fn default_compression_width() -> u32 {
    2200
}

fn default_compression_scale() -> f64 {
    0.5
}

fn default_jpeg_quality() -> u8 {
    90
}

/// Image transcoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Parent of the origin dir and every format dir
    #[serde(default = "default_images_root")]
    pub root: PathBuf,

    /// Name of the origin directory under `root`
    #[serde(default = "default_origin_dir")]
    pub origin_dir: String,

    /// Manifest location (relative to the project root)
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    #[serde(default)]
    pub avif: AvifConfig,

    #[serde(default)]
    pub webp: WebpConfig,

    #[serde(default)]
    pub compression: CompressionConfig,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: default_images_root(),
            origin_dir: default_origin_dir(),
            manifest: default_manifest(),
            avif: AvifConfig::default(),
            webp: WebpConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl ImagesConfig {
    pub fn origin_root(&self) -> PathBuf {
        self.root.join(&self.origin_dir)
    }
}

fn default_images_root() -> PathBuf {
    PathBuf::from("htdocs/assets/images")
}

fn default_origin_dir() -> String {
    "_origin".to_string()
}

fn default_manifest() -> PathBuf {
    PathBuf::from(".image-meta.json")
}

/// Debounce windows and polling intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_image_debounce_ms")]
    pub image_debounce_ms: u64,
    #[serde(default = "default_postprocess_debounce_ms")]
    pub postprocess_debounce_ms: u64,
    #[serde(default = "default_lint_debounce_ms")]
    pub lint_debounce_ms: u64,
    #[serde(default = "default_stable_poll_ms")]
    pub stable_poll_ms: u64,
    #[serde(default = "default_stable_max_polls")]
    pub stable_max_polls: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            image_debounce_ms: default_image_debounce_ms(),
            postprocess_debounce_ms: default_postprocess_debounce_ms(),
            lint_debounce_ms: default_lint_debounce_ms(),
            stable_poll_ms: default_stable_poll_ms(),
            stable_max_polls: default_stable_max_polls(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_image_debounce_ms() -> u64 {
    300
}

fn default_postprocess_debounce_ms() -> u64 {
    500
}

fn default_lint_debounce_ms() -> u64 {
    250
}

fn default_stable_poll_ms() -> u64 {
    300
}

fn default_stable_max_polls() -> u32 {
    40
}

/// Command lines for the external tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_esbuild")]
    pub esbuild: String,
    #[serde(default = "default_babel")]
    pub babel: String,
    #[serde(default = "default_terser")]
    pub terser: String,
    #[serde(default = "default_sass")]
    pub sass: String,
    #[serde(default = "default_postcss")]
    pub postcss: String,
    #[serde(default = "default_magick")]
    pub magick: String,
    #[serde(default = "default_eslint")]
    pub eslint: String,
    /// Kill a tool that runs longer than this; unset waits forever
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            esbuild: default_esbuild(),
            babel: default_babel(),
            terser: default_terser(),
            sass: default_sass(),
            postcss: default_postcss(),
            magick: default_magick(),
            eslint: default_eslint(),
            timeout_secs: None,
        }
    }
}

fn default_esbuild() -> String {
    "npx esbuild".to_string()
}

fn default_babel() -> String {
    "npx babel".to_string()
}

fn default_terser() -> String {
    "npx terser".to_string()
}

fn default_sass() -> String {
    "npx sass".to_string()
}

fn default_postcss() -> String {
    "npx postcss".to_string()
}

fn default_magick() -> String {
    "magick".to_string()
}

fn default_eslint() -> String {
    "npx eslint".to_string()
}

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scripts: ScriptsConfig,

    #[serde(default)]
    pub styles: StylesConfig,

    #[serde(default)]
    pub images: ImagesConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Non-fatal configuration warning surfaced to CLI users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub file: PathBuf,
    pub line: Option<usize>,
    pub suggestion: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> KilnResult<Self> {
        let (config, _warnings) = Self::load_with_warnings(path)?;
        Ok(config)
    }

    /// Load configuration and collect non-fatal warnings (e.g. unknown keys).
    pub fn load_with_warnings(path: &Path) -> KilnResult<(Self, Vec<ConfigWarning>)> {
        let content = fs::read_to_string(path)?;

        let mut unknown_paths: Vec<String> = Vec::new();
        let deserializer = toml::de::Deserializer::new(&content);

        let config: Self = serde_ignored::deserialize(deserializer, |path| {
            unknown_paths.push(path.to_string());
        })
        .map_err(|e| ConfigError::Parse {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let warnings = unknown_paths
            .into_iter()
            .map(|path_str| {
                let key = path_str
                    .split('.')
                    .next_back()
                    .unwrap_or(path_str.as_str())
                    .to_string();
                ConfigWarning {
                    key: key.clone(),
                    file: path.to_path_buf(),
                    line: find_line_number(&content, &key),
                    suggestion: suggest_key(&key),
                }
            })
            .collect();

        Ok((config, warnings))
    }

    /// Load the project config if present, defaults otherwise.
    ///
    /// A config file that exists but fails to parse is an error: silently
    /// building with defaults would write to unexpected directories.
    pub fn load_or_default(path: &Path) -> KilnResult<(Self, Vec<ConfigWarning>)> {
        if path.exists() {
            let (config, warnings) = Self::load_with_warnings(path)?;
            Ok((config.with_env_overrides(), warnings))
        } else {
            Ok((Self::default().with_env_overrides(), Vec::new()))
        }
    }

    /// Apply environment variable overrides (KILN_* prefix)
    pub fn with_env_overrides(mut self) -> Self {
        // KILN_SCRIPTS_MODE
        if let Ok(mode) = std::env::var("KILN_SCRIPTS_MODE") {
            match mode.to_lowercase().as_str() {
                "entry" => self.scripts.mode = BuildMode::Entry,
                "dynamic" => self.scripts.mode = BuildMode::Dynamic,
                _ => {}
            }
        }

        // KILN_DEBOUNCE_MS
        if let Ok(ms) = std::env::var("KILN_DEBOUNCE_MS") {
            if let Ok(ms) = ms.trim().parse() {
                self.watch.debounce_ms = ms;
            }
        }

        // KILN_PRESERVE_STRUCTURE
        if let Ok(val) = std::env::var("KILN_PRESERVE_STRUCTURE") {
            self.styles.preserve_structure = val.to_lowercase() == "true" || val == "1";
        }

        self
    }

    /// Resolve every relative path against `root`.
    pub fn rooted(mut self, root: &Path) -> Self {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        let join_all = |dirs: &mut Vec<PathBuf>| dirs.iter_mut().for_each(join);

        let scripts = &mut self.scripts;
        join(&mut scripts.src_dir);
        join(&mut scripts.out_dir);
        join_all(&mut scripts.entry_dirs);
        join_all(&mut scripts.named_dependency_dirs);
        join_all(&mut scripts.dependency_dirs);
        join_all(&mut scripts.dynamic_dependency_dirs);
        if let Some(entry) = scripts.dynamic_entry.as_mut() {
            join(entry);
        }

        let styles = &mut self.styles;
        join(&mut styles.src_dir);
        join(&mut styles.out_dir);
        for spec in &mut styles.index {
            join(&mut spec.output);
            join_all(&mut spec.target_dirs);
        }

        join(&mut self.images.root);
        join(&mut self.images.manifest);

        self
    }

    /// Check invariants that do not need the source tree.
    ///
    /// Invariants that depend on files on disk (unique entry names, unique
    /// flattened stylesheet names) are checked when the pipeline is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scripts.enabled && self.scripts.mode == BuildMode::Dynamic {
            if self.scripts.dynamic_entry.is_none() {
                return Err(ConfigError::Missing {
                    key: "scripts.dynamic_entry".to_string(),
                });
            }
        }

        for (i, spec) in self.styles.index.iter().enumerate() {
            if spec.target_dirs.is_empty() {
                return Err(ConfigError::Invalid {
                    key: format!("styles.index[{}].target_dirs", i),
                    message: "at least one directory is required".to_string(),
                });
            }
        }

        let images = &self.images;
        if images.origin_dir.is_empty() || images.origin_dir.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                key: "images.origin_dir".to_string(),
                message: "must be a single directory name".to_string(),
            });
        }
        check_range("images.avif.quality", images.avif.quality, 1, 100)?;
        check_range("images.avif.effort", images.avif.effort, 0, 9)?;
        check_range("images.webp.quality", images.webp.quality, 1, 100)?;
        check_range(
            "images.compression.jpeg_quality",
            images.compression.jpeg_quality,
            1,
            100,
        )?;
        let compression = &images.compression;
        match compression.mode {
            CompressionMode::Width if compression.width == 0 => {
                return Err(ConfigError::Invalid {
                    key: "images.compression.width".to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
            CompressionMode::Scale if !(compression.scale > 0.0 && compression.scale <= 1.0) => {
                return Err(ConfigError::Invalid {
                    key: "images.compression.scale".to_string(),
                    message: format!("{} is outside (0, 1]", compression.scale),
                });
            }
            _ => {}
        }

        Ok(())
    }

    /// Check that every configured source root is on disk.
    ///
    /// The image origin root is not checked; builds create it.
    pub fn check_sources(&self) -> Result<(), ConfigError> {
        let scripts = &self.scripts;
        if scripts.enabled {
            require_dir("scripts.src_dir", &scripts.src_dir)?;
            match scripts.mode {
                BuildMode::Entry => {
                    for (i, dir) in scripts.entry_dirs.iter().enumerate() {
                        require_dir(&format!("scripts.entry_dirs[{}]", i), dir)?;
                    }
                }
                BuildMode::Dynamic => {
                    if let Some(entry) = &scripts.dynamic_entry {
                        if !entry.is_file() {
                            return Err(missing_path("scripts.dynamic_entry", entry));
                        }
                    }
                }
            }
        }
        if self.styles.enabled {
            require_dir("styles.src_dir", &self.styles.src_dir)?;
        }
        Ok(())
    }
}

fn require_dir(key: &str, dir: &Path) -> Result<(), ConfigError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(missing_path(key, dir))
    }
}

fn missing_path(key: &str, path: &Path) -> ConfigError {
    ConfigError::MissingPath {
        key: key.to_string(),
        path: path.to_path_buf(),
    }
}

fn check_range(key: &str, value: u8, min: u8, max: u8) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("{} is outside {}..={}", value, min, max),
        });
    }
    Ok(())
}

fn find_line_number(content: &str, needle: &str) -> Option<usize> {
    for (i, line) in content.lines().enumerate() {
        if line.contains(needle) {
            return Some(i + 1);
        }
    }
    None
}

fn suggest_key(unknown: &str) -> Option<String> {
    const CANDIDATES: &[&str] = &[
        "scripts",
        "styles",
        "images",
        "watch",
        "tools",
        "enabled",
        "mode",
        "src_dir",
        "out_dir",
        "entry_dirs",
        "named_dependency_dirs",
        "dependency_dirs",
        "dynamic_entry",
        "dynamic_dependency_dirs",
        "lint",
        "preserve_structure",
        "index",
        "output",
        "target_dirs",
        "import",
        "partial_change",
        "root",
        "origin_dir",
        "manifest",
        "quality",
        "effort",
        "width",
        "scale",
        "jpeg_quality",
        "debounce_ms",
        "image_debounce_ms",
        "postprocess_debounce_ms",
        "lint_debounce_ms",
        "stable_poll_ms",
        "stable_max_polls",
        "timeout_secs",
    ];

    let mut best: Option<(&str, usize)> = None;
    for candidate in CANDIDATES {
        let dist = levenshtein(unknown, candidate);
        best = match best {
            None => Some((candidate, dist)),
            Some((_, best_dist)) if dist < best_dist => Some((candidate, dist)),
            Some(current) => Some(current),
        };
    }

    match best {
        Some((candidate, dist)) if dist <= 2 => Some(candidate.to_string()),
        _ => None,
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }

    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    let mut prev: Vec<usize> = (0..=b_bytes.len()).collect();
    let mut curr = vec![0usize; b_bytes.len() + 1];

    for (i, &ac) in a_bytes.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &bc) in b_bytes.iter().enumerate() {
            let cost = if ac == bc { 0 } else { 1 };
            curr[j + 1] = std::cmp::min(std::cmp::min(prev[j + 1] + 1, curr[j] + 1), prev[j] + cost);
        }
        prev.clone_from_slice(&curr);
    }

    prev[b_bytes.len()]
}
