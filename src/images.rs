//! Image transcoding
//!
//! Every image under the origin root gets one derivative per enabled format,
//! mirrored under a sibling directory named after the format:
//!
//! ```text
//! images/_origin/top/hero.jpeg
//! images/avif/top/hero.avif
//! images/webp/top/hero.webp
//! images/compression/top/hero.jpg
//! ```
//!
//! The manifest remembers the mtime each origin had when it was last
//! converted. An image whose mtime is unchanged and whose derivatives all
//! exist is skipped without invoking the transcoder.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use crate::classify::IMAGE_EXTENSIONS;
use crate::config::{CompressionMode, ImagesConfig, WatchConfig};
use crate::error::KilnResult;
use crate::manifest::{ManifestEntry, ManifestStore};
use crate::paths;
use crate::reconcile::{self, ExpectedOutputs, ReconcileScope};
use crate::report::BuildReport;
use crate::tools::{FormatJob, ImageTranscoder, Resize, Toolchain};

/// Images converted at once during a full scan
const SCAN_CONCURRENCY: usize = 4;

/// A derivative format, each with its own output root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageFormat {
    Avif,
    Webp,
    Compression,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Avif, ImageFormat::Webp, ImageFormat::Compression];

    /// Directory under the images root, also used as log label.
    pub fn dir_name(self) -> &'static str {
        match self {
            ImageFormat::Avif => "avif",
            ImageFormat::Webp => "webp",
            ImageFormat::Compression => "compression",
        }
    }
}

/// Whether `path` has an extension the pipeline converts.
pub fn is_supported(path: &Path) -> bool {
    paths::extension(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// How stability of a file being written is detected
#[derive(Debug, Clone, Copy)]
struct Stability {
    poll: Duration,
    max_polls: u32,
}

/// One async lock per origin image, shared by every caller that converts or
/// deletes it
#[derive(Default)]
struct ImageLocks {
    held: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl ImageLocks {
    fn for_source(&self, source: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut held = self.held.lock();
        // drop locks nobody holds or waits on
        held.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(held.entry(source.to_path_buf()).or_default())
    }
}

pub struct ImagePipeline {
    config: ImagesConfig,
    stability: Stability,
    transcoder: Arc<dyn ImageTranscoder>,
    manifest: Arc<ManifestStore>,
    locks: ImageLocks,
}

impl ImagePipeline {
    pub fn new(
        config: ImagesConfig,
        watch: &WatchConfig,
        toolchain: &Toolchain,
        manifest: Arc<ManifestStore>,
    ) -> Self {
        Self {
            config,
            stability: Stability {
                poll: Duration::from_millis(watch.stable_poll_ms),
                max_polls: watch.stable_max_polls.max(2),
            },
            transcoder: Arc::clone(&toolchain.images),
            manifest,
            locks: ImageLocks::default(),
        }
    }

    pub fn config(&self) -> &ImagesConfig {
        &self.config
    }

    pub fn manifest(&self) -> &ManifestStore {
        &self.manifest
    }

    pub fn origin_root(&self) -> PathBuf {
        self.config.origin_root()
    }

    pub fn format_root(&self, format: ImageFormat) -> PathBuf {
        self.config.root.join(format.dir_name())
    }

    pub fn enabled_formats(&self) -> Vec<ImageFormat> {
        ImageFormat::ALL
            .into_iter()
            .filter(|format| match format {
                ImageFormat::Avif => self.config.avif.enabled,
                ImageFormat::Webp => self.config.webp.enabled,
                ImageFormat::Compression => self.config.compression.enabled,
            })
            .collect()
    }

    /// Manifest key of an origin image.
    pub fn key(&self, source: &Path) -> Option<String> {
        paths::relative_key(source, &self.origin_root())
    }

    /// Derivative path of `source` in `format`.
    pub fn output_path(&self, source: &Path, format: ImageFormat) -> Option<PathBuf> {
        let rel = source.strip_prefix(self.origin_root()).ok()?;
        let ext = match format {
            ImageFormat::Avif => "avif".to_string(),
            ImageFormat::Webp => "webp".to_string(),
            ImageFormat::Compression => match paths::extension(rel)?.as_str() {
                "jpeg" => "jpg".to_string(),
                other => other.to_string(),
            },
        };
        // strip only the last extension: `a.b.png` keeps `a.b`
        let mut name = rel.with_extension("").into_os_string();
        name.push(".");
        name.push(ext);
        Some(self.format_root(format).join(name))
    }

    /// One derivative per enabled format.
    pub fn derived_outputs(&self, source: &Path) -> Vec<(ImageFormat, PathBuf)> {
        self.enabled_formats()
            .into_iter()
            .filter_map(|format| Some((format, self.output_path(source, format)?)))
            .collect()
    }

    fn job(&self, source: &Path, format: ImageFormat) -> FormatJob {
        let images = &self.config;
        match format {
            ImageFormat::Avif => FormatJob::Avif {
                quality: images.avif.quality,
                effort: images.avif.effort,
            },
            ImageFormat::Webp => FormatJob::Webp {
                quality: images.webp.quality,
            },
            ImageFormat::Compression => {
                let compression = &images.compression;
                let resize = match compression.mode {
                    CompressionMode::Width => Resize::MaxWidth(compression.width),
                    CompressionMode::Scale => Resize::Scale(compression.scale),
                };
                let is_jpeg = matches!(paths::extension(source).as_deref(), Some("jpg" | "jpeg"));
                FormatJob::Compressed {
                    resize,
                    quality: is_jpeg.then_some(compression.jpeg_quality),
                }
            }
        }
    }

    /// Convert or delete `source` depending on whether it still exists.
    pub async fn sync_image(&self, source: &Path) -> KilnResult<BuildReport> {
        if source.is_file() {
            self.process(source).await
        } else {
            self.delete(source).await
        }
    }

    /// Bring the derivatives of one origin image up to date.
    ///
    /// Waits for any conversion or deletion of the same image to finish.
    pub async fn process(&self, source: &Path) -> KilnResult<BuildReport> {
        let lock = self.locks.for_source(source);
        let _guard = lock.lock().await;
        let mut report = BuildReport::new();
        let Some(key) = self.key(source).filter(|_| is_supported(source)) else {
            return Ok(report);
        };

        let outputs = self.derived_outputs(source);
        let current = match tokio::fs::metadata(source).await {
            Ok(meta) => ManifestEntry::from_metadata(&meta),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // deleted while queued; its removal event cleans up
                report.skipped.push(source.to_path_buf());
                return Ok(report);
            }
            Err(e) => {
                report.fail(source, "stat", e);
                return Ok(report);
            }
        };
        if self.manifest.is_fresh(&key, &current).await && outputs.iter().all(|(_, out)| out.is_file()) {
            tracing::debug!(path = %key, "image up to date, skipping");
            report.skipped.push(source.to_path_buf());
            return Ok(report);
        }

        let Some(stable) = self.wait_until_stable(source).await else {
            report.fail(source, "stability", "file kept changing while waiting to convert");
            return Ok(report);
        };
        // recorded even if the file changes again mid-conversion; the next
        // event then sees a newer mtime and converts again
        let converted = ManifestEntry::from_metadata(&stable);

        let mut any_success = false;
        for (format, output) in outputs {
            if let Some(parent) = output.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    report.fail(&output, format.dir_name(), e);
                    continue;
                }
            }
            match self.transcoder.transcode(source, &output, &self.job(source, format)).await {
                Ok(()) => {
                    tracing::info!(path = %output.display(), format = format.dir_name(), "converted image");
                    report.written.push(output);
                    any_success = true;
                }
                Err(e) => report.fail(source, format.dir_name(), e),
            }
        }

        if any_success {
            self.manifest.record(&key, converted).await?;
        }
        Ok(report)
    }

    /// Poll the size until two successive reads agree.
    async fn wait_until_stable(&self, source: &Path) -> Option<Metadata> {
        let mut last_size = None;
        for poll in 0..self.stability.max_polls {
            if poll > 0 {
                tokio::time::sleep(self.stability.poll).await;
            }
            match tokio::fs::metadata(source).await {
                Ok(meta) if last_size == Some(meta.len()) => return Some(meta),
                Ok(meta) => last_size = Some(meta.len()),
                // vanished or locked; try again
                Err(_) => last_size = None,
            }
        }
        None
    }

    /// Remove every derivative of a deleted origin and forget it.
    pub async fn delete(&self, source: &Path) -> KilnResult<BuildReport> {
        let lock = self.locks.for_source(source);
        let _guard = lock.lock().await;
        let mut report = BuildReport::new();
        let Some(key) = self.key(source).filter(|_| is_supported(source)) else {
            return Ok(report);
        };

        for format in ImageFormat::ALL {
            let Some(output) = self.output_path(source, format) else {
                continue;
            };
            match paths::remove_file_if_exists(&output) {
                Ok(true) => {
                    tracing::info!(path = %output.display(), "deleted image derivative");
                    report.deleted.push(output.clone());
                    if let Some(parent) = output.parent() {
                        for dir in paths::remove_empty_dirs_up(parent, &self.format_root(format)) {
                            tracing::debug!(path = %dir.display(), "removed empty directory");
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => report.fail(&output, "delete", e),
            }
        }

        if self.manifest.remove(&key).await? {
            tracing::debug!(path = %key, "dropped manifest entry");
        }
        Ok(report)
    }

    fn origin_images(&self) -> Vec<PathBuf> {
        paths::walk_files(&self.origin_root())
            .into_iter()
            .filter(|p| is_supported(p))
            .collect()
    }

    /// Convert every stale image, then remove what no origin accounts for.
    ///
    /// Derivatives of formats that are disabled are removed as well.
    pub async fn full_scan(&self) -> KilnResult<BuildReport> {
        let mut report = BuildReport::new();

        let results: Vec<KilnResult<BuildReport>> = stream::iter(self.origin_images())
            .map(|source| async move { self.process(&source).await })
            .buffer_unordered(SCAN_CONCURRENCY)
            .collect()
            .await;
        for result in results {
            report.merge(result?);
        }

        // images added while converting have derivatives of their own by now
        let sources = self.origin_images();
        let live: HashSet<String> = sources.iter().filter_map(|s| self.key(s)).collect();
        for key in self.manifest.retain(|key| live.contains(key)).await? {
            tracing::info!(path = %key, "dropped manifest entry for missing image");
        }

        let enabled = self.enabled_formats();
        for format in ImageFormat::ALL {
            let expected: ExpectedOutputs = if enabled.contains(&format) {
                sources.iter().filter_map(|s| self.output_path(s, format)).collect()
            } else {
                ExpectedOutputs::new()
            };
            let scope = ReconcileScope::recursive(self.format_root(format));
            report.absorb_reconcile(reconcile::reconcile(&scope, &expected));
        }

        tracing::info!(
            images = sources.len(),
            converted = report.written.len(),
            skipped = report.skipped.len(),
            deleted = report.deleted.len(),
            "image scan complete"
        );
        Ok(report)
    }

    /// Rebuild the manifest from the origin tree without converting anything.
    ///
    /// Returns the number of images recorded.
    pub async fn regenerate_manifest(&self) -> KilnResult<usize> {
        let origin = self.origin_root();
        if !origin.is_dir() {
            tracing::warn!(path = %origin.display(), "origin directory does not exist");
            return Ok(0);
        }

        let mut entries = BTreeMap::new();
        for source in self.origin_images() {
            let Some(key) = self.key(&source) else { continue };
            match tokio::fs::metadata(&source).await {
                Ok(meta) => {
                    entries.insert(key, ManifestEntry::from_metadata(&meta));
                }
                Err(e) => tracing::error!(path = %source.display(), error = %e, "cannot stat image"),
            }
        }

        let count = entries.len();
        self.manifest.replace_all(entries).await?;
        tracing::info!(count, path = %self.manifest.path().display(), "regenerated image manifest");
        Ok(count)
    }

    /// Create the origin root and every enabled format root.
    pub async fn ensure_roots(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.origin_root()).await?;
        for format in self.enabled_formats() {
            tokio::fs::create_dir_all(self.format_root(format)).await?;
        }
        Ok(())
    }
}
