//! Pipeline facade
//!
//! Owns one instance of every component and routes work between them. A
//! one-shot build runs the phases in order; in watch mode every change is
//! classified and scheduled under the key of the smallest target it affects.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{self, ChangeKind, Impact, SourceKind};
use crate::config::{Config, IndexSpec};
use crate::error::KilnResult;
use crate::images::ImagePipeline;
use crate::manifest::ManifestStore;
use crate::report::{BuildReport, Phase, Summary};
use crate::scheduler::{ResourceKey, Scheduler, TargetKey, Ticket};
use crate::scripts::{self, EntryPoint, ScriptBuilder};
use crate::styles::{self, StyleBuilder, StylePlan};
use crate::tools::Toolchain;
use crate::watcher::ChangeEvent;

/// Debounce windows per kind of work
#[derive(Debug, Clone, Copy)]
struct Windows {
    source: Duration,
    image: Duration,
    post_process: Duration,
    lint: Duration,
}

impl Windows {
    fn from_config(config: &Config) -> Self {
        let watch = &config.watch;
        Self {
            source: Duration::from_millis(watch.debounce_ms),
            image: Duration::from_millis(watch.image_debounce_ms),
            post_process: Duration::from_millis(watch.postprocess_debounce_ms),
            lint: Duration::from_millis(watch.lint_debounce_ms),
        }
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    scheduler: Scheduler,
    scripts: Arc<ScriptBuilder>,
    styles: Arc<StyleBuilder>,
    images: Arc<ImagePipeline>,
    windows: Windows,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate `config` against the source tree and wire every component.
    ///
    /// `config` must already be rooted.
    pub async fn new(config: Config, toolchain: Toolchain) -> KilnResult<Self> {
        config.validate()?;
        config.check_sources()?;
        if config.scripts.enabled && config.scripts.mode == crate::config::BuildMode::Entry {
            scripts::discover_entries(&config.scripts)?;
        }
        if config.styles.enabled {
            StylePlan::for_tree(&config.styles)?;
        }

        let manifest = Arc::new(ManifestStore::load(&config.images.manifest).await);
        let scripts = Arc::new(ScriptBuilder::new(config.scripts.clone(), &toolchain));
        let styles = Arc::new(StyleBuilder::new(config.styles.clone(), &toolchain));
        let images = Arc::new(ImagePipeline::new(
            config.images.clone(),
            &config.watch,
            &toolchain,
            manifest,
        ));

        Ok(Self {
            windows: Windows::from_config(&config),
            config: Arc::new(config),
            scheduler: Scheduler::new(),
            scripts,
            styles,
            images,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn images(&self) -> &ImagePipeline {
        &self.images
    }

    /// Directories the watcher has to observe.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let config = &self.config;
        let mut roots = Vec::new();
        if config.scripts.enabled {
            roots.push(config.scripts.src_dir.clone());
        }
        if config.styles.enabled {
            roots.push(config.styles.src_dir.clone());
        }
        if config.images.enabled {
            roots.push(config.images.origin_root());
        }
        roots
    }

    /// One-shot build of the selected phases (all when `only` is empty).
    ///
    /// Per-file failures end up in the summary. Only an unrecoverable
    /// manifest write is returned as an error.
    pub async fn build_all(&self, only: &[Phase]) -> KilnResult<Summary> {
        let wanted = |phase: Phase| only.is_empty() || only.contains(&phase);
        let config = &self.config;
        let mut summary = Summary::default();

        if config.styles.enabled && (wanted(Phase::Index) || wanted(Phase::Styles)) {
            summary.push(Phase::Index, styles::generate_all(&config.styles.index));
        }
        if config.scripts.enabled && wanted(Phase::Scripts) {
            summary.push(Phase::Scripts, self.scripts.build_all().await);
        }
        let lint_wanted =
            only.contains(&Phase::Lint) || (config.scripts.lint && wanted(Phase::Scripts));
        if config.scripts.enabled && lint_wanted {
            summary.push(Phase::Lint, self.scripts.lint().await);
        }
        if config.styles.enabled && wanted(Phase::Styles) {
            summary.push(Phase::Styles, self.styles.compile_all().await);
        }
        if config.images.enabled && wanted(Phase::Images) {
            self.images.ensure_roots().await?;
            summary.push(Phase::Images, self.images.full_scan().await?);
        }

        Ok(summary)
    }

    /// Rebuild the image manifest from the origin tree.
    pub async fn regenerate_manifest(&self) -> KilnResult<usize> {
        self.images.regenerate_manifest().await
    }

    /// Schedule the work a change requires. Returns one ticket per scheduled unit.
    pub fn handle_change(&self, event: &ChangeEvent) -> Vec<Ticket> {
        let config = &self.config;
        let path = event.path.as_path();
        let mut tickets = Vec::new();

        for i in classify::indexes_to_regenerate(config, path, event.kind) {
            if let Some(spec) = config.styles.index.get(i) {
                tickets.push(self.schedule_index(i, spec.clone()));
            }
        }

        match classify::source_file(config, path).map(|f| f.kind) {
            Some(SourceKind::Script(_)) => self.route_script(path, event.kind, &mut tickets),
            Some(SourceKind::Stylesheet(_)) => self.route_stylesheet(path, event.kind, &mut tickets),
            Some(SourceKind::Image) => tickets.push(self.schedule_image(path)),
            None if event.kind == ChangeKind::Removed => self.route_removed_dir(path, &mut tickets),
            None => {}
        }

        if !tickets.is_empty() {
            tracing::debug!(path = %path.display(), kind = ?event.kind, units = tickets.len(), "scheduled");
        }
        tickets
    }

    /// Wait until no work is pending or running.
    pub async fn settle(&self) {
        self.scheduler.settle().await
    }

    fn route_script(&self, path: &Path, kind: ChangeKind, tickets: &mut Vec<Ticket>) {
        match classify::classify_script(&self.config, path, kind) {
            Impact::Entries(entries) => {
                for entry in entries {
                    tickets.push(self.schedule_entry(entry));
                }
            }
            Impact::FullRebuild | Impact::ReconcileOnly => tickets.push(self.schedule_scripts()),
            Impact::None => return,
        }
        if self.config.scripts.lint {
            tickets.push(self.schedule_lint());
        }
    }

    fn route_stylesheet(&self, path: &Path, kind: ChangeKind, tickets: &mut Vec<Ticket>) {
        match classify::classify_stylesheet(&self.config, path, kind) {
            Impact::Entries(leaves) => tickets.push(self.schedule_compile(path, leaves)),
            Impact::FullRebuild => tickets.push(self.schedule_styles()),
            Impact::ReconcileOnly => {
                let styles = Arc::clone(&self.styles);
                tickets.push(self.scheduler.schedule(
                    ResourceKey::Path(path.to_path_buf()),
                    self.windows.source,
                    move || {
                        let styles = Arc::clone(&styles);
                        async move {
                            let report = styles.reconcile().await;
                            log_report("stylesheets", &report);
                        }
                    },
                ));
            }
            Impact::None => {}
        }
    }

    /// A removed directory takes every file below it along.
    fn route_removed_dir(&self, path: &Path, tickets: &mut Vec<Ticket>) {
        if crate::paths::extension(path).is_some() {
            return;
        }
        let config = &self.config;
        if config.scripts.enabled && crate::paths::is_within(path, &config.scripts.src_dir) {
            tickets.push(self.schedule_scripts());
        }
        if config.styles.enabled && crate::paths::is_within(path, &config.styles.src_dir) {
            tickets.push(self.schedule_styles());
        }
        if config.images.enabled && crate::paths::is_within(path, &config.images.origin_root()) {
            tickets.push(self.schedule_image_scan());
        }
    }

    fn schedule_entry(&self, entry: EntryPoint) -> Ticket {
        let scripts = Arc::clone(&self.scripts);
        self.scheduler.schedule(
            ResourceKey::Path(entry.path.clone()),
            self.windows.source,
            move || {
                let scripts = Arc::clone(&scripts);
                let entry = entry.clone();
                async move {
                    let report = scripts.build_entry(&entry).await;
                    log_report(&entry.name, &report);
                }
            },
        )
    }

    fn schedule_scripts(&self) -> Ticket {
        let scripts = Arc::clone(&self.scripts);
        self.scheduler.schedule(TargetKey::Scripts, self.windows.source, move || {
            let scripts = Arc::clone(&scripts);
            async move {
                let report = scripts.build_all().await;
                log_report("scripts", &report);
            }
        })
    }

    fn schedule_lint(&self) -> Ticket {
        let scripts = Arc::clone(&self.scripts);
        self.scheduler.schedule(TargetKey::Lint, self.windows.lint, move || {
            let scripts = Arc::clone(&scripts);
            async move {
                scripts.lint().await;
            }
        })
    }

    fn schedule_index(&self, i: usize, spec: IndexSpec) -> Ticket {
        self.scheduler.schedule(TargetKey::StyleIndex(i), self.windows.source, move || {
            let spec = spec.clone();
            async move {
                // the rewritten index is picked up by the watcher and compiled
                styles::generate_all(std::slice::from_ref(&spec));
            }
        })
    }

    /// Compile `leaves` under the key of the changed file, then post-process.
    fn schedule_compile(&self, changed: &Path, leaves: Vec<PathBuf>) -> Ticket {
        let styles = Arc::clone(&self.styles);
        let scheduler = self.scheduler.clone();
        let window = self.windows.post_process;
        self.scheduler.schedule(
            ResourceKey::Path(changed.to_path_buf()),
            self.windows.source,
            move || {
                let styles = Arc::clone(&styles);
                let scheduler = scheduler.clone();
                let leaves = leaves.clone();
                async move {
                    let report = styles.compile_outputs(&leaves).await;
                    log_report("stylesheets", &report);
                    if !report.written.is_empty() {
                        let _ = schedule_post_process(&scheduler, &styles, window);
                    }
                }
            },
        )
    }

    fn schedule_styles(&self) -> Ticket {
        let styles = Arc::clone(&self.styles);
        self.scheduler.schedule(TargetKey::Styles, self.windows.source, move || {
            let styles = Arc::clone(&styles);
            async move {
                let report = styles.compile_all().await;
                log_report("styles", &report);
            }
        })
    }

    fn schedule_image(&self, path: &Path) -> Ticket {
        let images = Arc::clone(&self.images);
        let source = path.to_path_buf();
        self.scheduler.schedule(
            ResourceKey::Path(source.clone()),
            self.windows.image,
            move || {
                let images = Arc::clone(&images);
                let source = source.clone();
                async move {
                    match images.sync_image(&source).await {
                        Ok(report) => log_report("image", &report),
                        Err(e) => tracing::error!(path = %source.display(), error = %e, "image manifest not saved"),
                    }
                }
            },
        )
    }

    fn schedule_image_scan(&self) -> Ticket {
        let images = Arc::clone(&self.images);
        self.scheduler.schedule(TargetKey::Images, self.windows.image, move || {
            let images = Arc::clone(&images);
            async move {
                match images.full_scan().await {
                    Ok(report) => log_report("images", &report),
                    Err(e) => tracing::error!(error = %e, "image manifest not saved"),
                }
            }
        })
    }
}

fn schedule_post_process(scheduler: &Scheduler, styles: &Arc<StyleBuilder>, window: Duration) -> Ticket {
    let styles = Arc::clone(styles);
    scheduler.schedule(TargetKey::PostProcess, window, move || {
        let styles = Arc::clone(&styles);
        async move {
            let report = styles.post_process_all().await;
            log_report("post-process", &report);
        }
    })
}

fn log_report(target: &str, report: &BuildReport) {
    if report.is_success() {
        tracing::info!(
            target_name = target,
            written = report.written.len(),
            deleted = report.deleted.len(),
            "rebuilt"
        );
    } else {
        tracing::warn!(target_name = target, failures = report.failures.len(), "rebuilt with failures");
    }
}
