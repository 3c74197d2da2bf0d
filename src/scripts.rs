//! Script bundling
//!
//! In entry mode every `.js` file directly inside an entry directory is its
//! own bundle, written to `<out_dir>/<stem>.js`. In dynamic mode a single
//! entry is bundled with code splitting and the bundler names the chunks.
//!
//! Every emitted file is then downleveled and minified, in that order. A
//! failure in either step only affects that file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{BuildMode, ScriptsConfig};
use crate::error::ConfigError;
use crate::paths;
use crate::reconcile::{self, ExpectedOutputs, ReconcileReport, ReconcileScope};
use crate::report::BuildReport;
use crate::tools::{BundleEntry, BundleJob, Bundler, Linter, Toolchain};

pub const SCRIPT_EXTENSION: &str = "js";

/// A script bundled on its own
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPoint {
    /// File name of the source (`top.js`)
    pub name: String,
    pub path: PathBuf,
    /// Name of the bundle without extension (`top`)
    pub output_base_name: String,
}

impl EntryPoint {
    pub fn from_path(path: &Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            output_base_name: paths::stem(path),
        }
    }

    pub fn output_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}.{}", self.output_base_name, SCRIPT_EXTENSION))
    }

    fn bundle_entry(&self) -> BundleEntry {
        BundleEntry {
            name: self.output_base_name.clone(),
            path: self.path.clone(),
        }
    }
}

/// Every entry in the configured entry dirs, sorted by output name.
///
/// Two entries producing the same bundle name is a configuration error.
pub fn discover_entries(config: &ScriptsConfig) -> Result<Vec<EntryPoint>, ConfigError> {
    let mut by_name: BTreeMap<String, EntryPoint> = BTreeMap::new();

    for dir in &config.entry_dirs {
        for path in paths::list_files(dir) {
            if paths::extension(&path).as_deref() != Some(SCRIPT_EXTENSION) {
                continue;
            }
            let entry = EntryPoint::from_path(&path);
            if let Some(first) = by_name.get(&entry.output_base_name) {
                return Err(ConfigError::DuplicateEntry {
                    name: entry.output_base_name.clone(),
                    first: first.path.clone(),
                    second: entry.path,
                });
            }
            by_name.insert(entry.output_base_name.clone(), entry);
        }
    }

    Ok(by_name.into_values().collect())
}

/// Builds script bundles. Bundler runs never overlap.
pub struct ScriptBuilder {
    config: ScriptsConfig,
    bundler: Arc<dyn Bundler>,
    linter: Arc<dyn Linter>,
    build_lock: Mutex<()>,
}

impl ScriptBuilder {
    pub fn new(config: ScriptsConfig, toolchain: &Toolchain) -> Self {
        Self {
            config,
            bundler: Arc::clone(&toolchain.bundler),
            linter: Arc::clone(&toolchain.linter),
            build_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ScriptsConfig {
        &self.config
    }

    pub fn entries(&self) -> Result<Vec<EntryPoint>, ConfigError> {
        discover_entries(&self.config)
    }

    /// Rebuild every bundle and drop stale outputs.
    pub async fn build_all(&self) -> BuildReport {
        let _guard = self.build_lock.lock().await;
        match self.config.mode {
            BuildMode::Entry => self.build_entries().await,
            BuildMode::Dynamic => self.build_dynamic().await,
        }
    }

    /// Rebuild one entry. In dynamic mode this is a full build.
    pub async fn build_entry(&self, entry: &EntryPoint) -> BuildReport {
        if self.config.mode == BuildMode::Dynamic {
            return self.build_all().await;
        }

        let _guard = self.build_lock.lock().await;
        let mut report = BuildReport::new();
        let out_dir = &self.config.out_dir;

        if !entry.path.is_file() {
            report.fail(&entry.path, "bundle", "entry file does not exist");
            return report;
        }

        let job = BundleJob {
            entries: vec![entry.bundle_entry()],
            out_dir: out_dir.clone(),
            splitting: false,
        };
        match self.bundler.bundle(&job).await {
            Ok(()) => {
                let output = entry.output_path(out_dir);
                self.finish_outputs(vec![output], &mut report).await;
            }
            Err(e) => report.fail(&entry.path, "bundle", e),
        }

        match self.entries() {
            Ok(entries) => report.absorb_reconcile(self.reconcile_entries(&entries)),
            Err(e) => tracing::warn!(error = %e, "skipping script reconciliation"),
        }
        report
    }

    async fn build_entries(&self) -> BuildReport {
        let mut report = BuildReport::new();
        let out_dir = &self.config.out_dir;

        let entries = match self.entries() {
            Ok(entries) => entries,
            Err(e) => {
                let dir = self.config.entry_dirs.first().cloned().unwrap_or_default();
                report.fail(&dir, "entries", e);
                return report;
            }
        };

        if entries.is_empty() {
            tracing::warn!("no script entry files found");
        } else {
            let job = BundleJob {
                entries: entries.iter().map(EntryPoint::bundle_entry).collect(),
                out_dir: out_dir.clone(),
                splitting: false,
            };
            match self.bundler.bundle(&job).await {
                Ok(()) => {
                    let outputs = entries.iter().map(|e| e.output_path(out_dir)).collect();
                    self.finish_outputs(outputs, &mut report).await;
                }
                Err(e) => report.fail(out_dir, "bundle", e),
            }
        }

        report.absorb_reconcile(self.reconcile_entries(&entries));
        tracing::info!(
            bundles = report.written.len(),
            failures = report.failures.len(),
            "script build complete"
        );
        report
    }

    async fn build_dynamic(&self) -> BuildReport {
        let mut report = BuildReport::new();
        let out_dir = &self.config.out_dir;

        let entry = match self.config.dynamic_entry.as_deref() {
            Some(path) if path.is_file() => EntryPoint::from_path(path),
            Some(path) => {
                report.fail(path, "bundle", "dynamic entry does not exist");
                return report;
            }
            None => {
                report.fail(out_dir, "bundle", "no dynamic entry configured");
                return report;
            }
        };

        // chunk names change between builds: bundle into a staging dir so a
        // failed build leaves the previous chunks in place
        let staging = match std::fs::create_dir_all(out_dir).and_then(|()| {
            tempfile::Builder::new().prefix(".bundle-").tempdir_in(out_dir)
        }) {
            Ok(dir) => dir,
            Err(e) => {
                report.fail(out_dir, "bundle", e);
                return report;
            }
        };

        let job = BundleJob {
            entries: vec![entry.bundle_entry()],
            out_dir: staging.path().to_path_buf(),
            splitting: true,
        };
        if let Err(e) = self.bundler.bundle(&job).await {
            report.fail(&entry.path, "bundle", e);
            return report;
        }

        let mut outputs = Vec::new();
        for staged in paths::list_files(staging.path()) {
            if paths::extension(&staged).as_deref() != Some(SCRIPT_EXTENSION) {
                continue;
            }
            let Some(name) = staged.file_name() else { continue };
            let output = out_dir.join(name);
            match std::fs::rename(&staged, &output) {
                Ok(()) => outputs.push(output),
                Err(e) => report.fail(&output, "bundle", e),
            }
        }

        let expected: ExpectedOutputs = outputs.iter().cloned().collect();
        report.absorb_reconcile(reconcile::reconcile(&self.output_scope(), &expected));
        self.finish_outputs(outputs, &mut report).await;

        tracing::info!(files = report.written.len(), "dynamic script build complete");
        report
    }

    /// Downlevel then minify every output, one chain per file.
    async fn finish_outputs(&self, outputs: Vec<PathBuf>, report: &mut BuildReport) {
        let chains = outputs.into_iter().map(|output| async move {
            if !output.is_file() {
                return (output, Err(("bundle", "bundler did not produce this file".to_string())));
            }
            if let Err(e) = self.bundler.downlevel(&output).await {
                return (output, Err(("downlevel", e.to_string())));
            }
            if let Err(e) = self.bundler.minify(&output).await {
                return (output, Err(("minify", e.to_string())));
            }
            (output, Ok(()))
        });

        for (output, result) in futures::future::join_all(chains).await {
            match result {
                Ok(()) => {
                    tracing::info!(path = %output.display(), "built bundle");
                    report.written.push(output);
                }
                Err((stage, message)) => report.fail(&output, stage, message),
            }
        }
    }

    fn output_scope(&self) -> ReconcileScope {
        ReconcileScope::direct(&self.config.out_dir).with_suffixes(&[".js"])
    }

    fn reconcile_entries(&self, entries: &[EntryPoint]) -> ReconcileReport {
        let expected: ExpectedOutputs = entries
            .iter()
            .map(|e| e.output_path(&self.config.out_dir))
            .collect();
        reconcile::reconcile(&self.output_scope(), &expected)
    }

    /// Lint the script sources. Failures are reported, never fatal.
    pub async fn lint(&self) -> BuildReport {
        let mut report = BuildReport::new();
        match self.linter.lint(&self.config.src_dir).await {
            Ok(()) => tracing::info!("lint passed"),
            Err(e) => report.fail(&self.config.src_dir, "lint", e),
        }
        report
    }
}
