//! Stylesheet compilation
//!
//! Every stylesheet under the source root that is neither a partial nor an
//! index is a leaf and compiles to one CSS file plus source map. Outputs
//! either mirror the source tree or are flattened into the output dir by
//! file name. After compilation stale `.css` / `.css.map` files are
//! removed and the post-processor rewrites every CSS file left in the tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::classify::{style_role, StyleRole};
use crate::config::StylesConfig;
use crate::error::ConfigError;
use crate::paths;
use crate::reconcile::{self, ExpectedOutputs, ReconcileReport, ReconcileScope};
use crate::report::BuildReport;
use crate::tools::{StyleCompiler, Toolchain};

use super::STYLE_EXTENSION;

/// Leaf stylesheets and where each one compiles to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StylePlan {
    /// leaf source → CSS output
    pub outputs: BTreeMap<PathBuf, PathBuf>,
}

impl StylePlan {
    /// Plan the current tree. Flattened name collisions are an error.
    pub fn for_tree(config: &StylesConfig) -> Result<Self, ConfigError> {
        let mut outputs = BTreeMap::new();
        let mut by_output: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

        for leaf in leaves(&config.src_dir) {
            let output = output_for(config, &leaf);
            if let Some(first) = by_output.get(&output) {
                return Err(ConfigError::DuplicateStylesheet {
                    name: output
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    first: first.clone(),
                    second: leaf,
                });
            }
            by_output.insert(output.clone(), leaf.clone());
            outputs.insert(leaf, output);
        }

        Ok(Self { outputs })
    }

    /// Every CSS file and source map the plan produces.
    pub fn expected(&self) -> ExpectedOutputs {
        self.outputs
            .values()
            .flat_map(|css| [css.clone(), map_path(css)])
            .collect()
    }
}

/// Every compilable stylesheet under `src_dir`, sorted.
pub fn leaves(src_dir: &Path) -> Vec<PathBuf> {
    paths::walk_files(src_dir)
        .into_iter()
        .filter(|p| paths::extension(p).as_deref() == Some(STYLE_EXTENSION))
        .filter(|p| style_role(p) == StyleRole::Leaf)
        .collect()
}

/// CSS path a leaf compiles to.
pub fn output_for(config: &StylesConfig, leaf: &Path) -> PathBuf {
    let css_name = format!("{}.css", paths::stem(leaf));
    if config.preserve_structure {
        let rel_dir = leaf
            .parent()
            .and_then(|p| p.strip_prefix(&config.src_dir).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.out_dir.join(rel_dir).join(css_name)
    } else {
        config.out_dir.join(css_name)
    }
}

/// Source map written next to a CSS file.
pub fn map_path(css: &Path) -> PathBuf {
    let mut map = css.as_os_str().to_owned();
    map.push(".map");
    PathBuf::from(map)
}

/// Compiles stylesheets.
///
/// Compiling, post-processing and reconciling all write to the output tree
/// and never overlap each other.
pub struct StyleBuilder {
    config: StylesConfig,
    compiler: Arc<dyn StyleCompiler>,
    compile_lock: Mutex<()>,
}

impl StyleBuilder {
    pub fn new(config: StylesConfig, toolchain: &Toolchain) -> Self {
        Self {
            config,
            compiler: Arc::clone(&toolchain.styles),
            compile_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StylesConfig {
        &self.config
    }

    /// Compile every leaf, drop stale outputs, post-process the output tree.
    pub async fn compile_all(&self) -> BuildReport {
        let mut report = BuildReport::new();
        let plan = match StylePlan::for_tree(&self.config) {
            Ok(plan) => plan,
            Err(e) => {
                report.fail(&self.config.src_dir, "plan", e);
                return report;
            }
        };

        let _guard = self.compile_lock.lock().await;
        let jobs: Vec<(PathBuf, PathBuf)> = plan
            .outputs
            .iter()
            .map(|(leaf, css)| (leaf.clone(), css.clone()))
            .collect();
        report.merge(self.compile_jobs(jobs).await);
        report.absorb_reconcile(self.reconcile_plan(&plan));
        report.merge(self.post_process_tree().await);
        tracing::info!(
            compiled = report.written.len(),
            failures = report.failures.len(),
            "stylesheet build complete"
        );
        report
    }

    /// Compile one leaf. Post-processing is left to the caller.
    pub async fn compile_one(&self, leaf: &Path) -> BuildReport {
        self.compile_outputs(&[leaf.to_path_buf()]).await
    }

    /// Compile the given leaves concurrently. Missing files are skipped.
    pub async fn compile_outputs(&self, leaves: &[PathBuf]) -> BuildReport {
        let _guard = self.compile_lock.lock().await;
        let mut report = BuildReport::new();

        let mut jobs = Vec::new();
        for leaf in leaves {
            if style_role(leaf) != StyleRole::Leaf {
                continue;
            }
            if !leaf.is_file() {
                // removed since it was scheduled
                report.skipped.push(leaf.clone());
                continue;
            }
            jobs.push((leaf.clone(), output_for(&self.config, leaf)));
        }

        report.merge(self.compile_jobs(jobs).await);
        report
    }

    async fn compile_jobs(&self, jobs: Vec<(PathBuf, PathBuf)>) -> BuildReport {
        let mut report = BuildReport::new();
        let compiles = jobs.into_iter().map(|(leaf, css)| async move {
            let result = self.compiler.compile(&leaf, &css).await;
            (leaf, css, result)
        });

        for (leaf, css, result) in futures::future::join_all(compiles).await {
            match result {
                Ok(()) => {
                    tracing::info!(source = %leaf.display(), output = %css.display(), "compiled stylesheet");
                    report.written.push(css);
                }
                Err(e) => report.fail(&leaf, "compile", e),
            }
        }
        report
    }

    /// Post-process every CSS file under the output root.
    pub async fn post_process_all(&self) -> BuildReport {
        let _guard = self.compile_lock.lock().await;
        self.post_process_tree().await
    }

    async fn post_process_tree(&self) -> BuildReport {
        let mut report = BuildReport::new();
        let files: Vec<PathBuf> = paths::walk_files(&self.config.out_dir)
            .into_iter()
            .filter(|p| p.to_string_lossy().ends_with(".css"))
            .collect();

        let runs = files.into_iter().map(|css| async move {
            let result = self.compiler.post_process(&css).await;
            (css, result)
        });
        for (css, result) in futures::future::join_all(runs).await {
            if let Err(e) = result {
                report.fail(&css, "post-process", e);
            }
        }
        tracing::debug!(failures = report.failures.len(), "post-processing complete");
        report
    }

    /// Delete CSS outputs that no current leaf produces.
    pub async fn reconcile(&self) -> BuildReport {
        let _guard = self.compile_lock.lock().await;
        let mut report = BuildReport::new();
        match StylePlan::for_tree(&self.config) {
            Ok(plan) => report.absorb_reconcile(self.reconcile_plan(&plan)),
            Err(e) => report.fail(&self.config.src_dir, "plan", e),
        }
        report
    }

    fn reconcile_plan(&self, plan: &StylePlan) -> ReconcileReport {
        let scope = ReconcileScope::recursive(&self.config.out_dir).with_suffixes(&[".css", ".css.map"]);
        reconcile::reconcile(&scope, &plan.expected())
    }
}
