//! Orphaned output detection and cleanup
//!
//! Outputs are derived deterministically from sources, so after every build
//! the set of files that *should* exist under an output root is known. Files
//! under that root which belong to the reconciler (by suffix or predicate)
//! and are not in the expected set are orphans and get deleted.
//!
//! Nothing outside the scope's root is ever touched, and files the scope
//! does not claim (other extensions, hidden files) are left alone.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::paths;

/// Paths that should exist under an output root for the current sources.
pub type ExpectedOutputs = BTreeSet<PathBuf>;

type Claim = Box<dyn Fn(&Path) -> bool + Send + Sync>;

/// Which files under a root the reconciler owns
pub struct ReconcileScope {
    root: PathBuf,
    recursive: bool,
    prune_empty_dirs: bool,
    claim: Claim,
}

impl std::fmt::Debug for ReconcileScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileScope")
            .field("root", &self.root)
            .field("recursive", &self.recursive)
            .field("prune_empty_dirs", &self.prune_empty_dirs)
            .finish_non_exhaustive()
    }
}

impl ReconcileScope {
    /// Only direct children of `root`; directories are never removed.
    pub fn direct(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: false,
            prune_empty_dirs: false,
            claim: Box::new(|_| true),
        }
    }

    /// The whole tree under `root`; directories emptied by a deletion are pruned.
    pub fn recursive(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            prune_empty_dirs: true,
            claim: Box::new(|_| true),
        }
    }

    /// Claim only files whose name ends with one of `suffixes`.
    pub fn with_suffixes(self, suffixes: &[&str]) -> Self {
        let suffixes: Vec<String> = suffixes.iter().map(|s| s.to_string()).collect();
        self.claiming(move |path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            suffixes.iter().any(|s| name.ends_with(s.as_str()))
        })
    }

    /// Claim only files for which `claim` returns true.
    pub fn claiming<F>(mut self, claim: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.claim = Box::new(claim);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let files = if self.recursive {
            paths::walk_files(&self.root)
        } else {
            paths::list_files(&self.root)
        };
        files.into_iter().filter(|p| (self.claim)(p)).collect()
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orphans that were deleted
    pub deleted: Vec<PathBuf>,
    /// Directories that became empty and were removed
    pub removed_dirs: Vec<PathBuf>,
    /// Orphans that could not be deleted, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.deleted.is_empty() && self.removed_dirs.is_empty() && self.failed.is_empty()
    }
}

/// Files under the scope that are claimed but not expected.
pub fn find_orphans(scope: &ReconcileScope, expected: &ExpectedOutputs) -> Vec<PathBuf> {
    scope
        .candidates()
        .into_iter()
        .filter(|path| !expected.contains(path))
        .collect()
}

/// Delete every orphan under the scope.
///
/// Deletion failures are recorded in the report and logged; they never abort
/// the pass.
pub fn reconcile(scope: &ReconcileScope, expected: &ExpectedOutputs) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for orphan in find_orphans(scope, expected) {
        match paths::remove_file_if_exists(&orphan) {
            Ok(true) => {
                tracing::info!(path = %orphan.display(), "deleted orphaned output");
                if scope.prune_empty_dirs {
                    if let Some(parent) = orphan.parent() {
                        report
                            .removed_dirs
                            .extend(paths::remove_empty_dirs_up(parent, &scope.root));
                    }
                }
                report.deleted.push(orphan);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(path = %orphan.display(), error = %e, "failed to delete orphan");
                report.failed.push((orphan, e.to_string()));
            }
        }
    }

    report
}
