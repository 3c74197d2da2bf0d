//! Build outcomes
//!
//! Failures of individual files are collected here instead of aborting the
//! run, so one bad stylesheet or image never stops its siblings.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::reconcile::ReconcileReport;

/// Pipeline phase a report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Scripts,
    Index,
    Styles,
    Images,
    Lint,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Scripts => "scripts",
            Phase::Index => "index",
            Phase::Styles => "styles",
            Phase::Images => "images",
            Phase::Lint => "lint",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One file that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub path: PathBuf,
    /// Tool or step that failed (`bundle`, `minify`, `avif`, ...)
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub failures: Vec<Failure>,
}

impl BuildReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Record and log a failure.
    pub fn fail(&mut self, path: &Path, stage: &str, error: impl fmt::Display) {
        let message = error.to_string();
        tracing::error!(path = %path.display(), stage, error = %message, "failed");
        self.failures.push(Failure {
            path: path.to_path_buf(),
            stage: stage.to_string(),
            message,
        });
    }

    pub fn absorb_reconcile(&mut self, reconcile: ReconcileReport) {
        self.deleted.extend(reconcile.deleted);
        for (path, message) in reconcile.failed {
            self.failures.push(Failure {
                path,
                stage: "delete".to_string(),
                message,
            });
        }
    }

    pub fn merge(&mut self, other: BuildReport) {
        self.written.extend(other.written);
        self.skipped.extend(other.skipped);
        self.deleted.extend(other.deleted);
        self.failures.extend(other.failures);
    }
}

/// Reports of a one-shot build, per phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub phases: Vec<PhaseReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    #[serde(flatten)]
    pub report: BuildReport,
}

impl Summary {
    pub fn push(&mut self, phase: Phase, report: BuildReport) {
        self.phases.push(PhaseReport { phase, report });
    }

    pub fn is_success(&self) -> bool {
        self.phases.iter().all(|p| p.report.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = (Phase, &Failure)> {
        self.phases
            .iter()
            .flat_map(|p| p.report.failures.iter().map(move |f| (p.phase, f)))
    }
}
