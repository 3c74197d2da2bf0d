//! Watch event types

use std::path::PathBuf;

use notify::event::{EventKind, ModifyKind};

use crate::classify::ChangeKind;
use crate::report::Summary;

/// One discrete change to a source path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Translate a raw notification into change events, one per path.
///
/// Renames are reported per side, so each path is classified by whether it
/// exists now. A path that is gone by the time the event is read counts as
/// removed whatever the notification said.
pub fn change_events(event: &notify::Event) -> Vec<ChangeEvent> {
    let reported = match event.kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(_) | EventKind::Any => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .map(|path| {
            let exists = path.exists();
            let kind = match reported {
                _ if !exists => ChangeKind::Removed,
                Some(ChangeKind::Removed) => ChangeKind::Modified,
                Some(kind) => kind,
                None => ChangeKind::Added,
            };
            ChangeEvent::new(path.clone(), kind)
        })
        .collect()
}

fn kind_label(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Added => "added",
        ChangeKind::Modified => "modified",
        ChangeKind::Removed => "removed",
    }
}

/// Watch event types for NDJSON output
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    WatchStarted {
        roots: Vec<String>,
    },
    InitialBuild {
        written: usize,
        deleted: usize,
        failures: usize,
    },
    /// Every root is registered; changes from here on are picked up
    Ready,
    FileChanged {
        path: String,
        kind: &'static str,
    },
    Error {
        message: String,
    },
    Shutdown,
}

impl WatchEvent {
    pub fn file_changed(change: &ChangeEvent) -> Self {
        WatchEvent::FileChanged {
            path: change.path.display().to_string(),
            kind: kind_label(change.kind),
        }
    }

    pub fn initial_build(summary: &Summary) -> Self {
        let (written, deleted) = summary.phases.iter().fold((0, 0), |(w, d), p| {
            (w + p.report.written.len(), d + p.report.deleted.len())
        });
        WatchEvent::InitialBuild {
            written,
            deleted,
            failures: summary.failures().count(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
