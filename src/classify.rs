//! Dependency classification
//!
//! Maps a changed source path to the smallest set of build targets it
//! affects. Classification looks only at where a file sits relative to the
//! configured directories, never at its content. The only filesystem access
//! is the existence check for a named dependency's sibling entry.

use std::path::{Path, PathBuf};

use crate::config::{BuildMode, Config, IndexSpec, PartialChangePolicy};
use crate::paths;
use crate::scripts::{EntryPoint, SCRIPT_EXTENSION};
use crate::styles::STYLE_EXTENSION;

/// Extensions the image pipeline converts
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// File name that marks a stylesheet directory as self-indexed
pub const INDEX_FILE_NAME: &str = "index.scss";

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    /// Whether the set of files changed (as opposed to a file's content)
    pub fn alters_tree(self) -> bool {
        matches!(self, ChangeKind::Added | ChangeKind::Removed)
    }
}

/// Role of a script inside the source tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptRole {
    /// Bundled on its own
    Entry,
    /// Belongs to the entry with the same file name
    NamedDependency,
    /// Shared by every entry
    Dependency,
    /// Not tracked
    Other,
}

/// Role of a stylesheet inside the source tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleRole {
    /// `_name.scss`, only ever included
    Partial,
    /// `index.scss`, aggregates its directory
    Index,
    /// Compiled to its own CSS file
    Leaf,
}

/// Kind of a source file, carrying its role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Script(ScriptRole),
    Stylesheet(StyleRole),
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub kind: SourceKind,
}

/// Build targets affected by one change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Impact<T> {
    /// Nothing to do
    None,
    /// Rebuild exactly these targets
    Entries(Vec<T>),
    /// Rebuild every target of the pipeline
    FullRebuild,
    /// Nothing to build, but outputs may now be orphaned
    ReconcileOnly,
}

impl<T> Impact<T> {
    pub fn is_none(&self) -> bool {
        matches!(self, Impact::None)
    }
}

/// Identify a path's kind and role, or `None` if no pipeline tracks it.
pub fn source_file(config: &Config, path: &Path) -> Option<SourceFile> {
    let ext = paths::extension(path)?;

    let scripts = &config.scripts;
    if scripts.enabled
        && ext == SCRIPT_EXTENSION
        && paths::is_within(path, &scripts.src_dir)
        && !paths::is_hidden(path, &scripts.src_dir)
    {
        return Some(SourceFile {
            path: path.to_path_buf(),
            kind: SourceKind::Script(script_role(config, path)),
        });
    }

    let styles = &config.styles;
    if styles.enabled
        && ext == STYLE_EXTENSION
        && paths::is_within(path, &styles.src_dir)
        && !paths::is_hidden(path, &styles.src_dir)
    {
        return Some(SourceFile {
            path: path.to_path_buf(),
            kind: SourceKind::Stylesheet(style_role(path)),
        });
    }

    let origin = config.images.origin_root();
    if config.images.enabled
        && IMAGE_EXTENSIONS.contains(&ext.as_str())
        && paths::is_within(path, &origin)
        && !paths::is_hidden(path, &origin)
    {
        return Some(SourceFile {
            path: path.to_path_buf(),
            kind: SourceKind::Image,
        });
    }

    None
}

/// Role of a script path under the current build mode.
pub fn script_role(config: &Config, path: &Path) -> ScriptRole {
    let scripts = &config.scripts;
    let under_any = |dirs: &[PathBuf]| dirs.iter().any(|d| paths::is_within(path, d));

    match scripts.mode {
        BuildMode::Dynamic => {
            if scripts.dynamic_entry.as_deref() == Some(path) {
                ScriptRole::Entry
            } else if under_any(&scripts.dynamic_dependency_dirs) {
                ScriptRole::Dependency
            } else {
                ScriptRole::Other
            }
        }
        BuildMode::Entry => {
            if scripts
                .entry_dirs
                .iter()
                .any(|d| paths::is_direct_child(path, d))
            {
                ScriptRole::Entry
            } else if under_any(&scripts.named_dependency_dirs) {
                ScriptRole::NamedDependency
            } else if under_any(&scripts.dependency_dirs) {
                ScriptRole::Dependency
            } else {
                ScriptRole::Other
            }
        }
    }
}

/// Role of a stylesheet, from its file name alone.
pub fn style_role(path: &Path) -> StyleRole {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name == INDEX_FILE_NAME {
        StyleRole::Index
    } else if name.starts_with('_') {
        StyleRole::Partial
    } else {
        StyleRole::Leaf
    }
}

/// Which script bundles a change affects.
pub fn classify_script(config: &Config, path: &Path, change: ChangeKind) -> Impact<EntryPoint> {
    let role = match source_file(config, path) {
        Some(SourceFile {
            kind: SourceKind::Script(role),
            ..
        }) => role,
        _ => return Impact::None,
    };

    if config.scripts.mode == BuildMode::Dynamic {
        return match role {
            ScriptRole::Entry | ScriptRole::Dependency => Impact::FullRebuild,
            _ => Impact::None,
        };
    }

    match role {
        // a full build reconciles the output dir, which drops the stale bundle
        ScriptRole::Entry if change == ChangeKind::Removed => Impact::FullRebuild,
        ScriptRole::Entry => Impact::Entries(vec![EntryPoint::from_path(path)]),
        ScriptRole::NamedDependency => match sibling_entry(config, path) {
            Some(entry) => Impact::Entries(vec![entry]),
            None => Impact::FullRebuild,
        },
        ScriptRole::Dependency => Impact::FullRebuild,
        ScriptRole::Other => Impact::None,
    }
}

/// Entry in any entry dir with the same file name as `path`.
fn sibling_entry(config: &Config, path: &Path) -> Option<EntryPoint> {
    let file_name = path.file_name()?;
    config
        .scripts
        .entry_dirs
        .iter()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
        .map(|candidate| EntryPoint::from_path(&candidate))
}

/// Which stylesheets must be recompiled after a change.
pub fn classify_stylesheet(config: &Config, path: &Path, change: ChangeKind) -> Impact<PathBuf> {
    let role = match source_file(config, path) {
        Some(SourceFile {
            kind: SourceKind::Stylesheet(role),
            ..
        }) => role,
        _ => return Impact::None,
    };

    match role {
        StyleRole::Leaf if change == ChangeKind::Removed => Impact::ReconcileOnly,
        StyleRole::Leaf => Impact::Entries(vec![path.to_path_buf()]),
        // an index is pulled in by arbitrary leaves
        StyleRole::Index => Impact::FullRebuild,
        StyleRole::Partial => classify_partial(&config.styles.index, path),
    }
}

fn classify_partial(specs: &[IndexSpec], path: &Path) -> Impact<PathBuf> {
    let owners: Vec<&IndexSpec> = specs.iter().filter(|spec| spec.owns(path)).collect();

    let only_owning = !owners.is_empty()
        && owners
            .iter()
            .all(|spec| spec.partial_change == PartialChangePolicy::OnlyOwningIndex);
    if !only_owning {
        return Impact::FullRebuild;
    }

    let mut outputs: Vec<PathBuf> = Vec::new();
    for spec in owners {
        // an index that is not compiled on its own cannot be rebuilt alone
        if style_role(&spec.output) != StyleRole::Leaf {
            return Impact::FullRebuild;
        }
        if !outputs.contains(&spec.output) {
            outputs.push(spec.output.clone());
        }
    }
    Impact::Entries(outputs)
}

/// Whether a change concerns an origin image.
pub fn classify_image(config: &Config, path: &Path) -> Impact<PathBuf> {
    match source_file(config, path) {
        Some(SourceFile {
            kind: SourceKind::Image,
            ..
        }) => Impact::Entries(vec![path.to_path_buf()]),
        _ => Impact::None,
    }
}

/// Index specs whose generated file must be rewritten after a change.
///
/// Only additions and removals matter: the generated reference list depends
/// on which files exist, not on what they contain. Paths without an
/// extension are treated as directories.
pub fn indexes_to_regenerate(config: &Config, path: &Path, change: ChangeKind) -> Vec<usize> {
    if !config.styles.enabled || !change.alters_tree() {
        return Vec::new();
    }
    if paths::is_hidden(path, &config.styles.src_dir) {
        return Vec::new();
    }

    match paths::extension(path) {
        Some(ext) if ext == STYLE_EXTENSION => {}
        None => {}
        Some(_) => return Vec::new(),
    }

    let specs = &config.styles.index;
    if specs.iter().any(|spec| spec.output == path) {
        return Vec::new();
    }

    specs
        .iter()
        .enumerate()
        .filter(|(_, spec)| spec.owns(path))
        .map(|(i, _)| i)
        .collect()
}
