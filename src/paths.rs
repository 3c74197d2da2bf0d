//! Path helpers shared by every pipeline stage
//!
//! - directory containment checks on lexical paths
//! - manifest keys (forward-slash relative paths)
//! - recursive file listing with hidden files skipped
//! - atomic writes (tempfile + rename)
//! - empty directory pruning

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use tempfile::NamedTempFile;

/// Whether `path` is `dir` itself or lies beneath it.
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

/// Whether `path` is a direct child of `dir`.
pub fn is_direct_child(path: &Path, dir: &Path) -> bool {
    path.parent() == Some(dir)
}

/// Whether any component below `root` starts with a dot.
pub fn is_hidden(path: &Path, root: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Lowercased extension, if any.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|e| e.to_ascii_lowercase())
}

/// File name without extension as an owned string.
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Relative path of `path` under `root`, using `/` separators.
///
/// Used as the manifest key so the manifest is portable between platforms.
pub fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Path from `from_dir` to `to`, with `..` segments where needed, joined by `/`.
///
/// Both paths must share a prefix (they always live under the project root).
pub fn relative_reference(from_dir: &Path, to: &Path) -> String {
    let from: Vec<Component> = from_dir.components().collect();
    let target: Vec<Component> = to.components().collect();

    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for c in &target[common..] {
        parts.push(c.as_os_str().to_string_lossy().into_owned());
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Every regular file under `root`, recursively, sorted. Hidden entries are skipped.
///
/// Ignore files are not consulted: generated output is usually gitignored
/// and still has to be visible to reconciliation.
pub fn walk_files(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(true)
        .follow_links(false)
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Direct file children of `dir`, sorted. Hidden entries are skipped.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| !is_hidden(path, dir))
        .collect();
    files.sort();
    files
}

/// Write content to a file atomically, creating parent directories.
///
/// Content goes to a temp file in the same directory, which is then renamed
/// over the target so readers never observe a partial file.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Remove `path` if it exists. Returns whether a file was deleted.
pub fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove `dir` and its ancestors while they are empty, stopping at `stop_at`.
///
/// `stop_at` itself is never removed. Returns the directories removed.
pub fn remove_empty_dirs_up(dir: &Path, stop_at: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    let mut current = Some(dir);

    while let Some(d) = current {
        if d == stop_at || !is_within(d, stop_at) {
            break;
        }
        if std::fs::remove_dir(d).is_err() {
            // non-empty or already gone
            break;
        }
        removed.push(d.to_path_buf());
        current = d.parent();
    }

    removed
}
