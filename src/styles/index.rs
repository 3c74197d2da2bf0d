//! Stylesheet index generation
//!
//! An index file aggregates every stylesheet under its target directories
//! with one `@use` or `@forward` line per file, so adding a partial never
//! requires editing an import list by hand. For each target dir, in order:
//!
//! ```scss
//! /***********************************************************
//! /*  helpers
//! ************************************************************/
//! @use './helpers/_clearfix.scss';
//! @use './helpers/_visually-hidden.scss';
//!
//! ```
//!
//! A target dir that has its own `index.scss` is referenced once as a
//! directory instead. The file is only rewritten when its content changes.

use std::path::{Path, PathBuf};

use crate::classify::INDEX_FILE_NAME;
use crate::config::IndexSpec;
use crate::paths;
use crate::report::BuildReport;

use super::STYLE_EXTENSION;

const BANNER_RULE: &str = "/***********************************************************";
const BANNER_CLOSE: &str = "************************************************************/";

/// Result of writing one index file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Written,
    Unchanged,
}

/// Content of `spec`'s index file for the current tree.
pub fn render_index(spec: &IndexSpec) -> String {
    let directive = spec.import.directive();
    let output_dir = spec
        .output
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut content = String::new();
    for target in &spec.target_dirs {
        let dir_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        content.push_str(BANNER_RULE);
        content.push('\n');
        content.push_str(&format!("/*  {}\n", dir_name));
        content.push_str(BANNER_CLOSE);
        content.push('\n');

        if target.join(INDEX_FILE_NAME).is_file() {
            let reference = paths::relative_reference(&output_dir, target);
            content.push_str(&format!("{} './{}';\n\n", directive, reference));
            continue;
        }

        let members = collect_members(target);
        for member in &members {
            let reference = paths::relative_reference(&output_dir, member);
            content.push_str(&format!("{} './{}';\n", directive, reference));
        }
        if !members.is_empty() {
            content.push('\n');
        }
    }
    content
}

/// Every stylesheet below `dir` except index files, sorted by relative path.
fn collect_members(dir: &Path) -> Vec<PathBuf> {
    let mut members: Vec<PathBuf> = paths::walk_files(dir)
        .into_iter()
        .filter(|p| paths::extension(p).as_deref() == Some(STYLE_EXTENSION))
        .filter(|p| p.file_name().is_some_and(|n| n != INDEX_FILE_NAME))
        .collect();
    members.sort_by_key(|p| paths::relative_key(p, dir));
    members
}

/// Write `spec`'s index file if its content changed.
pub fn generate(spec: &IndexSpec) -> std::io::Result<IndexOutcome> {
    let content = render_index(spec);
    if let Ok(existing) = std::fs::read_to_string(&spec.output) {
        if existing == content {
            return Ok(IndexOutcome::Unchanged);
        }
    }
    paths::atomic_write(&spec.output, content.as_bytes())?;
    Ok(IndexOutcome::Written)
}

/// Regenerate every index file.
pub fn generate_all(specs: &[IndexSpec]) -> BuildReport {
    let mut report = BuildReport::new();
    for spec in specs {
        match generate(spec) {
            Ok(IndexOutcome::Written) => {
                tracing::info!(path = %spec.output.display(), "regenerated stylesheet index");
                report.written.push(spec.output.clone());
            }
            Ok(IndexOutcome::Unchanged) => report.skipped.push(spec.output.clone()),
            Err(e) => report.fail(&spec.output, "index", e),
        }
    }
    report
}
