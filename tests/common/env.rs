//! Isolated project trees and CLI execution.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use kiln::{Config, Pipeline, Toolchain};
use tempfile::TempDir;

use super::tools::RecordingTools;

/// Result of running the kiln binary
#[derive(Debug)]
pub struct TestResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TestResult {
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// A project root with the default layout under a temp directory
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    /// Empty project with the default script and stylesheet roots in place.
    pub fn new() -> Self {
        let project = Self::bare();
        for dir in ["htdocs/src/js/entry", "htdocs/src/scss"] {
            fs::create_dir_all(project.path(dir)).unwrap();
        }
        project
    }

    /// Empty temp directory without any source roots.
    pub fn bare() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Write a file, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn remove(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        fs::remove_file(&path).unwrap();
        path
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).unwrap()
    }

    /// Every file under `relative`, as sorted paths relative to it.
    pub fn files_under(&self, relative: &str) -> Vec<String> {
        let base = self.path(relative);
        let mut files: Vec<String> = kiln::paths::walk_files(&base)
            .iter()
            .filter_map(|p| kiln::paths::relative_key(p, &base))
            .collect();
        files.sort();
        files
    }

    /// Default configuration rooted here, with short debounce windows.
    pub fn config(&self) -> Config {
        let mut config = Config::default().rooted(self.root.path());
        config.watch.debounce_ms = 25;
        config.watch.image_debounce_ms = 25;
        config.watch.postprocess_debounce_ms = 25;
        config.watch.lint_debounce_ms = 25;
        config.watch.stable_poll_ms = 5;
        config
    }

    pub async fn pipeline(&self, tools: &Arc<RecordingTools>) -> Pipeline {
        self.pipeline_with(self.config(), tools).await
    }

    pub async fn pipeline_with(&self, config: Config, tools: &Arc<RecordingTools>) -> Pipeline {
        Pipeline::new(config, Toolchain::uniform(Arc::clone(tools)))
            .await
            .unwrap()
    }

    pub fn run_kiln(&self, args: &[&str]) -> TestResult {
        run_kiln_in(self.root.path(), args)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

pub fn run_kiln_in(dir: &Path, args: &[&str]) -> TestResult {
    let bin = env!("CARGO_BIN_EXE_kiln");
    let output = Command::new(bin)
        .current_dir(dir)
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("KILN_SCRIPTS_MODE")
        .env_remove("KILN_DEBOUNCE_MS")
        .env_remove("KILN_PRESERVE_STRUCTURE")
        .output()
        .unwrap();

    TestResult {
        success: output.status.success(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}
