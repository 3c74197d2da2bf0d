//! Recording toolchain for integration tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use kiln::tools::{BundleJob, Bundler, FormatJob, ImageTranscoder, Linter, StyleCompiler};
use kiln::ToolError;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Bundle(BundleJob),
    Downlevel(PathBuf),
    Minify(PathBuf),
    Compile(PathBuf),
    PostProcess(PathBuf),
    Transcode(PathBuf, FormatJob),
    Lint(PathBuf),
}

#[derive(Debug, Default)]
pub struct RecordingTools {
    calls: Mutex<Vec<ToolCall>>,
    failing: Mutex<HashSet<PathBuf>>,
    delay: Mutex<Duration>,
    in_flight: Mutex<HashMap<PathBuf, usize>>,
    peak: Mutex<usize>,
}

impl RecordingTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        self.failing.lock().insert(path.into());
    }

    /// Slow down every compile, post-process and transcode.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Highest number of tool runs seen working on one file at once.
    pub fn peak_runs_per_file(&self) -> usize {
        *self.peak.lock()
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Entry names of every bundler invocation, in call order.
    pub fn bundled_names(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ToolCall::Bundle(job) => Some(job.entries.into_iter().map(|e| e.name).collect()),
                _ => None,
            })
            .collect()
    }

    pub fn compiled(&self) -> Vec<PathBuf> {
        let mut compiled: Vec<PathBuf> = self
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ToolCall::Compile(input) => Some(input),
                _ => None,
            })
            .collect();
        compiled.sort();
        compiled
    }

    pub fn transcode_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ToolCall::Transcode(..)))
            .count()
    }

    fn record(&self, call: ToolCall) {
        self.calls.lock().push(call);
    }

    async fn work_on(&self, file: &Path) {
        {
            let mut in_flight = self.in_flight.lock();
            let runs = in_flight.entry(file.to_path_buf()).or_insert(0);
            *runs += 1;
            let mut peak = self.peak.lock();
            *peak = (*peak).max(*runs);
        }
        let delay = *self.delay.lock();
        tokio::time::sleep(delay).await;
        if let Some(runs) = self.in_flight.lock().get_mut(file) {
            *runs -= 1;
        }
    }

    fn check(&self, program: &str, path: &Path) -> Result<(), ToolError> {
        if self.failing.lock().contains(path) {
            return Err(ToolError::Failed {
                program: program.to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("{} rejected {}", program, path.display()),
            });
        }
        Ok(())
    }
}

fn write(path: &Path, content: &str) -> Result<(), ToolError> {
    let io = |e: std::io::Error| ToolError::Spawn {
        program: "recording".to_string(),
        message: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    std::fs::write(path, content).map_err(io)
}

#[async_trait]
impl Bundler for RecordingTools {
    async fn bundle(&self, job: &BundleJob) -> Result<(), ToolError> {
        self.record(ToolCall::Bundle(job.clone()));
        for entry in &job.entries {
            self.check("esbuild", &entry.path)?;
            write(&job.out_dir.join(format!("{}.js", entry.name)), "bundle")?;
        }
        if job.splitting {
            write(&job.out_dir.join("chunk-7QX2.js"), "chunk")?;
        }
        Ok(())
    }

    async fn downlevel(&self, file: &Path) -> Result<(), ToolError> {
        self.record(ToolCall::Downlevel(file.to_path_buf()));
        self.check("babel", file)
    }

    async fn minify(&self, file: &Path) -> Result<(), ToolError> {
        self.record(ToolCall::Minify(file.to_path_buf()));
        self.check("terser", file)
    }
}

#[async_trait]
impl StyleCompiler for RecordingTools {
    async fn compile(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        self.record(ToolCall::Compile(input.to_path_buf()));
        self.work_on(output).await;
        self.check("sass", input)?;
        write(output, "css")?;
        let mut map = output.as_os_str().to_owned();
        map.push(".map");
        write(Path::new(&map), "{}")
    }

    async fn post_process(&self, css: &Path) -> Result<(), ToolError> {
        self.record(ToolCall::PostProcess(css.to_path_buf()));
        self.work_on(css).await;
        self.check("postcss", css)
    }
}

#[async_trait]
impl ImageTranscoder for RecordingTools {
    async fn transcode(&self, input: &Path, output: &Path, job: &FormatJob) -> Result<(), ToolError> {
        self.record(ToolCall::Transcode(input.to_path_buf(), *job));
        self.work_on(input).await;
        self.check("magick", input)?;
        write(output, job.label())
    }
}

#[async_trait]
impl Linter for RecordingTools {
    async fn lint(&self, root: &Path) -> Result<(), ToolError> {
        self.record(ToolCall::Lint(root.to_path_buf()));
        self.check("eslint", root)
    }
}
