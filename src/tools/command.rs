//! Subprocess-backed tools

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{BundleJob, Bundler, FormatJob, ImageTranscoder, Linter, Resize, StyleCompiler};
use crate::config::ToolsConfig;
use crate::error::ToolError;

/// A configured command: program plus leading arguments (`npx sass`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Split on whitespace. Quoting is not supported.
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
        }
    }

    /// Name used in logs and errors
    pub fn display_name(&self) -> String {
        match self.args.last() {
            Some(last) if self.program == "npx" => last.clone(),
            _ => self.program.clone(),
        }
    }
}

/// Runs every tool as a child process
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    esbuild: CommandLine,
    babel: CommandLine,
    terser: CommandLine,
    sass: CommandLine,
    postcss: CommandLine,
    magick: CommandLine,
    eslint: CommandLine,
    timeout: Option<Duration>,
}

impl CommandToolchain {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            esbuild: CommandLine::parse(&tools.esbuild),
            babel: CommandLine::parse(&tools.babel),
            terser: CommandLine::parse(&tools.terser),
            sass: CommandLine::parse(&tools.sass),
            postcss: CommandLine::parse(&tools.postcss),
            magick: CommandLine::parse(&tools.magick),
            eslint: CommandLine::parse(&tools.eslint),
            timeout: tools.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, line: &CommandLine, args: Vec<OsString>) -> Result<(), ToolError> {
        let name = line.display_name();
        if line.program.is_empty() {
            return Err(ToolError::Spawn {
                program: name,
                message: "no command configured".to_string(),
            });
        }

        let mut cmd = Command::new(&line.program);
        cmd.args(&line.args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %name, args = ?args, "running tool");

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        program: name,
                        secs: limit.as_secs(),
                    })
                }
            },
            None => cmd.output().await,
        }
        .map_err(|e| ToolError::Spawn {
            program: name.clone(),
            message: e.to_string(),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            stderr = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        Err(ToolError::Failed {
            program: name,
            status: output.status.to_string(),
            stderr,
        })
    }
}

fn os(s: impl Into<OsString>) -> OsString {
    s.into()
}

fn ensure_parent(path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ToolError::Spawn {
            program: "mkdir".to_string(),
            message: format!("{}: {}", parent.display(), e),
        })?;
    }
    Ok(())
}

#[async_trait]
impl Bundler for CommandToolchain {
    async fn bundle(&self, job: &BundleJob) -> Result<(), ToolError> {
        std::fs::create_dir_all(&job.out_dir).map_err(|e| ToolError::Spawn {
            program: "mkdir".to_string(),
            message: format!("{}: {}", job.out_dir.display(), e),
        })?;

        let mut args: Vec<OsString> = Vec::new();
        for entry in &job.entries {
            let mut arg = OsString::from(format!("{}=", entry.name));
            arg.push(&entry.path);
            args.push(arg);
        }
        args.push(os("--bundle"));
        let mut outdir = OsString::from("--outdir=");
        outdir.push(&job.out_dir);
        args.push(outdir);
        args.push(os("--target=es2020"));
        args.push(os("--legal-comments=none"));
        args.push(os("--loader:.css=empty"));
        if job.splitting {
            args.push(os("--splitting"));
            args.push(os("--format=esm"));
        } else {
            args.push(os("--format=iife"));
        }

        self.run(&self.esbuild, args).await
    }

    async fn downlevel(&self, file: &Path) -> Result<(), ToolError> {
        let args = vec![
            os(file),
            os("--presets=@babel/preset-env"),
            os("--out-file"),
            os(file),
        ];
        self.run(&self.babel, args).await
    }

    async fn minify(&self, file: &Path) -> Result<(), ToolError> {
        let args = vec![
            os(file),
            os("--compress"),
            os("--mangle"),
            os("--comments"),
            os("false"),
            os("--output"),
            os(file),
        ];
        self.run(&self.terser, args).await
    }
}

#[async_trait]
impl StyleCompiler for CommandToolchain {
    async fn compile(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        ensure_parent(output)?;
        let mut pair = OsString::from(input);
        pair.push(":");
        pair.push(output);
        self.run(&self.sass, vec![os("--source-map"), pair]).await
    }

    async fn post_process(&self, css: &Path) -> Result<(), ToolError> {
        let args = vec![os(css), os("--map"), os("--replace")];
        self.run(&self.postcss, args).await
    }
}

#[async_trait]
impl ImageTranscoder for CommandToolchain {
    async fn transcode(&self, input: &Path, output: &Path, job: &FormatJob) -> Result<(), ToolError> {
        ensure_parent(output)?;

        let mut args = vec![os(input)];
        match *job {
            FormatJob::Avif { quality, effort } => {
                args.push(os("-quality"));
                args.push(os(quality.to_string()));
                // heic speed runs the opposite way to effort
                args.push(os("-define"));
                args.push(os(format!("heic:speed={}", 9u8.saturating_sub(effort))));
            }
            FormatJob::Webp { quality } => {
                args.push(os("-quality"));
                args.push(os(quality.to_string()));
            }
            FormatJob::Compressed { resize, quality } => {
                args.push(os("-resize"));
                args.push(os(match resize {
                    Resize::MaxWidth(width) => format!("{}x>", width),
                    Resize::Scale(scale) => format!("{}%", scale * 100.0),
                }));
                if let Some(quality) = quality {
                    args.push(os("-quality"));
                    args.push(os(quality.to_string()));
                }
            }
        }
        args.push(os(output));

        self.run(&self.magick, args).await
    }
}

#[async_trait]
impl Linter for CommandToolchain {
    async fn lint(&self, root: &Path) -> Result<(), ToolError> {
        let mut pattern = OsString::from(root);
        pattern.push("/**/*.js");
        self.run(&self.eslint, vec![pattern]).await
    }
}
