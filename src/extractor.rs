//! Narrow interface over the media extractor and its yt-dlp implementation.
//!
//! Everything here is blocking. Callers are expected to move invocations onto
//! the blocking pool (see [`crate::service::VideoService`]).

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Post-processing steps the extractor runs after fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessor {
    /// Re-encode to an audio-only container.
    ExtractAudio { codec: String, quality_kbps: u32 },
}

/// Options for a single extractor invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub skip_download: bool,
    pub format: Option<String>,
    /// Output template, e.g. `/root/abc_1/My-Title.%(ext)s`.
    pub output_template: Option<String>,
    pub postprocessors: Vec<PostProcessor>,
    pub cookie_file: Option<PathBuf>,
}

impl ExtractorOptions {
    pub fn metadata_only(cookie_file: Option<PathBuf>) -> Self {
        Self {
            skip_download: true,
            cookie_file,
            ..Self::default()
        }
    }
}

pub trait Extractor: Send + Sync {
    /// Resolves metadata without fetching media bytes.
    fn fetch_metadata(&self, url: &str, options: &ExtractorOptions) -> Result<Value>;

    /// Fetches (and post-processes) the media, returning the info record.
    fn fetch_and_write(&self, url: &str, options: &ExtractorOptions) -> Result<Value>;
}

/// Drives the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn build_command(&self, url: &str, options: &ExtractorOptions) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--dump-single-json")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-playlist");

        if options.skip_download {
            command.arg("--skip-download");
        } else {
            // --dump-single-json implies simulate; undo that so files get written.
            command.arg("--no-simulate");
        }

        if let Some(format) = &options.format {
            command.arg("--format").arg(format);
        }
        if let Some(template) = &options.output_template {
            command.arg("--output").arg(template);
        }
        for processor in &options.postprocessors {
            match processor {
                PostProcessor::ExtractAudio {
                    codec,
                    quality_kbps,
                } => {
                    command
                        .arg("--extract-audio")
                        .arg("--audio-format")
                        .arg(codec)
                        .arg("--audio-quality")
                        .arg(format!("{quality_kbps}K"));
                }
            }
        }
        if let Some(cookies) = &options.cookie_file {
            command.arg("--cookies").arg(cookies);
        }

        command.arg("--").arg(url);
        command
    }

    fn run(&self, url: &str, options: &ExtractorOptions) -> Result<Value> {
        let mut command = self.build_command(url, options);
        debug!("running {:?}", command);

        let output = command
            .output()
            .with_context(|| format!("spawning {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {} for {}: {}",
                self.program.display(),
                output.status,
                url,
                stderr_tail(&stderr)
            );
        }

        let info: Value =
            serde_json::from_slice(&output.stdout).context("deserializing yt-dlp JSON output")?;
        if info.is_null() {
            bail!("yt-dlp returned no information for {url}");
        }
        Ok(info)
    }
}

impl Extractor for YtDlp {
    fn fetch_metadata(&self, url: &str, options: &ExtractorOptions) -> Result<Value> {
        let options = ExtractorOptions {
            skip_download: true,
            ..options.clone()
        };
        self.run(url, &options)
    }

    fn fetch_and_write(&self, url: &str, options: &ExtractorOptions) -> Result<Value> {
        let options = ExtractorOptions {
            skip_download: false,
            ..options.clone()
        };
        self.run(url, &options)
    }
}

/// Last few non-empty stderr lines; yt-dlp puts the actual reason at the end.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(3);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "no error output".to_string()
    } else {
        tail
    }
}
