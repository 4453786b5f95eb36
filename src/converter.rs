use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context as _;

use crate::process::run_captured;

/// One conversion-tool run.
#[derive(Debug, Clone, Copy)]
pub struct ConvertRequest<'a> {
    /// A work URL, or the path of an existing document to update in place.
    pub target: &'a str,
    /// Directory the produced document is written to.
    pub work_dir: &'a Path,
    pub force: bool,
    pub want_metadata: bool,
}

/// Downloads or updates one work into a local document.
///
/// Returns whatever the tool printed. A non-zero exit status is not an error here: the
/// text carries the diagnosis and is classified by the caller.
pub trait Converter: Send + Sync {
    fn run(&self, request: &ConvertRequest<'_>) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct FanFicFare {
    bin: String,
    config: Option<PathBuf>,
}

impl FanFicFare {
    pub fn new(bin: impl Into<String>, config: Option<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            config,
        }
    }

    fn command(&self, request: &ConvertRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.current_dir(request.work_dir);
        if let Some(config) = self.config.as_deref() {
            cmd.arg(format!("--config={}", config.display()));
        }
        cmd.args(["--update-epub", "--update-cover"]);
        if request.want_metadata {
            cmd.arg("--json-meta");
        }
        if request.force {
            cmd.arg("--force");
        }
        cmd.arg(request.target);
        cmd
    }
}

impl Converter for FanFicFare {
    fn run(&self, request: &ConvertRequest<'_>) -> anyhow::Result<String> {
        tracing::debug!(
            bin = %self.bin,
            input = request.target,
            force = request.force,
            "fanficfare"
        );

        let captured = run_captured(&mut self.command(request))
            .with_context(|| format!("run fanficfare for {}", request.target))?;
        if !captured.success() {
            tracing::debug!(status = %captured.status, "fanficfare exited with failure");
        }
        Ok(captured.text)
    }
}
