use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::converter::{ConvertRequest, Converter};
use crate::outcome::{Disposition, FetchOutcome, Metadata, classify};
use crate::work_url::WorkUrl;

pub const DOCUMENT_EXTENSION: &str = "epub";

/// A successfully produced document.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub document: PathBuf,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("{0}")]
    Outcome(FetchOutcome),

    #[error("expected a metadata object from the conversion tool, got: {0}")]
    UnexpectedOutput(String),

    #[error("the conversion tool reported success but no document is in {}", .0.display())]
    NoDocument(PathBuf),

    #[error(transparent)]
    Tool(#[from] anyhow::Error),
}

impl UpdateError {
    pub fn disposition(&self) -> Disposition {
        match self {
            UpdateError::Outcome(outcome) => outcome.disposition(),
            _ => Disposition::Permanent,
        }
    }
}

/// Runs the conversion tool for one work, at most twice.
///
/// The second, forced attempt happens when the tool skipped because the local file looks
/// newer than the story (always the case for a freshly exported copy), or when the story
/// is up to date and `force` was asked for.
pub struct UpdateExecutor<'a> {
    converter: &'a dyn Converter,
    force: bool,
    want_metadata: bool,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(converter: &'a dyn Converter, force: bool, want_metadata: bool) -> Self {
        Self {
            converter,
            force,
            want_metadata,
        }
    }

    pub fn update(
        &self,
        work: &WorkUrl,
        existing: Option<&Path>,
        work_dir: &Path,
    ) -> Result<Update, UpdateError> {
        let target = match existing {
            Some(path) => path.to_string_lossy().into_owned(),
            None => work.as_str().to_owned(),
        };

        let outcome = self.attempt(&target, work_dir, false)?;
        let outcome = match outcome {
            FetchOutcome::Success { metadata } => return self.finish(metadata, work_dir),
            FetchOutcome::LocalCopyNewer { message } => {
                tracing::warn!(url = %work, %message, "forcing update");
                self.attempt(&target, work_dir, true)?
            }
            FetchOutcome::StoryUpToDate { message } if self.force => {
                tracing::warn!(url = %work, %message, "forcing update");
                self.attempt(&target, work_dir, true)?
            }
            other => return Err(UpdateError::Outcome(other)),
        };

        match outcome {
            FetchOutcome::Success { metadata } => self.finish(metadata, work_dir),
            other => Err(UpdateError::Outcome(other)),
        }
    }

    fn attempt(
        &self,
        target: &str,
        work_dir: &Path,
        force: bool,
    ) -> Result<FetchOutcome, UpdateError> {
        let output = self.converter.run(&ConvertRequest {
            target,
            work_dir,
            force,
            want_metadata: self.want_metadata,
        })?;
        let outcome = classify(&output);
        tracing::debug!(input = target, force, outcome = %outcome, "conversion attempt");
        Ok(outcome)
    }

    fn finish(&self, metadata: Option<Metadata>, work_dir: &Path) -> Result<Update, UpdateError> {
        if self.want_metadata && metadata.is_none() {
            return Err(UpdateError::UnexpectedOutput(
                "no metadata object in output".to_owned(),
            ));
        }
        let document = newest_document(work_dir)?
            .ok_or_else(|| UpdateError::NoDocument(work_dir.to_path_buf()))?;
        Ok(Update { document, metadata })
    }
}

/// The most recently modified document in `dir`, if any.
pub fn newest_document(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).with_context(|| format!("read dir: {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry: {}", dir.display()))?;
        let path = entry.path();
        let is_document = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION));
        if !is_document || !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .with_context(|| format!("stat {}", path.display()))?;
        if newest.as_ref().is_none_or(|(time, _)| modified >= *time) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
