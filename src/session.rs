//! One sync run: collect work URLs, then download or update each one.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::catalog::{Catalog, CatalogError, EntryId, SerializedCatalog};
use crate::catalog_sync::CatalogSync;
use crate::collect::Collector;
use crate::config::Settings;
use crate::converter::Converter;
use crate::outcome::Disposition;
use crate::provider::UrlProvider;
use crate::retry_file;
use crate::update::{UpdateError, UpdateExecutor};
use crate::watermark::{WatermarkKey, Watermarks};
use crate::work_url::WorkUrl;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub collected: usize,
    pub synced: usize,
    pub skipped: usize,
    /// URLs written to the retry file by this run, in processing order.
    pub failed: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, thiserror::Error)]
enum WorkError {
    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkError {
    fn disposition(&self) -> Disposition {
        match self {
            WorkError::Update(err) => err.disposition(),
            _ => Disposition::Permanent,
        }
    }
}

#[derive(Debug)]
enum Synced {
    Catalog(EntryId),
    Downloaded(PathBuf),
}

pub struct Session {
    settings: Arc<Settings>,
    provider: Arc<dyn UrlProvider>,
    converter: Arc<dyn Converter>,
    catalog: Option<Arc<SerializedCatalog>>,
}

impl Session {
    /// Without a catalog, documents are only downloaded into the output directory.
    pub fn new(
        settings: Settings,
        provider: Arc<dyn UrlProvider>,
        converter: Arc<dyn Converter>,
        catalog: Option<Arc<dyn Catalog>>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            provider,
            converter,
            catalog: catalog.map(|catalog| Arc::new(SerializedCatalog::new(catalog))),
        }
    }

    /// Needs a multi-threaded runtime: collection and catalog preparation block.
    pub async fn run(&self, stdin: &mut (dyn BufRead + Send)) -> anyhow::Result<SyncReport> {
        let settings = self.settings.as_ref();
        let watermarks = Watermarks::load(&settings.last_update_file)?;

        if let Some(catalog) = self.catalog.as_deref()
            && !settings.dry_run
        {
            tokio::task::block_in_place(|| catalog.prepare()).context("prepare catalog")?;
        }

        let collected = tokio::task::block_in_place(|| {
            Collector::new(settings, self.provider.as_ref(), &watermarks).collect(stdin)
        })?;

        let mut report = SyncReport {
            collected: collected.len(),
            dry_run: settings.dry_run,
            ..SyncReport::default()
        };
        if collected.is_empty() {
            tracing::info!("no work urls found");
            return Ok(report);
        }

        tracing::info!(count = collected.len(), "urls to sync");
        for work in &collected.works {
            tracing::info!("  {work}");
        }
        for url in &collected.malformed {
            tracing::info!("  {url} (not a work url)");
        }

        if settings.dry_run {
            tracing::info!("dry run: not downloading or changing the catalog");
            return Ok(report);
        }

        for url in &collected.malformed {
            tracing::error!(url = %url, "not a recognizable work url; kept for retry");
            self.record_failure(url, &mut report);
        }

        self.sync_all(collected.works.into_iter().collect(), &mut report)
            .await?;

        let today = chrono::Local::now().date_naive();
        Watermarks::commit(&settings.last_update_file, &self.watermark_keys(), today)
            .context("update last-update file")?;

        tracing::info!(
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed.len(),
            "sync finished"
        );
        Ok(report)
    }

    async fn sync_all(&self, works: Vec<WorkUrl>, report: &mut SyncReport) -> anyhow::Result<()> {
        let mut join_set = tokio::task::JoinSet::new();
        let mut next_idx = 0usize;

        while next_idx < works.len() || !join_set.is_empty() {
            while next_idx < works.len() && join_set.len() < self.settings.workers {
                let work = works[next_idx].clone();
                let job = self.job();
                let cooldown = self.settings.cooldown;

                join_set.spawn(async move {
                    let result = {
                        let work = work.clone();
                        tokio::task::spawn_blocking(move || job.sync(&work))
                            .await
                            .map_err(|err| WorkError::Other(anyhow::anyhow!("sync task failed: {err}")))
                            .and_then(|result| result)
                    };
                    if let Err(err) = &result
                        && err.disposition() == Disposition::Transient
                    {
                        tracing::warn!(url = %work, cooldown_secs = cooldown.as_secs(), "archive is pushing back; pausing");
                        tokio::time::sleep(cooldown).await;
                    }
                    (work, result)
                });

                next_idx += 1;
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (work, result) = joined.context("join sync task")?;
            match result {
                Ok(Synced::Catalog(id)) => {
                    tracing::info!(url = %work, id = %id, "synced");
                    report.synced += 1;
                }
                Ok(Synced::Downloaded(path)) => {
                    tracing::info!(url = %work, path = %path.display(), "downloaded");
                    report.synced += 1;
                }
                Err(err) if err.disposition() == Disposition::Skip => {
                    tracing::info!(url = %work, reason = %err, "skipping");
                    report.skipped += 1;
                }
                Err(err) => {
                    tracing::error!(url = %work, error = %err, "sync failed; kept for retry");
                    self.record_failure(work.as_str(), report);
                }
            }
        }

        Ok(())
    }

    fn job(&self) -> SyncJob {
        SyncJob {
            settings: self.settings.clone(),
            converter: self.converter.clone(),
            catalog: self.catalog.clone(),
        }
    }

    fn record_failure(&self, url: &str, report: &mut SyncReport) {
        if let Err(err) = retry_file::append(&self.settings.retry_file, url) {
            tracing::error!(url, ?err, "could not save url to retry file");
        }
        report.failed.push(url.to_owned());
    }

    /// Every requested origin, plus each target of the parameterized ones. Plain URL
    /// lists get a date too even though nothing reads it back.
    fn watermark_keys(&self) -> Vec<WatermarkKey> {
        let mut keys = Vec::new();
        for &origin in &self.settings.origins {
            keys.push(WatermarkKey::origin(origin));
            for target in self.settings.targets(origin) {
                keys.push(WatermarkKey::target(origin, target.as_str()));
            }
        }
        keys
    }
}

/// What one blocking task needs to sync one work.
struct SyncJob {
    settings: Arc<Settings>,
    converter: Arc<dyn Converter>,
    catalog: Option<Arc<SerializedCatalog>>,
}

impl SyncJob {
    fn sync(&self, work: &WorkUrl) -> Result<Synced, WorkError> {
        // Removed on drop, whichever way this returns.
        let temp = tempfile::Builder::new()
            .prefix("ficsync-")
            .tempdir()
            .context("create work dir")?;
        let work_dir = temp.path();
        tracing::info!(url = %work, "working with url");

        let executor = UpdateExecutor::new(
            self.converter.as_ref(),
            self.settings.force,
            self.catalog.is_some(),
        );

        match self.catalog.as_deref() {
            Some(catalog) => {
                let sync = CatalogSync::new(catalog);
                let existing = sync.prepare(work, work_dir)?;
                let update = executor.update(work, existing.document.as_deref(), work_dir)?;
                let id = sync.upsert(work, &existing, &update.document, update.metadata.as_ref())?;
                Ok(Synced::Catalog(id))
            }
            None => {
                let update = executor.update(work, None, work_dir)?;
                let path = move_into(&update.document, &self.settings.output_dir)?;
                Ok(Synced::Downloaded(path))
            }
        }
    }
}

fn move_into(document: &Path, dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create output dir: {}", dir.display()))?;
    let name = document
        .file_name()
        .with_context(|| format!("document has no file name: {}", document.display()))?;
    let dest = dir.join(name);
    if std::fs::rename(document, &dest).is_err() {
        // Different filesystem than the work dir.
        std::fs::copy(document, &dest)
            .with_context(|| format!("copy {} to {}", document.display(), dest.display()))?;
    }
    Ok(dest)
}
