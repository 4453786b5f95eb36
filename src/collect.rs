use std::collections::BTreeSet;
use std::io::BufRead;

use anyhow::Context as _;

use crate::config::Settings;
use crate::origin::Origin;
use crate::provider::{FetchRequest, UrlProvider};
use crate::retry_file;
use crate::watermark::{SincePolicy, WatermarkKey, Watermarks};
use crate::work_url::WorkUrl;

/// An origin failed. Whatever had been gathered before the failure was written to the
/// retry file.
#[derive(Debug, thiserror::Error)]
#[error("error collecting work urls from {origin}: {source}")]
pub struct CollectError {
    pub origin: Origin,
    pub flushed: usize,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    pub works: BTreeSet<WorkUrl>,
    /// Inputs without a recognizable work id. Kept so they can be reported and retried.
    pub malformed: BTreeSet<String>,
}

impl Collected {
    pub fn is_empty(&self) -> bool {
        self.works.is_empty() && self.malformed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.works.len() + self.malformed.len()
    }
}

pub struct Collector<'a> {
    settings: &'a Settings,
    provider: &'a dyn UrlProvider,
    watermarks: &'a Watermarks,
}

impl<'a> Collector<'a> {
    pub fn new(
        settings: &'a Settings,
        provider: &'a dyn UrlProvider,
        watermarks: &'a Watermarks,
    ) -> Self {
        Self {
            settings,
            provider,
            watermarks,
        }
    }

    fn policy(&self) -> SincePolicy {
        SincePolicy {
            since: self.settings.since,
            since_last_update: self.settings.since_last_update,
        }
    }

    /// Query every requested origin in order and union the results.
    ///
    /// All or nothing: the first failing origin aborts the collection, after the URLs
    /// gathered so far are written to the retry file (overwriting it).
    pub fn collect(&self, stdin: &mut dyn BufRead) -> Result<Collected, CollectError> {
        let mut raw: BTreeSet<String> = BTreeSet::new();

        for &origin in &self.settings.origins {
            let before = raw.len();
            if let Err(err) = self.collect_origin(origin, &mut raw, stdin) {
                let flushed = raw.len();
                if let Err(flush_err) =
                    retry_file::overwrite(&self.settings.retry_file, raw.iter().map(String::as_str))
                {
                    tracing::error!(?flush_err, "could not save collected urls to retry file");
                }
                tracing::error!(%origin, flushed, "url collection failed; saved collected urls for retry");
                return Err(CollectError {
                    origin,
                    flushed,
                    source: err.into(),
                });
            }
            tracing::info!(
                %origin,
                added = raw.len() - before,
                total = raw.len(),
                "{} urls from {}",
                raw.len() - before,
                origin.label()
            );
        }

        let mut collected = Collected::default();
        for url in raw {
            match self.settings.normalizer.normalize(&url) {
                Ok(work) => {
                    collected.works.insert(work);
                }
                Err(err) => {
                    tracing::warn!(url = %err.url, "not a work url");
                    collected.malformed.insert(url);
                }
            }
        }
        Ok(collected)
    }

    fn collect_origin(
        &self,
        origin: Origin,
        raw: &mut BTreeSet<String>,
        stdin: &mut dyn BufRead,
    ) -> anyhow::Result<()> {
        match origin {
            Origin::RetryFile => {
                let path = &self.settings.retry_file;
                // A dry run must not lose queued work, so it only peeks.
                let urls = if self.settings.dry_run {
                    retry_file::peek(path)?
                } else {
                    retry_file::drain(path)?
                };
                raw.extend(urls);
            }
            Origin::Stdin => {
                for line in stdin.lines() {
                    let line = line.context("read urls from stdin")?;
                    let line = line.trim();
                    if !line.is_empty() {
                        raw.insert(line.to_owned());
                    }
                }
            }
            Origin::Inbox => {
                let request = self.request(origin, None, None);
                raw.extend(self.provider.fetch(&request)?);
            }
            Origin::Usernames | Origin::Series | Origin::Collections => {
                let targets = self.settings.targets(origin);
                tracing::info!(%origin, targets = %targets.join(","), "getting urls from {}", origin.label());
                for target in targets {
                    let key = WatermarkKey::target(origin, target.as_str());
                    self.fetch_archive(origin, Some(target.as_str()), &key, raw)?;
                }
            }
            _ => {
                tracing::info!(%origin, "getting urls from {}", origin.label());
                let key = WatermarkKey::origin(origin);
                self.fetch_archive(origin, None, &key, raw)?;
            }
        }
        Ok(())
    }

    fn fetch_archive(
        &self,
        origin: Origin,
        target: Option<&str>,
        key: &WatermarkKey,
        raw: &mut BTreeSet<String>,
    ) -> anyhow::Result<()> {
        if self.settings.max_count == Some(0) {
            return Ok(());
        }

        let since = self.watermarks.resolve(key, self.policy());
        tracing::debug!(%origin, ?target, ?since, "fetch window");

        let request = self.request(origin, target, since);
        raw.extend(self.provider.fetch(&request)?);

        // Bookmarks ordered by bookmarking date miss older bookmarks of works updated
        // since the watermark; a second pass ordered by update date picks those up.
        if origin == Origin::Bookmarks && since.is_some() {
            let request = FetchRequest {
                sort_by_updated: true,
                ..request
            };
            raw.extend(self.provider.fetch(&request)?);
        }
        Ok(())
    }

    fn request<'r>(
        &'r self,
        origin: Origin,
        target: Option<&'r str>,
        since: Option<chrono::NaiveDate>,
    ) -> FetchRequest<'r> {
        FetchRequest {
            origin,
            target,
            user: self.settings.user.as_deref(),
            cookie: self.settings.cookie.as_deref(),
            limit: self.settings.max_count,
            since,
            sort_by_updated: false,
            expand_series: self.settings.expand_series,
            base_url: self.settings.normalizer.fetch_base(),
        }
    }
}
