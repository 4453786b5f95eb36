use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, CatalogError, EntryId, SearchQuery};
use crate::metadata::catalog_fields;
use crate::outcome::Metadata;
use crate::update::{DOCUMENT_EXTENSION, newest_document};
use crate::work_url::WorkUrl;

/// Entries already in the catalog for one work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Existing {
    /// Ascending.
    pub ids: Vec<EntryId>,
    /// Exported copy of the newest entry, when it has a document in the expected format.
    pub document: Option<PathBuf>,
}

/// Keeps one catalog entry per work. Entries are found by work URL only.
pub struct CatalogSync<'a> {
    catalog: &'a dyn Catalog,
}

impl<'a> CatalogSync<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog }
    }

    fn lookup(&self, work: &WorkUrl) -> Result<Vec<EntryId>, CatalogError> {
        self.catalog
            .search(&SearchQuery::by_url(work.as_str(), DOCUMENT_EXTENSION))
    }

    /// Find the work in the catalog and export its document into `work_dir`, so the
    /// conversion tool updates it in place.
    pub fn prepare(&self, work: &WorkUrl, work_dir: &Path) -> Result<Existing, CatalogError> {
        let ids = self.lookup(work)?;
        let Some(&newest) = ids.last() else {
            return Ok(Existing::default());
        };
        if ids.len() > 1 {
            tracing::warn!(url = %work, ids = ?ids, "work has several catalog entries; updating the newest");
        }

        tracing::info!(url = %work, id = %newest, "exporting from catalog");
        self.catalog.export(newest, work_dir)?;
        let document = newest_document(work_dir)?;
        if document.is_none() {
            tracing::info!(url = %work, id = %newest, "no document for this entry; downloading a fresh copy");
        }
        Ok(Existing { ids, document })
    }

    /// Add `document` as a new entry, tag it, then remove the entries found by
    /// [`CatalogSync::prepare`]. The old entries go only after the new one exists.
    pub fn upsert(
        &self,
        work: &WorkUrl,
        existing: &Existing,
        document: &Path,
        metadata: Option<&Metadata>,
    ) -> Result<EntryId, CatalogError> {
        tracing::info!(url = %work, document = %document.display(), "adding to catalog");
        self.catalog.add(document)?;

        let new_id = self
            .lookup(work)?
            .into_iter()
            .filter(|id| !existing.ids.contains(id))
            .max()
            .ok_or_else(|| CatalogError::NewEntryNotFound {
                url: work.to_string(),
            })?;
        tracing::info!(url = %work, id = %new_id, "added to catalog");

        if let Some(metadata) = metadata {
            let fields = catalog_fields(metadata);
            if let Err(err) = self.catalog.set_metadata(new_id, &fields) {
                tracing::warn!(url = %work, id = %new_id, %err, "could not set metadata");
            }
        }

        for &old in &existing.ids {
            tracing::info!(url = %work, id = %old, "removing old entry from catalog");
            self.catalog.remove(old)?;
        }

        Ok(new_id)
    }
}
