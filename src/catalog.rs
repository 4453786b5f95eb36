use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Catalog-assigned entry id. Only meaningful inside one library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field name to value, custom fields prefixed with `#`. An empty value clears the field.
pub type Fields = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog {operation} failed: {message}")]
    Command {
        operation: &'static str,
        message: String,
    },

    #[error("unexpected catalog search output: '{0}'")]
    BadSearchOutput(String),

    #[error("added {url} to the catalog but could not find the new entry")]
    NewEntryNotFound { url: String },

    #[error("catalog is not usable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Tool(#[from] anyhow::Error),
}

/// Search predicates. Terms of one kind are OR-ed, kinds are AND-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub urls: Vec<String>,
    pub authors: Vec<String>,
    pub series: Vec<String>,
    pub formats: Vec<String>,
}

impl SearchQuery {
    pub fn by_url(url: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            formats: vec![format.into()],
            ..Self::default()
        }
    }

    /// Render as a catalog search expression.
    pub fn expression(&self) -> String {
        let mut groups = Vec::new();
        if !self.authors.is_empty() {
            // Exact name, or a pseud written "Pseud (name)".
            groups.push(any_of(self.authors.iter().map(|author| {
                format!(
                    "author:\"={}\" or author:\"~\\({}\\)\"",
                    quote_escape(author),
                    quote_escape(author)
                )
            })));
        }
        if !self.urls.is_empty() {
            // Type and value each need their own `=`, or `works/1` also matches `works/10`.
            groups.push(any_of(
                self.urls
                    .iter()
                    .map(|url| format!("identifiers:\"=url:={}\"", quote_escape(url))),
            ));
        }
        if !self.series.is_empty() {
            groups.push(any_of(self.series.iter().map(|series| {
                format!("allseries:\"={}\"", quote_escape(&series.replace('&', "&amp;")))
            })));
        }
        if !self.formats.is_empty() {
            groups.push(any_of(
                self.formats
                    .iter()
                    .map(|format| format!("formats:\"={}\"", format.to_uppercase())),
            ));
        }
        groups.join(" and ")
    }
}

fn any_of(terms: impl Iterator<Item = String>) -> String {
    let terms: Vec<String> = terms.collect();
    if terms.len() == 1 && !terms[0].contains(" or ") {
        return terms.into_iter().next().unwrap_or_default();
    }
    format!("({})", terms.join(" or "))
}

fn quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// The local document library.
pub trait Catalog: Send + Sync {
    /// Make sure the custom fields written by the sync exist.
    fn prepare(&self) -> Result<(), CatalogError>;

    /// Matching entry ids in ascending order.
    fn search(&self, query: &SearchQuery) -> Result<Vec<EntryId>, CatalogError>;

    /// Write the entry's document into `dir`.
    fn export(&self, id: EntryId, dir: &Path) -> Result<(), CatalogError>;

    /// Add a document as a new entry, even if an entry for the same work exists.
    fn add(&self, document: &Path) -> Result<(), CatalogError>;

    fn remove(&self, id: EntryId) -> Result<(), CatalogError>;

    fn set_metadata(&self, id: EntryId, fields: &Fields) -> Result<(), CatalogError>;
}

/// Runs every catalog call inside one critical section, so concurrent workers never
/// invoke the catalog tool at the same time.
pub struct SerializedCatalog {
    inner: Arc<dyn Catalog>,
    lock: Mutex<()>,
}

impl SerializedCatalog {
    pub fn new(inner: Arc<dyn Catalog>) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&dyn Catalog) -> T) -> T {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        f(self.inner.as_ref())
    }
}

impl Catalog for SerializedCatalog {
    fn prepare(&self) -> Result<(), CatalogError> {
        self.with(|catalog| catalog.prepare())
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<EntryId>, CatalogError> {
        self.with(|catalog| catalog.search(query))
    }

    fn export(&self, id: EntryId, dir: &Path) -> Result<(), CatalogError> {
        self.with(|catalog| catalog.export(id, dir))
    }

    fn add(&self, document: &Path) -> Result<(), CatalogError> {
        self.with(|catalog| catalog.add(document))
    }

    fn remove(&self, id: EntryId) -> Result<(), CatalogError> {
        self.with(|catalog| catalog.remove(id))
    }

    fn set_metadata(&self, id: EntryId, fields: &Fields) -> Result<(), CatalogError> {
        self.with(|catalog| catalog.set_metadata(id, fields))
    }
}
