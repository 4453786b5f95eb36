use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ficsync::catalog::{Catalog, CatalogError, EntryId, Fields, SearchQuery};
use ficsync::cli::DownloadArgs;
use ficsync::config::{ConfigFile, Settings};
use ficsync::converter::{ConvertRequest, Converter};
use ficsync::origin::Origin;
use ficsync::provider::{FetchRequest, UrlProvider};

pub const ARCHIVE: &str = "https://example.org";

/// Per-origin canned URL lists; an origin mapped to `Err` fails.
#[derive(Default)]
pub struct FakeProvider {
    responses: BTreeMap<Origin, Result<Vec<String>, String>>,
    pub requests: Mutex<Vec<(Origin, Option<String>)>>,
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn urls(mut self, origin: Origin, urls: &[&str]) -> Self {
        self.responses
            .insert(origin, Ok(urls.iter().map(|url| (*url).to_owned()).collect()));
        self
    }

    pub fn failing(mut self, origin: Origin, message: &str) -> Self {
        self.responses.insert(origin, Err(message.to_owned()));
        self
    }
}

impl UrlProvider for FakeProvider {
    fn fetch(&self, request: &FetchRequest<'_>) -> anyhow::Result<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .push((request.origin, request.target.map(str::to_owned)));
        match self.responses.get(&request.origin) {
            Some(Ok(urls)) => Ok(urls.clone()),
            Some(Err(message)) => anyhow::bail!("{message}"),
            None => Ok(Vec::new()),
        }
    }
}

/// Replies per target with queued outputs. A reply containing a JSON object (or a plain
/// "Done") writes a document named after the work id into the work dir.
#[derive(Default)]
pub struct FakeConverter {
    replies: Mutex<BTreeMap<String, Vec<String>>>,
    pub runs: Mutex<Vec<(String, bool)>>,
    pub work_dirs: Mutex<Vec<PathBuf>>,
}

#[allow(dead_code)]
impl FakeConverter {
    pub fn reply(self, target_suffix: &str, outputs: &[&str]) -> Self {
        let mut queue: Vec<String> = outputs.iter().map(|o| (*o).to_owned()).collect();
        queue.reverse();
        self.replies
            .lock()
            .unwrap()
            .insert(target_suffix.to_owned(), queue);
        self
    }

    pub fn forced_runs(&self) -> Vec<bool> {
        self.runs.lock().unwrap().iter().map(|(_, force)| *force).collect()
    }

    pub fn work_dirs(&self) -> Vec<PathBuf> {
        self.work_dirs.lock().unwrap().clone()
    }
}

pub fn success(title: &str) -> String {
    format!("Do update\n{{\"title\": \"{title}\", \"numWords\": \"1,000\", \"fandoms\": \"Fandom\"}}\n")
}

impl Converter for FakeConverter {
    fn run(&self, request: &ConvertRequest<'_>) -> anyhow::Result<String> {
        self.runs
            .lock()
            .unwrap()
            .push((request.target.to_owned(), request.force));
        self.work_dirs
            .lock()
            .unwrap()
            .push(request.work_dir.to_path_buf());

        let mut replies = self.replies.lock().unwrap();
        let output = replies
            .iter_mut()
            .find(|(suffix, _)| request.target.ends_with(suffix.as_str()))
            .and_then(|(_, queue)| queue.pop())
            .unwrap_or_else(|| success("Untitled"));

        if ficsync::outcome::classify(&output).is_success() {
            let name = request
                .target
                .rsplit('/')
                .next()
                .unwrap_or("work")
                .trim_end_matches(".epub");
            std::fs::write(request.work_dir.join(format!("{name}.epub")), b"epub")?;
        }
        Ok(output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: u64,
    pub url: String,
    pub fields: Fields,
}

/// In-memory catalog keyed by work URL. Added documents are mapped back to their URL
/// by file name.
#[derive(Default)]
pub struct FakeCatalog {
    pub entries: Mutex<Vec<Entry>>,
    pub calls: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
    fail_remove: bool,
    fail_add: bool,
}

#[allow(dead_code)]
impl FakeCatalog {
    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn failing_add(mut self) -> Self {
        self.fail_add = true;
        self
    }

    pub fn with_entry(self, id: u64, url: &str) -> Self {
        self.entries.lock().unwrap().push(Entry {
            id,
            url: url.to_owned(),
            fields: Fields::new(),
        });
        {
            let mut next = self.next_id.lock().unwrap();
            *next = (*next).max(id);
        }
        self
    }

    pub fn ids_for(&self, url: &str) -> Vec<u64> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.url == url)
            .map(|entry| entry.id)
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

/// The fake documents are named `<work id>.epub`; the catalog maps them back to the URL.
fn url_for_document(document: &Path) -> String {
    let id = document
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{ARCHIVE}/works/{id}")
}

impl Catalog for FakeCatalog {
    fn prepare(&self) -> Result<(), CatalogError> {
        self.log("prepare".to_owned());
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<EntryId>, CatalogError> {
        self.log(format!("search {}", query.urls.join(",")));
        let entries = self.entries.lock().unwrap();
        let mut ids: Vec<EntryId> = entries
            .iter()
            .filter(|entry| query.urls.contains(&entry.url))
            .map(|entry| EntryId(entry.id))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn export(&self, id: EntryId, dir: &Path) -> Result<(), CatalogError> {
        self.log(format!("export {id}"));
        let url = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|entry| entry.id == id.0)
            .map(|entry| entry.url.clone())
            .unwrap_or_default();
        let work_id = url.rsplit('/').next().unwrap_or_default().to_owned();
        std::fs::write(dir.join(format!("{work_id}.epub")), b"old epub")
            .map_err(|err| CatalogError::Tool(err.into()))
    }

    fn add(&self, document: &Path) -> Result<(), CatalogError> {
        self.log("add".to_owned());
        if self.fail_add {
            return Err(CatalogError::Command {
                operation: "add",
                message: "library is read-only".to_owned(),
            });
        }
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        self.entries.lock().unwrap().push(Entry {
            id: *next,
            url: url_for_document(document),
            fields: Fields::new(),
        });
        Ok(())
    }

    fn remove(&self, id: EntryId) -> Result<(), CatalogError> {
        self.log(format!("remove {id}"));
        if self.fail_remove {
            return Err(CatalogError::Command {
                operation: "remove",
                message: "database is locked".to_owned(),
            });
        }
        self.entries.lock().unwrap().retain(|entry| entry.id != id.0);
        Ok(())
    }

    fn set_metadata(&self, id: EntryId, fields: &Fields) -> Result<(), CatalogError> {
        self.log(format!("set_metadata {id}"));
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap()
            .iter_mut()
            .find(|entry| entry.id == id.0)
        {
            entry.fields = fields.clone();
        }
        Ok(())
    }
}

/// Workspace for one run: retry file and last-update file inside a temp dir.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

#[allow(dead_code)]
impl Workspace {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            dir: tempfile::TempDir::new()?,
        })
    }

    pub fn retry_file(&self) -> PathBuf {
        self.dir.path().join("fanfiction.txt")
    }

    pub fn last_update_file(&self) -> PathBuf {
        self.dir.path().join("last_update.json")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("books")
    }

    pub fn retry_lines(&self) -> anyhow::Result<Vec<String>> {
        Ok(std::fs::read_to_string(self.retry_file())
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect())
    }

    /// Logged-in settings over this workspace; `args` fills in the rest.
    pub fn settings(&self, sources: &[&str], args: DownloadArgs) -> Settings {
        let args = DownloadArgs {
            user: Some("reader".to_owned()),
            cookie: Some("session".to_owned()),
            sources: Some(sources.iter().map(|s| (*s).to_owned()).collect()),
            input: Some(self.retry_file().to_string_lossy().into_owned()),
            last_update_file: Some(self.last_update_file().to_string_lossy().into_owned()),
            output_dir: Some(self.output_dir().to_string_lossy().into_owned()),
            archive_url: Some(ARCHIVE.to_owned()),
            cooldown_secs: args.cooldown_secs.or(Some(0)),
            ..args
        };
        Settings::resolve(args, ConfigFile::default()).expect("valid settings")
    }
}
