use std::path::{Path, PathBuf};
use std::process::Command;

use crate::catalog::{Catalog, CatalogError, EntryId, Fields, SearchQuery};
use crate::config::LibrarySettings;
use crate::metadata::{SERIES_SLOTS, TAG_TYPES, WORDS_FIELD};
use crate::process::run_captured;

const BANNER: &str = "Initialized urlfixer\n";
const NO_MATCHES: &str = "No books matching the search expression";

/// Grouped search term spanning the primary series and every series slot.
const ALL_SERIES_TERM: &str = "allseries";

/// `calibredb`, against a library directory or a content server URL.
#[derive(Clone)]
pub struct CalibreDb {
    bin: String,
    library: LibrarySettings,
}

impl CalibreDb {
    pub fn new(bin: impl Into<String>, library: LibrarySettings) -> Self {
        Self {
            bin: bin.into(),
            library,
        }
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg(subcommand);
        cmd.arg(format!("--with-library={}", self.library.location));
        if let Some(user) = self.library.user.as_deref() {
            cmd.arg(format!("--username={user}"));
        }
        if let Some(password) = self.library.password.as_deref() {
            cmd.arg(format!("--password={password}"));
        }
        cmd
    }

    /// Run and return the cleaned output, or the cleaned output as the error message.
    fn run(&self, operation: &'static str, mut cmd: Command) -> Result<String, CatalogError> {
        tracing::debug!(operation, library = %self.library.location, "calibredb");
        let captured = run_captured(&mut cmd)?;
        let text = clean_output(&captured.text);
        if captured.success() {
            Ok(text)
        } else {
            Err(CatalogError::Command {
                operation,
                message: text.trim().to_owned(),
            })
        }
    }

    fn custom_columns(&self) -> Result<Vec<String>, CatalogError> {
        let output = self.run("custom_columns", self.command("custom_columns"))?;
        Ok(parse_column_names(&output))
    }

    fn add_column(&self, name: &str, label: &str, datatype: &str, multiple: bool) -> Result<(), CatalogError> {
        tracing::info!(column = name, "adding custom column to calibre library");
        let mut cmd = self.command("add_custom_column");
        cmd.args([name, label, datatype]);
        if multiple {
            cmd.arg("--is-multiple");
        }
        self.run("add_custom_column", cmd).map(drop)
    }

    fn is_server(&self) -> bool {
        url::Url::parse(&self.library.location).is_ok_and(|url| url.has_host())
    }

    /// `calibre-debug`, next to the configured `calibredb`.
    fn debug_bin(&self) -> PathBuf {
        Path::new(&self.bin).with_file_name("calibre-debug")
    }

    fn grouped_search_command(&self) -> Command {
        let mut cmd = Command::new(self.debug_bin());
        cmd.arg("-c")
            .arg(grouped_search_script(&self.library.location));
        cmd
    }

    fn add_grouped_series_search(&self) -> Result<(), CatalogError> {
        if self.is_server() {
            tracing::warn!(
                library = %self.library.location,
                term = ALL_SERIES_TERM,
                "cannot add a grouped search term through a content server; series searches need it"
            );
            return Ok(());
        }
        tracing::info!(term = ALL_SERIES_TERM, "adding grouped search term to calibre library");
        self.run("add_grouped_search", self.grouped_search_command()).map(drop)
    }

    fn ensure_columns(&self) -> Result<(), CatalogError> {
        let existing = self.custom_columns()?;
        let missing = |name: &str| !existing.iter().any(|column| column == name);

        if missing(WORDS_FIELD) {
            self.add_column(WORDS_FIELD, "Words", "int", false)?;
        }
        let missing_slots: Vec<&str> = SERIES_SLOTS.into_iter().filter(|slot| missing(slot)).collect();
        for slot in &missing_slots {
            self.add_column(slot, slot, "series", false)?;
        }
        if !missing_slots.is_empty() {
            self.add_grouped_series_search()?;
        }
        for tag_type in TAG_TYPES.into_iter().filter(|tag_type| missing(tag_type)) {
            self.add_column(tag_type, tag_type, "text", true)?;
        }
        Ok(())
    }

    fn diagnose(&self, err: CatalogError) -> CatalogError {
        let message = match err {
            CatalogError::Command { message, .. } if message.contains("urllib.error.URLError") => {
                format!("error connecting to the url {}", self.library.location)
            }
            CatalogError::Command { message, .. } if message.contains("Not Found") => {
                format!("no calibre library found at the url {}", self.library.location)
            }
            CatalogError::Command { message, .. } => message,
            CatalogError::Tool(err) => format!("could not run {}: {err:#}", self.bin),
            other => other.to_string(),
        };
        CatalogError::Unavailable(format!(
            "error while making sure custom columns exist: {message}"
        ))
    }
}

impl Catalog for CalibreDb {
    fn prepare(&self) -> Result<(), CatalogError> {
        let location = &self.library.location;
        if !self.is_server() && !Path::new(location).is_dir() {
            tracing::warn!(library = %location, "no calibre library at this path; calibre will create one");
        }
        self.ensure_columns().map_err(|err| self.diagnose(err))
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<EntryId>, CatalogError> {
        let mut cmd = self.command("search");
        cmd.arg(query.expression());
        match self.run("search", cmd) {
            Ok(output) => parse_ids(&output),
            Err(CatalogError::Command { message, .. }) if message.contains(NO_MATCHES) => {
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn export(&self, id: EntryId, dir: &Path) -> Result<(), CatalogError> {
        let mut cmd = self.command("export");
        cmd.arg(id.to_string());
        cmd.args([
            "--dont-save-cover",
            "--dont-write-opf",
            "--single-dir",
            "--to-dir",
        ]);
        cmd.arg(dir);
        self.run("export", cmd).map(drop)
    }

    fn add(&self, document: &Path) -> Result<(), CatalogError> {
        let mut cmd = self.command("add");
        cmd.arg("-d").arg(document);
        self.run("add", cmd).map(drop)
    }

    fn remove(&self, id: EntryId) -> Result<(), CatalogError> {
        let mut cmd = self.command("remove");
        cmd.arg(id.to_string());
        self.run("remove", cmd).map(drop)
    }

    fn set_metadata(&self, id: EntryId, fields: &Fields) -> Result<(), CatalogError> {
        let mut cmd = self.command("set_metadata");
        cmd.arg(id.to_string());
        for (field, value) in fields {
            cmd.arg("--field").arg(format!("{field}:{value}"));
        }
        self.run("set_metadata", cmd).map(drop)
    }
}

/// Python for `calibre-debug -c`: adds the series term, keeping other grouped terms.
fn grouped_search_script(library: &str) -> String {
    let columns: Vec<String> = std::iter::once("series".to_owned())
        .chain(SERIES_SLOTS.iter().map(|slot| format!("#{slot}")))
        .collect();
    let library = serde_json::Value::from(library);
    let columns = serde_json::Value::from(columns);
    format!(
        "from calibre.library import db\n\
         api = db({library}).new_api\n\
         terms = dict(api.pref(\"grouped_search_terms\", {{}}))\n\
         terms[\"{ALL_SERIES_TERM}\"] = {columns}\n\
         api.set_pref(\"grouped_search_terms\", terms)\n"
    )
}

fn clean_output(text: &str) -> String {
    text.replace(BANNER, "")
}

/// `calibredb custom_columns` prints `name (number)` per line.
fn parse_column_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

fn parse_ids(output: &str) -> Result<Vec<EntryId>, CatalogError> {
    let mut ids = Vec::new();
    for raw in output.trim().split(',').map(str::trim).filter(|raw| !raw.is_empty()) {
        let id = raw
            .parse::<u64>()
            .map_err(|_| CatalogError::BadSearchOutput(output.trim().to_owned()))?;
        ids.push(EntryId(id));
    }
    ids.sort_unstable();
    Ok(ids)
}
