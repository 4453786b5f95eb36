//! Layered configuration: explicit command-line value, then the TOML config file, then
//! the built-in default. Resolved once into [`Settings`] before anything touches the
//! network or the catalog.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use url::Url;

use crate::cli::DownloadArgs;
use crate::origin::{self, Origin};
use crate::watermark::DATE_FORMAT;
use crate::work_url::{DEFAULT_ARCHIVE_URL, UrlNormalizer};

pub const DEFAULT_SOURCES: [&str; 3] = ["file", "bookmarks", "later"];
pub const DEFAULT_RETRY_FILE: &str = "fanfiction.txt";
pub const DEFAULT_LAST_UPDATE_FILE: &str = "last_update.json";
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;
pub const DEFAULT_URL_PROVIDER: &str = "ao3-urls";
pub const DEFAULT_FANFICFARE_BIN: &str = "fanficfare";
pub const DEFAULT_CALIBREDB_BIN: &str = "calibredb";
pub const DEFAULT_EMAIL_FOLDER: &str = "INBOX";

/// Fatal configuration problems. Raised before any work starts; nothing is written.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown source '{name}'; valid sources are: {valid}")]
    UnknownSource { name: String, valid: String },

    #[error("source '{origin}' needs a list of {what} (--{origin})")]
    MissingTargets { origin: Origin, what: &'static str },

    #[error("an archive username is required for source '{origin}' (--user)")]
    MissingUser { origin: Origin },

    #[error("a session cookie is required for source '{origin}' (--cookie)")]
    MissingCookie { origin: Origin },

    #[error("source 'imap' needs --email-{what}")]
    MissingInbox { what: &'static str },

    #[error("'since' should have format DD.MM.YYYY, got '{0}'")]
    InvalidSince(String),

    #[error("workers must be at least 1")]
    NoWorkers,

    #[error("invalid archive url '{url}': {message}")]
    InvalidArchiveUrl { url: String, message: String },

    #[error("read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config file {path}: {message}")]
    ParseFile { path: String, message: String },

    #[error("{path} should contain a valid last-update record: {message}")]
    InvalidWatermarkFile { path: String, message: String },
}

/// Contents of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub user: Option<String>,
    pub cookie: Option<String>,
    pub sources: Option<Vec<String>>,
    pub max_count: Option<usize>,
    pub usernames: Option<Vec<String>>,
    pub series: Option<Vec<String>>,
    pub collections: Option<Vec<String>>,
    pub since: Option<String>,
    pub since_last_update: Option<bool>,
    pub expand_series: Option<bool>,
    pub force: Option<bool>,
    pub input: Option<String>,
    pub library: Option<String>,
    pub calibre_user: Option<String>,
    pub calibre_password: Option<String>,
    pub dry_run: Option<bool>,
    pub fanficfare_config: Option<String>,
    pub last_update_file: Option<String>,
    pub archive_url: Option<String>,
    pub mirror: Option<String>,
    pub output_dir: Option<String>,
    pub workers: Option<usize>,
    pub cooldown_secs: Option<u64>,
    pub url_provider: Option<String>,
    pub fanficfare_bin: Option<String>,
    pub calibredb_bin: Option<String>,
    pub email_server: Option<String>,
    pub email_user: Option<String>,
    pub email_password: Option<String>,
    pub email_folder: Option<String>,
    pub email_leave_unread: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct LibrarySettings {
    pub location: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Default)]
pub struct InboxSettings {
    pub server: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub folder: String,
    pub mark_read: bool,
}

/// Everything a sync run needs, with precedence already applied.
#[derive(Clone)]
pub struct Settings {
    pub user: Option<String>,
    pub cookie: Option<String>,
    pub origins: BTreeSet<Origin>,
    pub max_count: Option<usize>,
    pub usernames: Vec<String>,
    pub series: Vec<String>,
    pub collections: Vec<String>,
    pub since: Option<NaiveDate>,
    pub since_last_update: bool,
    pub expand_series: bool,
    pub force: bool,
    pub retry_file: PathBuf,
    pub library: Option<LibrarySettings>,
    pub dry_run: bool,
    pub fanficfare_config: Option<PathBuf>,
    pub last_update_file: PathBuf,
    pub normalizer: UrlNormalizer,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub cooldown: Duration,
    pub url_provider: String,
    pub fanficfare_bin: String,
    pub calibredb_bin: String,
    pub inbox: InboxSettings,
}

impl Settings {
    /// Read the config file named by `--config` (if any) and resolve.
    pub fn load(args: DownloadArgs) -> Result<Self, ConfigError> {
        let file = match args.config.as_deref() {
            Some(path) => ConfigFile::load(Path::new(path))?,
            None => ConfigFile::default(),
        };
        Self::resolve(args, file)
    }

    pub fn resolve(args: DownloadArgs, file: ConfigFile) -> Result<Self, ConfigError> {
        let source_names = args
            .sources
            .or(file.sources)
            .unwrap_or_else(|| DEFAULT_SOURCES.iter().map(|s| (*s).to_owned()).collect());
        let origins = origin::parse_sources(&source_names)?;

        let since = args
            .since
            .or(file.since)
            .map(|raw| {
                NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
                    .map_err(|_| ConfigError::InvalidSince(raw))
            })
            .transpose()?;

        let workers = args.workers.or(file.workers).unwrap_or(1);
        if workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let canonical = parse_archive_url(
            args.archive_url
                .or(file.archive_url)
                .as_deref()
                .unwrap_or(DEFAULT_ARCHIVE_URL),
        )?;
        let mirror = args
            .mirror
            .or(file.mirror)
            .map(|raw| parse_archive_url(&raw))
            .transpose()?;

        let library = args
            .library
            .or(file.library)
            .map(|location| LibrarySettings {
                location,
                user: args.calibre_user.or(file.calibre_user),
                password: args.calibre_password.or(file.calibre_password),
            });

        let inbox = InboxSettings {
            server: args.email_server.or(file.email_server),
            user: args.email_user.or(file.email_user),
            password: args.email_password.or(file.email_password),
            folder: args
                .email_folder
                .or(file.email_folder)
                .unwrap_or_else(|| DEFAULT_EMAIL_FOLDER.to_owned()),
            mark_read: !flag(args.email_leave_unread, file.email_leave_unread),
        };

        let settings = Settings {
            user: args.user.or(file.user),
            cookie: args.cookie.or(file.cookie),
            origins,
            max_count: args.max_count.or(file.max_count),
            usernames: non_empty(args.usernames.or(file.usernames)),
            series: non_empty(args.series.or(file.series)),
            collections: non_empty(args.collections.or(file.collections)),
            since,
            since_last_update: flag(args.since_last_update, file.since_last_update),
            expand_series: flag(args.expand_series, file.expand_series),
            force: flag(args.force, file.force),
            retry_file: PathBuf::from(
                args.input
                    .or(file.input)
                    .unwrap_or_else(|| DEFAULT_RETRY_FILE.to_owned()),
            ),
            library,
            dry_run: flag(args.dry_run, file.dry_run),
            fanficfare_config: args
                .fanficfare_config
                .or(file.fanficfare_config)
                .map(PathBuf::from),
            last_update_file: PathBuf::from(
                args.last_update_file
                    .or(file.last_update_file)
                    .unwrap_or_else(|| DEFAULT_LAST_UPDATE_FILE.to_owned()),
            ),
            normalizer: UrlNormalizer::new(canonical, mirror),
            output_dir: PathBuf::from(
                args.output_dir
                    .or(file.output_dir)
                    .unwrap_or_else(|| ".".to_owned()),
            ),
            workers,
            cooldown: Duration::from_secs(
                args.cooldown_secs
                    .or(file.cooldown_secs)
                    .unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            url_provider: args
                .url_provider
                .or(file.url_provider)
                .unwrap_or_else(|| DEFAULT_URL_PROVIDER.to_owned()),
            fanficfare_bin: args
                .fanficfare_bin
                .or(file.fanficfare_bin)
                .unwrap_or_else(|| DEFAULT_FANFICFARE_BIN.to_owned()),
            calibredb_bin: args
                .calibredb_bin
                .or(file.calibredb_bin)
                .unwrap_or_else(|| DEFAULT_CALIBREDB_BIN.to_owned()),
            inbox,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for &origin in &self.origins {
            if origin.needs_archive_login() {
                if self.user.is_none() {
                    return Err(ConfigError::MissingUser { origin });
                }
                if self.cookie.is_none() {
                    return Err(ConfigError::MissingCookie { origin });
                }
            }
            if origin.target_kind().is_some() && self.targets(origin).is_empty() {
                let what = match origin {
                    Origin::Usernames => "usernames",
                    Origin::Series => "series ids",
                    _ => "collection ids",
                };
                return Err(ConfigError::MissingTargets { origin, what });
            }
        }

        if self.origins.contains(&Origin::Inbox) {
            if self.inbox.server.is_none() {
                return Err(ConfigError::MissingInbox { what: "server" });
            }
            if self.inbox.user.is_none() {
                return Err(ConfigError::MissingInbox { what: "user" });
            }
            if self.inbox.password.is_none() {
                return Err(ConfigError::MissingInbox { what: "password" });
            }
        }

        Ok(())
    }

    /// Targets of a parameterized origin; empty for the others.
    pub fn targets(&self, origin: Origin) -> &[String] {
        match origin {
            Origin::Usernames => &self.usernames,
            Origin::Series => &self.series,
            Origin::Collections => &self.collections,
            _ => &[],
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("user", &self.user)
            .field("cookie", &self.cookie.as_ref().map(|_| "****"))
            .field("origins", &self.origins)
            .field("max_count", &self.max_count)
            .field("usernames", &self.usernames)
            .field("series", &self.series)
            .field("collections", &self.collections)
            .field("since", &self.since)
            .field("since_last_update", &self.since_last_update)
            .field("expand_series", &self.expand_series)
            .field("force", &self.force)
            .field("retry_file", &self.retry_file)
            .field(
                "library",
                &self.library.as_ref().map(|library| &library.location),
            )
            .field("dry_run", &self.dry_run)
            .field("fanficfare_config", &self.fanficfare_config)
            .field("last_update_file", &self.last_update_file)
            .field("archive", &self.normalizer.canonical().as_str())
            .field("fetch_base", &self.normalizer.fetch_base().as_str())
            .field("output_dir", &self.output_dir)
            .field("workers", &self.workers)
            .field("cooldown", &self.cooldown)
            .field("url_provider", &self.url_provider)
            .field("fanficfare_bin", &self.fanficfare_bin)
            .field("calibredb_bin", &self.calibredb_bin)
            .field("inbox", &self.inbox)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for InboxSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboxSettings")
            .field("server", &self.server)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("folder", &self.folder)
            .field("mark_read", &self.mark_read)
            .finish()
    }
}

fn flag(cli: bool, file: Option<bool>) -> bool {
    cli || file.unwrap_or(false)
}

fn non_empty(values: Option<Vec<String>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .collect()
}

fn parse_archive_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidArchiveUrl {
        url: raw.to_owned(),
        message: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidArchiveUrl {
            url: raw.to_owned(),
            message: "must be http/https".to_owned(),
        });
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidArchiveUrl {
            url: raw.to_owned(),
            message: "must have a host".to_owned(),
        });
    }
    Ok(url)
}
