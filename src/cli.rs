use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log debug details (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Collect work URLs from the requested sources and download/update them.
    Download(DownloadArgs),
}

/// Every value is optional here: unset flags fall back to the config file, then to the
/// built-in defaults (see `config::Settings::resolve`).
#[derive(Default, Args)]
pub struct DownloadArgs {
    /// Archive username.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Contents of the archive session cookie.
    #[arg(short, long, env = "FICSYNC_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Comma-separated sources to collect work URLs from.
    #[arg(short, long, value_delimiter = ',')]
    pub sources: Option<Vec<String>>,

    /// Maximum number of works to get from each archive source.
    #[arg(short, long)]
    pub max_count: Option<usize>,

    /// Usernames whose works should be collected (source `usernames`).
    #[arg(long, value_delimiter = ',')]
    pub usernames: Option<Vec<String>>,

    /// Series ids whose works should be collected (source `series`).
    #[arg(long, value_delimiter = ',')]
    pub series: Option<Vec<String>>,

    /// Collection ids whose works should be collected (source `collections`).
    #[arg(long, value_delimiter = ',')]
    pub collections: Option<Vec<String>>,

    /// DD.MM.YYYY. Only collect works bookmarked/updated since this date.
    #[arg(short = 'S', long)]
    pub since: Option<String>,

    /// Only collect works changed since the last successful run of each source.
    #[arg(short = 'L', long)]
    pub since_last_update: bool,

    /// Get every work of a bookmarked series.
    #[arg(short, long)]
    pub expand_series: bool,

    /// Force an update even when the local copy has as many chapters as the archive.
    #[arg(short, long)]
    pub force: bool,

    /// Retry file: read as a source, then rewritten with the URLs that failed.
    #[arg(short, long)]
    pub input: Option<String>,

    /// Catalog library location (path or server URL). Without it, documents are only
    /// downloaded into --output-dir.
    #[arg(short, long)]
    pub library: Option<String>,

    /// Catalog server username.
    #[arg(long)]
    pub calibre_user: Option<String>,

    /// Catalog server password.
    #[arg(long, env = "FICSYNC_CALIBRE_PASSWORD", hide_env_values = true)]
    pub calibre_password: Option<String>,

    /// Only collect and list URLs; don't download anything.
    #[arg(short, long)]
    pub dry_run: bool,

    /// TOML config file. Command-line flags take precedence over it.
    #[arg(short = 'C', long)]
    pub config: Option<String>,

    /// Config file handed to the conversion tool.
    #[arg(short = 'F', long)]
    pub fanficfare_config: Option<String>,

    /// JSON file storing the date of the last successful run per source.
    #[arg(short = 'U', long)]
    pub last_update_file: Option<String>,

    /// Canonical archive base URL that collected work URLs are rewritten to.
    #[arg(long)]
    pub archive_url: Option<String>,

    /// Archive mirror to query instead of the canonical host.
    #[arg(long)]
    pub mirror: Option<String>,

    /// Where downloaded documents go when no library is set.
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Number of works processed at the same time.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Pause after a rate-limited or unavailable response, in seconds.
    #[arg(long)]
    pub cooldown_secs: Option<u64>,

    /// Program that lists work URLs for an archive source.
    #[arg(long)]
    pub url_provider: Option<String>,

    /// Conversion tool executable.
    #[arg(long)]
    pub fanficfare_bin: Option<String>,

    /// Catalog tool executable.
    #[arg(long)]
    pub calibredb_bin: Option<String>,

    /// Inbox server (source `imap`).
    #[arg(long)]
    pub email_server: Option<String>,

    /// Inbox user.
    #[arg(long)]
    pub email_user: Option<String>,

    /// Inbox password.
    #[arg(long, env = "FICSYNC_EMAIL_PASSWORD", hide_env_values = true)]
    pub email_password: Option<String>,

    /// Inbox folder.
    #[arg(long)]
    pub email_folder: Option<String>,

    /// Leave inbox messages unread after collecting their URLs.
    #[arg(long)]
    pub email_leave_unread: bool,
}
