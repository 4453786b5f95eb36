use std::process::Command;

use anyhow::Context as _;
use chrono::NaiveDate;
use url::Url;

use crate::config::InboxSettings;
use crate::origin::Origin;
use crate::process::run_captured;
use crate::watermark::DATE_FORMAT;

/// One query against a URL source.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub origin: Origin,
    pub target: Option<&'a str>,
    pub user: Option<&'a str>,
    pub cookie: Option<&'a str>,
    pub limit: Option<usize>,
    pub since: Option<NaiveDate>,
    pub sort_by_updated: bool,
    pub expand_series: bool,
    pub base_url: &'a Url,
}

/// Lists work URLs for archive origins (and the inbox). Scraping and login live behind
/// this seam.
pub trait UrlProvider: Send + Sync {
    fn fetch(&self, request: &FetchRequest<'_>) -> anyhow::Result<Vec<String>>;
}

/// Runs an external URL-lister program and reads one URL per stdout line.
///
/// `<bin> <origin> [--target T] [--user U] [--limit N] [--since DD.MM.YYYY]
/// [--sort-by-updated] [--expand-series] --base-url <url>`; the session cookie and inbox
/// password travel in the environment, never on the command line.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    bin: String,
    inbox: InboxSettings,
}

impl CommandProvider {
    pub fn new(bin: impl Into<String>, inbox: InboxSettings) -> Self {
        Self {
            bin: bin.into(),
            inbox,
        }
    }

    fn command(&self, request: &FetchRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg(request.origin.name());
        if let Some(target) = request.target {
            cmd.args(["--target", target]);
        }
        if let Some(user) = request.user {
            cmd.args(["--user", user]);
        }
        if let Some(limit) = request.limit {
            cmd.args(["--limit", &limit.to_string()]);
        }
        if let Some(since) = request.since {
            cmd.args(["--since", &since.format(DATE_FORMAT).to_string()]);
        }
        if request.sort_by_updated {
            cmd.arg("--sort-by-updated");
        }
        if request.expand_series {
            cmd.arg("--expand-series");
        }
        cmd.args(["--base-url", request.base_url.as_str()]);
        if let Some(cookie) = request.cookie {
            cmd.env("FICSYNC_COOKIE", cookie);
        }

        if request.origin == Origin::Inbox {
            if let Some(server) = self.inbox.server.as_deref() {
                cmd.args(["--server", server]);
            }
            if let Some(user) = self.inbox.user.as_deref() {
                cmd.args(["--email-user", user]);
            }
            cmd.args(["--folder", &self.inbox.folder]);
            if self.inbox.mark_read {
                cmd.arg("--mark-read");
            }
            if let Some(password) = self.inbox.password.as_deref() {
                cmd.env("FICSYNC_EMAIL_PASSWORD", password);
            }
        }

        cmd
    }
}

impl UrlProvider for CommandProvider {
    fn fetch(&self, request: &FetchRequest<'_>) -> anyhow::Result<Vec<String>> {
        tracing::debug!(
            bin = %self.bin,
            origin = %request.origin,
            target = ?request.target,
            limit = ?request.limit,
            since = ?request.since,
            "url provider"
        );

        let captured = run_captured(&mut self.command(request))
            .with_context(|| format!("run url provider for {}", request.origin))?;
        if !captured.success() {
            anyhow::bail!(
                "url provider failed for {} ({}): {}",
                request.origin,
                captured.status,
                captured.text.trim()
            );
        }

        Ok(parse_url_lines(&captured.text))
    }
}

fn parse_url_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_owned)
        .collect()
}
