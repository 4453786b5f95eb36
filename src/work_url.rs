use std::fmt;

use url::Url;

pub const DEFAULT_ARCHIVE_URL: &str = "https://archiveofourown.org";

/// Canonical identifier for one work: `<canonical base>/works/<id>`, with any chapter
/// suffix, query or fragment dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkUrl(String);

impl WorkUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric work id (the last path segment).
    pub fn work_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }
}

impl fmt::Display for WorkUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a recognizable work url: {url}")]
pub struct MalformedWorkUrl {
    pub url: String,
}

/// Rewrites mirror hosts to the canonical host and strips chapter paths.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    canonical: Url,
    mirror: Option<Url>,
}

impl UrlNormalizer {
    pub fn new(canonical: Url, mirror: Option<Url>) -> Self {
        let mirror = mirror.filter(|mirror| !same_origin(mirror, &canonical));
        Self { canonical, mirror }
    }

    pub fn canonical(&self) -> &Url {
        &self.canonical
    }

    /// Base URL the archive should be queried through (the mirror when one is set).
    pub fn fetch_base(&self) -> &Url {
        self.mirror.as_ref().unwrap_or(&self.canonical)
    }

    pub fn normalize(&self, raw: &str) -> Result<WorkUrl, MalformedWorkUrl> {
        let malformed = || MalformedWorkUrl {
            url: raw.to_owned(),
        };

        let parsed = Url::parse(raw.trim()).map_err(|_| malformed())?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(malformed());
        }
        let host = parsed.host_str().ok_or_else(malformed)?;

        let mut segments = parsed.path_segments().ok_or_else(malformed)?;
        if segments.next() != Some("works") {
            return Err(malformed());
        }
        let work_id = segments.next().unwrap_or_default();
        if work_id.is_empty() || !work_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        let is_known_host = same_origin_host(&parsed, &self.canonical)
            || self
                .mirror
                .as_ref()
                .is_some_and(|mirror| same_origin_host(&parsed, mirror));

        let base = if is_known_host {
            origin_string(&self.canonical)
        } else {
            match parsed.port() {
                Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
                None => format!("{}://{host}", parsed.scheme()),
            }
        };

        Ok(WorkUrl(format!("{base}/works/{work_id}")))
    }
}

#[cfg(test)]
impl UrlNormalizer {
    pub(crate) fn archive_default() -> Self {
        let canonical = Url::parse(DEFAULT_ARCHIVE_URL).expect("default archive url is valid");
        Self::new(canonical, None)
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && same_origin_host(a, b)
}

/// Host and port match; scheme is ignored so `http://` links to the archive still count.
fn same_origin_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port() == b.port()
}

fn origin_string(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    }
}
