use std::collections::BTreeSet;
use std::fmt;

use crate::config::ConfigError;

/// Where work URLs come from.
///
/// Declaration order is collection order: the retry file is always drained first, the
/// rest follow in a fixed sequence. `Ord` is derived so a `BTreeSet<Origin>` iterates in
/// exactly that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    RetryFile,
    Later,
    Bookmarks,
    Works,
    Gifts,
    WorkSubscriptions,
    SeriesSubscriptions,
    UserSubscriptions,
    Usernames,
    Series,
    Collections,
    Stdin,
    Inbox,
}

/// Parameterized origins keep one watermark per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetKind {
    Usernames,
    Series,
    Collections,
}

pub const ALL_SUBSCRIPTIONS: &str = "all_subscriptions";

impl Origin {
    pub const ALL: [Origin; 13] = [
        Origin::RetryFile,
        Origin::Later,
        Origin::Bookmarks,
        Origin::Works,
        Origin::Gifts,
        Origin::WorkSubscriptions,
        Origin::SeriesSubscriptions,
        Origin::UserSubscriptions,
        Origin::Usernames,
        Origin::Series,
        Origin::Collections,
        Origin::Stdin,
        Origin::Inbox,
    ];

    pub const SUBSCRIPTIONS: [Origin; 3] = [
        Origin::SeriesSubscriptions,
        Origin::UserSubscriptions,
        Origin::WorkSubscriptions,
    ];

    /// Name used on the command line, in config files and as the watermark key.
    pub fn name(self) -> &'static str {
        match self {
            Origin::RetryFile => "file",
            Origin::Later => "later",
            Origin::Bookmarks => "bookmarks",
            Origin::Works => "works",
            Origin::Gifts => "gifts",
            Origin::WorkSubscriptions => "work_subscriptions",
            Origin::SeriesSubscriptions => "series_subscriptions",
            Origin::UserSubscriptions => "user_subscriptions",
            Origin::Usernames => "usernames",
            Origin::Series => "series",
            Origin::Collections => "collections",
            Origin::Stdin => "stdin",
            Origin::Inbox => "imap",
        }
    }

    /// Human label for progress logs.
    pub fn label(self) -> &'static str {
        match self {
            Origin::RetryFile => "retry file",
            Origin::Later => "Marked for Later",
            Origin::Bookmarks => "bookmarks",
            Origin::Works => "user's works",
            Origin::Gifts => "user's gifts",
            Origin::WorkSubscriptions => "work subscriptions",
            Origin::SeriesSubscriptions => "series subscriptions",
            Origin::UserSubscriptions => "user subscriptions",
            Origin::Usernames => "usernames",
            Origin::Series => "series",
            Origin::Collections => "collections",
            Origin::Stdin => "stdin",
            Origin::Inbox => "inbox",
        }
    }

    pub fn parse(raw: &str) -> Option<Origin> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw == "inbox" {
            return Some(Origin::Inbox);
        }
        Origin::ALL.into_iter().find(|origin| origin.name() == raw)
    }

    pub fn target_kind(self) -> Option<TargetKind> {
        match self {
            Origin::Usernames => Some(TargetKind::Usernames),
            Origin::Series => Some(TargetKind::Series),
            Origin::Collections => Some(TargetKind::Collections),
            _ => None,
        }
    }

    /// Origins served by the archive and therefore needing login credentials.
    pub fn needs_archive_login(self) -> bool {
        !matches!(self, Origin::RetryFile | Origin::Stdin | Origin::Inbox)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TargetKind {
    pub fn key(self) -> &'static str {
        match self {
            TargetKind::Usernames => "usernames",
            TargetKind::Series => "series",
            TargetKind::Collections => "collections",
        }
    }
}

/// Parse a list of source names, expanding `all_subscriptions`.
pub fn parse_sources<S: AsRef<str>>(names: &[S]) -> Result<BTreeSet<Origin>, ConfigError> {
    let mut origins = BTreeSet::new();
    for name in names {
        let name = name.as_ref().trim();
        if name.is_empty() {
            continue;
        }
        if name.eq_ignore_ascii_case(ALL_SUBSCRIPTIONS) {
            origins.extend(Origin::SUBSCRIPTIONS);
            continue;
        }
        let origin = Origin::parse(name).ok_or_else(|| ConfigError::UnknownSource {
            name: name.to_owned(),
            valid: valid_source_names(),
        })?;
        origins.insert(origin);
    }
    Ok(origins)
}

pub fn valid_source_names() -> String {
    let mut names: Vec<&str> = Origin::ALL.iter().map(|origin| origin.name()).collect();
    names.push(ALL_SUBSCRIPTIONS);
    names.join(", ")
}
