//! Classification of one conversion-tool run.
//!
//! The tool reports most failures as prose on stdout/stderr (often with a zero exit
//! status), so the captured text is matched against known messages. Several messages
//! can appear in one output; checks run in this order and the first hit wins:
//!
//! 1. empty output
//! 2. already up to date (`... already contains N chapters.`)
//! 3. unrecognizable chapters (`... doesn't contain any recognizable chapters ...`)
//! 4. no source url in the local document
//! 5. story does not exist
//! 6. story hidden (ongoing challenge)
//! 7. HTTP 429
//! 8. HTTP 5xx from the origin or its proxy
//! 9. more chapters locally than at the source
//! 10. local file updated more recently than the story
//!
//! Anything else is a success; the metadata payload, if any, is the outermost
//! `{ ... }` block of the output.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

static RE_UP_TO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".* already contains \d* chapters\.").unwrap());

static RE_BAD_CHAPTERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r".* doesn't contain any recognizable chapters, probably from a different source\. {2}Not updating\.",
    )
    .unwrap()
});

static RE_NO_SOURCE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"No story URL found in epub to update\.").unwrap());

static RE_STORY_MISSING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Story does not exist: ").unwrap());

static RE_STORY_HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"This work is part of an ongoing challenge and will be revealed soon!").unwrap()
});

static RE_RATE_LIMITED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HTTP Error 429: Too Many Requests").unwrap());

static RE_ORIGIN_UNAVAILABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b5\d\d Server Error").unwrap());

static RE_MORE_CHAPTERS_LOCALLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".* contains \d* chapters, more than source: \d*\.").unwrap());

static RE_LOCAL_COPY_NEWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*File\(.*\.epub\) Updated\(.*\) more recently than Story\(.*\) - Skipping")
        .unwrap()
});

static RE_METADATA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// No failure or skip message matched. `metadata` is `None` when the output carried
    /// no JSON object.
    Success { metadata: Option<Metadata> },
    EmptyResponse,
    StoryUpToDate { message: String },
    UnrecognizableChapters,
    NoSourceUrl,
    StoryDeleted,
    StoryHidden,
    RateLimited,
    OriginUnavailable { message: String },
    MoreChaptersLocally,
    LocalCopyNewer { message: String },
}

/// What the caller should do about an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// Nothing to do for this work; not a failure.
    Skip,
    /// Retry later, after a cooldown.
    Transient,
    /// Needs attention; retried on the next run.
    Permanent,
}

/// Map captured tool output to exactly one outcome.
pub fn classify(output: &str) -> FetchOutcome {
    if output.trim().is_empty() {
        return FetchOutcome::EmptyResponse;
    }
    if let Some(found) = RE_UP_TO_DATE.find(output) {
        return FetchOutcome::StoryUpToDate {
            message: found.as_str().trim().to_owned(),
        };
    }
    if RE_BAD_CHAPTERS.is_match(output) {
        return FetchOutcome::UnrecognizableChapters;
    }
    if RE_NO_SOURCE_URL.is_match(output) {
        return FetchOutcome::NoSourceUrl;
    }
    if RE_STORY_MISSING.is_match(output) {
        return FetchOutcome::StoryDeleted;
    }
    if RE_STORY_HIDDEN.is_match(output) {
        return FetchOutcome::StoryHidden;
    }
    if RE_RATE_LIMITED.is_match(output) {
        return FetchOutcome::RateLimited;
    }
    if let Some(found) = RE_ORIGIN_UNAVAILABLE.find(output) {
        return FetchOutcome::OriginUnavailable {
            message: found.as_str().to_owned(),
        };
    }
    if RE_MORE_CHAPTERS_LOCALLY.is_match(output) {
        return FetchOutcome::MoreChaptersLocally;
    }
    if let Some(found) = RE_LOCAL_COPY_NEWER.find(output) {
        return FetchOutcome::LocalCopyNewer {
            message: found.as_str().trim().to_owned(),
        };
    }

    FetchOutcome::Success {
        metadata: extract_metadata(output),
    }
}

fn extract_metadata(output: &str) -> Option<Metadata> {
    let block = RE_METADATA.find(output)?;
    match serde_json::from_str::<serde_json::Value>(block.as_str()) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(%err, "output has a brace block that is not json");
            None
        }
    }
}

impl FetchOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            FetchOutcome::Success { .. } => Disposition::Success,
            FetchOutcome::StoryUpToDate { .. } => Disposition::Skip,
            FetchOutcome::RateLimited | FetchOutcome::OriginUnavailable { .. } => {
                Disposition::Transient
            }
            FetchOutcome::EmptyResponse
            | FetchOutcome::UnrecognizableChapters
            | FetchOutcome::NoSourceUrl
            | FetchOutcome::StoryDeleted
            | FetchOutcome::StoryHidden
            | FetchOutcome::MoreChaptersLocally
            | FetchOutcome::LocalCopyNewer { .. } => Disposition::Permanent,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Success { .. } => f.write_str("downloaded"),
            FetchOutcome::EmptyResponse => f.write_str("the conversion tool printed nothing"),
            FetchOutcome::StoryUpToDate { message } => write!(f, "story is up to date: {message}"),
            FetchOutcome::UnrecognizableChapters => f.write_str(
                "something is wrong with the site or the local copy: no chapters found",
            ),
            FetchOutcome::NoSourceUrl => {
                f.write_str("no story url in the local copy to update from; fix its metadata")
            }
            FetchOutcome::StoryDeleted => {
                f.write_str("no story found at this url; it might have been deleted")
            }
            FetchOutcome::StoryHidden => f.write_str("the story at this url has been hidden"),
            FetchOutcome::RateLimited => f.write_str("too many requests; rate limited"),
            FetchOutcome::OriginUnavailable { message } => {
                write!(f, "the archive is temporarily unavailable ({message})")
            }
            FetchOutcome::MoreChaptersLocally => {
                f.write_str("the local copy has more chapters than the archive")
            }
            FetchOutcome::LocalCopyNewer { message } => {
                write!(f, "local copy is newer than the story: {message}")
            }
        }
    }
}
