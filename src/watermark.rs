//! Per-source "last successful sync" dates.
//!
//! On disk this is a JSON object keyed by `sources` (one date per requested origin) and
//! by `usernames` / `series` / `collections` (one date per target of a parameterized
//! origin), dates written as `DD.MM.YYYY`:
//!
//! ```json
//! {"sources": {"bookmarks": "01.02.2025"}, "usernames": {"someone": "01.02.2025"}}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use chrono::NaiveDate;

use crate::config::ConfigError;
use crate::origin::Origin;

pub const DATE_FORMAT: &str = "%d.%m.%Y";
pub const SOURCES_KEY: &str = "sources";

/// One watermark slot: an origin, or one target of a parameterized origin.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatermarkKey {
    pub origin: Origin,
    pub target: Option<String>,
}

impl WatermarkKey {
    pub fn origin(origin: Origin) -> Self {
        Self {
            origin,
            target: None,
        }
    }

    pub fn target(origin: Origin, target: impl Into<String>) -> Self {
        Self {
            origin,
            target: Some(target.into()),
        }
    }

    fn slot(&self) -> (&'static str, &str) {
        match (&self.target, self.origin.target_kind()) {
            (Some(target), Some(kind)) => (kind.key(), target.as_str()),
            _ => (SOURCES_KEY, self.origin.name()),
        }
    }
}

/// How far back each origin should be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SincePolicy {
    pub since: Option<NaiveDate>,
    pub since_last_update: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watermarks {
    entries: BTreeMap<String, BTreeMap<String, NaiveDate>>,
}

impl Watermarks {
    /// Read the stored watermarks. A missing or empty file is an empty store; anything
    /// else that doesn't parse is a fatal configuration error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidWatermarkFile {
            path: path.display().to_string(),
            message,
        };

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(invalid(err.to_string())),
        };
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: BTreeMap<String, BTreeMap<String, String>> =
            serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;

        let mut entries = BTreeMap::new();
        for (group, dates) in raw {
            let mut parsed = BTreeMap::new();
            for (name, date) in dates {
                let value = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|_| {
                    invalid(format!("date for {group}.{name} is not DD.MM.YYYY: '{date}'"))
                })?;
                parsed.insert(name, value);
            }
            entries.insert(group, parsed);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &WatermarkKey) -> Option<NaiveDate> {
        let (group, name) = key.slot();
        self.entries.get(group)?.get(name).copied()
    }

    /// The date an origin should be fetched back to; `None` means fetch everything.
    pub fn resolve(&self, key: &WatermarkKey, policy: SincePolicy) -> Option<NaiveDate> {
        if policy.since_last_update {
            return self.get(key).or(policy.since);
        }
        policy.since
    }

    /// Stamp `today` on every requested slot. This is deliberately coarse: the date
    /// reached by each fetch is not tracked.
    pub fn advance<'a>(&mut self, keys: impl IntoIterator<Item = &'a WatermarkKey>, today: NaiveDate) {
        for key in keys {
            let (group, name) = key.slot();
            self.entries
                .entry(group.to_owned())
                .or_default()
                .insert(name.to_owned(), today);
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw: BTreeMap<&str, BTreeMap<&str, String>> = self
            .entries
            .iter()
            .map(|(group, dates)| {
                let dates = dates
                    .iter()
                    .map(|(name, date)| (name.as_str(), date.format(DATE_FORMAT).to_string()))
                    .collect();
                (group.as_str(), dates)
            })
            .collect();
        write_json_atomic(path, &raw)
    }

    /// Load the current file, advance the given slots and write it back, keeping any
    /// slots that weren't requested this run.
    pub fn commit<'a>(
        path: &Path,
        keys: impl IntoIterator<Item = &'a WatermarkKey>,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut watermarks = Self::load(path).context("reload last-update file")?;
        watermarks.advance(keys, today);
        tracing::info!(path = %path.display(), date = %today.format(DATE_FORMAT), "updating last-update file");
        watermarks.save(path)
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    std::fs::write(&tmp_path, &data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
