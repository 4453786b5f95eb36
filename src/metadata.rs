//! Maps the conversion tool's metadata object onto catalog fields.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::catalog::Fields;
use crate::outcome::Metadata;

/// Tag kinds kept in their own multi-value catalog columns.
pub const TAG_TYPES: [&str; 8] = [
    "ao3categories",
    "characters",
    "fandoms",
    "freeformtags",
    "rating",
    "ships",
    "status",
    "warnings",
];

/// Extra series columns, for works that belong to more than one series.
pub const SERIES_SLOTS: [&str; 4] = ["series00", "series01", "series02", "series03"];

pub const WORDS_FIELD: &str = "words";

static RE_SERIES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*) \[(.*)\]$").unwrap());

fn text(metadata: &Metadata, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::Null => None,
        Value::String(value) => Some(value.trim().to_owned()),
        other => Some(other.to_string()),
    }
}

/// Build the fields to write onto a freshly added entry.
pub fn catalog_fields(metadata: &Metadata) -> Fields {
    let mut fields = Fields::new();

    if let Some(words) = word_count(metadata) {
        fields.insert(format!("#{WORDS_FIELD}"), words);
    }

    let primary = text(metadata, "series").unwrap_or_default();
    if !primary.is_empty() {
        match RE_SERIES.captures(&primary) {
            Some(caps) => {
                fields.insert("series".to_owned(), caps[1].to_owned());
                fields.insert("series_index".to_owned(), caps[2].to_owned());
            }
            None => {
                fields.insert("series".to_owned(), primary.clone());
            }
        }
    }
    for slot in SERIES_SLOTS {
        if let Some(value) = text(metadata, slot)
            && !value.is_empty()
            && value != primary
        {
            fields.insert(format!("#{slot}"), value);
        }
    }

    // The tool writes every tag into the generic column; they live in the typed
    // columns instead.
    fields.insert("tags".to_owned(), String::new());
    for tag_type in TAG_TYPES {
        let Some(value) = text(metadata, tag_type) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let tags: Vec<String> = value.split(", ").map(clean_tag).collect();
        fields.insert(format!("#{tag_type}"), tags.join(","));
    }

    fields
}

/// Replace characters the catalog mangles in tag values.
pub fn clean_tag(tag: &str) -> String {
    tag.replace('"', "'")
        .replace("...", "…")
        .replace('.', "．")
        .replace("&amp;", "&")
}

/// `"12,345"` becomes `"12345"`. An empty count clears the field, so an unknown count
/// is not confused with a work that really has no words.
fn word_count(metadata: &Metadata) -> Option<String> {
    match metadata.get("numWords")? {
        Value::Number(number) => Some(number.to_string()),
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Some(String::new());
            }
            let digits: String = raw.chars().filter(|c| !matches!(c, ',' | ' ')).collect();
            match digits.parse::<u64>() {
                Ok(words) => Some(words.to_string()),
                Err(_) => {
                    tracing::warn!(value = raw, "word count is not a number");
                    None
                }
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(value: serde_json::Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn full_mapping() {
        let fields = catalog_fields(&metadata(serde_json::json!({
            "numWords": "12,345",
            "series": "Salt & Iron [3]",
            "series00": "Salt & Iron [3]",
            "series01": "Other Series [1]",
            "series02": "",
            "characters": "Jane \"JJ\" Grey, Dr. Who",
            "fandoms": "Some Fandom",
            "ships": "",
        })));

        let expected: Fields = [
            ("#words", "12345"),
            ("series", "Salt & Iron"),
            ("series_index", "3"),
            ("#series01", "Other Series [1]"),
            ("tags", ""),
            ("#characters", "Jane 'JJ' Grey,Dr． Who"),
            ("#fandoms", "Some Fandom"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        assert_eq!(fields, expected);
    }

    #[test]
    fn empty_word_count_clears_the_field() {
        let fields = catalog_fields(&metadata(serde_json::json!({"numWords": ""})));
        assert_eq!(fields.get("#words").map(String::as_str), Some(""));

        let fields = catalog_fields(&metadata(serde_json::json!({})));
        assert!(!fields.contains_key("#words"));
        assert_eq!(fields.get("tags").map(String::as_str), Some(""));
    }

    #[test]
    fn series_without_index_is_kept_whole() {
        let fields = catalog_fields(&metadata(serde_json::json!({"series": "Loose"})));
        assert_eq!(fields.get("series").map(String::as_str), Some("Loose"));
        assert!(!fields.contains_key("series_index"));
    }

    #[test]
    fn tag_cleanup() {
        assert_eq!(clean_tag("Wait... What"), "Wait… What");
        assert_eq!(clean_tag("Tom &amp; Jerry"), "Tom & Jerry");
    }
}
