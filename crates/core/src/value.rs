//! Schema-less cell values and the pure resolvers over them.
//!
//! A data store hands back cells of arbitrary shape: plain strings, numbers,
//! rich-text segment lists, linked-record objects, attachment lists, or JSON
//! encoded into a string. [`RawCellValue`] captures that shape explicitly and
//! the three resolvers reduce it to what a slide needs:
//!
//! - [`to_plain_text`]: display text.
//! - [`to_timestamp`]: epoch milliseconds for ordering.
//! - [`pick_attachment_url`]: the best image URL of the first attachment.
//!
//! All resolvers are total: malformed input degrades to an empty value,
//! never an error.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};

/// Keys probed on object-shaped values, in precedence order.
const TEXT_KEYS: [&str; 4] = ["text", "name", "title", "value"];

/// Keys probed on an attachment item, in precedence order: thumbnail,
/// preview, generic picture, generic url, storage url.
const ATTACHMENT_URL_KEYS: [&str; 10] = [
    "thumbnail_url",
    "thumbnailUrl",
    "preview_url",
    "previewUrl",
    "pic_url",
    "picUrl",
    "url",
    "link",
    "tmp_url",
    "tmpUrl",
];

/// Naive date-time layouts accepted by [`to_timestamp`], interpreted as UTC.
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// An untyped cell value as returned by the data store.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawCellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Sequence(Vec<RawCellValue>),
    Record(BTreeMap<String, RawCellValue>),
}

impl RawCellValue {
    /// Convenience constructor for text cells.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Build a record value from `(key, value)` pairs.
    pub fn record<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, RawCellValue)>,
    {
        Self::Record(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert to a `serde_json::Value`, printing integral numbers without
    /// a fractional part. Record keys come out sorted.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Text(s) => Value::String(s.clone()),
            Self::Sequence(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Record(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for RawCellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for RawCellValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Record(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for RawCellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for RawCellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

/// Reduce any cell value to display text.
pub fn to_plain_text(value: &RawCellValue) -> String {
    match value {
        RawCellValue::Null => String::new(),
        RawCellValue::Bool(b) => b.to_string(),
        RawCellValue::Number(n) => n.to_string(),
        RawCellValue::Text(s) => text_to_plain(s),
        RawCellValue::Sequence(items) => items
            .iter()
            .map(item_text)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        RawCellValue::Record(map) => match shaped_field(map) {
            Some(inner) => to_plain_text(inner),
            None => serde_json::to_string(&value.to_json()).unwrap_or_default(),
        },
    }
}

fn text_to_plain(raw: &str) -> String {
    let trimmed = raw.trim();
    match parse_embedded_json(trimmed) {
        Some(parsed) => to_plain_text(&parsed),
        None => trimmed.to_string(),
    }
}

/// Text of one element of a sequence: primitives use their string form,
/// objects go through the key precedence, anything else is empty.
fn item_text(item: &RawCellValue) -> String {
    match item {
        RawCellValue::Null => String::new(),
        RawCellValue::Bool(_) | RawCellValue::Number(_) | RawCellValue::Text(_) => {
            to_plain_text(item)
        }
        RawCellValue::Record(map) => shaped_field(map).map(to_plain_text).unwrap_or_default(),
        RawCellValue::Sequence(_) => String::new(),
    }
}

/// First non-null value among `text`, `name`, `title`, `value`.
fn shaped_field(map: &BTreeMap<String, RawCellValue>) -> Option<&RawCellValue> {
    TEXT_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find(|v| !v.is_null())
}

/// Parse text that looks JSON-encoded (`[...]` or `{...}`).
fn parse_embedded_json(text: &str) -> Option<RawCellValue> {
    let bracketed = (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('{') && text.ends_with('}'));
    if !bracketed {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .map(RawCellValue::from)
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Reduce any cell value to epoch milliseconds; `0.0` when nothing parses.
pub fn to_timestamp(value: &RawCellValue) -> f64 {
    match value {
        RawCellValue::Number(n) if n.is_finite() => *n,
        RawCellValue::Text(s) => text_to_timestamp(s),
        RawCellValue::Sequence(_) => text_to_timestamp(&to_plain_text(value)),
        RawCellValue::Record(map) => shaped_field(map).map(to_timestamp).unwrap_or(0.0),
        _ => 0.0,
    }
}

fn text_to_timestamp(raw: &str) -> f64 {
    let text = raw.trim();
    if text.is_empty() {
        return 0.0;
    }
    if let Some(ms) = parse_date_millis(text) {
        return ms as f64;
    }
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

fn parse_date_millis(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.timestamp_millis());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Attachment URL
// ---------------------------------------------------------------------------

/// Best image URL of the first attachment item, if any.
pub fn pick_attachment_url(value: &RawCellValue) -> Option<String> {
    let items = attachment_items(value);
    match items.first()? {
        RawCellValue::Record(map) => ATTACHMENT_URL_KEYS.iter().find_map(|key| match map.get(*key) {
            Some(RawCellValue::Text(url)) if !url.trim().is_empty() => {
                Some(url.trim().to_string())
            }
            _ => None,
        }),
        RawCellValue::Text(url) if looks_like_url(url) => Some(url.trim().to_string()),
        _ => None,
    }
}

fn attachment_items(value: &RawCellValue) -> Vec<RawCellValue> {
    match value {
        RawCellValue::Sequence(items) => items.clone(),
        RawCellValue::Record(_) => vec![value.clone()],
        RawCellValue::Text(s) => match parse_embedded_json(s.trim()) {
            Some(parsed) => attachment_items(&parsed),
            None => vec![value.clone()],
        },
        _ => Vec::new(),
    }
}

fn looks_like_url(text: &str) -> bool {
    let text = text.trim();
    ["http://", "https://", "//", "data:image/", "blob:"]
        .iter()
        .any(|prefix| text.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn v(value: serde_json::Value) -> RawCellValue {
        RawCellValue::from(value)
    }

    // -----------------------------------------------------------------------
    // to_plain_text
    // -----------------------------------------------------------------------

    #[test]
    fn plain_text_trims_non_bracketed_text() {
        assert_eq!(to_plain_text(&v(json!("  hello world \n"))), "hello world");
    }

    #[test]
    fn plain_text_null_is_empty() {
        assert_eq!(to_plain_text(&RawCellValue::Null), "");
    }

    #[test]
    fn plain_text_numbers_and_bools() {
        assert_eq!(to_plain_text(&v(json!(42))), "42");
        assert_eq!(to_plain_text(&v(json!(3.5))), "3.5");
        assert_eq!(to_plain_text(&v(json!(true))), "true");
    }

    #[test]
    fn plain_text_segment_list_joins_with_space() {
        let cell = v(json!([
            {"type": "text", "text": "Quarterly"},
            {"type": "mention", "name": "Alice"},
            {"title": "Report"},
            {"value": 7},
            {"other": "ignored"},
            null,
            "tail"
        ]));
        assert_eq!(to_plain_text(&cell), "Quarterly Alice Report 7 tail");
    }

    #[test]
    fn plain_text_precedence_text_over_name() {
        let cell = v(json!({"name": "n", "text": "t", "title": "x"}));
        assert_eq!(to_plain_text(&cell), "t");
    }

    #[test]
    fn plain_text_null_key_falls_through() {
        let cell = v(json!({"text": null, "name": "fallback"}));
        assert_eq!(to_plain_text(&cell), "fallback");
    }

    #[test]
    fn plain_text_unshaped_object_serializes_sorted() {
        let cell = v(json!({"b": 2, "a": "x"}));
        assert_eq!(to_plain_text(&cell), r#"{"a":"x","b":2}"#);
    }

    #[test]
    fn plain_text_parses_json_encoded_text() {
        let cell = v(json!(r#" [{"text":"A"},{"text":"B"}] "#));
        assert_eq!(to_plain_text(&cell), "A B");
    }

    #[test]
    fn plain_text_invalid_json_returns_trimmed_text() {
        let cell = v(json!("[not json]"));
        assert_eq!(to_plain_text(&cell), "[not json]");
    }

    #[test]
    fn plain_text_is_deterministic() {
        let cell = v(json!([{"name": "a"}, {"z": 1, "y": [1, 2]}]));
        assert_eq!(to_plain_text(&cell), to_plain_text(&cell.clone()));
    }

    // -----------------------------------------------------------------------
    // to_timestamp
    // -----------------------------------------------------------------------

    #[test]
    fn timestamp_number_passthrough() {
        assert_eq!(to_timestamp(&v(json!(1_700_000_000_000_i64))), 1.7e12);
    }

    #[test]
    fn timestamp_parses_iso_date() {
        assert_eq!(
            to_timestamp(&v(json!("2024-01-02T00:00:00Z"))),
            1_704_153_600_000.0
        );
        assert_eq!(to_timestamp(&v(json!("2024-01-02"))), 1_704_153_600_000.0);
        assert_eq!(
            to_timestamp(&v(json!("2024/01/02 00:00"))),
            1_704_153_600_000.0
        );
    }

    #[test]
    fn timestamp_parses_numeric_text() {
        assert_eq!(to_timestamp(&v(json!(" 12345 "))), 12345.0);
    }

    #[test]
    fn timestamp_garbage_is_zero() {
        assert_eq!(to_timestamp(&v(json!("soon"))), 0.0);
        assert_eq!(to_timestamp(&v(json!(true))), 0.0);
        assert_eq!(to_timestamp(&RawCellValue::Null), 0.0);
    }

    #[test]
    fn timestamp_sequence_reduces_through_text() {
        assert_eq!(to_timestamp(&v(json!([{"text": "2024-01-02"}]))), 1_704_153_600_000.0);
    }

    #[test]
    fn timestamp_object_uses_field_precedence() {
        assert_eq!(to_timestamp(&v(json!({"value": 99}))), 99.0);
        assert_eq!(to_timestamp(&v(json!({"other": 99}))), 0.0);
    }

    // -----------------------------------------------------------------------
    // pick_attachment_url
    // -----------------------------------------------------------------------

    #[test]
    fn attachment_prefers_thumbnail() {
        let cell = v(json!([
            {"url": "https://a/full.png", "thumbnail_url": "https://a/thumb.png"},
            {"url": "https://b/second.png"}
        ]));
        assert_eq!(
            pick_attachment_url(&cell).as_deref(),
            Some("https://a/thumb.png")
        );
    }

    #[test]
    fn attachment_skips_empty_keys() {
        let cell = v(json!([{"thumbnail_url": "", "tmp_url": "https://t/1"}]));
        assert_eq!(pick_attachment_url(&cell).as_deref(), Some("https://t/1"));
    }

    #[test]
    fn attachment_single_object_is_normalized() {
        let cell = v(json!({"url": "https://x/y.jpg"}));
        assert_eq!(pick_attachment_url(&cell).as_deref(), Some("https://x/y.jpg"));
    }

    #[test]
    fn attachment_only_first_item_is_scanned() {
        let cell = v(json!([{"name": "doc.pdf"}, {"url": "https://b/2.png"}]));
        assert_eq!(pick_attachment_url(&cell), None);
    }

    #[test]
    fn attachment_bare_url_text() {
        assert_eq!(
            pick_attachment_url(&v(json!("https://cdn/img.webp"))).as_deref(),
            Some("https://cdn/img.webp")
        );
        assert_eq!(pick_attachment_url(&v(json!("not a url"))), None);
    }

    #[test]
    fn attachment_none_for_empty_inputs() {
        assert_eq!(pick_attachment_url(&RawCellValue::Null), None);
        assert_eq!(pick_attachment_url(&v(json!([]))), None);
        assert_eq!(pick_attachment_url(&v(json!(5))), None);
    }

    // -----------------------------------------------------------------------
    // Serde
    // -----------------------------------------------------------------------

    #[test]
    fn deserializes_every_variant() {
        let cell: RawCellValue =
            serde_json::from_str(r#"[null, true, 1, "s", {"k": [2]}]"#).unwrap();
        assert_eq!(
            cell,
            RawCellValue::Sequence(vec![
                RawCellValue::Null,
                RawCellValue::Bool(true),
                RawCellValue::Number(1.0),
                RawCellValue::text("s"),
                RawCellValue::record([("k", RawCellValue::Sequence(vec![2.0.into()]))]),
            ])
        );
    }

    #[test]
    fn serializes_integral_numbers_without_fraction() {
        let cell = RawCellValue::record([("n", RawCellValue::Number(3.0))]);
        assert_eq!(serde_json::to_string(&cell).unwrap(), r#"{"n":3}"#);
    }
}
