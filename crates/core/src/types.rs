use serde::{Deserialize, Serialize};

/// Record identifiers are opaque strings assigned by the data store.
pub type RecordId = String;

/// One resolved display unit for a record.
///
/// Only `image_url` is ever rewritten after resolution (attachment URLs
/// expire and are re-fetched in place).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    pub id: RecordId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Slide {
    /// A slide carrying only its record id.
    pub fn empty(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Fold a newer resolution into this one without blanking any field
    /// that is already populated. A newer image URL always wins.
    pub fn merge_from(&mut self, newer: Slide) {
        if !newer.title.is_empty() {
            self.title = newer.title;
        }
        if newer.desc.as_deref().is_some_and(|d| !d.is_empty()) {
            self.desc = newer.desc;
        }
        if newer.image_url.is_some() {
            self.image_url = newer.image_url;
        }
    }
}

/// Which step of a load cycle produced a published slide list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPhase {
    /// Every target record was already cached.
    Cached,
    /// The first uncached record resolved; the rest are still in flight.
    Optimistic,
    /// Every target record resolved.
    Complete,
}

/// Coarse field type, enough to tell attachment fields apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Number,
    DateTime,
    Attachment,
    Other,
}

/// Field metadata as listed by a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub is_primary: bool,
}

/// Table listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub id: String,
    pub name: String,
}

/// View listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMeta {
    pub id: String,
    pub name: String,
}
