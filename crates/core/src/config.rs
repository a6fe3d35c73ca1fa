//! Persisted carousel configuration.
//!
//! The host stores one JSON document per dashboard block. Current documents
//! carry a `pages` array; documents written before multi-page support hold
//! a single page's fields at the top level and are upgraded on load. Either
//! form may arrive wrapped as `{ "customConfig": { ... } }`.
//!
//! Loading is lenient (missing fields take defaults, out-of-range timings are
//! clamped where they are used). Saving is strict: [`AppConfig::check`] runs
//! the `validator` rules plus page-id uniqueness.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ConfigError;

/// Pages shown concurrently when more pages exist than fit on screen.
pub const MAX_ACTIVE_PAGES: usize = 4;

/// Lower bound on the slide rotation interval.
pub const MIN_ROTATION_INTERVAL: Duration = Duration::from_millis(1000);

/// Lower bound on the data refresh interval.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(3000);

/// Lower bound on the page-window rotation interval.
pub const MIN_GROUP_INTERVAL: Duration = Duration::from_millis(1000);

pub const DEFAULT_LIMIT: u32 = 10;
pub const DEFAULT_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_REFRESH_MS: u64 = 8000;
pub const DEFAULT_GROUP_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_COLOR: &str = "var(--ccm-chart-N700)";

fn default_true() -> bool {
    true
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_refresh_ms() -> u64 {
    DEFAULT_REFRESH_MS
}

fn default_group_interval_ms() -> u64 {
    DEFAULT_GROUP_INTERVAL_MS
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

// ---------------------------------------------------------------------------
// PageConfig
// ---------------------------------------------------------------------------

/// One independently configured carousel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub id: String,
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc_field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_field_id: Option<String>,

    #[serde(default = "default_true")]
    pub latest_first: bool,
    #[serde(default)]
    pub prefer_view_order: bool,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 50))]
    pub limit: u32,
    #[serde(default = "default_interval_ms")]
    #[validate(range(min = 1000, max = 60000))]
    pub interval_ms: u64,
    #[serde(default = "default_refresh_ms")]
    #[validate(range(min = 3000, max = 120000))]
    pub refresh_ms: u64,

    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_true")]
    pub show_indicators: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            table_id: None,
            view_id: None,
            title_field_id: None,
            desc_field_id: None,
            image_field_id: None,
            time_field_id: None,
            latest_first: true,
            prefer_view_order: false,
            limit: DEFAULT_LIMIT,
            interval_ms: DEFAULT_INTERVAL_MS,
            refresh_ms: DEFAULT_REFRESH_MS,
            color: default_color(),
            show_indicators: true,
        }
    }
}

/// The part of a page's config that decides *which* records and fields are
/// shown. Any change here restarts the page's pipeline from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBinding {
    pub table_id: Option<String>,
    pub view_id: Option<String>,
    pub title_field_id: Option<String>,
    pub desc_field_id: Option<String>,
    pub image_field_id: Option<String>,
    pub time_field_id: Option<String>,
    pub latest_first: bool,
    pub prefer_view_order: bool,
    pub limit: u32,
}

impl SourceBinding {
    /// Whether slides resolved under `self` are still valid under `other`.
    ///
    /// Cached slide contents depend only on the table and the display
    /// fields; ordering and limit changes reuse them.
    pub fn shares_slide_fields(&self, other: &SourceBinding) -> bool {
        self.table_id == other.table_id
            && self.title_field_id == other.title_field_id
            && self.desc_field_id == other.desc_field_id
            && self.image_field_id == other.image_field_id
    }
}

impl PageConfig {
    /// Page config with defaults and the given id/name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn source_binding(&self) -> SourceBinding {
        SourceBinding {
            table_id: non_empty(&self.table_id),
            view_id: non_empty(&self.view_id),
            title_field_id: non_empty(&self.title_field_id),
            desc_field_id: non_empty(&self.desc_field_id),
            image_field_id: non_empty(&self.image_field_id),
            time_field_id: non_empty(&self.time_field_id),
            latest_first: self.latest_first,
            prefer_view_order: self.prefer_view_order,
            limit: self.effective_limit(),
        }
    }

    /// `limit`, never below 1.
    pub fn effective_limit(&self) -> u32 {
        self.limit.max(1)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms).max(MIN_ROTATION_INTERVAL)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms).max(MIN_REFRESH_INTERVAL)
    }
}

/// Hosts store cleared selects as `""`; treat those as unset.
fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Full configuration: ordered pages plus the shared window interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub pages: Vec<PageConfig>,
    #[serde(default = "default_group_interval_ms")]
    #[validate(range(min = 1000))]
    pub group_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            group_interval_ms: DEFAULT_GROUP_INTERVAL_MS,
        }
    }
}

impl AppConfig {
    /// Parse a persisted config document, unwrapping `customConfig` and
    /// upgrading the legacy single-page form.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let value = match value {
            serde_json::Value::Object(mut map) => match map.remove("customConfig") {
                Some(inner @ serde_json::Value::Object(_)) => inner,
                Some(_) | None => serde_json::Value::Object(map),
            },
            _ => return Err(ConfigError::NotAnObject),
        };

        let is_legacy = value.get("pages").is_none();
        let mut config = if is_legacy {
            let page: PageConfig = serde_json::from_value(value.clone())?;
            let group_interval_ms = value
                .get("groupIntervalMs")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(DEFAULT_GROUP_INTERVAL_MS);
            tracing::info!("Upgrading legacy single-page carousel config");
            AppConfig {
                pages: vec![page],
                group_interval_ms,
            }
        } else {
            serde_json::from_value(value)?
        };

        config.normalize();
        Ok(config)
    }

    /// Parse from a JSON string. See [`AppConfig::from_json`].
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_json(serde_json::from_str(text)?)
    }

    /// Fill in missing page ids and names.
    pub fn normalize(&mut self) {
        for (idx, page) in self.pages.iter_mut().enumerate() {
            if page.id.trim().is_empty() {
                page.id = uuid::Uuid::new_v4().to_string();
            }
            if page.name.trim().is_empty() {
                page.name = format!("Page {}", idx + 1);
            }
        }
    }

    /// Strict validation applied before persisting.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let mut seen = HashSet::new();
        for page in &self.pages {
            if !seen.insert(page.id.as_str()) {
                return Err(ConfigError::DuplicatePageId(page.id.clone()));
            }
        }
        Ok(())
    }

    pub fn group_interval(&self) -> Duration {
        Duration::from_millis(self.group_interval_ms).max(MIN_GROUP_INTERVAL)
    }
}
