//! Runtime settings for the `carousel-worker` binary.

use std::path::PathBuf;
use std::time::Duration;

use carousel_core::store::MIN_POLL_INTERVAL;

use crate::error::WorkerError;

/// Default path of the persisted carousel configuration.
pub const DEFAULT_CONFIG_PATH: &str = "carousel.json";

/// How often the config file is checked for edits.
const DEFAULT_CONFIG_POLL_MS: u64 = 1000;

/// Settings loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub config_path: PathBuf,
    /// JSON fixture backing the in-memory data source.
    pub fixture_path: Option<PathBuf>,
    /// View reported as the host selection.
    pub view_id: Option<String>,
    /// Per-page slide cache capacity; unbounded when unset.
    pub cache_capacity: Option<usize>,
    /// Verify images over HTTP before display.
    pub probe_images: bool,
    pub config_poll: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            fixture_path: None,
            view_id: None,
            cache_capacity: None,
            probe_images: true,
            config_poll: Duration::from_millis(DEFAULT_CONFIG_POLL_MS),
        }
    }
}

impl WorkerSettings {
    /// Load settings from environment variables with defaults.
    ///
    /// | Env Var                    | Default          |
    /// |----------------------------|------------------|
    /// | `CAROUSEL_CONFIG`          | `carousel.json`  |
    /// | `CAROUSEL_FIXTURE`         | unset            |
    /// | `CAROUSEL_VIEW_ID`         | unset            |
    /// | `CAROUSEL_CACHE_CAPACITY`  | unset (no limit) |
    /// | `CAROUSEL_PROBE_IMAGES`    | `true`           |
    /// | `CAROUSEL_CONFIG_POLL_MS`  | `1000`           |
    pub fn from_env() -> Result<Self, WorkerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`WorkerSettings::from_env`] with an arbitrary variable
    /// source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WorkerError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let cache_capacity = match var("CAROUSEL_CACHE_CAPACITY") {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|e| {
                WorkerError::Setting {
                    name: "CAROUSEL_CACHE_CAPACITY",
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        let probe_images = match var("CAROUSEL_PROBE_IMAGES") {
            Some(raw) => parse_flag(&raw).ok_or_else(|| WorkerError::Setting {
                name: "CAROUSEL_PROBE_IMAGES",
                reason: format!("expected true/false, got {raw:?}"),
            })?,
            None => defaults.probe_images,
        };

        let config_poll = match var("CAROUSEL_CONFIG_POLL_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(|ms| Duration::from_millis(ms).max(MIN_POLL_INTERVAL))
                .map_err(|e| WorkerError::Setting {
                    name: "CAROUSEL_CONFIG_POLL_MS",
                    reason: e.to_string(),
                })?,
            None => defaults.config_poll,
        };

        Ok(Self {
            config_path: var("CAROUSEL_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            fixture_path: var("CAROUSEL_FIXTURE").map(PathBuf::from),
            view_id: var("CAROUSEL_VIEW_ID"),
            cache_capacity,
            probe_images,
            config_poll,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
