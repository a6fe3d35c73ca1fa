//! Image readiness checks ahead of display.
//!
//! Attachment URLs handed out by the host are short-lived, so a URL that
//! fails to load is not necessarily a broken image. On failure the preloader
//! asks the bound image field for a fresh URL, writes it into the slide
//! cache, and probes once more. The final outcome is recorded on both URLs.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use carousel_core::source::Field;
use carousel_core::{RecordId, Slide};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::cache::SharedSlideCache;
use crate::error::ProbeError;
use crate::resolution::resolve_image_url;

/// How many slides past the current one are preloaded.
pub const LOOKAHEAD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadStatus {
    #[default]
    Unknown,
    Loaded,
    Failed,
}

/// Checks that a URL serves a displayable image.
#[async_trait]
pub trait ImageProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<(), ProbeError>;
}

/// Fetches the URL and decodes the image header.
#[derive(Clone)]
pub struct HttpImageProbe {
    client: reqwest::Client,
}

impl HttpImageProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageProbe for HttpImageProbe {
    async fn probe(&self, url: &str) -> Result<(), ProbeError> {
        if url.starts_with("data:image/") {
            return Ok(());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProbeError::Unsupported(url.to_string()));
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;

        let (width, height) = image::ImageReader::new(Cursor::new(bytes.as_ref()))
            .with_guessed_format()
            .map_err(|e| ProbeError::Decode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| ProbeError::Decode(e.to_string()))?;
        tracing::trace!(url, width, height, "Image probe succeeded");
        Ok(())
    }
}

/// Treats every URL as loadable. Used when probing is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustingProbe;

#[async_trait]
impl ImageProbe for TrustingProbe {
    async fn probe(&self, _url: &str) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Result of [`ImagePreloader::ensure_ready_outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadOutcome {
    pub ready: bool,
    /// The URL that was originally asked about.
    pub url: String,
    /// A fresh URL that replaced `url` in the cache, if one was fetched.
    pub refreshed: Option<String>,
}

impl PreloadOutcome {
    /// The URL the slide should display.
    pub fn display_url(&self) -> &str {
        self.refreshed.as_deref().unwrap_or(&self.url)
    }
}

/// Per-page image preloader.
pub struct ImagePreloader {
    probe: Arc<dyn ImageProbe>,
    cache: SharedSlideCache,
    image_field: RwLock<Option<Arc<dyn Field>>>,
    statuses: RwLock<HashMap<String, PreloadStatus>>,
    /// Original URL to the fresh URL that replaced it.
    replacements: RwLock<HashMap<String, String>>,
    /// One gate per URL so concurrent callers share a single probe.
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ImagePreloader {
    pub fn new(probe: Arc<dyn ImageProbe>, cache: SharedSlideCache) -> Self {
        Self {
            probe,
            cache,
            image_field: RwLock::new(None),
            statuses: RwLock::new(HashMap::new()),
            replacements: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Set the field used to fetch fresh URLs. Updated after every cycle.
    pub fn set_image_field(&self, field: Option<Arc<dyn Field>>) {
        *self
            .image_field
            .write()
            .unwrap_or_else(PoisonError::into_inner) = field;
    }

    pub fn is_ready(&self, url: &str) -> PreloadStatus {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or_default()
    }

    /// Forget every status. Called when the page's source changes.
    pub fn reset(&self) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.replacements
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub async fn ensure_ready(&self, record_id: &str, url: &str) -> bool {
        self.ensure_ready_outcome(record_id, url).await.ready
    }

    /// Probe `url`, refreshing and retrying once on failure.
    pub async fn ensure_ready_outcome(&self, record_id: &str, url: &str) -> PreloadOutcome {
        if let Some(outcome) = self.settled(url) {
            return outcome;
        }

        let gate = self.gate(url).await;
        let _held = gate.lock().await;
        // Another caller may have finished the probe while we waited.
        if let Some(outcome) = self.settled(url) {
            return outcome;
        }

        let outcome = self.attempt(record_id, url).await;
        self.gates.lock().await.remove(url);
        outcome
    }

    /// Record ids and URLs of the next slides that still need a probe.
    pub fn lookahead_targets(&self, slides: &[Slide], index: usize) -> Vec<(RecordId, String)> {
        if slides.len() < 2 {
            return Vec::new();
        }
        (1..=LOOKAHEAD.min(slides.len() - 1))
            .map(|offset| &slides[(index + offset) % slides.len()])
            .filter_map(|slide| {
                let url = slide.image_url.as_ref()?;
                (self.is_ready(url) == PreloadStatus::Unknown).then(|| (slide.id.clone(), url.clone()))
            })
            .collect()
    }

    fn settled(&self, url: &str) -> Option<PreloadOutcome> {
        let status = self.is_ready(url);
        if status == PreloadStatus::Unknown {
            return None;
        }
        let refreshed = self
            .replacements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned();
        Some(PreloadOutcome {
            ready: status == PreloadStatus::Loaded,
            url: url.to_string(),
            refreshed,
        })
    }

    async fn gate(&self, url: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .clone()
    }

    async fn attempt(&self, record_id: &str, url: &str) -> PreloadOutcome {
        let first_error = match self.probe.probe(url).await {
            Ok(()) => {
                self.mark(url, PreloadStatus::Loaded);
                return PreloadOutcome {
                    ready: true,
                    url: url.to_string(),
                    refreshed: None,
                };
            }
            Err(e) => e,
        };
        tracing::debug!(record_id, url, error = %first_error, "Image probe failed, refreshing URL");

        let field = self
            .image_field
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let fresh = resolve_image_url(field.as_deref(), record_id)
            .await
            .filter(|fresh| fresh != url);

        let retry_url = fresh.as_deref().unwrap_or(url);
        let status = match self.probe.probe(retry_url).await {
            Ok(()) => PreloadStatus::Loaded,
            Err(e) => {
                tracing::warn!(record_id, url = retry_url, error = %e, "Image failed to load after retry");
                PreloadStatus::Failed
            }
        };

        self.mark(url, status);
        if let Some(fresh) = &fresh {
            self.mark(fresh, status);
            self.replacements
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.to_string(), fresh.clone());
            self.cache
                .lock()
                .await
                .update_image_url(record_id, fresh.clone());
        }

        PreloadOutcome {
            ready: status == PreloadStatus::Loaded,
            url: url.to_string(),
            refreshed: fresh,
        }
    }

    fn mark(&self, url: &str, status: PreloadStatus) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), status);
    }
}
