#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carousel_core::config::PageConfig;
use carousel_core::host::StaticSelection;
use carousel_core::source::{DataSource, MemorySource, Table};
use carousel_core::types::TableMeta;
use carousel_core::SourceError;
use carousel_events::{CarouselEvent, EventBus, EventKind};
use carousel_pipeline::{ImageProbe, ProbeError, ResolutionPipeline};
use carousel_worker::{PageDeps, PageView};
use tokio::sync::{broadcast, watch};

/// `news` with three records, `alerts` with two, `gallery` with four where
/// only the last carries an image.
pub const FIXTURE: &str = r#"{
    "activeTable": "news",
    "tables": [
        {
            "id": "news",
            "name": "News",
            "fields": [
                {"id": "title", "name": "Title", "kind": "text", "isPrimary": true},
                {"id": "cover", "name": "Cover", "kind": "attachment"}
            ],
            "records": [
                {"id": "n1", "fields": {"title": "One", "cover": [{"url": "https://cdn/n1.png"}]}},
                {"id": "n2", "fields": {"title": "Two", "cover": [{"url": "https://cdn/n2.png?sig=old"}]}},
                {"id": "n3", "fields": {"title": "Three"}}
            ]
        },
        {
            "id": "alerts",
            "name": "Alerts",
            "fields": [{"id": "msg", "name": "Message", "kind": "text", "isPrimary": true}],
            "records": [
                {"id": "a1", "fields": {"msg": "Disk full"}},
                {"id": "a2", "fields": {"msg": "Link down"}}
            ]
        },
        {
            "id": "gallery",
            "name": "Gallery",
            "fields": [
                {"id": "caption", "name": "Caption", "kind": "text", "isPrimary": true},
                {"id": "photo", "name": "Photo", "kind": "attachment"}
            ],
            "records": [
                {"id": "g1", "fields": {"caption": "First"}},
                {"id": "g2", "fields": {"caption": "Second"}},
                {"id": "g3", "fields": {"caption": "Third"}},
                {"id": "g4", "fields": {"caption": "Fourth", "photo": [{"url": "https://cdn/g4.png?sig=old"}]}}
            ]
        }
    ]
}"#;

pub fn memory_source() -> MemorySource {
    MemorySource::from_json_str(FIXTURE).expect("fixture should parse")
}

/// Delegates to a [`MemorySource`], delaying table lookups for chosen tables.
pub struct SlowSource {
    inner: MemorySource,
    delays: HashMap<String, Duration>,
}

impl SlowSource {
    pub fn new(inner: MemorySource, delays: &[(&str, Duration)]) -> Self {
        Self {
            inner,
            delays: delays
                .iter()
                .map(|(id, delay)| (id.to_string(), *delay))
                .collect(),
        }
    }
}

#[async_trait]
impl DataSource for SlowSource {
    async fn list_tables(&self) -> Result<Vec<TableMeta>, SourceError> {
        self.inner.list_tables().await
    }

    async fn get_table(&self, table_id: &str) -> Result<Arc<dyn Table>, SourceError> {
        if let Some(delay) = self.delays.get(table_id) {
            tokio::time::sleep(*delay).await;
        }
        self.inner.get_table(table_id).await
    }

    async fn active_table(&self) -> Result<Arc<dyn Table>, SourceError> {
        self.inner.active_table().await
    }
}

/// Accepts URLs on an allow list; everything else fails with 403.
#[derive(Default)]
pub struct ListProbe {
    good: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ListProbe {
    pub fn allowing(urls: &[&str]) -> Self {
        Self {
            good: Mutex::new(urls.iter().map(|u| u.to_string()).collect()),
            ..Default::default()
        }
    }

    /// Every image check waits `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProbe for ListProbe {
    async fn probe(&self, url: &str) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.good.lock().unwrap().contains(url) {
            Ok(())
        } else {
            Err(ProbeError::Status(403))
        }
    }
}

pub fn deps(source: Arc<dyn DataSource>, probe: Arc<dyn ImageProbe>) -> PageDeps {
    PageDeps {
        pipeline: ResolutionPipeline::new(source, Arc::new(StaticSelection::new(None))),
        probe,
        events: Arc::new(EventBus::default()),
        cache_capacity: None,
    }
}

pub fn page(id: &str, table_id: &str) -> PageConfig {
    PageConfig {
        table_id: Some(table_id.into()),
        ..PageConfig::new(id, id.to_uppercase())
    }
}

/// Wait (in virtual time) until the page view satisfies `pred`.
pub async fn wait_view(
    rx: &mut watch::Receiver<PageView>,
    pred: impl FnMut(&PageView) -> bool,
) -> PageView {
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(pred))
        .await
        .expect("page view condition not reached in time")
        .expect("page task is gone")
        .clone()
}

/// Receive events until one matches `pred`.
pub async fn next_event(
    rx: &mut broadcast::Receiver<CarouselEvent>,
    mut pred: impl FnMut(&CarouselEvent) -> bool,
) -> CarouselEvent {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}

pub fn is_slide_changed(event: &CarouselEvent) -> bool {
    matches!(event.kind, EventKind::SlideChanged { .. })
}
