//! `carousel-worker` -- headless dashboard carousel.
//!
//! Loads the carousel configuration from a JSON file, backs it with an
//! in-memory data source built from a fixture, runs every page, and logs
//! what a renderer would draw. Edits to the config file are picked up
//! while running.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default         | Description                         |
//! |---------------------------|----------|-----------------|-------------------------------------|
//! | `CAROUSEL_CONFIG`         | no       | `carousel.json` | Persisted carousel configuration    |
//! | `CAROUSEL_FIXTURE`        | no       | --              | Data source fixture (JSON)          |
//! | `CAROUSEL_VIEW_ID`        | no       | --              | View reported as the host selection |
//! | `CAROUSEL_CACHE_CAPACITY` | no       | unbounded       | Slide cache capacity per page       |
//! | `CAROUSEL_PROBE_IMAGES`   | no       | `true`          | Verify images over HTTP             |
//! | `CAROUSEL_CONFIG_POLL_MS` | no       | `1000`          | Config file poll interval           |

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use carousel_core::host::StaticSelection;
use carousel_core::source::MemorySource;
use carousel_core::store::{ConfigStore, FileConfigStore};
use carousel_core::AppConfig;
use carousel_events::{CarouselEvent, EventBus, EventKind};
use carousel_pipeline::{HttpImageProbe, ImageProbe, ResolutionPipeline, TrustingProbe};
use carousel_worker::{
    LoggingLifecycle, MultiPageCoordinator, PageDeps, ReadyNotifier, WorkerError, WorkerSettings,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carousel_worker=info,carousel_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = WorkerSettings::from_env()?;
    tracing::info!(
        config = %settings.config_path.display(),
        fixture = ?settings.fixture_path,
        probe_images = settings.probe_images,
        cache_capacity = ?settings.cache_capacity,
        "Starting carousel-worker",
    );

    let store = Arc::new(
        FileConfigStore::open(&settings.config_path)
            .await
            .context("opening carousel config")?,
    );
    let config = match store.load().await? {
        Some(config) => config,
        None => {
            let config = AppConfig::from_json(serde_json::json!({}))?;
            tracing::warn!("No carousel config found, writing a single default page");
            if let Err(e) = store.save(&config).await {
                tracing::warn!(error = %e, "Failed to persist default config");
            }
            config
        }
    };

    let source = load_fixture(settings.fixture_path.as_deref()).await?;
    let probe: Arc<dyn ImageProbe> = if settings.probe_images {
        Arc::new(HttpImageProbe::new()?)
    } else {
        Arc::new(TrustingProbe)
    };

    let events = Arc::new(EventBus::default());
    let log_task = tokio::spawn(log_events(events.subscribe()));

    let deps = PageDeps {
        pipeline: ResolutionPipeline::new(
            Arc::new(source),
            Arc::new(StaticSelection::new(settings.view_id.clone())),
        ),
        probe,
        events: Arc::clone(&events),
        cache_capacity: settings.cache_capacity,
    };

    tracing::info!(pages = config.pages.len(), "Starting pages");
    let coordinator = MultiPageCoordinator::start(config, deps).await;
    let ready = ReadyNotifier::new(Arc::new(LoggingLifecycle), Arc::clone(&events));
    ready.config_applied();

    let cancel = CancellationToken::new();
    let watcher = {
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        let poll = settings.config_poll;
        tokio::spawn(async move { store.watch_file(poll, cancel).await })
    };

    let mut changes = store.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = changes.borrow_and_update().clone();
                if let Some(config) = next {
                    tracing::info!(pages = config.pages.len(), "Applying updated config");
                    coordinator.apply_config(config).await;
                    ready.config_applied();
                }
            }
        }
    }

    cancel.cancel();
    let _ = watcher.await;
    coordinator.shutdown().await;
    log_task.abort();
    Ok(())
}

async fn load_fixture(path: Option<&Path>) -> Result<MemorySource, WorkerError> {
    let Some(path) = path else {
        tracing::warn!("CAROUSEL_FIXTURE not set, pages will have no data");
        return Ok(MemorySource::default());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| WorkerError::Fixture(format!("{}: {e}", path.display())))?;
    MemorySource::from_json_str(&text)
        .map_err(|e| WorkerError::Fixture(format!("{}: {e}", path.display())))
}

/// Log every carousel event until the bus closes.
async fn log_events(mut rx: broadcast::Receiver<CarouselEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let page_id = event.page_id.as_deref().unwrap_or("-");
        match &event.kind {
            EventKind::SlidesPublished {
                phase,
                slide_count,
                index,
                index_reset,
            } => tracing::info!(page_id, ?phase, slide_count, index, index_reset, "Slides published"),
            EventKind::SlidesCleared => tracing::info!(page_id, "Slides cleared"),
            EventKind::SlideChanged { index, record_id } => {
                tracing::info!(page_id, index, record_id = %record_id, "Slide changed")
            }
            EventKind::PreloadFinished {
                record_id,
                url,
                loaded,
                refreshed,
            } => tracing::debug!(page_id, record_id = %record_id, url = %url, loaded, refreshed, "Image preloaded"),
            EventKind::LoadFailed { error } => {
                tracing::warn!(page_id, error = %error, "Load cycle failed")
            }
            EventKind::ActivationChanged { active } => {
                tracing::info!(page_id, active, "Page activation changed")
            }
            EventKind::WindowChanged { active_indices } => {
                tracing::info!(?active_indices, "Active window moved")
            }
            EventKind::HostReady => tracing::info!("Host ready"),
        }
    }
}
