//! Multi-page coordinator.
//!
//! [`MultiPageCoordinator`] owns one [`PageHandle`] per configured page and
//! decides which of them are active. With at most
//! [`MAX_ACTIVE_PAGES`] pages every page stays active. With more, a circular
//! window of exactly that many contiguous pages is active and its start
//! advances by one every group interval. Suspended pages keep their cache
//! and rotation state and resume where they stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use carousel_core::config::{AppConfig, MAX_ACTIVE_PAGES};
use carousel_events::{CarouselEvent, EventBus, EventKind};
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::page::{PageDeps, PageHandle, PageView};

/// Indices of the pages that should be active for a window starting at
/// `start`.
pub fn active_window(page_count: usize, start: usize) -> Vec<usize> {
    if page_count <= MAX_ACTIVE_PAGES {
        return (0..page_count).collect();
    }
    (0..MAX_ACTIVE_PAGES)
        .map(|offset| (start + offset) % page_count)
        .collect()
}

struct CoordinatorState {
    /// Pages in configured order; the window addresses them by index.
    pages: Vec<PageHandle>,
    window_start: usize,
    group_interval: Duration,
    active: Vec<usize>,
}

/// Runs every configured page and rotates the active window.
pub struct MultiPageCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
    deps: PageDeps,
    /// Master cancellation token, parent of every page token.
    cancel: CancellationToken,
    reconfigured: Arc<Notify>,
    window_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MultiPageCoordinator {
    /// Spawn every page in `config` and start the window timer.
    pub async fn start(config: AppConfig, deps: PageDeps) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            state: Arc::new(Mutex::new(CoordinatorState {
                pages: Vec::new(),
                window_start: 0,
                group_interval: config.group_interval(),
                active: Vec::new(),
            })),
            deps,
            cancel: CancellationToken::new(),
            reconfigured: Arc::new(Notify::new()),
            window_task: std::sync::Mutex::new(None),
        });

        coordinator.apply_config(config).await;

        let task = tokio::spawn(window_loop(
            Arc::clone(&coordinator.state),
            Arc::clone(&coordinator.deps.events),
            Arc::clone(&coordinator.reconfigured),
            coordinator.cancel.clone(),
        ));
        *coordinator
            .window_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(task);

        coordinator
    }

    /// Reconcile running pages with `config` by page id.
    ///
    /// New ids are spawned, missing ids are shut down, and surviving pages
    /// receive their new config in place. The window start is kept modulo
    /// the new page count.
    pub async fn apply_config(&self, config: AppConfig) {
        let group_interval = config.group_interval();
        let mut state = self.state.lock().await;

        let mut existing: HashMap<String, PageHandle> = state
            .pages
            .drain(..)
            .map(|page| (page.id().to_string(), page))
            .collect();

        let mut pages = Vec::with_capacity(config.pages.len());
        for page_config in config.pages {
            match existing.remove(&page_config.id) {
                Some(page) => {
                    if let Err(e) = page.update_config(page_config).await {
                        tracing::warn!(page_id = %page.id(), error = %e, "Failed to update page");
                    }
                    pages.push(page);
                }
                None => {
                    tracing::info!(page_id = %page_config.id, name = %page_config.name, "Starting page");
                    pages.push(PageHandle::spawn(page_config, &self.deps, &self.cancel));
                }
            }
        }

        for (page_id, page) in existing {
            tracing::info!(page_id = %page_id, "Removing page");
            page.shutdown().await;
        }

        state.window_start = match pages.len() {
            0 => 0,
            len => state.window_start % len,
        };
        state.pages = pages;
        state.group_interval = group_interval;
        // Indices may now point at different pages; recompute from scratch.
        state.active.clear();
        sync_window(&mut state, &self.deps.events).await;
        drop(state);

        self.reconfigured.notify_one();
    }

    /// Indices of the currently active pages, in window order.
    pub async fn active_indices(&self) -> Vec<usize> {
        self.state.lock().await.active.clone()
    }

    pub async fn page_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .pages
            .iter()
            .map(|page| page.id().to_string())
            .collect()
    }

    /// Render surface of one page.
    pub async fn view(&self, page_id: &str) -> Option<watch::Receiver<PageView>> {
        self.state
            .lock()
            .await
            .pages
            .iter()
            .find(|page| page.id() == page_id)
            .map(PageHandle::view)
    }

    /// Current render surface of every page, in configured order.
    pub async fn snapshots(&self) -> Vec<PageView> {
        self.state
            .lock()
            .await
            .pages
            .iter()
            .map(PageHandle::snapshot)
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CarouselEvent> {
        self.deps.events.subscribe()
    }

    /// Stop the window timer and every page.
    ///
    /// Cancels the master token, then waits up to 5 seconds per page task
    /// for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down carousel coordinator");
        self.cancel.cancel();

        let window_task = self
            .window_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = window_task {
            let _ = task.await;
        }

        let mut state = self.state.lock().await;
        for page in state.pages.drain(..) {
            tracing::info!(page_id = %page.id(), "Stopping page");
            page.shutdown().await;
        }
        state.active.clear();

        tracing::info!("Carousel coordinator shut down complete");
    }
}

/// Advance the window start by one every group interval. A config change
/// restarts the wait with the new interval.
async fn window_loop(
    state: Arc<Mutex<CoordinatorState>>,
    events: Arc<EventBus>,
    reconfigured: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let interval = state.lock().await.group_interval;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = reconfigured.notified() => continue,
            _ = tokio::time::sleep(interval) => {
                let mut state = state.lock().await;
                let len = state.pages.len();
                if len > MAX_ACTIVE_PAGES {
                    state.window_start = (state.window_start + 1) % len;
                    sync_window(&mut state, &events).await;
                }
            }
        }
    }
}

/// Activate and suspend pages so the active set matches the window.
async fn sync_window(state: &mut CoordinatorState, events: &EventBus) {
    let target = active_window(state.pages.len(), state.window_start);

    for (index, page) in state.pages.iter_mut().enumerate() {
        let should_be_active = target.contains(&index);
        let result = match (should_be_active, page.is_active()) {
            (true, false) => page.activate().await,
            (false, true) => page.deactivate().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(page_id = %page.id(), error = %e, "Failed to change page activation");
        }
    }

    if target != state.active {
        tracing::debug!(active = ?target, "Active window changed");
        events.publish(CarouselEvent::new(EventKind::WindowChanged {
            active_indices: target.clone(),
        }));
        state.active = target;
    }
}
