//! Per-page runtime.
//!
//! Each page runs as one owned task holding its slide cache, preloader,
//! rotation state, and timers. The task reacts to:
//!
//! - commands from the coordinator (activate, deactivate, config update),
//! - the refresh timer, which starts a load cycle while the page is active,
//! - publications and completion reports from the spawned load cycle,
//! - the rotation deadline and finished image preloads.
//!
//! Load cycles run in their own task and report back over a channel tagged
//! with the source generation they were started for. Changing the page's
//! source bumps the generation, so anything still arriving from an older
//! cycle is dropped unseen.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use carousel_core::config::{PageConfig, SourceBinding};
use carousel_core::source::Field;
use carousel_core::{RecordId, Slide};
use carousel_events::{CarouselEvent, EventBus, EventKind};
use carousel_pipeline::{
    CycleReport, ImagePreloader, ImageProbe, PipelineError, PreloadOutcome, Publication,
    ResolutionPipeline, SharedSlideCache, SlideCache,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::rotation::{Rotation, Tick};

/// Command channel depth per page.
const COMMAND_CAPACITY: usize = 32;

/// Grace period for a page task to exit after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Render surface
// ---------------------------------------------------------------------------

/// Everything a renderer needs to draw one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub page_id: String,
    pub name: String,
    pub slides: Vec<Slide>,
    pub index: usize,
    /// True only while nothing is displayed and a load cycle is running.
    pub loading: bool,
    pub active: bool,
    pub color: String,
    pub show_indicators: bool,
}

impl PageView {
    fn initial(config: &PageConfig) -> Self {
        Self {
            page_id: config.id.clone(),
            name: config.name.clone(),
            slides: Vec::new(),
            index: 0,
            loading: false,
            active: false,
            color: config.color.clone(),
            show_indicators: config.show_indicators,
        }
    }

    pub fn current(&self) -> Option<&Slide> {
        self.slides.get(self.index)
    }

    /// Nothing resolved and nothing loading.
    pub fn is_empty(&self) -> bool {
        self.slides.is_empty() && !self.loading
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Shared collaborators for every page.
#[derive(Clone)]
pub struct PageDeps {
    pub pipeline: ResolutionPipeline,
    pub probe: Arc<dyn ImageProbe>,
    pub events: Arc<EventBus>,
    /// Slide cache capacity; `None` for unbounded.
    pub cache_capacity: Option<usize>,
}

#[derive(Debug)]
enum PageCommand {
    Activate,
    Deactivate,
    UpdateConfig(Box<PageConfig>),
}

/// Owner's handle to a running page task.
pub struct PageHandle {
    id: String,
    active: bool,
    commands: mpsc::Sender<PageCommand>,
    view: watch::Receiver<PageView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PageHandle {
    /// Spawn a page task. Pages start inactive.
    pub fn spawn(config: PageConfig, deps: &PageDeps, parent: &CancellationToken) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (view_tx, view) = watch::channel(PageView::initial(&config));
        let cancel = parent.child_token();
        let id = config.id.clone();

        let (cycle_tx, cycles) = mpsc::unbounded_channel();
        let (preload_tx, preloads) = mpsc::unbounded_channel();
        let runtime = PageRuntime::new(config, deps, view_tx, cancel.clone(), cycle_tx, preload_tx);
        let task = tokio::spawn(runtime.run(Inbox {
            commands: command_rx,
            cycles,
            preloads,
        }));

        Self {
            id,
            active: false,
            commands,
            view,
            cancel,
            task,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Subscribe to the page's render surface.
    pub fn view(&self) -> watch::Receiver<PageView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> PageView {
        self.view.borrow().clone()
    }

    pub async fn activate(&mut self) -> Result<(), WorkerError> {
        self.send(PageCommand::Activate).await?;
        self.active = true;
        Ok(())
    }

    pub async fn deactivate(&mut self) -> Result<(), WorkerError> {
        self.send(PageCommand::Deactivate).await?;
        self.active = false;
        Ok(())
    }

    pub async fn update_config(&self, config: PageConfig) -> Result<(), WorkerError> {
        self.send(PageCommand::UpdateConfig(Box::new(config))).await
    }

    /// Cancel the page and wait briefly for its task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.task).await.is_err() {
            tracing::warn!(page_id = %self.id, "Page task did not stop in time");
        }
    }

    async fn send(&self, command: PageCommand) -> Result<(), WorkerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WorkerError::PageClosed(self.id.clone()))
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

enum CycleMessage {
    /// The cycle resolved its source handles.
    Bound {
        generation: u64,
        image_field: Option<Arc<dyn Field>>,
    },
    Published {
        generation: u64,
        publication: Publication,
    },
    Finished {
        generation: u64,
        result: Result<CycleReport, PipelineError>,
    },
}

struct PreloadMessage {
    generation: u64,
    /// Set when the rotation is waiting on this preload to flip.
    epoch: Option<u64>,
    record_id: RecordId,
    outcome: PreloadOutcome,
}

/// Receiving ends of everything the page task reacts to.
struct Inbox {
    commands: mpsc::Receiver<PageCommand>,
    cycles: mpsc::UnboundedReceiver<CycleMessage>,
    preloads: mpsc::UnboundedReceiver<PreloadMessage>,
}

struct PageRuntime {
    config: PageConfig,
    binding: SourceBinding,
    pipeline: ResolutionPipeline,
    events: Arc<EventBus>,
    cache: SharedSlideCache,
    preloader: Arc<ImagePreloader>,
    rotation: Rotation,
    active: bool,
    /// Bumped on every source change; results from older cycles are dropped.
    generation: u64,
    /// Cancellation handle of the running cycle, if any.
    in_flight: Option<CancellationToken>,
    next_flip: Option<Instant>,
    /// URLs with a lookahead preload already running.
    preloading: HashSet<String>,
    view_tx: watch::Sender<PageView>,
    cancel: CancellationToken,
    cycle_tx: mpsc::UnboundedSender<CycleMessage>,
    preload_tx: mpsc::UnboundedSender<PreloadMessage>,
}

impl PageRuntime {
    fn new(
        config: PageConfig,
        deps: &PageDeps,
        view_tx: watch::Sender<PageView>,
        cancel: CancellationToken,
        cycle_tx: mpsc::UnboundedSender<CycleMessage>,
        preload_tx: mpsc::UnboundedSender<PreloadMessage>,
    ) -> Self {
        let cache = match deps.cache_capacity {
            Some(capacity) => SlideCache::with_capacity_limit(capacity),
            None => SlideCache::new(),
        }
        .shared();
        let preloader = Arc::new(ImagePreloader::new(Arc::clone(&deps.probe), cache.clone()));

        Self {
            binding: config.source_binding(),
            rotation: Rotation::new(config.rotation_interval()),
            config,
            pipeline: deps.pipeline.clone(),
            events: Arc::clone(&deps.events),
            cache,
            preloader,
            active: false,
            generation: 0,
            in_flight: None,
            next_flip: None,
            preloading: HashSet::new(),
            view_tx,
            cancel,
            cycle_tx,
            preload_tx,
        }
    }

    async fn run(mut self, mut inbox: Inbox) {
        let mut refresh = refresh_timer(self.config.refresh_interval());

        tracing::debug!(page_id = %self.config.id, "Page task started");

        loop {
            let flip_at = self.next_flip.filter(|_| self.active);

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                command = inbox.commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut refresh).await,
                    None => break,
                },

                _ = refresh.tick(), if self.active => self.start_cycle(),

                Some(message) = inbox.cycles.recv() => self.handle_cycle(message),

                Some(message) = inbox.preloads.recv() => self.handle_preload(message),

                _ = sleep_until(flip_at), if flip_at.is_some() => self.on_flip_deadline(),
            }
        }

        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        tracing::debug!(page_id = %self.config.id, "Page task stopped");
    }

    // ---- commands ----

    async fn handle_command(&mut self, command: PageCommand, refresh: &mut Interval) {
        match command {
            PageCommand::Activate => {
                if self.active {
                    return;
                }
                self.active = true;
                tracing::debug!(page_id = %self.config.id, "Page activated");
                self.emit(EventKind::ActivationChanged { active: true });
                *refresh = refresh_timer(self.config.refresh_interval());
                self.arm_flip();
                self.start_cycle();
                self.publish_view();
                self.schedule_lookahead();
            }
            PageCommand::Deactivate => {
                if !self.active {
                    return;
                }
                self.active = false;
                self.next_flip = None;
                if self.rotation.cancel_transition() {
                    tracing::debug!(page_id = %self.config.id, "Pending flip dropped on suspend");
                }
                tracing::debug!(page_id = %self.config.id, "Page suspended");
                self.emit(EventKind::ActivationChanged { active: false });
                self.publish_view();
            }
            PageCommand::UpdateConfig(config) => self.apply_config(*config, refresh).await,
        }
    }

    async fn apply_config(&mut self, config: PageConfig, refresh: &mut Interval) {
        let binding = config.source_binding();
        let source_changed = binding != self.binding;

        if source_changed {
            self.generation += 1;
            if let Some(token) = self.in_flight.take() {
                token.cancel();
            }
            if !binding.shares_slide_fields(&self.binding) {
                self.cache.lock().await.clear();
                self.preloader.reset();
            }
            self.rotation.clear();
            self.next_flip = None;
            self.preloading.clear();
            tracing::info!(
                page_id = %config.id,
                generation = self.generation,
                "Page source changed, restarting",
            );
            self.emit(EventKind::SlidesCleared);
            self.binding = binding;
        }

        if config.rotation_interval() != self.rotation.interval() {
            self.rotation.set_interval(config.rotation_interval());
            if self.next_flip.is_some() {
                self.next_flip = None;
                self.arm_flip();
            }
        }

        if config.refresh_interval() != self.config.refresh_interval() {
            *refresh = refresh_timer(config.refresh_interval());
        }

        self.config = config;
        self.publish_view();

        if source_changed && self.active {
            self.start_cycle();
        }
    }

    // ---- load cycles ----

    fn start_cycle(&mut self) {
        if self.in_flight.is_some() {
            tracing::debug!(page_id = %self.config.id, "Load cycle still running, skipping refresh");
            return;
        }

        let token = self.cancel.child_token();
        self.in_flight = Some(token.clone());
        self.publish_view();

        let generation = self.generation;
        let pipeline = self.pipeline.clone();
        let binding = self.binding.clone();
        let cache = self.cache.clone();
        let tx = self.cycle_tx.clone();

        tokio::spawn(async move {
            let result = drive_cycle(&pipeline, &binding, &cache, &token, generation, &tx).await;
            let _ = tx.send(CycleMessage::Finished { generation, result });
        });
    }

    fn handle_cycle(&mut self, message: CycleMessage) {
        match message {
            CycleMessage::Bound {
                generation,
                image_field,
            } => {
                if generation == self.generation {
                    self.preloader.set_image_field(image_field);
                }
            }
            CycleMessage::Published {
                generation,
                publication,
            } => {
                if generation != self.generation {
                    tracing::debug!(page_id = %self.config.id, generation, "Dropping stale publication");
                    return;
                }
                self.apply_publication(publication);
            }
            CycleMessage::Finished { generation, result } => {
                if generation != self.generation {
                    return;
                }
                self.in_flight = None;
                match result {
                    Ok(report) => tracing::debug!(
                        page_id = %self.config.id,
                        records = report.target.len(),
                        resolved = report.resolved,
                        "Load cycle finished",
                    ),
                    Err(PipelineError::Cancelled) => {
                        tracing::debug!(page_id = %self.config.id, "Load cycle cancelled");
                    }
                    Err(e) => {
                        tracing::error!(page_id = %self.config.id, error = %e, "Load cycle failed");
                        self.emit(EventKind::LoadFailed {
                            error: e.to_string(),
                        });
                    }
                }
                self.publish_view();
                self.schedule_lookahead();
            }
        }
    }

    fn apply_publication(&mut self, publication: Publication) {
        let slide_count = publication.slides.len();
        let update = self.rotation.set_slides(publication.slides);

        if update.reset || !self.rotation.wants_timer() {
            self.next_flip = None;
        }
        self.arm_flip();

        self.emit(EventKind::SlidesPublished {
            phase: publication.phase,
            slide_count,
            index: self.rotation.index(),
            index_reset: update.reset,
        });
        if update.changed {
            self.publish_view();
        }
        self.schedule_lookahead();
    }

    // ---- rotation ----

    fn arm_flip(&mut self) {
        if self.next_flip.is_none() && self.active && self.rotation.wants_timer() {
            self.next_flip = Some(Instant::now() + self.rotation.interval());
        }
    }

    fn on_flip_deadline(&mut self) {
        self.next_flip = None;
        let preloader = Arc::clone(&self.preloader);
        match self.rotation.on_tick(|url| preloader.is_ready(url)) {
            Tick::Hold => {}
            Tick::Flipped { .. } => self.after_flip(),
            Tick::Preload {
                record_id,
                url,
                epoch,
                ..
            } => self.spawn_preload(record_id, url, Some(epoch)),
        }
    }

    fn after_flip(&mut self) {
        self.arm_flip();
        if let Some(slide) = self.rotation.current() {
            let record_id = slide.id.clone();
            self.emit(EventKind::SlideChanged {
                index: self.rotation.index(),
                record_id,
            });
        }
        self.publish_view();
        self.schedule_lookahead();
    }

    // ---- preloading ----

    fn schedule_lookahead(&mut self) {
        if !self.active {
            return;
        }
        let targets = self
            .preloader
            .lookahead_targets(self.rotation.slides(), self.rotation.index());
        for (record_id, url) in targets {
            if self.preloading.insert(url.clone()) {
                self.spawn_preload(record_id, url, None);
            }
        }
    }

    fn spawn_preload(&self, record_id: RecordId, url: String, epoch: Option<u64>) {
        let preloader = Arc::clone(&self.preloader);
        let tx = self.preload_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let outcome = preloader.ensure_ready_outcome(&record_id, &url).await;
            let _ = tx.send(PreloadMessage {
                generation,
                epoch,
                record_id,
                outcome,
            });
        });
    }

    fn handle_preload(&mut self, message: PreloadMessage) {
        self.preloading.remove(&message.outcome.url);
        if message.generation != self.generation {
            return;
        }

        let outcome = message.outcome;
        if let Some(refreshed) = &outcome.refreshed {
            self.rotation.patch_image(&message.record_id, refreshed);
        }
        self.emit(EventKind::PreloadFinished {
            record_id: message.record_id.clone(),
            url: outcome.display_url().to_string(),
            loaded: outcome.ready,
            refreshed: outcome.refreshed.is_some(),
        });

        match message.epoch {
            Some(epoch) => match self.rotation.complete_transition(epoch) {
                Some(_) => self.after_flip(),
                None => {
                    tracing::debug!(
                        page_id = %self.config.id,
                        record_id = %message.record_id,
                        "Slides changed during transition, flip discarded",
                    );
                    self.arm_flip();
                    self.publish_view();
                }
            },
            None => {
                if outcome.refreshed.is_some() {
                    self.publish_view();
                }
            }
        }
    }

    // ---- output ----

    fn publish_view(&self) {
        let slides = self.rotation.slides().to_vec();
        let loading = slides.is_empty() && self.in_flight.is_some();
        self.view_tx.send_replace(PageView {
            page_id: self.config.id.clone(),
            name: self.config.name.clone(),
            slides,
            index: self.rotation.index(),
            loading,
            active: self.active,
            color: self.config.color.clone(),
            show_indicators: self.config.show_indicators,
        });
    }

    fn emit(&self, kind: EventKind) {
        self.events
            .publish(CarouselEvent::new(kind).for_page(self.config.id.clone()));
    }
}

/// Body of a spawned load cycle. The bound image field is reported before
/// any publication so preloads triggered by the first slides can refresh
/// expired URLs.
async fn drive_cycle(
    pipeline: &ResolutionPipeline,
    binding: &SourceBinding,
    cache: &SharedSlideCache,
    cancel: &CancellationToken,
    generation: u64,
    tx: &mpsc::UnboundedSender<CycleMessage>,
) -> Result<CycleReport, PipelineError> {
    let bound = pipeline.bind(binding).await?;
    let _ = tx.send(CycleMessage::Bound {
        generation,
        image_field: bound.image.clone(),
    });

    let publish_tx = tx.clone();
    let mut publish = move |publication: Publication| {
        let _ = publish_tx.send(CycleMessage::Published {
            generation,
            publication,
        });
    };
    pipeline
        .run_bound(&bound, binding, cache, cancel, &mut publish)
        .await
}

/// Refresh timer whose first tick is one period away.
fn refresh_timer(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
