//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the coordinator, each
//! page runtime, and whatever renders or logs the carousel.

use carousel_core::{PublishPhase, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// CarouselEvent
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A page replaced its displayed slide list.
    SlidesPublished {
        phase: PublishPhase,
        slide_count: usize,
        index: usize,
        index_reset: bool,
    },
    /// A page's displayed slides were cleared because its source changed.
    SlidesCleared,
    /// The rotation advanced to a new slide.
    SlideChanged { index: usize, record_id: RecordId },
    /// An image preload finished.
    PreloadFinished {
        record_id: RecordId,
        url: String,
        loaded: bool,
        refreshed: bool,
    },
    /// A load cycle aborted; the previous slides stay on screen.
    LoadFailed { error: String },
    /// A page was activated or suspended by the window.
    ActivationChanged { active: bool },
    /// The visible window moved.
    WindowChanged { active_indices: Vec<usize> },
    /// The host was told the first render settled.
    HostReady,
}

/// A carousel event, optionally scoped to one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarouselEvent {
    /// Page the event concerns; `None` for coordinator-level events.
    pub page_id: Option<String>,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl CarouselEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            page_id: None,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Scope the event to a page.
    pub fn for_page(mut self, page_id: impl Into<String>) -> Self {
        self.page_id = Some(page_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use carousel_events::bus::{CarouselEvent, EventBus, EventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(CarouselEvent::new(EventKind::HostReady));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<CarouselEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: CarouselEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CarouselEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
