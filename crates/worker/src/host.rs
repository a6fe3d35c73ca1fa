//! Host lifecycle glue.
//!
//! The host waits for one readiness signal after the block's first render.
//! [`ReadyNotifier`] sends it once a config has been applied and the render
//! has had time to settle, whether or not any slide data arrived.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use carousel_core::host::HostLifecycle;
use carousel_events::{CarouselEvent, EventBus, EventKind};
use tokio::task::JoinHandle;

/// Delay between applying a config and declaring the render settled.
pub const READY_SETTLE: Duration = Duration::from_millis(3000);

/// A [`HostLifecycle`] that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLifecycle;

impl HostLifecycle for LoggingLifecycle {
    fn notify_ready(&self) {
        tracing::info!("Carousel render settled, host notified");
    }
}

/// Calls [`HostLifecycle::notify_ready`] exactly once.
pub struct ReadyNotifier {
    lifecycle: Arc<dyn HostLifecycle>,
    events: Arc<EventBus>,
    settle: Duration,
    fired: Arc<AtomicBool>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ReadyNotifier {
    pub fn new(lifecycle: Arc<dyn HostLifecycle>, events: Arc<EventBus>) -> Self {
        Self::with_settle(lifecycle, events, READY_SETTLE)
    }

    pub fn with_settle(
        lifecycle: Arc<dyn HostLifecycle>,
        events: Arc<EventBus>,
        settle: Duration,
    ) -> Self {
        Self {
            lifecycle,
            events,
            settle,
            fired: Arc::new(AtomicBool::new(false)),
            pending: Mutex::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Arm the settle timer, restarting it if a previous config has not
    /// settled yet. No-op once the host has been notified.
    pub fn config_applied(&self) {
        if self.is_ready() {
            return;
        }

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        let events = Arc::clone(&self.events);
        let fired = Arc::clone(&self.fired);
        let settle = self.settle;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            if !fired.swap(true, Ordering::SeqCst) {
                lifecycle.notify_ready();
                events.publish(CarouselEvent::new(EventKind::HostReady));
            }
        }));
    }
}

impl Drop for ReadyNotifier {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }
}
