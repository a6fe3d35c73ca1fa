//! Slide rotation state machine.
//!
//! [`Rotation`] holds the displayed slide list and index and decides what a
//! timer fire means. It owns no timers itself: the page runtime arms a
//! deadline after every flip and feeds fires back through
//! [`Rotation::on_tick`]. Keeping the machine synchronous lets every
//! transition be tested without a runtime.
//!
//! ```text
//!            set_slides(non-empty)          tick, next ready
//!   Idle ─────────────────────────▶ Waiting ◀───────────────┐
//!    ▲                                │  │                    │
//!    │ clear / set_slides(empty)      │  └─ tick, next unknown ─▶ Transitioning
//!    └────────────────────────────────┘        complete_transition ─┘
//! ```

use std::time::Duration;

use carousel_core::config::MIN_ROTATION_INTERVAL;
use carousel_core::{RecordId, Slide};
use carousel_pipeline::PreloadStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    /// No slides.
    Idle,
    /// A flip timer is (or may be) armed.
    Waiting,
    /// Checking the next slide's image before flipping.
    Transitioning,
}

/// What a timer fire asks the runtime to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to flip to.
    Hold,
    /// The index moved; re-arm the timer.
    Flipped { index: usize },
    /// Preload the next image, then call [`Rotation::complete_transition`]
    /// with `epoch` whatever the outcome.
    Preload {
        next: usize,
        record_id: RecordId,
        url: String,
        epoch: u64,
    },
}

/// Result of replacing the slide list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidesUpdate {
    /// The list differs from the previous one in any way.
    pub changed: bool,
    /// The record id sequence changed, so the index went back to 0.
    pub reset: bool,
}

#[derive(Debug, Clone)]
pub struct Rotation {
    slides: Vec<Slide>,
    index: usize,
    state: RotationState,
    interval: Duration,
    /// Bumped whenever the list changes, so a transition started against an
    /// older list is discarded.
    epoch: u64,
}

impl Rotation {
    pub fn new(interval: Duration) -> Self {
        Self {
            slides: Vec::new(),
            index: 0,
            state: RotationState::Idle,
            interval: interval.max(MIN_ROTATION_INTERVAL),
            epoch: 0,
        }
    }

    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&Slide> {
        self.slides.get(self.index)
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a flip timer should be running.
    pub fn wants_timer(&self) -> bool {
        self.state == RotationState::Waiting && self.slides.len() > 1
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.max(MIN_ROTATION_INTERVAL);
    }

    /// Replace the displayed list. The index resets to 0 when the id
    /// sequence changed and is clamped into range otherwise.
    pub fn set_slides(&mut self, slides: Vec<Slide>) -> SlidesUpdate {
        if slides == self.slides {
            return SlidesUpdate {
                changed: false,
                reset: false,
            };
        }

        let reset = !same_ids(&self.slides, &slides);
        self.slides = slides;
        self.epoch += 1;
        if reset {
            self.index = 0;
        } else {
            self.index = self.index.min(self.slides.len().saturating_sub(1));
        }
        self.state = if self.slides.is_empty() {
            RotationState::Idle
        } else {
            RotationState::Waiting
        };

        SlidesUpdate {
            changed: true,
            reset,
        }
    }

    /// Drop every slide, back to `Idle` at index 0.
    pub fn clear(&mut self) {
        self.slides.clear();
        self.index = 0;
        self.state = RotationState::Idle;
        self.epoch += 1;
    }

    /// Swap in a refreshed image URL for one record without touching the
    /// index or the epoch.
    pub fn patch_image(&mut self, record_id: &str, url: &str) -> bool {
        match self.slides.iter_mut().find(|s| s.id == record_id) {
            Some(slide) => {
                slide.image_url = Some(url.to_string());
                true
            }
            None => false,
        }
    }

    /// Handle a timer fire. `status` reports the preload state of a URL.
    pub fn on_tick(&mut self, status: impl Fn(&str) -> PreloadStatus) -> Tick {
        if !self.wants_timer() {
            return Tick::Hold;
        }

        let next = (self.index + 1) % self.slides.len();
        let slide = &self.slides[next];
        let pending = match &slide.image_url {
            Some(url) if status(url) != PreloadStatus::Loaded => Some((slide.id.clone(), url.clone())),
            _ => None,
        };
        match pending {
            Some((record_id, url)) => {
                self.state = RotationState::Transitioning;
                Tick::Preload {
                    next,
                    record_id,
                    url,
                    epoch: self.epoch,
                }
            }
            None => Tick::Flipped {
                index: self.flip_to(next),
            },
        }
    }

    /// Finish a transition started by [`Tick::Preload`]. Returns the new
    /// index, or `None` when the list changed in the meantime.
    pub fn complete_transition(&mut self, epoch: u64) -> Option<usize> {
        if self.state != RotationState::Transitioning || epoch != self.epoch {
            return None;
        }
        let next = (self.index + 1) % self.slides.len();
        Some(self.flip_to(next))
    }

    /// Abandon a pending transition, back to `Waiting` at the same index.
    /// The preload started for it no longer completes anything.
    pub fn cancel_transition(&mut self) -> bool {
        if self.state != RotationState::Transitioning {
            return false;
        }
        self.state = RotationState::Waiting;
        self.epoch += 1;
        true
    }

    fn flip_to(&mut self, next: usize) -> usize {
        self.index = next;
        self.state = RotationState::Waiting;
        next
    }
}

fn same_ids(a: &[Slide], b: &[Slide]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id == y.id)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn slide(id: &str, image: Option<&str>) -> Slide {
        Slide {
            title: id.to_uppercase(),
            image_url: image.map(str::to_string),
            ..Slide::empty(id)
        }
    }

    fn three() -> Vec<Slide> {
        vec![slide("a", None), slide("b", None), slide("c", None)]
    }

    fn always(status: PreloadStatus) -> impl Fn(&str) -> PreloadStatus {
        move |_: &str| status
    }

    #[test]
    fn interval_has_a_floor() {
        let mut rotation = Rotation::new(Duration::from_millis(10));
        assert_eq!(rotation.interval(), Duration::from_millis(1000));
        rotation.set_interval(Duration::from_millis(4500));
        assert_eq!(rotation.interval(), Duration::from_millis(4500));
    }

    #[test]
    fn wraps_modulo_slide_count() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        rotation.set_slides(three());
        assert_eq!(rotation.state(), RotationState::Waiting);

        let mut seen = Vec::new();
        for _ in 0..4 {
            assert_matches!(rotation.on_tick(always(PreloadStatus::Unknown)), Tick::Flipped { index } => seen.push(index));
        }
        assert_eq!(seen, [1, 2, 0, 1]);
    }

    #[test]
    fn empty_and_single_slide_never_flip() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        assert_eq!(rotation.on_tick(always(PreloadStatus::Loaded)), Tick::Hold);
        assert_eq!(rotation.state(), RotationState::Idle);

        rotation.set_slides(vec![slide("only", Some("u"))]);
        assert_eq!(rotation.state(), RotationState::Waiting);
        assert!(!rotation.wants_timer());
        assert_eq!(rotation.on_tick(always(PreloadStatus::Unknown)), Tick::Hold);
        assert_eq!(rotation.index(), 0);
    }

    #[test]
    fn unknown_image_goes_through_transition() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        rotation.set_slides(vec![slide("a", None), slide("b", Some("https://img/b"))]);

        let tick = rotation.on_tick(always(PreloadStatus::Unknown));
        let epoch = assert_matches!(tick, Tick::Preload { next: 1, record_id, url, epoch } => {
            assert_eq!(record_id, "b");
            assert_eq!(url, "https://img/b");
            epoch
        });
        assert_eq!(rotation.state(), RotationState::Transitioning);
        // Further ticks while transitioning do nothing.
        assert_eq!(rotation.on_tick(always(PreloadStatus::Loaded)), Tick::Hold);

        assert_eq!(rotation.complete_transition(epoch), Some(1));
        assert_eq!(rotation.state(), RotationState::Waiting);
    }

    #[test]
    fn loaded_image_flips_directly() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        rotation.set_slides(vec![slide("a", None), slide("b", Some("https://img/b"))]);
        assert_eq!(
            rotation.on_tick(always(PreloadStatus::Loaded)),
            Tick::Flipped { index: 1 }
        );
    }

    #[test]
    fn list_change_discards_pending_transition() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        rotation.set_slides(vec![slide("a", None), slide("b", Some("u"))]);
        let Tick::Preload { epoch, .. } = rotation.on_tick(always(PreloadStatus::Failed)) else {
            panic!("expected a preload");
        };

        rotation.set_slides(three());
        assert_eq!(rotation.complete_transition(epoch), None);
        assert_eq!(rotation.index(), 0);
        assert_eq!(rotation.state(), RotationState::Waiting);
    }

    #[test]
    fn cancelled_transition_keeps_index() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        rotation.set_slides(vec![slide("a", None), slide("b", Some("u"))]);
        assert!(!rotation.cancel_transition());
        let Tick::Preload { epoch, .. } = rotation.on_tick(always(PreloadStatus::Unknown)) else {
            panic!("expected a preload");
        };

        assert!(rotation.cancel_transition());
        assert_eq!(rotation.state(), RotationState::Waiting);
        assert_eq!(rotation.complete_transition(epoch), None);
        assert_eq!(rotation.index(), 0);
        assert!(rotation.wants_timer());
    }

    #[test]
    fn same_ids_clamp_instead_of_reset() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        rotation.set_slides(three());
        rotation.on_tick(always(PreloadStatus::Loaded));
        rotation.on_tick(always(PreloadStatus::Loaded));
        assert_eq!(rotation.index(), 2);

        // Same ids, new content: keep the index.
        let mut updated = three();
        updated[0].title = "A2".into();
        let update = rotation.set_slides(updated.clone());
        assert_eq!(
            update,
            SlidesUpdate {
                changed: true,
                reset: false
            }
        );
        assert_eq!(rotation.index(), 2);

        // Identical list: no change at all.
        assert!(!rotation.set_slides(updated).changed);

        // Different ids: back to 0.
        let update = rotation.set_slides(vec![slide("x", None), slide("a", None)]);
        assert!(update.reset);
        assert_eq!(rotation.index(), 0);
    }

    #[test]
    fn patch_image_keeps_position() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        rotation.set_slides(vec![slide("a", Some("old")), slide("b", None)]);
        assert!(rotation.patch_image("a", "new"));
        assert!(!rotation.patch_image("zz", "new"));
        assert_eq!(
            rotation.current().and_then(|s| s.image_url.as_deref()),
            Some("new")
        );
    }

    #[test]
    fn clear_returns_to_idle() {
        let mut rotation = Rotation::new(Duration::from_secs(3));
        rotation.set_slides(three());
        rotation.on_tick(always(PreloadStatus::Loaded));
        rotation.clear();
        assert_eq!(rotation.state(), RotationState::Idle);
        assert_eq!(rotation.index(), 0);
        assert!(rotation.slides().is_empty());
    }
}
