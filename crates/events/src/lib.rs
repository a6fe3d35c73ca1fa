//! Carousel event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`CarouselEvent`]: envelope for everything observable about running
//!   pages: published slide lists, index flips, preload outcomes, window
//!   changes, and host readiness.

pub mod bus;

pub use bus::{CarouselEvent, EventBus, EventKind};
