//! Carousel worker runtime.
//!
//! - [`rotation`]: the per-page slide rotation state machine.
//! - [`page`]: one task per page: refresh timer, load cycles, rotation,
//!   image preloading, and the [`page::PageView`] render surface.
//! - [`coordinator`]: the rotating window of active pages.
//! - [`host`]: the one-shot host readiness signal.
//! - [`settings`]: environment settings for the `carousel-worker` binary.

pub mod coordinator;
pub mod error;
pub mod host;
pub mod page;
pub mod rotation;
pub mod settings;

pub use coordinator::{active_window, MultiPageCoordinator};
pub use error::WorkerError;
pub use host::{LoggingLifecycle, ReadyNotifier};
pub use page::{PageDeps, PageHandle, PageView};
pub use settings::WorkerSettings;
