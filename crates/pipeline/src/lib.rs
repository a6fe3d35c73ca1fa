//! Slide resolution pipeline.
//!
//! Turns a page's source binding into display-ready slides:
//!
//! - [`ordering`]: which record ids to show, in which order.
//! - [`cache`]: per-page memo of resolved slides.
//! - [`resolution`]: the two-phase load cycle (first slide fast, then the
//!   rest) built on the value resolvers in `carousel_core::value`.
//! - [`preload`]: image readiness checks with one refresh-and-retry.

pub mod cache;
pub mod error;
pub mod ordering;
pub mod preload;
pub mod resolution;

pub use cache::{SharedSlideCache, SlideCache};
pub use error::{PipelineError, ProbeError};
pub use preload::{
    HttpImageProbe, ImagePreloader, ImageProbe, PreloadOutcome, PreloadStatus, TrustingProbe,
};
pub use resolution::{BoundSource, CycleReport, Publication, ResolutionPipeline};
