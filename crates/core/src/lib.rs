//! Carousel core: data model and collaborator boundaries.
//!
//! This crate has zero internal deps so it can be shared by the pipeline,
//! the worker runtime, and any future tooling. It provides:
//!
//! - [`value`]: the [`RawCellValue`] variant plus the pure resolvers that
//!   turn schema-less cells into text, timestamps, and image URLs.
//! - [`config`]: persisted page/app configuration, legacy upgrade, and
//!   validation.
//! - [`source`]: the tabular data source traits and an in-memory
//!   implementation driven by JSON fixtures.
//! - [`store`]: configuration persistence with change subscription.
//! - [`host`]: host dashboard hooks (selection context, ready signal).

pub mod config;
pub mod error;
pub mod host;
pub mod source;
pub mod store;
pub mod types;
pub mod value;

pub use config::{AppConfig, PageConfig};
pub use error::{ConfigError, SourceError};
pub use types::{FieldKind, FieldMeta, PublishPhase, RecordId, Slide};
pub use value::RawCellValue;
