//! Tabular data source boundary.
//!
//! The carousel reads from a host-provided store of tables, views, fields,
//! and records. These traits describe the capabilities it consumes; the
//! host integration implements them, and [`memory::MemorySource`] provides
//! an in-process implementation for fixtures and tests.
//!
//! Handles are returned as `Arc<dyn ...>` so a resolved table or field can
//! be shared across the concurrent per-record fetches of one load cycle.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{FieldKind, FieldMeta, RecordId, TableMeta, ViewMeta};
use crate::value::RawCellValue;

pub use memory::MemorySource;

/// Entry point into the host's data store.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<TableMeta>, SourceError>;

    async fn get_table(&self, table_id: &str) -> Result<Arc<dyn Table>, SourceError>;

    /// The table currently focused in the host, used when a page names no
    /// table or names one that no longer exists.
    async fn active_table(&self) -> Result<Arc<dyn Table>, SourceError>;
}

#[async_trait]
pub trait Table: Send + Sync {
    fn id(&self) -> &str;

    async fn list_views(&self) -> Result<Vec<ViewMeta>, SourceError>;

    async fn get_view(&self, view_id: &str) -> Result<Arc<dyn View>, SourceError>;

    /// Every record id in the table's natural order, ignoring view filters.
    async fn list_all_record_ids(&self) -> Result<Vec<RecordId>, SourceError>;

    async fn list_field_meta(&self) -> Result<Vec<FieldMeta>, SourceError>;

    async fn get_field(&self, field_id: &str) -> Result<Arc<dyn Field>, SourceError>;
}

#[async_trait]
pub trait View: Send + Sync {
    fn id(&self) -> &str;

    /// Record ids visible in this view, in the view's display order.
    async fn list_record_ids(&self) -> Result<Vec<RecordId>, SourceError>;
}

#[async_trait]
pub trait Field: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> FieldKind;

    async fn get_value(&self, record_id: &str) -> Result<RawCellValue, SourceError>;

    /// Fresh, fetchable URLs for an attachment cell. Non-attachment fields
    /// return an empty list.
    async fn get_attachment_urls(&self, record_id: &str) -> Result<Vec<String>, SourceError>;
}
