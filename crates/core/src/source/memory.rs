//! In-memory [`DataSource`] backed by a JSON fixture.
//!
//! Used by the worker binary for local runs and by tests across the
//! workspace. Tables are mutable after construction so tests can simulate
//! edits in the host store (new records, changed cells, expired attachment
//! URLs) and inject failures at the field, view, or table level.
//!
//! Fixture shape:
//!
//! ```json
//! {
//!   "activeTable": "tbl1",
//!   "tables": [{
//!     "id": "tbl1", "name": "News",
//!     "fields": [{"id": "fld_title", "name": "Title", "kind": "text", "isPrimary": true}],
//!     "views": [{"id": "vw1", "name": "Grid", "recordIds": ["rec1"]}],
//!     "records": [{"id": "rec1", "fields": {"fld_title": "Hello"}}]
//!   }]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::Deserialize;

use super::{DataSource, Field, Table, View};
use crate::error::SourceError;
use crate::types::{FieldKind, FieldMeta, RecordId, TableMeta, ViewMeta};
use crate::value::{pick_attachment_url, RawCellValue};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub active_table: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableFixture>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFixture {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldMeta>,
    #[serde(default)]
    pub views: Vec<ViewFixture>,
    #[serde(default)]
    pub records: Vec<RecordFixture>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFixture {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub record_ids: Vec<RecordId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFixture {
    pub id: RecordId,
    #[serde(default)]
    pub fields: BTreeMap<String, RawCellValue>,
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// A [`DataSource`] holding every table in memory.
#[derive(Clone, Default)]
pub struct MemorySource {
    tables: Vec<MemoryTable>,
    active_table: Option<String>,
}

impl MemorySource {
    pub fn from_fixture(fixture: Fixture) -> Self {
        let active_table = fixture
            .active_table
            .or_else(|| fixture.tables.first().map(|t| t.id.clone()));
        Self {
            tables: fixture.tables.into_iter().map(MemoryTable::new).collect(),
            active_table,
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_fixture(serde_json::from_str(text)?))
    }

    /// Direct access to a table for mutation and fault injection.
    pub fn table(&self, table_id: &str) -> Option<MemoryTable> {
        self.tables.iter().find(|t| t.id() == table_id).cloned()
    }

    pub fn set_active_table(&mut self, table_id: impl Into<String>) {
        self.active_table = Some(table_id.into());
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn list_tables(&self) -> Result<Vec<TableMeta>, SourceError> {
        Ok(self
            .tables
            .iter()
            .map(|t| TableMeta {
                id: t.id().to_string(),
                name: t.inner.name.clone(),
            })
            .collect())
    }

    async fn get_table(&self, table_id: &str) -> Result<Arc<dyn Table>, SourceError> {
        self.table(table_id)
            .map(|t| Arc::new(t) as Arc<dyn Table>)
            .ok_or_else(|| SourceError::TableNotFound(table_id.to_string()))
    }

    async fn active_table(&self) -> Result<Arc<dyn Table>, SourceError> {
        self.active_table
            .as_deref()
            .and_then(|id| self.table(id))
            .map(|t| Arc::new(t) as Arc<dyn Table>)
            .ok_or(SourceError::NoActiveTable)
    }
}

// ---------------------------------------------------------------------------
// MemoryTable
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to one in-memory table.
#[derive(Clone)]
pub struct MemoryTable {
    inner: Arc<TableInner>,
}

struct TableInner {
    id: String,
    name: String,
    state: RwLock<TableState>,
    /// Number of cell reads served (values and attachment URL lists).
    reads: AtomicUsize,
}

#[derive(Default)]
struct TableState {
    fields: Vec<FieldMeta>,
    views: Vec<ViewFixture>,
    records: Vec<RecordFixture>,
    failing_cells: HashSet<(String, RecordId)>,
    failing_views: HashSet<String>,
    offline: bool,
}

impl MemoryTable {
    fn new(fixture: TableFixture) -> Self {
        Self {
            inner: Arc::new(TableInner {
                id: fixture.id,
                name: fixture.name,
                state: RwLock::new(TableState {
                    fields: fixture.fields,
                    views: fixture.views,
                    records: fixture.records,
                    ..Default::default()
                }),
                reads: AtomicUsize::new(0),
            }),
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, TableState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, TableState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite one cell. Creates the record if it does not exist.
    pub fn set_value(&self, record_id: &str, field_id: &str, value: RawCellValue) {
        let mut state = self.write_state();
        match state.records.iter_mut().find(|r| r.id == record_id) {
            Some(record) => {
                record.fields.insert(field_id.to_string(), value);
            }
            None => state.records.push(RecordFixture {
                id: record_id.to_string(),
                fields: BTreeMap::from([(field_id.to_string(), value)]),
            }),
        }
    }

    /// Append a record to the table and to every view.
    pub fn push_record(&self, record: RecordFixture) {
        let mut state = self.write_state();
        for view in &mut state.views {
            view.record_ids.push(record.id.clone());
        }
        state.records.push(record);
    }

    pub fn remove_record(&self, record_id: &str) {
        let mut state = self.write_state();
        state.records.retain(|r| r.id != record_id);
        for view in &mut state.views {
            view.record_ids.retain(|id| id != record_id);
        }
    }

    /// Make reads of one cell fail until [`MemoryTable::heal_value`].
    pub fn fail_value(&self, field_id: &str, record_id: &str) {
        self.write_state()
            .failing_cells
            .insert((field_id.to_string(), record_id.to_string()));
    }

    pub fn heal_value(&self, field_id: &str, record_id: &str) {
        self.write_state()
            .failing_cells
            .remove(&(field_id.to_string(), record_id.to_string()));
    }

    /// Make listing a view's records fail.
    pub fn fail_view(&self, view_id: &str) {
        self.write_state().failing_views.insert(view_id.to_string());
    }

    /// When offline, every record listing fails.
    pub fn set_offline(&self, offline: bool) {
        self.write_state().offline = offline;
    }

    /// Total cell reads served so far.
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    fn cell(&self, field_id: &str, record_id: &str) -> Result<RawCellValue, SourceError> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.read_state();
        if state
            .failing_cells
            .contains(&(field_id.to_string(), record_id.to_string()))
        {
            return Err(SourceError::ValueUnavailable {
                field_id: field_id.to_string(),
                record_id: record_id.to_string(),
            });
        }
        Ok(state
            .records
            .iter()
            .find(|r| r.id == record_id)
            .and_then(|r| r.fields.get(field_id).cloned())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Table for MemoryTable {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn list_views(&self) -> Result<Vec<ViewMeta>, SourceError> {
        Ok(self
            .read_state()
            .views
            .iter()
            .map(|v| ViewMeta {
                id: v.id.clone(),
                name: v.name.clone(),
            })
            .collect())
    }

    async fn get_view(&self, view_id: &str) -> Result<Arc<dyn View>, SourceError> {
        let exists = self.read_state().views.iter().any(|v| v.id == view_id);
        if !exists {
            return Err(SourceError::ViewNotFound(view_id.to_string()));
        }
        Ok(Arc::new(MemoryView {
            table: self.clone(),
            id: view_id.to_string(),
        }))
    }

    async fn list_all_record_ids(&self) -> Result<Vec<RecordId>, SourceError> {
        let state = self.read_state();
        if state.offline {
            return Err(SourceError::Unavailable(format!(
                "table {} is offline",
                self.inner.id
            )));
        }
        Ok(state.records.iter().map(|r| r.id.clone()).collect())
    }

    async fn list_field_meta(&self) -> Result<Vec<FieldMeta>, SourceError> {
        Ok(self.read_state().fields.clone())
    }

    async fn get_field(&self, field_id: &str) -> Result<Arc<dyn Field>, SourceError> {
        let meta = self
            .read_state()
            .fields
            .iter()
            .find(|f| f.id == field_id)
            .cloned()
            .ok_or_else(|| SourceError::FieldNotFound(field_id.to_string()))?;
        Ok(Arc::new(MemoryField {
            table: self.clone(),
            meta,
        }))
    }
}

// ---------------------------------------------------------------------------
// View / Field handles
// ---------------------------------------------------------------------------

struct MemoryView {
    table: MemoryTable,
    id: String,
}

#[async_trait]
impl View for MemoryView {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_record_ids(&self) -> Result<Vec<RecordId>, SourceError> {
        let state = self.table.read_state();
        if state.offline || state.failing_views.contains(&self.id) {
            return Err(SourceError::Unavailable(format!("view {} failed", self.id)));
        }
        state
            .views
            .iter()
            .find(|v| v.id == self.id)
            .map(|v| v.record_ids.clone())
            .ok_or_else(|| SourceError::ViewNotFound(self.id.clone()))
    }
}

struct MemoryField {
    table: MemoryTable,
    meta: FieldMeta,
}

#[async_trait]
impl Field for MemoryField {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn kind(&self) -> FieldKind {
        self.meta.kind
    }

    async fn get_value(&self, record_id: &str) -> Result<RawCellValue, SourceError> {
        self.table.cell(&self.meta.id, record_id)
    }

    async fn get_attachment_urls(&self, record_id: &str) -> Result<Vec<String>, SourceError> {
        if self.meta.kind != FieldKind::Attachment {
            return Ok(Vec::new());
        }
        let value = self.table.cell(&self.meta.id, record_id)?;
        let items = match value {
            RawCellValue::Sequence(items) => items,
            RawCellValue::Null => Vec::new(),
            other => vec![other],
        };
        Ok(items.iter().filter_map(pick_attachment_url).collect())
    }
}
