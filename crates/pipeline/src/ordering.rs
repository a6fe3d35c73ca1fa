//! Record ordering for a page.
//!
//! The base sequence comes from the page's view when one is available
//! (filtered, in display order) and from the whole table otherwise. Three
//! strategies then apply, cheapest first:
//!
//! 1. **View order** (fast path): `prefer_view_order` with a usable view keeps
//!    the view sequence, reversed when `latest_first` is off.
//! 2. **Time sort** (accurate path): with a time field, fetch every record's
//!    time cell concurrently and stable-sort by timestamp.
//! 3. **Natural**: the base sequence as-is.
//!
//! The result is truncated to `max(1, limit)`.

use std::sync::Arc;

use carousel_core::source::{Field, Table};
use carousel_core::value::to_timestamp;
use carousel_core::{RecordId, SourceError};
use futures::future::join_all;

/// Inputs to [`order_record_ids`].
pub struct OrderingQuery {
    pub view_id: Option<String>,
    pub time_field: Option<Arc<dyn Field>>,
    pub prefer_view_order: bool,
    pub latest_first: bool,
    pub limit: u32,
}

/// How the final order was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingStrategy {
    ViewOrder,
    TimeSorted,
    Natural,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderedIds {
    pub ids: Vec<RecordId>,
    pub strategy: OrderingStrategy,
    /// Whether the base sequence came from the view.
    pub from_view: bool,
}

/// Produce the ordered, truncated record id list for one load cycle.
///
/// Only a failure to list the table's records is an error; view failures
/// fall back to the table and time-cell failures sort as `0`.
pub async fn order_record_ids(
    table: &dyn Table,
    query: &OrderingQuery,
) -> Result<OrderedIds, SourceError> {
    let (mut ids, from_view) = base_sequence(table, query.view_id.as_deref()).await?;

    let strategy = if query.prefer_view_order && from_view {
        if !query.latest_first {
            ids.reverse();
        }
        OrderingStrategy::ViewOrder
    } else if let Some(field) = &query.time_field {
        let stamps = fetch_timestamps(field.as_ref(), &ids).await;
        ids = stable_time_sort(ids, &stamps, query.latest_first);
        OrderingStrategy::TimeSorted
    } else {
        OrderingStrategy::Natural
    };

    ids.truncate(query.limit.max(1) as usize);

    Ok(OrderedIds {
        ids,
        strategy,
        from_view,
    })
}

async fn base_sequence(
    table: &dyn Table,
    view_id: Option<&str>,
) -> Result<(Vec<RecordId>, bool), SourceError> {
    if let Some(view_id) = view_id {
        let listed = match table.get_view(view_id).await {
            Ok(view) => view.list_record_ids().await,
            Err(e) => Err(e),
        };
        match listed {
            Ok(ids) if !ids.is_empty() => return Ok((ids, true)),
            Ok(_) => {
                tracing::debug!(table_id = table.id(), view_id, "View is empty, using full table");
            }
            Err(e) => {
                tracing::warn!(
                    table_id = table.id(),
                    view_id,
                    error = %e,
                    "View unavailable, using full table",
                );
            }
        }
    }
    Ok((table.list_all_record_ids().await?, false))
}

async fn fetch_timestamps(field: &dyn Field, ids: &[RecordId]) -> Vec<f64> {
    join_all(ids.iter().map(|id| async move {
        match field.get_value(id).await {
            Ok(value) => to_timestamp(&value),
            Err(e) => {
                tracing::debug!(record_id = %id, error = %e, "Time value unavailable");
                0.0
            }
        }
    }))
    .await
}

/// Sort `ids` by `stamps` (same length), keeping the original relative order
/// of equal timestamps.
pub fn stable_time_sort(ids: Vec<RecordId>, stamps: &[f64], latest_first: bool) -> Vec<RecordId> {
    let mut keyed: Vec<(f64, RecordId)> = stamps.iter().copied().zip(ids).collect();
    keyed.sort_by(|a, b| {
        if latest_first {
            b.0.total_cmp(&a.0)
        } else {
            a.0.total_cmp(&b.0)
        }
    });
    keyed.into_iter().map(|(_, id)| id).collect()
}
