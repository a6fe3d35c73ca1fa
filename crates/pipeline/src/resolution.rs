//! Two-phase load cycle.
//!
//! One cycle binds the page's source references to live handles, orders the
//! record ids, and publishes slide lists:
//!
//! - **Cached**: every target id is already in the cache, so the cached
//!   slides are published at once and nothing is fetched.
//! - **Optimistic**: the first uncached record is resolved alone and the
//!   cached subset of the target list is published, so something appears
//!   as early as possible.
//! - **Complete**: the remaining uncached records are resolved concurrently
//!   and the full list is published.
//!
//! Within one cycle the optimistic publication always precedes the complete
//! one. Deciding whether a publication resets the displayed index belongs to
//! the consumer, which knows what is currently on screen.

use std::collections::HashMap;
use std::sync::Arc;

use carousel_core::config::SourceBinding;
use carousel_core::host::SelectionContext;
use carousel_core::source::{DataSource, Field, Table};
use carousel_core::value::{pick_attachment_url, to_plain_text};
use carousel_core::{PublishPhase, RecordId, Slide};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::cache::SharedSlideCache;
use crate::error::PipelineError;
use crate::ordering::{order_record_ids, OrderingQuery};

/// A slide list ready to be displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub phase: PublishPhase,
    pub slides: Vec<Slide>,
}

/// Summary of a finished cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub target: Vec<RecordId>,
    /// Records resolved from the source (cache misses).
    pub resolved: usize,
}

/// Live handles for one cycle.
pub struct BoundSource {
    pub table: Arc<dyn Table>,
    pub view_id: Option<String>,
    pub title: Option<Arc<dyn Field>>,
    pub desc: Option<Arc<dyn Field>>,
    pub image: Option<Arc<dyn Field>>,
    pub time: Option<Arc<dyn Field>>,
}

/// Orchestrates ordering, value resolution, and the slide cache.
#[derive(Clone)]
pub struct ResolutionPipeline {
    source: Arc<dyn DataSource>,
    selection: Arc<dyn SelectionContext>,
}

impl ResolutionPipeline {
    pub fn new(source: Arc<dyn DataSource>, selection: Arc<dyn SelectionContext>) -> Self {
        Self { source, selection }
    }

    /// Resolve the binding's ids to live handles.
    ///
    /// A missing table falls back to the host's active table; a missing
    /// view falls back to the host selection; a missing title field falls
    /// back to the primary field. Fields that fail to resolve are skipped.
    pub async fn bind(&self, binding: &SourceBinding) -> Result<BoundSource, PipelineError> {
        let table = match binding.table_id.as_deref() {
            Some(table_id) => match self.source.get_table(table_id).await {
                Ok(table) => table,
                Err(e) => {
                    tracing::warn!(table_id, error = %e, "Table unavailable, using active table");
                    self.source.active_table().await?
                }
            },
            None => self.source.active_table().await?,
        };

        let view_id = match &binding.view_id {
            Some(view_id) => Some(view_id.clone()),
            None => self.selection.current_view_id().await,
        };

        let title_id = match &binding.title_field_id {
            Some(id) => Some(id.clone()),
            None => primary_field_id(table.as_ref()).await,
        };

        let (title, desc, image, time) = tokio::join!(
            lookup_field(table.as_ref(), title_id.as_deref()),
            lookup_field(table.as_ref(), binding.desc_field_id.as_deref()),
            lookup_field(table.as_ref(), binding.image_field_id.as_deref()),
            lookup_field(table.as_ref(), binding.time_field_id.as_deref()),
        );

        Ok(BoundSource {
            table,
            view_id,
            title,
            desc,
            image,
            time,
        })
    }

    /// Run one load cycle, handing each publication to `publish` in order.
    ///
    /// Returns [`PipelineError::Cancelled`] without publishing further once
    /// `cancel` fires. Any other error means nothing was published and the
    /// caller should keep what it already shows.
    pub async fn run_cycle(
        &self,
        binding: &SourceBinding,
        cache: &SharedSlideCache,
        cancel: &CancellationToken,
        publish: &mut (dyn FnMut(Publication) + Send),
    ) -> Result<CycleReport, PipelineError> {
        let bound = self.bind(binding).await?;
        ensure_live(cancel)?;
        self.run_bound(&bound, binding, cache, cancel, publish).await
    }

    /// The part of [`ResolutionPipeline::run_cycle`] after binding, for
    /// callers that need the bound handles before anything is published.
    pub async fn run_bound(
        &self,
        bound: &BoundSource,
        binding: &SourceBinding,
        cache: &SharedSlideCache,
        cancel: &CancellationToken,
        publish: &mut (dyn FnMut(Publication) + Send),
    ) -> Result<CycleReport, PipelineError> {
        let ordered = order_record_ids(
            bound.table.as_ref(),
            &OrderingQuery {
                view_id: bound.view_id.clone(),
                time_field: bound.time.clone(),
                prefer_view_order: binding.prefer_view_order,
                latest_first: binding.latest_first,
                limit: binding.limit,
            },
        )
        .await?;
        ensure_live(cancel)?;

        tracing::debug!(
            table_id = bound.table.id(),
            strategy = ?ordered.strategy,
            from_view = ordered.from_view,
            records = ordered.ids.len(),
            "Record ids ordered",
        );
        let target = ordered.ids;

        // Hits are taken once up front; publications are built from them plus
        // this cycle's resolutions, so eviction cannot shorten a list.
        let mut known: HashMap<RecordId, Slide> = HashMap::with_capacity(target.len());
        {
            let mut guard = cache.lock().await;
            guard.reserve_for(target.len());
            for slide in guard.slides_for(&target) {
                known.insert(slide.id.clone(), slide);
            }
        }
        let uncached: Vec<RecordId> = target
            .iter()
            .filter(|id| !known.contains_key(id.as_str()))
            .cloned()
            .collect();

        // Cache-hit path: nothing to fetch.
        if uncached.is_empty() {
            publish(Publication {
                phase: PublishPhase::Cached,
                slides: in_target_order(&target, &known),
            });
            return Ok(CycleReport {
                target,
                resolved: 0,
            });
        }

        // First uncached record alone, for time-to-first-paint.
        let (first, rest) = uncached.split_at(1);
        let first_slide = resolve_slide(bound, &first[0]).await;
        ensure_live(cancel)?;
        cache.lock().await.insert(first_slide.clone());
        known.insert(first_slide.id.clone(), first_slide);
        publish(Publication {
            phase: PublishPhase::Optimistic,
            slides: in_target_order(&target, &known),
        });

        // Everything else concurrently.
        let resolved = join_all(rest.iter().map(|id| resolve_slide(bound, id))).await;
        ensure_live(cancel)?;
        {
            let mut guard = cache.lock().await;
            for slide in resolved {
                guard.insert(slide.clone());
                known.insert(slide.id.clone(), slide);
            }
        }
        publish(Publication {
            phase: PublishPhase::Complete,
            slides: in_target_order(&target, &known),
        });

        Ok(CycleReport {
            target,
            resolved: uncached.len(),
        })
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

async fn primary_field_id(table: &dyn Table) -> Option<String> {
    match table.list_field_meta().await {
        Ok(metas) => metas.into_iter().find(|m| m.is_primary).map(|m| m.id),
        Err(e) => {
            tracing::warn!(table_id = table.id(), error = %e, "Field metadata unavailable");
            None
        }
    }
}

async fn lookup_field(table: &dyn Table, field_id: Option<&str>) -> Option<Arc<dyn Field>> {
    let field_id = field_id?;
    match table.get_field(field_id).await {
        Ok(field) => Some(field),
        Err(e) => {
            tracing::debug!(table_id = table.id(), field_id, error = %e, "Skipping unresolvable field");
            None
        }
    }
}

/// Slides for `ids` in that order, skipping ids not yet known.
fn in_target_order(ids: &[RecordId], known: &HashMap<RecordId, Slide>) -> Vec<Slide> {
    ids.iter().filter_map(|id| known.get(id).cloned()).collect()
}

/// Resolve one record's slide. Each field is fetched concurrently and any
/// failure leaves that field empty.
pub async fn resolve_slide(bound: &BoundSource, record_id: &str) -> Slide {
    let (title, desc, image_url) = tokio::join!(
        resolve_text(bound.title.as_deref(), record_id),
        resolve_text(bound.desc.as_deref(), record_id),
        resolve_image_url(bound.image.as_deref(), record_id),
    );
    Slide {
        id: record_id.to_string(),
        title: title.unwrap_or_default(),
        desc: desc.filter(|d| !d.is_empty()),
        image_url,
    }
}

async fn resolve_text(field: Option<&dyn Field>, record_id: &str) -> Option<String> {
    let field = field?;
    match field.get_value(record_id).await {
        Ok(value) => Some(to_plain_text(&value)),
        Err(e) => {
            tracing::debug!(field_id = field.id(), record_id, error = %e, "Text field unavailable");
            None
        }
    }
}

/// Best current image URL for a record: the first attachment URL the field
/// hands out, else whatever the raw cell carries.
pub async fn resolve_image_url(field: Option<&dyn Field>, record_id: &str) -> Option<String> {
    let field = field?;
    match field.get_attachment_urls(record_id).await {
        Ok(urls) => {
            if let Some(url) = urls.into_iter().find(|u| !u.trim().is_empty()) {
                return Some(url);
            }
        }
        Err(e) => {
            tracing::debug!(field_id = field.id(), record_id, error = %e, "Attachment URLs unavailable");
        }
    }
    match field.get_value(record_id).await {
        Ok(value) => pick_attachment_url(&value),
        Err(_) => None,
    }
}
