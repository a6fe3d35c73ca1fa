//! Per-page memo of resolved slides keyed by record id.
//!
//! Entries only ever gain information: inserting a resolution for a cached
//! id merges it into the existing slide (see [`Slide::merge_from`]). The one
//! sanctioned overwrite is [`SlideCache::update_image_url`] for expired
//! attachment URLs.
//!
//! By default the cache is unbounded. With a capacity it evicts the least
//! recently used entry; recency is the insertion order of the backing
//! `IndexMap`, refreshed on every read through [`SlideCache::slides_for`].
//! The capacity never drops below the longest target list seen through
//! [`SlideCache::reserve_for`].

use std::sync::Arc;

use carousel_core::{RecordId, Slide};
use indexmap::IndexMap;
use tokio::sync::Mutex;

/// The cache as shared between a page runtime, its load cycles, and its
/// image preloader.
pub type SharedSlideCache = Arc<Mutex<SlideCache>>;

#[derive(Debug, Default)]
pub struct SlideCache {
    entries: IndexMap<RecordId, Slide>,
    capacity: Option<usize>,
}

impl SlideCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `capacity` slides (minimum 1).
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn shared(self) -> SharedSlideCache {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Look up without touching recency.
    pub fn peek(&self, id: &str) -> Option<&Slide> {
        self.entries.get(id)
    }

    /// Raise the capacity to at least `len` so a whole target list fits.
    pub fn reserve_for(&mut self, len: usize) {
        if let Some(capacity) = &mut self.capacity {
            *capacity = (*capacity).max(len);
        }
    }

    /// Cached slides for `ids` in the given order, skipping misses. With a
    /// capacity, every hit becomes most recently used.
    pub fn slides_for(&mut self, ids: &[RecordId]) -> Vec<Slide> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(index) = self.entries.get_index_of(id.as_str()) {
                let index = self.touch(index);
                out.push(self.entries[index].clone());
            }
        }
        out
    }

    /// Insert or merge a resolution. Never blanks populated fields.
    pub fn insert(&mut self, slide: Slide) {
        match self.entries.get_index_of(slide.id.as_str()) {
            Some(index) => {
                self.entries[index].merge_from(slide);
                self.touch(index);
            }
            None => {
                self.entries.insert(slide.id.clone(), slide);
                self.evict_over_capacity();
            }
        }
    }

    /// Replace a cached slide's image URL. Returns `false` when the record
    /// is not cached.
    pub fn update_image_url(&mut self, id: &str, url: String) -> bool {
        match self.entries.get_mut(id) {
            Some(slide) => {
                slide.image_url = Some(url);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Mark an entry most recently used. Unbounded caches keep insertion
    /// order untouched.
    fn touch(&mut self, index: usize) -> usize {
        if self.capacity.is_none() {
            return index;
        }
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        last
    }

    fn evict_over_capacity(&mut self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() > capacity {
            if let Some((id, _)) = self.entries.shift_remove_index(0) {
                tracing::debug!(record_id = %id, "Evicted slide from cache");
            }
        }
    }
}
