//! Host dashboard hooks consumed by the carousel.

use async_trait::async_trait;

/// Ambient selection in the host, used as the view fallback when a page
/// names no view of its own.
#[async_trait]
pub trait SelectionContext: Send + Sync {
    async fn current_view_id(&self) -> Option<String>;
}

/// Lifecycle signals the host expects from an embedded block.
pub trait HostLifecycle: Send + Sync {
    /// Tell the host the block finished its first render. Must be called
    /// exactly once, whether or not any data has resolved yet.
    fn notify_ready(&self);
}

/// A selection that never changes.
#[derive(Debug, Clone, Default)]
pub struct StaticSelection {
    view_id: Option<String>,
}

impl StaticSelection {
    pub fn new(view_id: Option<String>) -> Self {
        Self { view_id }
    }
}

#[async_trait]
impl SelectionContext for StaticSelection {
    async fn current_view_id(&self) -> Option<String> {
        self.view_id.clone()
    }
}
