//! Progress-callback trait for per-item batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! real-time events as the orchestrator works through a batch. Callbacks are
//! the least-invasive integration point: the CLI forwards them to a terminal
//! progress bar, a service could forward them to a channel or a database row,
//! and the library stays ignorant of either.

use std::sync::Arc;

/// Called by the batch orchestrator as items move through the pipeline.
///
/// Implementations must be `Send + Sync`: with concurrency above 1,
/// `on_item_start`, `on_item_complete`, and `on_item_error` are called from
/// different tasks, possibly at the same time. Protect shared mutable state
/// with `Mutex` or atomics. All methods default to no-ops so callers only
/// override what they care about.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any item is scheduled.
    fn on_batch_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called just before an item's model call begins.
    ///
    /// `index` is the item's position in the original input order.
    fn on_item_start(&self, index: usize, source: &str, total_items: usize) {
        let _ = (index, source, total_items);
    }

    /// Called when an item reaches a successful terminal state.
    fn on_item_complete(
        &self,
        index: usize,
        source: &str,
        total_items: usize,
        medicines_count: usize,
    ) {
        let _ = (index, source, total_items, medicines_count);
    }

    /// Called when an item reaches a failed terminal state (any failure kind).
    fn on_item_error(&self, index: usize, source: &str, total_items: usize, error: &str) {
        let _ = (index, source, total_items, error);
    }

    /// Called once after every item is terminal, before the summary is stored.
    fn on_batch_complete(&self, total_items: usize, success_count: usize) {
        let _ = (total_items, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
