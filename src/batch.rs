//! Batch orchestration over many images with bounded concurrency.
//!
//! Built on `buffer_unordered`: up to `concurrency` items are in flight at
//! once, each one running the full per-image pipeline and persisting its own
//! result as soon as it is terminal. Completion order is whatever the network
//! gives us; the collected results are re-sorted by input index before the
//! summary is built, so two runs over the same inputs produce summaries in
//! the same order.
//!
//! Cancellation is cooperative: flipping a [`CancelFlag`] lets in-flight
//! items finish and records every not-yet-started item as a cancelled
//! failure, so the summary still accounts for all N inputs.

use crate::config::ExtractionConfig;
use crate::error::{ItemError, RxscribeError};
use crate::pipeline::process_item;
use crate::record::{BatchSummary, ProcessingResult};
use crate::store::ResultStore;
use crate::transport::ModelTransport;
use futures::stream::{self, StreamExt};
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Shared cancellation signal for a running batch.
///
/// Cheap to clone; hand one copy to the batch and keep another to cancel
/// from a signal handler or another task.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Items already in flight run to completion;
    /// items not yet started fail with a cancelled result.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stream of `(input index, source name, result)` triples in completion order.
pub type ResultStream = Pin<Box<dyn Stream<Item = (usize, String, ProcessingResult)> + Send>>;

/// Process a batch of images and persist one result per input plus a summary.
///
/// Always yields exactly one terminal result per input path; per-item
/// failures land in the summary, never in the returned `Err`. The only
/// fatal error is failing to write the batch summary itself.
pub async fn run_batch(
    transport: Arc<dyn ModelTransport>,
    config: &ExtractionConfig,
    store: &ResultStore,
    paths: &[PathBuf],
    cancel: &CancelFlag,
) -> Result<BatchSummary, RxscribeError> {
    let started = Instant::now();
    let total = paths.len();
    info!(
        "Starting batch: {total} image(s), concurrency {}",
        config.concurrency
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut results: Vec<(usize, String, ProcessingResult)> =
        stream::iter(paths.iter().cloned().enumerate())
            .map(|(index, path)| {
                let transport = Arc::clone(&transport);
                let cancel = cancel.clone();
                async move {
                    let source = display_name(&path);
                    let result = process_one(
                        transport.as_ref(),
                        config,
                        store,
                        &path,
                        &source,
                        index,
                        total,
                        &cancel,
                    )
                    .await;
                    (index, source, result)
                }
            })
            .buffer_unordered(config.concurrency)
            .collect()
            .await;

    results.sort_by_key(|(index, _, _)| *index);

    let success_count = results.iter().filter(|(_, _, r)| r.is_success()).count();
    if let Some(cb) = &config.progress_callback {
        cb.on_batch_complete(total, success_count);
    }

    let pairs: Vec<(String, ProcessingResult)> = results
        .into_iter()
        .map(|(_, source, result)| (source, result))
        .collect();
    let summary = BatchSummary::from_results(&pairs, started.elapsed().as_millis() as u64);

    store
        .save_batch_summary(&summary)
        .await
        .map_err(|e| RxscribeError::OutputWriteFailed {
            path: store.output_dir().join("summary.json"),
            source: e,
        })?;

    info!(
        "Batch complete: {}/{} succeeded in {}ms",
        summary.succeeded, summary.total, summary.total_elapsed_ms
    );
    Ok(summary)
}

/// Streaming variant: yields each `(index, source, result)` as it completes
/// instead of waiting for the whole batch. No summary is written; callers
/// that want one can collect the stream and build it themselves.
pub fn run_batch_stream(
    transport: Arc<dyn ModelTransport>,
    config: ExtractionConfig,
    store: ResultStore,
    paths: Vec<PathBuf>,
    cancel: CancelFlag,
) -> ResultStream {
    let total = paths.len();
    let concurrency = config.concurrency;
    let config = Arc::new(config);
    let store = Arc::new(store);

    Box::pin(
        stream::iter(paths.into_iter().enumerate())
            .map(move |(index, path)| {
                let transport = Arc::clone(&transport);
                let config = Arc::clone(&config);
                let store = Arc::clone(&store);
                let cancel = cancel.clone();
                async move {
                    let source = display_name(&path);
                    let result = process_one(
                        transport.as_ref(),
                        &config,
                        &store,
                        &path,
                        &source,
                        index,
                        total,
                        &cancel,
                    )
                    .await;
                    (index, source, result)
                }
            })
            .buffer_unordered(concurrency),
    )
}

/// One worker's turn: cancellation check, pipeline, persistence, callbacks.
#[allow(clippy::too_many_arguments)]
async fn process_one(
    transport: &dyn ModelTransport,
    config: &ExtractionConfig,
    store: &ResultStore,
    path: &Path,
    source: &str,
    index: usize,
    total: usize,
    cancel: &CancelFlag,
) -> ProcessingResult {
    let result = if cancel.is_cancelled() {
        let e = ItemError::Cancelled {
            source: source.to_string(),
        };
        ProcessingResult::failure(&e, 0)
    } else {
        if let Some(cb) = &config.progress_callback {
            cb.on_item_start(index, source, total);
        }
        process_item(transport, config, store, path).await
    };

    let result = persist(store, source, result).await;

    if let Some(cb) = &config.progress_callback {
        match &result {
            ProcessingResult::Success { .. } => {
                cb.on_item_complete(index, source, total, result.medicines_count())
            }
            ProcessingResult::Failure { error, .. } => {
                cb.on_item_error(index, source, total, error)
            }
        }
    }
    result
}

/// Write the per-item files. A persistence failure downgrades the result to
/// a storage failure so the summary never claims success for a record that
/// is not actually on disk.
async fn persist(store: &ResultStore, source: &str, result: ProcessingResult) -> ProcessingResult {
    let write = async {
        store.save_item(source, &result).await?;
        store.save_item_summary(source, &result).await
    };
    match write.await {
        Ok(_) => result,
        Err(e) => {
            let error = ItemError::Storage {
                source: source.to_string(),
                detail: e.to_string(),
            };
            warn!("{error}");
            ProcessingResult::failure(&error, result.elapsed_ms())
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
