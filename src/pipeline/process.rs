//! End-to-end processing of a single image.
//!
//! [`process_item`] never returns an error: every exit, good or bad, is a
//! terminal [`ProcessingResult`] with the elapsed time attached. Callers
//! running a batch can therefore collect one result per input without any
//! error plumbing, and a single corrupted scan can never abort its siblings.

use crate::config::ExtractionConfig;
use crate::pipeline::invoke::invoke_model;
use crate::pipeline::normalize::normalize;
use crate::pipeline::source::load_image;
use crate::record::ProcessingResult;
use crate::store::ResultStore;
use crate::transport::ModelTransport;
use crate::error::ItemError;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Run the full pipeline for one image: load, invoke, normalize.
pub async fn process_item(
    transport: &dyn ModelTransport,
    config: &ExtractionConfig,
    store: &ResultStore,
    path: &Path,
) -> ProcessingResult {
    let started = Instant::now();
    let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

    let image = match load_image(path, config.max_image_bytes).await {
        Ok(image) => image,
        Err(e) => {
            warn!("{e}");
            return ProcessingResult::failure(&e, elapsed(started));
        }
    };

    let raw = match invoke_model(transport, config, store, &image).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("{e}");
            return ProcessingResult::failure(&e, elapsed(started));
        }
    };

    let prescription = match normalize(&raw, &image.display_name) {
        Ok(prescription) => prescription,
        Err(error) => {
            let e = ItemError::Validation {
                source: image.display_name.clone(),
                error,
            };
            warn!("{e}");
            return ProcessingResult::failure(&e, elapsed(started));
        }
    };

    // Transcription log is best effort; a failed write never fails the item.
    if prescription.ocr_text.is_some() {
        if let Err(e) = store.save_ocr_text(&prescription).await {
            warn!(
                "Could not save transcription for '{}': {e}",
                image.display_name
            );
        }
    }

    let elapsed_ms = elapsed(started);
    info!(
        "Extracted {} medicine(s) from '{}' in {}ms",
        prescription.medicines.len(),
        image.display_name,
        elapsed_ms
    );
    ProcessingResult::success(prescription, elapsed_ms)
}
