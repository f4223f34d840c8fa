//! # rxscribe
//!
//! Structured medication extraction from prescription images, powered by a
//! vision-capable language model.
//!
//! The library owns everything except perception: it sends each image to an
//! external model under a strict structured-output contract, salvages and
//! retries malformed responses, normalizes what comes back into a canonical
//! [`ParsedPrescription`], fans batches out across bounded concurrent
//! workers with full per-item failure isolation, and persists every result
//! atomically in a fixed on-disk layout.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rxscribe::{
//!     run_batch, CancelFlag, ExtractionConfig, GeminiTransport, PromptConfig, ResultStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let prompts = PromptConfig::resolve(None, None, None)?;
//!     let config = ExtractionConfig::builder(prompts)
//!         .concurrency(5)
//!         .build()?;
//!
//!     let transport = Arc::new(GeminiTransport::new(
//!         std::env::var("GEMINI_API_KEY")?,
//!         "gemini-2.0-flash-exp",
//!     ));
//!     let store = ResultStore::new("output", "logs");
//!
//!     let paths = rxscribe::find_images("scans".as_ref(), false)?;
//!     let summary = run_batch(transport, &config, &store, &paths, &CancelFlag::new()).await?;
//!     println!("{}/{} extracted", summary.succeeded, summary.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`transport`] — the provider seam: [`ModelTransport`] plus a Gemini
//!   adapter. Everything above the trait is provider-agnostic.
//! - [`pipeline`] — per-image stages: source loading, model invocation with
//!   malformed-output retry, normalization, and the single-item processor.
//! - [`batch`] — `buffer_unordered` orchestration, progress callbacks,
//!   cooperative cancellation.
//! - [`store`] — atomic persistence of results, summaries, and debug dumps.
//!
//! Failures split into two levels: [`RxscribeError`] means extraction could
//! not start at all; [`ItemError`] means one image failed and is recorded in
//! that item's [`ProcessingResult`] while the rest of the batch continues.

pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod schema;
pub mod store;
pub mod transport;

pub use batch::{run_batch, run_batch_stream, CancelFlag, ResultStream};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ItemError, RxscribeError, ValidationError};
pub use pipeline::normalize::normalize;
pub use pipeline::process::process_item;
pub use pipeline::source::{find_images, SourceImage};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::{PromptConfig, DEFAULT_PROMPTS_PATH};
pub use record::{
    BatchSummary, FailureKind, ItemOutcome, Medicine, MedicineDispensing, MedicineIdentity,
    MedicineInstructions, ParsedPrescription, PrescriptionMeta, ProcessingResult,
};
pub use schema::{check_shape, response_schema};
pub use store::ResultStore;
pub use transport::{
    GeminiTransport, ModelTransport, TransportError, TransportRequest,
};
