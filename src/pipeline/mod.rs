//! The per-image extraction pipeline.
//!
//! Stages, in order:
//!
//! 1. [`source`] reads and validates the input image,
//! 2. [`invoke`] calls the model and coerces its output into parsed JSON,
//!    retrying malformed output within a bounded budget,
//! 3. [`normalize`] turns raw JSON into a validated [`crate::record::ParsedPrescription`],
//! 4. [`process`] strings the stages together and converts every outcome,
//!    success or failure, into a [`crate::record::ProcessingResult`].

pub mod invoke;
pub mod normalize;
pub mod process;
pub mod source;

pub use process::process_item;
pub use source::{find_images, SourceImage};
