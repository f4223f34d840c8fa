//! Error types for the rxscribe library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RxscribeError`] — **Fatal**: extraction cannot start at all (no prompt
//!   configuration, invalid config, store root not writable). Returned as
//!   `Err(RxscribeError)` from setup functions before any image is touched.
//!
//! * [`ItemError`] — **Non-fatal**: a single image failed (unreadable file,
//!   transport error, malformed model output, invalid record) but all other
//!   images in a batch are fine. Converted into the failure variant of
//!   [`crate::record::ProcessingResult`] so callers inspect partial success
//!   rather than losing the whole batch to one bad image.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! item failure, log and continue, or collect all errors for a post-run report.

use crate::record::FailureKind;
use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the rxscribe library.
///
/// Per-item failures use [`ItemError`] and end up inside
/// [`crate::record::ProcessingResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum RxscribeError {
    /// No system prompt could be resolved from any source.
    #[error(
        "System prompt not found.\n\
         Provide one explicitly, set RXSCRIBE_SYSTEM_PROMPT, or add \
         \"system_prompt\" to {path}"
    )]
    PromptMissing { path: String },

    /// No user instruction template could be resolved from any source.
    #[error(
        "User prompt template not found.\n\
         Provide one explicitly, set RXSCRIBE_USER_PROMPT_TEMPLATE, or add \
         \"user_prompt_template\" to {path}"
    )]
    TemplateMissing { path: String },

    /// The user template does not contain the mandatory `{filename}` slot.
    #[error("User prompt template must contain a '{{filename}}' placeholder")]
    TemplateMissingPlaceholder,

    /// The prompts file exists but could not be read or parsed.
    #[error("Failed to load prompt configuration from '{path}': {detail}")]
    PromptConfigUnreadable { path: String, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not create or write a result file outside the per-item flow.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure for a single image.
///
/// Every variant carries the source identifier so log lines and stored
/// failure records stay attributable after results are aggregated.
// `Display` and `Error` are implemented by hand rather than derived via
// thiserror: every variant's `source` field is the *image* identifier (a
// `String`), which thiserror would otherwise infer as the error chain's
// `source()` and fail to compile.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The image could not be read or is not a supported image.
    Source { source: String, detail: String },

    /// The call to the external model failed at the transport level.
    /// Never retried by the invoker; surfaced immediately.
    Transport {
        source: String,
        error: TransportError,
    },

    /// The model answered, but no attempt produced JSON matching the
    /// response contract. The last raw body is preserved as a debug artifact.
    MalformedOutput {
        source: String,
        attempts: u32,
        detail: String,
        debug_artifact: Option<PathBuf>,
    },

    /// The response was well-formed JSON but violates a domain invariant.
    /// Never retried: at temperature 0 the model would answer the same way.
    Validation {
        source: String,
        error: ValidationError,
    },

    /// Persisting a result failed. Logged; never aborts sibling items.
    Storage { source: String, detail: String },

    /// The batch was cancelled before this item started.
    Cancelled { source: String },
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemError::Source { source, detail } => {
                write!(f, "Cannot read source '{source}': {detail}")
            }
            ItemError::Transport { source, error } => {
                write!(f, "Transport failure for '{source}': {error}")
            }
            ItemError::MalformedOutput {
                source,
                attempts,
                detail,
                ..
            } => write!(
                f,
                "Malformed model output for '{source}' after {attempts} attempts: {detail}"
            ),
            ItemError::Validation { source, error } => {
                write!(f, "Validation failed for '{source}': {error}")
            }
            ItemError::Storage { source, detail } => {
                write!(f, "Failed to persist result for '{source}': {detail}")
            }
            ItemError::Cancelled { source } => {
                write!(f, "Cancelled before '{source}' started")
            }
        }
    }
}

impl std::error::Error for ItemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ItemError::Transport { error, .. } => Some(error),
            ItemError::Validation { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl ItemError {
    /// The coarse failure category recorded in stored results.
    pub fn kind(&self) -> FailureKind {
        match self {
            ItemError::Source { .. } => FailureKind::Source,
            ItemError::Transport { .. } => FailureKind::Transport,
            ItemError::MalformedOutput { .. } => FailureKind::MalformedOutput,
            ItemError::Validation { .. } => FailureKind::Validation,
            ItemError::Storage { .. } => FailureKind::Storage,
            ItemError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

/// Structural violations found while normalizing a model response.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ValidationError {
    /// The response top level is not a JSON object.
    #[error("response is not a JSON object")]
    NotAnObject,

    /// `prescription_meta` arrived as a bare string instead of an object.
    #[error("prescription_meta is a string ('{value}'), expected an object")]
    MetaNotObject { value: String },

    /// A medicine entry is missing one of the required identity fields.
    /// The first offending entry is reported by index and field name.
    #[error("medicine {index}: required field '{field}' is missing or empty")]
    MissingField { index: usize, field: String },

    /// A medicine entry is not an object at all.
    #[error("medicine {index}: expected an object, got {found}")]
    EntryNotObject { index: usize, found: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_names_field_and_index() {
        let e = ValidationError::MissingField {
            index: 2,
            field: "generic_name".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("medicine 2"), "got: {msg}");
        assert!(msg.contains("generic_name"), "got: {msg}");
    }

    #[test]
    fn malformed_output_display() {
        let e = ItemError::MalformedOutput {
            source: "rx1.jpg".into(),
            attempts: 3,
            detail: "unbalanced braces".into(),
            debug_artifact: None,
        };
        let msg = e.to_string();
        assert!(msg.contains("rx1.jpg"));
        assert!(msg.contains("3 attempts"));
    }

    #[test]
    fn kind_maps_every_variant() {
        let v = ItemError::Validation {
            source: "a".into(),
            error: ValidationError::NotAnObject,
        };
        assert_eq!(v.kind(), FailureKind::Validation);

        let c = ItemError::Cancelled { source: "b".into() };
        assert_eq!(c.kind(), FailureKind::Cancelled);
    }

    #[test]
    fn template_placeholder_display_escapes_braces() {
        let e = RxscribeError::TemplateMissingPlaceholder;
        assert!(e.to_string().contains("{filename}"));
    }
}
