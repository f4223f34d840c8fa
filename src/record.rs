//! Canonical output types: the parsed prescription record, the per-item
//! processing result, and the batch aggregate.
//!
//! The model may phrase its JSON slightly differently between providers and
//! runs; everything downstream of the normalizer speaks only these types.
//! All of them serialize with `serde` because they are persisted verbatim by
//! [`crate::store::ResultStore`] and rendered as JSON by front ends.

use crate::error::ItemError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Prescription record ──────────────────────────────────────────────────

/// Identity block of one medicine entry.
///
/// `generic_name`, `form`, and `strength` are required and non-empty by
/// construction: the normalizer rejects entries that violate this rather
/// than producing a record with blank required fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineIdentity {
    /// Brand name, when printed on the prescription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    /// Generic (INN) name of the medication.
    pub generic_name: String,
    /// Dosage form, e.g. "Capsule", "Tablet", "Syrup", "Injection".
    pub form: String,
    /// Dosage strength, e.g. "500 mg", "10 mg/ml".
    pub strength: String,
}

/// Administration instructions for one medicine entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineInstructions {
    /// Route of administration. Defaults to "Oral" when the model omits it.
    pub route: String,
    /// Quantity per dose, e.g. "1", "2 tablets", "5 ml".
    #[serde(default)]
    pub dose_quantity: String,
    /// How often to take, e.g. "Every 8 hours", "Once daily".
    #[serde(default)]
    pub frequency: String,
    /// How long to take, e.g. "7 days", "As needed".
    #[serde(default)]
    pub duration: String,
    /// Free-text notes, e.g. "Take with food".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
}

/// Dispensing block of one medicine entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineDispensing {
    /// Total quantity to dispense, e.g. "21 capsules".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_quantity: Option<String>,
    /// Number of refills allowed. Defaults to 0.
    #[serde(default)]
    pub refills: u32,
    /// Whether generic substitution is allowed. Defaults to true.
    #[serde(default = "default_true")]
    pub substitution_allowed: bool,
}

fn default_true() -> bool {
    true
}

/// One fully normalized medicine entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
    pub identity: MedicineIdentity,
    pub instructions: MedicineInstructions,
    pub dispensing: MedicineDispensing,
    /// Model-reported extraction confidence, clamped to [0, 1].
    /// Non-numeric input normalizes to 0.
    #[serde(default)]
    pub confidence: f64,
}

/// Optional prescription-level metadata.
///
/// Missing values stay absent; the normalizer never substitutes empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionMeta {
    /// Prescription date (YYYY-MM-DD when the model can read it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    /// Patient weight as written, e.g. "75kg".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_weight: Option<String>,
}

/// The canonical parsed prescription: what one image extracts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrescription {
    #[serde(default)]
    pub prescription_meta: PrescriptionMeta,
    #[serde(default)]
    pub medicines: Vec<Medicine>,
    /// Full transcription of the prescription text, for reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    /// Display name of the source image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// ISO 639-1 codes of languages detected on the prescription.
    #[serde(default)]
    pub languages_detected: Vec<String>,
}

// ── Per-item result ──────────────────────────────────────────────────────

/// Coarse category of a per-item failure, stored alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Source image unreadable or unsupported.
    Source,
    /// Network / auth / timeout / rate limit while calling the model.
    Transport,
    /// Model output never parsed into the contracted shape.
    MalformedOutput,
    /// Parsed JSON violated a domain invariant.
    Validation,
    /// Result could not be persisted.
    Storage,
    /// Batch was cancelled before this item started.
    Cancelled,
}

/// Terminal outcome of processing one image.
///
/// A tagged union, not a pair of optionals: exactly one of the variants
/// exists, so "success with an error message" and "failure with a
/// prescription" are unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingResult {
    Success {
        prescription: ParsedPrescription,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    Failure {
        error: String,
        kind: FailureKind,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ProcessingResult {
    pub fn success(prescription: ParsedPrescription, elapsed_ms: u64) -> Self {
        ProcessingResult::Success {
            prescription,
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    /// Wrap an [`ItemError`], preserving its message verbatim.
    pub fn failure(error: &ItemError, elapsed_ms: u64) -> Self {
        ProcessingResult::Failure {
            error: error.to_string(),
            kind: error.kind(),
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingResult::Success { .. })
    }

    pub fn prescription(&self) -> Option<&ParsedPrescription> {
        match self {
            ProcessingResult::Success { prescription, .. } => Some(prescription),
            ProcessingResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProcessingResult::Success { .. } => None,
            ProcessingResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            ProcessingResult::Success { elapsed_ms, .. }
            | ProcessingResult::Failure { elapsed_ms, .. } => *elapsed_ms,
        }
    }

    /// Number of medicines extracted (0 for failures).
    pub fn medicines_count(&self) -> usize {
        self.prescription().map_or(0, |p| p.medicines.len())
    }
}

// ── Batch aggregate ──────────────────────────────────────────────────────

/// Per-item line in the batch summary, in original input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// Source identifier (display name) of the image.
    pub source: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub medicines_count: usize,
}

/// Aggregate over one batch run. Built once, after every item is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// succeeded / total, 0 for an empty batch.
    pub success_rate: f64,
    /// Wall-clock duration of the whole batch.
    pub total_elapsed_ms: u64,
    /// Mean per-item processing time.
    pub mean_item_ms: f64,
    /// Per-item outcomes, preserving input order regardless of completion order.
    pub items: Vec<ItemOutcome>,
}

impl BatchSummary {
    /// Reduce `(source, result)` pairs, already in input order, into a summary.
    pub fn from_results(results: &[(String, ProcessingResult)], total_elapsed_ms: u64) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|(_, r)| r.is_success()).count();
        let item_ms_sum: u64 = results.iter().map(|(_, r)| r.elapsed_ms()).sum();

        let items = results
            .iter()
            .map(|(source, r)| ItemOutcome {
                source: source.clone(),
                success: r.is_success(),
                error: r.error().map(str::to_string),
                elapsed_ms: r.elapsed_ms(),
                medicines_count: r.medicines_count(),
            })
            .collect();

        BatchSummary {
            timestamp: Utc::now(),
            total,
            succeeded,
            failed: total - succeeded,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
            total_elapsed_ms,
            mean_item_ms: if total == 0 {
                0.0
            } else {
                item_ms_sum as f64 / total as f64
            },
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    fn sample_prescription() -> ParsedPrescription {
        ParsedPrescription {
            prescription_meta: PrescriptionMeta::default(),
            medicines: vec![Medicine {
                identity: MedicineIdentity {
                    brand_name: None,
                    generic_name: "Amoxicillin".into(),
                    form: "capsule".into(),
                    strength: "500 mg".into(),
                },
                instructions: MedicineInstructions {
                    route: "Oral".into(),
                    dose_quantity: "1".into(),
                    frequency: "Every 8 hours".into(),
                    duration: "7 days".into(),
                    special_instructions: None,
                },
                dispensing: MedicineDispensing {
                    total_quantity: None,
                    refills: 0,
                    substitution_allowed: true,
                },
                confidence: 0.9,
            }],
            ocr_text: Some("Amoxicillin 500mg".into()),
            source_file: Some("rx1.jpg".into()),
            languages_detected: vec!["en".into()],
        }
    }

    #[test]
    fn result_is_tagged_union() {
        let ok = ProcessingResult::success(sample_prescription(), 1200);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());

        let err = ItemError::Validation {
            source: "rx2.jpg".into(),
            error: ValidationError::NotAnObject,
        };
        let fail = ProcessingResult::failure(&err, 300);
        let json = serde_json::to_value(&fail).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "validation");
        assert!(json.get("prescription").is_none());
    }

    #[test]
    fn failure_preserves_message_verbatim() {
        let err = ItemError::Source {
            source: "rx.png".into(),
            detail: "file too large: 12.00MB (max: 10MB)".into(),
        };
        let fail = ProcessingResult::failure(&err, 5);
        assert_eq!(fail.error(), Some(err.to_string().as_str()));
    }

    #[test]
    fn result_roundtrips_through_json() {
        let ok = ProcessingResult::success(sample_prescription(), 1200);
        let text = serde_json::to_string(&ok).unwrap();
        let back: ProcessingResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ok);
    }

    #[test]
    fn summary_counts_and_order() {
        let ok = ProcessingResult::success(sample_prescription(), 100);
        let err = ItemError::Cancelled { source: "b.jpg".into() };
        let fail = ProcessingResult::failure(&err, 0);

        let results = vec![
            ("a.jpg".to_string(), ok),
            ("b.jpg".to_string(), fail),
        ];
        let summary = BatchSummary::from_results(&results, 150);

        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded + summary.failed, summary.total);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(summary.items[0].source, "a.jpg");
        assert_eq!(summary.items[1].source, "b.jpg");
        assert_eq!(summary.items[0].medicines_count, 1);
    }

    #[test]
    fn empty_batch_summary() {
        let summary = BatchSummary::from_results(&[], 0);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.mean_item_ms, 0.0);
    }
}
