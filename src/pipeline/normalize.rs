//! Normalization: raw contract-shaped JSON in, validated record out.
//!
//! A pure function of its input, no I/O, no clock. Lenient where the model
//! plausibly just phrased something differently (field aliases, numbers as
//! strings, missing optionals get documented defaults) and strict where
//! leniency would fabricate medical data: an entry with no generic name,
//! form, or strength is rejected, not padded with empty strings.
//! Rejection is deliberate over skipping; silently dropping a medicine the
//! model did report would hide exactly the entries a human most needs to see.
//!
//! Normalizing an already-normalized record is a no-op, so re-running the
//! pipeline over stored output cannot drift.

use crate::error::ValidationError;
use crate::record::{
    Medicine, MedicineDispensing, MedicineIdentity, MedicineInstructions, ParsedPrescription,
    PrescriptionMeta,
};
use serde_json::Value;
use tracing::debug;

const DEFAULT_ROUTE: &str = "Oral";

/// Fields a medicine entry cannot do without. Instruction fields are not
/// here: a legible prescription can omit a duration, but an entry with no
/// drug identity is nothing.
const REQUIRED_IDENTITY: [&str; 3] = ["generic_name", "form", "strength"];

/// Turn one contract-shaped response into a [`ParsedPrescription`].
///
/// `source` becomes the record's `source_file`, overriding whatever the
/// model may have put there.
pub fn normalize(raw: &Value, source: &str) -> Result<ParsedPrescription, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let prescription_meta = normalize_meta(obj.get("prescription_meta"))?;

    let entries = obj
        .get("medicines")
        .or_else(|| obj.get("medications"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut medicines = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        medicines.push(normalize_medicine(entry, index)?);
    }

    let ocr_text = obj
        .get("ocr_text")
        .or_else(|| obj.get("transcription"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let languages_detected: Vec<String> = obj
        .get("languages_detected")
        .and_then(Value::as_array)
        .map(|langs| {
            langs
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    debug!(
        "Normalized '{source}': {} medicine(s), {} language(s)",
        medicines.len(),
        languages_detected.len()
    );

    Ok(ParsedPrescription {
        prescription_meta,
        medicines,
        ocr_text,
        source_file: Some(source.to_string()),
        languages_detected,
    })
}

fn normalize_meta(meta: Option<&Value>) -> Result<PrescriptionMeta, ValidationError> {
    let meta = match meta {
        None | Some(Value::Null) => return Ok(PrescriptionMeta::default()),
        Some(value) => value,
    };
    let obj = meta.as_object().ok_or_else(|| ValidationError::MetaNotObject {
        value: meta.to_string(),
    })?;

    let field = |name: &str| {
        obj.get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };

    Ok(PrescriptionMeta {
        date: field("date"),
        doctor_name: field("doctor_name"),
        patient_name: field("patient_name"),
        patient_weight: field("patient_weight"),
    })
}

fn normalize_medicine(entry: &Value, index: usize) -> Result<Medicine, ValidationError> {
    let obj = entry
        .as_object()
        .ok_or_else(|| ValidationError::EntryNotObject {
            index,
            found: json_type(entry),
        })?;

    let identity = obj.get("identity").cloned().unwrap_or(Value::Null);
    let instructions = obj.get("instructions").cloned().unwrap_or(Value::Null);
    let dispensing = obj.get("dispensing").cloned().unwrap_or(Value::Null);

    let required = |block: &Value, name: &str| -> Result<String, ValidationError> {
        block[name]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ValidationError::MissingField {
                index,
                field: name.to_string(),
            })
    };
    let optional = |block: &Value, name: &str| -> Option<String> {
        block[name]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    for name in REQUIRED_IDENTITY {
        required(&identity, name)?;
    }

    let route = optional(&instructions, "route").unwrap_or_else(|| DEFAULT_ROUTE.to_string());

    Ok(Medicine {
        identity: MedicineIdentity {
            brand_name: optional(&identity, "brand_name"),
            generic_name: required(&identity, "generic_name")?,
            form: required(&identity, "form")?,
            strength: required(&identity, "strength")?,
        },
        instructions: MedicineInstructions {
            route,
            dose_quantity: optional(&instructions, "dose_quantity").unwrap_or_default(),
            frequency: optional(&instructions, "frequency").unwrap_or_default(),
            duration: optional(&instructions, "duration").unwrap_or_default(),
            special_instructions: optional(&instructions, "special_instructions"),
        },
        dispensing: MedicineDispensing {
            total_quantity: optional(&dispensing, "total_quantity"),
            refills: lenient_u32(&dispensing["refills"]),
            substitution_allowed: dispensing["substitution_allowed"].as_bool().unwrap_or(true),
        },
        confidence: clamp_confidence(&obj.get("confidence").cloned().unwrap_or(Value::Null)),
    })
}

/// Confidence clamps into [0, 1]; anything non-numeric normalizes to 0.
fn clamp_confidence(value: &Value) -> f64 {
    value.as_f64().map_or(0.0, |c| c.clamp(0.0, 1.0))
}

/// Refills arrive as numbers or numeric strings; anything else means 0.
fn lenient_u32(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n.as_u64().map_or(0, |v| v.min(u32::MAX as u64) as u32),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn json_type(v: &Value) -> String {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> Value {
        json!({
            "identity": {
                "generic_name": "Amoxicillin",
                "form": "Capsule",
                "strength": "500 mg"
            },
            "instructions": {
                "dose_quantity": "1",
                "frequency": "Every 8 hours",
                "duration": "7 days"
            },
            "dispensing": {},
            "confidence": 0.92
        })
    }

    #[test]
    fn applies_documented_defaults() {
        let raw = json!({"prescription_meta": {}, "medicines": [entry()]});
        let record = normalize(&raw, "rx1.jpg").unwrap();
        let m = &record.medicines[0];

        assert_eq!(m.instructions.route, "Oral");
        assert_eq!(m.dispensing.refills, 0);
        assert!(m.dispensing.substitution_allowed);
        assert_eq!(record.source_file.as_deref(), Some("rx1.jpg"));
    }

    #[test]
    fn missing_required_field_names_the_offender() {
        let mut bad = entry();
        bad["identity"]
            .as_object_mut()
            .unwrap()
            .remove("generic_name");
        let raw = json!({"prescription_meta": {}, "medicines": [entry(), bad]});

        let err = normalize(&raw, "rx.jpg").unwrap_err();
        match err {
            ValidationError::MissingField { index, field } => {
                assert_eq!(index, 1);
                assert_eq!(field, "generic_name");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_string_counts_as_missing() {
        let mut bad = entry();
        bad["identity"]["strength"] = json!("   ");
        let raw = json!({"prescription_meta": {}, "medicines": [bad]});

        let err = normalize(&raw, "rx.jpg").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingField { index: 0, ref field } if field == "strength"
        ));
    }

    #[test]
    fn identity_alone_is_enough() {
        let bare = json!({
            "identity": {
                "generic_name": "Amoxicillin",
                "form": "Capsule",
                "strength": "500 mg"
            }
        });
        let raw = json!({"prescription_meta": {}, "medicines": [bare]});
        let record = normalize(&raw, "rx.jpg").unwrap();
        let m = &record.medicines[0];
        assert_eq!(m.instructions.route, "Oral");
        assert_eq!(m.instructions.dose_quantity, "");
        assert_eq!(m.dispensing.refills, 0);
        assert!(m.dispensing.substitution_allowed);
    }

    #[test]
    fn confidence_clamps_and_coerces() {
        let mut e = entry();
        e["confidence"] = json!(3.5);
        let raw = json!({"prescription_meta": {}, "medicines": [e]});
        assert_eq!(normalize(&raw, "x").unwrap().medicines[0].confidence, 1.0);

        let mut e = entry();
        e["confidence"] = json!("high");
        let raw = json!({"prescription_meta": {}, "medicines": [e]});
        assert_eq!(normalize(&raw, "x").unwrap().medicines[0].confidence, 0.0);
    }

    #[test]
    fn refills_coerce_from_string() {
        let mut e = entry();
        e["dispensing"]["refills"] = json!("2");
        let raw = json!({"prescription_meta": {}, "medicines": [e]});
        assert_eq!(normalize(&raw, "x").unwrap().medicines[0].dispensing.refills, 2);

        let mut e = entry();
        e["dispensing"]["refills"] = json!("lots");
        let raw = json!({"prescription_meta": {}, "medicines": [e]});
        assert_eq!(normalize(&raw, "x").unwrap().medicines[0].dispensing.refills, 0);
    }

    #[test]
    fn meta_as_string_is_rejected() {
        let raw = json!({"prescription_meta": "Dr. Chen, 2026-01-10", "medicines": []});
        let err = normalize(&raw, "x").unwrap_err();
        assert!(matches!(err, ValidationError::MetaNotObject { .. }));
    }

    #[test]
    fn meta_missing_is_fine() {
        let raw = json!({"medicines": []});
        let record = normalize(&raw, "x").unwrap();
        assert_eq!(record.prescription_meta, PrescriptionMeta::default());
    }

    #[test]
    fn aliases_are_accepted() {
        let raw = json!({
            "prescription_meta": {},
            "medications": [entry()],
            "transcription": "Amoxicillin 500mg TID x7d"
        });
        let record = normalize(&raw, "x").unwrap();
        assert_eq!(record.medicines.len(), 1);
        assert_eq!(record.ocr_text.as_deref(), Some("Amoxicillin 500mg TID x7d"));
    }

    #[test]
    fn non_object_entry_is_rejected_with_index() {
        let raw = json!({"prescription_meta": {}, "medicines": [entry(), "Paracetamol"]});
        let err = normalize(&raw, "x").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::EntryNotObject { index: 1, .. }
        ));
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = json!({
            "prescription_meta": {"doctor_name": "Dr. Chen"},
            "medicines": [entry()],
            "ocr_text": "text",
            "languages_detected": ["en", "es"]
        });
        let once = normalize(&raw, "rx1.jpg").unwrap();
        let again = normalize(&serde_json::to_value(&once).unwrap(), "rx1.jpg").unwrap();
        assert_eq!(once, again);
    }
}
