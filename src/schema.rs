//! The response contract shared with the external model.
//!
//! One contract, two directions: [`response_schema`] is attached to every
//! model request as a structured-output requirement, and [`check_shape`]
//! validates what actually came back before normalization runs. Any change
//! to required fields must land in both, which is why they live in one file.

use serde_json::{json, Value};

/// JSON schema declared to the model as the required output shape.
///
/// A strict object schema: top-level transcription plus a `medicines` array
/// whose items carry fixed identity / instructions / dispensing blocks. No
/// additional properties are invited; providers that ignore the schema are
/// caught by [`check_shape`] and the invoker's retry loop.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "prescription_meta": {
                "type": "object",
                "properties": {
                    "date": {"type": "string"},
                    "doctor_name": {"type": "string"},
                    "patient_name": {"type": "string"},
                    "patient_weight": {"type": "string"}
                }
            },
            "medicines": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "identity": {
                            "type": "object",
                            "properties": {
                                "brand_name": {"type": "string"},
                                "generic_name": {"type": "string"},
                                "form": {"type": "string"},
                                "strength": {"type": "string"}
                            },
                            "required": ["generic_name", "form", "strength"]
                        },
                        "instructions": {
                            "type": "object",
                            "properties": {
                                "route": {"type": "string"},
                                "dose_quantity": {"type": "string"},
                                "frequency": {"type": "string"},
                                "duration": {"type": "string"},
                                "special_instructions": {"type": "string"}
                            },
                            "required": ["route", "dose_quantity", "frequency", "duration"]
                        },
                        "dispensing": {
                            "type": "object",
                            "properties": {
                                "total_quantity": {"type": "string"},
                                "refills": {"type": "number"},
                                "substitution_allowed": {"type": "boolean"}
                            }
                        },
                        "confidence": {"type": "number"}
                    },
                    "required": ["identity", "instructions", "dispensing"]
                }
            },
            "ocr_text": {"type": "string"},
            "languages_detected": {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": ["prescription_meta", "medicines"]
    })
}

/// Check that a parsed response has the contracted top-level shape.
///
/// Providers drift on naming: `medicines` vs `medications` and `ocr_text`
/// vs `transcription` both occur in the wild, so either alias passes here.
/// A failed check is a retryable malformed-output condition, not a
/// validation error; deeper invariants are the normalizer's job.
pub fn check_shape(value: &Value) -> Result<(), String> {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return Err("top level is not a JSON object".to_string()),
    };

    let medicines = obj
        .get("medicines")
        .or_else(|| obj.get("medications"))
        .ok_or_else(|| "missing 'medicines' array".to_string())?;

    if !medicines.is_array() {
        return Err(format!(
            "'medicines' is {}, expected an array",
            type_name(medicines)
        ));
    }

    Ok(())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_identity_fields() {
        let schema = response_schema();
        let required = &schema["properties"]["medicines"]["items"]["properties"]["identity"]
            ["required"];
        let required: Vec<&str> = required
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["generic_name", "form", "strength"]);
    }

    #[test]
    fn shape_accepts_canonical_and_alias() {
        let canonical = json!({"ocr_text": "x", "medicines": []});
        assert!(check_shape(&canonical).is_ok());

        let alias = json!({"transcription": "x", "medications": []});
        assert!(check_shape(&alias).is_ok());
    }

    #[test]
    fn shape_rejects_non_object() {
        let err = check_shape(&json!(["not", "an", "object"])).unwrap_err();
        assert!(err.contains("not a JSON object"));
    }

    #[test]
    fn shape_rejects_missing_or_wrong_medicines() {
        assert!(check_shape(&json!({"ocr_text": "x"})).is_err());

        let err = check_shape(&json!({"medicines": "Amoxicillin"})).unwrap_err();
        assert!(err.contains("expected an array"), "got: {err}");
    }
}
