//! # Encoder
//!
//! Turns a `PatientInput` into the `FeatureVector` the classifier was trained
//! on. Numeric fields pass through as floats; categorical fields go through
//! the encoding table declared on their `FeatureSpec`. This is a pure
//! function of the input and the static schema.

use crate::schema::{FEATURE_SCHEMA, FeatureKind, feature_spec};
use crate::types::{FeatureVector, PatientInput, RawValue};
use itertools::Itertools;
use ndarray::Array1;
use thiserror::Error;

/// Reasons a patient input cannot be turned into a feature vector.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("The required field '{0}' is missing from the patient input.")]
    MissingField(String),
    #[error("The field '{0}' is not part of the feature schema. Please check spelling and case.")]
    UnknownField(String),
    #[error("The field '{field}' expects {expected}, but received {found}.")]
    WrongKind {
        field: String,
        expected: &'static str,
        found: String,
    },
    #[error("'{value}' is not a valid option for '{field}'. Allowed options: {allowed}.")]
    UnknownOption {
        field: String,
        value: String,
        allowed: String,
    },
    #[error("The field '{field}' holds a non-finite value ({value}).")]
    NonFinite { field: String, value: f64 },
    #[error("The field '{field}' value {value} lies outside the permitted range [{min}, {max}].")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Encodes a patient input in training order.
///
/// Categorical membership is re-checked here even though the form layer
/// already constrains it; numeric ranges are not (see `PatientInput::validate`).
pub fn encode(input: &PatientInput) -> Result<FeatureVector, EncodingError> {
    if let Some((unknown, _)) = input.iter().find(|(name, _)| feature_spec(name).is_none()) {
        return Err(EncodingError::UnknownField(unknown.to_string()));
    }

    let mut values = Array1::zeros(FEATURE_SCHEMA.len());
    for (slot, spec) in values.iter_mut().zip(FEATURE_SCHEMA.iter()) {
        let raw = input
            .get(spec.name)
            .ok_or_else(|| EncodingError::MissingField(spec.name.to_string()))?;

        *slot = match (spec.kind, raw) {
            (FeatureKind::Numeric { .. }, RawValue::Number(value)) => {
                if !value.is_finite() {
                    return Err(EncodingError::NonFinite {
                        field: spec.name.to_string(),
                        value: *value,
                    });
                }
                *value
            }
            (FeatureKind::Categorical { .. }, RawValue::Choice(option)) => spec
                .code_for(option)
                .map(f64::from)
                .ok_or_else(|| EncodingError::UnknownOption {
                    field: spec.name.to_string(),
                    value: option.clone(),
                    allowed: spec.option_names().iter().join(", "),
                })?,
            (FeatureKind::Numeric { .. }, other) => {
                return Err(EncodingError::WrongKind {
                    field: spec.name.to_string(),
                    expected: "a number",
                    found: other.describe(),
                });
            }
            (FeatureKind::Categorical { .. }, other) => {
                return Err(EncodingError::WrongKind {
                    field: spec.name.to_string(),
                    expected: "one of its listed options",
                    found: other.describe(),
                });
            }
        };
    }

    log::debug!("Encoded patient input into {} features", values.len());
    Ok(FeatureVector::new(values))
}
