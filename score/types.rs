//! Request-scoped value types flowing through the risk pipeline.

use crate::encode::EncodingError;
use crate::risk::{self, RiskTier};
use crate::schema::{FEATURE_SCHEMA, FeatureKind, FeatureSpec, feature_spec};
use ndarray::{Array1, ArrayView1};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use thiserror::Error;

/// A raw field value as a user entered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Choice(String),
}

impl RawValue {
    /// Parses command-line text according to the kind of field it targets:
    /// numeric fields must parse as a float, categorical fields keep the text.
    pub fn parse_for(spec: &FeatureSpec, text: &str) -> Result<Self, EncodingError> {
        let text = text.trim();
        match spec.kind {
            FeatureKind::Numeric { .. } => text.parse::<f64>().map(RawValue::Number).map_err(|_| {
                EncodingError::WrongKind {
                    field: spec.name.to_string(),
                    expected: "a number",
                    found: format!("'{text}'"),
                }
            }),
            FeatureKind::Categorical { .. } => Ok(RawValue::Choice(text.to_string())),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            RawValue::Number(value) => format!("the number {value}"),
            RawValue::Choice(option) => format!("the option '{option}'"),
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Number(value) => write!(f, "{value}"),
            RawValue::Choice(option) => write!(f, "{option}"),
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(option: &str) -> Self {
        RawValue::Choice(option.to_string())
    }
}

/// Errors raised while reading a patient input file.
#[derive(Error, Debug)]
pub enum InputFileError {
    #[error("Failed to read patient input file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML patient input '{path}': {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON patient input '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A mapping from feature name to the value entered for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientInput(BTreeMap<String, RawValue>);

impl PatientInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// The input a blank form starts from: every field at its schema default.
    pub fn defaults() -> Self {
        let values = FEATURE_SCHEMA
            .iter()
            .map(|spec| {
                let value = match spec.kind {
                    FeatureKind::Numeric { default, .. } => RawValue::Number(default),
                    FeatureKind::Categorical { default, .. } => RawValue::Choice(default.to_string()),
                };
                (spec.name.to_string(), value)
            })
            .collect();
        Self(values)
    }

    /// Reads a field map from a `.json` file, or from TOML for any other extension.
    pub fn from_path(path: &Path) -> Result<Self, InputFileError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| InputFileError::Io {
            path: display.clone(),
            source,
        })?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json {
            serde_json::from_str(&text).map_err(|source| InputFileError::Json {
                path: display,
                source,
            })
        } else {
            toml::from_str(&text).map_err(|source| InputFileError::Toml {
                path: display,
                source,
            })
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<RawValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<RawValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    /// Overlays every entry of `other` onto this input.
    pub fn merge(&mut self, other: PatientInput) {
        self.0.extend(other.0);
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<RawValue> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Form-level validation: no unknown fields, every field present, and
    /// numeric values finite and inside their declared `[min, max]`.
    ///
    /// The encoder itself does not range-check; this is what the input
    /// widgets enforce before a request ever reaches the pipeline. Kind and
    /// option membership are left to the encoder.
    pub fn validate(&self) -> Result<(), EncodingError> {
        if let Some(unknown) = self.0.keys().find(|name| feature_spec(name).is_none()) {
            return Err(EncodingError::UnknownField(unknown.clone()));
        }
        for spec in &FEATURE_SCHEMA {
            let value = self
                .get(spec.name)
                .ok_or_else(|| EncodingError::MissingField(spec.name.to_string()))?;
            if let (FeatureKind::Numeric { min, max, .. }, RawValue::Number(number)) =
                (spec.kind, value)
            {
                if !number.is_finite() {
                    return Err(EncodingError::NonFinite {
                        field: spec.name.to_string(),
                        value: *number,
                    });
                }
                if !(min..=max).contains(number) {
                    return Err(EncodingError::OutOfRange {
                        field: spec.name.to_string(),
                        value: *number,
                        min,
                        max,
                    });
                }
            }
        }
        Ok(())
    }
}

/// The ordered numeric vector the classifier consumes, one entry per
/// `FeatureSpec` in training order.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector(pub Array1<f64>);

impl FeatureVector {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    /// Pairs each value with its feature name. Extra values beyond the schema
    /// width are not reported.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_SCHEMA
            .iter()
            .zip(self.0.iter())
            .map(|(spec, value)| (spec.name, *value))
    }
}

impl Deref for FeatureVector {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(Array1::from(values))
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.named() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// The model's verdict for one patient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Probability of post-operative fever, in `[0, 1]`.
    pub probability: f64,
    /// The same probability on the percentage scale the tiers are defined on.
    pub percentage: f64,
    pub tier: RiskTier,
}

impl PredictionResult {
    pub fn from_probability(probability: f64) -> Self {
        let percentage = probability * 100.0;
        Self {
            probability,
            percentage,
            tier: risk::classify(percentage),
        }
    }
}
