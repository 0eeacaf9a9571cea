//! # Classifier Adapter
//!
//! The trained fever model is a logistic regression over the fifteen encoded
//! features. It is stored as a human-readable TOML artifact and loaded once;
//! the rest of the crate only sees it through the `Classifier` trait, which
//! promises nothing beyond "fixed-length vector in, probability out".

use crate::schema::{FEATURE_COUNT, FEATURE_SCHEMA};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// The logit is clamped to this magnitude before `exp` to keep the sigmoid finite.
const LOGIT_CLAMP: f64 = 700.0;

/// Error type for model loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model file '{path}' could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Model file '{path}' is not a valid model artifact: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The model artifact is inconsistent: {0}")]
    InvalidArtifact(String),
    #[error("Feature vector has {found} entries, but the model expects {expected}.")]
    ShapeMismatch { expected: usize, found: usize },
    #[error(
        "Model feature {position} is '{found}', but the schema declares '{expected}' at that position."
    )]
    FeatureOrderMismatch {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("Feature vector entry {index} is not finite.")]
    NonFiniteInput { index: usize },
    #[error("The model produced a non-finite probability.")]
    NonFiniteOutput,
}

impl ModelError {
    /// True when the artifact itself could not be obtained, as opposed to a
    /// valid artifact that disagrees with the schema or with its input.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ModelError::Unreadable { .. }
                | ModelError::Malformed { .. }
                | ModelError::InvalidArtifact(_)
        )
    }
}

/// Slope and offset of a model that is linear in its raw inputs on the log-odds scale.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearTerms {
    pub weights: Array1<f64>,
    pub intercept: f64,
}

/// Anything that maps a fixed-length numeric vector to P(positive class).
pub trait Classifier: Send + Sync {
    /// Number of inputs the model was trained on.
    fn n_features(&self) -> usize;

    /// Probability of the positive class (post-operative fever), in `[0, 1]`.
    fn probability_of_positive(&self, features: ArrayView1<f64>) -> Result<f64, ModelError>;

    /// Exact linear structure, for models that have one.
    fn linear_terms(&self) -> Option<LinearTerms> {
        None
    }
}

/// Per-feature standardisation applied before the linear predictor:
/// `z = (x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// The on-disk, self-contained trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    #[serde(default)]
    pub description: Option<String>,
    /// Input names in training order. Must equal the feature schema.
    pub feature_names: Vec<String>,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    /// Encoded reference rows drawn from the training cohort, used as the
    /// explanation background.
    #[serde(default)]
    pub background: Vec<Vec<f64>>,
    #[serde(default)]
    pub standardization: Option<Standardization>,
}

impl LogisticModel {
    /// A model named after the schema, without standardisation or background.
    pub fn new(intercept: f64, coefficients: Vec<f64>) -> Self {
        Self {
            description: None,
            feature_names: FEATURE_SCHEMA.iter().map(|spec| spec.name.to_string()).collect(),
            intercept,
            coefficients,
            background: Vec::new(),
            standardization: None,
        }
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a model artifact and checks it is internally consistent.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path).map_err(|source| ModelError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let model: LogisticModel =
            toml::from_str(&toml_string).map_err(|source| ModelError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        model.check_consistency()?;
        Ok(model)
    }

    fn check_consistency(&self) -> Result<(), ModelError> {
        let width = self.coefficients.len();
        if self.feature_names.len() != width {
            return Err(ModelError::InvalidArtifact(format!(
                "{} feature names but {} coefficients",
                self.feature_names.len(),
                width
            )));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::InvalidArtifact(
                "intercept and coefficients must be finite".to_string(),
            ));
        }
        if let Some(standardization) = &self.standardization {
            if standardization.mean.len() != width || standardization.scale.len() != width {
                return Err(ModelError::InvalidArtifact(format!(
                    "standardization has {} means and {} scales for {} coefficients",
                    standardization.mean.len(),
                    standardization.scale.len(),
                    width
                )));
            }
            if standardization
                .scale
                .iter()
                .any(|s| !s.is_finite() || *s == 0.0)
            {
                return Err(ModelError::InvalidArtifact(
                    "standardization scales must be finite and non-zero".to_string(),
                ));
            }
        }
        if let Some(row) = self.background.iter().position(|row| row.len() != width) {
            return Err(ModelError::InvalidArtifact(format!(
                "background row {} has {} values, expected {}",
                row,
                self.background[row].len(),
                width
            )));
        }
        Ok(())
    }

    /// Checks the artifact against the static schema: same arity, same names,
    /// same order. A failure here means the schema and the model have drifted.
    pub fn validate_against_schema(&self) -> Result<(), ModelError> {
        for width in [self.coefficients.len(), self.feature_names.len()] {
            if width != FEATURE_COUNT {
                return Err(ModelError::ShapeMismatch {
                    expected: FEATURE_COUNT,
                    found: width,
                });
            }
        }
        for (position, (spec, name)) in FEATURE_SCHEMA.iter().zip(&self.feature_names).enumerate() {
            if spec.name != name {
                return Err(ModelError::FeatureOrderMismatch {
                    position,
                    expected: spec.name.to_string(),
                    found: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Linear predictor (log-odds of fever) for one encoded patient.
    pub fn log_odds(&self, features: ArrayView1<f64>) -> Result<f64, ModelError> {
        if features.len() != self.coefficients.len() {
            return Err(ModelError::ShapeMismatch {
                expected: self.coefficients.len(),
                found: features.len(),
            });
        }
        if let Some(index) = features.iter().position(|x| !x.is_finite()) {
            return Err(ModelError::NonFiniteInput { index });
        }
        let terms = self.raw_linear_terms();
        Ok(terms.intercept + features.dot(&terms.weights))
    }

    /// Folds the standardisation into the coefficients, giving weights that
    /// apply directly to raw encoded features.
    fn raw_linear_terms(&self) -> LinearTerms {
        let coefficients = Array1::from(self.coefficients.clone());
        match &self.standardization {
            None => LinearTerms {
                weights: coefficients,
                intercept: self.intercept,
            },
            Some(standardization) => {
                let mean = ArrayView1::from(&standardization.mean[..]);
                let scale = ArrayView1::from(&standardization.scale[..]);
                let weights = &coefficients / &scale;
                let intercept = self.intercept - weights.dot(&mean);
                LinearTerms { weights, intercept }
            }
        }
    }

    /// The artifact's background rows as a matrix, if it carries any.
    pub fn background_matrix(&self) -> Option<Array2<f64>> {
        rows_to_matrix(&self.background)
    }
}

impl Classifier for LogisticModel {
    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn probability_of_positive(&self, features: ArrayView1<f64>) -> Result<f64, ModelError> {
        let eta = self.log_odds(features)?.clamp(-LOGIT_CLAMP, LOGIT_CLAMP);
        let probability = 1.0 / (1.0 + f64::exp(-eta));
        if probability.is_finite() {
            Ok(probability)
        } else {
            Err(ModelError::NonFiniteOutput)
        }
    }

    fn linear_terms(&self) -> Option<LinearTerms> {
        Some(self.raw_linear_terms())
    }
}

/// Stacks equal-length rows into a matrix. `None` for an empty or ragged set.
pub fn rows_to_matrix(rows: &[Vec<f64>]) -> Option<Array2<f64>> {
    let width = rows.first()?.len();
    if rows.iter().any(|row| row.len() != width) {
        return None;
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), width), flat).ok()
}

/// Process-lifetime holder of the model artifact.
///
/// The artifact is read on first use and cached as an immutable `Arc`; every
/// later request shares it without locking. A failed load is not cached, so
/// a missing file reported once can be put in place without a restart.
#[derive(Debug)]
pub struct ModelService {
    path: PathBuf,
    cell: OnceLock<Arc<LogisticModel>>,
}

impl ModelService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceLock::new(),
        }
    }

    /// A service whose model is already in memory. The model is validated
    /// against the schema on the first `get`, as a loaded one would be.
    pub fn preloaded(model: LogisticModel) -> Self {
        Self {
            path: PathBuf::from("<in-memory>"),
            cell: OnceLock::from(Arc::new(model)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Returns the shared model, loading and validating it on first use.
    pub fn get(&self) -> Result<Arc<LogisticModel>, ModelError> {
        if let Some(model) = self.cell.get() {
            model.validate_against_schema()?;
            return Ok(Arc::clone(model));
        }

        log::info!("Loading fever model from: {}", self.path.display());
        let model = LogisticModel::load(&self.path)?;
        model.validate_against_schema()?;
        log::info!(
            "Model loaded: {} features, intercept {:.4}",
            model.n_features(),
            model.intercept
        );

        Ok(Arc::clone(self.cell.get_or_init(|| Arc::new(model))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn toy_model() -> LogisticModel {
        let mut coefficients = vec![0.0; FEATURE_COUNT];
        coefficients[2] = 0.01;
        coefficients[13] = 0.5;
        LogisticModel::new(-1.0, coefficients)
    }

    #[test]
    fn probability_is_the_sigmoid_of_the_linear_predictor() {
        let model = toy_model();
        let mut x = Array1::zeros(FEATURE_COUNT);
        x[2] = 100.0;
        x[13] = 2.0;
        let eta: f64 = -1.0 + 0.01 * 100.0 + 0.5 * 2.0;
        let p = model.probability_of_positive(x.view()).unwrap();
        assert_abs_diff_eq!(p, 1.0 / (1.0 + (-eta).exp()), epsilon = 1e-12);
        assert_abs_diff_eq!(model.log_odds(x.view()).unwrap(), eta, epsilon = 1e-12);
    }

    #[test]
    fn extreme_inputs_stay_finite() {
        let model = LogisticModel::new(0.0, vec![1e6; FEATURE_COUNT]);
        let x = Array1::from_elem(FEATURE_COUNT, 1e6);
        let p = model.probability_of_positive(x.view()).unwrap();
        assert_abs_diff_eq!(p, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn vector_length_is_checked_before_scoring() {
        let model = toy_model();
        let short = Array1::zeros(FEATURE_COUNT - 1);
        match model.probability_of_positive(short.view()) {
            Err(ModelError::ShapeMismatch { expected, found }) => {
                assert_eq!(expected, FEATURE_COUNT);
                assert_eq!(found, FEATURE_COUNT - 1);
            }
            other => panic!("Expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn non_finite_inputs_are_rejected() {
        let model = toy_model();
        let mut x = Array1::zeros(FEATURE_COUNT);
        x[4] = f64::INFINITY;
        assert!(matches!(
            model.probability_of_positive(x.view()),
            Err(ModelError::NonFiniteInput { index: 4 })
        ));
    }

    #[test]
    fn standardization_folds_into_raw_weights() {
        let mut model = toy_model();
        let mut mean = vec![0.0; FEATURE_COUNT];
        let mut scale = vec![1.0; FEATURE_COUNT];
        mean[2] = 60.0;
        scale[2] = 30.0;
        model.coefficients[2] = 0.9;
        model.standardization = Some(Standardization { mean, scale });

        let mut x = Array1::zeros(FEATURE_COUNT);
        x[2] = 120.0;
        let expected = -1.0 + 0.9 * (120.0 - 60.0) / 30.0;
        assert_abs_diff_eq!(model.log_odds(x.view()).unwrap(), expected, epsilon = 1e-12);

        let terms = model.linear_terms().unwrap();
        assert_abs_diff_eq!(terms.weights[2], 0.03, epsilon = 1e-12);
        assert_abs_diff_eq!(terms.intercept, -1.0 - 0.03 * 60.0, epsilon = 1e-12);
    }

    #[test]
    fn save_and_load_round_trip_preserves_predictions() {
        let mut model = toy_model();
        model.description = Some("toy".to_string());
        model.background = vec![vec![1.0; FEATURE_COUNT], vec![2.0; FEATURE_COUNT]];

        let file = NamedTempFile::new().expect("Failed to create temp file");
        model.save(file.path()).expect("Failed to save model");
        let loaded = LogisticModel::load(file.path()).expect("Failed to load model");
        assert_eq!(loaded, model);

        let x = Array1::from_elem(FEATURE_COUNT, 3.0);
        assert_eq!(
            loaded.probability_of_positive(x.view()).unwrap(),
            model.probability_of_positive(x.view()).unwrap()
        );
        let background = loaded.background_matrix().unwrap();
        assert_eq!(background.dim(), (2, FEATURE_COUNT));
    }

    #[test]
    fn inconsistent_artifacts_are_rejected_on_load() {
        let mut model = toy_model();
        model.background = vec![vec![0.0; 3]];
        let file = NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();
        let err = LogisticModel::load(file.path()).unwrap_err();
        assert!(err.is_unavailable(), "got {err:?}");

        let mut model = toy_model();
        model.standardization = Some(Standardization {
            mean: vec![0.0; FEATURE_COUNT],
            scale: vec![0.0; FEATURE_COUNT],
        });
        let file = NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();
        assert!(matches!(
            LogisticModel::load(file.path()),
            Err(ModelError::InvalidArtifact(_))
        ));
    }

    #[test]
    fn schema_drift_is_detected() {
        let short = LogisticModel {
            feature_names: vec!["LMR".to_string()],
            coefficients: vec![0.1],
            ..toy_model()
        };
        assert!(matches!(
            short.validate_against_schema(),
            Err(ModelError::ShapeMismatch {
                expected: FEATURE_COUNT,
                found: 1
            })
        ));

        let mut swapped = toy_model();
        swapped.feature_names.swap(0, 1);
        match swapped.validate_against_schema() {
            Err(ModelError::FeatureOrderMismatch {
                position,
                expected,
                found,
            }) => {
                assert_eq!(position, 0);
                assert_eq!(expected, "LMR");
                assert_eq!(found, "Preoperative_N");
            }
            other => panic!("Expected FeatureOrderMismatch, got {:?}", other),
        }
    }

    #[test]
    fn truncated_feature_names_are_a_shape_mismatch() {
        let mut model = toy_model();
        model.feature_names.truncate(1);
        assert!(matches!(
            model.validate_against_schema(),
            Err(ModelError::ShapeMismatch {
                expected: FEATURE_COUNT,
                found: 1
            })
        ));

        let service = ModelService::preloaded(model);
        assert!(matches!(
            service.get(),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn service_reports_missing_artifact_as_unavailable() {
        let service = ModelService::new("/definitely/not/here/model.toml");
        let err = service.get().unwrap_err();
        assert!(err.is_unavailable());
        assert!(!service.is_loaded());
    }

    #[test]
    fn service_loads_once_and_shares_the_model() {
        let file = NamedTempFile::new().unwrap();
        toy_model().save(file.path()).unwrap();

        let service = ModelService::new(file.path());
        let first = service.get().unwrap();
        assert!(service.is_loaded());

        // The cached copy survives the file disappearing.
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
        let second = service.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn rows_to_matrix_rejects_ragged_input() {
        assert!(rows_to_matrix(&[]).is_none());
        assert!(rows_to_matrix(&[vec![1.0, 2.0], vec![3.0]]).is_none());
        let matrix = rows_to_matrix(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(matrix, array![[1.0, 2.0], [3.0, 4.0]]);
    }
}
