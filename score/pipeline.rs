//! # Prediction Pipeline
//!
//! One synchronous call chain per request:
//! model service, encoder, classifier, risk tier, then explainer.
//!
//! Model, encoding and shape failures abort the request. An explanation
//! failure never does: the already-computed prediction is returned and the
//! explanation is marked unavailable with its reason.

use crate::config::PipelineConfig;
use crate::encode::{EncodingError, encode};
use crate::explain::{ExplainError, Explainer, Explanation};
use crate::model::{Classifier, LogisticModel, ModelError, ModelService, rows_to_matrix};
use crate::schema::reference_pool;
use crate::types::{FeatureVector, PatientInput, PredictionResult};
use ndarray::Array2;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// How a fatal error should be presented to the person using the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    PredictionUnavailable,
    InputValidation,
    InternalConfiguration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCategory::PredictionUnavailable => "prediction unavailable",
            ErrorCategory::InputValidation => "input validation failed",
            ErrorCategory::InternalConfiguration => "internal configuration error",
        })
    }
}

/// Errors that abort a prediction request.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("The fever model is unavailable: {0}")]
    ModelUnavailable(#[source] ModelError),
    #[error("The patient input could not be encoded: {0}")]
    Encoding(#[from] EncodingError),
    #[error("The feature schema and the loaded model disagree: {0}")]
    ShapeMismatch(#[source] ModelError),
    #[error("The model failed to score the patient: {0}")]
    Inference(#[source] ModelError),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::ModelUnavailable(_) | PipelineError::Inference(_) => {
                ErrorCategory::PredictionUnavailable
            }
            PipelineError::Encoding(_) => ErrorCategory::InputValidation,
            PipelineError::ShapeMismatch(_) => ErrorCategory::InternalConfiguration,
        }
    }

    fn from_model(err: ModelError) -> Self {
        match err {
            ModelError::ShapeMismatch { .. } | ModelError::FeatureOrderMismatch { .. } => {
                PipelineError::ShapeMismatch(err)
            }
            err if err.is_unavailable() => PipelineError::ModelUnavailable(err),
            err => PipelineError::Inference(err),
        }
    }
}

/// The explanation part of an assessment. Never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExplanationOutcome {
    Available(Explanation),
    Unavailable { reason: String },
    Disabled,
}

impl ExplanationOutcome {
    pub fn explanation(&self) -> Option<&Explanation> {
        match self {
            ExplanationOutcome::Available(explanation) => Some(explanation),
            _ => None,
        }
    }
}

/// Everything the presentation layer needs for one patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub features: FeatureVector,
    pub prediction: PredictionResult,
    pub explanation: ExplanationOutcome,
}

pub struct RiskPipeline {
    models: Arc<ModelService>,
    explainer: Option<Box<dyn Explainer>>,
}

impl fmt::Debug for RiskPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskPipeline")
            .field("models", &self.models)
            .field("explainer", &self.explainer.as_ref().map(|e| e.name()))
            .finish()
    }
}

impl RiskPipeline {
    pub fn new(models: Arc<ModelService>, explainer: Box<dyn Explainer>) -> Self {
        Self {
            models,
            explainer: Some(explainer),
        }
    }

    pub fn without_explanations(models: Arc<ModelService>) -> Self {
        Self {
            models,
            explainer: None,
        }
    }

    /// Builds a pipeline whose model service reads `config.model_path`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            models: Arc::new(ModelService::new(config.model_path.clone())),
            explainer: config.build_explainer(),
        }
    }

    /// Scores one patient.
    pub fn assess(&self, input: &PatientInput) -> Result<Assessment, PipelineError> {
        let model = self.models.get().map_err(PipelineError::from_model)?;
        let features = encode(input)?;

        let probability = model
            .probability_of_positive(features.as_view())
            .map_err(PipelineError::from_model)?;
        let prediction = PredictionResult::from_probability(probability);
        log::debug!(
            "Predicted P(fever) = {:.4} ({})",
            prediction.probability,
            prediction.tier
        );

        let explanation = match &self.explainer {
            None => ExplanationOutcome::Disabled,
            Some(explainer) => match explain_with(explainer.as_ref(), &model, &features) {
                Ok(explanation) => ExplanationOutcome::Available(explanation),
                Err(err) => {
                    log::warn!("Explanation unavailable ({}): {}", explainer.name(), err);
                    ExplanationOutcome::Unavailable {
                        reason: err.to_string(),
                    }
                }
            },
        };

        Ok(Assessment {
            features,
            prediction,
            explanation,
        })
    }
}

/// The artifact's own background when it ships one, else the schema's
/// reference pool.
fn background_for(model: &LogisticModel) -> Result<Array2<f64>, ExplainError> {
    if let Some(background) = model.background_matrix() {
        return Ok(background);
    }
    rows_to_matrix(&reference_pool()).ok_or(ExplainError::EmptyBackground)
}

fn explain_with(
    explainer: &dyn Explainer,
    model: &LogisticModel,
    features: &FeatureVector,
) -> Result<Explanation, ExplainError> {
    let background = background_for(model)?;
    explainer.explain(model, background.view(), features.as_view())
}
