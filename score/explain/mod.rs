//! # Local Feature Attribution
//!
//! An `Explanation` splits one prediction into a baseline (the expected model
//! output over a background sample) plus one signed contribution per feature,
//! such that `baseline + sum(contributions) == output` on the explanation's
//! own scale.
//!
//! Two explainers implement the `Explainer` trait:
//! - `SamplingExplainer`: model-agnostic permutation sampling of Shapley
//!   values against a small background sample, on the probability scale.
//! - `LinearExplainer`: exact attributions from the coefficients of a linear
//!   model, on the log-odds scale, with no sampling.

pub mod linear;
pub mod sampling;

pub use linear::LinearExplainer;
pub use sampling::SamplingExplainer;

use crate::model::{Classifier, ModelError};
use crate::schema::{FEATURE_COUNT, FEATURE_SCHEMA};
use itertools::Itertools;
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest tolerated `|baseline + sum(contributions) - output|`.
pub const ADDITIVITY_TOLERANCE: f64 = 1e-8;

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Explanation background is empty.")]
    EmptyBackground,
    #[error("Explanation input has {found} values, but {expected} were expected.")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("Background rows have {found} columns, but the model expects {expected}.")]
    BackgroundShapeMismatch { expected: usize, found: usize },
    #[error("The model cannot be explained by this method: {0}")]
    IncompatibleModel(&'static str),
    #[error("Model evaluation failed during explanation: {0}")]
    Model(#[from] ModelError),
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    #[error("Attributions do not add up: baseline + contributions differs from the output by {gap:e}.")]
    AdditivityViolated { gap: f64 },
}

/// The scale on which an explanation is additive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputScale {
    Probability,
    LogOdds,
}

/// Common interface for attribution methods.
pub trait Explainer {
    /// Short method name for reports and logs.
    fn name(&self) -> &'static str;

    /// Attributes `model(features)` relative to the expected output over
    /// `background`, whose rows are encoded reference patients.
    fn explain(
        &self,
        model: &dyn Classifier,
        background: ArrayView2<f64>,
        features: ArrayView1<f64>,
    ) -> Result<Explanation, ExplainError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    /// The encoded value the model saw.
    pub value: f64,
    pub contribution: f64,
}

/// One bar of the baseline-to-output waterfall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallStep {
    pub feature: String,
    pub contribution: f64,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub method: String,
    pub scale: OutputScale,
    /// Expected model output over the background sample.
    pub baseline: f64,
    /// Model output for the explained patient.
    pub output: f64,
    /// Number of background rows the baseline was computed from.
    pub background_size: usize,
    /// Contributions in schema order.
    pub contributions: Vec<FeatureContribution>,
}

impl Explanation {
    /// Assembles an explanation in schema order and enforces additivity.
    pub(crate) fn assemble(
        method: &str,
        scale: OutputScale,
        baseline: f64,
        output: f64,
        background_size: usize,
        features: ArrayView1<f64>,
        contributions: &[f64],
    ) -> Result<Self, ExplainError> {
        if let Some(bad) = contributions.iter().position(|c| !c.is_finite()) {
            return Err(ExplainError::NumericalInstability(format!(
                "contribution of '{}' is not finite",
                FEATURE_SCHEMA[bad].name
            )));
        }
        if !baseline.is_finite() || !output.is_finite() {
            return Err(ExplainError::NumericalInstability(
                "baseline or output is not finite".to_string(),
            ));
        }

        let explanation = Self {
            method: method.to_string(),
            scale,
            baseline,
            output,
            background_size,
            contributions: FEATURE_SCHEMA
                .iter()
                .zip(features.iter())
                .zip(contributions)
                .map(|((spec, value), contribution)| FeatureContribution {
                    feature: spec.name.to_string(),
                    value: *value,
                    contribution: *contribution,
                })
                .collect(),
        };

        let gap = explanation.additivity_gap();
        if gap > ADDITIVITY_TOLERANCE {
            return Err(ExplainError::AdditivityViolated { gap });
        }
        Ok(explanation)
    }

    pub fn total_contribution(&self) -> f64 {
        self.contributions.iter().map(|c| c.contribution).sum()
    }

    /// `|baseline + sum(contributions) - output|`.
    pub fn additivity_gap(&self) -> f64 {
        (self.baseline + self.total_contribution() - self.output).abs()
    }

    pub fn contribution_of(&self, feature: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.feature == feature)
            .map(|c| c.contribution)
    }

    /// Contributions ordered by decreasing magnitude. Ties keep schema order.
    pub fn ranked(&self) -> Vec<&FeatureContribution> {
        self.contributions
            .iter()
            .sorted_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()))
            .collect()
    }

    /// The cumulative path from `baseline` to `output`, largest pushes first.
    /// The last step ends at `baseline + sum(contributions)`.
    pub fn waterfall(&self) -> Vec<WaterfallStep> {
        let mut running = self.baseline;
        self.ranked()
            .into_iter()
            .map(|c| {
                let start = running;
                running += c.contribution;
                WaterfallStep {
                    feature: c.feature.clone(),
                    contribution: c.contribution,
                    start,
                    end: running,
                }
            })
            .collect()
    }
}

/// Shared shape checks run by every explainer before touching the model.
pub(crate) fn check_shapes(
    model: &dyn Classifier,
    background: ArrayView2<f64>,
    features: ArrayView1<f64>,
) -> Result<(), ExplainError> {
    let expected = model.n_features();
    if expected != FEATURE_COUNT {
        return Err(ExplainError::ShapeMismatch {
            expected: FEATURE_COUNT,
            found: expected,
        });
    }
    if features.len() != expected {
        return Err(ExplainError::ShapeMismatch {
            expected,
            found: features.len(),
        });
    }
    if background.nrows() == 0 {
        return Err(ExplainError::EmptyBackground);
    }
    if background.ncols() != expected {
        return Err(ExplainError::BackgroundShapeMismatch {
            expected,
            found: background.ncols(),
        });
    }
    Ok(())
}
