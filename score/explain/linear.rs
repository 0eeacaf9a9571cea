//! Exact attributions for models that are linear on the log-odds scale.
//!
//! With independent features, the Shapley value of feature `i` for a linear
//! predictor `eta(x) = b + w.x` is `w_i * (x_i - E[x_i])`, where the
//! expectation is over the background. This needs no sampling and is
//! deterministic, but it is additive in log-odds, not in probability.

use super::{Explainer, Explanation, ExplainError, OutputScale, check_shapes};
use crate::model::Classifier;
use ndarray::{ArrayView1, ArrayView2, Axis};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinearExplainer;

impl Explainer for LinearExplainer {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn explain(
        &self,
        model: &dyn Classifier,
        background: ArrayView2<f64>,
        features: ArrayView1<f64>,
    ) -> Result<Explanation, ExplainError> {
        check_shapes(model, background, features)?;
        let terms = model.linear_terms().ok_or(ExplainError::IncompatibleModel(
            "exact attribution needs a linear model",
        ))?;

        let reference = background
            .mean_axis(Axis(0))
            .ok_or(ExplainError::EmptyBackground)?;
        let contributions = &terms.weights * &(&features - &reference);
        let baseline = terms.intercept + terms.weights.dot(&reference);
        let output = terms.intercept + terms.weights.dot(&features);

        Explanation::assemble(
            self.name(),
            OutputScale::LogOdds,
            baseline,
            output,
            background.nrows(),
            features,
            &contributions.to_vec(),
        )
    }
}
