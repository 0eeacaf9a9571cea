//! Permutation-sampling Shapley values against a drawn background sample.
//!
//! For each background row `b` and each sampled feature ordering, features are
//! switched from `b` to the patient's values one at a time and the change in
//! model output is credited to the switched feature. Along any single
//! ordering these credits telescope to `f(x) - f(b)`, so after averaging the
//! contributions sum to `f(x) - mean_b f(b)` exactly, whatever the sample.
//! Orderings are drawn in antithetic pairs (an ordering and its reverse),
//! which cancels much of the first-order sampling noise.

use super::{Explainer, Explanation, ExplainError, OutputScale, check_shapes};
use crate::model::Classifier;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::{SliceRandom, index};

/// Number of background reference points drawn per explanation.
pub const DEFAULT_BACKGROUND_SIZE: usize = 5;
/// Feature orderings evaluated per background point.
pub const DEFAULT_PERMUTATIONS: usize = 64;
pub const DEFAULT_SEED: u64 = 0x5eed_f3e7;

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingExplainer {
    background_size: usize,
    permutations: usize,
    seed: u64,
}

impl Default for SamplingExplainer {
    fn default() -> Self {
        Self {
            background_size: DEFAULT_BACKGROUND_SIZE,
            permutations: DEFAULT_PERMUTATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

impl SamplingExplainer {
    /// Zero sizes are raised to one.
    pub fn new(background_size: usize, permutations: usize, seed: u64) -> Self {
        Self {
            background_size: background_size.max(1),
            permutations: permutations.max(1),
            seed,
        }
    }

    /// Picks the background rows to use, without replacement. The whole pool
    /// is used when it is no larger than the requested size.
    fn draw_background(&self, pool: ArrayView2<f64>, rng: &mut StdRng) -> Vec<usize> {
        if pool.nrows() <= self.background_size {
            return (0..pool.nrows()).collect();
        }
        let mut rows = index::sample(rng, pool.nrows(), self.background_size).into_vec();
        rows.sort_unstable();
        rows
    }
}

impl Explainer for SamplingExplainer {
    fn name(&self) -> &'static str {
        "sampling"
    }

    fn explain(
        &self,
        model: &dyn Classifier,
        background: ArrayView2<f64>,
        features: ArrayView1<f64>,
    ) -> Result<Explanation, ExplainError> {
        check_shapes(model, background, features)?;

        let n_features = features.len();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let rows = self.draw_background(background, &mut rng);

        let output = model.probability_of_positive(features)?;
        let mut phi = Array1::<f64>::zeros(n_features);
        let mut baseline = 0.0;
        let mut ordering: Vec<usize> = (0..n_features).collect();

        for &row in &rows {
            let reference = background.row(row);
            let reference_output = model.probability_of_positive(reference)?;
            baseline += reference_output;

            for pass in 0..self.permutations {
                if pass % 2 == 0 {
                    ordering.shuffle(&mut rng);
                } else {
                    ordering.reverse();
                }

                let mut hybrid = reference.to_owned();
                let mut previous = reference_output;
                for &feature in &ordering {
                    if hybrid[feature] == features[feature] {
                        continue;
                    }
                    hybrid[feature] = features[feature];
                    let current = model.probability_of_positive(hybrid.view())?;
                    phi[feature] += current - previous;
                    previous = current;
                }
            }
        }

        let draws = rows.len() as f64;
        baseline /= draws;
        phi /= draws * self.permutations as f64;

        log::debug!(
            "Sampling explanation: {} background rows x {} orderings, baseline {:.4}, output {:.4}",
            rows.len(),
            self.permutations,
            baseline,
            output
        );

        Explanation::assemble(
            self.name(),
            OutputScale::Probability,
            baseline,
            output,
            rows.len(),
            features,
            &phi.to_vec(),
        )
    }
}
