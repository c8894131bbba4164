//! Local linear reconstruction weights.
//!
//! For a seed point `s` and neighbours `e_1..e_k` the weights minimise
//! `|s - sum_i w_i e_i|^2` subject to `sum_i w_i = 1`. The closed form is
//! `C w = 1` with the local Gram matrix `C_ij = (e_i - s) . (e_j - s)`,
//! followed by renormalization. A Tikhonov term on the diagonal keeps `C`
//! invertible when `k` exceeds the intrinsic dimension of the neighbourhood.

use crate::config::WeightConstraint;
use crate::error::{Result, SynthesisError};
use nalgebra::{DMatrix, DVector};
use ndarray::{ArrayView1, ArrayView2};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct WeightSolver {
    regularization: f64,
    constraint: WeightConstraint,
}

impl WeightSolver {
    pub fn new(regularization: f64, constraint: WeightConstraint) -> Self {
        Self {
            regularization,
            constraint,
        }
    }

    /// Local Gram matrix of `neighbors` centred on `seed`, regularized.
    pub fn gram_matrix(
        &self,
        neighbors: ArrayView2<'_, f32>,
        seed: ArrayView1<'_, f32>,
    ) -> DMatrix<f64> {
        let z = DMatrix::from_fn(neighbors.nrows(), neighbors.ncols(), |i, j| {
            neighbors[[i, j]] as f64 - seed[j] as f64
        });

        let mut gram = &z * z.transpose();
        for i in 0..gram.nrows() {
            gram[(i, i)] += self.regularization;
        }
        gram
    }

    /// Reconstruction weights of `seed` over the rows of `neighbors`,
    /// summing to one. `item_id` is only used to label failures.
    pub fn solve(
        &self,
        item_id: usize,
        neighbors: ArrayView2<'_, f32>,
        seed: ArrayView1<'_, f32>,
    ) -> Result<Vec<f64>> {
        let k = neighbors.nrows();
        if k == 0 {
            return Err(SynthesisError::numerical(item_id, "no neighbours to reconstruct from"));
        }

        if neighbors.iter().chain(seed.iter()).any(|x| !x.is_finite()) {
            return Err(SynthesisError::numerical(
                item_id,
                "neighbourhood contains non-finite embedding values",
            ));
        }

        let gram = self.gram_matrix(neighbors, seed);
        let ones = DVector::from_element(k, 1.0);

        let raw = match gram.clone().cholesky() {
            Some(cholesky) => cholesky.solve(&ones),
            None => {
                warn!(item_id, k, "Gram matrix not positive definite, falling back to LU");
                gram.lu().solve(&ones).ok_or_else(|| {
                    SynthesisError::numerical(item_id, "regularized Gram matrix is singular")
                })?
            }
        };

        if raw.iter().any(|w| !w.is_finite()) {
            return Err(SynthesisError::numerical(item_id, "solve produced non-finite weights"));
        }

        let mut weights: Vec<f64> = raw.iter().copied().collect();

        if self.constraint == WeightConstraint::NonNegative {
            let negatives = weights.iter().filter(|w| **w < 0.0).count();
            if negatives > 0 {
                debug!(item_id, negatives, "clamping negative reconstruction weights");
                for w in weights.iter_mut() {
                    *w = w.max(0.0);
                }
            }
        }

        let sum: f64 = weights.iter().sum();
        if !sum.is_finite() || sum.abs() <= f64::EPSILON {
            return Err(SynthesisError::numerical(
                item_id,
                format!("reconstruction weights sum to {}, cannot normalize", sum),
            ));
        }

        for w in weights.iter_mut() {
            *w /= sum;
        }

        Ok(weights)
    }
}
