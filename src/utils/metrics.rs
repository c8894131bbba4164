use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// How far a set of embedding rows sits from its reconstruction targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionMetrics {
    /// Squared error summed over the embedding dimension, averaged over rows.
    pub mean_item_squared_error: f64,
    pub max_item_distance: f64,
    pub max_abs_error: f64,
}

/// The refinement objective: `(1/n) * sum_rows sum_dims (x - t)^2`.
pub fn mean_item_squared_error(rows: ArrayView2<'_, f32>, targets: ArrayView2<'_, f32>) -> f64 {
    if rows.nrows() == 0 {
        return 0.0;
    }

    let total: f64 = rows
        .iter()
        .zip(targets.iter())
        .map(|(&x, &t)| {
            let diff = x as f64 - t as f64;
            diff * diff
        })
        .sum();

    total / rows.nrows() as f64
}

pub fn reconstruction_metrics(
    rows: ArrayView2<'_, f32>,
    targets: ArrayView2<'_, f32>,
) -> ReconstructionMetrics {
    let mut max_item_distance = 0.0f64;
    let mut max_abs_error = 0.0f64;

    for (row, target) in rows.rows().into_iter().zip(targets.rows()) {
        let mut squared = 0.0f64;
        for (&x, &t) in row.iter().zip(target.iter()) {
            let diff = x as f64 - t as f64;
            squared += diff * diff;
            max_abs_error = max_abs_error.max(diff.abs());
        }
        max_item_distance = max_item_distance.max(squared.sqrt());
    }

    ReconstructionMetrics {
        mean_item_squared_error: mean_item_squared_error(rows, targets),
        max_item_distance,
        max_abs_error,
    }
}
