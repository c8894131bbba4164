use ndarray::{Array1, ArrayView1, ArrayView2};

pub mod metrics;
pub mod validation;

pub fn squared_euclidean_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum()
}

pub fn euclidean_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    squared_euclidean_distance(a, b).sqrt()
}

/// Indices of the `k` smallest scores, ascending. Ties go to the lower
/// index and NaN sorts last.
pub fn k_smallest_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut indexed_scores: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();

    indexed_scores.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or_else(|| a.1.is_nan().cmp(&b.1.is_nan()))
            .then(a.0.cmp(&b.0))
    });

    indexed_scores.into_iter().take(k).map(|(i, _)| i).collect()
}

/// `sum_i weights[i] * rows[i]`, accumulated in f64. Weights are used as
/// given; no renormalization happens here.
pub fn weighted_combination(rows: ArrayView2<'_, f32>, weights: &[f64]) -> Array1<f32> {
    let mut result = Array1::<f64>::zeros(rows.ncols());

    for (row, &weight) in rows.rows().into_iter().zip(weights) {
        result.zip_mut_with(&row, |acc, &x| *acc += weight * x as f64);
    }

    result.mapv(|x| x as f32)
}

/// Column mean of `rows`, or zeros when there are no rows.
pub fn row_mean(rows: ArrayView2<'_, f32>) -> Array1<f32> {
    if rows.nrows() == 0 {
        return Array1::zeros(rows.ncols());
    }

    let mut sum = Array1::<f64>::zeros(rows.ncols());
    for row in rows.rows() {
        sum.zip_mut_with(&row, |acc, &x| *acc += x as f64);
    }
    sum.mapv(|x| (x / rows.nrows() as f64) as f32)
}
