use crate::error::{Result, SynthesisError};
use crate::models::Neighbor;
use crate::utils::{euclidean_distance, k_smallest_indices};
use ndarray::{ArrayView1, ArrayView2};
use std::collections::HashSet;

/// Exact k-nearest-neighbour queries over a fixed point set.
pub trait NeighborSearch: Sync {
    /// The `k` nearest points to `query`, closest first.
    fn search(&self, query: ArrayView1<'_, f32>, k: usize) -> Result<Vec<Neighbor>>;
    fn len(&self) -> usize;
}

/// Brute-force Euclidean index over the rows of a borrowed matrix. Built
/// once per synthesis call; nothing is cached across calls.
#[derive(Debug, Clone)]
pub struct ExactNeighborIndex<'a> {
    points: ArrayView2<'a, f32>,
    candidates: Vec<usize>,
}

impl<'a> ExactNeighborIndex<'a> {
    /// Indexes every row of `points` except those in `excluded`.
    pub fn build(points: ArrayView2<'a, f32>, excluded: &HashSet<usize>) -> Self {
        let candidates = (0..points.nrows())
            .filter(|index| !excluded.contains(index))
            .collect();

        Self { points, candidates }
    }

    pub fn candidates(&self) -> &[usize] {
        &self.candidates
    }
}

impl NeighborSearch for ExactNeighborIndex<'_> {
    fn search(&self, query: ArrayView1<'_, f32>, k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.points.ncols() {
            return Err(SynthesisError::InvalidArgument(format!(
                "query dimension mismatch: expected {}, got {}",
                self.points.ncols(),
                query.len()
            )));
        }

        if k > self.candidates.len() {
            return Err(SynthesisError::Configuration(format!(
                "cannot return {} neighbours from {} indexed points",
                k,
                self.candidates.len()
            )));
        }

        let distances: Vec<f32> = self
            .candidates
            .iter()
            .map(|&index| euclidean_distance(query, self.points.row(index)))
            .collect();

        // Candidates are ascending, so position ties resolve to the lower item id.
        Ok(k_smallest_indices(&distances, k)
            .into_iter()
            .map(|position| Neighbor {
                index: self.candidates[position],
                distance: distances[position],
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.candidates.len()
    }
}
