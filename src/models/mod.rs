use crate::error::{Result, SynthesisError};
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Dense row-per-entity embedding storage. Every row has the same dimension
/// for the lifetime of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    weights: Array2<f32>,
}

impl EmbeddingTable {
    pub fn zeros(rows: usize, dim: usize) -> Self {
        Self {
            weights: Array2::zeros((rows, dim)),
        }
    }

    pub fn from_array(weights: Array2<f32>) -> Self {
        Self { weights }
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let count = rows.len();
        let mut flat = Vec::with_capacity(count * dim);

        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                return Err(SynthesisError::InvalidArgument(format!(
                    "row {} has dimension {}, expected {}",
                    index,
                    row.len(),
                    dim
                )));
            }
            flat.extend(row);
        }

        let weights = Array2::from_shape_vec((count, dim), flat)
            .map_err(|e| SynthesisError::InvalidArgument(e.to_string()))?;
        Ok(Self { weights })
    }

    pub fn len(&self) -> usize {
        self.weights.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.weights.row(index)
    }

    pub fn row_mut(&mut self, index: usize) -> ArrayViewMut1<'_, f32> {
        self.weights.row_mut(index)
    }

    pub fn set_row(&mut self, index: usize, values: ArrayView1<'_, f32>) -> Result<()> {
        if values.len() != self.dim() {
            return Err(SynthesisError::InvalidArgument(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dim(),
                values.len()
            )));
        }
        if index >= self.len() {
            return Err(SynthesisError::InvalidArgument(format!(
                "row {} out of range for table of {} rows",
                index,
                self.len()
            )));
        }
        self.weights.row_mut(index).assign(&values);
        Ok(())
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.weights.view()
    }

    /// Copies the given rows, in order, into a new `(ids.len(), dim)` matrix.
    pub fn gather(&self, ids: &[usize]) -> Array2<f32> {
        self.weights.select(Axis(0), ids)
    }
}

/// Bipartite user-item interaction graph consumed by the reference model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionGraph {
    pub num_users: usize,
    pub num_items: usize,
    pub edges: Vec<(usize, usize)>,
}

impl InteractionGraph {
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Self {
            num_users,
            num_items,
            edges: Vec::new(),
        }
    }

    pub fn add_interaction(&mut self, user: usize, item: usize) -> Result<()> {
        if user >= self.num_users || item >= self.num_items {
            return Err(SynthesisError::InvalidArgument(format!(
                "interaction ({}, {}) outside graph of {} users and {} items",
                user, item, self.num_users, self.num_items
            )));
        }
        self.edges.push((user, item));
        Ok(())
    }

    /// Random graph where each user touches `per_user` items drawn from
    /// `0..item_limit`. Items at or above `item_limit` get no edges, which
    /// is how cold items look to the model.
    pub fn random<R: Rng>(
        num_users: usize,
        num_items: usize,
        item_limit: usize,
        per_user: usize,
        rng: &mut R,
    ) -> Self {
        let mut graph = Self::new(num_users, num_items);
        let item_limit = item_limit.min(num_items);
        if item_limit == 0 {
            return graph;
        }

        for user in 0..num_users {
            for _ in 0..per_user {
                graph.edges.push((user, rng.gen_range(0..item_limit)));
            }
        }
        graph
    }

    pub fn user_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.num_users];
        for &(user, _) in &self.edges {
            degrees[user] += 1;
        }
        degrees
    }

    pub fn item_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.num_items];
        for &(_, item) in &self.edges {
            degrees[item] += 1;
        }
        degrees
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

/// Everything computed for one new item before write-back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReconstruction {
    pub item_id: usize,
    pub neighbors: Vec<Neighbor>,
    pub weights: Vec<f64>,
    pub delta: Vec<f32>,
}

impl ItemReconstruction {
    pub fn delta_view(&self) -> ArrayView1<'_, f32> {
        ArrayView1::from(&self.delta[..])
    }

    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReport {
    pub batch_id: Uuid,
    pub n_new: usize,
    pub elapsed_time: Duration,
    /// Loss before each refinement step, then the loss after the last one.
    /// Empty when refinement is disabled.
    pub refinement_losses: Vec<f64>,
    pub reconstructions: Vec<ItemReconstruction>,
    pub completed_at: DateTime<Utc>,
}

impl UpdateReport {
    pub fn empty() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            n_new: 0,
            elapsed_time: Duration::ZERO,
            refinement_losses: Vec::new(),
            reconstructions: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.refinement_losses.last().copied()
    }

    pub fn reconstruction(&self, item_id: usize) -> Option<&ItemReconstruction> {
        self.reconstructions.iter().find(|r| r.item_id == item_id)
    }

    pub fn targets(&self) -> Array2<f32> {
        stack_targets(&self.reconstructions)
    }
}

/// Stacks the `delta` of each reconstruction into one row per item, in order.
pub fn stack_targets(reconstructions: &[ItemReconstruction]) -> Array2<f32> {
    let dim = reconstructions.first().map(|r| r.delta.len()).unwrap_or(0);
    let mut targets = Array2::zeros((reconstructions.len(), dim));
    for (mut row, reconstruction) in targets.rows_mut().into_iter().zip(reconstructions) {
        row.assign(&reconstruction.delta_view());
    }
    targets
}
