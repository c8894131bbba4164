use crate::models::EmbeddingTable;
use ndarray::{Array1, ArrayView1, Zip};
use std::collections::BTreeMap;

/// Gradients for a sparse set of table rows. Rows never touched by
/// `accumulate` have no entry, so an optimizer step leaves them alone.
#[derive(Debug, Clone, Default)]
pub struct RowGradients {
    rows: BTreeMap<usize, Array1<f32>>,
}

impl RowGradients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, row: usize, gradient: ArrayView1<'_, f32>) {
        match self.rows.get_mut(&row) {
            Some(existing) => *existing += &gradient,
            None => {
                self.rows.insert(row, gradient.to_owned());
            }
        }
    }

    pub fn get(&self, row: usize) -> Option<&Array1<f32>> {
        self.rows.get(&row)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &Array1<f32>)> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

/// An optimizer bound to a single embedding table.
pub trait Optimizer: Send {
    /// Drops gradients accumulated since the last step.
    fn zero_grad(&mut self);
    fn gradients_mut(&mut self) -> &mut RowGradients;
    /// Applies the accumulated gradients to `table`.
    fn step(&mut self, table: &mut EmbeddingTable);
    /// Forgets all per-row state (momentum buffers and gradients).
    fn reset(&mut self);
}

/// SGD with heavy-ball momentum: `v = mu * v + g; p -= lr * v`.
/// Velocity is tracked per row.
#[derive(Debug, Clone)]
pub struct MomentumSgd {
    learning_rate: f32,
    momentum: f32,
    gradients: RowGradients,
    velocity: BTreeMap<usize, Array1<f32>>,
}

impl MomentumSgd {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate: learning_rate as f32,
            momentum: momentum as f32,
            gradients: RowGradients::new(),
            velocity: BTreeMap::new(),
        }
    }

    pub fn velocity(&self, row: usize) -> Option<&Array1<f32>> {
        self.velocity.get(&row)
    }

    pub fn tracked_rows(&self) -> usize {
        self.velocity.len()
    }
}

impl Optimizer for MomentumSgd {
    fn zero_grad(&mut self) {
        self.gradients.clear();
    }

    fn gradients_mut(&mut self) -> &mut RowGradients {
        &mut self.gradients
    }

    fn step(&mut self, table: &mut EmbeddingTable) {
        let momentum = self.momentum;
        let learning_rate = self.learning_rate;

        for (&row, gradient) in self.gradients.iter() {
            let velocity = self
                .velocity
                .entry(row)
                .or_insert_with(|| Array1::zeros(gradient.len()));
            Zip::from(&mut *velocity)
                .and(gradient)
                .for_each(|v, &g| *v = momentum * *v + g);

            table
                .row_mut(row)
                .zip_mut_with(&*velocity, |p, &v| *p -= learning_rate * v);
        }
    }

    fn reset(&mut self) {
        self.gradients.clear();
        self.velocity.clear();
    }
}
