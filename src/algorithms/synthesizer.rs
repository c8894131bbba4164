//! Cold-start embedding synthesis.
//!
//! New items get an embedding reconstructed from their nearest existing
//! items in the model's current output space:
//!
//! 1. snapshot the item rows of one forward pass,
//! 2. find the `k` nearest snapshot rows to a seed point,
//! 3. solve for locally-linear reconstruction weights over them,
//! 4. blend the weighted combination into the live table and optionally
//!    pull the rows toward it with a few momentum-SGD steps.
//!
//! Nothing is written to the table until every item of the batch has been
//! reconstructed, so a failed call leaves the model untouched.

use super::optimizer::{MomentumSgd, Optimizer};
use super::reconstruction::WeightSolver;
use super::retriever::{ExactNeighborIndex, NeighborSearch};
use super::EmbeddingModel;
use crate::config::{SeedStrategy, SynthesizerConfig};
use crate::error::{Result, SynthesisError};
use crate::models::{stack_targets, EmbeddingTable, ItemReconstruction, UpdateReport};
use crate::utils::metrics::mean_item_squared_error;
use crate::utils::validation::{
    validate_forward_shape, validate_neighbor_count, validate_new_item_ids, validate_targets,
};
use crate::utils::{row_mean, weighted_combination};
use chrono::Utc;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Synthesizes embeddings for previously unseen items.
///
/// Calls borrow the model mutably, so at most one synthesis runs against a
/// given model at a time. The synthesizer itself holds no per-call state.
#[derive(Debug, Clone)]
pub struct IncrementalSynthesizer {
    config: SynthesizerConfig,
    solver: WeightSolver,
}

impl IncrementalSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Result<Self> {
        config.validate()?;
        let solver = WeightSolver::new(config.regularization, config.weight_constraint);
        Ok(Self { config, solver })
    }

    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// A fresh optimizer matching the configured refinement hyperparameters.
    pub fn new_optimizer(&self) -> MomentumSgd {
        MomentumSgd::new(self.config.learning_rate, self.config.momentum)
    }

    /// Synthesizes and writes embeddings for `new_item_ids`. Refinement
    /// uses an optimizer built for this call only, so no momentum carries
    /// over between batches.
    pub fn update<M: EmbeddingModel>(
        &self,
        model: &mut M,
        dataset: &M::Dataset,
        new_item_ids: &[usize],
    ) -> Result<UpdateReport> {
        let mut optimizer = self.new_optimizer();
        self.update_with_optimizer(model, dataset, new_item_ids, &mut optimizer)
    }

    /// Same as [`update`](Self::update) but refines with a caller-owned
    /// optimizer, which must be bound to `model`'s item table.
    pub fn update_with_optimizer<M, O>(
        &self,
        model: &mut M,
        dataset: &M::Dataset,
        new_item_ids: &[usize],
        optimizer: &mut O,
    ) -> Result<UpdateReport>
    where
        M: EmbeddingModel,
        O: Optimizer + ?Sized,
    {
        let started = Instant::now();

        if new_item_ids.is_empty() {
            debug!("no new items, skipping synthesis");
            return Ok(UpdateReport::empty());
        }

        let reconstructions = self.reconstruct_targets(&*model, dataset, new_item_ids)?;
        Ok(self.write_back(model.item_embeddings_mut(), reconstructions, optimizer, started))
    }

    /// Blends and refines targets computed earlier by
    /// [`reconstruct_targets`](Self::reconstruct_targets). Every target is
    /// checked against the item table before the first row is written.
    pub fn apply_targets<M, O>(
        &self,
        model: &mut M,
        reconstructions: Vec<ItemReconstruction>,
        optimizer: &mut O,
    ) -> Result<UpdateReport>
    where
        M: EmbeddingModel,
        O: Optimizer + ?Sized,
    {
        let started = Instant::now();

        if reconstructions.is_empty() {
            return Ok(UpdateReport::empty());
        }

        let table = model.item_embeddings_mut();
        validate_targets(&reconstructions, table.len(), table.dim())?;
        Ok(self.write_back(table, reconstructions, optimizer, started))
    }

    fn write_back<O: Optimizer + ?Sized>(
        &self,
        table: &mut EmbeddingTable,
        reconstructions: Vec<ItemReconstruction>,
        optimizer: &mut O,
        started: Instant,
    ) -> UpdateReport {
        self.blend(table, &reconstructions);

        let refinement_losses = if self.config.sgd_steps > 0 {
            self.refine(table, &reconstructions, optimizer)
        } else {
            Vec::new()
        };

        let report = UpdateReport {
            batch_id: Uuid::new_v4(),
            n_new: reconstructions.len(),
            elapsed_time: started.elapsed(),
            refinement_losses,
            reconstructions,
            completed_at: Utc::now(),
        };

        info!(
            batch_id = %report.batch_id,
            n_new = report.n_new,
            elapsed_ms = report.elapsed_time.as_millis() as u64,
            final_loss = ?report.final_loss(),
            "synthesized cold-start item embeddings"
        );

        report
    }

    /// Validates the request, snapshots the model and computes the target
    /// embedding of every new item without touching the table.
    pub fn reconstruct_targets<M: EmbeddingModel>(
        &self,
        model: &M,
        dataset: &M::Dataset,
        new_item_ids: &[usize],
    ) -> Result<Vec<ItemReconstruction>> {
        if new_item_ids.is_empty() {
            return Ok(Vec::new());
        }

        let num_items = model.num_items();
        validate_new_item_ids(new_item_ids, num_items)?;
        validate_neighbor_count(self.config.k, num_items, new_item_ids.len())?;

        let snapshot = self.snapshot(model, dataset)?;
        self.reconstruct(snapshot.view(), new_item_ids)
    }

    /// Item rows of one forward pass, shape `(num_items, d)`.
    pub fn snapshot<M: EmbeddingModel>(&self, model: &M, dataset: &M::Dataset) -> Result<Array2<f32>> {
        let num_users = model.num_users();
        let num_items = model.num_items();

        let output = model.forward(dataset)?;
        validate_forward_shape(output.view(), num_users + num_items, model.embedding_dim())?;

        debug!(num_users, num_items, dim = output.ncols(), "took embedding snapshot");
        Ok(output.slice(s![num_users.., ..]).to_owned())
    }

    /// Neighbour search and weight solve for each id against `snapshot`.
    /// The ids themselves are excluded from the candidate set.
    pub fn reconstruct(
        &self,
        snapshot: ArrayView2<'_, f32>,
        new_item_ids: &[usize],
    ) -> Result<Vec<ItemReconstruction>> {
        if let Some(&id) = new_item_ids.iter().find(|&&id| id >= snapshot.nrows()) {
            return Err(SynthesisError::InvalidArgument(format!(
                "item id {} out of range for snapshot of {} items",
                id,
                snapshot.nrows()
            )));
        }

        let excluded: HashSet<usize> = new_item_ids.iter().copied().collect();
        let index = ExactNeighborIndex::build(snapshot, &excluded);

        let mean = match self.config.seed {
            SeedStrategy::Mean => row_mean(snapshot.select(Axis(0), index.candidates()).view()),
            _ => Array1::zeros(snapshot.ncols()),
        };

        let results: Vec<Result<ItemReconstruction>> = new_item_ids
            .par_iter()
            .map(|&item_id| self.reconstruct_item(item_id, snapshot, &index, mean.view()))
            .collect();

        // Report the first failure in input order.
        let reconstructions = results.into_iter().collect::<Result<Vec<_>>>()?;
        debug!(
            count = reconstructions.len(),
            k = self.config.k,
            "computed reconstruction targets"
        );
        Ok(reconstructions)
    }

    fn seed_for(
        &self,
        item_id: usize,
        snapshot: ArrayView2<'_, f32>,
        mean: ArrayView1<'_, f32>,
    ) -> Array1<f32> {
        match self.config.seed {
            SeedStrategy::Origin => Array1::zeros(snapshot.ncols()),
            SeedStrategy::Mean => mean.to_owned(),
            SeedStrategy::Current => snapshot.row(item_id).to_owned(),
        }
    }

    fn reconstruct_item<S: NeighborSearch>(
        &self,
        item_id: usize,
        snapshot: ArrayView2<'_, f32>,
        index: &S,
        mean: ArrayView1<'_, f32>,
    ) -> Result<ItemReconstruction> {
        let seed = self.seed_for(item_id, snapshot, mean);
        let neighbors = index.search(seed.view(), self.config.k)?;

        let neighbor_ids: Vec<usize> = neighbors.iter().map(|n| n.index).collect();
        let neighbor_rows = snapshot.select(Axis(0), &neighbor_ids);

        let weights = self.solver.solve(item_id, neighbor_rows.view(), seed.view())?;
        let delta = weighted_combination(neighbor_rows.view(), &weights);

        if delta.iter().any(|x| !x.is_finite()) {
            return Err(SynthesisError::numerical(item_id, "reconstructed embedding is not finite"));
        }

        Ok(ItemReconstruction {
            item_id,
            neighbors,
            weights,
            delta: delta.to_vec(),
        })
    }

    /// `row <- (1 - alpha) * row + alpha * delta` for every new item.
    fn blend(&self, table: &mut EmbeddingTable, reconstructions: &[ItemReconstruction]) {
        let alpha = self.config.alpha as f32;
        let keep = 1.0 - alpha;

        for reconstruction in reconstructions {
            table
                .row_mut(reconstruction.item_id)
                .zip_mut_with(&reconstruction.delta_view(), |old, &delta| {
                    *old = keep * *old + alpha * delta
                });
        }
    }

    /// Moves the new rows toward their frozen targets. Returns the loss
    /// before each step followed by the loss after the last one.
    fn refine<O: Optimizer + ?Sized>(
        &self,
        table: &mut EmbeddingTable,
        reconstructions: &[ItemReconstruction],
        optimizer: &mut O,
    ) -> Vec<f64> {
        let ids: Vec<usize> = reconstructions.iter().map(|r| r.item_id).collect();
        let targets = stack_targets(reconstructions);

        // d/dx of (1/n) * sum (x - t)^2
        let scale = 2.0 / ids.len() as f32;
        let mut losses = Vec::with_capacity(self.config.sgd_steps + 1);

        for step in 0..self.config.sgd_steps {
            let current = table.gather(&ids);
            let loss = mean_item_squared_error(current.view(), targets.view());
            debug!(step, loss, "refinement step");
            losses.push(loss);

            optimizer.zero_grad();
            for (position, &item_id) in ids.iter().enumerate() {
                let gradient = (&current.row(position) - &targets.row(position)) * scale;
                optimizer.gradients_mut().accumulate(item_id, gradient.view());
            }
            optimizer.step(table);
        }

        losses.push(mean_item_squared_error(table.gather(&ids).view(), targets.view()));
        losses
    }
}
