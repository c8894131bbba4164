pub mod initializer;
pub mod optimizer;
pub mod reconstruction;
pub mod retriever;
pub mod synthesizer;

pub use synthesizer::IncrementalSynthesizer;

use crate::config::ModelConfig;
use crate::error::{Result, SynthesisError};
use crate::models::{EmbeddingTable, InteractionGraph};
use anyhow::{bail, Context};
use initializer::InitializationMethod;
use ndarray::{concatenate, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// The recommender the synthesizer works against.
///
/// `forward` must be a pure read of model state returning one row per node,
/// users first, then items: shape `(num_users + num_items, d)`. The item
/// table is the only state the synthesizer ever writes.
pub trait EmbeddingModel {
    type Dataset: ?Sized;

    fn forward(&self, dataset: &Self::Dataset) -> anyhow::Result<Array2<f32>>;
    fn num_users(&self) -> usize;
    fn num_items(&self) -> usize;
    fn item_embeddings(&self) -> &EmbeddingTable;
    fn item_embeddings_mut(&mut self) -> &mut EmbeddingTable;

    fn embedding_dim(&self) -> usize {
        self.item_embeddings().dim()
    }
}

/// Matrix factorization with LightGCN-style propagation over the user-item
/// graph. With zero layers `forward` returns the raw tables.
#[derive(Debug, Clone)]
pub struct GraphFactorizationModel {
    user_embeddings: EmbeddingTable,
    item_embeddings: EmbeddingTable,
    propagation_layers: usize,
}

impl GraphFactorizationModel {
    pub fn new(
        num_users: usize,
        num_items: usize,
        embedding_dim: usize,
        propagation_layers: usize,
        init: &InitializationMethod,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let user_embeddings = init.initialize_table(num_users, embedding_dim, &mut rng);
        let item_embeddings = init.initialize_table(num_items, embedding_dim, &mut rng);

        Self {
            user_embeddings,
            item_embeddings,
            propagation_layers,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.num_users,
            config.num_items,
            config.embedding_dim,
            config.propagation_layers,
            &config.init,
            config.seed,
        )
    }

    pub fn from_tables(
        user_embeddings: EmbeddingTable,
        item_embeddings: EmbeddingTable,
        propagation_layers: usize,
    ) -> Result<Self> {
        let user_embeddings = if user_embeddings.is_empty() {
            EmbeddingTable::zeros(0, item_embeddings.dim())
        } else {
            user_embeddings
        };

        if user_embeddings.dim() != item_embeddings.dim() {
            return Err(SynthesisError::InvalidArgument(format!(
                "user embedding dimension {} does not match item embedding dimension {}",
                user_embeddings.dim(),
                item_embeddings.dim()
            )));
        }

        Ok(Self {
            user_embeddings,
            item_embeddings,
            propagation_layers,
        })
    }

    fn propagate(&self, graph: &InteractionGraph, layer: &Array2<f32>) -> Array2<f32> {
        let num_users = self.num_users();
        let user_degrees = graph.user_degrees();
        let item_degrees = graph.item_degrees();
        let mut next = Array2::zeros(layer.raw_dim());

        for &(user, item) in &graph.edges {
            let norm = 1.0 / ((user_degrees[user] * item_degrees[item]) as f32).sqrt();
            let item_row = num_users + item;

            let from_item = layer.row(item_row).mapv(|x| x * norm);
            let from_user = layer.row(user).mapv(|x| x * norm);
            next.row_mut(user).scaled_add(1.0, &from_item);
            next.row_mut(item_row).scaled_add(1.0, &from_user);
        }

        next
    }
}

impl EmbeddingModel for GraphFactorizationModel {
    type Dataset = InteractionGraph;

    fn forward(&self, graph: &InteractionGraph) -> anyhow::Result<Array2<f32>> {
        if graph.num_users != self.num_users() || graph.num_items != self.num_items() {
            bail!(
                "graph has {} users and {} items, model has {} and {}",
                graph.num_users,
                graph.num_items,
                self.num_users(),
                self.num_items()
            );
        }

        let base = concatenate(
            Axis(0),
            &[self.user_embeddings.view(), self.item_embeddings.view()],
        )
        .context("stacking user and item tables")?;

        if self.propagation_layers == 0 {
            return Ok(base);
        }

        let mut sum = base.clone();
        let mut layer = base;
        for _ in 0..self.propagation_layers {
            layer = self.propagate(graph, &layer);
            sum += &layer;
        }

        let layers = (self.propagation_layers + 1) as f32;
        Ok(sum.mapv(|x| x / layers))
    }

    fn num_users(&self) -> usize {
        self.user_embeddings.len()
    }

    fn num_items(&self) -> usize {
        self.item_embeddings.len()
    }

    fn item_embeddings(&self) -> &EmbeddingTable {
        &self.item_embeddings
    }

    fn item_embeddings_mut(&mut self) -> &mut EmbeddingTable {
        &mut self.item_embeddings
    }
}
