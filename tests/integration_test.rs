use coldrec::algorithms::initializer::InitializationMethod;
use coldrec::algorithms::optimizer::Optimizer;
use coldrec::config::{SeedStrategy, SynthesizerConfig, WeightConstraint};
use coldrec::*;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::Cell;

/// Reference model wrapper that counts forward passes.
struct CountingModel {
    inner: GraphFactorizationModel,
    forward_calls: Cell<usize>,
}

impl CountingModel {
    fn new(inner: GraphFactorizationModel) -> Self {
        Self {
            inner,
            forward_calls: Cell::new(0),
        }
    }
}

impl EmbeddingModel for CountingModel {
    type Dataset = InteractionGraph;

    fn forward(&self, dataset: &InteractionGraph) -> anyhow::Result<Array2<f32>> {
        self.forward_calls.set(self.forward_calls.get() + 1);
        self.inner.forward(dataset)
    }

    fn num_users(&self) -> usize {
        self.inner.num_users()
    }

    fn num_items(&self) -> usize {
        self.inner.num_items()
    }

    fn item_embeddings(&self) -> &EmbeddingTable {
        self.inner.item_embeddings()
    }

    fn item_embeddings_mut(&mut self) -> &mut EmbeddingTable {
        self.inner.item_embeddings_mut()
    }
}

/// Model whose forward output has the wrong number of rows.
struct TruncatingModel {
    items: EmbeddingTable,
}

impl EmbeddingModel for TruncatingModel {
    type Dataset = ();

    fn forward(&self, _dataset: &()) -> anyhow::Result<Array2<f32>> {
        Ok(Array2::zeros((self.items.len() - 1, self.items.dim())))
    }

    fn num_users(&self) -> usize {
        0
    }

    fn num_items(&self) -> usize {
        self.items.len()
    }

    fn item_embeddings(&self) -> &EmbeddingTable {
        &self.items
    }

    fn item_embeddings_mut(&mut self) -> &mut EmbeddingTable {
        &mut self.items
    }
}

struct FailingModel {
    items: EmbeddingTable,
}

impl EmbeddingModel for FailingModel {
    type Dataset = ();

    fn forward(&self, _dataset: &()) -> anyhow::Result<Array2<f32>> {
        anyhow::bail!("graph encoder unavailable")
    }

    fn num_users(&self) -> usize {
        0
    }

    fn num_items(&self) -> usize {
        self.items.len()
    }

    fn item_embeddings(&self) -> &EmbeddingTable {
        &self.items
    }

    fn item_embeddings_mut(&mut self) -> &mut EmbeddingTable {
        &mut self.items
    }
}

fn scenario_model() -> CountingModel {
    let items = EmbeddingTable::from_rows(vec![
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![-1.0, 0.0],
        vec![0.0, -1.0],
        vec![2.0, 2.0],
        vec![0.3, 0.3],
    ])
    .unwrap();
    let users = EmbeddingTable::zeros(0, 2);
    CountingModel::new(GraphFactorizationModel::from_tables(users, items, 0).unwrap())
}

fn random_model(num_users: usize, num_items: usize, dim: usize, layers: usize) -> CountingModel {
    let init = InitializationMethod::Normal {
        mean: 0.0,
        std_dev: 0.1,
    };
    CountingModel::new(GraphFactorizationModel::new(
        num_users, num_items, dim, layers, &init, 7,
    ))
}

fn random_graph(num_users: usize, num_items: usize, warm_items: usize) -> InteractionGraph {
    let mut rng = StdRng::seed_from_u64(11);
    InteractionGraph::random(num_users, num_items, warm_items, 5, &mut rng)
}

fn synthesizer(k: usize, alpha: f64, sgd_steps: usize) -> IncrementalSynthesizer {
    IncrementalSynthesizer::new(SynthesizerConfig {
        k,
        alpha,
        sgd_steps,
        ..SynthesizerConfig::default()
    })
    .unwrap()
}

#[test]
fn test_empty_input_is_a_no_op() {
    let mut model = scenario_model();
    let graph = InteractionGraph::new(0, 6);
    let before = model.item_embeddings().clone();

    // k larger than the table would fail validation, but empty input returns first.
    let report = synthesizer(100, 0.5, 3).update(&mut model, &graph, &[]).unwrap();

    assert_eq!(report.n_new, 0);
    assert!(report.reconstructions.is_empty());
    assert_eq!(model.forward_calls.get(), 0);
    assert_eq!(model.item_embeddings(), &before);
}

#[test]
fn test_weights_sum_to_one() {
    let mut model = random_model(20, 60, 8, 1);
    let graph = random_graph(20, 60, 50);
    let new_items: Vec<usize> = (50..60).collect();

    let report = synthesizer(10, 0.5, 0).update(&mut model, &graph, &new_items).unwrap();

    assert_eq!(report.n_new, 10);
    for reconstruction in &report.reconstructions {
        assert_eq!(reconstruction.weights.len(), 10);
        assert!((reconstruction.weight_sum() - 1.0).abs() < 1e-5);
    }
}

#[test]
fn test_alpha_zero_keeps_old_rows() {
    let mut model = random_model(10, 30, 4, 0);
    let graph = random_graph(10, 30, 25);
    let before = model.item_embeddings().clone();

    synthesizer(5, 0.0, 0).update(&mut model, &graph, &[25, 27]).unwrap();

    assert_eq!(model.item_embeddings(), &before);
}

#[test]
fn test_alpha_one_writes_delta() {
    let mut model = random_model(10, 30, 4, 1);
    let graph = random_graph(10, 30, 25);

    let report = synthesizer(5, 1.0, 0).update(&mut model, &graph, &[25, 27]).unwrap();

    for reconstruction in &report.reconstructions {
        assert_eq!(
            model.item_embeddings().row(reconstruction.item_id),
            reconstruction.delta_view()
        );
    }
}

#[test]
fn test_new_rows_keep_dimension() {
    let graph = random_graph(5, 12, 10);
    for k in 1..=10 {
        let mut model = random_model(5, 12, 6, 1);
        let report = synthesizer(k, 0.5, 1).update(&mut model, &graph, &[10, 11]).unwrap();
        for reconstruction in &report.reconstructions {
            assert_eq!(reconstruction.delta.len(), 6);
            assert_eq!(reconstruction.neighbors.len(), k);
        }
        assert_eq!(model.item_embeddings().dim(), 6);
    }
}

#[test]
fn test_refinement_does_not_increase_error() {
    let mut model = random_model(20, 50, 8, 1);
    let graph = random_graph(20, 50, 45);
    let synthesizer = IncrementalSynthesizer::new(SynthesizerConfig {
        k: 8,
        alpha: 0.5,
        sgd_steps: 10,
        learning_rate: 0.01,
        ..SynthesizerConfig::default()
    })
    .unwrap();

    let new_items: Vec<usize> = (45..50).collect();
    let report = synthesizer.update(&mut model, &graph, &new_items).unwrap();

    assert_eq!(report.refinement_losses.len(), 11);
    for pair in report.refinement_losses.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-9, "loss increased: {:?}", pair);
    }
    assert!(report.final_loss().unwrap() < report.refinement_losses[0]);

    let current = model.item_embeddings().gather(&new_items);
    let recomputed =
        coldrec::utils::metrics::mean_item_squared_error(current.view(), report.targets().view());
    assert!((recomputed - report.final_loss().unwrap()).abs() < 1e-9);
}

#[test]
fn test_untouched_rows_and_momentum() {
    let mut model = random_model(10, 40, 4, 1);
    let graph = random_graph(10, 40, 35);
    let before = model.item_embeddings().clone();
    let new_items = [35, 38];

    let synthesizer = synthesizer(6, 0.5, 3);
    let mut optimizer = synthesizer.new_optimizer();
    synthesizer
        .update_with_optimizer(&mut model, &graph, &new_items, &mut optimizer)
        .unwrap();

    for item in 0..40 {
        if new_items.contains(&item) {
            assert!(optimizer.velocity(item).is_some());
            continue;
        }
        assert_eq!(model.item_embeddings().row(item), before.row(item));
        assert!(optimizer.velocity(item).is_none());
    }
    assert_eq!(optimizer.tracked_rows(), 2);

    optimizer.reset();
    assert_eq!(optimizer.tracked_rows(), 0);
}

#[test]
fn test_out_of_range_id_leaves_table_unmutated() {
    let mut model = scenario_model();
    let graph = InteractionGraph::new(0, 6);
    let before = model.item_embeddings().clone();

    let result = synthesizer(3, 1.0, 0).update(&mut model, &graph, &[5, 6]);

    assert!(matches!(result, Err(SynthesisError::InvalidArgument(_))));
    assert_eq!(model.item_embeddings(), &before);
    assert_eq!(model.forward_calls.get(), 0);
}

#[test]
fn test_duplicate_ids_are_rejected() {
    let mut model = scenario_model();
    let graph = InteractionGraph::new(0, 6);
    let result = synthesizer(3, 1.0, 0).update(&mut model, &graph, &[5, 5]);
    assert!(matches!(result, Err(SynthesisError::InvalidArgument(_))));
}

#[test]
fn test_k_larger_than_candidates_is_a_configuration_error() {
    let mut model = scenario_model();
    let graph = InteractionGraph::new(0, 6);

    let result = synthesizer(7, 1.0, 0).update(&mut model, &graph, &[5]);
    assert!(matches!(result, Err(SynthesisError::Configuration(_))));

    // Six items, one of them new: only five candidates remain.
    let result = synthesizer(6, 1.0, 0).update(&mut model, &graph, &[5]);
    assert!(matches!(result, Err(SynthesisError::Configuration(_))));
}

#[test]
fn test_single_neighbor_gets_unit_weight() {
    let mut model = scenario_model();
    let graph = InteractionGraph::new(0, 6);

    let report = synthesizer(1, 1.0, 0).update(&mut model, &graph, &[5]).unwrap();

    let reconstruction = report.reconstruction(5).unwrap();
    assert_eq!(reconstruction.weights, vec![1.0]);
    assert_eq!(reconstruction.neighbors[0].index, 0);
    assert_eq!(model.item_embeddings().row(5).to_vec(), vec![1.0, 0.0]);
}

#[test]
fn test_concrete_scenario() {
    let mut model = scenario_model();
    let graph = InteractionGraph::new(0, 6);

    let report = synthesizer(3, 1.0, 0).update(&mut model, &graph, &[5]).unwrap();

    assert_eq!(report.n_new, 1);
    assert_eq!(model.forward_calls.get(), 1);

    let reconstruction = report.reconstruction(5).unwrap();
    let neighbors: Vec<usize> = reconstruction.neighbors.iter().map(|n| n.index).collect();
    assert_eq!(neighbors, vec![0, 1, 2]);
    assert!(reconstruction.neighbors.iter().all(|n| (n.distance - 1.0).abs() < 1e-6));
    assert!((reconstruction.weight_sum() - 1.0).abs() < 1e-5);

    let w = &reconstruction.weights;
    let expected = [(w[0] - w[2]) as f32, w[1] as f32];
    let row = model.item_embeddings().row(5);
    assert!((row[0] - expected[0]).abs() < 1e-5);
    assert!((row[1] - expected[1]).abs() < 1e-5);

    // Items 0 and 2 are collinear through the origin, so the regularized
    // solve spreads almost all weight across them equally.
    assert!((w[0] - w[2]).abs() < 1e-6);
    assert!((row[1] - 0.999 / 2000.999).abs() < 1e-5);

    // Existing rows are untouched.
    assert_eq!(model.item_embeddings().row(4).to_vec(), vec![2.0, 2.0]);
}

#[test]
fn test_numerical_failure_names_item_and_leaves_table() {
    let items = EmbeddingTable::from_rows(vec![
        vec![f32::NAN, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 1.0],
        vec![0.1, 0.1],
    ])
    .unwrap();
    let model = GraphFactorizationModel::from_tables(EmbeddingTable::zeros(0, 2), items, 0).unwrap();
    let mut model = CountingModel::new(model);
    let graph = InteractionGraph::new(0, 4);

    let result = synthesizer(3, 1.0, 2).update(&mut model, &graph, &[3]);

    assert!(matches!(result, Err(SynthesisError::Numerical { item_id: 3, .. })));
    assert_eq!(model.item_embeddings().row(3).to_vec(), vec![0.1, 0.1]);
}

#[test]
fn test_forward_shape_mismatch() {
    let mut model = TruncatingModel {
        items: EmbeddingTable::zeros(5, 3),
    };
    let result = synthesizer(2, 0.5, 0).update(&mut model, &(), &[4]);
    assert!(matches!(
        result,
        Err(SynthesisError::ShapeMismatch {
            expected_rows: 5,
            got_rows: 4,
            ..
        })
    ));
}

#[test]
fn test_forward_failure_is_propagated() {
    let mut model = FailingModel {
        items: EmbeddingTable::zeros(5, 3),
    };
    let result = synthesizer(2, 0.5, 0).update(&mut model, &(), &[4]);
    match result {
        Err(SynthesisError::Model(e)) => assert!(e.to_string().contains("graph encoder")),
        other => panic!("expected model error, got {:?}", other.map(|r| r.n_new)),
    }
}

#[test]
fn test_repeated_calls_are_independent() {
    let mut model = random_model(10, 40, 4, 1);
    let graph = random_graph(10, 40, 30);
    let synthesizer = synthesizer(5, 0.5, 2);

    let first = synthesizer.update(&mut model, &graph, &[30, 31]).unwrap();
    let second = synthesizer.update(&mut model, &graph, &[32, 33, 34]).unwrap();

    assert_eq!(first.n_new, 2);
    assert_eq!(second.n_new, 3);
    assert_ne!(first.batch_id, second.batch_id);
    assert_eq!(model.forward_calls.get(), 2);
}

#[test]
fn test_non_negative_constraint() {
    let items = EmbeddingTable::from_rows(vec![
        vec![1.0, 0.0],
        vec![2.0, 0.0],
        vec![5.0, 5.0],
        vec![0.0, 0.0],
    ])
    .unwrap();
    let base = GraphFactorizationModel::from_tables(EmbeddingTable::zeros(0, 2), items, 0).unwrap();
    let graph = InteractionGraph::new(0, 4);

    let config = SynthesizerConfig {
        k: 2,
        alpha: 1.0,
        sgd_steps: 0,
        ..SynthesizerConfig::default()
    };

    let unconstrained = IncrementalSynthesizer::new(config.clone()).unwrap();
    let targets = unconstrained.reconstruct_targets(&base, &graph, &[3]).unwrap();
    assert!(targets[0].weights.iter().any(|w| *w < 0.0));

    let constrained = IncrementalSynthesizer::new(SynthesizerConfig {
        weight_constraint: WeightConstraint::NonNegative,
        ..config
    })
    .unwrap();
    let targets = constrained.reconstruct_targets(&base, &graph, &[3]).unwrap();
    assert!(targets[0].weights.iter().all(|w| *w >= 0.0));
    assert!((targets[0].weight_sum() - 1.0).abs() < 1e-9);
}

#[test]
fn test_seed_strategies_run_end_to_end() {
    let graph = random_graph(10, 30, 25);
    for seed in [SeedStrategy::Origin, SeedStrategy::Mean, SeedStrategy::Current] {
        let mut model = random_model(10, 30, 4, 2);
        let synthesizer = IncrementalSynthesizer::new(SynthesizerConfig {
            k: 4,
            seed,
            ..SynthesizerConfig::default()
        })
        .unwrap();
        let report = synthesizer.update(&mut model, &graph, &[25, 26, 29]).unwrap();
        assert_eq!(report.n_new, 3);
        for reconstruction in &report.reconstructions {
            assert!(reconstruction
                .neighbors
                .iter()
                .all(|n| ![25, 26, 29].contains(&n.index)));
        }
    }
}

#[test]
fn test_invalid_configuration_rejected_at_construction() {
    let result = IncrementalSynthesizer::new(SynthesizerConfig {
        alpha: -0.1,
        ..SynthesizerConfig::default()
    });
    assert!(matches!(result, Err(SynthesisError::Configuration(_))));
}

#[test]
fn test_optimizer_trait_object() {
    let mut model = random_model(5, 20, 3, 0);
    let graph = random_graph(5, 20, 18);
    let synthesizer = synthesizer(4, 0.5, 2);

    let mut optimizer: Box<dyn Optimizer> = Box::new(synthesizer.new_optimizer());
    let report = synthesizer
        .update_with_optimizer(&mut model, &graph, &[18, 19], optimizer.as_mut())
        .unwrap();
    assert_eq!(report.refinement_losses.len(), 3);
}
