use coldrec::algorithms::initializer::InitializationMethod;
use coldrec::algorithms::reconstruction::WeightSolver;
use coldrec::algorithms::retriever::{ExactNeighborIndex, NeighborSearch};
use coldrec::config::{SynthesizerConfig, WeightConstraint};
use coldrec::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{Array1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

fn reference_model(num_items: usize, dim: usize) -> (GraphFactorizationModel, InteractionGraph) {
    let init = InitializationMethod::Normal {
        mean: 0.0,
        std_dev: 0.1,
    };
    let model = GraphFactorizationModel::new(200, num_items, dim, 1, &init, 3);
    let mut rng = StdRng::seed_from_u64(5);
    let graph = InteractionGraph::random(200, num_items, num_items - 100, 10, &mut rng);
    (model, graph)
}

fn benchmark_neighbor_search(c: &mut Criterion) {
    let (model, _) = reference_model(5000, 64);
    let index = ExactNeighborIndex::build(model.item_embeddings().view(), &HashSet::new());
    let query = Array1::<f32>::zeros(64);

    c.bench_function("exact_neighbor_search_5000x64_k10", |b| {
        b.iter(|| black_box(index.search(query.view(), 10).unwrap()));
    });
}

fn benchmark_weight_solve(c: &mut Criterion) {
    let (model, _) = reference_model(1000, 64);
    let neighbors = model.item_embeddings().view().select(Axis(0), &(0..10).collect::<Vec<_>>());
    let seed = Array1::<f32>::zeros(64);
    let solver = WeightSolver::new(1e-3, WeightConstraint::Unconstrained);

    c.bench_function("reconstruction_weights_k10", |b| {
        b.iter(|| black_box(solver.solve(0, neighbors.view(), seed.view()).unwrap()));
    });
}

fn benchmark_update(c: &mut Criterion) {
    let (model, graph) = reference_model(5000, 64);
    let synthesizer = IncrementalSynthesizer::new(SynthesizerConfig::default()).unwrap();
    let new_items: Vec<usize> = (4900..5000).collect();

    c.bench_function("incremental_update_100_items", |b| {
        b.iter_batched(
            || model.clone(),
            |mut model| black_box(synthesizer.update(&mut model, &graph, &new_items).unwrap()),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    benchmark_neighbor_search,
    benchmark_weight_solve,
    benchmark_update
);
criterion_main!(benches);
