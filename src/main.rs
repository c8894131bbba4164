use anyhow::{bail, Context, Result};
use clap::Parser;
use coldrec::models::stack_targets;
use coldrec::services::ColdStartService;
use coldrec::utils::metrics::reconstruction_metrics;
use coldrec::{init_tracing, Config, EmbeddingModel, GraphFactorizationModel, InteractionGraph};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Treat the last N item ids as cold-start items.
    #[arg(short, long, default_value_t = 10)]
    new_items: usize,

    /// Explicit comma-separated cold item ids; overrides --new-items.
    #[arg(long, value_delimiter = ',')]
    items: Option<Vec<usize>>,

    #[arg(short)]
    k: Option<usize>,

    #[arg(long)]
    alpha: Option<f64>,

    #[arg(long)]
    sgd_steps: Option<usize>,

    /// Compute reconstruction targets without writing them back.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    items: usize,
    batches: usize,
    dry_run: bool,
    mean_weight_sum: f64,
    mean_neighbor_distance: f64,
    mean_item_squared_error: f64,
    max_item_distance: f64,
    stats: Option<coldrec::services::ColdStartStats>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    if let Some(k) = args.k {
        config.synthesizer.k = k;
    }
    if let Some(alpha) = args.alpha {
        config.synthesizer.alpha = alpha;
    }
    if let Some(steps) = args.sgd_steps {
        config.synthesizer.sgd_steps = steps;
    }
    config.validate()?;

    info!("Synthesizer configuration: {:?}", config.synthesizer);

    let num_items = config.model.num_items;
    let new_items: Vec<usize> = match args.items {
        Some(items) => items,
        None => {
            if args.new_items > num_items {
                bail!("--new-items {} exceeds num_items {}", args.new_items, num_items);
            }
            (num_items - args.new_items..num_items).collect()
        }
    };

    // Cold items are the ones nobody has interacted with yet.
    let warm_limit = new_items.iter().min().copied().unwrap_or(num_items);
    let mut rng = StdRng::seed_from_u64(config.model.seed);
    let graph = InteractionGraph::random(
        config.model.num_users,
        num_items,
        warm_limit,
        config.model.interactions_per_user,
        &mut rng,
    );
    let model = GraphFactorizationModel::from_config(&config.model);

    info!(
        users = model.num_users(),
        items = model.num_items(),
        edges = graph.edges.len(),
        cold = new_items.len(),
        "Reference model ready"
    );

    let mut service = ColdStartService::new(model, config.synthesizer.clone(), &config.service)
        .context("building cold-start service")?;

    let (reconstructions, batches, stats) = if args.dry_run {
        let targets = service
            .synthesizer()
            .reconstruct_targets(service.model(), &graph, &new_items)?;
        (targets, 0, None)
    } else {
        let reports = service.ingest(&graph, &new_items)?;
        let batches = reports.len();
        let targets = reports.into_iter().flat_map(|r| r.reconstructions).collect();
        (targets, batches, Some(service.stats().clone()))
    };

    let ids: Vec<usize> = reconstructions.iter().map(|r| r.item_id).collect();
    let targets = stack_targets(&reconstructions);
    let current = service.model().item_embeddings().gather(&ids);
    let metrics = reconstruction_metrics(current.view(), targets.view());

    let count = reconstructions.len().max(1) as f64;
    let summary = RunSummary {
        items: reconstructions.len(),
        batches,
        dry_run: args.dry_run,
        mean_weight_sum: reconstructions.iter().map(|r| r.weight_sum()).sum::<f64>() / count,
        mean_neighbor_distance: reconstructions
            .iter()
            .flat_map(|r| r.neighbors.iter().map(|n| n.distance as f64))
            .sum::<f64>()
            / (count * config.synthesizer.k as f64),
        mean_item_squared_error: metrics.mean_item_squared_error,
        max_item_distance: metrics.max_item_distance,
        stats,
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
