use std::env;

use anyhow::Context;
use gdpso::{
    arch::{CrossEntropy, Gat, GraphData, Model, ParamHost},
    config::{GatConfig, RefinerConfig, SwarmConfig, TrainingConfig},
    refiner::GradientRefiner,
    swarm::Gdpso,
};
use log::info;
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};

const NODES: usize = 40;
const DEFAULT_SEED: u64 = 7;

fn default_config() -> TrainingConfig {
    TrainingConfig {
        swarm: SwarmConfig {
            num_particles: 10,
            max_param_value: 1.,
            min_param_value: -1.,
            seed: Some(DEFAULT_SEED),
            ..Default::default()
        },
        refiner: RefinerConfig::default(),
        gat: GatConfig {
            nfeat: 8,
            nhid: 4,
            nclass: 2,
            dropout: 0.6,
            nheads: 4,
            alpha: 0.2,
        },
        iterations: 10,
    }
}

/// Builds a graph of `nclass` communities, dense inside and sparse across, whose features are
/// a noisy encoding of the node's community. Every other node is used for training.
fn synthetic_graph(gat: &GatConfig, rng: &mut StdRng) -> gdpso::Result<GraphData> {
    let labels: Vec<usize> = (0..NODES).map(|i| i % gat.nclass).collect();

    let features = Array2::from_shape_fn((NODES, gat.nfeat), |(i, j)| {
        let signal = if j % gat.nclass == labels[i] { 1. } else { 0. };
        signal + rng.random_range(-0.3..0.3)
    });

    let mut adjacency = Array2::<f32>::eye(NODES);
    for i in 0..NODES {
        for j in i + 1..NODES {
            let p = if labels[i] == labels[j] { 0.3 } else { 0.02 };
            if rng.random_bool(p) {
                adjacency[[i, j]] = 1.;
                adjacency[[j, i]] = 1.;
            }
        }
    }

    let train_idx = (0..NODES).step_by(2).collect();
    GraphData::new(features, adjacency, train_idx, labels)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => TrainingConfig::from_path(&path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => default_config(),
    };

    let seed = config.swarm.seed;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let graph = synthetic_graph(&config.gat, &mut rng)?;
    let test_idx: Vec<usize> = (1..NODES).step_by(2).collect();

    let mut live = Gat::seeded(config.gat, seed)?;
    live.set_training(false);

    let refiner = GradientRefiner::new(config.gat, graph.clone(), config.refiner, seed)?;
    let mut swarm = Gdpso::new(live.params(), config.swarm, refiner)?;

    let loss_fn = CrossEntropy::new();
    let mut objective = |gat: &mut Gat| -> gdpso::Result<f32> {
        let log_probs = gat.forward(graph.features(), graph.adjacency())?;
        loss_fn.loss(log_probs.view(), graph.labels(), graph.train_idx())
    };

    info!(
        particles = config.swarm.num_particles,
        iterations = config.iterations;
        "training"
    );

    for _ in 0..config.iterations {
        let loss = swarm.step(&mut live, &mut objective)?;
        info!(iteration = swarm.iteration(), loss = loss; "global best evaluated");
    }

    let log_probs = live.forward(graph.features(), graph.adjacency())?;
    let train_accuracy = loss_fn.accuracy(log_probs.view(), graph.labels(), graph.train_idx())?;
    let test_accuracy = loss_fn.accuracy(log_probs.view(), graph.labels(), &test_idx)?;

    info!(
        best_loss = swarm.global_best_loss(),
        train_accuracy = train_accuracy,
        test_accuracy = test_accuracy;
        "finished"
    );

    Ok(())
}
