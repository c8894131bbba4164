use crate::models::EmbeddingTable;
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

pub fn xavier_uniform<R: Rng>(size: usize, rng: &mut R) -> Vec<f32> {
    let limit = (6.0 / size.max(1) as f32).sqrt();
    (0..size).map(|_| rng.gen_range(-limit..limit)).collect()
}

pub fn xavier_normal<R: Rng>(size: usize, rng: &mut R) -> Vec<f32> {
    let std_dev = (2.0 / size.max(1) as f32).sqrt();
    normal(size, 0.0, std_dev, rng)
}

pub fn uniform<R: Rng>(size: usize, low: f32, high: f32, rng: &mut R) -> Vec<f32> {
    (0..size).map(|_| rng.gen_range(low..high)).collect()
}

pub fn normal<R: Rng>(size: usize, mean: f32, std_dev: f32, rng: &mut R) -> Vec<f32> {
    (0..size)
        .map(|_| {
            // Box-Muller; 1 - u keeps the log argument in (0, 1].
            let u1: f32 = 1.0 - rng.gen::<f32>();
            let u2: f32 = rng.gen();
            let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
            z0 * std_dev + mean
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum InitializationMethod {
    XavierUniform,
    XavierNormal,
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    Zeros,
}

impl InitializationMethod {
    pub fn initialize<R: Rng>(&self, size: usize, rng: &mut R) -> Vec<f32> {
        match self {
            InitializationMethod::XavierUniform => xavier_uniform(size, rng),
            InitializationMethod::XavierNormal => xavier_normal(size, rng),
            InitializationMethod::Uniform { low, high } => uniform(size, *low, *high, rng),
            InitializationMethod::Normal { mean, std_dev } => normal(size, *mean, *std_dev, rng),
            InitializationMethod::Zeros => vec![0.0; size],
        }
    }

    pub fn initialize_table<R: Rng>(&self, rows: usize, dim: usize, rng: &mut R) -> EmbeddingTable {
        let values = (0..rows).flat_map(|_| self.initialize(dim, rng)).collect::<Vec<_>>();
        // rows * dim values were generated above, so the shape always fits.
        let weights = Array2::from_shape_vec((rows, dim), values)
            .unwrap_or_else(|_| Array2::zeros((rows, dim)));
        EmbeddingTable::from_array(weights)
    }
}
