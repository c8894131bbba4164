pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use algorithms::{EmbeddingModel, GraphFactorizationModel, IncrementalSynthesizer};
pub use config::Config;
pub use error::{Result, SynthesisError};
pub use models::*;

pub fn init_tracing() {
    // Ignore the error when a subscriber is already installed (tests, embedding apps).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
