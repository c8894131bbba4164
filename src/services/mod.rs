pub mod cold_start;

pub use cold_start::{ColdStartService, ColdStartStats};
