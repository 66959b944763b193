//! Batch evaluation runtime.

pub mod executor;

pub use executor::{linear_path, BatchEvaluator, RuntimeConfig};
