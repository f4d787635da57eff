#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Benchmark tasks for simulation-based inference: priors, simulators, configurators
//! and task metadata.

/// Task registry and metadata.
#[path = "../benchmark.rs"]
pub mod benchmark;

/// Bernoulli GLM task with raw observations.
#[path = "../bernoulli_glm_raw.rs"]
pub mod bernoulli_glm_raw;

/// Benchmark errors.
#[path = "../error.rs"]
pub mod error;

pub use benchmark::{Benchmark, BenchmarkInfo};
pub use error::BenchmarkError;
