#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Composable simulators: turns batched or unbatched sampling functions into a uniform
//! batched data-generation protocol, with dependency chaining between stages.

/// Dynamically typed n-d arrays with dtype and device tags.
#[path = "../tensor.rs"]
pub mod tensor;

/// Batch shape normalization.
#[path = "../shape.rs"]
pub mod shape;

/// Sample records and the shared merge/filter/stack utilities.
#[path = "../record.rs"]
pub mod record;

/// Output dtype casting rules.
#[path = "../dtype.rs"]
pub mod dtype;

/// Sampling function wrappers and auto-vectorization.
#[path = "../sampling.rs"]
pub mod sampling;

/// The simulator capability contract.
#[path = "../simulator.rs"]
pub mod simulator;

/// Simulator wrapping a single sampling function.
#[path = "../lambda.rs"]
pub mod lambda;

/// Causal chain of sampling stages.
#[path = "../sequential.rs"]
pub mod sequential;

/// Sequential composition of full simulators.
#[path = "../composite.rs"]
pub mod composite;

/// Random sources shared by simulators.
#[path = "../helper.rs"]
pub mod helper;

/// Telemetry for simulators.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Error taxonomy.
#[path = "../error.rs"]
pub mod error;

pub use composite::CompositeSimulator;
pub use dtype::CastDtypeRules;
pub use error::SimulationError;
pub use helper::RandomSource;
pub use lambda::{LambdaSimulator, LambdaSimulatorBuilder};
pub use record::SampleRecord;
pub use sampling::{batched_call, Batching, ContextMode, Parameters, SampleArgs, SamplingFunction};
pub use sequential::{SequentialSimulator, Stage};
pub use shape::{BatchShape, ShapeLike};
pub use simulator::Simulator;
pub use telemetry::{SimulationTelemetry, SimulationTelemetryBuilder};
pub use tensor::{DType, Device, Element, Tensor, TensorData, TensorError};
