use sbi_simulators::SimulationError;
use thiserror::Error;

/// Errors raised by benchmark tasks.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    /// The configurator does not implement the requested mode.
    #[error("configurator mode `{mode}` is not supported, only `posterior` is available")]
    UnsupportedMode {
        /// Requested mode.
        mode: String,
    },

    /// A field the configurator needs is absent from the simulation output.
    #[error("simulation output is missing field `{field}`")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// A parameter vector has the wrong length.
    #[error("expected {expected} parameters, got {actual}")]
    InvalidParameters {
        /// Required length.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// No benchmark is registered under this name.
    #[error("unknown benchmark task `{name}`")]
    UnknownTask {
        /// Requested name.
        name: String,
    },

    /// The requested batch shape holds no draws.
    #[error("batch shape {batch_shape} describes no draws")]
    EmptyBatch {
        /// Requested batch shape.
        batch_shape: String,
    },

    /// Sampling the task pipeline failed.
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}
