use thiserror::Error;

use crate::tensor::{Device, TensorError};

/// Errors surfaced by `Simulator::sample` and the utilities behind it.
///
/// Nothing is retried. Field-name collisions during composition are not errors: merges
/// are last-writer-wins.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The batch shape could not be normalized.
    #[error("invalid batch shape `{input}`: {reason}")]
    InvalidShape {
        /// Input as given by the caller.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Per-element records from auto-vectorization disagree on field names.
    #[error("sample {index} has fields {actual:?}, expected {expected:?}")]
    SchemaMismatch {
        /// Flat index of the offending element.
        index: usize,
        /// Field names of the first element.
        expected: Vec<String>,
        /// Field names of the offending element.
        actual: Vec<String>,
    },

    /// A sampler mixed host tensors with backend tensors placed on another device.
    #[error(
        "sampler `{stage}` mixed tensors on {left} and {right}. Arguments passed to samplers \
         live on the simulator's device; do not mix host-array arithmetic with backend \
         tensors inside a sampler, operate on the arguments or use scalar operations instead"
    )]
    DeviceMismatch {
        /// Stage that failed.
        stage: String,
        /// Device of the left operand.
        left: Device,
        /// Device of the right operand.
        right: Device,
        /// Original sampler error.
        #[source]
        source: anyhow::Error,
    },

    /// A dtype name in a cast rule is unknown.
    #[error("unknown dtype `{name}`")]
    UnknownDType {
        /// The unrecognized name.
        name: String,
    },

    /// A sampler asked for a keyword argument that was not provided.
    #[error("missing keyword argument `{name}`")]
    MissingArgument {
        /// Argument name.
        name: String,
    },

    /// A field could not be stacked, sliced or reshaped.
    #[error("field `{field}`: {source}")]
    Field {
        /// Field name.
        field: String,
        /// Underlying tensor error.
        #[source]
        source: TensorError,
    },

    /// Tensor operation failure outside of a specific field.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// A sampling function or nested simulator failed.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        /// Stage name.
        stage: String,
        /// Error returned by the stage.
        #[source]
        source: anyhow::Error,
    },
}

impl SimulationError {
    pub(crate) fn invalid_shape(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn field(field: impl Into<String>, source: TensorError) -> Self {
        Self::Field {
            field: field.into(),
            source,
        }
    }

    pub(crate) fn stage(stage: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Stage {
            stage: stage.into(),
            source,
        }
    }

    /// Finds a cross-device tensor error anywhere in the source chain of `error`.
    #[must_use]
    pub fn find_device_mismatch(error: &anyhow::Error) -> Option<(Device, Device)> {
        error.chain().find_map(|cause| {
            let tensor_error = cause.downcast_ref::<TensorError>().or_else(|| {
                cause
                    .downcast_ref::<Self>()
                    .and_then(|inner| match inner {
                        Self::Tensor(err) | Self::Field { source: err, .. } => Some(err),
                        _ => None,
                    })
            })?;
            match tensor_error {
                TensorError::DeviceMismatch { left, right } => Some((*left, *right)),
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn finds_device_mismatch_through_context() {
        let err: anyhow::Result<()> = Err(TensorError::DeviceMismatch {
            left: Device::Cuda(0),
            right: Device::Cpu,
        })
        .context("computing observables");
        let err = err.unwrap_err();
        assert_eq!(
            SimulationError::find_device_mismatch(&err),
            Some((Device::Cuda(0), Device::Cpu))
        );
    }

    #[test]
    fn finds_device_mismatch_wrapped_in_simulation_error() {
        let err = anyhow::Error::new(SimulationError::Tensor(TensorError::DeviceMismatch {
            left: Device::Cpu,
            right: Device::Cuda(1),
        }));
        assert_eq!(
            SimulationError::find_device_mismatch(&err),
            Some((Device::Cpu, Device::Cuda(1)))
        );
    }

    #[test]
    fn ignores_unrelated_errors() {
        let err = anyhow::anyhow!("device busy");
        assert!(SimulationError::find_device_mismatch(&err).is_none());
        let err = anyhow::Error::new(TensorError::EmptyStack);
        assert!(SimulationError::find_device_mismatch(&err).is_none());
    }
}
