use sbi_simulators::TensorError;
use thiserror::Error;

/// Errors raised while building or running networks.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Activation name not recognized.
    #[error("unknown activation `{name}`, expected one of gelu, gelu_tanh, relu, tanh, linear")]
    UnknownActivation {
        /// Name as given.
        name: String,
    },

    /// Input feature count does not match the first layer.
    #[error("layer expects {expected} input features, got {actual}")]
    InputWidth {
        /// Features the layer was built for.
        expected: usize,
        /// Features received.
        actual: usize,
    },

    /// Weight and bias shapes disagree.
    #[error("bias has {bias} entries but weights produce {outputs} outputs")]
    BiasShape {
        /// Output width of the weight matrix.
        outputs: usize,
        /// Bias length.
        bias: usize,
    },

    /// The input tensor could not be viewed as a feature matrix.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}
