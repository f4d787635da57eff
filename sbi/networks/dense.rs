use std::{fmt, fs, path::Path, str::FromStr};

use anyhow::Context;
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;

use crate::error::NetworkError;

/// Element-wise nonlinearity applied after the affine map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Gaussian error linear unit, exact `x * Φ(x)` form.
    #[default]
    Gelu,
    /// Gaussian error linear unit, tanh approximation.
    GeluTanh,
    /// Rectified linear unit.
    Relu,
    /// Hyperbolic tangent.
    Tanh,
    /// Identity.
    Linear,
}

impl Activation {
    /// Name accepted by [`Activation::from_str`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gelu => "gelu",
            Self::GeluTanh => "gelu_tanh",
            Self::Relu => "relu",
            Self::Tanh => "tanh",
            Self::Linear => "linear",
        }
    }

    /// Applies the activation to one value.
    #[must_use]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Gelu => {
                #[allow(clippy::cast_possible_truncation)]
                let cdf = (0.5 * (1.0 + erf(f64::from(x) / std::f64::consts::SQRT_2))) as f32;
                x * cdf
            }
            Self::GeluTanh => {
                let inner = (2.0 / std::f32::consts::PI).sqrt() * 0.044_715_f32.mul_add(x.powi(3), x);
                0.5 * x * (1.0 + inner.tanh())
            }
            Self::Relu => x.max(0.0),
            Self::Tanh => x.tanh(),
            Self::Linear => x,
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gelu" => Ok(Self::Gelu),
            "gelu_tanh" => Ok(Self::GeluTanh),
            "relu" => Ok(Self::Relu),
            "tanh" => Ok(Self::Tanh),
            "linear" | "identity" => Ok(Self::Linear),
            _ => Err(NetworkError::UnknownActivation {
                name: s.to_string(),
            }),
        }
    }
}

/// Fully connected layer: `activation(x · W + b)`.
#[derive(Debug, Clone)]
pub struct Dense {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl Dense {
    /// Creates a layer with Glorot-uniform weights and zero bias.
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        output_dim: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let limit = (6.0 / (input_dim + output_dim).max(1) as f32).sqrt();
        let weights =
            Array2::from_shape_fn((input_dim, output_dim), |_| rng.gen_range(-limit..=limit));
        Self {
            weights,
            bias: Array1::zeros(output_dim),
            activation,
        }
    }

    /// Builds a layer from explicit parameters.
    pub fn from_parts(
        weights: Array2<f32>,
        bias: Array1<f32>,
        activation: Activation,
    ) -> Result<Self, NetworkError> {
        if weights.ncols() != bias.len() {
            return Err(NetworkError::BiasShape {
                outputs: weights.ncols(),
                bias: bias.len(),
            });
        }
        Ok(Self {
            weights,
            bias,
            activation,
        })
    }

    /// Loads a layer from a JSON weights file.
    pub fn from_weights_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct DenseWeights {
            input_dim: usize,
            output_dim: usize,
            weights: Vec<f32>,
            #[serde(default)]
            bias: Option<Vec<f32>>,
            #[serde(default)]
            activation: Activation,
        }

        let contents =
            fs::read_to_string(&path).with_context(|| format!("reading {:?}", path.as_ref()))?;
        let dense: DenseWeights =
            serde_json::from_str(&contents).context("parsing dense weights file")?;
        if dense.weights.len() != dense.input_dim * dense.output_dim {
            anyhow::bail!("dense weight length mismatch");
        }
        let weights = Array2::from_shape_vec((dense.input_dim, dense.output_dim), dense.weights)
            .context("building weight matrix")?;
        let bias = dense
            .bias
            .map_or_else(|| Array1::zeros(dense.output_dim), Array1::from);
        Ok(Self::from_parts(weights, bias, dense.activation)?)
    }

    /// Number of input features.
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.weights.nrows()
    }

    /// Number of output features.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.weights.ncols()
    }

    /// Activation function.
    #[must_use]
    pub const fn activation(&self) -> Activation {
        self.activation
    }

    /// Executes a forward pass over a `(batch, input_dim)` matrix.
    pub fn forward(&self, input: &Array2<f32>) -> Result<Array2<f32>, NetworkError> {
        if input.ncols() != self.input_dim() {
            return Err(NetworkError::InputWidth {
                expected: self.input_dim(),
                actual: input.ncols(),
            });
        }
        let activation = self.activation;
        Ok((input.dot(&self.weights) + &self.bias).mapv_into(|x| activation.apply(x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use sbi_simulators::helper::seeded_rng;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn activations_parse_and_apply() {
        assert_eq!("GELU".parse::<Activation>().unwrap(), Activation::Gelu);
        assert!(matches!(
            "swish".parse::<Activation>().unwrap_err(),
            NetworkError::UnknownActivation { ref name } if name == "swish"
        ));
        assert_eq!(Activation::Relu.apply(-2.0), 0.0);
        assert_eq!(Activation::Linear.apply(-2.0), -2.0);
        assert!(Activation::Gelu.apply(0.0).abs() < 1e-7);
        assert!((Activation::Gelu.apply(1.0) - 0.841_345).abs() < 1e-5);
        assert!((Activation::Gelu.apply(-1.0) + 0.158_655).abs() < 1e-5);
        assert_eq!("gelu_tanh".parse::<Activation>().unwrap(), Activation::GeluTanh);
        assert!((Activation::GeluTanh.apply(1.0) - 0.841_192).abs() < 1e-5);
    }

    #[test]
    fn forward_applies_affine_map() {
        let layer = Dense::from_parts(
            arr2(&[[1.0, 0.0], [0.0, 2.0]]),
            arr1(&[0.5, -10.0]),
            Activation::Relu,
        )
        .unwrap();
        let out = layer.forward(&arr2(&[[1.0, 3.0]])).unwrap();
        assert_eq!(out, arr2(&[[1.5, 0.0]]));
    }

    #[test]
    fn forward_checks_input_width() {
        let layer = Dense::new(3, 2, Activation::Tanh, &mut seeded_rng(0));
        let err = layer.forward(&Array2::zeros((4, 2))).unwrap_err();
        assert!(matches!(err, NetworkError::InputWidth { expected: 3, actual: 2 }));
    }

    #[test]
    fn loads_weights_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"input_dim": 2, "output_dim": 1, "weights": [1.0, 2.0], "activation": "linear"}}"#
        )
        .unwrap();
        let layer = Dense::from_weights_file(file.path()).unwrap();
        assert_eq!(layer.input_dim(), 2);
        let out = layer.forward(&arr2(&[[1.0, 1.0]])).unwrap();
        assert_eq!(out, arr2(&[[3.0]]));
    }

    #[test]
    fn rejects_mismatched_bias() {
        let err = Dense::from_parts(Array2::zeros((2, 3)), Array1::zeros(2), Activation::Linear)
            .unwrap_err();
        assert!(matches!(err, NetworkError::BiasShape { outputs: 3, bias: 2 }));
    }
}
