use ndarray::{Array2, Ix2};
use sbi_simulators::{DType, RandomSource, Tensor};
use serde::{Deserialize, Serialize};

use crate::{
    dense::{Activation, Dense},
    error::NetworkError,
};

/// Shape hyperparameters of a [`ResNet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResNetConfig {
    /// Number of residual hidden layers.
    pub depth: usize,
    /// Width of every layer.
    pub width: usize,
    /// Activation of the hidden layers.
    pub activation: Activation,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self {
            depth: 6,
            width: 2,
            activation: Activation::Gelu,
        }
    }
}

/// Small residual network.
///
/// A linear projection to `width` features, `depth` residual hidden layers
/// (`x = x + h(x)`) and a residual linear output layer.
#[derive(Debug, Clone)]
pub struct ResNet {
    config: ResNetConfig,
    input_layer: Dense,
    hidden_layers: Vec<Dense>,
    output_layer: Dense,
}

impl ResNet {
    /// Builds a network for `input_dim` features with weights drawn from `rng`.
    #[must_use]
    pub fn new(input_dim: usize, config: ResNetConfig, rng: &RandomSource) -> Self {
        let mut rng = rng.lock();
        let input_layer = Dense::new(input_dim, config.width, Activation::Linear, &mut *rng);
        let hidden_layers = (0..config.depth)
            .map(|_| Dense::new(config.width, config.width, config.activation, &mut *rng))
            .collect();
        let output_layer = Dense::new(config.width, config.width, Activation::Linear, &mut *rng);
        Self {
            config,
            input_layer,
            hidden_layers,
            output_layer,
        }
    }

    /// Builds a network from explicit layers. Every layer after the first must map
    /// `width` features to `width` features.
    pub fn from_layers(
        input_layer: Dense,
        hidden_layers: Vec<Dense>,
        output_layer: Dense,
    ) -> Result<Self, NetworkError> {
        let width = input_layer.output_dim();
        for layer in hidden_layers.iter().chain(std::iter::once(&output_layer)) {
            if layer.input_dim() != width || layer.output_dim() != width {
                return Err(NetworkError::InputWidth {
                    expected: width,
                    actual: layer.input_dim().max(layer.output_dim()),
                });
            }
        }
        let activation = hidden_layers
            .first()
            .map_or(Activation::Gelu, Dense::activation);
        Ok(Self {
            config: ResNetConfig {
                depth: hidden_layers.len(),
                width,
                activation,
            },
            input_layer,
            hidden_layers,
            output_layer,
        })
    }

    /// Shape hyperparameters.
    #[must_use]
    pub const fn config(&self) -> &ResNetConfig {
        &self.config
    }

    /// Expected number of input features.
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_layer.input_dim()
    }

    /// Forward pass over a `(batch, input_dim)` matrix, returning `(batch, width)`.
    pub fn forward(&self, input: &Array2<f32>) -> Result<Array2<f32>, NetworkError> {
        let mut x = self.input_layer.forward(input)?;
        for layer in &self.hidden_layers {
            x = &x + &layer.forward(&x)?;
        }
        let out = self.output_layer.forward(&x)?;
        Ok(x + out)
    }

    /// Forward pass over a tensor with any number of leading batch dimensions. The last
    /// axis holds the features; the result is `float32` with the last axis replaced by
    /// `width`.
    pub fn forward_tensor(&self, input: &Tensor) -> Result<Tensor, NetworkError> {
        let shape = input.shape().to_vec();
        let Some((&features, leading)) = shape.split_last() else {
            return Err(NetworkError::InputWidth {
                expected: self.input_dim(),
                actual: 0,
            });
        };
        let rows: usize = leading.iter().product();
        let matrix = input
            .cast(DType::Float32)
            .reshape(&[rows, features])?
            .try_array::<f32>()?
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(sbi_simulators::TensorError::from)?;
        let output = self.forward(&matrix)?;

        let mut out_shape = leading.to_vec();
        out_shape.push(self.config.width);
        Ok(Tensor::from(output)
            .reshape(&out_shape)?
            .to_device(input.device()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array1, Array3};
    use sbi_simulators::Device;

    fn identity(width: usize, activation: Activation) -> Dense {
        Dense::from_parts(Array2::eye(width), Array1::zeros(width), activation).unwrap()
    }

    #[test]
    fn default_shape() {
        let net = ResNet::new(4, ResNetConfig::default(), &RandomSource::seeded(0));
        assert_eq!(net.config().depth, 6);
        assert_eq!(net.config().width, 2);
        let out = net.forward(&Array2::zeros((5, 4))).unwrap();
        assert_eq!(out.dim(), (5, 2));
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn residual_connections_accumulate() {
        let input_layer = Dense::from_parts(
            arr2(&[[1.0, 0.0], [0.0, 1.0]]),
            arr1(&[0.0, 0.0]),
            Activation::Linear,
        )
        .unwrap();
        let net = ResNet::from_layers(
            input_layer,
            vec![identity(2, Activation::Relu), identity(2, Activation::Relu)],
            identity(2, Activation::Linear),
        )
        .unwrap();
        let out = net.forward(&arr2(&[[1.0, -1.0]])).unwrap();
        assert_eq!(out, arr2(&[[8.0, -2.0]]));
    }

    #[test]
    fn rejects_wrong_input_width() {
        let net = ResNet::new(3, ResNetConfig::default(), &RandomSource::seeded(1));
        let err = net.forward(&Array2::zeros((1, 2))).unwrap_err();
        assert!(matches!(err, NetworkError::InputWidth { expected: 3, actual: 2 }));
    }

    #[test]
    fn forward_tensor_keeps_leading_dims() {
        let config = ResNetConfig {
            depth: 2,
            width: 3,
            activation: Activation::Tanh,
        };
        let net = ResNet::new(1, config, &RandomSource::seeded(2));
        let input = Tensor::from(Array3::<f64>::ones((4, 10, 1))).to_device(Device::Cuda(0));
        let out = net.forward_tensor(&input).unwrap();
        assert_eq!(out.shape(), &[4, 10, 3]);
        assert_eq!(out.dtype(), DType::Float32);
        assert_eq!(out.device(), Device::Cuda(0));
    }

    #[test]
    fn seeded_networks_match() {
        let a = ResNet::new(2, ResNetConfig::default(), &RandomSource::seeded(7));
        let b = ResNet::new(2, ResNetConfig::default(), &RandomSource::seeded(7));
        let x = arr2(&[[0.3, -0.7]]);
        assert_eq!(a.forward(&x).unwrap(), b.forward(&x).unwrap());
    }
}
