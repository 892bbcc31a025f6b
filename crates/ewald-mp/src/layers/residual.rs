use burn::prelude::*;

use crate::layers::activation::Activation;
use crate::layers::dense::{Dense, DenseConfig};

/// Configuration for a [`ResidualLayer`].
#[derive(Config, Debug)]
pub struct ResidualLayerConfig {
    /// Width of the layer (input and output dimension).
    pub units: usize,
    /// Number of bias-free dense layers inside the skip connection.
    #[config(default = 2)]
    pub n_layers: usize,
    #[config(default = "Activation::Identity")]
    pub activation: Activation,
}

/// Residual block: `(x + dense_n(...dense_1(x))) / sqrt(2)`.
///
/// The `1/sqrt(2)` keeps the variance of the sum of two roughly independent
/// unit-variance branches at one.
#[derive(Module, Debug)]
pub struct ResidualLayer<B: Backend> {
    dense_mlp: Vec<Dense<B>>,
}

impl ResidualLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualLayer<B> {
        let dense_mlp = (0..self.n_layers)
            .map(|_| {
                DenseConfig::new(self.units, self.units)
                    .with_activation(self.activation)
                    .init(device)
            })
            .collect();
        ResidualLayer { dense_mlp }
    }
}

impl<B: Backend> ResidualLayer<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self
            .dense_mlp
            .iter()
            .fold(input.clone(), |x, layer| layer.forward(x));
        (input + x).mul_scalar(std::f64::consts::FRAC_1_SQRT_2)
    }
}
