use burn::prelude::*;

use crate::layers::activation::Activation;
use crate::layers::dense::{Dense, DenseConfig};
use crate::layers::residual::{ResidualLayer, ResidualLayerConfig};

/// Configuration for the [`UpdateNetwork`] applied at the end of each block.
#[derive(Config, Debug)]
pub struct UpdateNetworkConfig {
    pub d_input: usize,
    pub units: usize,
    /// Number of residual layers after the input dense layer.
    pub num_hidden: usize,
    #[config(default = "Activation::Identity")]
    pub activation: Activation,
}

/// One bias-free dense layer followed by `num_hidden` residual layers.
#[derive(Module, Debug)]
pub struct UpdateNetwork<B: Backend> {
    dense: Dense<B>,
    residuals: Vec<ResidualLayer<B>>,
}

impl UpdateNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UpdateNetwork<B> {
        UpdateNetwork {
            dense: DenseConfig::new(self.d_input, self.units)
                .with_activation(self.activation)
                .init(device),
            residuals: (0..self.num_hidden)
                .map(|_| {
                    ResidualLayerConfig::new(self.units)
                        .with_activation(self.activation)
                        .init(device)
                })
                .collect(),
        }
    }
}

impl<B: Backend> UpdateNetwork<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.dense.forward(x);
        self.residuals.iter().fold(x, |x, layer| layer.forward(x))
    }

    pub fn num_hidden(&self) -> usize {
        self.residuals.len()
    }
}
