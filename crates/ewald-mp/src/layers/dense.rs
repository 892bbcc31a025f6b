use burn::module::{Ignored, Param};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use crate::layers::activation::Activation;

/// Configuration for a [`Dense`] layer.
#[derive(Config, Debug)]
pub struct DenseConfig {
    /// Input dimension.
    pub d_input: usize,
    /// Output dimension.
    pub d_output: usize,
    /// Whether to include a bias term.
    #[config(default = false)]
    pub bias: bool,
    /// Activation applied after the affine map.
    #[config(default = "Activation::Identity")]
    pub activation: Activation,
}

/// Affine map followed by an optional activation.
///
/// Maps `(*, d_input)` to `(*, d_output)`. Bias-free by default, which is
/// what every projection in the message-passing blocks uses.
#[derive(Module, Debug)]
pub struct Dense<B: Backend> {
    linear: Linear<B>,
    activation: Ignored<Activation>,
}

impl DenseConfig {
    /// Initialize a Dense layer.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Dense<B> {
        Dense {
            linear: LinearConfig::new(self.d_input, self.d_output)
                .with_bias(self.bias)
                .init(device),
            activation: Ignored(self.activation),
        }
    }
}

impl<B: Backend> Dense<B> {
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        self.activation.apply(self.linear.forward(input))
    }

    /// Weight matrix, shape `(d_input, d_output)`.
    ///
    /// The returned tensor stays on the autodiff graph, so products of weight
    /// matrices built from it are trained like any other forward output.
    pub fn weight(&self) -> Tensor<B, 2> {
        self.linear.weight.val()
    }

    /// Weight parameter, for gradient lookups.
    pub fn weight_param(&self) -> &Param<Tensor<B, 2>> {
        &self.linear.weight
    }

    pub fn activation(&self) -> Activation {
        *self.activation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_output_shape_rank_2_and_3() {
        let device = Default::default();
        let layer = DenseConfig::new(6, 4).init::<TestBackend>(&device);

        let x2 = Tensor::<TestBackend, 2>::random([5, 6], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(layer.forward(x2).dims(), [5, 4]);

        let x3 = Tensor::<TestBackend, 3>::random([2, 3, 6], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(layer.forward(x3).dims(), [2, 3, 4]);
    }

    #[test]
    fn test_bias_free_maps_zero_to_zero() {
        let device = Default::default();
        let layer = DenseConfig::new(8, 8)
            .with_activation(Activation::ScaledSilu)
            .init::<TestBackend>(&device);

        let out = layer.forward(Tensor::<TestBackend, 2>::zeros([3, 8], &device));
        let max_val: f32 = out.abs().max().into_scalar().elem();
        assert!(max_val < 1e-7, "bias-free dense should map 0 to 0, got {max_val}");
    }

    #[test]
    fn test_weight_matches_forward() {
        let device = Default::default();
        let layer = DenseConfig::new(3, 2).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::random([4, 3], Distribution::Normal(0.0, 1.0), &device);

        let via_forward = layer.forward(x.clone());
        let via_weight = x.matmul(layer.weight());
        let diff: f32 = (via_forward - via_weight).abs().max().into_scalar().elem();
        assert!(diff < 1e-6, "x @ W should equal forward(x) without bias, diff={diff}");
    }

    #[test]
    fn test_bias_adds_parameters() {
        let device = Default::default();
        let without = DenseConfig::new(4, 3).init::<TestBackend>(&device);
        let with = DenseConfig::new(4, 3).with_bias(true).init::<TestBackend>(&device);
        assert_eq!(without.num_params(), 12);
        assert_eq!(with.num_params(), 15);
    }
}
