use burn::prelude::*;
use burn::tensor::activation::silu;
use serde::{Deserialize, Serialize};

/// Output scale of [`Activation::ScaledSilu`]; brings the variance of SiLU
/// on unit-normal input back to roughly one.
pub const SCALED_SILU_FACTOR: f64 = 1.0 / 0.6;

/// Activation applied after a dense layer.
///
/// Deserializes from lowercase snake-case names, e.g. `"scaled_silu"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// No activation.
    #[default]
    Identity,
    /// `x * sigmoid(x)`.
    Silu,
    /// `silu(x) / 0.6`.
    ScaledSilu,
    /// `x * silu(x)`.
    Siqu,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Identity => x,
            Self::Silu => silu(x),
            Self::ScaledSilu => silu(x).mul_scalar(SCALED_SILU_FACTOR),
            Self::Siqu => x.clone() * silu(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn values(t: Tensor<TestBackend, 1>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_identity_is_noop() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_data(TensorData::from([-2.0_f32, 0.0, 3.5]), &device);
        assert_eq!(values(Activation::Identity.apply(x)), vec![-2.0, 0.0, 3.5]);
    }

    #[test]
    fn test_scaled_silu_matches_formula() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_data(TensorData::from([-1.0_f32, 0.0, 2.0]), &device);
        let out = values(Activation::ScaledSilu.apply(x));

        for (got, input) in out.iter().zip([-1.0_f32, 0.0, 2.0]) {
            let expected = input / (1.0 + (-input).exp()) / 0.6;
            assert!(
                (got - expected).abs() < 1e-5,
                "scaled_silu({input}) = {got}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_siqu_is_x_times_silu() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_data(TensorData::from([1.5_f32]), &device);
        let got = values(Activation::Siqu.apply(x))[0];
        let expected = 1.5 * (1.5 / (1.0 + (-1.5_f32).exp()));
        assert!((got - expected).abs() < 1e-5);
    }

    #[test]
    fn test_deserialize_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            activation: Activation,
        }

        let w: Wrapper = toml::from_str(r#"activation = "scaled_silu""#).unwrap();
        assert_eq!(w.activation, Activation::ScaledSilu);
        let w: Wrapper = toml::from_str(r#"activation = "identity""#).unwrap();
        assert_eq!(w.activation, Activation::Identity);
    }
}
