use burn::prelude::*;

/// Sum rows of `values` into `dim_size` output slots along dimension 0.
///
/// Row `i` of `values` is added to output row `index[i]`. Output rows that no
/// index points at stay zero. Out-of-range indices panic in the backend.
///
/// Shapes: `values` is `(n, ...)`, `index` is `(n,)`, output is
/// `(dim_size, ...)`.
pub fn scatter_sum<B: Backend, const D: usize>(
    values: Tensor<B, D>,
    index: Tensor<B, 1, Int>,
    dim_size: usize,
) -> Tensor<B, D> {
    let mut dims = values.dims();
    dims[0] = dim_size;
    Tensor::zeros(dims, &values.device()).select_assign(0, index, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_sums_and_zero_fills() {
        let device = Default::default();
        let values = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0]]),
            &device,
        );
        let index = Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([2_i64, 0, 2]), &device);

        let out = scatter_sum(values, index, 4);
        assert_eq!(out.dims(), [4, 2]);
        let flat: Vec<f32> = out.into_data().to_vec().unwrap();
        assert_eq!(flat, vec![3.0, 4.0, 0.0, 0.0, 6.0, 8.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rank_3() {
        let device = Default::default();
        let values = Tensor::<TestBackend, 3>::ones([5, 2, 3], &device);
        let index = Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0_i64, 1, 1, 1, 0]), &device);

        let out = scatter_sum(values, index, 2);
        assert_eq!(out.dims(), [2, 2, 3]);
        let flat: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!(flat[..6].iter().all(|&v| v == 2.0));
        assert!(flat[6..].iter().all(|&v| v == 3.0));
    }
}
