use burn::prelude::*;

use crate::blocks::scatter::scatter_sum;
use crate::blocks::update::{UpdateNetwork, UpdateNetworkConfig};
use crate::layers::activation::Activation;
use crate::layers::dense::{Dense, DenseConfig};
use crate::layers::residual::{ResidualLayer, ResidualLayerConfig};
use crate::layers::scale_factor::{ScaleFactor, ScaleSpec, ScaleTable};

/// Configuration for a [`HadamardBlock`].
#[derive(Config, Debug)]
pub struct HadamardBlockConfig {
    /// Embedding size of the atoms.
    pub emb_size_atom: usize,
    /// Number of radial basis features per edge.
    pub emb_size_bf: usize,
    /// Number of residual layers in the update network.
    pub num_hidden: usize,
    #[config(default = "Activation::Identity")]
    pub activation: Activation,
    /// Rescaling of the aggregated message; looked up as `{name}_sum`.
    #[config(default = "ScaleSpec::Named { name: String::from(\"hadamard_atom_update\") }")]
    pub scale: ScaleSpec,
}

/// Short-range block: aggregates atom-to-atom messages formed by the
/// component-wise product of source-atom features and projected edge radial
/// basis features.
#[derive(Module, Debug)]
pub struct HadamardBlock<B: Backend> {
    /// emb_size_bf → emb_size_atom, no bias.
    dense_bf: Dense<B>,
    scale_sum: Option<ScaleFactor>,
    pre_residual: ResidualLayer<B>,
    layers: UpdateNetwork<B>,
}

impl HadamardBlockConfig {
    pub fn init<B: Backend>(&self, scales: &ScaleTable, device: &B::Device) -> HadamardBlock<B> {
        tracing::debug!(
            emb_size_atom = self.emb_size_atom,
            emb_size_bf = self.emb_size_bf,
            num_hidden = self.num_hidden,
            "Initializing Hadamard block"
        );

        HadamardBlock {
            dense_bf: DenseConfig::new(self.emb_size_bf, self.emb_size_atom).init(device),
            scale_sum: self.scale.init(scales, "_sum"),
            pre_residual: ResidualLayerConfig::new(self.emb_size_atom)
                .with_activation(self.activation)
                .init(device),
            layers: UpdateNetworkConfig::new(self.emb_size_atom, self.emb_size_atom, self.num_hidden)
                .with_activation(self.activation)
                .init(device),
        }
    }
}

impl<B: Backend> HadamardBlock<B> {
    pub fn scale_factor(&self) -> Option<&ScaleFactor> {
        self.scale_sum.as_ref()
    }

    /// Sum of edge messages per target atom, before rescaling and update.
    ///
    /// Atoms without incoming edges get a zero row.
    ///
    /// - `h`: `(num_atoms, emb_size_atom)`
    /// - `bf`: `(num_edges, emb_size_bf)`
    /// - `idx_s`, `idx_t`: source and target atom of each edge, `(num_edges,)`
    pub fn aggregate(
        &self,
        h: Tensor<B, 2>,
        bf: Tensor<B, 2>,
        idx_s: Tensor<B, 1, Int>,
        idx_t: Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        let [num_atoms, emb] = h.dims();
        if idx_t.dims()[0] == 0 {
            return Tensor::zeros([num_atoms, emb], &h.device());
        }
        let h_res = self.pre_residual.forward(h);
        let mlp_bf = self.dense_bf.forward(bf);
        let messages = h_res.select(0, idx_s) * mlp_bf; // (num_edges, emb_size_atom)
        scatter_sum(messages, idx_t, num_atoms)
    }

    /// Forward pass. Returns the atom embedding update, `(num_atoms, emb_size_atom)`.
    pub fn forward(
        &self,
        h: Tensor<B, 2>,
        bf: Tensor<B, 2>,
        idx_s: Tensor<B, 1, Int>,
        idx_t: Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        let x = self.aggregate(h.clone(), bf, idx_s, idx_t);
        let x = match &self.scale_sum {
            Some(scale) => scale.forward(x, h),
            None => x,
        };
        self.layers.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    const EMB: usize = 8;
    const BF: usize = 5;

    fn block(device: &<TestBackend as Backend>::Device) -> HadamardBlock<TestBackend> {
        HadamardBlockConfig::new(EMB, BF, 2)
            .with_activation(Activation::ScaledSilu)
            .init(&ScaleTable::new(), device)
    }

    fn index(values: Vec<i64>, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 1, Int> {
        let n = values.len();
        Tensor::from_data(TensorData::new(values, [n]), device)
    }

    #[test]
    fn test_default_scale_is_named() {
        let device = Default::default();
        let mut table = ScaleTable::new();
        table.insert("hadamard_atom_update_sum", 0.5);
        let block = HadamardBlockConfig::new(EMB, BF, 1).init::<TestBackend>(&table, &device);

        let scale = block.scale_factor().expect("default config should be scaled");
        assert_eq!(scale.name(), "hadamard_atom_update_sum");
        assert!((scale.scale() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let block = block(&device);
        let h = Tensor::<TestBackend, 2>::random([4, EMB], Distribution::Normal(0.0, 1.0), &device);
        let bf = Tensor::<TestBackend, 2>::random([6, BF], Distribution::Normal(0.0, 1.0), &device);
        let idx_s = index(vec![0, 1, 2, 3, 0, 2], &device);
        let idx_t = index(vec![1, 0, 3, 2, 2, 0], &device);

        assert_eq!(block.forward(h, bf, idx_s, idx_t).dims(), [4, EMB]);
    }

    #[test]
    fn test_atom_without_incoming_edges_aggregates_zero() {
        let device = Default::default();
        let block = block(&device);
        let h = Tensor::<TestBackend, 2>::random([4, EMB], Distribution::Normal(0.0, 1.0), &device);
        let bf = Tensor::<TestBackend, 2>::random([3, BF], Distribution::Normal(0.0, 1.0), &device);
        // Atom 3 only sends.
        let idx_s = index(vec![3, 3, 0], &device);
        let idx_t = index(vec![0, 1, 2], &device);

        let agg = block.aggregate(h, bf, idx_s, idx_t);
        let row: Vec<f32> = agg.clone().slice([3..4, 0..EMB]).into_data().to_vec().unwrap();
        assert!(row.iter().all(|&v| v == 0.0), "atom 3 row should be zero, got {row:?}");

        let received: f32 = agg.slice([0..3, 0..EMB]).abs().sum().into_scalar().elem();
        assert!(received > 0.0);
    }

    #[test]
    fn test_single_edge_message_is_hadamard_product() {
        let device = Default::default();
        let block = block(&device);
        let h = Tensor::<TestBackend, 2>::random([2, EMB], Distribution::Normal(0.0, 1.0), &device);
        let bf = Tensor::<TestBackend, 2>::random([1, BF], Distribution::Normal(0.0, 1.0), &device);

        let agg = block.aggregate(h.clone(), bf.clone(), index(vec![0], &device), index(vec![1], &device));

        let expected = block.pre_residual.forward(h).slice([0..1, 0..EMB]) * block.dense_bf.forward(bf);
        let got = agg.slice([1..2, 0..EMB]);
        let diff: f32 = (got - expected).abs().max().into_scalar().elem();
        assert!(diff < 1e-6, "diff={diff}");
    }

    #[test]
    fn test_empty_edge_list_aggregates_zero() {
        let device = Default::default();
        let block = block(&device);
        let h = Tensor::<TestBackend, 2>::random([3, EMB], Distribution::Normal(0.0, 1.0), &device);
        let bf = Tensor::<TestBackend, 2>::zeros([0, BF], &device);

        let agg = block.aggregate(h.clone(), bf.clone(), index(vec![], &device), index(vec![], &device));
        assert_eq!(agg.dims(), [3, EMB]);
        let max_val: f32 = agg.abs().max().into_scalar().elem();
        assert_eq!(max_val, 0.0);

        // All layers are bias-free, so the update of a zero aggregate is zero.
        let out = block.forward(h, bf, index(vec![], &device), index(vec![], &device));
        assert_eq!(out.dims(), [3, EMB]);
        let max_val: f32 = out.abs().max().into_scalar().elem();
        assert!(max_val < 1e-7, "got {max_val}");
    }

    #[test]
    fn test_unscaled_config_has_no_scale_factor() {
        let device = Default::default();
        let block = HadamardBlockConfig::new(EMB, BF, 1)
            .with_scale(ScaleSpec::Unscaled)
            .init::<TestBackend>(&ScaleTable::new(), &device);
        assert!(block.scale_factor().is_none());
    }
}
