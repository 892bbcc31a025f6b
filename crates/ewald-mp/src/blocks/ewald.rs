//! Long-range Ewald message-passing block.
//!
//! Atom features are transformed into a truncated Fourier representation per
//! structure (the structure factor), multiplied by a learned low-rank filter,
//! and transformed back to the atoms:
//!
//! ```text
//! hres                = pre_residual(h)
//! S(k)                = Σ_{i ∈ structure} hres_i · d_i(k) · exp(i k·x_i)
//! Δh_i                = 0.01 · Σ_k Re[ filter(k) ⊙ S(k) · d_i(k) · exp(-i k·x_i) ]
//! update_i            = update_net(scale(Δh_i))
//! ```
//!
//! `d_i(k)` is the sinc damping (1 for periodic cells). The downprojection
//! half of the filter is shared across all Ewald blocks of a model and is
//! borrowed from its owner on every call.

use burn::prelude::*;

use crate::blocks::kspace::{KParams, KSource, KSpace};
use crate::blocks::scatter::scatter_sum;
use crate::blocks::update::{UpdateNetwork, UpdateNetworkConfig};
use crate::layers::activation::Activation;
use crate::layers::dense::{Dense, DenseConfig};
use crate::layers::residual::{ResidualLayer, ResidualLayerConfig};
use crate::layers::scale_factor::{ScaleFactor, ScaleSpec, ScaleTable};

/// Fixed scale of the inverse transform. Empirical; keeps the update in the
/// magnitude range of the other message types.
// TODO: revisit once fitted scale factors exist for every Ewald block; the
// named scale factor may make this constant redundant.
pub const EWALD_UPDATE_SCALE: f64 = 0.01;

/// Configuration for an [`EwaldBlock`].
#[derive(Config, Debug)]
pub struct EwaldBlockConfig {
    /// Embedding size of the atoms.
    pub emb_size_atom: usize,
    /// Bottleneck dimension of the down/upprojection pair.
    pub downprojection_size: usize,
    /// Number of residual layers in the update network.
    pub num_hidden: usize,
    #[config(default = "Activation::Identity")]
    pub activation: Activation,
    /// Optional named rescaling; looked up as `{name}_sum`.
    #[config(default = "ScaleSpec::Unscaled")]
    pub scale: ScaleSpec,
}

/// Long-range block from Ewald message passing.
#[derive(Module, Debug)]
pub struct EwaldBlock<B: Backend> {
    /// Upprojection: downprojection_size → emb_size_atom, no bias.
    up: Dense<B>,
    pre_residual: ResidualLayer<B>,
    ewald_layers: UpdateNetwork<B>,
    ewald_scale_sum: Option<ScaleFactor>,
    /// Voxel resolution; only meaningful when `k_rbf_values` is set.
    delta_k: f64,
    /// RBF values of the aperiodic grid, `(num_k, num_k_rbf)`. `None` for
    /// periodic cells.
    ///
    /// Held as a constant, not a `Param`: it is not trained and not counted
    /// by `num_params`. Blocks built from the same `KSpace` hold clones of one
    /// tensor, which share the underlying buffer.
    k_rbf_values: Option<Tensor<B, 2>>,
}

/// Result of one [`EwaldBlock::forward`] call.
#[derive(Debug, Clone)]
pub struct EwaldOutput<B: Backend> {
    /// Atom embedding update, `(num_atoms, emb_size_atom)`.
    pub update: Tensor<B, 2>,
    /// Phases used by this call; pass to later blocks as [`KSource::Cached`].
    pub k_params: KParams<B>,
    /// Fourier-space filter used by this call, `(num_batch, num_k, emb_size_atom)`.
    pub kfilter: Tensor<B, 3>,
}

impl EwaldBlockConfig {
    /// Initialize an Ewald block.
    ///
    /// The downprojection is not part of the block; build it once with
    /// [`EwaldBlockConfig::init_downprojection`] and pass it to every forward.
    pub fn init<B: Backend>(
        &self,
        kspace: KSpace<B>,
        scales: &ScaleTable,
        device: &B::Device,
    ) -> EwaldBlock<B> {
        let (delta_k, k_rbf_values) = match kspace {
            KSpace::Periodic { .. } => (0.0, None),
            KSpace::Aperiodic { delta_k, k_rbf_values } => (delta_k, Some(k_rbf_values)),
        };

        tracing::debug!(
            emb_size_atom = self.emb_size_atom,
            downprojection_size = self.downprojection_size,
            num_hidden = self.num_hidden,
            periodic = k_rbf_values.is_none(),
            "Initializing Ewald block"
        );

        EwaldBlock {
            up: DenseConfig::new(self.downprojection_size, self.emb_size_atom).init(device),
            pre_residual: ResidualLayerConfig::new(self.emb_size_atom)
                .with_activation(self.activation)
                .init(device),
            ewald_layers: UpdateNetworkConfig::new(
                self.emb_size_atom,
                self.emb_size_atom,
                self.num_hidden,
            )
            .with_activation(self.activation)
            .init(device),
            ewald_scale_sum: self.scale.init(scales, "_sum"),
            delta_k,
            k_rbf_values,
        }
    }

    /// Build the downprojection shared by all Ewald blocks of a model.
    pub fn init_downprojection<B: Backend>(&self, kspace: &KSpace<B>, device: &B::Device) -> Dense<B> {
        DenseConfig::new(kspace.downprojection_input(), self.downprojection_size).init(device)
    }
}

impl<B: Backend> EwaldBlock<B> {
    pub fn use_pbc(&self) -> bool {
        self.k_rbf_values.is_none()
    }

    pub fn scale_factor(&self) -> Option<&ScaleFactor> {
        self.ewald_scale_sum.as_ref()
    }

    /// Compute phases and damping for this block's boundary handling.
    pub fn k_params(
        &self,
        x: Tensor<B, 2>,
        k: Tensor<B, 3>,
        batch_seg: Tensor<B, 1, Int>,
    ) -> KParams<B> {
        let params = if self.use_pbc() {
            KParams::periodic(x, k, batch_seg)
        } else {
            KParams::aperiodic(x, k, batch_seg, self.delta_k)
        };
        tracing::trace!(
            num_atoms = params.num_atoms(),
            num_k = params.num_k(),
            "Computed k-space phases"
        );
        params
    }

    /// Fourier-space filter from the current projection weights, broadcast
    /// to `(num_batch, num_k, emb_size_atom)`.
    ///
    /// Periodic cells use the weight product `W_down · W_up` directly, so
    /// `down` must take one input per reciprocal vector. Aperiodic grids pass
    /// their RBF values through both projections.
    pub fn kfilter(&self, down: &Dense<B>, num_batch: usize) -> Tensor<B, 3> {
        let filter = match &self.k_rbf_values {
            None => down.weight().matmul(self.up.weight()),
            Some(rbf) => self.up.forward(down.forward(rbf.clone())),
        };
        let [num_k, emb] = filter.dims();
        filter.unsqueeze_dim::<3>(0).expand([num_batch, num_k, emb])
    }

    /// Forward pass.
    ///
    /// - `down`: the shared downprojection
    /// - `h`: atom embeddings, `(num_atoms, emb_size_atom)`
    /// - `k_source`: positions and reciprocal vectors, or phases from an
    ///   earlier block
    /// - `batch_seg`: structure index of each atom, `(num_atoms,)`
    /// - `num_batch`: number of structures in the batch
    pub fn forward(
        &self,
        down: &Dense<B>,
        h: Tensor<B, 2>,
        k_source: KSource<B>,
        batch_seg: Tensor<B, 1, Int>,
        num_batch: usize,
    ) -> EwaldOutput<B> {
        let hres = self.pre_residual.forward(h.clone());

        let k_params = match k_source {
            KSource::Vectors { x, k } => self.k_params(x, k, batch_seg.clone()),
            KSource::Cached(params) => params,
        };

        let kfilter = self.kfilter(down, num_batch);

        let [num_atoms, emb] = hres.dims();
        let num_k = k_params.num_k();
        let (cos, sin) = k_params.damped_phases();
        let cos = cos.unsqueeze_dim::<3>(2).expand([num_atoms, num_k, emb]);
        let sin = sin.unsqueeze_dim::<3>(2).expand([num_atoms, num_k, emb]);
        let hres = hres.unsqueeze_dim::<3>(1).expand([num_atoms, num_k, emb]);

        // Structure factor, (num_batch, num_k, emb)
        let sf_real = scatter_sum(hres.clone() * cos.clone(), batch_seg.clone(), num_batch);
        let sf_imag = scatter_sum(hres * sin.clone(), batch_seg.clone(), num_batch);

        // Filter, then back to the atoms of each structure
        let real = (sf_real * kfilter.clone()).select(0, batch_seg.clone()) * cos;
        let imag = (sf_imag * kfilter.clone()).select(0, batch_seg) * sin;
        let mut h_update = (real + imag)
            .sum_dim(1)
            .reshape([num_atoms, emb])
            .mul_scalar(EWALD_UPDATE_SCALE);

        if let Some(scale) = &self.ewald_scale_sum {
            h_update = scale.forward(h_update, h);
        }

        EwaldOutput {
            update: self.ewald_layers.forward(h_update),
            k_params,
            kfilter,
        }
    }
}
