//! Stack of interaction layers, each combining one Hadamard and one Ewald
//! block.
//!
//! The stack owns the downprojection shared by every Ewald block and lends it
//! to each call. The k-space phases are computed by the first Ewald block and
//! handed explicitly to the following ones.
//!
//! ```text
//! for each layer i:
//!   h_had  = hadamard_i(h, bf, idx_s, idx_t)
//!   h_ew   = ewald_i(down, h, phases)          phases: computed at i = 0, cached after
//!   h      = (h + h_had + h_ew) / sqrt(3)
//! ```

use burn::prelude::*;

use crate::blocks::ewald::{EwaldBlock, EwaldBlockConfig};
use crate::blocks::hadamard::{HadamardBlock, HadamardBlockConfig};
use crate::blocks::kspace::{KSource, KSpace};
use crate::layers::dense::Dense;
use crate::layers::scale_factor::{ScaleSpec, ScaleTable};

/// Configuration for an [`InteractionStack`].
#[derive(Config, Debug)]
pub struct InteractionStackConfig {
    /// Number of interaction layers.
    pub num_blocks: usize,
    pub ewald: EwaldBlockConfig,
    pub hadamard: HadamardBlockConfig,
}

/// Interaction layers sharing one Ewald downprojection.
#[derive(Module, Debug)]
pub struct InteractionStack<B: Backend> {
    down: Dense<B>,
    ewald_blocks: Vec<EwaldBlock<B>>,
    hadamard_blocks: Vec<HadamardBlock<B>>,
}

/// Precomputed geometric inputs of one batch.
#[derive(Debug, Clone)]
pub struct BatchGeometry<B: Backend> {
    /// Atom positions, `(num_atoms, 3)`.
    pub x: Tensor<B, 2>,
    /// Reciprocal vectors, `(num_batch, num_k, 3)`.
    pub k: Tensor<B, 3>,
    /// Structure index of each atom, `(num_atoms,)`.
    pub batch_seg: Tensor<B, 1, Int>,
    pub num_batch: usize,
    /// Edge radial basis features, `(num_edges, emb_size_bf)`.
    pub bf: Tensor<B, 2>,
    /// Source atom of each edge.
    pub idx_s: Tensor<B, 1, Int>,
    /// Target atom of each edge.
    pub idx_t: Tensor<B, 1, Int>,
}

/// Give each layer its own scale-factor name by appending the layer index.
fn indexed(spec: &ScaleSpec, index: usize) -> ScaleSpec {
    match spec {
        ScaleSpec::Unscaled => ScaleSpec::Unscaled,
        ScaleSpec::Named { name } => ScaleSpec::named(format!("{name}_{index}")),
    }
}

impl InteractionStackConfig {
    /// Initialize the stack.
    ///
    /// # Panics
    /// Panics if the Ewald and Hadamard configs disagree on the atom
    /// embedding size.
    pub fn init<B: Backend>(
        &self,
        kspace: KSpace<B>,
        scales: &ScaleTable,
        device: &B::Device,
    ) -> InteractionStack<B> {
        assert_eq!(
            self.ewald.emb_size_atom, self.hadamard.emb_size_atom,
            "Ewald and Hadamard blocks must share the atom embedding size"
        );

        let down = self.ewald.init_downprojection(&kspace, device);
        let ewald_blocks = (0..self.num_blocks)
            .map(|i| {
                self.ewald
                    .clone()
                    .with_scale(indexed(&self.ewald.scale, i))
                    .init(kspace.clone(), scales, device)
            })
            .collect();
        let hadamard_blocks = (0..self.num_blocks)
            .map(|i| {
                self.hadamard
                    .clone()
                    .with_scale(indexed(&self.hadamard.scale, i))
                    .init(scales, device)
            })
            .collect();

        tracing::info!(
            num_blocks = self.num_blocks,
            emb_size_atom = self.ewald.emb_size_atom,
            downprojection_input = kspace.downprojection_input(),
            "Initialized interaction stack"
        );

        InteractionStack {
            down,
            ewald_blocks,
            hadamard_blocks,
        }
    }
}

impl<B: Backend> InteractionStack<B> {
    /// The downprojection shared by all Ewald blocks.
    pub fn shared_downprojection(&self) -> &Dense<B> {
        &self.down
    }

    pub fn ewald_blocks(&self) -> &[EwaldBlock<B>] {
        &self.ewald_blocks
    }

    pub fn hadamard_blocks(&self) -> &[HadamardBlock<B>] {
        &self.hadamard_blocks
    }

    /// Run all layers and return the final atom embeddings,
    /// `(num_atoms, emb_size_atom)`.
    pub fn forward(&self, h: Tensor<B, 2>, geometry: &BatchGeometry<B>) -> Tensor<B, 2> {
        let skip_scale = 1.0 / 3.0_f64.sqrt();
        let mut h = h;
        let mut k_source = KSource::Vectors {
            x: geometry.x.clone(),
            k: geometry.k.clone(),
        };

        for (hadamard, ewald) in self.hadamard_blocks.iter().zip(&self.ewald_blocks) {
            let h_had = hadamard.forward(
                h.clone(),
                geometry.bf.clone(),
                geometry.idx_s.clone(),
                geometry.idx_t.clone(),
            );
            let out = ewald.forward(
                &self.down,
                h.clone(),
                k_source,
                geometry.batch_seg.clone(),
                geometry.num_batch,
            );
            k_source = KSource::Cached(out.k_params);
            h = (h + h_had + out.update).mul_scalar(skip_scale);
        }
        h
    }
}
