//! Ewald message passing for graph neural network interatomic potentials.
//!
//! Provides two burn modules that update per-atom embeddings: a long-range
//! [`EwaldBlock`] operating on a truncated Fourier representation of each
//! structure, and a short-range [`HadamardBlock`] aggregating messages along
//! edges. [`InteractionStack`] chains both per layer and shares the Ewald
//! downprojection and k-space phases across layers.

pub mod blocks;
pub mod config;
pub mod interaction;
pub mod layers;

pub use blocks::ewald::{EwaldBlock, EwaldBlockConfig, EwaldOutput, EWALD_UPDATE_SCALE};
pub use blocks::hadamard::{HadamardBlock, HadamardBlockConfig};
pub use blocks::kspace::{
    k_index_product_set, reciprocal_vectors, AperiodicGrid, KParams, KSource, KSpace,
};
pub use blocks::scatter::scatter_sum;
pub use config::{load_model_toml, KSpaceToml, ModelToml};
pub use interaction::{BatchGeometry, InteractionStack, InteractionStackConfig};
pub use layers::activation::Activation;
pub use layers::dense::{Dense, DenseConfig};
pub use layers::residual::{ResidualLayer, ResidualLayerConfig};
pub use layers::scale_factor::{ScaleFactor, ScaleSpec, ScaleTable};
