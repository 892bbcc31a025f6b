//! TOML model config loading.
//!
//! Deserializes a model file with top-level sizes, a `[kspace]` section and
//! optional `[ewald]` / `[hadamard]` override sections, then merges the
//! overrides onto the block config defaults.
//!
//! # Example (TOML)
//!
//! ```toml
//! emb_size_atom = 128
//! emb_size_bf = 16
//! num_blocks = 4
//! activation = "scaled_silu"
//! scale_file = "scales/ewald_oc20.json"
//!
//! [kspace]
//! type = "Periodic"
//! index_range = [2, 2, 2]
//!
//! [ewald]
//! downprojection_size = 8
//! scale = { type = "Named", name = "ewald" }
//!
//! [hadamard]
//! num_hidden = 2
//! ```

use std::path::{Path, PathBuf};

use burn::prelude::*;
use serde::Deserialize;

use crate::blocks::ewald::EwaldBlockConfig;
use crate::blocks::hadamard::HadamardBlockConfig;
use crate::blocks::kspace::{k_index_product_set, AperiodicGrid, KSpace};
use crate::interaction::InteractionStackConfig;
use crate::layers::activation::Activation;
use crate::layers::scale_factor::{ScaleSpec, ScaleTable};

/// Top-level structure of a model TOML file.
#[derive(Debug, Deserialize)]
pub struct ModelToml {
    /// Embedding size of the atoms.
    pub emb_size_atom: usize,
    /// Number of radial basis features per edge.
    pub emb_size_bf: usize,
    /// Number of interaction layers.
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,
    /// Activation used by every dense layer with an activation.
    #[serde(default = "default_activation")]
    pub activation: Activation,
    /// JSON file of named scale factors. Relative paths are resolved against
    /// the directory of the TOML file.
    #[serde(default)]
    pub scale_file: Option<PathBuf>,
    pub kspace: KSpaceToml,
    #[serde(default)]
    pub ewald: EwaldOverrides,
    #[serde(default)]
    pub hadamard: HadamardOverrides,
}

/// Reciprocal-space setup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum KSpaceToml {
    /// Lattice reciprocal vectors from the index set `[-n, n]³`.
    Periodic { index_range: [i64; 3] },
    /// Fixed voxel grid for structures without a cell.
    Aperiodic {
        k_cutoff: f64,
        delta_k: f64,
        num_k_rbf: usize,
    },
}

/// Optional overrides for `EwaldBlockConfig` fields.
#[derive(Debug, Default, Deserialize)]
pub struct EwaldOverrides {
    pub downprojection_size: Option<usize>,
    pub num_hidden: Option<usize>,
    pub scale: Option<ScaleSpec>,
}

/// Optional overrides for `HadamardBlockConfig` fields.
#[derive(Debug, Default, Deserialize)]
pub struct HadamardOverrides {
    pub num_hidden: Option<usize>,
    pub scale: Option<ScaleSpec>,
}

fn default_num_blocks() -> usize {
    4
}
fn default_activation() -> Activation {
    Activation::ScaledSilu
}

const DEFAULT_DOWNPROJECTION_SIZE: usize = 8;
const DEFAULT_NUM_HIDDEN: usize = 3;

/// Load and deserialize a `ModelToml` from a TOML file.
///
/// A relative `scale_file` is rewritten relative to the TOML file's directory.
pub fn load_model_toml(path: &Path) -> anyhow::Result<ModelToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read model config {}: {e}", path.display()))?;
    let mut config: ModelToml = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse model config {}: {e}", path.display()))?;

    if let (Some(scale_file), Some(dir)) = (&config.scale_file, path.parent()) {
        if scale_file.is_relative() {
            config.scale_file = Some(dir.join(scale_file));
        }
    }

    tracing::info!(
        path = %path.display(),
        num_blocks = config.num_blocks,
        emb_size_atom = config.emb_size_atom,
        "Loaded model config"
    );
    Ok(config)
}

impl ModelToml {
    /// Ewald block config: defaults < `[ewald]` overrides.
    pub fn ewald_config(&self) -> EwaldBlockConfig {
        let mut config = EwaldBlockConfig::new(
            self.emb_size_atom,
            self.ewald
                .downprojection_size
                .unwrap_or(DEFAULT_DOWNPROJECTION_SIZE),
            self.ewald.num_hidden.unwrap_or(DEFAULT_NUM_HIDDEN),
        )
        .with_activation(self.activation);
        if let Some(scale) = &self.ewald.scale {
            config = config.with_scale(scale.clone());
        }
        config
    }

    /// Hadamard block config: defaults < `[hadamard]` overrides.
    pub fn hadamard_config(&self) -> HadamardBlockConfig {
        let mut config = HadamardBlockConfig::new(
            self.emb_size_atom,
            self.emb_size_bf,
            self.hadamard.num_hidden.unwrap_or(DEFAULT_NUM_HIDDEN),
        )
        .with_activation(self.activation);
        if let Some(scale) = &self.hadamard.scale {
            config = config.with_scale(scale.clone());
        }
        config
    }

    pub fn stack_config(&self) -> InteractionStackConfig {
        InteractionStackConfig::new(self.num_blocks, self.ewald_config(), self.hadamard_config())
    }

    /// Scale table from `scale_file`, or an empty table when none is set.
    pub fn scale_table(&self) -> anyhow::Result<ScaleTable> {
        match &self.scale_file {
            Some(path) => ScaleTable::load(path),
            None => Ok(ScaleTable::new()),
        }
    }

    /// Half-space index set of the periodic setup; `None` for aperiodic.
    pub fn index_set(&self) -> Option<Vec<[i64; 3]>> {
        match &self.kspace {
            KSpaceToml::Periodic { index_range } => Some(k_index_product_set(*index_range)),
            KSpaceToml::Aperiodic { .. } => None,
        }
    }

    /// Aperiodic voxel grid; `None` for periodic.
    pub fn aperiodic_grid<B: Backend>(&self, device: &B::Device) -> Option<AperiodicGrid<B>> {
        match &self.kspace {
            KSpaceToml::Periodic { .. } => None,
            KSpaceToml::Aperiodic {
                k_cutoff,
                delta_k,
                num_k_rbf,
            } => Some(AperiodicGrid::new(*k_cutoff, *delta_k, *num_k_rbf, device)),
        }
    }

    /// Boundary handling for the Ewald blocks.
    pub fn kspace<B: Backend>(&self, device: &B::Device) -> KSpace<B> {
        match &self.kspace {
            KSpaceToml::Periodic { index_range } => KSpace::Periodic {
                num_k: k_index_product_set(*index_range).len(),
            },
            KSpaceToml::Aperiodic {
                k_cutoff,
                delta_k,
                num_k_rbf,
            } => AperiodicGrid::new(*k_cutoff, *delta_k, *num_k_rbf, device).kspace(),
        }
    }
}
