//! Reciprocal-space geometry for the Ewald block.
//!
//! Holds the per-structure phase data (`k·x` dot products and sinc damping)
//! that the first Ewald block computes and later blocks reuse, plus helpers
//! to build reciprocal lattice vectors for periodic cells and the fixed voxel
//! grid used for aperiodic structures.
//!
//! ```text
//! periodic:   k = 2π cell⁻¹ m,       m ∈ half-space index set
//! aperiodic:  k = Δk · m,            |k| ≤ k_cutoff
//! damping:    sinc(Δk x/2) · sinc(Δk y/2) · sinc(Δk z/2)   (aperiodic only)
//! ```

use std::f64::consts::PI;

use burn::prelude::*;
use burn::tensor::TensorData;
use itertools::iproduct;
use nalgebra::{Matrix3, Vector3};

/// Boundary handling of an Ewald block.
#[derive(Debug, Clone)]
pub enum KSpace<B: Backend> {
    /// Periodic cells; reciprocal vectors come from the lattice, damping is 1.
    Periodic {
        /// Number of reciprocal vectors per structure.
        num_k: usize,
    },
    /// Aperiodic structures on a fixed reciprocal voxel grid.
    Aperiodic {
        /// Voxel resolution of the grid.
        delta_k: f64,
        /// Radial basis values of the grid vectors, shape `(num_k, num_k_rbf)`.
        k_rbf_values: Tensor<B, 2>,
    },
}

impl<B: Backend> KSpace<B> {
    /// Input dimension of the downprojection: one input per reciprocal vector
    /// for periodic cells, one per k-space radial basis function otherwise.
    pub fn downprojection_input(&self) -> usize {
        match self {
            Self::Periodic { num_k } => *num_k,
            Self::Aperiodic { k_rbf_values, .. } => k_rbf_values.dims()[1],
        }
    }
}

/// Phase data of one batch: computed once, then passed to every later
/// Ewald block of the same forward pass.
#[derive(Debug, Clone)]
pub struct KParams<B: Backend> {
    /// `k·x` for each atom and reciprocal vector, shape `(num_atoms, num_k)`.
    pub dot: Tensor<B, 2>,
    /// Damping factor, same shape as `dot`. Exactly 1 for periodic cells.
    pub sinc_damping: Tensor<B, 2>,
}

impl<B: Backend> KParams<B> {
    /// Phases for periodic cells: damping is identically one.
    pub fn periodic(x: Tensor<B, 2>, k: Tensor<B, 3>, batch_seg: Tensor<B, 1, Int>) -> Self {
        let dot = dot_products(x, k, batch_seg);
        let sinc_damping = Tensor::ones(dot.dims(), &dot.device());
        Self { dot, sinc_damping }
    }

    /// Phases for aperiodic structures with sinc damping at resolution `delta_k`.
    pub fn aperiodic(
        x: Tensor<B, 2>,
        k: Tensor<B, 3>,
        batch_seg: Tensor<B, 1, Int>,
        delta_k: f64,
    ) -> Self {
        let dot = dot_products(x.clone(), k, batch_seg);
        let [_, num_k] = dot.dims();
        let sinc_damping = sinc_damping(x, delta_k, num_k);
        Self { dot, sinc_damping }
    }

    pub fn num_atoms(&self) -> usize {
        self.dot.dims()[0]
    }

    pub fn num_k(&self) -> usize {
        self.dot.dims()[1]
    }

    /// Damped cosine and sine of the phases, each `(num_atoms, num_k)`.
    pub fn damped_phases(&self) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let cos = self.sinc_damping.clone() * self.dot.clone().cos();
        let sin = self.sinc_damping.clone() * self.dot.clone().sin();
        (cos, sin)
    }
}

/// Where an Ewald block gets its phases from.
#[derive(Debug, Clone)]
pub enum KSource<B: Backend> {
    /// Compute phases from positions `(num_atoms, 3)` and reciprocal vectors
    /// `(num_batch, num_k, 3)`.
    Vectors { x: Tensor<B, 2>, k: Tensor<B, 3> },
    /// Reuse phases returned by an earlier block.
    Cached(KParams<B>),
}

/// `k·x` for each atom against the reciprocal vectors of its own structure.
///
/// Returns `(num_atoms, num_k)`.
pub fn dot_products<B: Backend>(
    x: Tensor<B, 2>,
    k: Tensor<B, 3>,
    batch_seg: Tensor<B, 1, Int>,
) -> Tensor<B, 2> {
    let [num_atoms, _] = x.dims();
    let [_, num_k, _] = k.dims();
    let k_atom = k.select(0, batch_seg); // (num_atoms, num_k, 3)
    let x_atom = x.unsqueeze_dim::<3>(1).expand([num_atoms, num_k, 3]);
    (k_atom * x_atom).sum_dim(2).reshape([num_atoms, num_k])
}

/// Normalized sinc, `sin(πx) / (πx)`, with `sinc(0) = 1`.
pub fn sinc<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let px = x.mul_scalar(PI);
    let at_zero = px.clone().equal_elem(0.0);
    let safe = px.mask_fill(at_zero.clone(), 1.0);
    (safe.clone().sin() / safe).mask_fill(at_zero, 1.0)
}

/// Product of the three sinc terms of `0.5 * delta_k * x_c`, broadcast over
/// `num_k` reciprocal vectors. Returns `(num_atoms, num_k)`.
pub fn sinc_damping<B: Backend>(x: Tensor<B, 2>, delta_k: f64, num_k: usize) -> Tensor<B, 2> {
    let [num_atoms, _] = x.dims();
    let s = sinc(x.mul_scalar(0.5 * delta_k));
    let damping = s.clone().slice([0..num_atoms, 0..1])
        * s.clone().slice([0..num_atoms, 1..2])
        * s.slice([0..num_atoms, 2..3]);
    damping.expand([num_atoms, num_k])
}

/// Integer triples in `[-n, n]³` that lie strictly after the origin in
/// lexicographic order.
///
/// `m` and `-m` give complex-conjugate structure factors, so only one of each
/// pair is kept and the origin is dropped.
pub fn k_index_product_set(n: [i64; 3]) -> Vec<[i64; 3]> {
    let mut all: Vec<[i64; 3]> = iproduct!(-n[0]..=n[0], -n[1]..=n[1], -n[2]..=n[2])
        .map(|(i, j, l)| [i, j, l])
        .collect();
    all.split_off(all.len() / 2 + 1)
}

/// Reciprocal vectors `k = 2π cell⁻¹ m` for each cell.
///
/// `cells` holds lattice vectors as rows, so the columns of `cell⁻¹` are the
/// reciprocal basis. Returns `(num_batch, num_k, 3)`.
///
/// # Panics
/// Panics if a cell is singular.
pub fn reciprocal_vectors<B: Backend>(
    cells: &[[[f64; 3]; 3]],
    index_set: &[[i64; 3]],
    device: &B::Device,
) -> Tensor<B, 3> {
    let mut flat = Vec::with_capacity(cells.len() * index_set.len() * 3);
    for cell in cells {
        let lattice = Matrix3::from_fn(|r, c| cell[r][c]);
        let inv = lattice.try_inverse().unwrap_or_else(|| {
            panic!("cell is singular (det = {})", lattice.determinant())
        });
        for m in index_set {
            let k = inv * Vector3::new(m[0] as f64, m[1] as f64, m[2] as f64) * (2.0 * PI);
            flat.extend(k.iter().map(|&c| c as f32));
        }
    }
    Tensor::from_data(
        TensorData::new(flat, [cells.len(), index_set.len(), 3]),
        device,
    )
}

/// Relative slack on the cutoff so grid points that land on the sphere up to
/// rounding are kept.
const CUTOFF_TOLERANCE: f64 = 1e-9;

/// Aperiodic reciprocal grid: half-space voxels of size `delta_k` within
/// `k_cutoff`.
///
/// # Panics
/// Panics if `delta_k` is not positive.
pub fn voxel_grid(k_cutoff: f64, delta_k: f64) -> Vec<[f64; 3]> {
    assert!(delta_k > 0.0, "delta_k must be positive, got {delta_k}");
    let n = (k_cutoff / delta_k).ceil().max(0.0) as i64;
    let max_norm = k_cutoff + CUTOFF_TOLERANCE * delta_k;
    k_index_product_set([n, n, n])
        .into_iter()
        .map(|m| m.map(|c| c as f64 * delta_k))
        .filter(|k| k.iter().map(|c| c * c).sum::<f64>().sqrt() <= max_norm)
        .collect()
}

/// Gaussian smearing of `values` onto `num` centers evenly spaced in
/// `[start, stop]`. Returns a row-major `(values.len(), num)` buffer.
///
/// # Panics
/// Panics if `num < 2`.
pub fn gaussian_rbf(values: &[f64], start: f64, stop: f64, num: usize) -> Vec<f32> {
    assert!(num >= 2, "gaussian_rbf needs at least two centers");
    let spacing = (stop - start) / (num - 1) as f64;
    let coeff = -0.5 / (spacing * spacing);
    values
        .iter()
        .flat_map(|&v| {
            (0..num).map(move |i| {
                let d = v - (start + i as f64 * spacing);
                (coeff * d * d).exp() as f32
            })
        })
        .collect()
}

/// The fixed reciprocal grid shared by all aperiodic structures, with its
/// radial basis values.
#[derive(Debug, Clone)]
pub struct AperiodicGrid<B: Backend> {
    pub delta_k: f64,
    /// Grid vectors, `(num_k, 3)`.
    pub k_vectors: Tensor<B, 2>,
    /// Gaussian RBF of `|k|`, `(num_k, num_k_rbf)`.
    pub k_rbf_values: Tensor<B, 2>,
}

impl<B: Backend> AperiodicGrid<B> {
    pub fn new(k_cutoff: f64, delta_k: f64, num_k_rbf: usize, device: &B::Device) -> Self {
        let grid = voxel_grid(k_cutoff, delta_k);
        let num_k = grid.len();
        let norms: Vec<f64> = grid
            .iter()
            .map(|k| k.iter().map(|c| c * c).sum::<f64>().sqrt())
            .collect();
        let flat: Vec<f32> = grid.iter().flat_map(|k| k.map(|c| c as f32)).collect();

        tracing::debug!(num_k, num_k_rbf, k_cutoff, delta_k, "Built aperiodic k grid");

        Self {
            delta_k,
            k_vectors: Tensor::from_data(TensorData::new(flat, [num_k, 3]), device),
            k_rbf_values: Tensor::from_data(
                TensorData::new(gaussian_rbf(&norms, 0.0, k_cutoff, num_k_rbf), [num_k, num_k_rbf]),
                device,
            ),
        }
    }

    pub fn num_k(&self) -> usize {
        self.k_vectors.dims()[0]
    }

    /// Grid vectors repeated for every structure, `(num_batch, num_k, 3)`.
    pub fn batched(&self, num_batch: usize) -> Tensor<B, 3> {
        let num_k = self.num_k();
        self.k_vectors
            .clone()
            .unsqueeze_dim::<3>(0)
            .expand([num_batch, num_k, 3])
    }

    pub fn kspace(&self) -> KSpace<B> {
        KSpace::Aperiodic {
            delta_k: self.delta_k,
            k_rbf_values: self.k_rbf_values.clone(),
        }
    }
}
