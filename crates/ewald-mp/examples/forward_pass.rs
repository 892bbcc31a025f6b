//! Run one forward pass of an interaction stack on a random batch.
//!
//! Usage:
//!   cargo run --release -p ewald-mp --example forward_pass -- \
//!     --config configs/ewald_periodic.toml \
//!     --num-structures 4 --atoms-per-structure 12

use std::path::PathBuf;
use std::time::Instant;

use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::{Distribution, TensorData};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use ewald_mp::{load_model_toml, reciprocal_vectors, BatchGeometry};

type DemoBackend = NdArray<f32>;

#[derive(Parser)]
struct Args {
    /// Path to the model TOML.
    #[arg(long, default_value = "configs/ewald_periodic.toml")]
    config: PathBuf,
    /// Number of structures in the batch.
    #[arg(long, default_value_t = 2)]
    num_structures: usize,
    /// Atoms in each structure.
    #[arg(long, default_value_t = 8)]
    atoms_per_structure: usize,
    /// Edge length of the cubic cells, in Å.
    #[arg(long, default_value_t = 6.0)]
    cell_size: f64,
    /// Seed for positions and cell perturbations.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn int_tensor(values: Vec<i64>, device: &<DemoBackend as Backend>::Device) -> Tensor<DemoBackend, 1, Int> {
    let n = values.len();
    Tensor::from_data(TensorData::new(values, [n]), device)
}

fn print_stats(name: &str, values: &[f32]) {
    let n = values.len().max(1) as f32;
    let mean = values.iter().sum::<f32>() / n;
    let std = (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n).sqrt();
    let max_abs = values.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
    println!("  {name}: mean={mean:.4}  std={std:.4}  max|.|={max_abs:.4}");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = Default::default();
    let mut rng = StdRng::seed_from_u64(args.seed);

    // 1. Model
    let model = load_model_toml(&args.config)?;
    let scales = model.scale_table()?;
    let kspace = model.kspace::<DemoBackend>(&device);
    let stack = model.stack_config().init::<DemoBackend>(kspace, &scales, &device);

    // 2. Random batch: every atom pair inside a structure is an edge.
    let num_batch = args.num_structures;
    let per = args.atoms_per_structure;
    let num_atoms = num_batch * per;

    let batch_seg: Vec<i64> = (0..num_atoms).map(|i| (i / per) as i64).collect();
    let positions: Vec<f32> = (0..num_atoms * 3)
        .map(|_| rng.gen_range(0.0..args.cell_size) as f32)
        .collect();

    let (mut idx_s, mut idx_t) = (Vec::new(), Vec::new());
    for b in 0..num_batch {
        for i in b * per..(b + 1) * per {
            for j in b * per..(b + 1) * per {
                if i != j {
                    idx_s.push(i as i64);
                    idx_t.push(j as i64);
                }
            }
        }
    }
    let num_edges = idx_s.len();

    let k = match (model.index_set(), model.aperiodic_grid::<DemoBackend>(&device)) {
        (Some(index_set), _) => {
            let cells: Vec<[[f64; 3]; 3]> = (0..num_batch)
                .map(|_| {
                    let a = args.cell_size * rng.gen_range(0.95..1.05);
                    [[a, 0.0, 0.0], [0.0, a, 0.0], [0.0, 0.0, a]]
                })
                .collect();
            reciprocal_vectors::<DemoBackend>(&cells, &index_set, &device)
        }
        (None, Some(grid)) => grid.batched(num_batch),
        (None, None) => anyhow::bail!("model config has no k-space setup"),
    };

    let geometry = BatchGeometry {
        x: Tensor::from_data(TensorData::new(positions, [num_atoms, 3]), &device),
        k,
        batch_seg: int_tensor(batch_seg, &device),
        num_batch,
        bf: Tensor::random(
            [num_edges, model.emb_size_bf],
            Distribution::Uniform(0.0, 1.0),
            &device,
        ),
        idx_s: int_tensor(idx_s, &device),
        idx_t: int_tensor(idx_t, &device),
    };
    let h = Tensor::<DemoBackend, 2>::random(
        [num_atoms, model.emb_size_atom],
        Distribution::Normal(0.0, 1.0),
        &device,
    );

    tracing::info!(num_batch, num_atoms, num_edges, "Running forward pass");

    // 3. Forward
    let start = Instant::now();
    let out = stack.forward(h.clone(), &geometry);
    let elapsed = start.elapsed();

    let h_in: Vec<f32> = h.into_data().to_vec().map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let h_out: Vec<f32> = out.into_data().to_vec().map_err(|e| anyhow::anyhow!("{e:?}"))?;

    println!("Forward pass in {:.1}ms", elapsed.as_secs_f64() * 1000.0);
    print_stats("input embeddings", &h_in);
    print_stats("output embeddings", &h_out);
    for (i, block) in stack.ewald_blocks().iter().enumerate() {
        let scale = block.scale_factor().map(|s| s.scale()).unwrap_or(1.0);
        println!("  ewald block {i}: pbc={} scale={scale:.3}", block.use_pbc());
    }

    Ok(())
}
