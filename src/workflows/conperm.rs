//! `nimare conperm`: one-sample permutation test over contrast maps.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::core::schema::{ArgumentSchema, Arity, BoundArgs, OptionSpec, ValueKind};
use crate::core::workflow::{Outcome, WorkflowUnit};
use crate::domain::error::WorkflowFailure;
use crate::io::{read_map, RunOutputs};
use crate::stats::normal::neg_log10;
use crate::stats::permutation::sign_flip;
use crate::stats::rng_from_seed;
use crate::workflows::{count, n_iters_option, output_dir, output_dir_option, prefix, prefix_option, seed, seed_option};

/// Voxel-level FWE alpha of the thresholded t map
pub const FWE_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConpermWorkflow;

impl WorkflowUnit for ConpermWorkflow {
    fn name(&self) -> &'static str {
        "conperm"
    }

    fn about(&self) -> &'static str {
        "Run a one-sample sign-flipping permutation test on contrast maps"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .option(
                OptionSpec::positional(
                    "contrast_images",
                    ValueKind::ExistingPath,
                    "Contrast maps, one per study (x, y, z, value tables)",
                )
                .arity(Arity::AtLeast(2)),
            )
            .option(output_dir_option())
            .option(prefix_option("prefix"))
            .option(n_iters_option("10000"))
            .option(seed_option())
    }

    fn invoke(&self, args: &BoundArgs) -> Outcome {
        ConpermParams::from_args(args)?.run()
    }
}

#[derive(Debug, Clone)]
struct ConpermParams {
    contrast_images: Vec<PathBuf>,
    output_dir: PathBuf,
    prefix: String,
    n_iters: usize,
    seed: Option<u64>,
}

impl ConpermParams {
    fn from_args(args: &BoundArgs) -> Result<Self, WorkflowFailure> {
        let contrast_images = args.paths("contrast_images")?.to_vec();
        let first = contrast_images
            .first()
            .ok_or_else(|| WorkflowFailure::invalid_input("no contrast maps given"))?;
        Ok(Self {
            prefix: prefix(args, "prefix", first)?,
            output_dir: output_dir(args)?,
            n_iters: count(args, "n-iters")?,
            seed: seed(args)?,
            contrast_images,
        })
    }

    fn run(&self) -> Outcome {
        let maps = self
            .contrast_images
            .iter()
            .map(|path| read_map(path))
            .collect::<Result<Vec<_>, _>>()?;
        let (mut rng, seed) = rng_from_seed(self.seed);
        let mut outputs = RunOutputs::create(&self.output_dir, &self.prefix)?;
        let mut fields = permutation_test(&mut outputs, &maps, self.n_iters, &mut rng)?;
        fields.insert("seed".to_string(), json!(seed));
        outputs.finish("conperm", fields)
    }
}

/// Maps aligned on the union of their voxels; absent voxels are zero
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stacked {
    pub coords: Vec<[f64; 3]>,
    pub samples: Vec<Vec<f64>>,
}

fn key(xyz: [f64; 3]) -> [i64; 3] {
    xyz.map(|v| (v * 1000.0).round() as i64)
}

pub(crate) fn stack(maps: &[Vec<([f64; 3], f64)>]) -> Stacked {
    let mut slots: BTreeMap<[i64; 3], [f64; 3]> = BTreeMap::new();
    for (xyz, _) in maps.iter().flatten() {
        slots.entry(key(*xyz)).or_insert(*xyz);
    }
    let columns: BTreeMap<[i64; 3], usize> = slots.keys().enumerate().map(|(column, k)| (*k, column)).collect();
    let samples = maps
        .iter()
        .map(|map| {
            let mut row = vec![0.0; columns.len()];
            for (xyz, value) in map {
                if let Some(column) = columns.get(&key(*xyz)) {
                    row[*column] = *value;
                }
            }
            row
        })
        .collect();
    Stacked {
        coords: slots.into_values().collect(),
        samples,
    }
}

/// Sign-flip test over `maps`; writes the t, log-p and thresholded t maps
pub(crate) fn permutation_test<R: Rng>(
    outputs: &mut RunOutputs,
    maps: &[Vec<([f64; 3], f64)>],
    n_iters: usize,
    rng: &mut R,
) -> Result<Map<String, Value>, WorkflowFailure> {
    let stacked = stack(maps);
    if stacked.coords.is_empty() {
        return Err(WorkflowFailure::invalid_input("all contrast maps are empty"));
    }
    info!(maps = maps.len(), voxels = stacked.coords.len(), n_iters, "running sign-flip permutation test");
    let result = sign_flip(&stacked.samples, n_iters, rng)?;

    let coords = &stacked.coords;
    outputs.write_entries("t", coords.iter().copied().zip(result.t.iter().copied()))?;
    outputs.write_entries(
        "logp_level-voxel_corr-FWE",
        coords.iter().copied().zip(result.p_fwe.iter().map(|p| neg_log10(*p))),
    )?;
    let significant: Vec<([f64; 3], f64)> = coords
        .iter()
        .zip(&result.t)
        .zip(&result.p_fwe)
        .filter(|(_, p)| **p < FWE_ALPHA)
        .map(|((xyz, t), _)| (*xyz, *t))
        .collect();
    let n_significant = significant.len();
    outputs.write_entries("t_level-voxel_corr-FWE", significant)?;

    let max_abs_t = result.t.iter().map(|t| t.abs()).fold(0.0, f64::max);
    let mut fields = Map::new();
    fields.insert("n_maps".to_string(), json!(maps.len()));
    fields.insert("n_voxels".to_string(), json!(coords.len()));
    fields.insert("n_iters".to_string(), json!(n_iters));
    fields.insert("max_abs_t".to_string(), json!(max_abs_t));
    fields.insert("fwe_alpha".to_string(), json!(FWE_ALPHA));
    fields.insert("n_significant_voxels".to_string(), json!(n_significant));
    Ok(fields)
}
