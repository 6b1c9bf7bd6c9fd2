//! `nimare scale`: specific coactivation likelihood estimation.
//!
//! The ALE map of a dataset is compared against ALE maps whose foci are
//! redrawn from a baseline set of coordinates, which controls for regions
//! that are reported often regardless of the task.

use std::path::PathBuf;

use serde_json::json;
use tracing::{info, warn};

use crate::core::schema::{ArgumentSchema, BoundArgs, OptionSpec, ValueKind};
use crate::core::workflow::{Outcome, WorkflowUnit};
use crate::domain::error::WorkflowFailure;
use crate::io::{count_foci, load_experiments, read_coordinates, RunOutputs};
use crate::stats::ale::{ale_map, baseline_null, AleModel};
use crate::stats::kernel::voxelize;
use crate::stats::normal::{neg_log10, p_to_z};
use crate::stats::{rng_from_seed, Grid, Kernel};
use crate::workflows::{
    count, n_iters_option, output_dir, output_dir_option, prefix, prefix_option, seed, seed_option, summary,
    v_thr_option, voxel_size_option,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleWorkflow;

impl WorkflowUnit for ScaleWorkflow {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn about(&self) -> &'static str {
        "Run a specific coactivation likelihood estimation (SCALE) against baseline coordinates"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .option(OptionSpec::positional(
                "dataset_file",
                ValueKind::ExistingPath,
                "Coordinate dataset (JSON, or Sleuth text with a .txt extension)",
            ))
            .option(OptionSpec::positional(
                "baseline",
                ValueKind::ExistingPath,
                "Table of baseline x, y, z coordinates in MNI space",
            ))
            .option(output_dir_option())
            .option(prefix_option("prefix"))
            .option(n_iters_option("2500"))
            .option(v_thr_option())
            .option(voxel_size_option())
            .option(seed_option())
    }

    fn invoke(&self, args: &BoundArgs) -> Outcome {
        ScaleParams::from_args(args)?.run()
    }
}

#[derive(Debug, Clone)]
struct ScaleParams {
    dataset_file: PathBuf,
    baseline: PathBuf,
    output_dir: PathBuf,
    prefix: String,
    n_iters: usize,
    v_thr: f64,
    voxel_size: f64,
    seed: Option<u64>,
}

impl ScaleParams {
    fn from_args(args: &BoundArgs) -> Result<Self, WorkflowFailure> {
        let dataset_file = args.path("dataset_file")?.to_path_buf();
        Ok(Self {
            prefix: prefix(args, "prefix", &dataset_file)?,
            baseline: args.path("baseline")?.to_path_buf(),
            output_dir: output_dir(args)?,
            n_iters: count(args, "n-iters")?,
            v_thr: args.float("v-thr")?,
            voxel_size: args.float("voxel-size")?,
            seed: seed(args)?,
            dataset_file,
        })
    }

    fn run(&self) -> Outcome {
        let experiments = load_experiments(&self.dataset_file)?;
        let baseline = read_coordinates(&self.baseline)?;
        let grid = Grid::mni(self.voxel_size);
        let model = AleModel::new(&grid, Kernel::ale(None), &experiments)?;

        let (baseline_voxels, dropped) = voxelize(&grid, &baseline);
        if dropped > 0 {
            warn!(dropped, "baseline coordinates outside the brain bounding box ignored");
        }
        info!(
            experiments = experiments.len(),
            baseline = baseline_voxels.len(),
            n_iters = self.n_iters,
            "running SCALE"
        );

        let (mut rng, seed) = rng_from_seed(self.seed);
        let observed = ale_map(&model.ma_maps(), grid.len());
        let p = baseline_null(&model, &observed, &baseline_voxels, self.n_iters, &mut rng)?;

        let at = |index: usize| grid.index_to_mm(index);
        let z: Vec<f64> = p.iter().map(|p| p_to_z(*p)).collect();
        let significant = p.iter().filter(|p| **p < self.v_thr).count();

        let mut outputs = RunOutputs::create(&self.output_dir, &self.prefix)?;
        outputs.write_entries("ale", observed.iter().map(|(i, v)| (at(*i), *v)))?;
        outputs.write_entries("logp", observed.iter().zip(&p).map(|((i, _), p)| (at(*i), neg_log10(*p))))?;
        outputs.write_entries("z", observed.iter().zip(&z).map(|((i, _), z)| (at(*i), *z)))?;
        outputs.write_entries(
            "z_vthr",
            observed
                .iter()
                .zip(&z)
                .zip(&p)
                .filter(|(_, p)| **p < self.v_thr)
                .map(|(((i, _), z), _)| (at(*i), *z)),
        )?;

        outputs.finish(
            "scale",
            summary(json!({
                "n_experiments": experiments.len(),
                "n_foci": count_foci(&experiments),
                "n_baseline": baseline_voxels.len(),
                "n_iters": self.n_iters,
                "v_thr": self.v_thr,
                "seed": seed,
                "n_significant_voxels": significant,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ArgValue;
    use crate::domain::error::FailureKind;
    use std::fs;
    use tempfile::TempDir;

    const SLEUTH: &str = "// Reference=MNI
// A
// Subjects=20
30 -60 40

// B
// Subjects=20
32 -58 42
";

    fn args(dir: &TempDir, dataset: PathBuf, baseline: PathBuf) -> BoundArgs {
        BoundArgs::new()
            .with("dataset_file", ArgValue::Paths(vec![dataset]))
            .with("baseline", ArgValue::Paths(vec![baseline]))
            .with("output-dir", ArgValue::Paths(vec![dir.path().to_path_buf()]))
            .with("n-iters", ArgValue::Integers(vec![20]))
            .with("v-thr", ArgValue::Floats(vec![0.05]))
            .with("voxel-size", ArgValue::Floats(vec![10.0]))
    }

    #[test]
    fn test_scale_writes_maps() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join("memory.txt");
        let baseline = dir.path().join("baseline.tsv");
        fs::write(&dataset, SLEUTH).unwrap();
        fs::write(&baseline, "x\ty\tz\n-30\t20\t0\n40\t-80\t0\n0\t0\t60\n").unwrap();

        let payload = ScaleWorkflow.invoke(&args(&dir, dataset, baseline)).unwrap();
        assert_eq!(payload["n_baseline"], 3);
        assert_eq!(payload["n_iters"], 20);
        assert!(payload["seed"].is_u64());
        for name in ["memory_ale.tsv", "memory_logp.tsv", "memory_z.tsv", "memory_z_vthr.tsv"] {
            assert!(dir.path().join(name).exists(), "{name}");
        }
    }

    #[test]
    fn test_empty_baseline_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join("memory.txt");
        let baseline = dir.path().join("baseline.tsv");
        fs::write(&dataset, SLEUTH).unwrap();
        fs::write(&baseline, "x y z\n").unwrap();

        let failure = ScaleWorkflow.invoke(&args(&dir, dataset, baseline)).unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInput);
    }
}
