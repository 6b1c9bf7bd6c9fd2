//! `nimare peaks2maps`: reconstruct unthresholded maps from reported peaks
//! and test them with a sign-flipping permutation test.

use std::path::PathBuf;

use serde_json::json;
use tracing::{info, warn};

use crate::core::schema::{ArgumentSchema, BoundArgs, OptionSpec, ValueKind};
use crate::core::workflow::{Outcome, WorkflowUnit};
use crate::domain::error::WorkflowFailure;
use crate::io::{load_experiments, Experiment, RunOutputs};
use crate::stats::kernel::{voxelize, Combine, Scratch, Stencil};
use crate::stats::{rng_from_seed, Grid};
use crate::workflows::conperm::permutation_test;
use crate::workflows::{
    count, n_iters_option, output_dir, output_dir_option, prefix, prefix_option, seed, seed_option, voxel_size_option,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Peaks2MapsWorkflow;

impl WorkflowUnit for Peaks2MapsWorkflow {
    fn name(&self) -> &'static str {
        "peaks2maps"
    }

    fn about(&self) -> &'static str {
        "Reconstruct statistical maps from peak coordinates and run a permutation test on them"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .option(OptionSpec::positional(
                "sleuth_file",
                ValueKind::ExistingPath,
                "Sleuth text file with one experiment per reconstructed map",
            ))
            .option(output_dir_option())
            .option(prefix_option("prefix"))
            .option(n_iters_option("10000"))
            .option(
                OptionSpec::named("fwhm", ValueKind::Float, "FWHM in mm of the interpolation kernel")
                    .default("10")
                    .positive(),
            )
            .option(voxel_size_option())
            .option(seed_option())
    }

    fn invoke(&self, args: &BoundArgs) -> Outcome {
        Peaks2MapsParams::from_args(args)?.run()
    }
}

#[derive(Debug, Clone)]
struct Peaks2MapsParams {
    sleuth_file: PathBuf,
    output_dir: PathBuf,
    prefix: String,
    n_iters: usize,
    fwhm: f64,
    voxel_size: f64,
    seed: Option<u64>,
}

impl Peaks2MapsParams {
    fn from_args(args: &BoundArgs) -> Result<Self, WorkflowFailure> {
        let sleuth_file = args.path("sleuth_file")?.to_path_buf();
        Ok(Self {
            prefix: prefix(args, "prefix", &sleuth_file)?,
            output_dir: output_dir(args)?,
            n_iters: count(args, "n-iters")?,
            fwhm: args.float("fwhm")?,
            voxel_size: args.float("voxel-size")?,
            seed: seed(args)?,
            sleuth_file,
        })
    }

    fn run(&self) -> Outcome {
        let experiments = load_experiments(&self.sleuth_file)?;
        if experiments.len() < 2 {
            return Err(WorkflowFailure::invalid_input(format!(
                "{} experiment(s) found; the permutation test needs at least two",
                experiments.len()
            )));
        }
        let grid = Grid::mni(self.voxel_size);
        let maps = reconstruct(&grid, &experiments, self.fwhm);
        info!(maps = maps.len(), fwhm = self.fwhm, "reconstructed maps from peaks");

        let (mut rng, seed) = rng_from_seed(self.seed);
        let mut outputs = RunOutputs::create(&self.output_dir, &self.prefix)?;
        let mut map_files = Vec::with_capacity(maps.len());
        for (number, map) in maps.iter().enumerate() {
            let path = outputs.write_entries(&format!("map-{:03}", number + 1), map.iter().copied())?;
            map_files.push(json!({
                "experiment": experiments[number].id,
                "map": path.display().to_string(),
            }));
        }

        let mut fields = permutation_test(&mut outputs, &maps, self.n_iters, &mut rng)?;
        fields.insert("seed".to_string(), json!(seed));
        fields.insert("fwhm".to_string(), json!(self.fwhm));
        fields.insert("maps".to_string(), json!(map_files));
        outputs.finish("peaks2maps", fields)
    }
}

/// One map per experiment: the largest unit-height Gaussian over its peaks
fn reconstruct(grid: &Grid, experiments: &[Experiment], fwhm: f64) -> Vec<Vec<([f64; 3], f64)>> {
    let stencil = Stencil::gaussian_peak(fwhm, grid.voxel_size());
    let mut scratch = Scratch::new(grid.len());
    experiments
        .iter()
        .map(|experiment| {
            let (centers, dropped) = voxelize(grid, &experiment.foci);
            if dropped > 0 {
                warn!(experiment = %experiment.id, dropped, "peaks outside the brain bounding box ignored");
            }
            scratch.stamp(grid, &centers, &stencil, Combine::Max);
            scratch
                .drain()
                .into_iter()
                .map(|(index, value)| (grid.index_to_mm(index), value))
                .collect()
        })
        .collect()
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
// Subjects=12
20 20 20

// B
// Subjects=14
22 18 20

// C
// Subjects=10
20 22 18
";

    fn args(dir: &TempDir, input: PathBuf) -> BoundArgs {
        BoundArgs::new()
            .with("sleuth_file", ArgValue::Paths(vec![input]))
            .with("output-dir", ArgValue::Paths(vec![dir.path().to_path_buf()]))
            .with("n-iters", ArgValue::Integers(vec![50]))
            .with("fwhm", ArgValue::Floats(vec![10.0]))
            .with("voxel-size", ArgValue::Floats(vec![8.0]))
            .with("seed", ArgValue::Integers(vec![2]))
    }

    #[test]
    fn test_reconstruct_peaks_at_foci() {
        let grid = Grid::mni(8.0);
        let experiments = vec![Experiment {
            id: "a".to_string(),
            sample_size: None,
            foci: vec![[20.0, 20.0, 20.0]],
        }];
        let maps = reconstruct(&grid, &experiments, 10.0);
        let peak = maps[0].iter().fold(([0.0; 3], 0.0), |b, n| if n.1 > b.1 { *n } else { b });
        assert_eq!(peak.1, 1.0);
        assert_eq!(Some(peak.0), grid.voxel_of([20.0, 20.0, 20.0]).map(|v| grid.to_mm(v)));
    }

    #[test]
    fn test_writes_one_map_per_experiment() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("peaks.txt");
        fs::write(&input, SLEUTH).unwrap();

        let payload = Peaks2MapsWorkflow.invoke(&args(&dir, input)).unwrap();
        assert_eq!(payload["n_maps"], 3);
        assert_eq!(payload["maps"].as_array().unwrap().len(), 3);
        assert!(dir.path().join("peaks_map-001.tsv").exists());
        assert!(dir.path().join("peaks_t.tsv").exists());
    }

    #[test]
    fn test_single_experiment_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("peaks.txt");
        fs::write(&input, "// Reference=MNI\n// A\n// Subjects=12\n20 20 20\n").unwrap();
        let failure = Peaks2MapsWorkflow.invoke(&args(&dir, input)).unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInput);
    }
}
