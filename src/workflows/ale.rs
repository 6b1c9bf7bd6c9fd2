//! `nimare ale`: coordinate-based ALE meta-analysis of Sleuth files.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::info;

use crate::core::schema::{ArgumentSchema, BoundArgs, OptionSpec, ValueKind};
use crate::core::workflow::{Outcome, WorkflowUnit};
use crate::domain::error::WorkflowFailure;
use crate::io::{count_foci, load_experiments, Experiment, RunOutputs};
use crate::stats::ale::{self, AleAnalysis, AleModel, CLUSTER_ALPHA};
use crate::stats::{rng_from_seed, Grid, Kernel};
use crate::workflows::{
    count, n_iters_option, output_dir, output_dir_option, prefix, prefix_option, seed, seed_option, summary,
    v_thr_option, voxel_size_option,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct AleWorkflow;

impl WorkflowUnit for AleWorkflow {
    fn name(&self) -> &'static str {
        "ale"
    }

    fn about(&self) -> &'static str {
        "Run an activation likelihood estimation (ALE) on a Sleuth text file, or a subtraction analysis of two"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .option(OptionSpec::positional(
                "sleuth_file",
                ValueKind::ExistingPath,
                "Sleuth text file with the coordinates of the first dataset",
            ))
            .option(OptionSpec::named(
                "sleuth-file2",
                ValueKind::ExistingPath,
                "Optional second Sleuth file; triggers a subtraction analysis",
            ))
            .option(output_dir_option())
            .option(prefix_option("prefix"))
            .option(n_iters_option("10000"))
            .option(v_thr_option())
            .option(
                OptionSpec::named(
                    "fwhm",
                    ValueKind::Float,
                    "Fixed kernel FWHM in mm [default: derived from each experiment's sample size]",
                )
                .positive(),
            )
            .option(voxel_size_option())
            .option(seed_option())
    }

    fn invoke(&self, args: &BoundArgs) -> Outcome {
        AleParams::from_args(args)?.run()
    }
}

#[derive(Debug, Clone)]
struct AleParams {
    sleuth_file: PathBuf,
    sleuth_file2: Option<PathBuf>,
    output_dir: PathBuf,
    prefix: String,
    n_iters: usize,
    v_thr: f64,
    fwhm: Option<f64>,
    voxel_size: f64,
    seed: Option<u64>,
}

impl AleParams {
    fn from_args(args: &BoundArgs) -> Result<Self, WorkflowFailure> {
        let sleuth_file = args.path("sleuth_file")?.to_path_buf();
        Ok(Self {
            prefix: prefix(args, "prefix", &sleuth_file)?,
            sleuth_file2: args.opt_path("sleuth-file2")?.map(Path::to_path_buf),
            output_dir: output_dir(args)?,
            n_iters: count(args, "n-iters")?,
            v_thr: args.float("v-thr")?,
            fwhm: args.opt_float("fwhm")?,
            voxel_size: args.float("voxel-size")?,
            seed: seed(args)?,
            sleuth_file,
        })
    }

    fn run(&self) -> Outcome {
        let first = load_experiments(&self.sleuth_file)?;
        let second = self.sleuth_file2.as_deref().map(load_experiments).transpose()?;
        let grid = Grid::mni(self.voxel_size);
        let kernel = Kernel::ale(self.fwhm);
        let (mut rng, seed) = rng_from_seed(self.seed);
        let mut outputs = RunOutputs::create(&self.output_dir, &self.prefix)?;

        let Some(second) = second else {
            info!(experiments = first.len(), foci = count_foci(&first), n_iters = self.n_iters, "running ALE");
            let model = AleModel::new(&grid, kernel, &first)?;
            let analysis = ale::analyze(&model, self.v_thr, self.n_iters, &mut rng);
            write_analysis(&mut outputs, &grid, "", &analysis)?;
            let mut fields = summary(json!({
                "seed": seed,
                "n_iters": self.n_iters,
                "v_thr": self.v_thr,
                "voxel_size": self.voxel_size,
            }));
            fields.extend(describe("", &first, &analysis));
            return outputs.finish("ale", fields);
        };

        info!(
            first = first.len(),
            second = second.len(),
            n_iters = self.n_iters,
            "running ALE subtraction"
        );
        let first_model = AleModel::new(&grid, kernel, &first)?;
        let second_model = AleModel::new(&grid, kernel, &second)?;
        let first_analysis = ale::analyze(&first_model, self.v_thr, self.n_iters, &mut rng);
        let second_analysis = ale::analyze(&second_model, self.v_thr, self.n_iters, &mut rng);
        write_analysis(&mut outputs, &grid, "group1_", &first_analysis)?;
        write_analysis(&mut outputs, &grid, "group2_", &second_analysis)?;

        let subtraction = ale::subtraction(&first_model, &second_model, self.n_iters, &mut rng);
        outputs.write_entries("group1MinusGroup2_ale", mm(&grid, &subtraction.difference))?;
        outputs.write_entries("group1MinusGroup2_z", mm(&grid, &subtraction.z))?;

        let mut fields = summary(json!({
            "seed": seed,
            "n_iters": self.n_iters,
            "v_thr": self.v_thr,
            "voxel_size": self.voxel_size,
            "subtraction_voxels": subtraction.difference.len(),
        }));
        fields.extend(describe("group1_", &first, &first_analysis));
        fields.extend(describe("group2_", &second, &second_analysis));
        outputs.finish("ale", fields)
    }
}

fn mm<'a>(grid: &'a Grid, map: &'a [(usize, f64)]) -> impl Iterator<Item = ([f64; 3], f64)> + 'a {
    map.iter().map(|(index, value)| (grid.index_to_mm(*index), *value))
}

fn write_analysis(
    outputs: &mut RunOutputs,
    grid: &Grid,
    group: &str,
    analysis: &AleAnalysis,
) -> Result<(), WorkflowFailure> {
    outputs.write_entries(&format!("{group}ale"), mm(grid, &analysis.ale))?;
    outputs.write_entries(&format!("{group}z"), mm(grid, &analysis.z))?;
    outputs.write_entries(
        &format!("{group}logp_level-voxel_corr-FWE"),
        mm(grid, &analysis.logp_voxel_fwe),
    )?;
    outputs.write_entries(
        &format!("{group}z_level-cluster_corr-FWE"),
        mm(grid, &analysis.z_cluster_fwe),
    )?;

    let rows = analysis.clusters.iter().enumerate().map(|(number, cluster)| {
        let [x, y, z] = grid.index_to_mm(cluster.peak);
        vec![
            (number + 1).to_string(),
            cluster.voxels.len().to_string(),
            x.to_string(),
            y.to_string(),
            z.to_string(),
            format!("{:.6}", cluster.peak_ale),
            format!("{:.6}", cluster.p_fwe),
        ]
    });
    outputs.write_table(
        &format!("{group}clusters"),
        &["cluster", "size", "peak_x", "peak_y", "peak_z", "peak_ale", "p_fwe"],
        rows,
    )?;
    Ok(())
}

fn describe(group: &str, experiments: &[Experiment], analysis: &AleAnalysis) -> Map<String, Value> {
    let max_ale = analysis.ale.iter().map(|(_, v)| *v).fold(0.0, f64::max);
    let mut fields = Map::new();
    fields.insert(format!("{group}n_experiments"), json!(experiments.len()));
    fields.insert(format!("{group}n_foci"), json!(count_foci(experiments)));
    fields.insert(format!("{group}max_ale"), json!(max_ale));
    fields.insert(format!("{group}cluster_forming_ale"), json!(analysis.cluster_threshold));
    fields.insert(format!("{group}n_clusters"), json!(analysis.clusters.len()));
    fields.insert(format!("{group}n_clusters_fwe"), json!(analysis.significant_clusters()));
    fields.insert("cluster_alpha".to_string(), json!(CLUSTER_ALPHA));
    fields
}
