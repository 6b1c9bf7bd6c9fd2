//! `nimare metacluster`: group experiments by the similarity of their
//! modelled activation maps.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde_json::json;
use tracing::{info, warn};

use crate::core::schema::{ArgumentSchema, Arity, BoundArgs, OptionSpec, ValueKind};
use crate::core::workflow::{Outcome, WorkflowUnit};
use crate::domain::error::WorkflowFailure;
use crate::io::{count_foci, load_experiments, RunOutputs};
use crate::stats::ale::AleModel;
use crate::stats::kmeans::kmeans;
use crate::stats::{rng_from_seed, Grid, Kernel, KernelKind, SparseMap};
use crate::workflows::{output_dir, output_dir_option, prefix, prefix_option, seed, seed_option, summary, voxel_size_option};

const ALGORITHMS: &[&str] = &["kmeans"];

#[derive(Debug, Clone, Copy, Default)]
pub struct MetaclusterWorkflow;

impl WorkflowUnit for MetaclusterWorkflow {
    fn name(&self) -> &'static str {
        "metacluster"
    }

    fn about(&self) -> &'static str {
        "Cluster experiments of a coordinate dataset by their modelled activation maps"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .option(OptionSpec::positional(
                "dataset_file",
                ValueKind::ExistingPath,
                "Coordinate dataset (JSON, or Sleuth text with a .txt extension)",
            ))
            .option(output_dir_option())
            .option(prefix_option("output-prefix"))
            .option(
                OptionSpec::named("kernel", ValueKind::Text, "Kernel used to model activation")
                    .choices(KernelKind::NAMES)
                    .default("ALEKernel"),
            )
            .option(
                OptionSpec::named("algorithm", ValueKind::Text, "Clustering algorithm")
                    .choices(ALGORITHMS)
                    .default("kmeans"),
            )
            .option(
                OptionSpec::named("clust-range", ValueKind::Integer, "Smallest and largest number of clusters")
                    .arity(Arity::Exactly(2))
                    .defaults(&["2", "10"])
                    .at_least(2.0)
                    .ascending(),
            )
            .option(voxel_size_option())
            .option(seed_option())
    }

    fn invoke(&self, args: &BoundArgs) -> Outcome {
        MetaclusterParams::from_args(args)?.run()
    }
}

#[derive(Debug, Clone)]
struct MetaclusterParams {
    dataset_file: PathBuf,
    output_dir: PathBuf,
    prefix: String,
    kernel: KernelKind,
    k_min: usize,
    k_max: usize,
    voxel_size: f64,
    seed: Option<u64>,
}

impl MetaclusterParams {
    fn from_args(args: &BoundArgs) -> Result<Self, WorkflowFailure> {
        let dataset_file = args.path("dataset_file")?.to_path_buf();
        let kernel_name = args.text("kernel")?;
        let kernel = KernelKind::parse(kernel_name)
            .ok_or_else(|| WorkflowFailure::invalid_input(format!("unknown kernel '{}'", kernel_name)))?;
        let algorithm = args.text("algorithm")?;
        if !ALGORITHMS.contains(&algorithm) {
            return Err(WorkflowFailure::invalid_input(format!(
                "unknown clustering algorithm '{}'",
                algorithm
            )));
        }

        let (k_min, k_max) = match args.integers("clust-range")? {
            [low, high] => (*low, *high),
            other => {
                return Err(WorkflowFailure::invalid_input(format!(
                    "--clust-range takes two values, got {}",
                    other.len()
                )))
            }
        };
        let to_usize = |k: i64| {
            usize::try_from(k).map_err(|_| WorkflowFailure::invalid_input(format!("invalid cluster count {}", k)))
        };

        Ok(Self {
            prefix: prefix(args, "output-prefix", &dataset_file)?,
            output_dir: output_dir(args)?,
            kernel,
            k_min: to_usize(k_min)?,
            k_max: to_usize(k_max)?,
            voxel_size: args.float("voxel-size")?,
            seed: seed(args)?,
            dataset_file,
        })
    }

    fn run(&self) -> Outcome {
        let experiments = load_experiments(&self.dataset_file)?;
        let feasible: Vec<usize> = (self.k_min..=self.k_max).filter(|k| *k <= experiments.len()).collect();
        if feasible.len() < (self.k_max + 1).saturating_sub(self.k_min) {
            warn!(
                experiments = experiments.len(),
                k_max = self.k_max,
                "cluster counts above the number of experiments are skipped"
            );
        }
        if feasible.is_empty() {
            return Err(WorkflowFailure::invalid_input(format!(
                "{} experiments cannot form {} or more clusters",
                experiments.len(),
                self.k_min
            )));
        }

        let grid = Grid::mni(self.voxel_size);
        let model = AleModel::new(&grid, Kernel::new(self.kernel), &experiments)?;
        let features = dense_features(&model.ma_maps());
        info!(
            experiments = experiments.len(),
            features = features.first().map_or(0, Vec::len),
            kernel = %self.kernel,
            "clustering modelled activation maps"
        );

        let (mut rng, seed) = rng_from_seed(self.seed);
        let mut outputs = RunOutputs::create(&self.output_dir, &self.prefix)?;
        let mut solutions = Vec::new();
        for k in feasible {
            let fit = kmeans(&features, k, &mut rng)?;
            let rows = experiments
                .iter()
                .zip(&fit.labels)
                .map(|(experiment, label)| vec![experiment.id.clone(), (label + 1).to_string()]);
            let path = outputs.write_table(&format!("k-{k}_labels"), &["experiment", "cluster"], rows)?;
            solutions.push(json!({
                "k": k,
                "inertia": fit.inertia,
                "labels": path.display().to_string(),
            }));
        }

        outputs.finish(
            "metacluster",
            summary(json!({
                "kernel": self.kernel.name(),
                "algorithm": "kmeans",
                "n_experiments": experiments.len(),
                "n_foci": count_foci(&experiments),
                "seed": seed,
                "solutions": solutions,
            })),
        )
    }
}

/// Dense experiment × voxel matrix over the voxels any map touches
fn dense_features(maps: &[SparseMap]) -> Vec<Vec<f64>> {
    let support: Vec<usize> = maps
        .iter()
        .flat_map(|map| map.iter().map(|(index, _)| *index))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    maps.iter()
        .map(|map| {
            let mut row = vec![0.0; support.len()];
            for (index, value) in map {
                if let Ok(column) = support.binary_search(index) {
                    row[column] = *value;
                }
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::{Dispatcher, InvocationState};
    use crate::core::schema::ArgValue;
    use crate::domain::error::FailureKind;
    use crate::domain::exit;
    use crate::workflows::build_registry;
    use std::fs;
    use tempfile::TempDir;

    fn dataset() -> String {
        let mut studies = serde_json::Map::new();
        for (i, x) in [-40.0, -42.0, -38.0, 40.0, 42.0, 38.0].iter().enumerate() {
            studies.insert(
                format!("study-{i}"),
                json!({
                    "contrasts": {
                        "1": {
                            "coords": { "space": "MNI", "x": [x], "y": [0.0], "z": [20.0] },
                            "metadata": { "sample_sizes": [20] }
                        }
                    }
                }),
            );
        }
        serde_json::Value::Object(studies).to_string()
    }

    fn args(dir: &TempDir, input: PathBuf, range: [i64; 2]) -> BoundArgs {
        BoundArgs::new()
            .with("dataset_file", ArgValue::Paths(vec![input]))
            .with("output-dir", ArgValue::Paths(vec![dir.path().to_path_buf()]))
            .with("kernel", ArgValue::Texts(vec!["MKDAKernel".to_string()]))
            .with("algorithm", ArgValue::Texts(vec!["kmeans".to_string()]))
            .with("clust-range", ArgValue::Integers(range.to_vec()))
            .with("voxel-size", ArgValue::Floats(vec![4.0]))
            .with("seed", ArgValue::Integers(vec![9]))
    }

    #[test]
    fn test_two_hemispheres_split() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("studies.json");
        fs::write(&input, dataset()).unwrap();

        let payload = MetaclusterWorkflow.invoke(&args(&dir, input, [2, 8])).unwrap();
        let solutions = payload["solutions"].as_array().unwrap();
        assert_eq!(solutions.len(), 5);
        assert_eq!(solutions[0]["k"], 2);

        let labels = fs::read_to_string(dir.path().join("studies_k-2_labels.tsv")).unwrap();
        let clusters: Vec<&str> = labels.lines().skip(1).map(|l| l.split('\t').nth(1).unwrap()).collect();
        assert_eq!(clusters.len(), 6);
        assert_eq!(clusters[0], clusters[1]);
        assert_eq!(clusters[0], clusters[2]);
        assert_eq!(clusters[3], clusters[4]);
        assert_ne!(clusters[0], clusters[3]);
    }

    #[test]
    fn test_infeasible_range_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("studies.json");
        fs::write(&input, dataset()).unwrap();

        let failure = MetaclusterWorkflow.invoke(&args(&dir, input, [7, 9])).unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn test_reversed_range_stops_before_invocation() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("studies.json");
        fs::write(&input, dataset()).unwrap();
        let input = input.display().to_string();
        let out = dir.path().join("out");
        let out_arg = out.display().to_string();

        let dispatcher = Dispatcher::new(build_registry().unwrap());
        let invocation = dispatcher.run([
            "metacluster",
            input.as_str(),
            "--output-dir",
            out_arg.as_str(),
            "--clust-range",
            "5",
            "3",
        ]);
        assert_eq!(invocation.state(), InvocationState::ArgParseFailed);
        assert_eq!(invocation.exit_code(), exit::USAGE);
        assert!(invocation.error().unwrap().to_string().contains("--clust-range"));
        assert!(!out.exists());
    }

    #[test]
    fn test_dense_features_share_columns() {
        let maps = vec![vec![(3, 1.0), (9, 2.0)], vec![(9, 4.0)]];
        assert_eq!(dense_features(&maps), vec![vec![1.0, 2.0], vec![0.0, 4.0]]);
    }
}
