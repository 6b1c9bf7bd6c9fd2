//! The meta-analysis workflows exposed as `nimare` subcommands.

pub mod ale;
pub mod conperm;
pub mod metacluster;
pub mod peaks2maps;
pub mod scale;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::core::registry::CommandRegistry;
use crate::core::schema::{BoundArgs, OptionSpec, ValueKind};
use crate::domain::error::{NimareResult, WorkflowFailure};
use crate::io::maps::default_prefix;

pub use ale::AleWorkflow;
pub use conperm::ConpermWorkflow;
pub use metacluster::MetaclusterWorkflow;
pub use peaks2maps::Peaks2MapsWorkflow;
pub use scale::ScaleWorkflow;

/// Registry with every workflow, in help-listing order
pub fn build_registry() -> NimareResult<CommandRegistry> {
    let mut builder = CommandRegistry::builder();
    builder
        .register(AleWorkflow)?
        .register(MetaclusterWorkflow)?
        .register(ScaleWorkflow)?
        .register(Peaks2MapsWorkflow)?
        .register(ConpermWorkflow)?;
    Ok(builder.build())
}

fn output_dir_option() -> OptionSpec {
    OptionSpec::named("output-dir", ValueKind::OutputPath, "Directory for the results").default(".")
}

fn prefix_option(name: &'static str) -> OptionSpec {
    OptionSpec::named(name, ValueKind::Text, "Prefix for output file names [default: <input stem>_]")
}

fn n_iters_option(default: &'static str) -> OptionSpec {
    OptionSpec::named("n-iters", ValueKind::Integer, "Number of permutation or Monte-Carlo iterations")
        .default(default)
        .at_least(1.0)
}

fn v_thr_option() -> OptionSpec {
    OptionSpec::named("v-thr", ValueKind::Float, "Voxel-level p-value threshold")
        .default("0.001")
        .probability()
}

fn voxel_size_option() -> OptionSpec {
    OptionSpec::named("voxel-size", ValueKind::Float, "Edge length of a voxel in millimetres")
        .default("2")
        .between(1.0, 20.0)
}

fn seed_option() -> OptionSpec {
    OptionSpec::named("seed", ValueKind::Integer, "Seed for the random number generator").at_least(0.0)
}

/// Non-negative integer argument
fn count(args: &BoundArgs, name: &str) -> Result<usize, WorkflowFailure> {
    let value = args.integer(name)?;
    usize::try_from(value)
        .map_err(|_| WorkflowFailure::invalid_input(format!("'{}' must not be negative, got {}", name, value)))
}

fn seed(args: &BoundArgs) -> Result<Option<u64>, WorkflowFailure> {
    args.opt_integer("seed")?
        .map(|value| {
            u64::try_from(value)
                .map_err(|_| WorkflowFailure::invalid_input(format!("seed must not be negative, got {}", value)))
        })
        .transpose()
}

fn output_dir(args: &BoundArgs) -> Result<PathBuf, WorkflowFailure> {
    args.path("output-dir").map(Path::to_path_buf)
}

fn prefix(args: &BoundArgs, name: &str, input: &Path) -> Result<String, WorkflowFailure> {
    Ok(args
        .opt_text(name)?
        .map(str::to_string)
        .unwrap_or_else(|| default_prefix(input)))
}

/// Object fields of a `json!` summary
fn summary(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
