//! Declarative argument schemas owned by workflow units.
//!
//! A schema is a plain list of [`OptionSpec`]s. The dispatcher compiles it to a
//! `clap::Command` for tokenising and type-checking, then binds the matches
//! into [`BoundArgs`] while applying the checks clap does not express itself
//! (numeric ranges, input paths that must exist).

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::cli::args::PROGRAM_NAME;
use crate::domain::error::{NimareError, NimareResult, WorkflowFailure};

/// Value type accepted by an option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Float,
    Flag,
    /// Path that must exist when arguments are bound
    ExistingPath,
    /// Path that the workflow will create
    OutputPath,
}

/// Number of values an option takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    One,
    Exactly(usize),
    AtLeast(usize),
}

/// One option in a workflow's argument schema
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: ValueKind,
    pub required: bool,
    pub positional: bool,
    pub arity: Arity,
    pub defaults: Vec<&'static str>,
    pub range: Option<(Bound<f64>, Bound<f64>)>,
    pub choices: Option<&'static [&'static str]>,
    /// Multiple values must be given in non-decreasing order
    pub ascending: bool,
}

impl OptionSpec {
    /// Required positional argument
    pub fn positional(name: &'static str, kind: ValueKind, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind,
            required: true,
            positional: true,
            arity: Arity::One,
            defaults: Vec::new(),
            range: None,
            choices: None,
            ascending: false,
        }
    }

    /// Optional `--name` option
    pub fn named(name: &'static str, kind: ValueKind, help: &'static str) -> Self {
        Self {
            positional: false,
            required: false,
            ..Self::positional(name, kind, help)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: &'static str) -> Self {
        self.defaults = vec![value];
        self
    }

    pub fn defaults(mut self, values: &[&'static str]) -> Self {
        self.defaults = values.to_vec();
        self
    }

    pub fn arity(mut self, arity: Arity) -> Self {
        self.arity = arity;
        self
    }

    pub fn choices(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn range(mut self, min: Bound<f64>, max: Bound<f64>) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn ascending(mut self) -> Self {
        self.ascending = true;
        self
    }

    pub fn at_least(self, min: f64) -> Self {
        self.range(Bound::Included(min), Bound::Unbounded)
    }

    pub fn positive(self) -> Self {
        self.range(Bound::Excluded(0.0), Bound::Unbounded)
    }

    pub fn between(self, min: f64, max: f64) -> Self {
        self.range(Bound::Included(min), Bound::Included(max))
    }

    /// Open interval `(0, 1)`, for probabilities and thresholds
    pub fn probability(self) -> Self {
        self.range(Bound::Excluded(0.0), Bound::Excluded(1.0))
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name).help(self.help);
        if !self.positional {
            arg = arg.long(self.name);
        }

        arg = match self.kind {
            ValueKind::Flag => return arg.action(ArgAction::SetTrue),
            ValueKind::Integer => arg.value_parser(clap::value_parser!(i64)).value_name("INT"),
            ValueKind::Float => arg.value_parser(clap::value_parser!(f64)).value_name("FLOAT"),
            ValueKind::ExistingPath | ValueKind::OutputPath => arg
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(clap::ValueHint::AnyPath),
            ValueKind::Text => match self.choices {
                Some(choices) => arg.value_parser(PossibleValuesParser::new(choices.iter().copied())),
                None => arg.value_parser(clap::value_parser!(String)),
            },
        };

        arg = match self.arity {
            Arity::One => arg.num_args(1).action(ArgAction::Set),
            Arity::Exactly(n) => arg.num_args(n).action(ArgAction::Set),
            Arity::AtLeast(n) => arg.num_args(n..).action(ArgAction::Append),
        };

        if !self.defaults.is_empty() {
            arg = arg.default_values(self.defaults.iter().copied());
        }

        arg.required(self.required && self.defaults.is_empty())
    }

    fn check_order(&self, command: &str, values: impl Iterator<Item = f64>) -> NimareResult<()> {
        if !self.ascending {
            return Ok(());
        }
        let values: Vec<f64> = values.collect();
        match values.windows(2).find(|pair| pair[0] > pair[1]) {
            Some(pair) => Err(NimareError::ArgumentParse {
                command: command.to_string(),
                message: format!(
                    "values for '{}' must be in ascending order, got {} before {}",
                    self.display_name(),
                    pair[0],
                    pair[1]
                ),
            }),
            None => Ok(()),
        }
    }

    fn check_range(&self, command: &str, value: f64) -> NimareResult<()> {
        let Some((min, max)) = self.range else {
            return Ok(());
        };
        let above = match min {
            Bound::Included(m) => value >= m,
            Bound::Excluded(m) => value > m,
            Bound::Unbounded => true,
        };
        let below = match max {
            Bound::Included(m) => value <= m,
            Bound::Excluded(m) => value < m,
            Bound::Unbounded => true,
        };
        if above && below {
            return Ok(());
        }
        Err(NimareError::ArgumentParse {
            command: command.to_string(),
            message: format!(
                "value {} for '{}' is out of range {}",
                value,
                self.display_name(),
                describe_range(min, max)
            ),
        })
    }

    fn display_name(&self) -> String {
        if self.positional {
            format!("<{}>", self.name)
        } else {
            format!("--{}", self.name)
        }
    }
}

fn describe_range(min: Bound<f64>, max: Bound<f64>) -> String {
    let lower = match min {
        Bound::Included(m) => format!("[{m}"),
        Bound::Excluded(m) => format!("({m}"),
        Bound::Unbounded => "(-inf".to_string(),
    };
    let upper = match max {
        Bound::Included(m) => format!("{m}]"),
        Bound::Excluded(m) => format!("{m})"),
        Bound::Unbounded => "inf)".to_string(),
    };
    format!("{lower}, {upper}")
}

/// Argument schema of one workflow unit
#[derive(Debug, Clone, Default)]
pub struct ArgumentSchema {
    options: Vec<OptionSpec>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn option(mut self, spec: OptionSpec) -> Self {
        self.options.push(spec);
        self
    }

    pub fn options(&self) -> &[OptionSpec] {
        &self.options
    }

    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|spec| spec.name == name)
    }

    /// Compile the schema into a clap command named `nimare <name>`.
    pub fn to_command(&self, name: &'static str, about: &'static str) -> Command {
        self.options.iter().fold(
            Command::new(name)
                .about(about)
                .bin_name(format!("{PROGRAM_NAME} {name}"))
                .no_binary_name(true)
                .disable_version_flag(true),
            |command, spec| command.arg(spec.to_arg()),
        )
    }

    /// Bind parsed matches into typed values, applying range and path checks.
    pub fn bind(&self, command: &str, matches: &ArgMatches) -> NimareResult<BoundArgs> {
        let mut bound = BoundArgs::new();
        for spec in &self.options {
            let value = match spec.kind {
                ValueKind::Flag => Some(ArgValue::Flag(matches.get_flag(spec.name))),
                ValueKind::Integer => {
                    let values: Vec<i64> = collect(command, matches, spec.name)?;
                    for v in &values {
                        spec.check_range(command, *v as f64)?;
                    }
                    spec.check_order(command, values.iter().map(|v| *v as f64))?;
                    non_empty(values).map(ArgValue::Integers)
                }
                ValueKind::Float => {
                    let values: Vec<f64> = collect(command, matches, spec.name)?;
                    for v in &values {
                        spec.check_range(command, *v)?;
                    }
                    spec.check_order(command, values.iter().copied())?;
                    non_empty(values).map(ArgValue::Floats)
                }
                ValueKind::ExistingPath | ValueKind::OutputPath => {
                    let values: Vec<PathBuf> = collect(command, matches, spec.name)?;
                    if spec.kind == ValueKind::ExistingPath {
                        if let Some(missing) = values.iter().find(|p| !p.exists()) {
                            return Err(NimareError::ArgumentParse {
                                command: command.to_string(),
                                message: format!(
                                    "path '{}' given for '{}' does not exist",
                                    missing.display(),
                                    spec.display_name()
                                ),
                            });
                        }
                    }
                    non_empty(values).map(ArgValue::Paths)
                }
                ValueKind::Text => {
                    let values: Vec<String> = collect(command, matches, spec.name)?;
                    non_empty(values).map(ArgValue::Texts)
                }
            };
            if let Some(value) = value {
                bound.insert(spec.name, value);
            }
        }
        Ok(bound)
    }
}

fn collect<T>(command: &str, matches: &ArgMatches, name: &str) -> NimareResult<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    matches
        .try_get_many::<T>(name)
        .map(|values| values.map(|v| v.cloned().collect()).unwrap_or_default())
        .map_err(|err| NimareError::ArgumentParse {
            command: command.to_string(),
            message: err.to_string(),
        })
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

/// A bound, type-checked argument value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Flag(bool),
    Integers(Vec<i64>),
    Floats(Vec<f64>),
    Paths(Vec<PathBuf>),
    Texts(Vec<String>),
}

/// Arguments bound for one invocation, keyed by option name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    values: BTreeMap<&'static str, ArgValue>,
}

impl BoundArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, value: ArgValue) {
        self.values.insert(name, value);
    }

    pub fn with(mut self, name: &'static str, value: ArgValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ArgValue)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ArgValue::Flag(true)))
    }

    pub fn integers(&self, name: &str) -> Result<&[i64], WorkflowFailure> {
        match self.values.get(name) {
            Some(ArgValue::Integers(values)) => Ok(values),
            other => Err(mismatch(name, "integer", other)),
        }
    }

    pub fn integer(&self, name: &str) -> Result<i64, WorkflowFailure> {
        first(name, self.integers(name)?)
    }

    pub fn opt_integer(&self, name: &str) -> Result<Option<i64>, WorkflowFailure> {
        optional(self.contains(name), || self.integer(name))
    }

    pub fn floats(&self, name: &str) -> Result<&[f64], WorkflowFailure> {
        match self.values.get(name) {
            Some(ArgValue::Floats(values)) => Ok(values),
            other => Err(mismatch(name, "float", other)),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64, WorkflowFailure> {
        first(name, self.floats(name)?)
    }

    pub fn opt_float(&self, name: &str) -> Result<Option<f64>, WorkflowFailure> {
        optional(self.contains(name), || self.float(name))
    }

    pub fn paths(&self, name: &str) -> Result<&[PathBuf], WorkflowFailure> {
        match self.values.get(name) {
            Some(ArgValue::Paths(values)) => Ok(values),
            other => Err(mismatch(name, "path", other)),
        }
    }

    pub fn path(&self, name: &str) -> Result<&Path, WorkflowFailure> {
        self.paths(name)?
            .first()
            .map(PathBuf::as_path)
            .ok_or_else(|| missing(name))
    }

    pub fn opt_path(&self, name: &str) -> Result<Option<&Path>, WorkflowFailure> {
        optional(self.contains(name), || self.path(name))
    }

    pub fn texts(&self, name: &str) -> Result<&[String], WorkflowFailure> {
        match self.values.get(name) {
            Some(ArgValue::Texts(values)) => Ok(values),
            other => Err(mismatch(name, "text", other)),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str, WorkflowFailure> {
        self.texts(name)?
            .first()
            .map(String::as_str)
            .ok_or_else(|| missing(name))
    }

    pub fn opt_text(&self, name: &str) -> Result<Option<&str>, WorkflowFailure> {
        optional(self.contains(name), || self.text(name))
    }
}

fn first<T: Copy>(name: &str, values: &[T]) -> Result<T, WorkflowFailure> {
    values.first().copied().ok_or_else(|| missing(name))
}

fn optional<T>(
    present: bool,
    get: impl FnOnce() -> Result<T, WorkflowFailure>,
) -> Result<Option<T>, WorkflowFailure> {
    if present {
        get().map(Some)
    } else {
        Ok(None)
    }
}

fn missing(name: &str) -> WorkflowFailure {
    WorkflowFailure::invalid_input(format!("argument '{name}' was not provided"))
}

fn mismatch(name: &str, expected: &str, found: Option<&ArgValue>) -> WorkflowFailure {
    match found {
        None => missing(name),
        Some(value) => WorkflowFailure::invalid_input(format!(
            "argument '{name}' is not a {expected} value: {value:?}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .option(OptionSpec::positional("input", ValueKind::Text, "Input name"))
            .option(
                OptionSpec::named("n-iters", ValueKind::Integer, "Iterations")
                    .default("100")
                    .at_least(1.0),
            )
            .option(OptionSpec::named("v-thr", ValueKind::Float, "Threshold").probability())
            .option(
                OptionSpec::named("kernel", ValueKind::Text, "Kernel")
                    .choices(&["ALEKernel", "MKDAKernel"])
                    .default("ALEKernel"),
            )
            .option(
                OptionSpec::named("clust-range", ValueKind::Integer, "Range")
                    .arity(Arity::Exactly(2))
                    .defaults(&["2", "10"])
                    .ascending(),
            )
            .option(OptionSpec::named("verbose", ValueKind::Flag, "Verbose"))
    }

    fn parse(args: &[&str]) -> NimareResult<BoundArgs> {
        let schema = schema();
        let matches = schema
            .to_command("test", "test command")
            .try_get_matches_from(args)
            .map_err(|err| NimareError::ArgumentParse {
                command: "test".to_string(),
                message: err.to_string(),
            })?;
        schema.bind("test", &matches)
    }

    #[test]
    fn test_command_is_well_formed() {
        schema().to_command("test", "test command").debug_assert();
    }

    #[test]
    fn test_defaults_are_bound() {
        let args = parse(&["a"]).unwrap();
        assert_eq!(args.text("input").unwrap(), "a");
        assert_eq!(args.integer("n-iters").unwrap(), 100);
        assert_eq!(args.text("kernel").unwrap(), "ALEKernel");
        assert_eq!(args.integers("clust-range").unwrap(), &[2, 10]);
        assert_eq!(args.opt_float("v-thr").unwrap(), None);
        assert!(!args.flag("verbose"));
    }

    #[test]
    fn test_explicit_values_are_bound() {
        let args = parse(&[
            "a",
            "--n-iters",
            "5",
            "--v-thr",
            "0.01",
            "--clust-range",
            "3",
            "4",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(args.integer("n-iters").unwrap(), 5);
        assert_eq!(args.opt_float("v-thr").unwrap(), Some(0.01));
        assert_eq!(args.integers("clust-range").unwrap(), &[3, 4]);
        assert!(args.flag("verbose"));
    }

    #[test]
    fn test_descending_values_are_rejected() {
        let err = parse(&["a", "--clust-range", "5", "3"]).unwrap_err();
        assert!(matches!(err, NimareError::ArgumentParse { .. }));
        assert!(err.to_string().contains("ascending"));
        assert_eq!(parse(&["a", "--clust-range", "4", "4"]).unwrap().integers("clust-range").unwrap(), &[4, 4]);
    }

    #[test]
    fn test_range_violation_is_rejected() {
        let err = parse(&["a", "--n-iters", "0"]).unwrap_err();
        assert!(matches!(err, NimareError::ArgumentParse { .. }));
        assert!(err.to_string().contains("--n-iters"));

        assert!(parse(&["a", "--v-thr", "1.0"]).is_err());
        assert!(parse(&["a", "--v-thr", "0"]).is_err());
    }

    #[test]
    fn test_type_and_choice_violations_are_rejected() {
        assert!(parse(&["a", "--n-iters", "many"]).is_err());
        assert!(parse(&["a", "--kernel", "Gaussian"]).is_err());
        assert!(parse(&["a", "--unknown"]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_missing_input_path_is_rejected() {
        let schema = ArgumentSchema::new().option(OptionSpec::positional(
            "file",
            ValueKind::ExistingPath,
            "Input file",
        ));
        let matches = schema
            .to_command("test", "test command")
            .try_get_matches_from(["/definitely/not/here.txt"])
            .unwrap();
        let err = schema.bind("test", &matches).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_accessor_type_mismatch_is_a_failure() {
        let args = BoundArgs::new().with("n", ArgValue::Integers(vec![1]));
        assert!(args.float("n").is_err());
        assert!(args.path("absent").is_err());
        assert_eq!(args.opt_path("absent").unwrap(), None);
    }
}
