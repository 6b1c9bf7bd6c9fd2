//! Sleuth coordinate text files.
//!
//! ```text
//! // Reference=MNI
//! // Smith et al., 2001: Working memory > rest
//! // Subjects=16
//! -30  22  4
//! 42   -8  12
//!
//! // Jones et al., 2004: N-back
//! // Subjects=21
//! 8    14  48
//! ```
//!
//! Talairach coordinates are converted to MNI space on load.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::domain::error::WorkflowFailure;
use crate::io::{Experiment, Space};

/// Read and parse a Sleuth file
pub fn read_sleuth(path: &Path) -> Result<Vec<Experiment>, WorkflowFailure> {
    let text = fs::read_to_string(path).map_err(|e| WorkflowFailure::read(path, e))?;
    parse_sleuth(&text).map_err(|failure| {
        WorkflowFailure::new(
            failure.kind,
            format!("{}: {}", path.display(), failure.message),
        )
    })
}

#[derive(Default)]
struct Pending {
    label: Option<String>,
    sample_size: Option<usize>,
    foci: Vec<[f64; 3]>,
    line: usize,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.label.is_none() && self.sample_size.is_none() && self.foci.is_empty()
    }

    fn finish(self, index: usize, space: Space) -> Result<Experiment, WorkflowFailure> {
        let id = self.label.unwrap_or_else(|| format!("experiment-{}", index + 1));
        let sample_size = self.sample_size.ok_or_else(|| {
            WorkflowFailure::invalid_input(format!(
                "experiment '{}' (line {}) has no '// Subjects=' line",
                id, self.line
            ))
        })?;
        if self.foci.is_empty() {
            return Err(WorkflowFailure::invalid_input(format!(
                "experiment '{}' (line {}) has no coordinates",
                id, self.line
            )));
        }
        let foci = self.foci.into_iter().map(|xyz| space.to_mni(xyz)).collect();
        Ok(Experiment {
            id,
            sample_size: Some(sample_size),
            foci,
        })
    }
}

/// Parse Sleuth text into experiments with MNI coordinates
pub fn parse_sleuth(text: &str) -> Result<Vec<Experiment>, WorkflowFailure> {
    let mut space: Option<Space> = None;
    let mut experiments = Vec::new();
    let mut pending = Pending::default();

    for (number, raw) in text.lines().enumerate() {
        let number = number + 1;
        let line = raw.trim();

        if line.is_empty() {
            if !pending.is_empty() {
                let reference = require_space(space, number)?;
                let done = std::mem::take(&mut pending);
                experiments.push(done.finish(experiments.len(), reference)?);
            }
            continue;
        }

        if let Some(comment) = line.strip_prefix("//") {
            let comment = comment.trim();
            if let Some(reference) = value_after(comment, "Reference") {
                space = Some(Space::parse(reference).ok_or_else(|| {
                    WorkflowFailure::invalid_input(format!(
                        "line {}: unknown reference space '{}'",
                        number, reference
                    ))
                })?);
            } else if let Some(subjects) = value_after(comment, "Subjects") {
                let n = subjects.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                    WorkflowFailure::invalid_input(format!(
                        "line {}: invalid subject count '{}'",
                        number, subjects
                    ))
                })?;
                pending.sample_size = Some(n);
            } else {
                if !pending.foci.is_empty() {
                    let reference = require_space(space, number)?;
                    let done = std::mem::take(&mut pending);
                    experiments.push(done.finish(experiments.len(), reference)?);
                }
                if pending.is_empty() {
                    pending.line = number;
                }
                pending.label = Some(match pending.label.take() {
                    Some(previous) => format!("{}; {}", previous, comment),
                    None => comment.to_string(),
                });
            }
            continue;
        }

        if pending.is_empty() {
            pending.line = number;
        }
        pending.foci.push(parse_coordinate(line, number)?);
    }

    if !pending.is_empty() {
        let reference = require_space(space, text.lines().count())?;
        experiments.push(pending.finish(experiments.len(), reference)?);
    }

    if experiments.is_empty() {
        return Err(WorkflowFailure::invalid_input("no experiments found"));
    }
    debug!(experiments = experiments.len(), "parsed sleuth text");
    Ok(experiments)
}

fn require_space(space: Option<Space>, line: usize) -> Result<Space, WorkflowFailure> {
    space.ok_or_else(|| {
        WorkflowFailure::invalid_input(format!(
            "line {}: coordinates appear before a '// Reference=' line",
            line
        ))
    })
}

/// Value of `key=value` (case-insensitive key), if `comment` has that form
fn value_after<'a>(comment: &'a str, key: &str) -> Option<&'a str> {
    let (name, value) = comment.split_once('=')?;
    name.trim().eq_ignore_ascii_case(key).then(|| value.trim())
}

fn parse_coordinate(line: &str, number: usize) -> Result<[f64; 3], WorkflowFailure> {
    let values: Vec<f64> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .map_err(|e| {
            WorkflowFailure::invalid_input(format!("line {}: invalid coordinate '{}': {}", number, line, e))
        })?;
    match values.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(WorkflowFailure::invalid_input(format!(
            "line {}: expected 3 coordinates, found {}",
            number,
            values.len()
        ))),
    }
}
