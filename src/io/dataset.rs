//! JSON coordinate datasets.
//!
//! ```json
//! {
//!   "study-01": {
//!     "contrasts": {
//!       "1": {
//!         "coords": { "space": "MNI", "x": [-30], "y": [22], "z": [4] },
//!         "metadata": { "sample_sizes": [16] }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Contrasts without `coords` are skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::error::WorkflowFailure;
use crate::io::{Experiment, Space};

#[derive(Debug, Deserialize)]
struct StudyEntry {
    #[serde(default)]
    contrasts: BTreeMap<String, ContrastEntry>,
}

#[derive(Debug, Deserialize)]
struct ContrastEntry {
    coords: Option<CoordsEntry>,
    #[serde(default)]
    metadata: MetadataEntry,
}

#[derive(Debug, Deserialize)]
struct CoordsEntry {
    #[serde(default = "default_space")]
    space: String,
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataEntry {
    #[serde(default)]
    sample_sizes: Option<Vec<f64>>,
}

fn default_space() -> String {
    "MNI".to_string()
}

/// Read and parse a JSON dataset file
pub fn read_dataset(path: &Path) -> Result<Vec<Experiment>, WorkflowFailure> {
    let text = fs::read_to_string(path).map_err(|e| WorkflowFailure::read(path, e))?;
    parse_dataset(&text).map_err(|failure| {
        WorkflowFailure::new(
            failure.kind,
            format!("{}: {}", path.display(), failure.message),
        )
    })
}

/// Parse a JSON dataset into experiments with MNI coordinates
pub fn parse_dataset(text: &str) -> Result<Vec<Experiment>, WorkflowFailure> {
    let studies: BTreeMap<String, StudyEntry> = serde_json::from_str(text)
        .map_err(|e| WorkflowFailure::invalid_input(format!("invalid dataset JSON: {}", e)))?;

    let mut experiments = Vec::new();
    for (study, entry) in studies {
        for (contrast, contrast_entry) in entry.contrasts {
            let id = format!("{}-{}", study, contrast);
            let Some(coords) = contrast_entry.coords else {
                warn!(experiment = %id, "contrast has no coordinates, skipping");
                continue;
            };
            let space = Space::parse(&coords.space).ok_or_else(|| {
                WorkflowFailure::invalid_input(format!(
                    "{}: unknown coordinate space '{}'",
                    id, coords.space
                ))
            })?;
            if coords.x.len() != coords.y.len() || coords.x.len() != coords.z.len() {
                return Err(WorkflowFailure::invalid_input(format!(
                    "{}: x, y and z have different lengths",
                    id
                )));
            }
            if coords.x.is_empty() {
                warn!(experiment = %id, "contrast has an empty coordinate list, skipping");
                continue;
            }
            let sample_size = contrast_entry
                .metadata
                .sample_sizes
                .as_deref()
                .map(mean_sample_size)
                .transpose()
                .map_err(|message| WorkflowFailure::invalid_input(format!("{}: {}", id, message)))?;
            let foci = coords
                .x
                .iter()
                .zip(&coords.y)
                .zip(&coords.z)
                .map(|((x, y), z)| space.to_mni([*x, *y, *z]))
                .collect();
            experiments.push(Experiment {
                id,
                sample_size,
                foci,
            });
        }
    }

    if experiments.is_empty() {
        return Err(WorkflowFailure::invalid_input(
            "dataset contains no contrasts with coordinates",
        ));
    }
    debug!(experiments = experiments.len(), "parsed dataset");
    Ok(experiments)
}

/// Rounded mean of the reported sample sizes
fn mean_sample_size(sizes: &[f64]) -> Result<usize, String> {
    if sizes.is_empty() || sizes.iter().any(|n| !n.is_finite() || *n < 1.0) {
        return Err(format!("invalid sample_sizes {:?}", sizes));
    }
    let mean = sizes.iter().sum::<f64>() / sizes.len() as f64;
    Ok(mean.round() as usize)
}
