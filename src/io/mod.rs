//! Input and output formats shared by the workflows.

pub mod dataset;
pub mod maps;
pub mod sleuth;

use std::path::Path;

use crate::domain::error::WorkflowFailure;

pub use dataset::read_dataset;
pub use maps::{read_coordinates, read_map, write_map, RunOutputs};
pub use sleuth::{parse_sleuth, read_sleuth};

/// One contrast of one study: its reported peaks, in MNI millimetres
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub id: String,
    pub sample_size: Option<usize>,
    pub foci: Vec<[f64; 3]>,
}

/// Stereotactic space of reported coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Mni,
    Talairach,
}

/// Lancaster et al. (2007) `icbm_spm2tal`: talairach = M * mni + T
const ICBM_SPM2TAL: [[f64; 3]; 3] = [
    [0.9254, 0.0024, -0.0118],
    [-0.0048, 0.9316, -0.0871],
    [0.0152, 0.0883, 0.8924],
];
const ICBM_SPM2TAL_SHIFT: [f64; 3] = [-1.0207, -1.7667, 4.0926];

impl Space {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mni" => Some(Self::Mni),
            "tal" | "talairach" => Some(Self::Talairach),
            _ => None,
        }
    }

    /// Convert a coordinate in this space to MNI
    pub fn to_mni(self, xyz: [f64; 3]) -> [f64; 3] {
        match self {
            Self::Mni => xyz,
            Self::Talairach => {
                let shifted = [
                    xyz[0] - ICBM_SPM2TAL_SHIFT[0],
                    xyz[1] - ICBM_SPM2TAL_SHIFT[1],
                    xyz[2] - ICBM_SPM2TAL_SHIFT[2],
                ];
                solve3(&ICBM_SPM2TAL, shifted)
            }
        }
    }
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Cramer's rule; `m` is a fixed, well-conditioned affine
fn solve3(m: &[[f64; 3]; 3], b: [f64; 3]) -> [f64; 3] {
    let det = det3(m);
    let mut out = [0.0; 3];
    for (col, value) in out.iter_mut().enumerate() {
        let mut replaced = *m;
        for (row, rhs) in b.iter().enumerate() {
            replaced[row][col] = *rhs;
        }
        *value = det3(&replaced) / det;
    }
    out
}

/// Load experiments from a Sleuth `.txt` file or a JSON dataset
pub fn load_experiments(path: &Path) -> Result<Vec<Experiment>, WorkflowFailure> {
    let is_text = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));
    if is_text {
        read_sleuth(path)
    } else {
        read_dataset(path)
    }
}

/// Total number of foci across experiments
pub fn count_foci(experiments: &[Experiment]) -> usize {
    experiments.iter().map(|e| e.foci.len()).sum()
}
