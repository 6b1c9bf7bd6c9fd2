//! Kernels that turn reported peaks into modelled activation maps.

use std::f64::consts::{LN_2, PI};
use std::fmt;

use crate::domain::error::WorkflowFailure;
use crate::stats::grid::Grid;

/// Sparse map: `(voxel index, value)` pairs sorted by index
pub type SparseMap = Vec<(usize, f64)>;

/// Sphere radius of the MKDA and KDA kernels, in millimetres
pub const SPHERE_RADIUS_MM: f64 = 10.0;

/// Largest Gaussian stencil half-width, in voxels
const MAX_HALF_WIDTH: isize = 15;

/// Spatial uncertainty of the ALE kernel for a study of `n` subjects
/// (Eickhoff et al., 2009)
pub fn ale_fwhm(sample_size: usize) -> f64 {
    let scale = (8.0 * LN_2).sqrt() / (2.0 * (2.0 / PI).sqrt());
    let templates = 5.7 * scale;
    let subjects = 11.6 * scale / (sample_size.max(1) as f64).sqrt();
    (templates * templates + subjects * subjects).sqrt()
}

/// Offsets around a peak, each with the value it contributes
#[derive(Debug, Clone, PartialEq)]
pub struct Stencil {
    offsets: Vec<([isize; 3], f64)>,
}

impl Stencil {
    /// Isotropic Gaussian of the given FWHM, normalised to unit mass
    pub fn gaussian(fwhm_mm: f64, voxel_size: f64) -> Self {
        let sigma = fwhm_mm / (8.0 * LN_2).sqrt() / voxel_size;
        let half = ((3.0 * sigma).ceil() as isize).clamp(1, MAX_HALF_WIDTH);

        let mut offsets = Vec::new();
        for di in -half..=half {
            for dj in -half..=half {
                for dk in -half..=half {
                    let r2 = (di * di + dj * dj + dk * dk) as f64;
                    offsets.push(([di, dj, dk], (-r2 / (2.0 * sigma * sigma)).exp()));
                }
            }
        }
        let mass: f64 = offsets.iter().map(|(_, v)| v).sum();
        for (_, value) in &mut offsets {
            *value /= mass;
        }
        offsets.retain(|(_, v)| *v > 0.0);
        Self { offsets }
    }

    /// Gaussian with unit peak height
    pub fn gaussian_peak(fwhm_mm: f64, voxel_size: f64) -> Self {
        let mut stencil = Self::gaussian(fwhm_mm, voxel_size);
        let peak = stencil.peak();
        if peak > 0.0 {
            for (_, value) in &mut stencil.offsets {
                *value /= peak;
            }
        }
        stencil
    }

    /// Binary sphere of `radius_mm`
    pub fn sphere(radius_mm: f64, voxel_size: f64) -> Self {
        let reach = (radius_mm / voxel_size).floor() as isize;
        let limit = radius_mm * radius_mm;
        let mut offsets = Vec::new();
        for di in -reach..=reach {
            for dj in -reach..=reach {
                for dk in -reach..=reach {
                    let r2 = (di * di + dj * dj + dk * dk) as f64 * voxel_size * voxel_size;
                    if r2 <= limit {
                        offsets.push(([di, dj, dk], 1.0));
                    }
                }
            }
        }
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn peak(&self) -> f64 {
        self.offsets.iter().map(|(_, v)| *v).fold(0.0, f64::max)
    }

    pub fn mass(&self) -> f64 {
        self.offsets.iter().map(|(_, v)| v).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &([isize; 3], f64)> {
        self.offsets.iter()
    }
}

/// How overlapping peaks of one experiment combine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    Max,
    Sum,
}

/// Dense scratch buffer that only resets the voxels it touched
#[derive(Debug, Clone)]
pub struct Scratch {
    values: Vec<f64>,
    touched: Vec<usize>,
}

impl Scratch {
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
            touched: Vec::new(),
        }
    }

    fn put(&mut self, index: usize, value: f64, combine: Combine) {
        let slot = &mut self.values[index];
        if *slot == 0.0 {
            self.touched.push(index);
        }
        *slot = match combine {
            Combine::Max => slot.max(value),
            Combine::Sum => *slot + value,
        };
    }

    /// Stamp `stencil` centred on every voxel in `centers`
    pub fn stamp(&mut self, grid: &Grid, centers: &[[usize; 3]], stencil: &Stencil, combine: Combine) {
        for center in centers {
            for (offset, value) in stencil.iter() {
                if let Some(index) = grid.offset(*center, *offset) {
                    self.put(index, *value, combine);
                }
            }
        }
    }

    /// Collect the touched voxels and clear the buffer
    pub fn drain(&mut self) -> SparseMap {
        self.touched.sort_unstable();
        let mut map = Vec::with_capacity(self.touched.len());
        for index in self.touched.drain(..) {
            map.push((index, self.values[index]));
            self.values[index] = 0.0;
        }
        map
    }
}

/// Kernels selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    Ale,
    Mkda,
    Kda,
}

impl KernelKind {
    pub const NAMES: &'static [&'static str] = &["ALEKernel", "MKDAKernel", "KDAKernel"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ALEKernel" => Some(Self::Ale),
            "MKDAKernel" => Some(Self::Mkda),
            "KDAKernel" => Some(Self::Kda),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ale => "ALEKernel",
            Self::Mkda => "MKDAKernel",
            Self::Kda => "KDAKernel",
        }
    }

    pub fn combine(self) -> Combine {
        match self {
            Self::Ale | Self::Mkda => Combine::Max,
            Self::Kda => Combine::Sum,
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A kernel with its parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel {
    pub kind: KernelKind,
    /// Fixed ALE FWHM; derived from sample size when absent
    pub fwhm: Option<f64>,
    pub radius: f64,
}

impl Kernel {
    pub fn new(kind: KernelKind) -> Self {
        Self {
            kind,
            fwhm: None,
            radius: SPHERE_RADIUS_MM,
        }
    }

    pub fn ale(fwhm: Option<f64>) -> Self {
        Self {
            fwhm,
            ..Self::new(KernelKind::Ale)
        }
    }

    /// Stencil for an experiment with `sample_size` subjects
    pub fn stencil(&self, sample_size: Option<usize>, voxel_size: f64) -> Result<Stencil, WorkflowFailure> {
        match self.kind {
            KernelKind::Ale => {
                let fwhm = match (self.fwhm, sample_size) {
                    (Some(fwhm), _) => fwhm,
                    (None, Some(n)) => ale_fwhm(n),
                    (None, None) => {
                        return Err(WorkflowFailure::invalid_input(
                            "the ALE kernel needs a sample size for every experiment, or a fixed --fwhm",
                        ))
                    }
                };
                Ok(Stencil::gaussian(fwhm, voxel_size))
            }
            KernelKind::Mkda | KernelKind::Kda => Ok(Stencil::sphere(self.radius, voxel_size)),
        }
    }

    /// Modelled activation of one experiment
    pub fn modelled_activation(
        &self,
        grid: &Grid,
        centers: &[[usize; 3]],
        stencil: &Stencil,
        scratch: &mut Scratch,
    ) -> SparseMap {
        scratch.stamp(grid, centers, stencil, self.kind.combine());
        scratch.drain()
    }
}

/// Voxels of the foci that fall inside the grid, and how many fell outside
pub fn voxelize(grid: &Grid, foci: &[[f64; 3]]) -> (Vec<[usize; 3]>, usize) {
    let centers: Vec<[usize; 3]> = foci.iter().filter_map(|xyz| grid.voxel_of(*xyz)).collect();
    let dropped = foci.len() - centers.len();
    (centers, dropped)
}
