//! Activation likelihood estimation.
//!
//! An ALE map is the voxel-wise union `1 - prod(1 - MA_i)` of the modelled
//! activation maps of all experiments. Voxel-wise p-values come from the
//! analytic null obtained by convolving the per-experiment MA histograms;
//! family-wise error control comes from Monte-Carlo relocation of foci.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::domain::error::WorkflowFailure;
use crate::io::Experiment;
use crate::stats::grid::Grid;
use crate::stats::kernel::{voxelize, Kernel, Scratch, SparseMap, Stencil};
use crate::stats::normal::{neg_log10, p_to_z};
use crate::stats::exceedance_p;

/// Width of a histogram bin of the analytic null
pub const HISTOGRAM_STEP: f64 = 1e-4;
const HISTOGRAM_BINS: usize = 10_001;

/// Cluster-level FWE alpha used for the corrected maps
pub const CLUSTER_ALPHA: f64 = 0.05;

fn bin(value: f64) -> usize {
    ((value / HISTOGRAM_STEP).round().max(0.0) as usize).min(HISTOGRAM_BINS - 1)
}

/// Running voxel-wise union of MA maps
#[derive(Debug, Clone)]
pub struct Union {
    complement: Vec<f64>,
    touched: Vec<usize>,
}

impl Union {
    pub fn new(len: usize) -> Self {
        Self {
            complement: vec![1.0; len],
            touched: Vec::new(),
        }
    }

    pub fn add(&mut self, map: &[(usize, f64)]) {
        for &(index, value) in map {
            let slot = &mut self.complement[index];
            if *slot == 1.0 {
                self.touched.push(index);
            }
            *slot *= 1.0 - value.clamp(0.0, 1.0);
        }
    }

    /// ALE values of the touched voxels; resets the accumulator
    pub fn finish(&mut self) -> SparseMap {
        self.touched.sort_unstable();
        self.touched.dedup();
        let mut map = Vec::with_capacity(self.touched.len());
        for index in self.touched.drain(..) {
            let ale = 1.0 - self.complement[index];
            if ale > 0.0 {
                map.push((index, ale));
            }
            self.complement[index] = 1.0;
        }
        map
    }
}

/// ALE union of a set of MA maps
pub fn ale_map(maps: &[SparseMap], len: usize) -> SparseMap {
    let mut union = Union::new(len);
    for map in maps {
        union.add(map);
    }
    union.finish()
}

/// Analytic null distribution of ALE values
#[derive(Debug, Clone)]
pub struct NullDistribution {
    survival: Vec<f64>,
}

impl NullDistribution {
    /// Convolve the MA histograms of the experiments over `n_voxels` voxels
    pub fn from_maps(maps: &[SparseMap], n_voxels: usize) -> Self {
        let mut null = vec![0.0; HISTOGRAM_BINS];
        null[0] = 1.0;

        for map in maps {
            let mut counts: HashMap<usize, f64> = HashMap::new();
            for &(_, value) in map {
                *counts.entry(bin(value)).or_default() += 1.0;
            }
            let zeros = n_voxels.saturating_sub(map.len()) as f64;
            *counts.entry(0).or_default() += zeros;
            let total: f64 = counts.values().sum();
            let histogram: Vec<(f64, f64)> = counts
                .into_iter()
                .filter(|(_, count)| *count > 0.0)
                .map(|(b, count)| (b as f64 * HISTOGRAM_STEP, count / total))
                .collect();

            let mut next = vec![0.0; HISTOGRAM_BINS];
            for (a, pa) in null.iter().enumerate().filter(|(_, p)| **p > 0.0) {
                let keep = 1.0 - a as f64 * HISTOGRAM_STEP;
                for (value, pb) in &histogram {
                    next[bin(1.0 - keep * (1.0 - value))] += pa * pb;
                }
            }
            null = next;
        }

        let mut survival = vec![0.0; HISTOGRAM_BINS];
        let mut tail = 0.0;
        for index in (0..HISTOGRAM_BINS).rev() {
            tail += null[index];
            survival[index] = tail.min(1.0);
        }
        Self { survival }
    }

    /// Probability of an ALE value at least this large under the null
    pub fn p_value(&self, ale: f64) -> f64 {
        self.survival[bin(ale)].max(f64::MIN_POSITIVE)
    }

    /// Smallest ALE value whose p-value is below `alpha`
    pub fn threshold(&self, alpha: f64) -> f64 {
        self.survival
            .iter()
            .position(|p| *p < alpha)
            .map(|b| b as f64 * HISTOGRAM_STEP)
            .unwrap_or(f64::INFINITY)
    }
}

/// Foci of a set of experiments placed on a grid with their kernels
#[derive(Debug, Clone)]
pub struct AleModel<'g> {
    grid: &'g Grid,
    kernel: Kernel,
    stencils: Vec<Stencil>,
    centers: Vec<Vec<[usize; 3]>>,
}

impl<'g> AleModel<'g> {
    pub fn new(grid: &'g Grid, kernel: Kernel, experiments: &[Experiment]) -> Result<Self, WorkflowFailure> {
        let mut stencils = Vec::with_capacity(experiments.len());
        let mut centers = Vec::with_capacity(experiments.len());
        for experiment in experiments {
            let stencil = kernel
                .stencil(experiment.sample_size, grid.voxel_size())
                .map_err(|f| WorkflowFailure::new(f.kind, format!("{}: {}", experiment.id, f.message)))?;
            let (inside, dropped) = voxelize(grid, &experiment.foci);
            if dropped > 0 {
                warn!(experiment = %experiment.id, dropped, "foci outside the brain bounding box ignored");
            }
            stencils.push(stencil);
            centers.push(inside);
        }
        if centers.iter().all(Vec::is_empty) {
            return Err(WorkflowFailure::invalid_input(
                "no foci fall inside the brain bounding box",
            ));
        }
        Ok(Self {
            grid,
            kernel,
            stencils,
            centers,
        })
    }

    pub fn grid(&self) -> &Grid {
        self.grid
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn n_experiments(&self) -> usize {
        self.centers.len()
    }

    pub fn n_foci(&self) -> usize {
        self.centers.iter().map(Vec::len).sum()
    }

    /// Modelled activation map of every experiment
    pub fn ma_maps(&self) -> Vec<SparseMap> {
        let mut scratch = Scratch::new(self.grid.len());
        self.stencils
            .iter()
            .zip(&self.centers)
            .map(|(stencil, centers)| self.kernel.modelled_activation(self.grid, centers, stencil, &mut scratch))
            .collect()
    }

    /// ALE map with every focus replaced by `draw(rng)`
    fn relocated<R, F>(&self, union: &mut Union, scratch: &mut Scratch, rng: &mut R, mut draw: F) -> SparseMap
    where
        R: Rng,
        F: FnMut(&mut R) -> [usize; 3],
    {
        let mut moved = Vec::new();
        for (stencil, centers) in self.stencils.iter().zip(&self.centers) {
            moved.clear();
            for _ in 0..centers.len() {
                moved.push(draw(rng));
            }
            union.add(&self.kernel.modelled_activation(self.grid, &moved, stencil, scratch));
        }
        union.finish()
    }
}

/// Maxima of relocated ALE maps
#[derive(Debug, Clone, Default)]
pub struct FweNull {
    pub max_ale: Vec<f64>,
    pub max_cluster: Vec<usize>,
}

/// Monte-Carlo maxima with foci drawn uniformly from the grid
pub fn monte_carlo<R: Rng>(model: &AleModel<'_>, cluster_threshold: f64, n_iters: usize, rng: &mut R) -> FweNull {
    let grid = model.grid();
    let mut union = Union::new(grid.len());
    let mut scratch = Scratch::new(grid.len());
    let mut null = FweNull::default();
    for _ in 0..n_iters {
        let map = model.relocated(&mut union, &mut scratch, rng, |rng| grid.ijk(rng.gen_range(0..grid.len())));
        null.max_ale.push(map.iter().map(|(_, v)| *v).fold(0.0, f64::max));
        let members: Vec<usize> = map.iter().filter(|(_, v)| *v >= cluster_threshold).map(|(i, _)| *i).collect();
        null.max_cluster.push(grid.clusters(&members).first().map_or(0, Vec::len));
    }
    null
}

/// A supra-threshold cluster of an ALE map
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub voxels: Vec<usize>,
    pub peak: usize,
    pub peak_ale: f64,
    pub p_fwe: f64,
}

/// Everything a single-dataset ALE produces
#[derive(Debug, Clone)]
pub struct AleAnalysis {
    pub ale: SparseMap,
    pub z: SparseMap,
    pub logp_voxel_fwe: SparseMap,
    pub z_cluster_fwe: SparseMap,
    pub cluster_threshold: f64,
    pub clusters: Vec<Cluster>,
}

impl AleAnalysis {
    pub fn significant_clusters(&self) -> usize {
        self.clusters.iter().filter(|c| c.p_fwe < CLUSTER_ALPHA).count()
    }
}

/// ALE with analytic voxel-wise inference and Monte-Carlo FWE correction
pub fn analyze<R: Rng>(model: &AleModel<'_>, v_thr: f64, n_iters: usize, rng: &mut R) -> AleAnalysis {
    let grid = model.grid();
    let maps = model.ma_maps();
    let ale = ale_map(&maps, grid.len());
    let null = NullDistribution::from_maps(&maps, grid.len());
    let cluster_threshold = null.threshold(v_thr);
    debug!(voxels = ale.len(), cluster_threshold, "computed ALE map");

    let fwe = monte_carlo(model, cluster_threshold, n_iters, rng);

    let z = ale.iter().map(|&(i, v)| (i, p_to_z(null.p_value(v)))).collect();
    let logp_voxel_fwe = ale
        .iter()
        .map(|&(i, v)| (i, neg_log10(exceedance_p(&fwe.max_ale, v))))
        .collect();

    let lookup: HashMap<usize, f64> = ale.iter().copied().collect();
    let members: Vec<usize> = ale.iter().filter(|(_, v)| *v >= cluster_threshold).map(|(i, _)| *i).collect();
    let mut clusters = Vec::new();
    let mut z_cluster_fwe = Vec::new();
    for voxels in grid.clusters(&members) {
        let p_fwe = exceedance_p(&fwe.max_cluster, voxels.len());
        let (peak, peak_ale) = voxels
            .iter()
            .map(|i| (*i, lookup.get(i).copied().unwrap_or(0.0)))
            .fold((voxels[0], f64::MIN), |best, next| if next.1 > best.1 { next } else { best });
        let z = p_to_z(p_fwe);
        z_cluster_fwe.extend(voxels.iter().map(|i| (*i, z)));
        clusters.push(Cluster {
            voxels,
            peak,
            peak_ale,
            p_fwe,
        });
    }
    z_cluster_fwe.sort_unstable_by_key(|(i, _)| *i);

    AleAnalysis {
        ale,
        z,
        logp_voxel_fwe,
        z_cluster_fwe,
        cluster_threshold,
        clusters,
    }
}

/// Difference of two ALE maps with permutation inference
#[derive(Debug, Clone)]
pub struct Subtraction {
    pub difference: SparseMap,
    pub z: SparseMap,
}

/// Permute experiments between the two groups `n_iters` times
pub fn subtraction<R: Rng>(first: &AleModel<'_>, second: &AleModel<'_>, n_iters: usize, rng: &mut R) -> Subtraction {
    let grid = first.grid();
    let n_first = first.n_experiments();
    let mut pooled = first.ma_maps();
    pooled.extend(second.ma_maps());

    let mut union = Union::new(grid.len());
    let observed_first = group_ale(&mut union, &pooled[..n_first]);
    let observed_second = group_ale(&mut union, &pooled[n_first..]);

    let mut slots: HashMap<usize, usize> = HashMap::new();
    for &(index, _) in observed_first.iter().chain(&observed_second) {
        let next = slots.len();
        slots.entry(index).or_insert(next);
    }
    let observed = difference(&slots, &observed_first, &observed_second);

    let mut exceed = vec![0usize; slots.len()];
    let mut order: Vec<usize> = (0..pooled.len()).collect();
    for _ in 0..n_iters {
        order.shuffle(rng);
        let a = group_ale(&mut union, order[..n_first].iter().map(|i| &pooled[*i]));
        let b = group_ale(&mut union, order[n_first..].iter().map(|i| &pooled[*i]));
        let permuted = difference(&slots, &a, &b);
        for ((count, null), obs) in exceed.iter_mut().zip(&permuted).zip(&observed) {
            if null.abs() >= obs.abs() {
                *count += 1;
            }
        }
    }

    let mut by_index: Vec<(usize, usize)> = slots.into_iter().collect();
    by_index.sort_unstable();
    let mut result = Subtraction {
        difference: Vec::new(),
        z: Vec::new(),
    };
    for (index, slot) in by_index {
        let diff = observed[slot];
        if diff == 0.0 {
            continue;
        }
        let p = (exceed[slot] + 1) as f64 / (n_iters + 1) as f64;
        result.difference.push((index, diff));
        result.z.push((index, diff.signum() * p_to_z(p / 2.0).max(0.0)));
    }
    result
}

fn group_ale<'m>(union: &mut Union, maps: impl IntoIterator<Item = &'m SparseMap>) -> SparseMap {
    for map in maps {
        union.add(map);
    }
    union.finish()
}

fn difference(slots: &HashMap<usize, usize>, first: &SparseMap, second: &SparseMap) -> Vec<f64> {
    let mut values = vec![0.0; slots.len()];
    for &(index, value) in first {
        if let Some(slot) = slots.get(&index) {
            values[*slot] += value;
        }
    }
    for &(index, value) in second {
        if let Some(slot) = slots.get(&index) {
            values[*slot] -= value;
        }
    }
    values
}

/// Voxel-wise p-values of `observed` against ALE maps built from foci
/// redrawn out of `baseline`
pub fn baseline_null<R: Rng>(
    model: &AleModel<'_>,
    observed: &SparseMap,
    baseline: &[[usize; 3]],
    n_iters: usize,
    rng: &mut R,
) -> Result<Vec<f64>, WorkflowFailure> {
    if baseline.is_empty() {
        return Err(WorkflowFailure::invalid_input(
            "no baseline coordinates fall inside the brain bounding box",
        ));
    }
    let grid = model.grid();
    let slots: HashMap<usize, usize> = observed.iter().enumerate().map(|(slot, (index, _))| (*index, slot)).collect();
    let mut exceed = vec![0usize; observed.len()];
    let mut union = Union::new(grid.len());
    let mut scratch = Scratch::new(grid.len());
    for _ in 0..n_iters {
        let map = model.relocated(&mut union, &mut scratch, rng, |rng| {
            baseline[rng.gen_range(0..baseline.len())]
        });
        for (index, value) in map {
            if let Some(&slot) = slots.get(&index) {
                if value >= observed[slot].1 {
                    exceed[slot] += 1;
                }
            }
        }
    }
    Ok(exceed
        .into_iter()
        .map(|count| (count + 1) as f64 / (n_iters + 1) as f64)
        .collect())
}
