//! One-sample sign-flipping permutation test.

use rand::Rng;
use tracing::debug;

use crate::domain::error::WorkflowFailure;
use crate::stats::exceedance_p;

/// Voxel-wise t statistics with max-|t| family-wise p-values
#[derive(Debug, Clone)]
pub struct SignFlip {
    pub t: Vec<f64>,
    pub p_fwe: Vec<f64>,
    pub max_t: Vec<f64>,
}

/// Per-voxel sums that do not change when signs flip
struct Voxel {
    values: Vec<f64>,
    sum_sq: f64,
}

fn t_value(sum: f64, sum_sq: f64, n: f64) -> f64 {
    let mean = sum / n;
    let var = (sum_sq - n * mean * mean) / (n - 1.0);
    if var <= f64::EPSILON * sum_sq.max(1.0) {
        0.0
    } else {
        mean / (var / n).sqrt()
    }
}

/// One-sample t statistic of each column of `samples` (samples × voxels)
pub fn t_statistics(samples: &[Vec<f64>]) -> Vec<f64> {
    let n = samples.len() as f64;
    let width = samples.first().map_or(0, Vec::len);
    (0..width)
        .map(|v| {
            let sum: f64 = samples.iter().map(|s| s[v]).sum();
            let sum_sq: f64 = samples.iter().map(|s| s[v] * s[v]).sum();
            t_value(sum, sum_sq, n)
        })
        .collect()
}

/// Test whether the mean of each voxel differs from zero
pub fn sign_flip<R: Rng>(samples: &[Vec<f64>], n_iters: usize, rng: &mut R) -> Result<SignFlip, WorkflowFailure> {
    if samples.len() < 2 {
        return Err(WorkflowFailure::invalid_input(
            "a one-sample test needs at least two maps",
        ));
    }
    let width = samples[0].len();
    if samples.iter().any(|s| s.len() != width) {
        return Err(WorkflowFailure::invalid_input("maps have different numbers of voxels"));
    }

    let voxels: Vec<Voxel> = (0..width)
        .map(|v| {
            let values: Vec<f64> = samples.iter().map(|s| s[v]).collect();
            let sum_sq = values.iter().map(|x| x * x).sum();
            Voxel { values, sum_sq }
        })
        .collect();
    let n = samples.len() as f64;
    let t = t_statistics(samples);

    let mut signs = vec![1.0; samples.len()];
    let mut max_t = Vec::with_capacity(n_iters);
    for _ in 0..n_iters {
        for sign in &mut signs {
            *sign = if rng.gen::<bool>() { 1.0 } else { -1.0 };
        }
        let max = voxels
            .iter()
            .map(|voxel| {
                let sum: f64 = voxel.values.iter().zip(&signs).map(|(x, s)| x * s).sum();
                t_value(sum, voxel.sum_sq, n).abs()
            })
            .fold(0.0, f64::max);
        max_t.push(max);
    }
    debug!(voxels = width, samples = samples.len(), n_iters, "sign-flip null complete");

    let p_fwe = t.iter().map(|value| exceedance_p(&max_t, value.abs())).collect();
    Ok(SignFlip { t, p_fwe, max_t })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_t_statistics() {
        let samples = vec![vec![1.0, 1.0, 0.0], vec![2.0, -1.0, 0.0], vec![3.0, 0.0, 0.0]];
        let t = t_statistics(&samples);
        assert!((t[0] - 2.0 * 3f64.sqrt()).abs() < 1e-12);
        assert!(t[1].abs() < 1e-12);
        assert_eq!(t[2], 0.0);
    }

    #[test]
    fn test_consistent_effect_is_significant() {
        let samples: Vec<Vec<f64>> = (0..10)
            .map(|i| vec![5.0 + 0.1 * i as f64, if i % 2 == 0 { 1.0 } else { -1.0 }])
            .collect();
        let mut rng = StdRng::seed_from_u64(5);
        let result = sign_flip(&samples, 500, &mut rng).unwrap();
        assert!(result.t[0] > 10.0);
        assert!(result.p_fwe[0] < 0.01);
        assert!(result.p_fwe[1] > 0.5);
        assert_eq!(result.max_t.len(), 500);
    }

    #[test]
    fn test_needs_two_samples() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sign_flip(&[vec![1.0]], 10, &mut rng).is_err());
        assert!(sign_flip(&[vec![1.0], vec![1.0, 2.0]], 10, &mut rng).is_err());
    }
}
