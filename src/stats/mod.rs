//! Numerical building blocks of the meta-analysis workflows.

pub mod ale;
pub mod grid;
pub mod kernel;
pub mod kmeans;
pub mod normal;
pub mod permutation;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub use grid::Grid;
pub use kernel::{Kernel, KernelKind, SparseMap};
pub use normal::p_to_z;

/// Seeded generator; a fresh seed is drawn (and returned) when none is given
pub fn rng_from_seed(seed: Option<u64>) -> (StdRng, u64) {
    let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
    (StdRng::seed_from_u64(seed), seed)
}

/// Permutation p-value: share of null draws at least as extreme, counting
/// the observed value itself
pub fn exceedance_p<T: PartialOrd + Copy>(null: &[T], observed: T) -> f64 {
    let exceed = null.iter().filter(|value| **value >= observed).count();
    (exceed + 1) as f64 / (null.len() + 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_generators_repeat() {
        let (mut a, seed) = rng_from_seed(Some(42));
        let (mut b, _) = rng_from_seed(Some(seed));
        assert_eq!(seed, 42);
        assert_eq!(a.gen::<u64>(), b.gen::<u64>());
    }

    #[test]
    fn test_exceedance_p() {
        assert_eq!(exceedance_p(&[1.0, 2.0, 3.0], 2.0), 0.75);
        assert_eq!(exceedance_p(&[1, 2, 3], 4), 0.25);
        assert_eq!(exceedance_p::<f64>(&[], 1.0), 1.0);
    }
}
