//! K-means clustering with k-means++ seeding.

use rand::Rng;

use crate::domain::error::WorkflowFailure;

const RESTARTS: usize = 10;
const MAX_ITERATIONS: usize = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to the assigned centroid
    pub inertia: f64,
}

fn distance_sq(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(label, c)| (label, distance_sq(point, c)))
        .fold((0, f64::INFINITY), |best, next| if next.1 < best.1 { next } else { best })
}

fn seed_centroids<R: Rng>(points: &[Vec<f64>], k: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
    while centroids.len() < k {
        let weights: Vec<f64> = points.iter().map(|p| nearest(p, &centroids).1).collect();
        let total: f64 = weights.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            weights
                .iter()
                .position(|w| {
                    target -= w;
                    target < 0.0
                })
                .unwrap_or(points.len() - 1)
        } else {
            rng.gen_range(0..points.len())
        };
        centroids.push(points[chosen].clone());
    }
    centroids
}

fn lloyd(points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>) -> KMeans {
    let dims = points[0].len();
    let mut labels = vec![usize::MAX; points.len()];
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (label, point) in labels.iter_mut().zip(points) {
            let (nearest_label, _) = nearest(point, &centroids);
            if *label != nearest_label {
                *label = nearest_label;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dims]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (label, point) in labels.iter().zip(points) {
            counts[*label] += 1;
            for (sum, x) in sums[*label].iter_mut().zip(point) {
                *sum += x;
            }
        }
        for (label, (sum, count)) in sums.into_iter().zip(&counts).enumerate() {
            if *count > 0 {
                centroids[label] = sum.into_iter().map(|s| s / *count as f64).collect();
            } else {
                // Re-seed an empty cluster at the worst-fitted point
                let (worst, _) = points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (i, nearest(p, &centroids).1))
                    .fold((0, f64::MIN), |best, next| if next.1 > best.1 { next } else { best });
                centroids[label] = points[worst].clone();
            }
        }
    }

    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, l)| distance_sq(p, &centroids[*l]))
        .sum();
    KMeans {
        labels,
        centroids,
        inertia,
    }
}

/// Partition `points` into `k` clusters, keeping the best of several restarts
pub fn kmeans<R: Rng>(points: &[Vec<f64>], k: usize, rng: &mut R) -> Result<KMeans, WorkflowFailure> {
    if k == 0 || k > points.len() {
        return Err(WorkflowFailure::invalid_input(format!(
            "cannot form {} clusters from {} points",
            k,
            points.len()
        )));
    }
    let mut best: Option<KMeans> = None;
    for _ in 0..RESTARTS {
        let fit = lloyd(points, seed_centroids(points, k, rng));
        if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }
    best.ok_or_else(|| WorkflowFailure::computation("k-means produced no solution"))
}
