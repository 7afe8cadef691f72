//! Seeded synthetic datasets and brute-force ground truth.
//!
//! Vectors are stored flat and row-major, the layout [`crate::ann::EffortIndex`]
//! and [`crate::calibration::CalibrationSet`] consume directly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::distance::l2_distance_squared;

/// Database and query vectors for one experiment.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Database vectors, row-major.
    pub train: Vec<f32>,
    /// Query vectors, row-major.
    pub test: Vec<f32>,
    /// Vector dimensionality
    pub dimension: usize,
}

impl Dataset {
    /// Number of database vectors.
    pub fn n_train(&self) -> usize {
        self.train.len() / self.dimension
    }

    /// Number of query vectors.
    pub fn n_test(&self) -> usize {
        self.test.len() / self.dimension
    }

    /// Database row `i`.
    pub fn train_row(&self, i: usize) -> &[f32] {
        &self.train[i * self.dimension..(i + 1) * self.dimension]
    }

    /// Query row `i`.
    pub fn test_row(&self, i: usize) -> &[f32] {
        &self.test[i * self.dimension..(i + 1) * self.dimension]
    }

    /// Split the queries at row `at`: `(test[..at], test[at..])`.
    ///
    /// Used to carve a calibration split and a held-out serving split out of one
    /// query pool.
    pub fn split_queries(&self, at: usize) -> (&[f32], &[f32]) {
        let at = at.min(self.n_test()) * self.dimension;
        self.test.split_at(at)
    }
}

/// Uniform random vectors in `[0, 1]^d`.
///
/// Baseline with no structure; every query is roughly equally hard.
pub fn create_uniform_dataset(n_train: usize, n_test: usize, dimension: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let train = (0..n_train * dimension).map(|_| rng.random::<f32>()).collect();
    let test = (0..n_test * dimension).map(|_| rng.random::<f32>()).collect();
    Dataset {
        train,
        test,
        dimension,
    }
}

/// Clustered dataset: Gaussian blobs around `n_clusters` uniform centers.
///
/// Queries drawn between clusters are harder than queries deep inside one, which
/// is the spread of difficulty adaptive effort exploits.
///
/// # Arguments
///
/// * `n_train` - Number of database vectors
/// * `n_test` - Number of query vectors
/// * `dimension` - Vector dimensionality
/// * `n_clusters` - Number of clusters
/// * `cluster_std` - Standard deviation within clusters
/// * `seed` - Random seed for reproducibility
pub fn create_clustered_dataset(
    n_train: usize,
    n_test: usize,
    dimension: usize,
    n_clusters: usize,
    cluster_std: f32,
    seed: u64,
) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_clusters = n_clusters.max(1);

    let centers: Vec<Vec<f32>> = (0..n_clusters)
        .map(|_| (0..dimension).map(|_| rng.random::<f32>()).collect())
        .collect();

    let mut sample = |rng: &mut StdRng, out: &mut Vec<f32>| {
        let center = &centers[rng.random_range(0..n_clusters)];
        for &c in center {
            // Box-Muller
            let u1: f32 = rng.random::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.random();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
            out.push((c + z * cluster_std).clamp(0.0, 1.0));
        }
    };

    let mut train = Vec::with_capacity(n_train * dimension);
    for _ in 0..n_train {
        sample(&mut rng, &mut train);
    }
    let mut test = Vec::with_capacity(n_test * dimension);
    for _ in 0..n_test {
        sample(&mut rng, &mut test);
    }

    Dataset {
        train,
        test,
        dimension,
    }
}

/// Exact k nearest database rows for one query, closest first (squared L2).
pub fn compute_ground_truth(query: &[f32], database: &[f32], dimension: usize, k: usize) -> Vec<u32> {
    let mut distances: Vec<(u32, f32)> = database
        .chunks_exact(dimension)
        .enumerate()
        .map(|(i, row)| (i as u32, l2_distance_squared(query, row)))
        .collect();

    let k = k.min(distances.len());
    if k == 0 {
        return Vec::new();
    }
    // Partial sort - only need top k
    distances.select_nth_unstable_by(k - 1, |a, b| a.1.total_cmp(&b.1));
    distances.truncate(k);
    distances.sort_by(|a, b| a.1.total_cmp(&b.1));
    distances.into_iter().map(|(id, _)| id).collect()
}

/// Exact k nearest neighbors for every row of `queries`.
pub fn compute_all_ground_truth(
    queries: &[f32],
    database: &[f32],
    dimension: usize,
    k: usize,
) -> Vec<Vec<u32>> {
    queries
        .par_chunks(dimension)
        .map(|query| compute_ground_truth(query, database, dimension, k))
        .collect()
}
