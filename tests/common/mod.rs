//! Deterministic effort-parameterized indexes for end-to-end tests.
//!
//! Real ANN indexes make risk assertions statistical. These stand-ins make the
//! relationship between effort, k-th distance and misses exact, so calibration
//! and serving behavior can be asserted precisely.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use riskann::{CalibrationSet, EffortIndex, Result, RetrieveError};

/// Labels `>= IMPOSTOR_BASE` are never true neighbors.
pub const IMPOSTOR_BASE: u32 = 10_000;

/// 1-d "index" where each query value is its hardness `h` in `[0, 1]`.
///
/// At effort `e` a query misses a fraction `h * max(0, 1 - e / decay)` of its
/// true neighbors `0..k` (rounded down to whole neighbors), and its k-th
/// distance is `1 + that fraction`. Harder queries and lower efforts miss more
/// and look farther away; every query is exact from `e >= decay` on.
#[derive(Debug, Clone, Copy)]
pub struct HardnessOracle {
    pub decay: f32,
}

impl Default for HardnessOracle {
    fn default() -> Self {
        Self { decay: 200.0 }
    }
}

impl HardnessOracle {
    pub fn miss_fraction(&self, hardness: f32, effort: usize) -> f32 {
        hardness * (1.0 - effort as f32 / self.decay).max(0.0)
    }

    /// Number of true neighbors missed at `effort`.
    pub fn misses(&self, hardness: f32, effort: usize, k: usize) -> usize {
        ((k as f32 * self.miss_fraction(hardness, effort)).floor() as usize).min(k)
    }
}

impl EffortIndex for HardnessOracle {
    fn dimension(&self) -> usize {
        1
    }

    fn num_vectors(&self) -> usize {
        IMPOSTOR_BASE as usize * 2
    }

    fn search_batch(
        &self,
        queries: &[f32],
        k: usize,
        effort: usize,
        labels: &mut [u32],
        distances: &mut [f32],
    ) -> Result<()> {
        if queries.is_empty() {
            return Err(RetrieveError::EmptyQuery);
        }
        if labels.len() < queries.len() * k || distances.len() < queries.len() * k {
            return Err(RetrieveError::InvalidParameter("output buffers too small".into()));
        }
        for (i, &hardness) in queries.iter().enumerate() {
            let fraction = self.miss_fraction(hardness, effort);
            let hits = k - self.misses(hardness, effort, k);
            for j in 0..k {
                labels[i * k + j] = if j < hits {
                    j as u32
                } else {
                    IMPOSTOR_BASE + j as u32
                };
                distances[i * k + j] = (j + 1) as f32 / k as f32 * (1.0 + fraction);
            }
        }
        Ok(())
    }
}

/// Always returns the true neighbors `0..k`; the k-th distance `1 + 1/effort`
/// still shrinks with effort so normalization is well defined.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactOracle;

impl EffortIndex for ExactOracle {
    fn dimension(&self) -> usize {
        1
    }

    fn num_vectors(&self) -> usize {
        1_000
    }

    fn search_batch(
        &self,
        queries: &[f32],
        k: usize,
        effort: usize,
        labels: &mut [u32],
        distances: &mut [f32],
    ) -> Result<()> {
        for i in 0..queries.len() {
            for j in 0..k {
                labels[i * k + j] = j as u32;
                distances[i * k + j] = (j + 1) as f32 / k as f32 * (1.0 + 1.0 / effort as f32);
            }
        }
        Ok(())
    }
}

/// `n` hardness values drawn uniformly from `[lo, hi)`.
pub fn hardness(n: usize, lo: f32, hi: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.random_range(lo..hi)).collect()
}

/// Ground truth `0..k` for each of `n` queries.
pub fn true_neighbors(n: usize, k: usize) -> Vec<Vec<u32>> {
    vec![(0..k as u32).collect(); n]
}

/// Calibration set over hardness values, with ground truth `0..k`.
pub fn calibration_set(queries: Vec<f32>, k: usize) -> CalibrationSet {
    let n = queries.len();
    CalibrationSet::new(1, queries, true_neighbors(n, k)).expect("valid calibration set")
}
