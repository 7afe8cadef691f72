//! Non-conformity matrix: k-th neighbor distance per (query, schedule position).
//!
//! One batched search runs per schedule position over the whole calibration set.
//! The raw score of a query at a position is the distance to its k-th returned
//! neighbor. Raw scores are min-max normalized with bounds taken over the entire
//! matrix, and those bounds travel with the calibration artifact so serving
//! normalizes on the same scale.
//!
//! Alongside the scores the matrix keeps the predicted labels for every cell and
//! a precomputed FNR loss table, so the threshold sweep never re-runs searches
//! or set intersections.

use serde::{Deserialize, Serialize};

use crate::ann::EffortIndex;
use crate::benchmark::metrics::false_negative_rate;
use crate::calibration::CalibrationSet;
use crate::schedule::EffortSchedule;
use crate::{Result, RetrieveError};

/// Global min/max of raw scores, used to map distances onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct NormalizationBounds {
    /// Smallest raw score seen during calibration.
    pub min: f32,
    /// Largest raw score seen during calibration.
    pub max: f32,
}

#[derive(Deserialize)]
struct RawBounds {
    min: f32,
    max: f32,
}

impl TryFrom<RawBounds> for NormalizationBounds {
    type Error = RetrieveError;

    fn try_from(raw: RawBounds) -> Result<Self> {
        Self::new(raw.min, raw.max)
    }
}

impl NormalizationBounds {
    /// Validate and create bounds. `min == max` is degenerate.
    pub fn new(min: f32, max: f32) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(RetrieveError::InvalidParameter(format!(
                "normalization bounds must be finite, got min={min} max={max}"
            )));
        }
        if max == min {
            return Err(RetrieveError::DegenerateNormalization { min, max });
        }
        if max < min {
            return Err(RetrieveError::InvalidParameter(format!(
                "normalization max {max} is below min {min}"
            )));
        }
        Ok(Self { min, max })
    }

    /// `max - min`.
    #[inline]
    pub fn range(&self) -> f32 {
        self.max - self.min
    }

    /// `(raw - min) / (max - min)`, unclamped.
    #[inline]
    pub fn normalize(&self, raw: f32) -> f32 {
        (raw - self.min) / self.range()
    }

    /// Normalize and clamp to `[0, 1]`.
    ///
    /// Serving sees distances outside the calibration range; clamping keeps them on
    /// the scale the threshold was chosen on. An infinite distance (missing
    /// neighbor) clamps to `1.0`.
    #[inline]
    pub fn normalize_clamped(&self, raw: f32) -> f32 {
        self.normalize(raw).clamp(0.0, 1.0)
    }
}

/// Dense `(query × position)` table of normalized scores, predictions and losses.
#[derive(Debug, Clone)]
pub struct NonConformityMatrix {
    num_queries: usize,
    num_positions: usize,
    k: usize,
    /// Normalized scores, row-major `[query][position]`.
    scores: Vec<f32>,
    /// Predicted labels, `[query][position][k]`.
    predictions: Vec<u32>,
    /// FNR of each cell's prediction, row-major `[query][position]`.
    losses: Vec<f32>,
    bounds: NormalizationBounds,
}

impl NonConformityMatrix {
    /// Run one batched search per schedule position and assemble the matrix.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `k == 0`, `k` exceeds the index size, or a ground
    ///   truth row holds fewer than `k` ids
    /// - `DimensionMismatch` if the calibration vectors do not match the index
    /// - `NonFiniteScore` if any k-th distance is NaN or infinite
    /// - `DegenerateNormalization` if every k-th distance is identical
    pub fn build<I: EffortIndex + ?Sized>(
        index: &I,
        set: &CalibrationSet,
        schedule: &EffortSchedule,
        k: usize,
    ) -> Result<Self> {
        if k == 0 {
            return Err(RetrieveError::InvalidParameter("k must be positive".into()));
        }
        if index.num_vectors() == 0 {
            return Err(RetrieveError::EmptyIndex);
        }
        if k > index.num_vectors() {
            return Err(RetrieveError::InvalidParameter(format!(
                "k={k} exceeds index size {}",
                index.num_vectors()
            )));
        }
        if set.dimension() != index.dimension() {
            return Err(RetrieveError::DimensionMismatch {
                expected: index.dimension(),
                actual: set.dimension(),
            });
        }
        check_ground_truth(set.ground_truth(), k)?;

        let n = set.len();
        let num_positions = schedule.len();
        let mut raw = vec![0.0f32; n * num_positions];
        let mut predictions = vec![u32::MAX; n * num_positions * k];

        let mut labels = vec![u32::MAX; n * k];
        let mut distances = vec![f32::INFINITY; n * k];

        for (position, effort) in schedule.iter() {
            index.search_batch(set.vectors(), k, effort, &mut labels, &mut distances)?;

            for q in 0..n {
                let kth = distances[q * k + k - 1];
                if !kth.is_finite() {
                    return Err(RetrieveError::NonFiniteScore { query: q, position });
                }
                raw[q * num_positions + position] = kth;

                let cell = (q * num_positions + position) * k;
                predictions[cell..cell + k].copy_from_slice(&labels[q * k..(q + 1) * k]);
            }
            tracing::debug!(position, effort, queries = n, "non-conformity column filled");
        }

        Self::from_raw(n, num_positions, k, raw, predictions, set.ground_truth())
    }

    /// Assemble a matrix from precomputed raw k-th distances and predictions.
    ///
    /// `raw` is row-major `[query][position]`; `predictions` is
    /// `[query][position][k]`. Normalization bounds are the global min/max of `raw`.
    pub fn from_raw(
        num_queries: usize,
        num_positions: usize,
        k: usize,
        raw: Vec<f32>,
        predictions: Vec<u32>,
        ground_truth: &[Vec<u32>],
    ) -> Result<Self> {
        if num_queries == 0 {
            return Err(RetrieveError::EmptyCalibrationSet);
        }
        if num_positions == 0 {
            return Err(RetrieveError::InvalidSchedule("schedule is empty".into()));
        }
        if k == 0 {
            return Err(RetrieveError::InvalidParameter("k must be positive".into()));
        }
        if raw.len() != num_queries * num_positions
            || predictions.len() != num_queries * num_positions * k
            || ground_truth.len() != num_queries
        {
            return Err(RetrieveError::InvalidParameter(format!(
                "matrix shape mismatch: {num_queries} queries x {num_positions} positions x k={k}, \
                 got {} scores, {} predictions, {} ground truth rows",
                raw.len(),
                predictions.len(),
                ground_truth.len()
            )));
        }
        check_ground_truth(ground_truth, k)?;

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for (cell, &score) in raw.iter().enumerate() {
            if !score.is_finite() {
                return Err(RetrieveError::NonFiniteScore {
                    query: cell / num_positions,
                    position: cell % num_positions,
                });
            }
            min = min.min(score);
            max = max.max(score);
        }
        let bounds = NormalizationBounds::new(min, max)?;

        let scores: Vec<f32> = raw.iter().map(|&r| bounds.normalize(r)).collect();
        let losses: Vec<f32> = predictions
            .chunks_exact(k)
            .enumerate()
            .map(|(cell, predicted)| {
                false_negative_rate(&ground_truth[cell / num_positions], predicted, k)
            })
            .collect();

        Ok(Self {
            num_queries,
            num_positions,
            k,
            scores,
            predictions,
            losses,
            bounds,
        })
    }

    /// Number of calibration queries (rows).
    pub fn num_queries(&self) -> usize {
        self.num_queries
    }

    /// Number of schedule positions (columns).
    pub fn num_positions(&self) -> usize {
        self.num_positions
    }

    /// Neighbors per query.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Global normalization bounds.
    pub fn bounds(&self) -> NormalizationBounds {
        self.bounds
    }

    /// Normalized score of `query` at `position`.
    #[inline]
    pub fn score(&self, query: usize, position: usize) -> f32 {
        self.scores[query * self.num_positions + position]
    }

    /// All normalized scores of one query, by position.
    pub fn row(&self, query: usize) -> &[f32] {
        &self.scores[query * self.num_positions..(query + 1) * self.num_positions]
    }

    /// Labels the index returned for `query` at `position`.
    pub fn prediction(&self, query: usize, position: usize) -> &[u32] {
        let cell = (query * self.num_positions + position) * self.k;
        &self.predictions[cell..cell + self.k]
    }

    /// FNR of the prediction for `query` at `position`.
    #[inline]
    pub fn loss(&self, query: usize, position: usize) -> f32 {
        self.losses[query * self.num_positions + position]
    }
}

fn check_ground_truth(ground_truth: &[Vec<u32>], k: usize) -> Result<()> {
    if let Some((query, row)) = ground_truth.iter().enumerate().find(|(_, row)| row.len() < k) {
        return Err(RetrieveError::InvalidParameter(format!(
            "ground truth for query {query} has {} ids, need at least k={k}",
            row.len()
        )));
    }
    Ok(())
}
