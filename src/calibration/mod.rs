//! Offline calibration of the adaptive stopping rule.
//!
//! Pipeline:
//!
//! ```text
//! CalibrationSet ──search at every effort──▶ NonConformityMatrix
//!                                               │ + position penalty
//!                                               ▼
//!                                        RegularizedMatrix
//!                                               │ CRC sweep over lambda
//!                                               ▼
//!                                  CalibrationArtifact + RiskCurve
//! ```
//!
//! Building the matrix is the expensive step (one batched search per schedule
//! position). [`CalibrationSession`] keeps it around so several targets or
//! penalties can be calibrated from the same searches.
//!
//! # Example
//!
//! ```rust
//! use riskann::calibration::{CalibrationSet, CalibrationSession, RiskControl, Regularization};
//! use riskann::hnsw::{HNSWIndex, HNSWParams};
//! use riskann::EffortSchedule;
//!
//! # fn main() -> Result<(), riskann::RetrieveError> {
//! let data = riskann::benchmark::create_clustered_dataset(500, 40, 8, 5, 0.08, 7);
//! let index = HNSWIndex::from_vectors(8, HNSWParams::default(), &data.train)?;
//! let gt = riskann::benchmark::compute_all_ground_truth(&data.test, &data.train, 8, 5);
//! let set = CalibrationSet::new(8, data.test.clone(), gt)?;
//!
//! let schedule = EffortSchedule::linear(1, 81, 20)?;
//! let session = CalibrationSession::build(&index, &set, schedule, 5)?;
//! let calibration = session.calibrate(Regularization::default(), &RiskControl::new(0.5))?;
//! assert!(calibration.artifact.lambda_hat() >= 0.0);
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod crc;
pub mod matrix;
pub mod regularize;

pub use artifact::{ArtifactError, CalibrationArtifact};
pub use crc::{LambdaGrid, RiskControl, RiskCurve, RiskPoint};
pub use matrix::{NonConformityMatrix, NormalizationBounds};
pub use regularize::{Regularization, RegularizedMatrix};

use crate::ann::EffortIndex;
use crate::config::CalibrationConfig;
use crate::schedule::EffortSchedule;
use crate::{Result, RetrieveError};

/// Tolerance used when checking the recorded risk curve for monotonicity.
const MONOTONE_TOLERANCE: f32 = 1e-6;

/// Labeled calibration queries: flat row-major vectors plus ground truth rows.
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    dimension: usize,
    vectors: Vec<f32>,
    ground_truth: Vec<Vec<u32>>,
}

/// One calibration query, borrowed from a [`CalibrationSet`].
#[derive(Debug, Clone, Copy)]
pub struct CalibrationQuery<'a> {
    pub vector: &'a [f32],
    /// True nearest neighbor ids, closest first.
    pub ground_truth: &'a [u32],
}

impl CalibrationSet {
    /// Create a calibration set.
    ///
    /// # Errors
    ///
    /// - `EmptyCalibrationSet` if there are no queries
    /// - `DimensionMismatch` if `vectors` is not a whole number of rows
    /// - `InvalidParameter` if the ground truth row count differs from the query count
    pub fn new(dimension: usize, vectors: Vec<f32>, ground_truth: Vec<Vec<u32>>) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrieveError::InvalidParameter(
                "dimension must be positive".into(),
            ));
        }
        if vectors.is_empty() {
            return Err(RetrieveError::EmptyCalibrationSet);
        }
        if vectors.len() % dimension != 0 {
            return Err(RetrieveError::DimensionMismatch {
                expected: dimension,
                actual: vectors.len(),
            });
        }
        let n = vectors.len() / dimension;
        if ground_truth.len() != n {
            return Err(RetrieveError::InvalidParameter(format!(
                "{n} calibration queries but {} ground truth rows",
                ground_truth.len()
            )));
        }
        Ok(Self {
            dimension,
            vectors,
            ground_truth,
        })
    }

    /// Number of queries.
    pub fn len(&self) -> usize {
        self.ground_truth.len()
    }

    /// Always false: empty sets are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.ground_truth.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// All query vectors, row-major.
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    pub fn ground_truth(&self) -> &[Vec<u32>] {
        &self.ground_truth
    }

    /// Query `i`, if in range.
    pub fn query(&self, i: usize) -> Option<CalibrationQuery<'_>> {
        let ground_truth = self.ground_truth.get(i)?;
        Some(CalibrationQuery {
            vector: &self.vectors[i * self.dimension..(i + 1) * self.dimension],
            ground_truth,
        })
    }

    /// All queries in order.
    pub fn iter(&self) -> impl Iterator<Item = CalibrationQuery<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.query(i))
    }
}

/// Output of a successful calibration.
#[derive(Debug, Clone)]
pub struct Calibration {
    /// Stopping rule for serving.
    pub artifact: CalibrationArtifact,
    /// Risk at every swept threshold.
    pub curve: RiskCurve,
    /// Stopping position of each calibration query under the chosen threshold.
    pub positions: Vec<usize>,
}

impl Calibration {
    /// Corrected risk at the chosen threshold.
    pub fn corrected_risk(&self) -> Option<f32> {
        self.curve.corrected_at(self.artifact.lambda_hat())
    }

    /// Mean effort the calibration queries would have used.
    pub fn mean_effort(&self) -> f64 {
        let schedule = self.artifact.schedule().efforts();
        if self.positions.is_empty() {
            return 0.0;
        }
        let total: usize = self.positions.iter().map(|&p| schedule[p]).sum();
        total as f64 / self.positions.len() as f64
    }
}

/// Searched calibration data, ready to be calibrated against any target.
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    matrix: NonConformityMatrix,
    schedule: EffortSchedule,
}

impl CalibrationSession {
    /// Search every calibration query at every schedule effort and build the matrix.
    pub fn build<I: EffortIndex + ?Sized>(
        index: &I,
        set: &CalibrationSet,
        schedule: EffortSchedule,
        k: usize,
    ) -> Result<Self> {
        tracing::info!(
            queries = set.len(),
            positions = schedule.len(),
            max_effort = schedule.max_effort(),
            k,
            "building non-conformity matrix"
        );
        let matrix = NonConformityMatrix::build(index, set, &schedule, k)?;
        Ok(Self { matrix, schedule })
    }

    /// Wrap an existing matrix. Its column count must match the schedule.
    pub fn from_matrix(matrix: NonConformityMatrix, schedule: EffortSchedule) -> Result<Self> {
        if matrix.num_positions() != schedule.len() {
            return Err(RetrieveError::InvalidSchedule(format!(
                "matrix has {} positions but schedule has {}",
                matrix.num_positions(),
                schedule.len()
            )));
        }
        Ok(Self { matrix, schedule })
    }

    pub fn matrix(&self) -> &NonConformityMatrix {
        &self.matrix
    }

    pub fn schedule(&self) -> &EffortSchedule {
        &self.schedule
    }

    /// Regularize, sweep, and package the artifact.
    ///
    /// # Errors
    ///
    /// `Infeasible` if no threshold meets `control.alpha`; `InvalidParameter` for a
    /// bad penalty or control.
    pub fn calibrate(
        &self,
        regularization: Regularization,
        control: &RiskControl,
    ) -> Result<Calibration> {
        let regularized = RegularizedMatrix::new(&self.matrix, regularization)?;
        let outcome = match crc::calibrate_threshold(&regularized, control) {
            Ok(outcome) => outcome,
            Err(err) => {
                if let RetrieveError::Infeasible {
                    alpha,
                    min_corrected_risk,
                } = err
                {
                    tracing::warn!(alpha, min_corrected_risk, "target risk is infeasible");
                }
                return Err(err);
            }
        };

        if !outcome.curve.is_non_decreasing(MONOTONE_TOLERANCE) {
            tracing::warn!(
                alpha = control.alpha,
                "risk curve is not monotone in lambda; the coverage guarantee assumes it is"
            );
        }

        let positions: Vec<usize> = (0..self.matrix.num_queries())
            .map(|q| regularized.select(q, outcome.lambda_hat))
            .collect();
        let artifact = CalibrationArtifact::new(
            outcome.lambda_hat,
            regularization,
            self.matrix.bounds(),
            self.schedule.clone(),
        )?;
        let calibration = Calibration {
            artifact,
            curve: outcome.curve,
            positions,
        };

        tracing::info!(
            alpha = control.alpha,
            lambda_hat = outcome.lambda_hat,
            corrected_risk = calibration.corrected_risk().unwrap_or(f32::NAN),
            mean_effort = calibration.mean_effort(),
            "calibration complete"
        );
        Ok(calibration)
    }
}

/// Calibrate `index` on `set` with every setting taken from `config`.
pub fn calibrate<I: EffortIndex + ?Sized>(
    index: &I,
    set: &CalibrationSet,
    config: &CalibrationConfig,
) -> Result<Calibration> {
    config.validate()?;
    let schedule = config.effort_schedule()?;
    let session = CalibrationSession::build(index, set, schedule, config.k)?;
    session.calibrate(config.regularization(), &config.risk_control())
}
