//! Error types for riskann.

use thiserror::Error;

use crate::calibration::artifact::ArtifactError;

/// Errors that can occur during indexing, calibration, or serving.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// Empty query provided.
    #[error("query is empty")]
    EmptyQuery,

    /// Empty index (no vectors indexed).
    #[error("index is empty")]
    EmptyIndex,

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimension mismatch between a query and the index.
    #[error("dimension mismatch: expected {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Effort schedule is empty or not strictly increasing.
    #[error("invalid effort schedule: {0}")]
    InvalidSchedule(String),

    /// Calibration set has no queries.
    #[error("calibration set is empty")]
    EmptyCalibrationSet,

    /// Every raw score in the matrix was identical, so min-max normalization is undefined.
    #[error("degenerate normalization range: min {min} equals max {max}")]
    DegenerateNormalization { min: f32, max: f32 },

    /// The index produced a NaN or infinite k-th distance.
    #[error("non-finite non-conformity score for query {query} at schedule position {position}")]
    NonFiniteScore { query: usize, position: usize },

    /// No swept threshold satisfied the target risk.
    #[error(
        "target risk alpha={alpha} is infeasible: smallest corrected risk over the sweep was {min_corrected_risk}"
    )]
    Infeasible { alpha: f32, min_corrected_risk: f32 },

    /// Calibration artifact could not be read or written.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RetrieveError>;
