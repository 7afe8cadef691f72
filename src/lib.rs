//! riskann: risk-controlled adaptive-effort approximate nearest neighbor search.
//!
//! A fixed ANN search effort (HNSW `ef`, IVF `nprobe`, ...) must be sized for the
//! hardest queries. This crate instead calibrates, once and offline, a stopping
//! rule that lets each query escalate through an increasing effort schedule
//! until it is confident, with a finite-sample bound on the expected
//! false-negative rate (FNR):
//!
//! - [`calibration`]: searches a labeled calibration set at every effort level,
//!   builds the non-conformity matrix (k-th neighbor distances), applies a
//!   position penalty, and sweeps a threshold with conformal risk control (CRC).
//!   The result is a [`CalibrationArtifact`].
//! - [`adaptive`]: serves queries in synchronous rounds with one batched index
//!   search per round, resolving each query as soon as the artifact's rule allows.
//! - [`hnsw`]: an HNSW index implementing [`EffortIndex`], with `ef` as the
//!   effort knob (feature `hnsw`, on by default).
//!
//! # Critical Nuances
//!
//! ## The Guarantee Is In Expectation
//!
//! CRC bounds the *expected* FNR over queries exchangeable with the calibration
//! set. Individual queries can still miss neighbors, and a serving workload that
//! drifts away from the calibration distribution voids the bound.
//!
//! ## Monotonicity Is Assumed
//!
//! The sweep picks the largest threshold whose corrected risk meets the target.
//! That is only the right threshold if risk grows with the threshold. The
//! recorded [`calibration::RiskCurve`] lets callers check it; calibration logs a
//! warning when it does not hold.
//!
//! ## Normalization Is Global
//!
//! Scores are min-max normalized with the smallest and largest k-th distance
//! over the whole calibration matrix. Serving clamps to `[0, 1]` with the same
//! bounds, so the metric and index must not change between calibration and
//! serving.
//!
//! # Logging
//!
//! The crate emits `tracing` events and installs no subscriber.

pub mod adaptive;
pub mod ann;
pub mod benchmark;
pub mod calibration;
pub mod config;
pub mod distance;
pub mod error;
#[cfg(feature = "hnsw")]
pub mod hnsw;
pub mod schedule;
pub mod simd;

// Re-exports
pub use adaptive::{search_fixed_effort, AdaptiveResults, AdaptiveSearcher, QueryResult, RoundStats};
pub use ann::EffortIndex;
pub use calibration::{calibrate, Calibration, CalibrationArtifact, CalibrationSet};
pub use config::CalibrationConfig;
pub use error::{Result, RetrieveError};
pub use schedule::EffortSchedule;
