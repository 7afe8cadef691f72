//! Conformal risk control (CRC) threshold sweep.
//!
//! For each candidate threshold `lambda` on an ascending grid, every calibration
//! query stops at the first schedule position whose regularized score is
//! `<= lambda` (else the last position). The mean FNR of those stopping positions
//! is the empirical risk `R(lambda)`; the finite-sample corrected risk is
//!
//! ```text
//! corrected(lambda) = (n * R(lambda) + B) / (n + 1)
//! ```
//!
//! where `B` bounds the per-query loss (`1.0` for FNR). The chosen threshold is
//! the largest grid value with `corrected <= alpha`. Under exchangeability of
//! calibration and test queries, and if risk is non-decreasing in `lambda`, the
//! expected test FNR is then at most `alpha` (Angelopoulos et al., 2022).
//!
//! Monotonicity is assumed, not enforced: the sweep keeps the last passing
//! `lambda` even if a larger one failed in between. [`RiskCurve`] records the
//! whole sweep so the assumption can be checked.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::calibration::regularize::RegularizedMatrix;
use crate::{Result, RetrieveError};

/// Largest number of thresholds a grid may sweep.
pub const MAX_LAMBDA_CANDIDATES: usize = 1_000_000;

/// Ascending grid of candidate thresholds: `start + i * step` for `i = 0, 1, ...`
/// while the value stays `<= end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LambdaGrid {
    /// First candidate.
    pub start: f32,
    /// Last admissible candidate (inclusive).
    pub end: f32,
    /// Spacing between candidates.
    pub step: f32,
}

impl Default for LambdaGrid {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 1.5,
            step: 0.005,
        }
    }
}

impl LambdaGrid {
    /// Check that the grid is finite, non-empty and has a positive step.
    pub fn validate(&self) -> Result<()> {
        if !(self.start.is_finite() && self.end.is_finite() && self.step.is_finite()) {
            return Err(RetrieveError::InvalidParameter(
                "lambda grid values must be finite".into(),
            ));
        }
        if self.step <= 0.0 {
            return Err(RetrieveError::InvalidParameter(format!(
                "lambda grid step must be positive, got {}",
                self.step
            )));
        }
        if self.end < self.start {
            return Err(RetrieveError::InvalidParameter(format!(
                "lambda grid end {} is below start {}",
                self.end, self.start
            )));
        }
        let candidates = self.span_steps().floor() + 1.0;
        if candidates > MAX_LAMBDA_CANDIDATES as f64 {
            return Err(RetrieveError::InvalidParameter(format!(
                "lambda grid step {} yields {candidates} candidates, limit is {MAX_LAMBDA_CANDIDATES}",
                self.step
            )));
        }
        Ok(())
    }

    /// `(end - start) / step`, plus a tolerance for the f32 representation error of `step`.
    fn span_steps(&self) -> f64 {
        (f64::from(self.end) - f64::from(self.start)) / f64::from(self.step) + 1e-6
    }

    /// Number of candidates.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        (self.span_steps().floor() as usize).saturating_add(1)
    }

    /// Candidate `i`, computed directly so no rounding error accumulates.
    #[inline]
    pub fn value(&self, i: usize) -> f32 {
        (f64::from(self.start) + i as f64 * f64::from(self.step)) as f32
    }

    /// Candidates in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        (0..self.len()).map(move |i| self.value(i))
    }
}

/// Target risk and sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskControl {
    /// Target expected FNR, in `(0, 1]`.
    pub alpha: f32,
    /// Upper bound `B` on the per-query loss.
    pub risk_bound: f32,
    /// Threshold candidates.
    pub grid: LambdaGrid,
}

impl Default for RiskControl {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            risk_bound: 1.0,
            grid: LambdaGrid::default(),
        }
    }
}

impl RiskControl {
    /// Default sweep for target `alpha`.
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            ..Self::default()
        }
    }

    /// Check `alpha`, `B` and the grid.
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(RetrieveError::InvalidParameter(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if !(self.risk_bound.is_finite() && self.risk_bound > 0.0) {
            return Err(RetrieveError::InvalidParameter(format!(
                "risk bound must be positive and finite, got {}",
                self.risk_bound
            )));
        }
        self.grid.validate()
    }
}

/// One evaluated threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskPoint {
    /// Candidate threshold.
    pub lambda: f32,
    /// Mean FNR over the calibration set.
    pub empirical_risk: f32,
    /// `(n * empirical + B) / (n + 1)`.
    pub corrected_risk: f32,
}

/// Risk as a function of the threshold, in sweep order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskCurve {
    points: Vec<RiskPoint>,
}

impl RiskCurve {
    /// Evaluated points, ascending in `lambda`.
    pub fn points(&self) -> &[RiskPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether corrected risk never drops by more than `tolerance` as `lambda` grows.
    pub fn is_non_decreasing(&self, tolerance: f32) -> bool {
        self.points
            .windows(2)
            .all(|w| w[1].corrected_risk >= w[0].corrected_risk - tolerance)
    }

    /// Corrected risk at the grid point closest to `lambda`.
    pub fn corrected_at(&self, lambda: f32) -> Option<f32> {
        self.points
            .iter()
            .min_by(|a, b| (a.lambda - lambda).abs().total_cmp(&(b.lambda - lambda).abs()))
            .map(|p| p.corrected_risk)
    }

    /// Smallest corrected risk over the sweep.
    pub fn min_corrected_risk(&self) -> Option<f32> {
        self.points
            .iter()
            .map(|p| p.corrected_risk)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Write `lambda,risk` CSV (corrected risk), one row per grid point.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "lambda,risk")?;
        for p in &self.points {
            writeln!(writer, "{},{}", p.lambda, p.corrected_risk)?;
        }
        writer.flush()
    }
}

/// Result of a successful sweep.
#[derive(Debug, Clone)]
pub struct CrcOutcome {
    /// Largest grid threshold whose corrected risk is `<= alpha`.
    pub lambda_hat: f32,
    /// Every evaluated point.
    pub curve: RiskCurve,
}

/// Mean FNR over the calibration set when each query stops at
/// `matrix.select(q, lambda)`.
pub fn empirical_risk(matrix: &RegularizedMatrix<'_>, lambda: f32) -> f32 {
    let base = matrix.matrix();
    let n = base.num_queries();
    let total: f64 = (0..n)
        .map(|q| f64::from(base.loss(q, matrix.select(q, lambda))))
        .sum();
    (total / n as f64) as f32
}

/// Finite-sample corrected risk `(n * empirical + B) / (n + 1)`.
#[inline]
pub fn corrected_risk(empirical: f32, n: usize, risk_bound: f32) -> f32 {
    let n = n as f64;
    ((n * f64::from(empirical) + f64::from(risk_bound)) / (n + 1.0)) as f32
}

/// Sweep the grid and pick the largest threshold meeting `control.alpha`.
///
/// # Errors
///
/// `Infeasible` if no grid value has corrected risk `<= alpha`. This happens in
/// particular whenever `alpha < B / (n + 1)`, since even zero empirical risk
/// cannot beat the finite-sample term.
pub fn calibrate_threshold(
    matrix: &RegularizedMatrix<'_>,
    control: &RiskControl,
) -> Result<CrcOutcome> {
    control.validate()?;
    let n = matrix.matrix().num_queries();

    let mut points = Vec::with_capacity(control.grid.len());
    let mut lambda_hat = None;
    for lambda in control.grid.iter() {
        let empirical = empirical_risk(matrix, lambda);
        let corrected = corrected_risk(empirical, n, control.risk_bound);
        if corrected <= control.alpha {
            lambda_hat = Some(lambda);
        }
        points.push(RiskPoint {
            lambda,
            empirical_risk: empirical,
            corrected_risk: corrected,
        });
    }
    let curve = RiskCurve { points };

    match lambda_hat {
        Some(lambda_hat) => Ok(CrcOutcome { lambda_hat, curve }),
        None => Err(RetrieveError::Infeasible {
            alpha: control.alpha,
            min_corrected_risk: curve.min_corrected_risk().unwrap_or(f32::NAN),
        }),
    }
}
