//! Position penalty applied on top of normalized scores.
//!
//! `regularized(q, p) = normalized(q, p) + gamma * max(0, p - c_reg)`
//!
//! The first `c_reg + 1` positions are free; every later position costs `gamma`
//! more than the one before. This pushes the stopping rule toward cheap efforts
//! when scores are close (RAPS-style regularization, Angelopoulos et al. 2021).

use serde::{Deserialize, Serialize};

use crate::calibration::matrix::NonConformityMatrix;
use crate::{Result, RetrieveError};

/// Penalty parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRegularization")]
pub struct Regularization {
    /// Penalty per position past `c_reg`.
    pub gamma: f32,
    /// Last position that carries no penalty.
    pub c_reg: usize,
}

impl Default for Regularization {
    fn default() -> Self {
        Self {
            gamma: 0.01,
            c_reg: 2,
        }
    }
}

#[derive(Deserialize)]
struct RawRegularization {
    gamma: f32,
    c_reg: usize,
}

impl TryFrom<RawRegularization> for Regularization {
    type Error = RetrieveError;

    fn try_from(raw: RawRegularization) -> Result<Self> {
        Self::new(raw.gamma, raw.c_reg)
    }
}

impl Regularization {
    /// Create a validated regularization.
    pub fn new(gamma: f32, c_reg: usize) -> Result<Self> {
        let reg = Self { gamma, c_reg };
        reg.validate()?;
        Ok(reg)
    }

    /// No penalty at all.
    pub fn none() -> Self {
        Self {
            gamma: 0.0,
            c_reg: 0,
        }
    }

    /// Check that `gamma` is finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        if !self.gamma.is_finite() || self.gamma < 0.0 {
            return Err(RetrieveError::InvalidParameter(format!(
                "gamma must be finite and >= 0, got {}",
                self.gamma
            )));
        }
        Ok(())
    }

    /// Penalty for schedule position `position`.
    #[inline]
    pub fn penalty(&self, position: usize) -> f32 {
        self.gamma * position.saturating_sub(self.c_reg) as f32
    }

    /// Regularized score of a normalized score at `position`.
    #[inline]
    pub fn apply(&self, normalized: f32, position: usize) -> f32 {
        normalized + self.penalty(position)
    }
}

/// A [`NonConformityMatrix`] with the position penalty folded in.
///
/// Cheap to rebuild; construct a new one whenever `gamma` or `c_reg` change.
#[derive(Debug, Clone)]
pub struct RegularizedMatrix<'m> {
    matrix: &'m NonConformityMatrix,
    regularization: Regularization,
    scores: Vec<f32>,
}

impl<'m> RegularizedMatrix<'m> {
    /// Apply `regularization` to every cell of `matrix`.
    pub fn new(matrix: &'m NonConformityMatrix, regularization: Regularization) -> Result<Self> {
        regularization.validate()?;
        let positions = matrix.num_positions();
        let scores = (0..matrix.num_queries())
            .flat_map(|q| (0..positions).map(move |p| (q, p)))
            .map(|(q, p)| regularization.apply(matrix.score(q, p), p))
            .collect();
        Ok(Self {
            matrix,
            regularization,
            scores,
        })
    }

    /// The underlying matrix.
    pub fn matrix(&self) -> &'m NonConformityMatrix {
        self.matrix
    }

    /// Penalty parameters in use.
    pub fn regularization(&self) -> Regularization {
        self.regularization
    }

    /// Regularized score of `query` at `position`.
    #[inline]
    pub fn score(&self, query: usize, position: usize) -> f32 {
        self.scores[query * self.matrix.num_positions() + position]
    }

    /// Stopping position for `query` under threshold `lambda`: the first position
    /// whose regularized score is `<= lambda`, else the last position.
    pub fn select(&self, query: usize, lambda: f32) -> usize {
        let positions = self.matrix.num_positions();
        let row = &self.scores[query * positions..(query + 1) * positions];
        row.iter()
            .position(|&s| s <= lambda)
            .unwrap_or(positions - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn penalty_is_zero_through_c_reg() {
        let reg = Regularization::default();
        assert_eq!(reg.penalty(0), 0.0);
        assert_eq!(reg.penalty(2), 0.0);
        assert!((reg.penalty(3) - 0.01).abs() < 1e-7);
        assert!((reg.penalty(12) - 0.10).abs() < 1e-6);
    }

    #[test]
    fn rejects_bad_gamma() {
        assert!(Regularization::new(-0.1, 2).is_err());
        assert!(Regularization::new(f32::NAN, 2).is_err());
        assert!(Regularization::new(0.0, 0).is_ok());
    }

    #[test]
    fn select_takes_first_passing_position_or_falls_back() {
        let raw = vec![
            5.0, 3.0, 1.0, // query 0: normalized 1.0, 0.5, 0.0
            1.0, 1.0, 5.0, // query 1: normalized 0.0, 0.0, 1.0
        ];
        let gt = vec![vec![0], vec![0]];
        let m = NonConformityMatrix::from_raw(2, 3, 1, raw, vec![0; 6], &gt).unwrap();
        let reg = RegularizedMatrix::new(&m, Regularization::none()).unwrap();

        assert_eq!(reg.select(0, 0.6), 1);
        assert_eq!(reg.select(0, 0.0), 2);
        assert_eq!(reg.select(1, 0.0), 0);
        assert_eq!(reg.select(0, -1.0), 2); // nothing passes: last position
    }

    proptest! {
        #[test]
        fn penalty_is_monotone_in_position(
            gamma in 0.0f32..1.0,
            c_reg in 0usize..8,
            p in 0usize..200,
        ) {
            let reg = Regularization::new(gamma, c_reg).unwrap();
            prop_assert!(reg.penalty(p) >= 0.0);
            prop_assert!(reg.penalty(p + 1) >= reg.penalty(p));
        }

        #[test]
        fn select_is_antitone_in_lambda(
            scores in prop::collection::vec(0.0f32..10.0, 6),
            a in 0.0f32..1.5,
            b in 0.0f32..1.5,
        ) {
            // Raising the threshold can only stop a query earlier.
            let mut raw = scores;
            raw[0] = 0.0;
            raw[5] = 10.0;
            let m = NonConformityMatrix::from_raw(1, 6, 1, raw, vec![0; 6], &[vec![0]]).unwrap();
            let reg = RegularizedMatrix::new(&m, Regularization::default()).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(reg.select(0, hi) <= reg.select(0, lo));
        }
    }
}
