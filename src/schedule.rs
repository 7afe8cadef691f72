//! Effort schedules: the ordered search-effort levels a query may escalate through.

use serde::{Deserialize, Serialize};

use crate::{Result, RetrieveError};

/// Strictly increasing, non-empty sequence of effort values.
///
/// Position `i` is the `i`-th escalation round. The last element is the
/// mandatory fallback: a query still unresolved there is answered at that effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct EffortSchedule {
    efforts: Vec<usize>,
}

impl EffortSchedule {
    /// Create a schedule from explicit effort values.
    ///
    /// # Errors
    ///
    /// [`RetrieveError::InvalidSchedule`] if `efforts` is empty, contains a zero,
    /// or is not strictly increasing.
    pub fn new(efforts: Vec<usize>) -> Result<Self> {
        if efforts.is_empty() {
            return Err(RetrieveError::InvalidSchedule(
                "schedule must contain at least one effort level".into(),
            ));
        }
        if efforts[0] == 0 {
            return Err(RetrieveError::InvalidSchedule(
                "effort values must be positive".into(),
            ));
        }
        if let Some(pos) = efforts.windows(2).position(|w| w[0] >= w[1]) {
            return Err(RetrieveError::InvalidSchedule(format!(
                "efforts must be strictly increasing, but position {} ({}) >= position {} ({})",
                pos,
                efforts[pos],
                pos + 1,
                efforts[pos + 1]
            )));
        }
        Ok(Self { efforts })
    }

    /// Arithmetic schedule `start, start + step, ...` up to and including `end`.
    ///
    /// `linear(1, 1024, 20)` yields `1, 21, 41, ..., 1021`.
    ///
    /// # Errors
    ///
    /// [`RetrieveError::InvalidSchedule`] if `step == 0`, `start == 0`, or `start > end`.
    pub fn linear(start: usize, end: usize, step: usize) -> Result<Self> {
        if step == 0 {
            return Err(RetrieveError::InvalidSchedule("step must be positive".into()));
        }
        if start > end {
            return Err(RetrieveError::InvalidSchedule(format!(
                "start ({start}) exceeds end ({end})"
            )));
        }
        Self::new((start..=end).step_by(step).collect())
    }

    /// Number of effort levels (= maximum number of serving rounds).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.efforts.len()
    }

    /// Always false: schedules are non-empty by construction.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.efforts.is_empty()
    }

    /// Effort at `position`.
    #[inline]
    #[must_use]
    pub fn get(&self, position: usize) -> Option<usize> {
        self.efforts.get(position).copied()
    }

    /// Fallback (maximum) effort.
    #[inline]
    #[must_use]
    pub fn max_effort(&self) -> usize {
        self.efforts[self.efforts.len() - 1]
    }

    /// Position of the fallback effort.
    #[inline]
    #[must_use]
    pub fn last_position(&self) -> usize {
        self.efforts.len() - 1
    }

    /// Whether `position` is the fallback round.
    #[inline]
    #[must_use]
    pub fn is_final(&self, position: usize) -> bool {
        position == self.last_position()
    }

    /// Effort values in escalation order.
    #[inline]
    #[must_use]
    pub fn efforts(&self) -> &[usize] {
        &self.efforts
    }

    /// Iterate `(position, effort)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.efforts.iter().copied().enumerate()
    }
}

impl TryFrom<Vec<usize>> for EffortSchedule {
    type Error = RetrieveError;

    fn try_from(efforts: Vec<usize>) -> Result<Self> {
        Self::new(efforts)
    }
}

impl From<EffortSchedule> for Vec<usize> {
    fn from(schedule: EffortSchedule) -> Self {
        schedule.efforts
    }
}
