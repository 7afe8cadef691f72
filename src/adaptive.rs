//! Adaptive multi-round batched search.
//!
//! # The Core Insight
//!
//! Most queries are easy: a small beam already finds their true neighbors. A
//! single fixed effort has to be sized for the hardest queries, so it overpays
//! on everyone else. Here every query starts at the cheapest effort and only the
//! ones the calibrated rule is not confident about escalate:
//!
//! ```text
//! round 0  effort   1  ████████████████████  all queries
//! round 1  effort  21  ███████               still unsure
//! round 2  effort  41  ███
//!   ...
//! final    effort max  █                     forced to resolve
//! ```
//!
//! Each round gathers the still-active query vectors into one contiguous batch,
//! issues one batched index search, scores every query's k-th neighbor distance
//! with the [`CalibrationArtifact`], and resolves queries whose score is at most
//! `lambda_hat`. The final schedule position resolves everyone left.
//!
//! The expected FNR over exchangeable queries stays below the `alpha` the artifact
//! was calibrated for, while mean effort drops well below the schedule maximum.

use crate::ann::EffortIndex;
use crate::calibration::CalibrationArtifact;
use crate::{Result, RetrieveError};

/// What happened in one serving round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundStats {
    /// Schedule position.
    pub position: usize,
    /// Effort used for the batch.
    pub effort: usize,
    /// Queries searched in this round.
    pub active: usize,
    /// Queries resolved in this round.
    pub resolved: usize,
}

/// Borrowed view of one query's answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult<'a> {
    /// Neighbor labels, closest first; `u32::MAX` marks a missing neighbor.
    pub labels: &'a [u32],
    /// Distances matching `labels`; `f32::INFINITY` marks a missing neighbor.
    pub distances: &'a [f32],
    /// Effort of the round that resolved the query.
    pub effort: usize,
    /// Round (schedule position) that resolved the query.
    pub round: usize,
}

/// Answers for a batch of queries, in input order.
#[derive(Debug, Clone)]
pub struct AdaptiveResults {
    k: usize,
    labels: Vec<u32>,
    distances: Vec<f32>,
    efforts: Vec<usize>,
    resolved_rounds: Vec<usize>,
    rounds: Vec<RoundStats>,
}

impl AdaptiveResults {
    /// Number of queries.
    pub fn len(&self) -> usize {
        self.efforts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.efforts.is_empty()
    }

    /// Neighbors per query.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Answer for query `i`.
    ///
    /// # Panics
    ///
    /// If `i >= self.len()`.
    pub fn query(&self, i: usize) -> QueryResult<'_> {
        let span = i * self.k..(i + 1) * self.k;
        QueryResult {
            labels: &self.labels[span.clone()],
            distances: &self.distances[span],
            effort: self.efforts[i],
            round: self.resolved_rounds[i],
        }
    }

    /// All answers in input order.
    pub fn iter(&self) -> impl Iterator<Item = QueryResult<'_>> + '_ {
        (0..self.len()).map(move |i| self.query(i))
    }

    /// Labels of all queries, row-major (`len() * k`).
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Distances of all queries, row-major (`len() * k`).
    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    /// Effort used per query.
    pub fn efforts(&self) -> &[usize] {
        &self.efforts
    }

    /// Per-round statistics, in execution order.
    pub fn rounds(&self) -> &[RoundStats] {
        &self.rounds
    }

    /// Mean effort per query.
    pub fn mean_effort(&self) -> f64 {
        if self.efforts.is_empty() {
            return 0.0;
        }
        self.efforts.iter().sum::<usize>() as f64 / self.efforts.len() as f64
    }

    /// Total effort summed over the batch.
    pub fn total_effort(&self) -> usize {
        self.efforts.iter().sum()
    }
}

/// Serves queries with a calibrated escalation rule.
///
/// Holds gather/scatter buffers that grow to the largest batch seen and are
/// reused across rounds and calls, so a searcher is used from one thread at a time.
///
/// # Example
///
/// ```rust
/// use riskann::adaptive::AdaptiveSearcher;
/// use riskann::calibration::{CalibrationArtifact, NormalizationBounds, Regularization};
/// use riskann::hnsw::{HNSWIndex, HNSWParams};
/// use riskann::EffortSchedule;
///
/// # fn main() -> Result<(), riskann::RetrieveError> {
/// let vectors: Vec<f32> = (0..256).flat_map(|i| [i as f32, (i % 16) as f32]).collect();
/// let index = HNSWIndex::from_vectors(2, HNSWParams::default(), &vectors)?;
/// let artifact = CalibrationArtifact::new(
///     0.2,
///     Regularization::default(),
///     NormalizationBounds::new(0.0, 50.0)?,
///     EffortSchedule::new(vec![4, 16, 64])?,
/// )?;
///
/// let mut searcher = AdaptiveSearcher::new(&index, artifact, 3)?;
/// let results = searcher.search(&[10.0, 10.0, 100.5, 4.0])?;
/// assert_eq!(results.len(), 2);
/// assert!(results.mean_effort() <= 64.0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AdaptiveSearcher<'a, I: EffortIndex + ?Sized> {
    index: &'a I,
    artifact: CalibrationArtifact,
    k: usize,
    batch_queries: Vec<f32>,
    batch_labels: Vec<u32>,
    batch_distances: Vec<f32>,
}

impl<'a, I: EffortIndex + ?Sized> AdaptiveSearcher<'a, I> {
    /// Create a searcher over `index` using `artifact`'s stopping rule.
    pub fn new(index: &'a I, artifact: CalibrationArtifact, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(RetrieveError::InvalidParameter("k must be positive".into()));
        }
        if index.num_vectors() == 0 {
            return Err(RetrieveError::EmptyIndex);
        }
        Ok(Self {
            index,
            artifact,
            k,
            batch_queries: Vec::new(),
            batch_labels: Vec::new(),
            batch_distances: Vec::new(),
        })
    }

    pub fn artifact(&self) -> &CalibrationArtifact {
        &self.artifact
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn index(&self) -> &'a I {
        self.index
    }

    /// Answer every row of `queries` (row-major), escalating unresolved queries
    /// through the schedule.
    ///
    /// Each query is resolved exactly once: at the first round whose score is
    /// `<= lambda_hat`, or at the final round.
    pub fn search(&mut self, queries: &[f32]) -> Result<AdaptiveResults> {
        let nq = query_rows(self.index, queries)?;
        let k = self.k;
        let dim = self.index.dimension();
        let schedule = self.artifact.schedule();
        let lambda_hat = self.artifact.lambda_hat();

        let mut labels = vec![u32::MAX; nq * k];
        let mut distances = vec![f32::INFINITY; nq * k];
        let mut resolved: Vec<Option<(usize, usize)>> = vec![None; nq];
        let mut rounds = Vec::with_capacity(schedule.len());
        let mut active: Vec<usize> = (0..nq).collect();

        for (position, effort) in schedule.iter() {
            if active.is_empty() {
                break;
            }
            let batch = active.len();

            self.batch_queries.clear();
            for &q in &active {
                self.batch_queries
                    .extend_from_slice(&queries[q * dim..(q + 1) * dim]);
            }
            if self.batch_labels.len() < batch * k {
                self.batch_labels.resize(batch * k, u32::MAX);
                self.batch_distances.resize(batch * k, f32::INFINITY);
            }
            let batch_labels = &mut self.batch_labels[..batch * k];
            let batch_distances = &mut self.batch_distances[..batch * k];

            self.index
                .search_batch(&self.batch_queries, k, effort, batch_labels, batch_distances)?;

            let mut slot = 0;
            active.retain(|&q| {
                let row = slot * k..(slot + 1) * k;
                slot += 1;
                if !self.artifact.resolves(batch_distances[row.end - 1], position) {
                    return true;
                }
                debug_assert!(resolved[q].is_none(), "query {q} resolved twice");
                labels[q * k..(q + 1) * k].copy_from_slice(&batch_labels[row.clone()]);
                distances[q * k..(q + 1) * k].copy_from_slice(&batch_distances[row]);
                resolved[q] = Some((position, effort));
                false
            });

            let stats = RoundStats {
                position,
                effort,
                active: batch,
                resolved: batch - active.len(),
            };
            tracing::debug!(
                position,
                effort,
                active = stats.active,
                resolved = stats.resolved,
                lambda_hat,
                "adaptive round"
            );
            rounds.push(stats);
        }

        let mut resolved_rounds = Vec::with_capacity(nq);
        let mut efforts = Vec::with_capacity(nq);
        for (q, slot) in resolved.into_iter().enumerate() {
            let (round, effort) = slot.ok_or_else(|| {
                RetrieveError::InvalidParameter(format!("query {q} was never resolved"))
            })?;
            resolved_rounds.push(round);
            efforts.push(effort);
        }

        let results = AdaptiveResults {
            k,
            labels,
            distances,
            efforts,
            resolved_rounds,
            rounds,
        };
        tracing::info!(
            queries = nq,
            rounds = results.rounds.len(),
            mean_effort = results.mean_effort(),
            "adaptive search complete"
        );
        Ok(results)
    }

    /// Answer every query at one effort, ignoring the stopping rule.
    pub fn search_fixed_effort(&self, queries: &[f32], effort: usize) -> Result<AdaptiveResults> {
        search_fixed_effort(self.index, queries, self.k, effort)
    }
}

/// Baseline: one batched search of all queries at a single `effort`.
///
/// Returns the same shape as [`AdaptiveSearcher::search`], with one round.
pub fn search_fixed_effort<I: EffortIndex + ?Sized>(
    index: &I,
    queries: &[f32],
    k: usize,
    effort: usize,
) -> Result<AdaptiveResults> {
    if k == 0 {
        return Err(RetrieveError::InvalidParameter("k must be positive".into()));
    }
    let nq = query_rows(index, queries)?;
    let mut labels = vec![u32::MAX; nq * k];
    let mut distances = vec![f32::INFINITY; nq * k];
    index.search_batch(queries, k, effort, &mut labels, &mut distances)?;

    tracing::debug!(queries = nq, effort, "fixed-effort search complete");
    Ok(AdaptiveResults {
        k,
        labels,
        distances,
        efforts: vec![effort; nq],
        resolved_rounds: vec![0; nq],
        rounds: vec![RoundStats {
            position: 0,
            effort,
            active: nq,
            resolved: nq,
        }],
    })
}

fn query_rows<I: EffortIndex + ?Sized>(index: &I, queries: &[f32]) -> Result<usize> {
    let dim = index.dimension();
    if queries.is_empty() {
        return Err(RetrieveError::EmptyQuery);
    }
    if dim == 0 || queries.len() % dim != 0 {
        return Err(RetrieveError::DimensionMismatch {
            expected: dim,
            actual: queries.len(),
        });
    }
    Ok(queries.len() / dim)
}
