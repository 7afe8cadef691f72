//! Serving evaluation: accuracy and effort of a batch of answers.
//!
//! | Metric | Formula | Interpretation |
//! |--------|---------|----------------|
//! | FNR@K | 1 - \|approx ∩ true\| / K | Fraction of true neighbors missed |
//! | Recall@K | \|approx ∩ true\| / K | Fraction of true neighbors found |
//! | Mean effort | Σ effort / n | Average search work per query |
//! | QPS | queries / seconds | Throughput |
//!
//! Adaptive and fixed-effort runs produce the same [`AdaptiveResults`] shape, so
//! one report type compares them.

use std::time::{Duration, Instant};

use crate::adaptive::AdaptiveResults;
use crate::benchmark::metrics::false_negative_rate;
use crate::{Result, RetrieveError};

/// Accuracy and cost of one serving run.
#[derive(Debug, Clone)]
pub struct ServingReport {
    /// Name of the run (e.g. "adaptive alpha=0.1", "fixed ef=1001")
    pub label: String,
    /// K value used
    pub k: usize,
    /// FNR@K per query
    pub fnrs: Vec<f32>,
    /// Effort per query
    pub efforts: Vec<usize>,
    /// Number of rounds executed
    pub rounds: usize,
    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl ServingReport {
    /// Score `results` against `ground_truth` (one row per query, first k used).
    pub fn from_results(
        label: impl Into<String>,
        results: &AdaptiveResults,
        ground_truth: &[Vec<u32>],
        elapsed: Duration,
    ) -> Result<Self> {
        if ground_truth.len() != results.len() {
            return Err(RetrieveError::InvalidParameter(format!(
                "{} results but {} ground truth rows",
                results.len(),
                ground_truth.len()
            )));
        }
        let k = results.k();
        let fnrs = results
            .iter()
            .zip(ground_truth)
            .map(|(answer, gt)| false_negative_rate(gt, answer.labels, k))
            .collect();
        Ok(Self {
            label: label.into(),
            k,
            fnrs,
            efforts: results.efforts().to_vec(),
            rounds: results.rounds().len(),
            elapsed,
        })
    }

    /// Number of queries.
    pub fn n_queries(&self) -> usize {
        self.fnrs.len()
    }

    /// Mean FNR: the empirical risk the calibration bounds.
    pub fn mean_fnr(&self) -> f32 {
        if self.fnrs.is_empty() {
            return 0.0;
        }
        (self.fnrs.iter().map(|&f| f64::from(f)).sum::<f64>() / self.fnrs.len() as f64) as f32
    }

    /// Mean recall@K.
    pub fn mean_recall(&self) -> f32 {
        1.0 - self.mean_fnr()
    }

    /// Mean effort per query.
    pub fn mean_effort(&self) -> f64 {
        if self.efforts.is_empty() {
            return 0.0;
        }
        self.efforts.iter().sum::<usize>() as f64 / self.efforts.len() as f64
    }

    /// Largest effort any query used.
    pub fn max_effort(&self) -> usize {
        self.efforts.iter().copied().max().unwrap_or(0)
    }

    /// Queries per second.
    pub fn qps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return f64::INFINITY;
        }
        self.n_queries() as f64 / secs
    }

    /// Whether the empirical FNR exceeds `alpha`.
    pub fn exceeds(&self, alpha: f32) -> bool {
        self.mean_fnr() > alpha
    }

    /// Format as a summary string.
    pub fn summary(&self) -> String {
        format!(
            "{}: fnr={:.4}, recall={:.4}, mean_effort={:.1}, max_effort={}, rounds={}, qps={:.1}",
            self.label,
            self.mean_fnr(),
            self.mean_recall(),
            self.mean_effort(),
            self.max_effort(),
            self.rounds,
            self.qps()
        )
    }
}

/// Time `search`, then score its results against `ground_truth`.
pub fn evaluate<F>(label: &str, ground_truth: &[Vec<u32>], search: F) -> Result<ServingReport>
where
    F: FnOnce() -> Result<AdaptiveResults>,
{
    let start = Instant::now();
    let results = search()?;
    let elapsed = start.elapsed();
    let report = ServingReport::from_results(label, &results, ground_truth, elapsed)?;
    tracing::info!(
        label,
        fnr = report.mean_fnr(),
        mean_effort = report.mean_effort(),
        qps = report.qps(),
        "serving run evaluated"
    );
    Ok(report)
}
