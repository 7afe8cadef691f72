//! Effort-parameterized index trait.

use crate::{Result, RetrieveError};

/// An ANN index searchable at a caller-chosen effort level.
///
/// Implementations must be read-only during search (`&self`) and safe to share
/// across the worker threads they may use internally for a batch.
pub trait EffortIndex: Sync {
    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Number of indexed vectors.
    fn num_vectors(&self) -> usize;

    /// Search a batch of queries at one effort level.
    ///
    /// `queries` is row-major with `queries.len() / dimension()` rows. For query
    /// row `i`, the `k` nearest labels and distances (ascending by distance) are
    /// written to `labels[i*k..(i+1)*k]` and `distances[i*k..(i+1)*k]`. If fewer
    /// than `k` neighbors are found, remaining slots hold `u32::MAX` and
    /// `f32::INFINITY`.
    ///
    /// The output slices may be longer than `nq * k`; only the prefix is written.
    fn search_batch(
        &self,
        queries: &[f32],
        k: usize,
        effort: usize,
        labels: &mut [u32],
        distances: &mut [f32],
    ) -> Result<()>;

    /// Search a single query, returning `(label, distance)` pairs.
    fn search_one(&self, query: &[f32], k: usize, effort: usize) -> Result<Vec<(u32, f32)>> {
        let mut labels = vec![u32::MAX; k];
        let mut distances = vec![f32::INFINITY; k];
        self.search_batch(query, k, effort, &mut labels, &mut distances)?;
        Ok(labels
            .into_iter()
            .zip(distances)
            .filter(|(label, _)| *label != u32::MAX)
            .collect())
    }
}

/// Check a batch request against an index and return the number of query rows.
pub(crate) fn validate_batch<I: EffortIndex + ?Sized>(
    index: &I,
    queries: &[f32],
    k: usize,
    labels: &[u32],
    distances: &[f32],
) -> Result<usize> {
    let dimension = index.dimension();
    if queries.is_empty() {
        return Err(RetrieveError::EmptyQuery);
    }
    if dimension == 0 || queries.len() % dimension != 0 {
        return Err(RetrieveError::DimensionMismatch {
            expected: dimension,
            actual: queries.len(),
        });
    }
    if k == 0 {
        return Err(RetrieveError::InvalidParameter("k must be positive".into()));
    }
    let nq = queries.len() / dimension;
    if labels.len() < nq * k || distances.len() < nq * k {
        return Err(RetrieveError::InvalidParameter(format!(
            "output buffers too small: need {} slots, got labels={} distances={}",
            nq * k,
            labels.len(),
            distances.len()
        )));
    }
    Ok(nq)
}

#[cfg(feature = "hnsw")]
impl EffortIndex for crate::hnsw::HNSWIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn num_vectors(&self) -> usize {
        self.num_vectors
    }

    /// Queries are searched in parallel on the rayon pool, one row per task.
    fn search_batch(
        &self,
        queries: &[f32],
        k: usize,
        effort: usize,
        labels: &mut [u32],
        distances: &mut [f32],
    ) -> Result<()> {
        use rayon::prelude::*;

        let nq = validate_batch(self, queries, k, labels, distances)?;
        labels[..nq * k]
            .par_chunks_mut(k)
            .zip(distances[..nq * k].par_chunks_mut(k))
            .zip(queries.par_chunks(self.dimension))
            .try_for_each(|((label_row, distance_row), query)| {
                let found = self.search(query, k, effort)?;
                label_row.fill(u32::MAX);
                distance_row.fill(f32::INFINITY);
                for (slot, (label, distance)) in found.into_iter().enumerate() {
                    label_row[slot] = label;
                    distance_row[slot] = distance;
                }
                Ok(())
            })
    }
}

#[cfg(all(test, feature = "hnsw"))]
mod tests {
    use super::*;
    use crate::hnsw::{HNSWIndex, HNSWParams};

    fn line_index(n: usize) -> HNSWIndex {
        let vectors: Vec<f32> = (0..n).flat_map(|i| [i as f32, 0.5]).collect();
        HNSWIndex::from_vectors(2, HNSWParams::default(), &vectors).unwrap()
    }

    #[test]
    fn batch_matches_single_queries() {
        let index = line_index(120);
        let queries = [3.0, 0.5, 77.4, 0.5, 118.9, 0.5];
        let k = 4;
        let mut labels = vec![0u32; 3 * k];
        let mut distances = vec![0f32; 3 * k];
        index
            .search_batch(&queries, k, 16, &mut labels, &mut distances)
            .unwrap();

        for (row, query) in queries.chunks(2).enumerate() {
            let single = index.search_one(query, k, 16).unwrap();
            let got: Vec<(u32, f32)> = labels[row * k..(row + 1) * k]
                .iter()
                .copied()
                .zip(distances[row * k..(row + 1) * k].iter().copied())
                .collect();
            assert_eq!(single, got);
        }
    }

    #[test]
    fn pads_when_index_is_smaller_than_k() {
        let index = line_index(3);
        let mut labels = vec![0u32; 5];
        let mut distances = vec![0f32; 5];
        index
            .search_batch(&[1.0, 0.5], 5, 8, &mut labels, &mut distances)
            .unwrap();
        assert_eq!(labels[3], u32::MAX);
        assert_eq!(distances[4], f32::INFINITY);
        assert_eq!(index.search_one(&[1.0, 0.5], 5, 8).unwrap().len(), 3);
    }

    #[test]
    fn rejects_short_buffers_and_ragged_queries() {
        let index = line_index(10);
        let mut labels = vec![0u32; 3];
        let mut distances = vec![0f32; 3];
        assert!(matches!(
            index.search_batch(&[1.0, 0.5], 4, 8, &mut labels, &mut distances),
            Err(RetrieveError::InvalidParameter(_))
        ));
        assert!(matches!(
            index.search_batch(&[1.0, 0.5, 2.0], 1, 8, &mut labels, &mut distances),
            Err(RetrieveError::DimensionMismatch { .. })
        ));
    }
}
