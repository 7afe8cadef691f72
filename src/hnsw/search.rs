//! HNSW search: per-layer beam search and the top-down query path.

use std::collections::{BinaryHeap, HashSet};

use crate::distance::DistanceMetric;
use crate::hnsw::construction::get_vector;
use crate::hnsw::graph::{HNSWIndex, Layer};
use crate::{Result, RetrieveError};

/// Candidate node during search.
#[derive(Clone, PartialEq)]
pub(crate) struct Candidate {
    pub(crate) id: u32,
    pub(crate) distance: f32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap: smaller distance = higher priority
        // Use total_cmp for IEEE 754 total ordering (NaN-safe)
        self.distance.total_cmp(&other.distance).reverse()
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result entry for the bounded max-heap (worst result on top).
#[derive(PartialEq)]
struct Farthest {
    id: u32,
    distance: f32,
}

impl Eq for Farthest {}

impl Ord for Farthest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

impl PartialOrd for Farthest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Beam search in a single layer (Malkov & Yashunin, 2016).
///
/// - min-heap of candidates (explore closest first)
/// - max-heap of at most `ef` results (track worst result for pruning)
/// - stop once the best unexplored candidate is worse than the worst result
///
/// Returns up to `ef` `(internal id, distance)` pairs sorted ascending.
pub(crate) fn greedy_search_layer(
    query: &[f32],
    entry_point: u32,
    layer: &Layer,
    vectors: &[f32],
    dimension: usize,
    ef: usize,
    metric: DistanceMetric,
) -> Vec<(u32, f32)> {
    let ef = ef.max(1);
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<Farthest> = BinaryHeap::with_capacity(ef + 1);
    let mut visited: HashSet<u32> = HashSet::with_capacity(ef * 2);

    let entry_distance = metric.distance(query, get_vector(vectors, dimension, entry_point as usize));
    candidates.push(Candidate {
        id: entry_point,
        distance: entry_distance,
    });
    results.push(Farthest {
        id: entry_point,
        distance: entry_distance,
    });
    visited.insert(entry_point);

    while let Some(candidate) = candidates.pop() {
        let worst = results.peek().map_or(f32::INFINITY, |r| r.distance);
        if candidate.distance > worst && results.len() >= ef {
            break;
        }

        for &neighbor_id in layer.get_neighbors(candidate.id) {
            if !visited.insert(neighbor_id) {
                continue;
            }
            let distance =
                metric.distance(query, get_vector(vectors, dimension, neighbor_id as usize));
            let worst = results.peek().map_or(f32::INFINITY, |r| r.distance);
            if results.len() < ef || distance < worst {
                candidates.push(Candidate {
                    id: neighbor_id,
                    distance,
                });
                results.push(Farthest {
                    id: neighbor_id,
                    distance,
                });
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut output: Vec<(u32, f32)> = results.into_iter().map(|r| (r.id, r.distance)).collect();
    output.sort_by(|a, b| a.1.total_cmp(&b.1));
    output
}

impl HNSWIndex {
    /// Search for the `k` nearest neighbors with beam width `ef`.
    ///
    /// The base-layer beam is `max(ef, k)`, so efforts below `k` still return `k`
    /// results when the index holds at least `k` vectors. Returns `(doc_id, distance)`
    /// sorted ascending by distance.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<(u32, f32)>> {
        if !self.built {
            return Err(RetrieveError::InvalidParameter(
                "index must be built before search".into(),
            ));
        }
        if query.is_empty() {
            return Err(RetrieveError::EmptyQuery);
        }
        if query.len() != self.dimension {
            return Err(RetrieveError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Err(RetrieveError::InvalidParameter("k must be positive".into()));
        }

        let metric = self.params.metric;
        let mut entry = self.entry_point;
        for layer in self.layers.iter().skip(1).rev() {
            let nearest =
                greedy_search_layer(query, entry, layer, &self.vectors, self.dimension, 1, metric);
            if let Some(&(best, _)) = nearest.first() {
                entry = best;
            }
        }

        let mut results = greedy_search_layer(
            query,
            entry,
            &self.layers[0],
            &self.vectors,
            self.dimension,
            ef.max(k),
            metric,
        );
        results.truncate(k);
        Ok(results
            .into_iter()
            .map(|(id, distance)| (self.doc_ids[id as usize], distance))
            .collect())
    }
}
