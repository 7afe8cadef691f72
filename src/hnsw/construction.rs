//! HNSW graph construction algorithm.

use crate::distance::DistanceMetric;
use crate::hnsw::graph::{HNSWIndex, Layer};
use crate::hnsw::search::greedy_search_layer;
use crate::RetrieveError;

/// Select neighbors using RND (Relative Neighborhood Diversification).
///
/// Criterion: include candidate \(X_j\) if it is closer to the query than it is to
/// every already-selected neighbor \(X_i\) (i.e. dist(q, j) < dist(i, j) for all selected i).
/// If fewer than `m` survive, the list is topped up with the closest rejected candidates.
pub(crate) fn select_neighbors_rnd(
    candidates: &[(u32, f32)],
    m: usize,
    vectors: &[f32],
    dimension: usize,
    metric: DistanceMetric,
) -> Vec<u32> {
    if candidates.is_empty() || m == 0 {
        return Vec::new();
    }

    let mut sorted: Vec<(u32, f32)> = candidates.to_vec();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut selected: Vec<u32> = Vec::with_capacity(m.min(sorted.len()));
    let mut rejected: Vec<u32> = Vec::new();

    for &(candidate_id, query_to_candidate) in &sorted {
        if selected.len() >= m {
            break;
        }
        let candidate_vec = get_vector(vectors, dimension, candidate_id as usize);
        let diverse = selected.iter().all(|&selected_id| {
            let selected_vec = get_vector(vectors, dimension, selected_id as usize);
            query_to_candidate < metric.distance(selected_vec, candidate_vec)
        });
        if diverse {
            selected.push(candidate_id);
        } else {
            rejected.push(candidate_id);
        }
    }

    // Keep the base layer well connected: fill remaining slots with the closest rejects.
    for id in rejected {
        if selected.len() >= m {
            break;
        }
        selected.push(id);
    }

    selected
}

/// Get vector from SoA storage.
#[inline]
pub(crate) fn get_vector(vectors: &[f32], dimension: usize, idx: usize) -> &[f32] {
    let start = idx * dimension;
    &vectors[start..start + dimension]
}

/// Construct HNSW graph layers.
///
/// Implements the insertion algorithm from the HNSW paper (Malkov & Yashunin, 2018)
/// as an offline build over the stored vectors, in insertion order: node `i` only
/// ever links to nodes `< i`, and the entry point is always an inserted node.
///
/// While descending, the closest node found on the layer above becomes the entry
/// point for the next layer down.
pub fn construct_graph(index: &mut HNSWIndex) -> Result<(), RetrieveError> {
    let n = index.num_vectors;
    if n == 0 {
        return Err(RetrieveError::EmptyIndex);
    }

    let max_layer = index.layer_assignments.iter().max().copied().unwrap_or(0) as usize;
    index.layers = (0..=max_layer).map(|_| Layer::new(n)).collect();

    // Disjoint field borrows: vectors/params are read while layers are rewired.
    let dimension = index.dimension;
    let metric = index.params.metric;
    let ef_construction = index.params.ef_construction;
    let (m, m_max) = (index.params.m, index.params.m_max);
    let vectors = &index.vectors;
    let assignments = &index.layer_assignments;
    let layers = &mut index.layers;

    let mut global_entry_point = 0u32;
    let mut global_entry_layer = assignments[0] as usize;

    for current_id in 1..n {
        let current_layer = assignments[current_id] as usize;
        let current_vector = get_vector(vectors, dimension, current_id);
        let mut layer_entry_point = global_entry_point;

        // 1) Greedy (ef=1) descent through layers above the node's own top layer.
        if global_entry_layer > current_layer {
            for layer_idx in ((current_layer + 1)..=global_entry_layer).rev() {
                let nearest = greedy_search_layer(
                    current_vector,
                    layer_entry_point,
                    &layers[layer_idx],
                    vectors,
                    dimension,
                    1,
                    metric,
                );
                if let Some(&(best_id, _)) = nearest.first() {
                    layer_entry_point = best_id;
                }
            }
        }

        // 2) Beam search + connect on every layer the node shares with the graph.
        for layer_idx in (0..=current_layer.min(global_entry_layer)).rev() {
            let candidates = greedy_search_layer(
                current_vector,
                layer_entry_point,
                &layers[layer_idx],
                vectors,
                dimension,
                ef_construction,
                metric,
            );
            if let Some(&(best_id, _)) = candidates.first() {
                layer_entry_point = best_id;
            }

            let max_degree = if layer_idx == 0 { m_max } else { m };
            let mut selected =
                select_neighbors_rnd(&candidates, max_degree, vectors, dimension, metric);
            selected.retain(|&id| {
                let id = id as usize;
                id < current_id && assignments[id] as usize >= layer_idx
            });

            let neighbors = layers[layer_idx].get_neighbors_mut();
            neighbors[current_id] = selected.iter().copied().collect();

            for &neighbor_id in &selected {
                let reverse = &mut neighbors[neighbor_id as usize];
                if !reverse.contains(&(current_id as u32)) {
                    reverse.push(current_id as u32);
                }
                if reverse.len() > max_degree {
                    let base = get_vector(vectors, dimension, neighbor_id as usize);
                    let mut scored: Vec<(u32, f32)> = reverse
                        .iter()
                        .map(|&id| {
                            let v = get_vector(vectors, dimension, id as usize);
                            (id, metric.distance(base, v))
                        })
                        .collect();
                    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
                    scored.truncate(max_degree);
                    *reverse = scored.into_iter().map(|(id, _)| id).collect();
                }
            }
        }

        // 3) A node reaching a new top layer becomes the entry point.
        if current_layer > global_entry_layer {
            global_entry_point = current_id as u32;
            global_entry_layer = current_layer;
        }
    }

    index.entry_point = global_entry_point;
    Ok(())
}
